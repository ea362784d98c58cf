//! Value stack
//!
//! One stack per thread holds every frame's receiver, arguments and locals
//! followed by its operands. A frame is addressed relative to its data
//! pointer:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ operands                            │  ← len() (stack pointer)
//! │ local  argc+1 ..                    │
//! │ arg    1 .. argc                    │
//! │ receiver (slot 0)                   │  ← data pointer
//! ├─────────────────────────────────────┤
//! │ caller frame                        │
//! └─────────────────────────────────────┘
//! ```

use crate::options::DEFAULT_MAX_STACK;
use crate::{value::Value, VmError, VmResult};

/// Value stack of one thread
#[derive(Debug, Clone)]
pub struct Stack {
    /// Stack slots
    slots: Vec<Value>,

    /// Maximum stack size (in slots)
    max_size: usize,
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

impl Stack {
    /// Create a new stack with default size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STACK)
    }

    /// Create a stack with specific capacity
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_size.min(1024)),
            max_size,
        }
    }

    /// Push a value onto the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Pop the top `n` values, returned bottom first
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        if self.slots.len() < n {
            return Err(VmError::StackUnderflow);
        }
        let at = self.slots.len() - n;
        Ok(self.slots.split_off(at))
    }

    /// Peek at the top value without popping
    #[inline]
    pub fn peek(&self) -> VmResult<&Value> {
        self.slots.last().ok_or(VmError::StackUnderflow)
    }

    /// Peek at value N slots from top (0 = top)
    #[inline]
    pub fn peek_n(&self, n: usize) -> VmResult<&Value> {
        if self.slots.len() <= n {
            return Err(VmError::StackUnderflow);
        }
        Ok(&self.slots[self.slots.len() - 1 - n])
    }

    /// Value at an absolute position
    #[inline]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.slots.get(index)
    }

    /// Overwrite the value at an absolute position
    #[inline]
    pub fn set(&mut self, index: usize, value: Value) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Reserve `count` null slots (callee locals)
    pub fn reserve_locals(&mut self, count: usize) -> VmResult<()> {
        if self.slots.len() + count > self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.resize(self.slots.len() + count, Value::Null);
        Ok(())
    }

    /// Drop everything above `depth`
    #[inline]
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
    }

    /// Number of values on the stack
    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Check if stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Maximum number of slots
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(Value::Int(1)).unwrap();
        stack.push(Value::Int(2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert!(matches!(stack.pop().unwrap(), Value::Int(2)));
        assert!(matches!(stack.peek().unwrap(), Value::Int(1)));
    }

    #[test]
    fn test_overflow_and_underflow() {
        let mut stack = Stack::with_capacity(2);
        stack.push(Value::Null).unwrap();
        stack.push(Value::Null).unwrap();
        assert_eq!(stack.push(Value::Null), Err(VmError::StackOverflow));
        assert_eq!(stack.reserve_locals(1), Err(VmError::StackOverflow));
        stack.truncate(0);
        assert_eq!(stack.pop().unwrap_err(), VmError::StackUnderflow);
        assert_eq!(stack.pop_n(1).unwrap_err(), VmError::StackUnderflow);
    }

    #[test]
    fn test_pop_n_keeps_order() {
        let mut stack = Stack::new();
        for i in 0..4 {
            stack.push(Value::Int(i)).unwrap();
        }
        let top: Vec<i64> = stack
            .pop_n(3)
            .unwrap()
            .iter()
            .filter_map(Value::as_integral)
            .collect();
        assert_eq!(top, vec![1, 2, 3]);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_absolute_access() {
        let mut stack = Stack::new();
        stack.push(Value::Int(5)).unwrap();
        stack.reserve_locals(2).unwrap();
        assert!(stack.set(2, Value::Bool(true)));
        assert!(!stack.set(3, Value::Null));
        assert!(matches!(stack.get(2), Some(Value::Bool(true))));
        assert!(matches!(stack.peek_n(2).unwrap(), Value::Int(5)));
    }
}
