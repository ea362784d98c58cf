//! Cooperative green-thread scheduler
//!
//! All logical threads share one interpreter loop. Only one thread runs at
//! a time and the loop switches threads only at scheduling points: when
//! the clock ticks, or when the running thread blocks, yields or exits.

mod clock;
mod thread;

pub use clock::Clock;
pub use thread::{CallRecord, Frame, FrameKind, MonitorKey, ThreadContext, ThreadId, ThreadState};

use crate::value::Value;
use crate::{VmError, VmResult};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

/// Round-robin scheduler over thread contexts
pub struct Scheduler {
    /// Live threads in round-robin order
    threads: Vec<ThreadContext>,
    /// Index of the running thread
    current: usize,
    /// Next thread id to hand out
    next_id: u32,
    /// Held monitors, keeping their objects alive
    held: FxHashMap<MonitorKey, Value>,
    /// Live thread limit
    max_threads: usize,
}

impl Scheduler {
    /// Create a scheduler running `main`
    pub fn new(main: ThreadContext, max_threads: usize) -> Self {
        let next_id = main.id.as_u32() + 1;
        Self {
            threads: vec![main],
            current: 0,
            next_id,
            held: FxHashMap::default(),
            max_threads,
        }
    }

    /// The running thread
    #[inline]
    pub fn current(&self) -> &ThreadContext {
        &self.threads[self.current]
    }

    /// The running thread, mutably
    #[inline]
    pub fn current_mut(&mut self) -> &mut ThreadContext {
        &mut self.threads[self.current]
    }

    /// Number of live threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// A live thread by id
    pub fn thread_mut(&mut self, id: ThreadId) -> Option<&mut ThreadContext> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    /// Whether a thread is still live
    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.iter().any(|t| t.id == id)
    }

    /// Fork the running thread; the child resumes after the `fork`
    pub fn fork_current(&mut self) -> VmResult<ThreadId> {
        if self.threads.len() >= self.max_threads {
            return Err(VmError::TooManyThreads(self.max_threads));
        }
        let id = ThreadId::new(self.next_id);
        self.next_id += 1;
        let child = self.current().fork(id);
        debug!(parent = %self.current().id, child = %id, "forked thread");
        self.threads.push(child);
        Ok(id)
    }

    /// Take a monitor if nobody holds it
    pub fn try_acquire(&mut self, key: MonitorKey, target: &Value) -> bool {
        if self.held.contains_key(&key) {
            return false;
        }
        self.held.insert(key, target.clone());
        true
    }

    /// Release a monitor; false if it was not held
    pub fn release(&mut self, key: MonitorKey) -> bool {
        self.held.remove(&key).is_some()
    }

    /// Pick the thread to run next
    ///
    /// Removes the running thread first if it is exiting. Returns `None`
    /// once no thread is left.
    pub fn schedule(&mut self, clock: &mut Clock) -> VmResult<Option<ThreadId>> {
        let start = if matches!(self.current().state, ThreadState::Exiting) {
            let gone = self.threads.remove(self.current);
            debug!(thread = %gone.id, remaining = self.threads.len(), "thread exited");
            if self.threads.is_empty() {
                return Ok(None);
            }
            self.current % self.threads.len()
        } else {
            self.current + 1
        };

        loop {
            let now = clock.now();
            let count = self.threads.len();
            for step in 0..count {
                let index = (start + step) % count;
                if self.try_resume(index, now) {
                    self.current = index;
                    let thread = &mut self.threads[index];
                    thread.state = ThreadState::Running;
                    trace!(thread = %thread.id, tick = now, "scheduled");
                    return Ok(Some(thread.id));
                }
            }

            let wake = self
                .threads
                .iter()
                .filter_map(|t| match t.state {
                    ThreadState::Sleeping(tick) => Some(tick),
                    _ => None,
                })
                .min();
            match wake {
                Some(tick) => clock.idle_until(tick),
                None => return Err(VmError::Deadlock(count)),
            }
        }
    }

    /// Apply the resume rule of a thread's state
    fn try_resume(&mut self, index: usize, now: u64) -> bool {
        match &self.threads[index].state {
            ThreadState::Running | ThreadState::Suspending => true,
            ThreadState::Sleeping(wake) => now >= *wake,
            ThreadState::Joining(target) => {
                let target = *target;
                !self.threads.iter().any(|t| t.id == target)
            }
            ThreadState::Waiting { key, target } => {
                if self.held.contains_key(key) {
                    return false;
                }
                self.held.insert(*key, target.clone());
                true
            }
            ThreadState::Exiting => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ModuleId;
    use crate::options::TickSource;

    fn thread(id: u32) -> ThreadContext {
        ThreadContext::new(ThreadId::new(id), 0, ModuleId::new(0), 64)
    }

    fn clock() -> Clock {
        Clock::start(TickSource::Steps(1000)).unwrap()
    }

    #[test]
    fn test_round_robin() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        let child = scheduler.fork_current().unwrap();
        assert_eq!(child, ThreadId::new(2));
        let mut clock = clock();
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(ThreadId::new(2)));
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(ThreadId::MAIN));
    }

    #[test]
    fn test_exit_removes_thread() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        scheduler.fork_current().unwrap();
        scheduler.current_mut().state = ThreadState::Exiting;
        let mut clock = clock();
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(ThreadId::new(2)));
        assert_eq!(scheduler.thread_count(), 1);
        scheduler.current_mut().state = ThreadState::Exiting;
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), None);
    }

    #[test]
    fn test_join_waits_for_removal() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        let child = scheduler.fork_current().unwrap();
        scheduler.current_mut().state = ThreadState::Joining(child);
        let mut clock = clock();
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(child));
        // the child keeps running while the main thread is joining
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(child));
        scheduler.current_mut().state = ThreadState::Exiting;
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(ThreadId::MAIN));
    }

    #[test]
    fn test_sleepers_wake_on_tick() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        scheduler.current_mut().state = ThreadState::Sleeping(3);
        let mut clock = clock();
        assert_eq!(scheduler.schedule(&mut clock).unwrap(), Some(ThreadId::MAIN));
        assert_eq!(clock.now(), 3);
    }

    #[test]
    fn test_deadlock_reported() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        let key = MonitorKey::Class(crate::class::ClassId::new(0));
        assert!(scheduler.try_acquire(key, &Value::Null));
        scheduler.current_mut().state = ThreadState::Waiting {
            key,
            target: Value::Null,
        };
        let mut clock = clock();
        assert_eq!(
            scheduler.schedule(&mut clock).unwrap_err(),
            VmError::Deadlock(1)
        );
    }

    #[test]
    fn test_monitor_handoff() {
        let mut scheduler = Scheduler::new(thread(1), 8);
        let key = MonitorKey::Object(42);
        assert!(scheduler.try_acquire(key, &Value::Null));
        assert!(!scheduler.try_acquire(key, &Value::Null));
        assert!(scheduler.release(key));
        assert!(!scheduler.release(key));
    }

    #[test]
    fn test_thread_limit() {
        let mut scheduler = Scheduler::new(thread(1), 1);
        assert_eq!(
            scheduler.fork_current().unwrap_err(),
            VmError::TooManyThreads(1)
        );
    }
}
