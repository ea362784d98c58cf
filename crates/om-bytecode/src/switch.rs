//! Switch lowering strategy

/// Minimum number of case values before a jump table is considered
pub const MIN_TABLE_CASES: usize = 3;

/// Maximum ratio of table slots to case values
pub const MAX_TABLE_SPARSITY: usize = 3;

/// How a switch over integer case values is emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchStrategy {
    /// `case` jump table indexed by `value - min`
    JumpTable {
        /// Smallest case value
        min: i32,
        /// Number of table slots (`max - min + 1`)
        span: usize,
    },
    /// Sequence of compare-and-branch instructions
    CompareChain,
}

impl SwitchStrategy {
    /// Pick the lowering for a set of distinct case values
    ///
    /// A jump table needs at least three values whose span is at most three
    /// times the number of values.
    pub fn choose(values: &[i32]) -> Self {
        if values.len() < MIN_TABLE_CASES {
            return SwitchStrategy::CompareChain;
        }
        let (Some(&min), Some(&max)) = (values.iter().min(), values.iter().max()) else {
            return SwitchStrategy::CompareChain;
        };
        let span = (max as i64 - min as i64 + 1) as u64;
        if span <= (MAX_TABLE_SPARSITY * values.len()) as u64 && span <= u16::MAX as u64 {
            SwitchStrategy::JumpTable {
                min,
                span: span as usize,
            }
        } else {
            SwitchStrategy::CompareChain
        }
    }
}
