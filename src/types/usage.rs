//! Token usage tracking.

use serde::{Deserialize, Serialize};

/// Token usage for a generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Merge another usage into this one (accumulate, saturating at `u32::MAX`).
    pub fn merge(&mut self, other: &Usage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_accumulates_all_counters() {
        let mut total = Usage {
            input_tokens: 10,
            output_tokens: 5,
            total_tokens: 15,
        };
        total.merge(&Usage {
            input_tokens: 3,
            output_tokens: 4,
            total_tokens: 7,
        });
        assert_eq!(
            total,
            Usage {
                input_tokens: 13,
                output_tokens: 9,
                total_tokens: 22,
            }
        );
    }

    #[test]
    fn merge_saturates_instead_of_overflowing() {
        let report = Usage {
            input_tokens: 3_000_000_000,
            output_tokens: 1,
            total_tokens: 3_000_000_001,
        };
        let mut total = Usage::default();
        total.merge(&report);
        total.merge(&report);
        assert_eq!(total.input_tokens, u32::MAX);
        assert_eq!(total.output_tokens, 2);
        assert_eq!(total.total_tokens, u32::MAX);
    }
}
