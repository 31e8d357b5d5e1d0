/// Single-sequence decode batch.
///
/// Every position belongs to sequence `SEQ_ID`. Only the final position asks
/// the engine for output: earlier tokens are context for the last one, which
/// is where the embedding is read.
use super::{SEQ_ID, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    tokens: Vec<Token>,
    positions: Vec<i32>,
    seq_ids: Vec<i32>,
    outputs: Vec<bool>,
}

impl Batch {
    /// Build a batch holding exactly `tokens`, with output on the last one.
    #[must_use]
    pub fn for_sequence(tokens: &[Token]) -> Self {
        let n = tokens.len();
        Self {
            tokens: tokens.to_vec(),
            positions: (0..n).map(|i| i as i32).collect(),
            seq_ids: vec![SEQ_ID; n],
            outputs: (0..n).map(|i| i + 1 == n).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    #[must_use]
    pub fn positions(&self) -> &[i32] {
        &self.positions
    }

    #[must_use]
    pub fn seq_ids(&self) -> &[i32] {
        &self.seq_ids
    }

    /// Per-position output flags.
    #[must_use]
    pub fn outputs(&self) -> &[bool] {
        &self.outputs
    }

    /// Index of the position whose output was requested.
    #[must_use]
    pub fn output_position(&self) -> Option<usize> {
        self.outputs.iter().rposition(|&o| o)
    }
}
