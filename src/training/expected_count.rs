use std::ops::{AddAssign, Index};

use super::inside_outside::InsideOutside;
use crate::error::Result;
use crate::grammar::{GrammarModel, RuleId};

/// Expected number of uses of every rule, given a sentence (or a corpus,
/// once merged).
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ExpectedCounts {
    pub unary: Vec<f64>,
    pub binary: Vec<f64>,
}

impl ExpectedCounts {
    pub fn zeroed(grammar: &GrammarModel) -> Self {
        Self {
            unary: vec![0.0; grammar.unary_rules().len()],
            binary: vec![0.0; grammar.binary_rules().len()],
        }
    }

    /// Counts for a single sentence under the current probabilities.
    /// Fails like [`InsideOutside::compute`].
    pub fn for_sentence<T: AsRef<str>>(grammar: &GrammarModel, tokens: &[T]) -> Result<Self> {
        let io = InsideOutside::compute(grammar, tokens)?;
        Ok(Self::from_tables(&io))
    }

    pub fn from_tables(io: &InsideOutside) -> Self {
        let grammar = io.grammar();
        let n = io.len();
        let mut counts = Self::zeroed(grammar);

        for i in 0..n {
            if let Some(terminal) = io.terminal(i) {
                for &rule in grammar.unary_rules_for(terminal) {
                    let lhs = grammar.unary_rules()[rule as usize].lhs;
                    counts.unary[rule as usize] += io.unary_usage(lhs, i);
                }
            }
        }

        for span in 2..=n {
            for start in 0..=(n - span) {
                let end = start + span;
                for split in (start + 1)..end {
                    for (r, count) in counts.binary.iter_mut().enumerate() {
                        *count += io.binary_usage(r as u32, start, split, end);
                    }
                }
            }
        }

        let z = io.z();
        counts
            .unary
            .iter_mut()
            .chain(counts.binary.iter_mut())
            .for_each(|c| *c /= z);

        counts
    }

    pub fn merge(&mut self, other: &ExpectedCounts) {
        debug_assert_eq!(self.unary.len(), other.unary.len());
        debug_assert_eq!(self.binary.len(), other.binary.len());

        for (a, b) in self.unary.iter_mut().zip(&other.unary) {
            *a += b;
        }
        for (a, b) in self.binary.iter_mut().zip(&other.binary) {
            *a += b;
        }
    }
}

impl Index<RuleId> for ExpectedCounts {
    type Output = f64;

    fn index(&self, rule: RuleId) -> &Self::Output {
        match rule {
            RuleId::Unary(i) => &self.unary[i as usize],
            RuleId::Binary(i) => &self.binary[i as usize],
        }
    }
}

impl AddAssign<&ExpectedCounts> for ExpectedCounts {
    fn add_assign(&mut self, other: &ExpectedCounts) {
        self.merge(other);
    }
}
