//! Inside and outside probabilities of a sentence.
//!
//! Both tables live in the same triangular layout as the Viterbi chart, one
//! `f64` per non-terminal and span.

use tracing::debug;

use crate::error::{Error, Result};
use crate::grammar::chart::Chart;
use crate::grammar::{GrammarModel, NonterminalId, TerminalId};

#[derive(Debug, Clone)]
pub struct InsideOutside<'g> {
    grammar: &'g GrammarModel,
    terminals: Vec<Option<TerminalId>>,
    inside: Chart<f64>,
    outside: Chart<f64>,
    z: f64,
}

impl<'g> InsideOutside<'g> {
    /// Fills both tables for `tokens`.
    ///
    /// Fails with [`Error::EmptyInput`] for an empty sentence and with
    /// [`Error::UnparsableSentence`] if the sentence has no derivation of
    /// nonzero probability.
    pub fn compute<T: AsRef<str>>(grammar: &'g GrammarModel, tokens: &[T]) -> Result<Self> {
        let n = tokens.len();
        if n == 0 {
            return Err(Error::EmptyInput);
        }

        let terminals = grammar.intify_sentence(tokens);
        let inside = inside_chart(grammar, &terminals);
        let z = *inside.get(0, n, grammar.start().index());
        if z == 0.0 {
            return Err(Error::UnparsableSentence);
        }
        let outside = outside_chart(grammar, &inside);

        debug!(words = n, z, "inside-outside");

        Ok(Self {
            grammar,
            terminals,
            inside,
            outside,
            z,
        })
    }

    pub fn grammar(&self) -> &'g GrammarModel {
        self.grammar
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// The terminal at position `i`, `None` for unknown words.
    pub fn terminal(&self, i: usize) -> Option<TerminalId> {
        self.terminals[i]
    }

    /// Total probability of the sentence.
    pub fn z(&self) -> f64 {
        self.z
    }

    pub fn inside(&self, start: usize, end: usize, nt: NonterminalId) -> f64 {
        *self.inside.get(start, end, nt.index())
    }

    pub fn outside(&self, start: usize, end: usize, nt: NonterminalId) -> f64 {
        *self.outside.get(start, end, nt.index())
    }

    /// Probability mass of derivations that rewrite position `i` with a unary rule of `nt`.
    pub fn unary_usage(&self, nt: NonterminalId, i: usize) -> f64 {
        self.inside(i, i + 1, nt) * self.outside(i, i + 1, nt)
    }

    /// Probability mass of derivations that use binary rule `rule` over
    /// `[start, end)` with its children split at `split`.
    pub fn binary_usage(&self, rule: u32, start: usize, split: usize, end: usize) -> f64 {
        let r = self.grammar.binary_rules()[rule as usize];
        self.outside(start, end, r.lhs)
            * self.grammar.probabilities().binary[rule as usize]
            * self.inside(start, split, r.left)
            * self.inside(split, end, r.right)
    }

    /// Σ_A inside × outside at `[i, i + 1)`. Equals [`Self::z`] at every position.
    pub fn position_marginal(&self, i: usize) -> f64 {
        self.grammar
            .nonterminals()
            .map(|nt| self.unary_usage(nt, i))
            .sum()
    }
}

fn inside_chart(grammar: &GrammarModel, terminals: &[Option<TerminalId>]) -> Chart<f64> {
    let n = terminals.len();
    let probabilities = grammar.probabilities();
    let mut inside = Chart::new(n, grammar.num_nonterminals(), 0.0);

    for (i, terminal) in terminals.iter().enumerate() {
        if let Some(terminal) = terminal {
            for &rule in grammar.unary_rules_for(*terminal) {
                let lhs = grammar.unary_rules()[rule as usize].lhs;
                *inside.get_mut(i, i + 1, lhs.index()) += probabilities.unary[rule as usize];
            }
        }
    }

    for span in 2..=n {
        for start in 0..=(n - span) {
            let end = start + span;
            for split in (start + 1)..end {
                for (r, rule) in grammar.binary_rules().iter().enumerate() {
                    let q = probabilities.binary[r];
                    if q == 0.0 {
                        continue;
                    }
                    let left = *inside.get(start, split, rule.left.index());
                    let right = *inside.get(split, end, rule.right.index());
                    *inside.get_mut(start, end, rule.lhs.index()) += q * left * right;
                }
            }
        }
    }

    inside
}

/// Spans are visited by decreasing length, so the outside value of a parent
/// is final before it is handed down to its children.
fn outside_chart(grammar: &GrammarModel, inside: &Chart<f64>) -> Chart<f64> {
    let n = inside.sentence_len();
    let probabilities = grammar.probabilities();
    let mut outside = Chart::new(n, grammar.num_nonterminals(), 0.0);
    *outside.get_mut(0, n, grammar.start().index()) = 1.0;

    for span in (2..=n).rev() {
        for start in 0..=(n - span) {
            let end = start + span;
            for (r, rule) in grammar.binary_rules().iter().enumerate() {
                let q = probabilities.binary[r];
                let parent = *outside.get(start, end, rule.lhs.index());
                if q == 0.0 || parent == 0.0 {
                    continue;
                }

                for split in (start + 1)..end {
                    let left = *inside.get(start, split, rule.left.index());
                    let right = *inside.get(split, end, rule.right.index());
                    // right sibling of the left child
                    *outside.get_mut(start, split, rule.left.index()) += parent * q * right;
                    // left sibling of the right child
                    *outside.get_mut(split, end, rule.right.index()) += parent * q * left;
                }
            }
        }
    }

    outside
}
