//! Context-dependent scoring hooks for the Viterbi parser.
//!
//! A [`SpanScorer`] returns a factor that is multiplied into every binary
//! candidate on top of the rule probability. [`BracketScorer`] implements
//! soft bracketing: sentences may carry bracket markers between words, and
//! derivations of flagged non-terminals are penalised for every bracket they
//! leave unbalanced.

use crate::grammar::chart::Chart;
use crate::grammar::rule::Symbol;
use crate::grammar::NonterminalId;
use crate::sentence::Sentence;

/// Everything a scorer may inspect about a binary candidate `lhs -> left right`
/// where `left` spans `[start, split)` and `right` spans `[split, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpanContext {
    pub lhs: NonterminalId,
    pub lhs_flagged: bool,
    pub start: usize,
    pub split: usize,
    pub end: usize,
    /// Whether the best derivation of the left child contains a flagged non-terminal.
    pub left_flagged: bool,
    pub right_flagged: bool,
}

pub trait SpanScorer {
    fn multiplier(&self, context: &SpanContext) -> f64;
}

/// Plain rule probabilities.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoScoring;

impl SpanScorer for NoScoring {
    fn multiplier(&self, _context: &SpanContext) -> f64 {
        1.0
    }
}

impl<F> SpanScorer for F
where
    F: Fn(&SpanContext) -> f64,
{
    fn multiplier(&self, context: &SpanContext) -> f64 {
        self(context)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BracketMarkers {
    pub open: Symbol,
    pub close: Symbol,
}

impl Default for BracketMarkers {
    fn default() -> Self {
        Self {
            open: Symbol::from("["),
            close: Symbol::from("]"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BracketRatios {
    /// Raised to the number of unmatched closing markers inside a flagged span.
    pub mismatch: f64,
    /// Applied when a flagged derivation starts at this span.
    pub start: f64,
    /// Applied when a child already lies in a flagged derivation.
    pub accelerate: f64,
}

impl Default for BracketRatios {
    fn default() -> Self {
        Self {
            mismatch: 1.0,
            start: 1.0,
            accelerate: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Marker {
    Open,
    Close,
}

/// Number of closing bracket markers strictly inside every word span that
/// have no matching opening marker inside the same span.
#[derive(Debug, Clone)]
pub struct MismatchTable {
    counts: Chart<u32>,
}

impl MismatchTable {
    /// Removes the bracket markers from `tokens`. Returns the remaining words
    /// and the mismatch counts over spans of those words.
    pub fn split<T: AsRef<str>>(tokens: &[T], markers: &BracketMarkers) -> (Sentence, Self) {
        let mut words = vec![];
        // gaps[g] holds the markers found before word g.
        let mut gaps: Vec<Vec<Marker>> = vec![vec![]];

        for token in tokens {
            let token = token.as_ref();
            if token == markers.open.as_str() {
                gaps[words.len()].push(Marker::Open);
            } else if token == markers.close.as_str() {
                gaps[words.len()].push(Marker::Close);
            } else {
                words.push(Symbol::from(token));
                gaps.push(vec![]);
            }
        }

        let n = words.len();
        let mut counts = Chart::new(n, 1, 0);

        for i in 0..n {
            let mut open = 0;
            let mut unmatched_close = 0;

            // Extending [i, j) to [i, j + 1) moves gap j inside the span.
            for j in (i + 1)..n {
                for marker in &gaps[j] {
                    match marker {
                        Marker::Open => open += 1,
                        Marker::Close if open > 0 => open -= 1,
                        Marker::Close => unmatched_close += 1,
                    }
                }
                *counts.get_mut(i, j + 1, 0) = unmatched_close;
            }
        }

        (Sentence(words), Self { counts })
    }

    pub fn len(&self) -> usize {
        self.counts.sentence_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mismatches(&self, start: usize, end: usize) -> u32 {
        *self.counts.get(start, end, 0)
    }
}

/// Soft bracketing over flagged non-terminals.
#[derive(Debug, Clone)]
pub struct BracketScorer {
    table: MismatchTable,
    ratios: BracketRatios,
}

impl BracketScorer {
    pub fn new(table: MismatchTable, ratios: BracketRatios) -> Self {
        Self { table, ratios }
    }

    pub fn table(&self) -> &MismatchTable {
        &self.table
    }
}

impl SpanScorer for BracketScorer {
    fn multiplier(&self, context: &SpanContext) -> f64 {
        if !context.lhs_flagged {
            return 1.0;
        }

        let mismatches = self.table.mismatches(context.start, context.end);
        let continuation = if context.left_flagged || context.right_flagged {
            self.ratios.accelerate
        } else {
            self.ratios.start
        };

        self.ratios.mismatch.powi(mismatches as i32) * continuation
    }
}
