use rayon::prelude::*;
use tracing::debug;

use super::scoring::{NoScoring, SpanContext, SpanScorer};
use super::weight::{LogProbability, Probability, Weight};
use crate::grammar::chart::Chart;
use crate::grammar::rule::Symbol;
use crate::grammar::{GrammarModel, NonterminalId};
use crate::sentence::Sentence;
use crate::tree::{NodeType, Tree};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backpointer {
    /// Index of the unary rule that produced the word.
    Lexical { rule: u32 },
    /// Split point and index of the binary rule.
    Binary { split: usize, rule: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell<W> {
    pub weight: W,
    pub backpointer: Option<Backpointer>,
    /// Whether the best derivation contains a flagged non-terminal.
    pub flagged: bool,
}

impl<W: Weight> Cell<W> {
    fn empty() -> Self {
        Cell {
            weight: W::zero(),
            backpointer: None,
            flagged: false,
        }
    }
}

/// Most probable derivations with the CYK recurrence.
///
/// Among candidates of equal weight the one with the smallest split point
/// wins, then the one with the lowest binary rule index.
pub struct ViterbiParser<'g, S = NoScoring> {
    grammar: &'g GrammarModel,
    scorer: S,
}

impl<'g> ViterbiParser<'g> {
    pub fn new(grammar: &'g GrammarModel) -> Self {
        Self {
            grammar,
            scorer: NoScoring,
        }
    }
}

impl<'g, S> ViterbiParser<'g, S>
where
    S: SpanScorer,
{
    pub fn with_scorer(grammar: &'g GrammarModel, scorer: S) -> Self {
        Self { grammar, scorer }
    }

    pub fn parse<W: Weight, T: AsRef<str>>(&self, tokens: &[T]) -> ViterbiParse<'g, W> {
        let grammar = self.grammar;
        let probabilities = grammar.probabilities();
        let n = tokens.len();
        let mut chart = Chart::new(n, grammar.num_nonterminals(), Cell::empty());

        for (i, terminal) in grammar.intify_sentence(tokens).into_iter().enumerate() {
            let terminal = match terminal {
                Some(t) => t,
                None => continue,
            };

            for &rule in grammar.unary_rules_for(terminal) {
                let lhs = grammar.unary_rules()[rule as usize].lhs;
                let weight = W::from_probability(probabilities.unary[rule as usize]);
                let cell = chart.get_mut(i, i + 1, lhs.index());
                if weight > cell.weight {
                    *cell = Cell {
                        weight,
                        backpointer: Some(Backpointer::Lexical { rule }),
                        flagged: grammar.is_flagged(lhs),
                    };
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
                        let left = *chart.get(start, split, rule.left.index());
                        if left.weight.is_zero() {
                            continue;
                        }
                        let right = *chart.get(split, end, rule.right.index());
                        if right.weight.is_zero() {
                            continue;
                        }

                        let lhs_flagged = grammar.is_flagged(rule.lhs);
                        let multiplier = self.scorer.multiplier(&SpanContext {
                            lhs: rule.lhs,
                            lhs_flagged,
                            start,
                            split,
                            end,
                            left_flagged: left.flagged,
                            right_flagged: right.flagged,
                        });
                        let candidate = left.weight
                            * W::from_probability(q)
                            * right.weight
                            * W::from_probability(multiplier);

                        let cell = chart.get_mut(start, end, rule.lhs.index());
                        if candidate > cell.weight {
                            *cell = Cell {
                                weight: candidate,
                                backpointer: Some(Backpointer::Binary {
                                    split,
                                    rule: r as u32,
                                }),
                                flagged: lhs_flagged || left.flagged || right.flagged,
                            };
                        }
                    }
                }
            }
        }

        let parse = ViterbiParse {
            grammar,
            words: tokens.iter().map(|t| Symbol::from(t.as_ref())).collect(),
            chart,
        };
        debug!(words = n, weight = ?parse.weight(), "viterbi parse");
        parse
    }

    /// Probability of the best derivation, 0 if there is none.
    pub fn probability<T: AsRef<str>>(&self, tokens: &[T]) -> f64 {
        self.parse::<Probability, _>(tokens).probability()
    }

    /// Natural logarithm of the best derivation's probability,
    /// negative infinity if there is none.
    pub fn log_probability<T: AsRef<str>>(&self, tokens: &[T]) -> f64 {
        self.parse::<LogProbability, _>(tokens).weight().value()
    }
}

impl<'g, S> ViterbiParser<'g, S>
where
    S: SpanScorer + Sync,
{
    /// Parses every sentence independently, in parallel.
    pub fn parse_all<W>(&self, sentences: &[Sentence]) -> Vec<ViterbiParse<'g, W>>
    where
        W: Weight + Send,
    {
        sentences.par_iter().map(|s| self.parse(&s.0)).collect()
    }
}

/// The filled parse table of one sentence.
#[derive(Debug, Clone)]
pub struct ViterbiParse<'g, W> {
    grammar: &'g GrammarModel,
    words: Vec<Symbol>,
    chart: Chart<Cell<W>>,
}

impl<'g, W: Weight> ViterbiParse<'g, W> {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn chart(&self) -> &Chart<Cell<W>> {
        &self.chart
    }

    pub fn cell(&self, start: usize, end: usize, nt: NonterminalId) -> &Cell<W> {
        self.chart.get(start, end, nt.index())
    }

    /// Weight of the best derivation of the whole sentence from the start symbol.
    pub fn weight(&self) -> W {
        if self.is_empty() {
            W::zero()
        } else {
            self.cell(0, self.len(), self.grammar.start()).weight
        }
    }

    pub fn probability(&self) -> f64 {
        self.weight().probability()
    }

    pub fn is_parsable(&self) -> bool {
        !self.weight().is_zero()
    }

    pub fn tree(&self) -> Option<Tree<NodeType<Symbol, Symbol>>> {
        if self.is_parsable() {
            Some(self.subtree(0, self.len(), self.grammar.start()))
        } else {
            None
        }
    }

    fn subtree(&self, start: usize, end: usize, nt: NonterminalId) -> Tree<NodeType<Symbol, Symbol>> {
        let root = NodeType::NonTerminal(self.grammar.nonterminal_name(nt).clone());

        match self.cell(start, end, nt).backpointer {
            Some(Backpointer::Lexical { .. }) => Tree {
                root,
                children: vec![Tree::leaf(NodeType::Terminal(self.words[start].clone()))],
            },
            Some(Backpointer::Binary { split, rule }) => {
                let rule = self.grammar.binary_rules()[rule as usize];
                Tree {
                    root,
                    children: vec![
                        self.subtree(start, split, rule.left),
                        self.subtree(split, end, rule.right),
                    ],
                }
            }
            None => Tree::leaf(root),
        }
    }
}
