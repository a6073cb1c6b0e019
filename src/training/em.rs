//! Expectation maximisation over a corpus of unannotated sentences.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{info, warn};

use super::expected_count::ExpectedCounts;
use crate::error::{Error, Result};
use crate::grammar::{GrammarModel, ProbabilityTable};
use crate::sentence::Sentence;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrainingConfig {
    pub iterations: usize,
    /// Seed for the random initial probabilities.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            iterations: 5,
            seed: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IterationReport {
    pub iteration: usize,
    pub parsed: usize,
    /// Empty or unparsable sentences, which contribute no counts.
    pub skipped: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct TrainingReport {
    pub iterations: Vec<IterationReport>,
    pub cancelled: bool,
}

pub struct EmTrainer {
    config: TrainingConfig,
    rng: StdRng,
    cancel: Option<Arc<AtomicBool>>,
}

impl EmTrainer {
    pub fn new(config: TrainingConfig) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(config.seed),
            cancel: None,
        }
    }

    /// Training stops before the next iteration once `flag` is set.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Draws random starting probabilities.
    pub fn initialise(&mut self, grammar: &mut GrammarModel) -> Result<()> {
        grammar.randomise_probabilities(&mut self.rng);
        grammar.check_normalisation()
    }

    /// Runs the configured number of iterations on the current probabilities.
    pub fn train(&self, grammar: &mut GrammarModel, corpus: &[Sentence]) -> Result<TrainingReport> {
        let mut report = TrainingReport::default();

        for iteration in 1..=self.config.iterations {
            if self.is_cancelled() {
                info!(iteration, "training cancelled");
                report.cancelled = true;
                break;
            }
            report.iterations.push(self.iterate(grammar, corpus, iteration)?);
        }

        Ok(report)
    }

    /// One E-step over `corpus` followed by one M-step.
    pub fn iterate(
        &self,
        grammar: &mut GrammarModel,
        corpus: &[Sentence],
        iteration: usize,
    ) -> Result<IterationReport> {
        let (counts, parsed, skipped) = corpus_counts(grammar, corpus)?;

        let table = maximise(grammar, &counts);
        grammar.set_probability_table(table);
        grammar.check_normalisation()?;

        info!(iteration, parsed, skipped, "em iteration");

        Ok(IterationReport {
            iteration,
            parsed,
            skipped,
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Sums the expected counts of every parsable sentence.
///
/// Sentences are processed in parallel, but the sum is taken in corpus
/// order so the result does not depend on scheduling.
pub fn corpus_counts(
    grammar: &GrammarModel,
    corpus: &[Sentence],
) -> Result<(ExpectedCounts, usize, usize)> {
    let per_sentence: Vec<_> = corpus
        .par_iter()
        .map(|sentence| ExpectedCounts::for_sentence(grammar, &sentence.0))
        .collect();

    let mut total = ExpectedCounts::zeroed(grammar);
    let (mut parsed, mut skipped) = (0, 0);

    for (sentence, counts) in corpus.iter().zip(per_sentence) {
        match counts {
            Ok(counts) => {
                total += &counts;
                parsed += 1;
            }
            Err(e @ (Error::UnparsableSentence | Error::EmptyInput)) => {
                warn!(%sentence, "skipping sentence: {}", e);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((total, parsed, skipped))
}

/// Relative frequencies of the counts among the rules of each non-terminal.
/// A non-terminal without any counts gets probability 0 for all its rules.
pub fn maximise(grammar: &GrammarModel, counts: &ExpectedCounts) -> ProbabilityTable {
    let mut table =
        ProbabilityTable::zeroed(grammar.unary_rules().len(), grammar.binary_rules().len());

    for nt in grammar.nonterminals() {
        let rules = grammar.rules_of(nt);
        let total: f64 = rules.iter().map(|&r| counts[r]).sum();
        if total == 0.0 {
            continue;
        }
        for &rule in rules {
            table[rule] = counts[rule] / total;
        }
    }

    table
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::grammar::rule::{Rule, Symbol};
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn corpus(lines: &[&str]) -> Vec<Sentence> {
        lines.iter().map(|l| Sentence::from_str(l).unwrap()).collect()
    }

    fn probability_of(grammar: &GrammarModel, rule: &str) -> f64 {
        let id = grammar
            .rule_id(&Rule::<Symbol, Symbol>::from_str(rule).unwrap())
            .unwrap();
        grammar.probability(id)
    }

    #[test]
    fn initialisation_is_normalised_and_seeded() {
        let rules = "S -> A B\nS -> B A\nS -> s\nA -> a\nA -> A A\nB -> b";
        let mut first = GrammarModel::parse("S", rules).unwrap();
        let mut second = GrammarModel::parse("S", rules).unwrap();

        EmTrainer::new(TrainingConfig { iterations: 1, seed: 7 })
            .initialise(&mut first)
            .unwrap();
        EmTrainer::new(TrainingConfig { iterations: 1, seed: 7 })
            .initialise(&mut second)
            .unwrap();

        assert_eq!(first.probabilities(), second.probabilities());
        assert!(first.check_normalisation().is_ok());
        assert_eq!(probability_of(&first, "B -> b"), 1.0);
    }

    #[test]
    fn unused_rules_drop_to_zero() {
        let mut grammar = GrammarModel::parse("S", "S -> A B\nS -> B A\nA -> a\nB -> b\nA -> b").unwrap();
        let mut trainer = EmTrainer::new(TrainingConfig { iterations: 1, seed: 3 });
        trainer.initialise(&mut grammar).unwrap();

        let report = trainer.train(&mut grammar, &corpus(&["a b"])).unwrap();

        assert_eq!(report.iterations.len(), 1);
        assert!(!report.cancelled);
        assert_eq!(probability_of(&grammar, "S -> B A"), 0.0);
        assert_eq!(probability_of(&grammar, "A -> b"), 0.0);
        assert_relative_eq!(probability_of(&grammar, "S -> A B"), 1.0);
        assert_relative_eq!(probability_of(&grammar, "A -> a"), 1.0);
        assert!(grammar.check_normalisation().is_ok());
    }

    #[test]
    fn fixed_point_of_a_single_sentence() {
        let mut grammar = GrammarModel::parse_weighted("S", "S -> S S 0.4\nS -> s 0.6").unwrap();
        let trainer = EmTrainer::new(TrainingConfig::default());

        // two binary and three unary uses in either tree
        trainer.iterate(&mut grammar, &corpus(&["s s s"]), 1).unwrap();
        assert_relative_eq!(probability_of(&grammar, "S -> S S"), 0.4, max_relative = 1e-12);
        assert_relative_eq!(probability_of(&grammar, "S -> s"), 0.6, max_relative = 1e-12);
    }

    #[test]
    fn unparsable_sentences_are_skipped() {
        let mut grammar = GrammarModel::parse_weighted(
            "S",
            "S -> A B 0.5\nS -> B A 0.5\nA -> a 1\nB -> b 1",
        )
        .unwrap();
        let trainer = EmTrainer::new(TrainingConfig::default());

        let report = trainer
            .iterate(&mut grammar, &corpus(&["a b", "b b", "", "c"]), 1)
            .unwrap();

        assert_eq!(
            report,
            IterationReport {
                iteration: 1,
                parsed: 1,
                skipped: 3
            }
        );
        assert_eq!(probability_of(&grammar, "S -> B A"), 0.0);
    }

    #[test]
    fn nonterminals_without_counts_are_zeroed() {
        let mut grammar = GrammarModel::parse_weighted(
            "S",
            "S -> A A 0.5\nS -> B B 0.5\nA -> a 1\nB -> b 1",
        )
        .unwrap();

        EmTrainer::new(TrainingConfig::default())
            .train(&mut grammar, &corpus(&["a a"]))
            .unwrap();

        assert_eq!(probability_of(&grammar, "B -> b"), 0.0);
        assert_eq!(probability_of(&grammar, "S -> B B"), 0.0);
        assert!(grammar.check_normalisation().is_ok());
    }

    #[test]
    fn parallel_counts_match_sequential_sum() {
        let grammar = GrammarModel::parse_weighted("S", "S -> S S 0.3\nS -> s 0.7").unwrap();
        let sentences = corpus(&["s", "s s s", "s s", "s s s s", "t"]);

        let (parallel, parsed, skipped) = corpus_counts(&grammar, &sentences).unwrap();

        let mut sequential = ExpectedCounts::zeroed(&grammar);
        for sentence in &sentences[..4] {
            sequential += &ExpectedCounts::for_sentence(&grammar, &sentence.0).unwrap();
        }

        assert_eq!(parallel, sequential);
        assert_eq!((parsed, skipped), (4, 1));
    }

    #[test]
    fn cancelled_before_first_iteration() {
        let mut grammar = GrammarModel::parse_weighted("S", "S -> S S 0.4\nS -> s 0.6").unwrap();
        let before = grammar.probabilities().clone();
        let flag = Arc::new(AtomicBool::new(true));

        let report = EmTrainer::new(TrainingConfig::default())
            .with_cancel_flag(flag)
            .train(&mut grammar, &corpus(&["s s"]))
            .unwrap();

        assert!(report.cancelled);
        assert!(report.iterations.is_empty());
        assert_eq!(grammar.probabilities(), &before);
    }
}
