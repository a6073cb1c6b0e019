//! Top-down sampling of sentences from a grammar.

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use tracing::debug;

use crate::error::{Error, Result};
use crate::grammar::rule::Symbol;
use crate::grammar::{GrammarModel, NonterminalId, RuleId};
use crate::sentence::Sentence;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Sampling {
    /// Draws a rule in proportion to its probability.
    #[default]
    Direct,
    /// Every rule gets ⌊p × resolution⌋ slots in a pool and a slot is drawn
    /// uniformly. Rules with p < 1 / resolution are never chosen.
    Pool { resolution: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeneratorConfig {
    pub sampling: Sampling,
    /// Derivations deeper than this fail with [`Error::DepthExceeded`].
    pub max_depth: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            sampling: Sampling::Direct,
            max_depth: 100,
        }
    }
}

pub struct Generator<'g, R> {
    grammar: &'g GrammarModel,
    config: GeneratorConfig,
    rng: R,
}

impl<'g, R: Rng> Generator<'g, R> {
    pub fn new(grammar: &'g GrammarModel, config: GeneratorConfig, rng: R) -> Self {
        Self {
            grammar,
            config,
            rng,
        }
    }

    /// Samples a sentence from the start symbol.
    pub fn generate(&mut self) -> Result<Sentence> {
        self.generate_from(self.grammar.start())
    }

    pub fn generate_from(&mut self, nt: NonterminalId) -> Result<Sentence> {
        let mut words = vec![];
        self.expand(nt, 0, &mut words)?;
        debug!(words = words.len(), "generated sentence");
        Ok(Sentence(words))
    }

    fn expand(&mut self, nt: NonterminalId, depth: usize, words: &mut Vec<Symbol>) -> Result<()> {
        if depth > self.config.max_depth {
            return Err(Error::DepthExceeded(self.config.max_depth));
        }

        match self.choose(nt)? {
            RuleId::Unary(i) => {
                let rule = self.grammar.unary_rules()[i as usize];
                words.push(self.grammar.terminal_name(rule.terminal).clone());
            }
            RuleId::Binary(i) => {
                let rule = self.grammar.binary_rules()[i as usize];
                self.expand(rule.left, depth + 1, words)?;
                self.expand(rule.right, depth + 1, words)?;
            }
        }

        Ok(())
    }

    fn choose(&mut self, nt: NonterminalId) -> Result<RuleId> {
        let grammar = self.grammar;
        let no_expansion = || Error::NoExpansion(grammar.nonterminal_name(nt).to_string());

        let candidates: Vec<_> = grammar
            .rules_of(nt)
            .iter()
            .map(|&r| (r, grammar.probability(r)))
            .filter(|&(_, p)| p > 0.0)
            .collect();

        match self.config.sampling {
            Sampling::Direct => {
                let dist = WeightedIndex::<f64>::new(candidates.iter().map(|&(_, p)| p))
                    .map_err(|_| no_expansion())?;
                Ok(candidates[dist.sample(&mut self.rng)].0)
            }
            Sampling::Pool { resolution } => {
                let pool: Vec<_> = candidates
                    .iter()
                    .flat_map(|&(r, p)| {
                        std::iter::repeat(r).take((p * f64::from(resolution)) as usize)
                    })
                    .collect();
                if pool.is_empty() {
                    return Err(no_expansion());
                }
                Ok(pool[self.rng.gen_range(0..pool.len())])
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use fxhash::FxHashSet;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const RECURSIVE: &str = "
        S -> S S 0.3
        S -> D S 0.2
        S -> s 0.5
        D -> d 1
    ";

    fn seeded(grammar: &GrammarModel, config: GeneratorConfig, seed: u64) -> Generator<'_, StdRng> {
        Generator::new(grammar, config, StdRng::seed_from_u64(seed))
    }

    #[test]
    fn only_terminals_of_unary_rules() {
        let grammar = GrammarModel::parse_weighted("S", RECURSIVE).unwrap();
        let terminals: FxHashSet<_> = grammar
            .unary_rules()
            .iter()
            .map(|r| grammar.terminal_name(r.terminal).clone())
            .collect();

        for sampling in [Sampling::Direct, Sampling::Pool { resolution: 1000 }] {
            let mut generator = seeded(
                &grammar,
                GeneratorConfig {
                    sampling,
                    max_depth: 1000,
                },
                42,
            );
            for _ in 0..50 {
                let sentence = generator.generate().unwrap();
                assert!(!sentence.is_empty());
                assert!(sentence.iter().all(|w| terminals.contains(w)));
            }
        }
    }

    #[test]
    fn seeded_generation_is_reproducible() {
        let grammar = GrammarModel::parse_weighted("S", RECURSIVE).unwrap();
        let config = GeneratorConfig {
            max_depth: 1000,
            ..Default::default()
        };

        let sample = |seed| {
            let mut generator = seeded(&grammar, config, seed);
            (0..10)
                .map(|_| generator.generate().unwrap())
                .collect::<Vec<_>>()
        };

        assert_eq!(sample(7), sample(7));
    }

    #[test]
    fn deterministic_grammar() {
        let grammar =
            GrammarModel::parse_weighted("S", "S -> A B 1\nA -> a 1\nB -> b 1\nB -> c 0").unwrap();

        for sampling in [Sampling::Direct, Sampling::Pool { resolution: 1000 }] {
            let mut generator = seeded(
                &grammar,
                GeneratorConfig {
                    sampling,
                    ..Default::default()
                },
                1,
            );
            assert_eq!(generator.generate().unwrap(), Sentence::new(["a", "b"]));
        }
    }

    #[test]
    fn pool_drops_rare_rules() {
        let grammar = GrammarModel::parse_weighted("S", "S -> a 0.0004\nS -> b 0.9996").unwrap();
        let mut generator = seeded(
            &grammar,
            GeneratorConfig {
                sampling: Sampling::Pool { resolution: 1000 },
                ..Default::default()
            },
            5,
        );

        for _ in 0..200 {
            assert_eq!(generator.generate().unwrap(), Sentence::new(["b"]));
        }
    }

    #[test]
    fn no_expansion() {
        let grammar = GrammarModel::parse_weighted("S", "S -> A B 1\nA -> a 1\nB -> b 0").unwrap();
        let mut generator = seeded(&grammar, GeneratorConfig::default(), 0);
        assert_eq!(
            generator.generate().unwrap_err(),
            Error::NoExpansion("B".to_string())
        );

        let grammar = GrammarModel::parse_weighted("S", "S -> a 0.0004").unwrap();
        let mut generator = seeded(
            &grammar,
            GeneratorConfig {
                sampling: Sampling::Pool { resolution: 1000 },
                ..Default::default()
            },
            0,
        );
        assert_eq!(
            generator.generate().unwrap_err(),
            Error::NoExpansion("S".to_string())
        );
    }

    #[test]
    fn depth_is_bounded() {
        let grammar = GrammarModel::parse_weighted("S", "S -> S S 1\nS -> s 0").unwrap();
        let mut generator = seeded(
            &grammar,
            GeneratorConfig {
                max_depth: 20,
                ..Default::default()
            },
            0,
        );
        assert_eq!(generator.generate().unwrap_err(), Error::DepthExceeded(20));
    }
}
