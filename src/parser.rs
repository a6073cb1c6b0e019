pub mod earley;
pub mod scoring;
pub mod viterbi;
pub mod weight;

use crate::grammar::chart::Chart;
use crate::grammar::GrammarModel;

/// CYK membership test. Rule probabilities are ignored, only the presence
/// of rules matters.
pub fn recognise<T: AsRef<str>>(grammar: &GrammarModel, tokens: &[T]) -> bool {
    let n = tokens.len();
    if n == 0 {
        return false;
    }

    let mut chart = Chart::new(n, grammar.num_nonterminals(), false);

    for (i, terminal) in grammar.intify_sentence(tokens).into_iter().enumerate() {
        if let Some(terminal) = terminal {
            for &rule in grammar.unary_rules_for(terminal) {
                let lhs = grammar.unary_rules()[rule as usize].lhs;
                *chart.get_mut(i, i + 1, lhs.index()) = true;
            }
        }
    }

    for span in 2..=n {
        for start in 0..=(n - span) {
            let end = start + span;
            for split in (start + 1)..end {
                for rule in grammar.binary_rules() {
                    if *chart.get(start, split, rule.left.index())
                        && *chart.get(split, end, rule.right.index())
                    {
                        *chart.get_mut(start, end, rule.lhs.index()) = true;
                    }
                }
            }
        }
    }

    *chart.get(0, n, grammar.start().index())
}
