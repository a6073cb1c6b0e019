use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use nom::bytes::complete::{is_not, tag};
use nom::character::complete::multispace1;
use nom::combinator::all_consuming;
use nom::multi::{many_till, separated_list1};
use nom::number::complete::double;
use nom::sequence::{delimited, separated_pair, terminated};
use nom::{Finish, IResult};
use smallstr::SmallString;

use crate::error::Error;

/// Grammar symbols as they appear in rule definitions and sentences.
pub type Symbol = SmallString<[u8; 8]>;

#[derive(Eq, PartialEq, Hash, Clone, Debug)]
pub enum Rule<N, T>
where
    N: Eq + Hash,
    T: Eq + Hash,
{
    Lexical { lhs: N, rhs: T },
    NonLexical { lhs: N, rhs: Vec<N> },
}

impl<N, T> Rule<N, T>
where
    N: Eq + Hash,
    T: Eq + Hash,
{
    pub fn lhs(&self) -> &N {
        match self {
            Rule::Lexical { lhs, .. } => lhs,
            Rule::NonLexical { lhs, .. } => lhs,
        }
    }
}

#[derive(PartialEq, Clone, Debug)]
pub struct WeightedRule<N: Eq + Hash, T: Eq + Hash, W> {
    pub rule: Rule<N, T>,
    pub weight: W,
}

impl<N, T> fmt::Display for Rule<N, T>
where
    N: Eq + Hash + fmt::Display,
    T: Eq + Hash + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Lexical { lhs, rhs } => write!(f, "{} -> {}", lhs, rhs),
            Rule::NonLexical { lhs, rhs } => {
                write!(f, "{} ->", lhs)?;
                for n in rhs {
                    write!(f, " {}", n)?;
                }
                Ok(())
            }
        }
    }
}

impl<N, T, W> fmt::Display for WeightedRule<N, T, W>
where
    N: Eq + Hash + fmt::Display,
    T: Eq + Hash + fmt::Display,
    W: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.rule, self.weight)
    }
}

type ParsedRule = Rule<Symbol, Symbol>;
type ParsedWeightedRule = WeightedRule<Symbol, Symbol, f64>;

impl FromStr for ParsedRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_rule)(s.trim()).finish() {
            Ok((_, (lhs, rhs))) => Ok(build_rule(lhs, rhs)),
            Err(e) => Err(Error::RuleSyntax(e.input.to_string())),
        }
    }
}

impl FromStr for ParsedWeightedRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_weighted_rule)(s.trim()).finish() {
            // A weight alone is not a right-hand side.
            Ok((_, (_, (rhs, _)))) if rhs.is_empty() => Err(Error::RuleSyntax(s.to_string())),
            Ok((_, (lhs, (rhs, weight)))) => Ok(WeightedRule {
                rule: build_rule(lhs, rhs),
                weight,
            }),
            Err(e) => Err(Error::RuleSyntax(e.input.to_string())),
        }
    }
}

fn build_rule(lhs: &str, rhs: Vec<&str>) -> ParsedRule {
    match rhs.as_slice() {
        [t] => Rule::Lexical {
            lhs: Symbol::from(lhs),
            rhs: Symbol::from(*t),
        },
        _ => Rule::NonLexical {
            lhs: Symbol::from(lhs),
            rhs: rhs.into_iter().map(Symbol::from).collect(),
        },
    }
}

fn arrow(input: &str) -> IResult<&str, &str> {
    delimited(multispace1, tag("->"), multispace1)(input)
}

fn parse_rule(input: &str) -> IResult<&str, (&str, Vec<&str>)> {
    separated_pair(
        is_not(" \t"),
        arrow,
        separated_list1(multispace1, is_not(" \t")),
    )(input)
}

fn parse_weighted_rule(input: &str) -> IResult<&str, (&str, (Vec<&str>, f64))> {
    separated_pair(
        is_not(" \t"),
        arrow,
        many_till(
            terminated(is_not(" \t"), multispace1),
            all_consuming(double),
        ),
    )(input)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rule_correct() {
        // basic lexical
        let parsed = Rule::from_str("D -> the").unwrap();
        let rule = Rule::Lexical {
            lhs: Symbol::from("D"),
            rhs: Symbol::from("the"),
        };
        assert_eq!(rule, parsed);

        // basic non-lexical, surrounding whitespace is ignored
        let parsed = Rule::from_str("  S -> NP\tVP ").unwrap();
        let rule = Rule::NonLexical {
            lhs: Symbol::from("S"),
            rhs: vec![Symbol::from("NP"), Symbol::from("VP")],
        };
        assert_eq!(rule, parsed);

        // longer right-hand sides are accepted here and rejected by the CNF model
        assert!(matches!(
            Rule::from_str("S -> A B C").unwrap(),
            Rule::NonLexical { rhs, .. } if rhs.len() == 3
        ));

        // fails with empty LHS, missing arrow or empty RHS
        assert!(Rule::from_str("-> A B").is_err());
        assert!(Rule::from_str("S EXTRA -> A B").is_err());
        assert!(Rule::from_str("S A B").is_err());
        assert!(Rule::from_str("S ->").is_err());
    }

    #[test]
    fn weighted_rule_correct() {
        let parsed = WeightedRule::from_str("ADJP -> JJ JJ 0.14285714285714285").unwrap();
        let rule = WeightedRule {
            rule: Rule::NonLexical {
                lhs: Symbol::from("ADJP"),
                rhs: vec![Symbol::from("JJ"), Symbol::from("JJ")],
            },
            weight: 0.14285714285714285,
        };
        assert_eq!(rule, parsed);

        let parsed = WeightedRule::from_str("IN -> before 0.01694915254237288").unwrap();
        let rule = WeightedRule {
            rule: Rule::Lexical {
                lhs: Symbol::from("IN"),
                rhs: Symbol::from("before"),
            },
            weight: 0.01694915254237288,
        };
        assert_eq!(rule, parsed);

        // numeric terminals are fine as long as a weight follows
        let parsed = WeightedRule::from_str("CD -> 61 1").unwrap();
        assert_eq!(parsed.weight, 1.0);
        assert_eq!(parsed.rule.lhs().as_str(), "CD");

        // missing weight or missing RHS
        assert!(WeightedRule::from_str("S -> NP VP").is_err());
        assert!(WeightedRule::from_str("S -> 0.5").is_err());
    }

    #[test]
    fn rule_display() {
        let rule = Rule::from_str("S -> NP VP").unwrap();
        assert_eq!("S -> NP VP", format!("{}", rule));

        let weighted = WeightedRule {
            rule: Rule::from_str("N -> ball").unwrap(),
            weight: 0.5,
        };
        assert_eq!("N -> ball 0.5", format!("{}", weighted));
    }
}
