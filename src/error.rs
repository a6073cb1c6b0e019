use thiserror::Error;

/// Errors raised while building, training or sampling from a grammar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("malformed rule for {lhs}: expected one or two right-hand symbols, found {found}")]
    MalformedRule { lhs: String, found: usize },
    #[error("could not parse {0:?}")]
    RuleSyntax(String),
    #[error("rule {0} is not part of the grammar")]
    UnknownRule(String),
    #[error("unknown nonterminal {0}")]
    UnknownNonterminal(String),
    #[error("probability {probability} of rule {rule} is not in [0, 1]")]
    InvalidProbability { rule: String, probability: f64 },
    #[error("sentence is not parsable under the current grammar")]
    UnparsableSentence,
    #[error("sentence is empty")]
    EmptyInput,
    #[error("probabilities of {lhs} sum to {total}")]
    NotNormalised { lhs: String, total: f64 },
    #[error("{0} has no rule with nonzero probability")]
    NoExpansion(String),
    #[error("derivation exceeded the maximum depth of {0}")]
    DepthExceeded(usize),
}

pub type Result<T> = std::result::Result<T, Error>;
