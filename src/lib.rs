//! Probabilistic context-free grammars in Chomsky normal form: recognition,
//! Viterbi and Earley parsing, inside-outside estimation and sampling.

pub mod error;
pub mod generate;
pub mod grammar;
pub mod parser;
pub mod sentence;
pub mod training;
pub mod tree;

pub use error::{Error, Result};
pub use grammar::GrammarModel;
pub use sentence::Sentence;
