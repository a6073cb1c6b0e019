use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use nom::bytes::complete::is_not;
use nom::character::complete::multispace1;
use nom::combinator::all_consuming;
use nom::multi::separated_list0;
use nom::{Finish, IResult};

use crate::error::Error;
use crate::grammar::rule::Symbol;

/// A whitespace-tokenized sentence.
#[derive(PartialEq, Eq, Debug, Clone, Default)]
pub struct Sentence(pub Vec<Symbol>);

impl Sentence {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Sentence(tokens.into_iter().map(|t| Symbol::from(t.as_ref())).collect())
    }
}

impl Deref for Sentence {
    type Target = [Symbol];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl FromStr for Sentence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match all_consuming(parse_sentence)(s.trim()).finish() {
            Ok((_, sentence)) => Ok(sentence),
            Err(e) => Err(Error::RuleSyntax(e.input.to_string())),
        }
    }
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, word) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", word)?;
        }
        Ok(())
    }
}

fn parse_sentence(input: &str) -> IResult<&str, Sentence> {
    separated_list0(multispace1, is_not(" \t\r\n"))(input)
        .map(|(i, o)| (i, Sentence(o.into_iter().map(Symbol::from).collect())))
}
