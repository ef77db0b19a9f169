//! The PEG parser behind line splitting and expression lexing.

use pest::error::Error as PestError;
use pest::error::InputLocation;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "syn/grammar.pest"]
pub(in crate::syn) struct PegParser;

/// Returns the byte offset a pest error points at.
pub(in crate::syn) fn error_offset(err: &PestError<Rule>) -> usize {
  match err.location {
    InputLocation::Pos(pos) => pos,
    InputLocation::Span((pos, _)) => pos,
  }
}
