//! hucasm's source syntax.
//!
//! This module turns raw text into the pieces the assembler works with: lines
//! split into label, op, operand and comment fields, and operand text lexed
//! into expression tokens. Both are driven by a single PEG grammar. The
//! meaning of those pieces is left entirely to [`asm`].
//!
//! [`asm`]: ../asm/index.html

pub mod args;
pub mod comment;
pub mod line;
pub mod src;
pub mod token;

mod parse;
