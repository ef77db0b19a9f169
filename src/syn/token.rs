//! Lexing operand text into expression tokens.

use std::fmt;

use pest::Parser as _;

use crate::syn::parse::error_offset;
use crate::syn::parse::PegParser;
use crate::syn::parse::Rule;

/// A single token of an operand expression.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Token<'a> {
  /// An integer literal: decimal, `$hex`, `0xhex`, `0bbin` or `'c'`.
  Int(i32),
  /// A `%`-prefixed run of digits.
  ///
  /// This is a binary literal where a value is expected, and a modulo
  /// followed by a decimal literal otherwise; the evaluator decides.
  Percent(&'a str),
  /// A string literal, without its quotes and with escapes unprocessed.
  Str(&'a str),
  /// A symbol or function name.
  Ident(&'a str),
  /// A multi-label reference such as `loop!+` or `!--`.
  MultiRef {
    /// The label name, without the `!`; empty for anonymous labels.
    name: &'a str,
    /// Positive for forward references, negative for backward ones.
    steps: i32,
  },
  /// An operator, such as `<<` or `!=`.
  Op(&'a str),
  /// `(`.
  LParen,
  /// `)`.
  RParen,
  /// `[`.
  LBracket,
  /// `]`.
  RBracket,
  /// `,`.
  Comma,
  /// `:`.
  Colon,
  /// `#`.
  Hash,
}

impl fmt::Display for Token<'_> {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      Token::Int(v) => write!(f, "{}", v),
      Token::Percent(s) => write!(f, "%{}", s),
      Token::Str(s) => write!(f, "\"{}\"", s),
      Token::Ident(s) | Token::Op(s) => write!(f, "{}", s),
      Token::MultiRef { name, steps } => {
        let c = if *steps > 0 { '+' } else { '-' };
        write!(f, "{}!", name)?;
        for _ in 0..steps.abs() {
          write!(f, "{}", c)?;
        }
        Ok(())
      }
      Token::LParen => write!(f, "("),
      Token::RParen => write!(f, ")"),
      Token::LBracket => write!(f, "["),
      Token::RBracket => write!(f, "]"),
      Token::Comma => write!(f, ","),
      Token::Colon => write!(f, ":"),
      Token::Hash => write!(f, "#"),
    }
  }
}

/// An error produced while lexing.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum LexError {
  /// A character that starts no token, at the given byte offset.
  Unexpected(usize),
  /// An integer literal that does not fit in 32 bits.
  Overflow,
  /// A malformed character literal.
  BadChar,
}

impl fmt::Display for LexError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      LexError::Unexpected(offset) => {
        write!(f, "unexpected character at column {}", offset + 1)
      }
      LexError::Overflow => write!(f, "integer literal too large"),
      LexError::BadChar => write!(f, "malformed character literal"),
    }
  }
}

/// Lexes `text` into a sequence of tokens.
pub fn lex(text: &str) -> Result<Vec<Token<'_>>, LexError> {
  let pairs = PegParser::parse(Rule::Tokens, text)
    .map_err(|e| LexError::Unexpected(error_offset(&e)))?;

  let mut tokens = Vec::new();
  for pair in pairs.flatten() {
    let s = pair.as_str();
    let token = match pair.as_rule() {
      Rule::HexNum => {
        let digits = s.trim_start_matches('$');
        let digits = digits
          .strip_prefix("0x")
          .or_else(|| digits.strip_prefix("0X"))
          .unwrap_or(digits);
        Token::Int(parse_radix(digits, 16)?)
      }
      Rule::BinNum => Token::Int(parse_radix(&s[2..], 2)?),
      Rule::DecNum => Token::Int(parse_radix(s, 10)?),
      Rule::PercentNum => Token::Percent(&s[1..]),
      Rule::CharLit => {
        let bytes = unescape(&s[1..s.len() - 1]);
        match bytes.as_slice() {
          [b] => Token::Int(*b as i32),
          _ => return Err(LexError::BadChar),
        }
      }
      Rule::StrLit => Token::Str(&s[1..s.len() - 1]),
      Rule::MultiRef => {
        let bang = s.find('!').unwrap_or(0);
        let run = &s[bang + 1..];
        let steps = run.len() as i32;
        Token::MultiRef {
          name: &s[..bang],
          steps: if run.starts_with('-') { -steps } else { steps },
        }
      }
      Rule::Ident => Token::Ident(s),
      Rule::Operator => Token::Op(s),
      Rule::Punct => match s {
        "(" => Token::LParen,
        ")" => Token::RParen,
        "[" => Token::LBracket,
        "]" => Token::RBracket,
        "," => Token::Comma,
        ":" => Token::Colon,
        _ => Token::Hash,
      },
      _ => continue,
    };
    tokens.push(token);
  }
  Ok(tokens)
}

fn parse_radix(digits: &str, radix: u32) -> Result<i32, LexError> {
  // Literals are unsigned but wrap into i32, so `$FFFFFFFF` is -1.
  u32::from_str_radix(digits, radix)
    .map(|v| v as i32)
    .map_err(|_| LexError::Overflow)
}

/// Processes backslash escapes in string or character literal contents.
pub fn unescape(text: &str) -> Vec<u8> {
  let mut out = Vec::with_capacity(text.len());
  let mut bytes = text.bytes();
  while let Some(b) = bytes.next() {
    if b != b'\\' {
      out.push(b);
      continue;
    }
    match bytes.next() {
      Some(b'n') => out.push(b'\n'),
      Some(b'r') => out.push(b'\r'),
      Some(b't') => out.push(b'\t'),
      Some(b'0') => out.push(0),
      Some(other) => out.push(other),
      None => out.push(b'\\'),
    }
  }
  out
}

#[cfg(test)]
mod test {
  use super::*;

  macro_rules! lex {
    ($text:expr) => {
      lex($text).unwrap()
    };
  }

  #[test]
  fn numbers() {
    assert_eq!(
      lex!("$ff 0x10 0b101 42 'A'"),
      vec![
        Token::Int(0xff),
        Token::Int(0x10),
        Token::Int(0b101),
        Token::Int(42),
        Token::Int(65),
      ]
    );
    assert_eq!(lex!("%0101"), vec![Token::Percent("0101")]);
    assert_eq!(lex("$100000000"), Err(LexError::Overflow));
    assert_eq!(lex("a ` b"), Err(LexError::Unexpected(2)));
  }

  #[test]
  fn operators() {
    assert_eq!(
      lex!("a<<2>=b!=c"),
      vec![
        Token::Ident("a"),
        Token::Op("<<"),
        Token::Int(2),
        Token::Op(">="),
        Token::Ident("b"),
        Token::Op("!="),
        Token::Ident("c"),
      ]
    );
  }

  #[test]
  fn multi_refs() {
    assert_eq!(
      lex!("loop!+ !-- !x"),
      vec![
        Token::MultiRef {
          name: "loop",
          steps: 1
        },
        Token::MultiRef { name: "", steps: -2 },
        Token::Op("!"),
        Token::Ident("x"),
      ]
    );
  }

  #[test]
  fn operands() {
    assert_eq!(
      lex!("[zp], y"),
      vec![
        Token::LBracket,
        Token::Ident("zp"),
        Token::RBracket,
        Token::Comma,
        Token::Ident("y"),
      ]
    );
    assert_eq!(
      lex!("#\"hi\\n\""),
      vec![Token::Hash, Token::Str("hi\\n")]
    );
    assert_eq!(unescape("hi\\n"), b"hi\n".to_vec());
  }
}
