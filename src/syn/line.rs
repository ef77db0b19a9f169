//! Splitting a source line into its label, op, operand and comment.

use pest::Parser as _;

use crate::syn::parse::error_offset;
use crate::syn::parse::PegParser;
use crate::syn::parse::Rule;

/// A label at the start of a line.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Label<'a> {
  /// The label's name, without the colon.
  ///
  /// Multi-labels keep their trailing `!`: `"loop!"`, or just `"!"` for an
  /// anonymous one.
  pub name: &'a str,
  /// Whether the label was followed by a colon.
  pub colon: bool,
  /// Whether the label started in the first column.
  pub column0: bool,
}

impl Label<'_> {
  /// Returns whether this label is a multi-label definition.
  pub fn is_multi(&self) -> bool {
    self.name.ends_with('!')
  }
}

/// A source line split into fields.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct Line<'a> {
  /// The label, if any.
  pub label: Option<Label<'a>>,
  /// The op: a mnemonic, pseudo-op, macro name or `=`.
  pub op: Option<&'a str>,
  /// The operand text, trimmed. Empty when absent.
  pub operand: &'a str,
  /// The trailing `;` comment, if any.
  pub comment: Option<&'a str>,
}

/// A line that does not fit the line grammar.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LineError {
  /// The byte offset of the offending character.
  pub offset: usize,
}

impl<'a> Line<'a> {
  /// Splits `text` into fields.
  ///
  /// A word in the first column is a label, unless `is_keyword` says it is an
  /// op (which lets `.org $8000` start in column 0) and it has no colon.
  pub fn parse(
    text: &'a str,
    is_keyword: impl Fn(&str) -> bool,
  ) -> Result<Self, LineError> {
    let head_len = text
      .find(|c: char| c.is_whitespace() || c == ';' || c == ':')
      .unwrap_or_else(|| text.len());
    let head = &text[..head_len];
    let rule = if !head.is_empty()
      && !text[head_len..].starts_with(':')
      && is_keyword(head)
    {
      Rule::Unlabeled
    } else {
      Rule::Line
    };

    let pairs = PegParser::parse(rule, text).map_err(|e| LineError {
      offset: error_offset(&e),
    })?;

    let mut line = Line::default();
    for pair in pairs.flatten() {
      match pair.as_rule() {
        Rule::ColumnLabel | Rule::IndentedLabel => {
          let column0 = pair.as_rule() == Rule::ColumnLabel;
          let mut inner = pair.into_inner();
          let name = inner.next().map(|p| p.as_str()).unwrap_or("");
          line.label = Some(Label {
            name,
            colon: inner.next().is_some(),
            column0,
          });
        }
        Rule::Op => line.op = Some(pair.as_str()),
        Rule::Operand => line.operand = pair.as_str().trim_end(),
        Rule::Comment => line.comment = Some(pair.as_str()),
        _ => {}
      }
    }
    Ok(line)
  }

  /// Returns whether this line carries nothing to assemble.
  pub fn is_blank(&self) -> bool {
    self.label.is_none() && self.op.is_none()
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn directive(word: &str) -> bool {
    word.eq_ignore_ascii_case(".org")
  }

  #[test]
  fn label_op_operand() {
    let line = Line::parse("loop:  bra loop ; spin", directive).unwrap();
    assert_eq!(
      line.label,
      Some(Label {
        name: "loop",
        colon: true,
        column0: true
      })
    );
    assert_eq!(line.op, Some("bra"));
    assert_eq!(line.operand, "loop");
    assert_eq!(line.comment, Some("; spin"));
  }

  #[test]
  fn indented_lines() {
    let line = Line::parse("  lda #';'  ", directive).unwrap();
    assert_eq!(line.label, None);
    assert_eq!(line.op, Some("lda"));
    assert_eq!(line.operand, "#';'");

    let line = Line::parse("    .done: rts", directive).unwrap();
    assert_eq!(line.label.map(|l| l.name), Some(".done"));
    assert_eq!(line.label.map(|l| l.column0), Some(false));
    assert_eq!(line.op, Some("rts"));
  }

  #[test]
  fn equates_and_keywords() {
    let line = Line::parse("size = 4*2", directive).unwrap();
    assert_eq!(line.label.map(|l| l.name), Some("size"));
    assert_eq!(line.op, Some("="));
    assert_eq!(line.operand, "4*2");

    let line = Line::parse(".org $2000", directive).unwrap();
    assert_eq!(line.label, None);
    assert_eq!(line.op, Some(".org"));
    assert_eq!(line.operand, "$2000");
  }

  #[test]
  fn multi_labels() {
    let line = Line::parse("!  dex", directive).unwrap();
    assert!(line.label.unwrap().is_multi());
    let line = Line::parse("next! inx", directive).unwrap();
    assert_eq!(line.label.map(|l| l.name), Some("next!"));
  }

  #[test]
  fn strings_hide_semicolons() {
    let line = Line::parse("  .db \"a;b\", 0 ; c", directive).unwrap();
    assert_eq!(line.operand, "\"a;b\", 0");
    assert!(Line::parse("", directive).unwrap().is_blank());
    assert!(Line::parse("; only", directive).unwrap().is_blank());
  }
}
