//! C-style comment folding.
//!
//! When enabled, `// ...` and `/* ... */` comments are removed from each line
//! before it is split into fields. Block comments may span lines, so the folder
//! carries state from one line to the next.

use std::borrow::Cow;

/// Strips C comments from a stream of lines.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default)]
pub struct CommentFolder {
  in_block: bool,
}

impl CommentFolder {
  /// Creates a folder that starts outside any comment.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns whether an unterminated `/*` is pending.
  pub fn in_block(&self) -> bool {
    self.in_block
  }

  /// Clears any pending block comment, e.g. at the start of a pass.
  pub fn reset(&mut self) {
    self.in_block = false;
  }

  /// Removes C comments from `line`.
  ///
  /// Comment markers inside string or character literals, and anything after
  /// a `;` comment, are left alone. A block comment is replaced by a space so
  /// that it still separates tokens.
  pub fn fold<'a>(&mut self, line: &'a str) -> Cow<'a, str> {
    if !self.in_block && !line.contains("/*") && !line.contains("//") {
      return Cow::Borrowed(line);
    }

    let bytes = line.as_bytes();
    let mut out = String::with_capacity(line.len());
    let mut quote = None;
    let mut i = 0;
    while i < bytes.len() {
      if self.in_block {
        if line[i..].starts_with("*/") {
          self.in_block = false;
          out.push(' ');
          i += 2;
        } else {
          i += 1;
        }
        continue;
      }

      let b = bytes[i];
      match quote {
        Some(q) => {
          if b == b'\\' && i + 1 < bytes.len() {
            out.push('\\');
            i += 1;
          } else if b == q {
            quote = None;
          }
        }
        None => match b {
          b'"' | b'\'' => quote = Some(b),
          b';' => {
            out.push_str(&line[i..]);
            break;
          }
          b'/' if line[i..].starts_with("//") => break,
          b'/' if line[i..].starts_with("/*") => {
            self.in_block = true;
            i += 2;
            continue;
          }
          _ => {}
        },
      }

      // Copy one whole character; `i` always sits on a boundary here.
      let len = line[i..].chars().next().map(char::len_utf8).unwrap_or(1);
      out.push_str(&line[i..i + len]);
      i += len;
    }

    Cow::Owned(out)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn line_comments() {
    let mut f = CommentFolder::new();
    assert_eq!(f.fold("  lda #1 // load"), "  lda #1 ");
    assert_eq!(f.fold("  .db \"//\" // x"), "  .db \"//\" ");
    assert_eq!(f.fold("  nop ; // kept"), "  nop ; // kept");
  }

  #[test]
  fn block_comments_span_lines() {
    let mut f = CommentFolder::new();
    assert_eq!(f.fold("  lda /* a */ #1"), "  lda   #1");
    assert_eq!(f.fold("  inx /* start"), "  inx ");
    assert!(f.in_block());
    assert_eq!(f.fold("still comment"), "");
    assert_eq!(f.fold("end */ dex"), "  dex");
    assert!(!f.in_block());
  }
}
