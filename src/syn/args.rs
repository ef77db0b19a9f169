//! Splitting operand text into comma-separated arguments.

/// Splits `text` on commas that are not nested inside parentheses, brackets,
/// or string and character literals.
///
/// Each argument is trimmed. Empty text yields no arguments at all, while
/// `"a,,b"` yields an empty middle argument.
pub fn split_args(text: &str) -> Vec<&str> {
  let text = text.trim();
  if text.is_empty() {
    return Vec::new();
  }

  let mut args = Vec::new();
  let mut depth = 0i32;
  let mut quote = None;
  let mut escaped = false;
  let mut start = 0;
  for (i, c) in text.char_indices() {
    if let Some(q) = quote {
      if escaped {
        escaped = false;
      } else if c == '\\' {
        escaped = true;
      } else if c == q {
        quote = None;
      }
      continue;
    }
    match c {
      '"' | '\'' => quote = Some(c),
      '(' | '[' => depth += 1,
      ')' | ']' => depth -= 1,
      ',' if depth <= 0 => {
        args.push(text[start..i].trim());
        start = i + 1;
      }
      _ => {}
    }
  }
  args.push(text[start..].trim());
  args
}

/// The syntactic kind of a macro argument, as reported by `\?n`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ArgKind {
  /// No argument was given.
  None = 0,
  /// A register name: `a`, `x` or `y`.
  Register = 1,
  /// An immediate: `#...`.
  Immediate = 2,
  /// A plain memory operand.
  Absolute = 3,
  /// An indirect operand: `[...]` or `(...)`.
  Indirect = 4,
  /// A string literal.
  String = 5,
}

impl ArgKind {
  /// Classifies a single, already split, argument.
  pub fn of(arg: &str) -> Self {
    let arg = arg.trim();
    if arg.is_empty() {
      return Self::None;
    }
    if arg.eq_ignore_ascii_case("a")
      || arg.eq_ignore_ascii_case("x")
      || arg.eq_ignore_ascii_case("y")
    {
      return Self::Register;
    }
    match arg.as_bytes()[0] {
      b'#' => Self::Immediate,
      b'"' => Self::String,
      b'[' | b'(' if matches!(arg.as_bytes()[arg.len() - 1], b']' | b')') => {
        Self::Indirect
      }
      _ => Self::Absolute,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn nesting() {
    assert_eq!(split_args("a, (b, c), [d,x]"), vec!["a", "(b, c)", "[d,x]"]);
    assert_eq!(split_args(" \"x,y\" , ',' "), vec!["\"x,y\"", "','"]);
    assert_eq!(split_args("a,,b"), vec!["a", "", "b"]);
    assert!(split_args("   ").is_empty());
  }

  #[test]
  fn kinds() {
    assert_eq!(ArgKind::of(""), ArgKind::None);
    assert_eq!(ArgKind::of("X"), ArgKind::Register);
    assert_eq!(ArgKind::of("#12"), ArgKind::Immediate);
    assert_eq!(ArgKind::of("[ptr]"), ArgKind::Indirect);
    assert_eq!(ArgKind::of("label+1"), ArgKind::Absolute);
    assert_eq!(ArgKind::of("\"hi\""), ArgKind::String);
    assert_eq!(ArgKind::of("(a+1)*2"), ArgKind::Absolute);
  }
}
