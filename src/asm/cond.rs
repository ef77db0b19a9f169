//! Conditional assembly: `.if`, `.ifdef`, `.ifndef`, `.else` and `.endif`.

use crate::asm::dir::Directive;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::syn::line::Line;

#[derive(Copy, Clone, Debug)]
struct Frame {
  active: bool,
  /// Whether some branch of this block has been taken.
  taken: bool,
  parent_active: bool,
  seen_else: bool,
}

/// The stack of open conditional blocks.
#[derive(Clone, Debug, Default)]
pub(in crate::asm) struct Conds {
  stack: Vec<Frame>,
}

impl Conds {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn depth(&self) -> usize {
    self.stack.len()
  }

  /// Returns whether lines are currently being assembled.
  pub fn active(&self) -> bool {
    self.stack.last().map_or(true, |f| f.active)
  }

  pub fn push(&mut self, cond: bool) {
    let parent_active = self.active();
    self.stack.push(Frame {
      active: parent_active && cond,
      taken: cond,
      parent_active,
      seen_else: false,
    });
  }

  pub fn flip(&mut self) -> Result<(), ErrorType> {
    let frame = match self.stack.last_mut() {
      Some(f) if !f.seen_else => f,
      _ => return Err(ErrorType::Unmatched("else")),
    };
    frame.active = frame.parent_active && !frame.taken;
    frame.taken = true;
    frame.seen_else = true;
    Ok(())
  }

  pub fn pop(&mut self) -> Result<(), ErrorType> {
    self
      .stack
      .pop()
      .map(|_| ())
      .ok_or(ErrorType::Unmatched("endif"))
  }

  pub fn truncate(&mut self, depth: usize) {
    self.stack.truncate(depth);
  }

  pub fn clear(&mut self) {
    self.stack.clear();
  }
}

/// Returns the conditional directive `op` names, if it names one.
fn cond_op(op: &str) -> Option<Directive> {
  let d = Directive::from_name(op.strip_prefix('.').unwrap_or(op))?;
  match d {
    Directive::If
    | Directive::Ifdef
    | Directive::Ifndef
    | Directive::Else
    | Directive::Endif => Some(d),
    _ => None,
  }
}

impl Assembler {
  /// Handles a line inside a block that is not being assembled: only the
  /// nesting of conditionals is tracked.
  pub(in crate::asm) fn skip_line(&mut self, line: &Line) -> Result<(), ErrorType> {
    match line.op.and_then(cond_op) {
      Some(Directive::Else) => self.conds.flip(),
      Some(Directive::Endif) => self.conds.pop(),
      Some(_) => {
        self.conds.push(false);
        Ok(())
      }
      None => Ok(()),
    }
  }

  /// Handles `.if expr`.
  pub(in crate::asm) fn cond_if(&mut self, operand: &str) -> Result<(), ErrorType> {
    let value = self.eval_defined(operand)?;
    self.conds.push(value.value != 0);
    Ok(())
  }

  /// Handles `.ifdef name` and `.ifndef name`: a symbol counts as defined
  /// once its definition has been seen during the current pass.
  pub(in crate::asm) fn cond_ifdef(
    &mut self,
    operand: &str,
    want: bool,
  ) -> Result<(), ErrorType> {
    let name = operand.trim();
    if name.is_empty() {
      return Err(ErrorType::BadArgs(if want { "ifdef" } else { "ifndef" }));
    }
    let id = self.resolve(name)?;
    let sym = self.sym(id);
    let defined = sym.defined || sym.builtin;
    self.conds.push(defined == want);
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;

  #[test]
  fn nesting() {
    let mut conds = Conds::new();
    conds.push(false);
    conds.push(true);
    assert!(!conds.active());
    conds.flip().unwrap();
    assert!(!conds.active());
    conds.pop().unwrap();
    conds.flip().unwrap();
    assert!(conds.active());
    assert_eq!(conds.flip(), Err(ErrorType::Unmatched("else")));
    conds.pop().unwrap();
    assert_eq!(conds.pop(), Err(ErrorType::Unmatched("endif")));
  }

  #[test]
  fn skipped_blocks() {
    let out = assemble_text(
      "
  .org $e000
  .if 0
  .db 1
  .if 1
  .db 2
  .else
  .db 3
  .endif
  .else
  .db 4
  .endif
  .ifdef nothing
  .db 5
  .endif
  .ifndef nothing
  .db 6
  .endif
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 2), vec![4, 6]);
    assert_eq!(out.image.get(0, 2), None);
  }

  #[test]
  fn ifdef_sees_this_pass_only() {
    let out = assemble_text(
      "
  .org $e000
  .ifdef later
  .db 1
  .else
  .db 2
  .endif
later:
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 1), vec![2]);
  }

  #[test]
  fn unbalanced() {
    let errors = assemble_text("  .if 1\n  nop\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::MissingEnd("endif"));
    let errors = assemble_text("  .endif\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::Unmatched("endif"));
  }
}
