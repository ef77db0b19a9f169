//! The input stack: source files, macro expansions and `.rept` blocks.
//!
//! Lines are pulled from the innermost frame until it runs dry, at which
//! point it is popped and the frame beneath resumes. Macro and `.rept` bodies
//! are recorded by a `Capture` while their definition is being read.

use std::path::PathBuf;
use std::rc::Rc;

use lazy_static::lazy_static;
use regex::Captures;
use regex::Regex;

use crate::asm::data::file_arg;
use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::LineInfo;
use crate::syn::args::split_args;
use crate::syn::args::ArgKind;
use crate::syn::line::Line;
use crate::syn::src::SourceFile;

/// How deeply macros may expand into each other.
const MACRO_DEPTH: usize = 16;

/// How deeply files may include each other.
const INCLUDE_DEPTH: usize = 8;

/// The most times a `.rept` block may repeat.
const MAX_REPT: i32 = 0x10000;

/// A source of lines.
#[derive(Debug)]
pub(in crate::asm) enum Frame {
  File {
    file: Rc<SourceFile>,
    next: usize,
  },
  Macro {
    body: Rc<[String]>,
    args: Vec<String>,
    /// The expansion number, for `\@`.
    id: u32,
    next: usize,
    /// The conditional depth at the call site.
    conds: usize,
    origin: Option<LineInfo>,
  },
  Rept {
    body: Rc<[String]>,
    left: u32,
    next: usize,
    origin: Option<LineInfo>,
  },
}

/// What is being recorded.
#[derive(Clone, Debug)]
pub(in crate::asm) enum CaptureKind {
  Macro(SymbolId),
  Rept(u32),
}

/// A macro or `.rept` body being recorded.
#[derive(Clone, Debug)]
pub(in crate::asm) struct Capture {
  pub kind: CaptureKind,
  lines: Vec<String>,
  /// Nested blocks of the same kind.
  depth: usize,
  /// The line that opened the block.
  pub start: Option<LineInfo>,
}

impl Capture {
  /// Returns the directive that ends this capture.
  pub fn closer(&self) -> &'static str {
    match self.kind {
      CaptureKind::Macro(_) => "endm",
      CaptureKind::Rept(_) => "endr",
    }
  }
}

/// Replaces macro parameters in `line`.
///
/// `\1` through `\9` are the arguments, `\#` is their count, `\@` is a number
/// unique to this expansion, and `\?n` is the syntactic kind of argument `n`.
fn substitute(line: &str, args: &[String], id: u32) -> String {
  lazy_static! {
    static ref PARAM: Regex = Regex::new(r"\\([1-9@#]|\?[1-9])").unwrap();
  }
  if !line.contains('\\') {
    return line.to_string();
  }

  let arg = |digit: &str| {
    let n = digit.parse::<usize>().unwrap_or(1);
    args.get(n - 1).map(String::as_str).unwrap_or("")
  };
  PARAM
    .replace_all(line, |caps: &Captures| {
      let param = &caps[1];
      match param {
        "@" => format!("{:05}", id),
        "#" => args.len().to_string(),
        _ if param.starts_with('?') => {
          (ArgKind::of(arg(&param[1..])) as i32).to_string()
        }
        _ => arg(param).to_string(),
      }
    })
    .into_owned()
}

impl Assembler {
  /// Pushes a source file onto the input stack.
  pub(in crate::asm) fn push_file(&mut self, file: Rc<SourceFile>) {
    self.input.push(Frame::File { file, next: 0 });
  }

  /// Pulls the next line of input, popping exhausted frames.
  pub(in crate::asm) fn next_line(&mut self) -> Option<(String, LineInfo)> {
    loop {
      match self.input.last_mut()? {
        Frame::File { file, next } => {
          if let Some(text) = file.lines().get(*next) {
            *next += 1;
            let info = LineInfo {
              file: file.path().to_path_buf(),
              line: *next,
              text: text.clone(),
            };
            return Some((text.clone(), info));
          }
        }
        Frame::Macro {
          body,
          args,
          id,
          next,
          origin,
          ..
        } => {
          if let Some(raw) = body.get(*next) {
            *next += 1;
            let text = substitute(raw, args, *id);
            return Some(expanded(text, origin));
          }
        }
        Frame::Rept {
          body,
          left,
          next,
          origin,
        } => {
          if let Some(text) = body.get(*next) {
            *next += 1;
            return Some(expanded(text.clone(), origin));
          }
          if *left > 1 {
            *left -= 1;
            *next = 0;
            continue;
          }
        }
      }
      self.pop_frame();
    }
  }

  fn pop_frame(&mut self) {
    if let Some(Frame::Macro { conds, .. }) = self.input.pop() {
      self.conds.truncate(conds);
    }
  }

  /// Handles `.include "file"`.
  pub(in crate::asm) fn include(&mut self, operand: &str) -> Result<(), ErrorType> {
    let name = match file_arg(operand) {
      Some(name) => name,
      None if !operand.trim().is_empty() => operand.trim().to_string(),
      None => return Err(ErrorType::BadArgs("include")),
    };
    let files = self
      .input
      .iter()
      .filter(|f| matches!(f, Frame::File { .. }))
      .count();
    if files > INCLUDE_DEPTH {
      return Err(ErrorType::IncludeDepth);
    }

    let from = self.cur.as_ref().map(|c| c.file.clone());
    let file = self
      .sources
      .load_text(&name, from.as_deref())
      .map_err(|e| ErrorType::FileNotFound(name.clone(), e.to_string()))?;
    tracing::trace!(file = %file.path().display(), "include");
    self.push_file(file);
    Ok(())
  }

  /// Handles `name .macro` (or `.macro name`): starts recording a body.
  pub(in crate::asm) fn start_macro(
    &mut self,
    label: Option<&str>,
    operand: &str,
  ) -> Result<(), ErrorType> {
    let name = match label {
      Some(label) => label,
      None => split_args(operand)
        .into_iter()
        .next()
        .filter(|n| !n.is_empty())
        .ok_or(ErrorType::BadArgs("macro"))?,
    };
    let id = self.symbols.install(name);
    let sym = self.sym(id);
    match sym.kind {
      Kind::Macro if sym.defined => {
        return Err(ErrorType::MacroRedefined(name.to_string()))
      }
      Kind::Undefined | Kind::Macro => {}
      _ if !sym.defined => {}
      _ => return Err(ErrorType::Redefined(name.to_string())),
    }

    self.capture = Some(Capture {
      kind: CaptureKind::Macro(id),
      lines: Vec::new(),
      depth: 0,
      start: self.cur.clone(),
    });
    Ok(())
  }

  /// Handles `.rept count`.
  pub(in crate::asm) fn start_rept(&mut self, operand: &str) -> Result<(), ErrorType> {
    let count = self.eval_defined(operand)?.value;
    if !(0..=MAX_REPT).contains(&count) {
      return Err(ErrorType::OperandRange(count));
    }
    self.capture = Some(Capture {
      kind: CaptureKind::Rept(count as u32),
      lines: Vec::new(),
      depth: 0,
      start: self.cur.clone(),
    });
    Ok(())
  }

  /// Records a line of a macro or `.rept` body, finishing the capture at the
  /// matching `.endm` or `.endr`.
  ///
  /// `line` is `None` for lines that do not parse; they are recorded as-is,
  /// since parameter substitution may make them valid.
  pub(in crate::asm) fn capture_line(
    &mut self,
    text: &str,
    line: Option<&Line>,
  ) -> Result<(), ErrorType> {
    let op = line
      .and_then(|l| l.op)
      .map(|op| op.strip_prefix('.').unwrap_or(op).to_ascii_lowercase());
    let cap = match self.capture.as_mut() {
      Some(cap) => cap,
      None => return Ok(()),
    };

    let is_macro = matches!(cap.kind, CaptureKind::Macro(_));
    match (is_macro, op.as_deref()) {
      (true, Some("macro")) => return Err(ErrorType::MacroNested),
      (true, Some("endm")) | (false, Some("endr")) if cap.depth == 0 => {
        return self.finish_capture();
      }
      (false, Some("rept")) => cap.depth += 1,
      (false, Some("endr")) => cap.depth -= 1,
      _ => {}
    }
    cap.lines.push(text.to_string());
    Ok(())
  }

  fn finish_capture(&mut self) -> Result<(), ErrorType> {
    let cap = match self.capture.take() {
      Some(cap) => cap,
      None => return Ok(()),
    };
    let body: Rc<[String]> = cap.lines.into();
    match cap.kind {
      CaptureKind::Macro(id) => {
        let location = cap.start.map(|l| (l.file, l.line));
        let sym = self.symbols.sym_mut(id);
        sym.kind = Kind::Macro;
        sym.defined = true;
        sym.macro_body = Some(body);
        sym.location = location;
      }
      CaptureKind::Rept(0) => {}
      CaptureKind::Rept(left) => self.input.push(Frame::Rept {
        body,
        left,
        next: 0,
        origin: cap.start,
      }),
    }
    Ok(())
  }

  /// Expands the macro `id` with the arguments in `operand`.
  pub(in crate::asm) fn expand_macro(
    &mut self,
    id: SymbolId,
    operand: &str,
  ) -> Result<(), ErrorType> {
    let depth = self
      .input
      .iter()
      .filter(|f| matches!(f, Frame::Macro { .. }))
      .count();
    if depth >= MACRO_DEPTH {
      return Err(ErrorType::MacroDepth);
    }
    let body = match self.sym(id).macro_body.clone() {
      Some(body) => body,
      None => return Err(ErrorType::UnknownInstruction(self.sym(id).name.clone())),
    };

    self.macro_counter += 1;
    let args = split_args(operand)
      .into_iter()
      .map(String::from)
      .collect::<Vec<_>>();
    self.input.push(Frame::Macro {
      body,
      args,
      id: self.macro_counter,
      next: 0,
      conds: self.conds.depth(),
      origin: self.cur.clone(),
    });
    Ok(())
  }

  /// Handles `.exitm`: abandons the innermost macro expansion.
  pub(in crate::asm) fn exit_macro(&mut self) -> Result<(), ErrorType> {
    let idx = self
      .input
      .iter()
      .rposition(|f| matches!(f, Frame::Macro { .. }))
      .ok_or(ErrorType::Unmatched("exitm"))?;
    if let Some(Frame::Macro { conds, .. }) = self.input.get(idx) {
      let conds = *conds;
      self.conds.truncate(conds);
    }
    self.input.truncate(idx);
    Ok(())
  }

  /// Returns whether a macro is being expanded.
  pub(in crate::asm) fn in_macro(&self) -> bool {
    self
      .input
      .iter()
      .any(|f| matches!(f, Frame::Macro { .. }))
  }
}

/// Builds the line info for a line produced by a macro or `.rept`, which is
/// blamed on the line that started the expansion.
fn expanded(text: String, origin: &Option<LineInfo>) -> (String, LineInfo) {
  let (file, line) = match origin {
    Some(o) => (o.file.clone(), o.line),
    None => (PathBuf::new(), 0),
  };
  let info = LineInfo {
    file,
    line,
    text: text.clone(),
  };
  (text, info)
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;

  #[test]
  fn parameters() {
    let args = vec!["#1".to_string(), "foo".to_string()];
    assert_eq!(substitute("lda \\1", &args, 3), "lda #1");
    assert_eq!(substitute(".\\@: \\#", &args, 3), ".00003: 2");
    assert_eq!(substitute("\\?1 \\?2 \\?3", &args, 3), "2 3 0");
    assert_eq!(substitute("\\3", &args, 3), "");
  }

  #[test]
  fn macros_expand() {
    let out = assemble_text(
      "
store .macro
  lda \\1
  sta \\2
  .endm
  .org $e000
  store #5, $2000
",
    )
    .unwrap();
    // `$2000` is the zero page on the PC Engine.
    assert_eq!(bytes(&out, 0, 0, 4), vec![0xa9, 0x05, 0x85, 0x00]);
    assert_eq!(out.image.get(0, 4), None);
  }

  #[test]
  fn exitm_leaves_early() {
    let out = assemble_text(
      "
twice .macro
  .db 1
  .if \\# == 0
  .exitm
  .endif
  .db 2
  .endm
  .org $e000
  twice
  twice x
  .db 3
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 4), vec![1, 1, 2, 3]);
  }

  #[test]
  fn rept_blocks() {
    let out = assemble_text(
      "
  .org $e000
n .set 0
  .rept 3
  .db n
n .set n + 1
  .endr
  .rept 0
  .db $ff
  .endr
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 3), vec![0, 1, 2]);
    assert_eq!(out.image.get(0, 3), None);
  }

  #[test]
  fn macro_errors() {
    let errors = assemble_text("a .macro\nb .macro\n  .endm\n  .endm\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::MacroNested);

    let errors = assemble_text("a .macro\n  .endm\na .macro\n  .endm\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::MacroRedefined("a".into()));

    let errors = assemble_text("loop .macro\n  loop\n  .endm\n  loop\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::MacroDepth);

    let errors = assemble_text("  .exitm\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::Unmatched("exitm"));

    let errors = assemble_text("a .macro\n  nop\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::MissingEnd("endm"));
  }

  #[test]
  fn includes() {
    let mut asm = Assembler::new(crate::config::Config::default());
    asm.add_source("main.s", "  .org $e000\n  .include \"inc.s\"\n  .db 2\n");
    asm.add_source("inc.s", "  .db 1\n");
    let out = asm.run(std::path::Path::new("main.s")).unwrap();
    assert_eq!(bytes(&out, 0, 0, 2), vec![1, 2]);

    let errors = assemble_text("  .include \"self.s\"\n").unwrap_err();
    assert!(matches!(first_error(&errors), ErrorType::FileNotFound(..)));
  }

  #[test]
  fn includes_nest_only_so_deep() {
    let mut asm = Assembler::new(crate::config::Config::default());
    asm.add_source("main.s", "  .include \"again.s\"\n");
    asm.add_source("again.s", "  .include \"again.s\"\n");
    let errors = asm.run(std::path::Path::new("main.s")).unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::IncludeDepth);
  }
}
