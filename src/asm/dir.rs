//! Pseudo-op handling.
//!
//! Every directive is listed once in the `directives!` table below, with the
//! names it answers to. Most may be written with or without a leading `.`;
//! the ones marked `dotless` are also recognized bare, so that `db 1, 2`
//! and `org $e000` work.

use crate::asm::data::DataKind;
use crate::asm::procs::ProcKind;
use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::asm::StructFrame;
use crate::int::Width;
use crate::rom::Section;
use crate::syn::args::split_args;
use crate::syn::line::Label;
use crate::syn::token::unescape;

/// A macro for generating the `Directive` enum.
macro_rules! directives {
  (@first $first:literal $(| $rest:literal)*) => { $first };
  ($($name:ident: $($text:literal)|+,)*) => {
    /// A pseudo-op.
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    pub(in crate::asm) enum Directive {
      $($name,)*
    }

    impl Directive {
      /// Returns the directive's main name, without the leading `.`.
      pub fn name(self) -> &'static str {
        match self {
          $(Self::$name => directives!(@first $($text)|+),)*
        }
      }

      /// Gets the directive with the given name (without the `.`), if there
      /// is one. Matching is case-insensitive.
      pub fn from_name(name: &str) -> Option<Self> {
        $($(if name.eq_ignore_ascii_case($text) {
          return Some(Self::$name);
        })+)*
        None
      }
    }
  };
}

directives! {
  Org: "org",
  Bank: "bank",
  Page: "page",
  Code: "code",
  Data: "data",
  Zp: "zp",
  Bss: "bss",

  Db: "db" | "byte",
  Dw: "dw" | "word",
  Dwl: "dwl",
  Dwh: "dwh",
  Dd: "dd" | "dword",
  Ds: "ds",
  Align: "align",

  Equ: "equ",
  Set: "set",
  Rsset: "rsset",
  Rs: "rs",

  Include: "include",
  Incbin: "incbin",
  Incchr: "incchr",
  Incspr: "incspr",
  Incpal: "incpal",
  Incbat: "incbat",
  Inctile: "inctile",

  Macro: "macro",
  Endm: "endm",
  Exitm: "exitm",
  Rept: "rept",
  Endr: "endr",

  If: "if",
  Ifdef: "ifdef",
  Ifndef: "ifndef",
  Else: "else",
  Endif: "endif",

  Func: "func",
  Proc: "proc",
  Endp: "endp",
  Procgroup: "procgroup",
  Endprocgroup: "endprocgroup",
  Struct: "struct",
  Ends: "ends",
  Alias: "alias",

  Fail: "fail" | "error",
  Warn: "warn",
  List: "list",
  Nolist: "nolist",
  Mlist: "mlist",
  Nomlist: "nomlist",

  Inesprg: "inesprg",
  Ineschr: "ineschr",
  Inesmap: "inesmap",
  Inesmir: "inesmir",
}

impl Directive {
  /// Returns whether this directive is recognized without its `.`.
  ///
  /// `set` is not: it is also a HuC6280 mnemonic.
  pub fn dotless(self) -> bool {
    use Directive::*;
    matches!(
      self,
      Org
        | Bank
        | Page
        | Code
        | Data
        | Zp
        | Bss
        | Db
        | Dw
        | Dwl
        | Dwh
        | Dd
        | Ds
        | Equ
        | Rsset
        | Rs
        | Include
        | Incbin
        | Incchr
        | Incspr
        | Incpal
        | Incbat
        | Inctile
        | Macro
        | Endm
        | Rept
        | Endr
        | If
        | Ifdef
        | Ifndef
        | Else
        | Endif
        | Proc
        | Endp
        | Procgroup
        | Endprocgroup
    )
  }

  /// Returns whether this directive consumes the line's label itself, rather
  /// than having it defined as the current location.
  pub fn takes_label(self) -> bool {
    use Directive::*;
    matches!(
      self,
      Equ | Set | Rs | Func | Macro | Alias | Struct | Proc | Procgroup
    )
  }
}

/// Returns the bytes of a string-literal argument.
fn string_arg(arg: &str) -> Option<Vec<u8>> {
  let arg = arg.trim();
  if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
    Some(unescape(&arg[1..arg.len() - 1]))
  } else {
    None
  }
}

/// Returns the text of a `.fail` or `.warn` message.
fn message(operand: &str) -> String {
  match string_arg(operand) {
    Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
    None => operand.to_string(),
  }
}

impl Assembler {
  /// Runs a pseudo-op.
  ///
  /// `label` is the line's label as written, and `label_id` the symbol it
  /// was defined as, unless `takes_label()` left it undefined.
  pub(in crate::asm) fn directive(
    &mut self,
    d: Directive,
    label: Option<&Label>,
    label_id: Option<SymbolId>,
    operand: &str,
  ) -> Result<(), ErrorType> {
    use Directive::*;
    let label_name = label.map(|l| l.name);
    match d {
      Org => {
        let addr = self.eval_defined(operand)?.value;
        self.org(addr)
      }
      Bank => {
        let arg = split_args(operand).into_iter().next().unwrap_or("");
        let bank = self.eval_defined(arg)?.value;
        self.select_bank(bank)
      }
      Page => {
        let page = self.eval_defined(operand)?.value;
        self.set_page(page)
      }
      Code => self.set_section(Section::Code),
      Data => self.set_section(Section::Data),
      Zp => self.set_section(Section::Zp),
      Bss => self.set_section(Section::Bss),

      Db => self.data(DataKind::Byte, Width::I8, operand, label_id, |v| v),
      Dw => self.data(DataKind::Word, Width::I16, operand, label_id, |v| v),
      Dwl => self.data(DataKind::Byte, Width::I8, operand, label_id, |v| {
        v & 0xff
      }),
      Dwh => self.data(DataKind::Byte, Width::I8, operand, label_id, |v| {
        (v >> 8) & 0xff
      }),
      Dd => self.data(DataKind::Dword, Width::I32, operand, label_id, |v| v),
      Ds => self.reserve(operand, label_id),
      Align => self.align(operand),

      Equ => {
        let name = label_name.ok_or(ErrorType::BadArgs("equ"))?;
        let value = self.eval(operand)?.value;
        let id = self.install_definition(name)?;
        self.define(id, value, Kind::Constant)
      }
      Set => {
        let name = label_name.ok_or(ErrorType::BadArgs("set"))?;
        let value = self.eval_defined(operand)?.value;
        let id = self.install_definition(name)?;
        self.define(id, value, Kind::Variable)
      }
      Rsset => {
        self.rs = self.eval_defined(operand)?.value;
        Ok(())
      }
      Rs => {
        let size = if operand.is_empty() {
          1
        } else {
          self.eval_defined(operand)?.value
        };
        if let Some(name) = label_name {
          let id = self.install_definition(name)?;
          let rs = self.rs;
          self.define(id, rs, Kind::Constant)?;
        }
        self.rs += size;
        Ok(())
      }

      Include => self.include(operand),
      Incbin => self.include_data(DataKind::Binary, operand, label_id),
      Incchr => self.include_data(DataKind::Chr, operand, label_id),
      Incspr => self.include_data(DataKind::Spr, operand, label_id),
      Incpal => self.include_data(DataKind::Pal, operand, label_id),
      Incbat => self.include_data(DataKind::Bat, operand, label_id),
      Inctile => self.include_data(DataKind::Tile, operand, label_id),

      Macro => self.start_macro(label_name, operand),
      Rept => self.start_rept(operand),
      Endm => Err(ErrorType::Unmatched("endm")),
      Endr => Err(ErrorType::Unmatched("endr")),
      Exitm => self.exit_macro(),

      If => self.cond_if(operand),
      Ifdef => self.cond_ifdef(operand, true),
      Ifndef => self.cond_ifdef(operand, false),
      Else => self.conds.flip(),
      Endif => self.conds.pop(),

      Func => self.define_function(label_name, operand),
      Proc | Procgroup => {
        let kind = if d == Proc {
          ProcKind::Proc
        } else {
          ProcKind::Group
        };
        match label_name {
          Some(name) if operand.is_empty() => self.open_proc(kind, name),
          Some(name) => self.open_proc(kind, &format!("{}, {}", name, operand)),
          None => self.open_proc(kind, operand),
        }
      }
      Endp => self.close_proc(ProcKind::Proc),
      Endprocgroup => self.close_proc(ProcKind::Group),
      Struct => self.open_struct(label_name, operand),
      Ends => self.close_struct(),
      Alias => self.define_alias(label_name, operand),

      Fail => Err(ErrorType::User(message(operand))),
      Warn => Err(ErrorType::UserWarning(message(operand))),
      List => {
        self.listing.set_enabled(true);
        Ok(())
      }
      Nolist => {
        self.listing.set_enabled(false);
        Ok(())
      }
      Mlist => {
        self.listing.set_macros(true);
        Ok(())
      }
      Nomlist => {
        self.listing.set_macros(false);
        Ok(())
      }

      Inesprg => self.ines(d, operand).map(|v| self.header.prg_banks = Some(v)),
      Ineschr => self.ines(d, operand).map(|v| self.header.chr_banks = Some(v)),
      Inesmap => self.ines(d, operand).map(|v| self.header.mapper = Some(v)),
      Inesmir => self.ines(d, operand).map(|v| self.header.mirroring = Some(v)),
    }
  }

  /// Handles the `.db` family: each argument is an expression written as
  /// `width`, or (for bytes) a string.
  fn data(
    &mut self,
    kind: DataKind,
    width: Width,
    operand: &str,
    label: Option<SymbolId>,
    map: impl Fn(i32) -> i32,
  ) -> Result<(), ErrorType> {
    self.check_rom_section()?;
    let args = split_args(operand);
    if args.iter().all(|a| a.is_empty()) {
      return Err(ErrorType::BadArgs(kind.name()));
    }

    let mut count = 0;
    let mut size = 0;
    for arg in args {
      if let Some(bytes) = string_arg(arg) {
        if width != Width::I8 {
          return Err(ErrorType::StringInExpr);
        }
        count += bytes.len();
        size += bytes.len();
        self.emit_all(bytes)?;
        continue;
      }

      let value = map(self.eval(arg)?.value);
      if self.pass == Pass::Final && !width.in_range(value) {
        self.report(ErrorType::OperandRange(value));
      }
      count += 1;
      size += width.bytes();
      self.emit_all(width.le_bytes(value))?;
    }

    if let Some(id) = label {
      let sym = self.symbols.sym_mut(id);
      sym.data_kind = Some(kind);
      sym.data_size = size as i32;
      sym.data_count = count as i32;
    }
    Ok(())
  }

  /// Handles `.ds size[, fill]`: fills in ROM, merely advances in RAM.
  fn reserve(
    &mut self,
    operand: &str,
    label: Option<SymbolId>,
  ) -> Result<(), ErrorType> {
    let args = split_args(operand);
    let size = match args.get(0) {
      Some(arg) if !arg.is_empty() => self.eval_defined(arg)?.value,
      _ => return Err(ErrorType::BadArgs("ds")),
    };
    if !(0..=0x10000).contains(&size) {
      return Err(ErrorType::OperandRange(size));
    }
    let fill = match args.get(1) {
      Some(arg) => self.eval(arg)?.value,
      None => 0,
    };

    if let Some(id) = label {
      let sym = self.symbols.sym_mut(id);
      sym.data_kind = Some(DataKind::Byte);
      sym.data_size = size;
      sym.data_count = size;
    }
    self.fill(size as u32, fill as u8)
  }

  /// Handles `.align n`: pads to the next address that is a multiple of `n`.
  fn align(&mut self, operand: &str) -> Result<(), ErrorType> {
    let n = self.eval_defined(operand)?.value;
    if !(1..=0x2000).contains(&n) {
      return Err(ErrorType::OperandRange(n));
    }
    let pad = (n - self.pc().rem_euclid(n)) % n;
    self.fill(pad as u32, 0)
  }

  /// Skips `n` bytes, writing `byte` into them unless the current section is
  /// RAM.
  fn fill(&mut self, n: u32, byte: u8) -> Result<(), ErrorType> {
    if self.section.is_ram() {
      return self.advance(n);
    }
    for _ in 0..n {
      self.emit(byte)?;
    }
    Ok(())
  }

  /// Handles `name .func body`.
  fn define_function(
    &mut self,
    name: Option<&str>,
    body: &str,
  ) -> Result<(), ErrorType> {
    let name = name.ok_or(ErrorType::BadArgs("func"))?;
    if body.is_empty() {
      return Err(ErrorType::BadArgs("func"));
    }
    let id = self.symbols.install(name);
    let sym = self.symbols.sym_mut(id);
    let clash = match sym.kind {
      Kind::Undefined => false,
      Kind::Function => sym.defined,
      _ => sym.is_known(),
    };
    if clash || sym.builtin {
      return Err(ErrorType::Redefined(name.to_string()));
    }
    sym.kind = Kind::Function;
    sym.func_body = Some(body.into());
    sym.defined = true;
    Ok(())
  }

  /// Handles `name .alias target`.
  fn define_alias(
    &mut self,
    name: Option<&str>,
    target: &str,
  ) -> Result<(), ErrorType> {
    let name = name.ok_or(ErrorType::BadArgs("alias"))?;
    let target = target.trim();
    if target.is_empty() {
      return Err(ErrorType::BadArgs("alias"));
    }
    let id = self.install_definition(name)?;
    let target = self.resolve(target)?;
    if target == id {
      return Err(ErrorType::AliasLoop(name.to_string()));
    }

    let sym = self.symbols.sym_mut(id);
    match sym.kind {
      Kind::Alias if sym.defined && sym.alias != Some(target) => {
        return Err(ErrorType::Redefined(name.to_string()))
      }
      Kind::Undefined | Kind::Alias => {}
      _ if !sym.defined => {}
      _ => return Err(ErrorType::Redefined(name.to_string())),
    }
    sym.kind = Kind::Alias;
    sym.alias = Some(target);
    sym.defined = true;
    Ok(())
  }

  /// Handles `.struct name`: members that follow are scoped under `name`
  /// and numbered by `.rs` from zero.
  fn open_struct(
    &mut self,
    label: Option<&str>,
    operand: &str,
  ) -> Result<(), ErrorType> {
    let name = match label {
      Some(name) => name,
      None => split_args(operand)
        .into_iter()
        .next()
        .filter(|n| !n.is_empty())
        .ok_or(ErrorType::BadArgs("struct"))?,
    };
    let id = self.install_definition(name)?;
    let key = self.sym(id).name.clone();
    self.structs.push(StructFrame {
      name: key.clone(),
      saved_rs: self.rs,
    });
    self.scopes.push(key);
    self.rs = 0;
    Ok(())
  }

  /// Handles `.ends`: defines the struct's name as its size.
  fn close_struct(&mut self) -> Result<(), ErrorType> {
    let frame = self.structs.pop().ok_or(ErrorType::Unmatched("ends"))?;
    self.scopes.pop();
    let size = self.rs;
    self.rs = frame.saved_rs;
    let id = self.symbols.install(&frame.name);
    self.define(id, size, Kind::Constant)
  }

  /// Evaluates the argument of an `.ines*` directive.
  fn ines(&mut self, d: Directive, operand: &str) -> Result<u8, ErrorType> {
    let value = self.eval_defined(operand)?.value;
    if !(0..=0xff).contains(&value) {
      return Err(ErrorType::OperandRange(value));
    }
    tracing::trace!(directive = d.name(), value, "ines header");
    Ok(value as u8)
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;

  #[test]
  fn names() {
    assert_eq!(Directive::from_name("BYTE"), Some(Directive::Db));
    assert_eq!(Directive::from_name("error"), Some(Directive::Fail));
    assert_eq!(Directive::Dd.name(), "dd");
    assert_eq!(Directive::from_name("frob"), None);
    assert!(Directive::Db.dotless());
    assert!(!Directive::Set.dotless());
    assert!(Directive::Equ.takes_label());
    assert!(!Directive::Db.takes_label());
  }

  #[test]
  fn data_directives() {
    let out = assemble_text(
      "
  .org $e000
bytes: .db 1, \"AB\", -1
  .dw $1234, bytes
  dwl $1234, $5678
  dwh $1234, $5678
  .dd $12345678
",
    )
    .unwrap();
    assert_eq!(
      bytes(&out, 0, 0, 18),
      vec![
        0x01, 0x41, 0x42, 0xff, //
        0x34, 0x12, 0x00, 0xe0, //
        0x34, 0x78, //
        0x12, 0x56, //
        0x78, 0x56, 0x34, 0x12, //
        0, 0,
      ]
    );
    assert_eq!(out.image.get(0, 16), None);
  }

  #[test]
  fn data_ranges() {
    let errors = assemble_text("  .org $e000\n  .db 256\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::OperandRange(256));
    let errors = assemble_text("  .org $e000\n  .dw \"no\"\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::StringInExpr);
  }

  #[test]
  fn reserve_and_align() {
    let out = assemble_text(
      "
  .org $e000
  .db 1
  .align 4
  .db 2
  .ds 2, $ff
  .db 3
  .bss
buf: .ds 16
after_buf:
  .code
  .db 4
",
    )
    .unwrap();
    assert_eq!(
      bytes(&out, 0, 0, 9),
      vec![1, 0, 0, 0, 2, 0xff, 0xff, 3, 4]
    );
    assert_eq!(out.lookup("buf"), Some(0x2200));
    assert_eq!(out.lookup("after_buf"), Some(0x2210));
  }

  #[test]
  fn equates_and_variables() {
    let out = assemble_text(
      "
size = end - start
port equ $0402
  .org $e000
start:
  .db size
end:
n .set 1
n .set n + 1
  .db n
",
    )
    .unwrap();
    assert_eq!(out.lookup("size"), Some(1));
    assert_eq!(out.lookup("port"), Some(0x402));
    assert_eq!(bytes(&out, 0, 0, 2), vec![1, 2]);

    let errors = assemble_text("a = 1\na = 2\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::Redefined("a".into()));
  }

  #[test]
  fn rs_counters() {
    let out = assemble_text(
      "
  .rsset $20
x .rs 1
y .rs 2
z .rs
",
    )
    .unwrap();
    assert_eq!(out.lookup("x"), Some(0x20));
    assert_eq!(out.lookup("y"), Some(0x21));
    assert_eq!(out.lookup("z"), Some(0x23));
  }

  #[test]
  fn structs() {
    let out = assemble_text(
      "
  .rsset 7
point .struct
x .rs 2
y .rs 2
  .ends
after .rs 1
",
    )
    .unwrap();
    assert_eq!(out.lookup("point.x"), Some(0));
    assert_eq!(out.lookup("point.y"), Some(2));
    assert_eq!(out.lookup("point"), Some(4));
    assert_eq!(out.lookup("after"), Some(7));

    let errors = assemble_text("s .struct\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::StructOpen("s".into()));
  }

  #[test]
  fn aliases() {
    let out = assemble_text(
      "
  .org $e000
reset:
  nop
start .alias reset
  jmp start
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 1, 3), vec![0x4c, 0x00, 0xe0]);
  }

  #[test]
  fn user_messages() {
    let errors = assemble_text("  .fail \"stop here\"\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::User("stop here".into()));

    let out = assemble_text("  .warn \"careful\"\n").unwrap();
    assert_eq!(out.warnings.len(), 1);
  }

  #[test]
  fn ines_header() {
    let out = assemble_text(
      "  .inesprg 2\n  .ineschr 1\n  .inesmap 4\n  .inesmir 1\n",
    )
    .unwrap();
    assert_eq!(out.header.prg_banks, Some(2));
    assert_eq!(out.header.chr_banks, Some(1));
    assert_eq!(out.header.mapper, Some(4));
    assert_eq!(out.header.mirroring, Some(1));

    let errors = assemble_text("  .inesprg 300\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::OperandRange(300));
  }
}
