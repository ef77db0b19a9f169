//! Instruction encoding.
//!
//! An operand is first classified by its shape alone (`#imm`, `[zp], y`,
//! `addr, x`, ...), then the mnemonic's available addressing modes decide
//! between the zero-page and absolute forms. Relative branches are recorded
//! on every pass but the last, so that the scheduler can promote the ones
//! whose targets are out of reach.

use crate::asm::expr::Value;
use crate::asm::procs::ProcId;
use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::isa::AddrMode;
use crate::isa::Instruction;
use crate::isa::Mnemonic;
use crate::rom::BANK_SIZE;
use crate::syn::args::split_args;

/// The opcode of `jmp abs`.
const JMP_ABS: u8 = 0x4c;
/// The opcode of `jsr abs`.
const JSR_ABS: u8 = 0x20;

/// A relative branch seen during assembly.
#[derive(Clone, Debug)]
pub(in crate::asm) struct Branch {
  bank: u32,
  addr: i32,
  /// The unit the branch sits in.
  unit: Option<ProcId>,
  /// The target symbol, unless the target is a more complex expression.
  target: Option<SymbolId>,
  /// The target's value when the branch was last assembled.
  last_target: i32,
  /// Whether the branch has been promoted to its long form; never undone.
  convert: bool,
}

/// Instruction sizes, by position, for the current and previous pass.
#[derive(Clone, Debug, Default)]
pub(in crate::asm) struct SizeLog {
  prev: Vec<u16>,
  cur: Vec<u16>,
}

impl SizeLog {
  pub fn rollover(&mut self) {
    self.prev = std::mem::take(&mut self.cur);
  }

  /// Records the size of the next instruction. With `check`, it must match
  /// the size the same instruction had last pass.
  pub fn record(&mut self, size: u16, check: bool) -> Result<(), ErrorType> {
    let idx = self.cur.len();
    self.cur.push(size);
    match self.prev.get(idx) {
      Some(&was) if check && was != size => Err(ErrorType::SizeChanged(was, size)),
      _ => Ok(()),
    }
  }
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Index {
  X,
  Y,
}

fn index(arg: &str) -> Option<Index> {
  if arg.eq_ignore_ascii_case("x") {
    Some(Index::X)
  } else if arg.eq_ignore_ascii_case("y") {
    Some(Index::Y)
  } else {
    None
  }
}

/// The shape of an operand.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum Operand<'a> {
  None,
  Acc,
  Imm(&'a str),
  Mem(&'a str, Option<Index>),
  Ind(&'a str),
  IndX(&'a str),
  IndY(&'a str),
  ImmMem(&'a str, &'a str, Option<Index>),
  Pair(&'a str, &'a str),
  Block(&'a str, &'a str, &'a str),
}

/// If `text` opens with `open`, returns the text up to the matching `close`
/// and whatever follows it.
fn bracketed(text: &str, open: char, close: char) -> Option<(&str, &str)> {
  if !text.starts_with(open) {
    return None;
  }
  let mut depth = 0;
  for (i, c) in text.char_indices() {
    if c == open {
      depth += 1;
    } else if c == close {
      depth -= 1;
      if depth == 0 {
        return Some((&text[1..i], text[i + 1..].trim()));
      }
    }
  }
  None
}

/// Classifies an operand by its shape.
///
/// Square brackets always mean indirection. Parentheses do too on machines
/// that use them for it, unless they only wrap part of an expression.
fn parse_operand(text: &str, paren_indirect: bool) -> Option<Operand> {
  let text = text.trim();
  if text.is_empty() {
    return Some(Operand::None);
  }
  if text.eq_ignore_ascii_case("a") {
    return Some(Operand::Acc);
  }

  let args = split_args(text);
  if text.starts_with('#') {
    let imm = args.first()?.get(1..)?;
    return match args.as_slice() {
      [_] => Some(Operand::Imm(imm)),
      [_, mem] => Some(Operand::ImmMem(imm, mem, None)),
      [_, mem, idx] => Some(Operand::ImmMem(imm, mem, Some(index(idx)?))),
      _ => None,
    };
  }

  let mut brackets = vec![('[', ']')];
  if paren_indirect {
    brackets.push(('(', ')'));
  }
  for (open, close) in brackets {
    let (inner, rest) = match bracketed(text, open, close) {
      Some(found) => found,
      None => continue,
    };
    let parts = split_args(inner);
    if rest.is_empty() {
      return match parts.as_slice() {
        [a] => Some(Operand::Ind(a)),
        [a, x] if index(x) == Some(Index::X) => Some(Operand::IndX(a)),
        _ => None,
      };
    }
    if let Some(after) = rest.strip_prefix(',') {
      if index(after.trim()) == Some(Index::Y) && parts.len() == 1 {
        return Some(Operand::IndY(inner.trim()));
      }
    }
    if open == '[' {
      return None;
    }
  }

  match args.as_slice() {
    [m] => Some(Operand::Mem(m, None)),
    [m, i] => match index(i) {
      Some(idx) => Some(Operand::Mem(m, Some(idx))),
      None => Some(Operand::Pair(m, i)),
    },
    [a, b, c] => Some(Operand::Block(a, b, c)),
    _ => None,
  }
}

/// One encoded operand field.
#[derive(Copy, Clone, Debug)]
enum Field {
  Imm(i32),
  /// A zero-page byte; `true` if `<` forced it.
  Zp(i32, bool),
  Abs(i32),
  Rel(i32),
}

impl Assembler {
  /// Assembles one instruction.
  pub(in crate::asm) fn instruction(
    &mut self,
    mne: Mnemonic,
    operand: &str,
  ) -> Result<(), ErrorType> {
    let operand = parse_operand(operand, self.machine.paren_indirect())
      .ok_or(ErrorType::BadAddressing(mne))?;
    if mne.is_branch() {
      return self.branch(mne, operand);
    }

    let (mode, fields) = self.select_mode(mne, operand)?;
    let inst = Instruction::lookup(mne, mode, self.cpu)
      .ok_or(ErrorType::BadAddressing(mne))?;
    self.encode(inst.opcode(), inst.len() as u16, &fields)
  }

  /// Handles `call target`: a `jsr`, through a trampoline if the target is a
  /// procedure in another bank.
  pub(in crate::asm) fn call(&mut self, operand: &str) -> Result<(), ErrorType> {
    let value = self.eval(operand)?;
    let dest = match value.symbol {
      Some(id) if !value.complex => self.call_target(id, value.value)?,
      _ => value.value,
    };
    self.encode(JSR_ABS, 3, &[Field::Abs(dest)])
  }

  /// Evaluates a memory operand; a leading `<` forces the zero page.
  fn mem_operand(&mut self, text: &str) -> Result<(Value, bool), ErrorType> {
    match text.strip_prefix('<') {
      Some(rest) => Ok((self.eval(rest)?, true)),
      None => Ok((self.eval(text)?, false)),
    }
  }

  /// Picks between a zero-page mode and its absolute counterpart.
  ///
  /// The zero-page form is only chosen for values known this pass, so that an
  /// instruction never shrinks once a forward reference resolves.
  fn zp_or_abs(
    &mut self,
    mne: Mnemonic,
    zp: AddrMode,
    text: &str,
  ) -> Result<(AddrMode, Field), ErrorType> {
    let abs = zp.widened().unwrap_or(zp);
    let has_zp = Instruction::lookup(mne, zp, self.cpu).is_some();
    let has_abs = abs != zp && Instruction::lookup(mne, abs, self.cpu).is_some();
    let (value, forced) = self.mem_operand(text)?;

    let use_zp = match (has_zp, has_abs) {
      (true, true) => {
        forced
          || (!value.undef && !value.forward && self.machine.is_zp(value.value))
      }
      (true, false) => true,
      (false, true) => false,
      (false, false) => return Err(ErrorType::BadAddressing(mne)),
    };
    Ok(if use_zp {
      (zp, Field::Zp(value.value, forced))
    } else {
      (abs, Field::Abs(value.value))
    })
  }

  fn select_mode(
    &mut self,
    mne: Mnemonic,
    operand: Operand,
  ) -> Result<(AddrMode, Vec<Field>), ErrorType> {
    let cpu = self.cpu;
    let has = |mode| Instruction::lookup(mne, mode, cpu).is_some();
    Ok(match operand {
      Operand::None if has(AddrMode::Implied) => (AddrMode::Implied, vec![]),
      Operand::None | Operand::Acc => (AddrMode::Acc, vec![]),
      Operand::Imm(e) => (AddrMode::Imm, vec![Field::Imm(self.eval(e)?.value)]),
      Operand::Mem(e, idx) => {
        let zp = match idx {
          None => AddrMode::Zp,
          Some(Index::X) => AddrMode::ZpX,
          Some(Index::Y) => AddrMode::ZpY,
        };
        let (mode, field) = self.zp_or_abs(mne, zp, e)?;
        (mode, vec![field])
      }
      Operand::Ind(e) => {
        let (mode, field) = self.zp_or_abs(mne, AddrMode::ZpInd, e)?;
        (mode, vec![field])
      }
      Operand::IndX(e) => {
        let (mode, field) = self.zp_or_abs(mne, AddrMode::ZpIndX, e)?;
        (mode, vec![field])
      }
      Operand::IndY(e) => {
        let (value, forced) = self.mem_operand(e)?;
        (AddrMode::ZpIndY, vec![Field::Zp(value.value, forced)])
      }
      Operand::ImmMem(i, m, idx) => {
        let zp = match idx {
          None => AddrMode::ImmZp,
          Some(Index::X) => AddrMode::ImmZpX,
          Some(Index::Y) => return Err(ErrorType::BadAddressing(mne)),
        };
        let imm = self.eval(i)?.value;
        let (mode, field) = self.zp_or_abs(mne, zp, m)?;
        (mode, vec![Field::Imm(imm), field])
      }
      Operand::Pair(z, t) if mne.is_bit_branch() => {
        let (zp, forced) = self.mem_operand(z)?;
        let target = self.eval(t)?;
        let offset = target.value - (self.pc() + 3);
        if self.pass == Pass::Final
          && !target.undef
          && !(-128..=127).contains(&offset)
        {
          return Err(ErrorType::BranchRange(offset));
        }
        (
          AddrMode::ZpRel,
          vec![Field::Zp(zp.value, forced), Field::Rel(offset)],
        )
      }
      Operand::Block(a, b, c) => {
        let mut fields = Vec::with_capacity(3);
        for e in [a, b, c] {
          fields.push(Field::Abs(self.eval(e)?.value));
        }
        (AddrMode::Block, fields)
      }
      Operand::Pair(..) => return Err(ErrorType::BadAddressing(mne)),
    })
  }

  /// Checks operand ranges (in the final pass) and emits the instruction.
  fn encode(
    &mut self,
    opcode: u8,
    len: u16,
    fields: &[Field],
  ) -> Result<(), ErrorType> {
    self.check_rom_section()?;
    let final_pass = self.pass == Pass::Final;
    if final_pass {
      for &field in fields {
        match field {
          Field::Imm(v) if !(-128..=0xff).contains(&v) => {
            return Err(ErrorType::OperandRange(v))
          }
          Field::Zp(v, false) if !self.machine.is_zp(v) => {
            return Err(ErrorType::ZpRange(v))
          }
          Field::Abs(v) if !(0..=0xffff).contains(&v) => {
            return Err(ErrorType::OperandRange(v))
          }
          _ => {}
        }
      }
      let end = self.loc().offset as usize + len as usize;
      if end > BANK_SIZE && self.procs.current().is_none() {
        self.report(ErrorType::BankCrossing);
      }
    }
    self.sizes.record(len, final_pass)?;

    let mut bytes = Vec::with_capacity(len as usize);
    bytes.push(opcode);
    for &field in fields {
      match field {
        Field::Imm(v) | Field::Zp(v, _) | Field::Rel(v) => bytes.push(v as u8),
        Field::Abs(v) => bytes.extend_from_slice(&(v as u16).to_le_bytes()),
      }
    }
    self.emit_all(bytes)
  }

  /// Assembles a relative branch, in its long form if an earlier pass found
  /// it out of reach.
  fn branch(&mut self, mne: Mnemonic, operand: Operand) -> Result<(), ErrorType> {
    let target = match operand {
      Operand::Mem(e, None) => e,
      _ => return Err(ErrorType::BadAddressing(mne)),
    };
    let inst = Instruction::lookup(mne, AddrMode::Rel, self.cpu)
      .ok_or(ErrorType::BadAddressing(mne))?;
    let value = self.eval(target)?;
    let loc = self.loc();
    let idx = self.branch_idx;
    self.branch_idx += 1;

    if self.pass != Pass::Final {
      let record = Branch {
        bank: loc.bank,
        addr: loc.addr(),
        unit: self.procs.current().map(|p| self.procs.unit_of(p)),
        target: if value.complex { None } else { value.symbol },
        last_target: value.value,
        convert: false,
      };
      match self.branches.get_mut(idx) {
        Some(b) => {
          b.bank = record.bank;
          b.addr = record.addr;
          b.unit = record.unit;
          b.target = record.target;
          b.last_target = record.last_target;
        }
        None => self.branches.push(record),
      }
    }

    let long = self.branches.get(idx).map_or(false, |b| b.convert);
    if long {
      return self.long_branch(mne, value.value);
    }

    let offset = value.value - (loc.addr() + 2);
    if self.pass == Pass::Final
      && !value.undef
      && !(-128..=127).contains(&offset)
    {
      return Err(ErrorType::BranchRange(offset));
    }
    self.encode(inst.opcode(), 2, &[Field::Rel(offset)])
  }

  /// Emits the long form of a branch: the inverse branch over a `jmp` for
  /// conditional branches, a plain `jmp` for `bra` and `jsr` for `bsr`.
  fn long_branch(&mut self, mne: Mnemonic, target: i32) -> Result<(), ErrorType> {
    if self.pass == Pass::Final && self.config.warn_long_branch {
      self.report(ErrorType::LongBranch(mne));
    }
    match mne.inverse() {
      Some(inverse) => {
        let skip = Instruction::lookup(inverse, AddrMode::Rel, self.cpu)
          .ok_or(ErrorType::BadAddressing(mne))?;
        self.encode(
          skip.opcode(),
          5,
          &[Field::Rel(3), Field::Imm(JMP_ABS as i32), Field::Abs(target)],
        )
      }
      None if mne == Mnemonic::Bsr => {
        self.encode(JSR_ABS, 3, &[Field::Abs(target)])
      }
      None => self.encode(JMP_ABS, 3, &[Field::Abs(target)]),
    }
  }

  /// Promotes every branch whose target is out of reach, in another bank, or
  /// in another relocatable unit. Returns whether any branch was promoted.
  pub(in crate::asm) fn check_branches(&mut self) -> bool {
    if !self.config.auto_branch {
      return false;
    }
    let mut promoted = false;
    for i in 0..self.branches.len() {
      let b = &self.branches[i];
      if b.convert {
        continue;
      }
      let (target, far) = match b.target.map(|id| self.sym(id)) {
        Some(sym) if sym.defined => {
          let rom = sym.section.map_or(false, |s| !s.is_ram());
          let unit = sym.proc.map(|p| self.procs.unit_of(p));
          let elsewhere = sym.bank != b.bank || unit != b.unit;
          (sym.value, sym.kind == Kind::Location && rom && elsewhere)
        }
        _ => (b.last_target, false),
      };
      let offset = target - (b.addr + 2);
      if far || !(-128..=127).contains(&offset) {
        tracing::debug!(addr = b.addr, target, "promoting branch");
        self.branches[i].convert = true;
        promoted = true;
      }
    }
    promoted
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::asm::test::assemble_with;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;
  use crate::config::Config;
  use crate::isa::Cpu;

  #[test]
  fn operand_shapes() {
    assert_eq!(parse_operand("", false), Some(Operand::None));
    assert_eq!(parse_operand("A", false), Some(Operand::Acc));
    assert_eq!(parse_operand("#1", false), Some(Operand::Imm("1")));
    assert_eq!(
      parse_operand("foo, X", false),
      Some(Operand::Mem("foo", Some(Index::X)))
    );
    assert_eq!(parse_operand("[ptr], y", false), Some(Operand::IndY("ptr")));
    assert_eq!(parse_operand("[ptr, x]", false), Some(Operand::IndX("ptr")));
    assert_eq!(parse_operand("(ptr), y", true), Some(Operand::IndY("ptr")));
    assert_eq!(
      parse_operand("(a + 1) * 2", true),
      Some(Operand::Mem("(a + 1) * 2", None))
    );
    assert_eq!(parse_operand("(ptr)", false), Some(Operand::Mem("(ptr)", None)));
    assert_eq!(
      parse_operand("#1, $2000, x", false),
      Some(Operand::ImmMem("1", "$2000", Some(Index::X)))
    );
    assert_eq!(parse_operand("[x]]", false), None);
  }

  #[test]
  fn encodes_and_decodes() {
    let out = assemble_text(
      "
  .org $e000
  lda #$12
  sta $1234
  lda [$20], y
  jmp [$1234]
  asl a
  tii $1000, $2000, $0010
  tst #$80, $2001, x
",
    )
    .unwrap();
    let image = bytes(&out, 0, 0, 21);
    assert_eq!(
      image,
      vec![
        0xa9, 0x12, // lda #$12
        0x8d, 0x34, 0x12, // sta $1234
        0xb1, 0x20, // lda [$20], y
        0x6c, 0x34, 0x12, // jmp [$1234]
        0x0a, // asl a
        0x73, 0x00, 0x10, 0x00, 0x20, 0x10, 0x00, // tii
        0xa3, 0x80, 0x01, // tst #$80, $2001, x
      ]
    );
    let inst = Instruction::decode(image[5], Cpu::Huc).unwrap();
    assert_eq!(inst.mnemonic(), Mnemonic::Lda);
    assert_eq!(inst.addressing_mode(), AddrMode::ZpIndY);
  }

  #[test]
  fn zero_page_selection() {
    let out = assemble_text(
      "
  .org $e000
  lda $10
  lda $2010
  lda $1234
  lda <$3010
  lda later
later = $20
",
    )
    .unwrap();
    assert_eq!(
      bytes(&out, 0, 0, 12),
      vec![0xa5, 0x10, 0xa5, 0x10, 0xad, 0x34, 0x12, 0xa5, 0x10, 0xad, 0x20, 0x00]
    );
  }

  #[test]
  fn short_branch() {
    let out = assemble_text("  .org $2000\nloop: bra loop\n").unwrap();
    assert_eq!(bytes(&out, 0, 0, 2), vec![0x80, 0xfe]);
    assert_eq!(out.lookup("loop"), Some(0x2000));
  }

  #[test]
  fn long_branches() {
    let text = "
  .org $e000
  beq far
  bra far
  bsr far
  .ds 200
far: nop
";
    let out = assemble_text(text).unwrap();
    let far = 0xe000 + 5 + 3 + 3 + 200;
    assert_eq!(out.lookup("far"), Some(far));
    let [lo, hi] = (far as u16).to_le_bytes();
    assert_eq!(
      bytes(&out, 0, 0, 11),
      vec![0xf0, 0x03, 0x4c, lo, hi, 0x4c, lo, hi, 0x20, lo, hi]
    );

    let mut config = Config::default();
    config.auto_branch = false;
    let errors = assemble_with(config, text).unwrap_err();
    assert!(matches!(first_error(&errors), ErrorType::BranchRange(_)));
  }

  #[test]
  fn branches_into_other_banks_are_long() {
    let out = assemble_text(
      "
  .bank 0
  .org $e000
  bra far
  .bank 1
  .org $e000
far: nop
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 3), vec![0x4c, 0x00, 0xe0]);
  }

  #[test]
  fn promotion_sticks() {
    // The first pass cannot see where `later` is, so the branch is promoted;
    // it stays long even though the target turns out to be close.
    let out = assemble_text(
      "
  .org $e000
  beq later + 1
  nop
later: nop
",
    )
    .unwrap();
    assert_eq!(out.lookup("later"), Some(0xe006));
    assert_eq!(bytes(&out, 0, 0, 5), vec![0xf0, 0x03, 0x4c, 0x07, 0xe0]);
  }

  #[test]
  fn multi_labels() {
    let out = assemble_text(
      "
  .org $e000
  bra !+
  nop
!: dex
  bne !-
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 6), vec![0x80, 0x01, 0xea, 0xca, 0xd0, 0xfd]);
  }

  #[test]
  fn range_errors() {
    let errors = assemble_text("  .org $e000\n  lda #$1234\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::OperandRange(0x1234));
    let errors = assemble_text("  .org $e000\n  ldx $1234, y\n  stx $1234, y\n")
      .unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::ZpRange(0x1234));
    let errors = assemble_text("  .org $e000\n  inx #1\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::BadAddressing(Mnemonic::Inx));
  }

  #[test]
  fn size_log() {
    let mut log = SizeLog::default();
    log.record(2, false).unwrap();
    log.rollover();
    assert_eq!(log.record(3, true), Err(ErrorType::SizeChanged(2, 3)));
  }
}
