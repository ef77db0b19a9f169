//! Procedures: `.proc`, `.procgroup`, stripping, bank packing and call
//! trampolines.
//!
//! Until relocation every top-level procedure or group (a *unit*) is assembled
//! in a virtual bank of its own, starting at offset 0. After the layout has
//! settled, units that nothing outside procedures can reach are stripped, and
//! the rest are packed into the free space of the real banks, largest first,
//! each into the gap that leaves the least space over. Children of a unit move
//! with it.
//!
//! A `call` into a procedure in another bank goes through a small trampoline
//! that maps the callee's bank, calls it, and restores the old mapping.
//! Trampolines take the highest free space left in the trampoline bank, one
//! per callee, the first time such a call is assembled.
//!
//! Groups only tie their members together for placement; member names stay
//! in the scope the group was opened in.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Write as _;

use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::config::CallStyle;
use crate::isa::Cpu;
use crate::rom::Section;
use crate::syn::args::split_args;

/// An index into the procedure table.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ProcId(usize);

/// Whether an entry is a procedure or a group of them.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ProcKind {
  /// `.proc`.
  Proc,
  /// `.procgroup`.
  Group,
}

/// Where a procedure lives.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum ProcBank {
  /// Not placed yet; assembled in its virtual bank.
  Unassigned,
  /// Unreachable; parsed but never emitted.
  Stripped,
  /// Pinned to the trampoline bank, below the trampolines.
  Trampoline,
  /// Placed in a real bank.
  Bank(u32),
}

/// A procedure or procedure group.
#[derive(Clone, Debug)]
pub struct Proc {
  /// The procedure's name.
  pub name: String,
  /// The label the procedure defines.
  pub symbol: SymbolId,
  /// The enclosing procedure or group.
  pub parent: Option<ProcId>,
  /// Procedure or group.
  pub kind: ProcKind,
  /// The offset of the first byte within its bank.
  pub org: u16,
  /// The offset within the virtual bank, before relocation.
  pub orig_org: u16,
  /// The size in bytes, as of the last `.endp`.
  pub size: u16,
  /// The size the packer placed.
  pub placed_size: Option<u16>,
  /// The bank assignment.
  pub bank: ProcBank,
  /// The logical address of this procedure's trampoline, 0 if none.
  pub call: u16,
  /// Whether `.proc` was seen during this pass.
  pub defined: bool,
  /// The conditional nesting depth at `.proc`.
  pub cond_depth: usize,
  /// Procedures nested inside this one.
  pub children: Vec<ProcId>,
}

/// Location state saved when a unit is entered.
#[derive(Copy, Clone, Debug)]
pub(in crate::asm) struct Saved {
  pub loc: crate::asm::emit::Loc,
  pub section: Section,
}

/// Every procedure seen so far, plus the ones currently open.
#[derive(Clone, Debug, Default)]
pub struct ProcTable {
  procs: Vec<Proc>,
  by_name: HashMap<String, ProcId>,
  open: Vec<(ProcId, Option<Saved>)>,
  refs: Vec<(Option<ProcId>, SymbolId)>,
}

impl ProcTable {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Returns the procedure behind `id`.
  pub fn get(&self, id: ProcId) -> &Proc {
    &self.procs[id.0]
  }

  fn get_mut(&mut self, id: ProcId) -> &mut Proc {
    &mut self.procs[id.0]
  }

  /// Looks a procedure up by name.
  pub fn by_name(&self, name: &str) -> Option<ProcId> {
    self.by_name.get(name).copied()
  }

  /// Returns the innermost open procedure.
  pub fn current(&self) -> Option<ProcId> {
    self.open.last().map(|&(id, _)| id)
  }

  /// Returns the number of open procedures.
  pub fn depth(&self) -> usize {
    self.open.len()
  }

  /// Returns whether the innermost open procedure (or any it is nested in) is
  /// stripped.
  pub fn in_stripped(&self) -> bool {
    self
      .current()
      .map(|id| self.get(self.unit_of(id)).bank == ProcBank::Stripped)
      .unwrap_or(false)
  }

  /// Iterates over every procedure.
  pub fn iter(&self) -> impl Iterator<Item = (ProcId, &Proc)> {
    self.procs.iter().enumerate().map(|(i, p)| (ProcId(i), p))
  }

  /// Returns the top-level ancestor of `id`.
  pub fn unit_of(&self, mut id: ProcId) -> ProcId {
    while let Some(parent) = self.get(id).parent {
      id = parent;
    }
    id
  }

  /// Records that code inside `from` (or outside any procedure) referenced
  /// `sym`.
  pub fn record_ref(&mut self, from: Option<ProcId>, sym: SymbolId) {
    self.refs.push((from, sym));
  }

  /// Rolls the table over into a new pass.
  pub fn start_pass(&mut self) {
    for p in &mut self.procs {
      p.defined = false;
    }
    self.open.clear();
  }

  /// Returns the descendants of `id`, including itself.
  fn family(&self, id: ProcId) -> Vec<ProcId> {
    let mut out = vec![id];
    let mut i = 0;
    while i < out.len() {
      out.extend(self.get(out[i]).children.iter().copied());
      i += 1;
    }
    out
  }
}

/// Encodes a call trampoline that maps `bank` through `page`, calls `target`
/// and restores the previous mapping.
pub fn trampoline_bytes(
  style: CallStyle,
  page: u8,
  bank: u8,
  target: u16,
) -> Vec<u8> {
  let mpr = 1u8 << (page & 7);
  let [lo, hi] = target.to_le_bytes();
  let body = [
    0x43, mpr, // tma #mpr
    0x48, // pha
    0xa9, bank, // lda #bank
    0x53, mpr, // tam #mpr
  ];
  let call = [0x20, lo, hi]; // jsr target
  let restore = [
    0x68, // pla
    0x53, mpr, // tam #mpr
  ];

  let mut out = Vec::with_capacity(18);
  match style {
    CallStyle::Legacy => {
      out.extend_from_slice(&body);
      out.extend_from_slice(&call);
      out.extend_from_slice(&restore);
    }
    CallStyle::New => {
      out.push(0x42); // say
      out.extend_from_slice(&body);
      out.push(0x42);
      out.extend_from_slice(&call);
      out.push(0x42);
      out.extend_from_slice(&restore);
      out.push(0x42);
    }
  }
  out.push(0x60); // rts
  out
}

/// Returns the size of a trampoline of the given style.
pub fn trampoline_len(style: CallStyle) -> u16 {
  match style {
    CallStyle::Legacy => 14,
    CallStyle::New => 18,
  }
}

impl Assembler {
  /// Handles `.proc name[, bank]` and `.procgroup name`.
  pub(in crate::asm) fn open_proc(
    &mut self,
    kind: ProcKind,
    operand: &str,
  ) -> Result<(), ErrorType> {
    let args = split_args(operand);
    let name = match args.get(0) {
      Some(name) if !name.is_empty() => name.to_string(),
      _ => return Err(ErrorType::BadArgs("proc")),
    };
    let pinned = match args.get(1) {
      Some(bank) => {
        let bank = self.eval_defined(bank)?.value;
        if bank < 0 || bank as u32 > self.config.max_bank {
          return Err(ErrorType::OperandRange(bank));
        }
        Some(bank as u32)
      }
      None => None,
    };

    let parent = self.procs.current();
    let symbol = self.install_definition(&name)?;
    let id = match self.procs.by_name(&name) {
      Some(id) => {
        if self.procs.get(id).defined {
          return Err(ErrorType::Redefined(name));
        }
        id
      }
      None => {
        let id = ProcId(self.procs.procs.len());
        let bank = match pinned {
          Some(b) if b == self.config.trampoline_bank => ProcBank::Trampoline,
          Some(b) => ProcBank::Bank(b),
          None => ProcBank::Unassigned,
        };
        self.procs.procs.push(Proc {
          name: name.clone(),
          symbol,
          parent,
          kind,
          org: 0,
          orig_org: 0,
          size: 0,
          placed_size: None,
          bank,
          call: 0,
          defined: false,
          cond_depth: 0,
          children: Vec::new(),
        });
        self.procs.by_name.insert(name.clone(), id);
        if let Some(parent) = parent {
          self.procs.get_mut(parent).children.push(id);
        }
        id
      }
    };

    let cond_depth = self.conds.depth();
    let p = self.procs.get_mut(id);
    p.defined = true;
    p.cond_depth = cond_depth;

    // Top-level units switch to their own location; children continue
    // wherever their parent is.
    let saved = if parent.is_none() {
      let saved = Saved {
        loc: self.loc(),
        section: self.section,
      };
      self.section = Section::Code;
      let page = self.config.proc_page;
      let p = self.procs.get(id);
      let (bank, org) = match p.bank {
        ProcBank::Bank(b) if p.placed_size.is_some() || pinned.is_some() => {
          (b, p.org)
        }
        ProcBank::Trampoline if p.placed_size.is_some() => {
          (self.config.trampoline_bank, p.org)
        }
        _ => (VIRTUAL_BANK, 0),
      };
      self.set_loc(crate::asm::emit::Loc {
        bank,
        page,
        offset: org,
      });
      Some(saved)
    } else {
      None
    };

    let offset = self.loc().offset;
    let relocated = self.procs.get(id).placed_size.is_some()
      || self.procs.get(self.procs.unit_of(id)).placed_size.is_some();
    if !relocated {
      self.procs.get_mut(id).orig_org = offset;
    }
    self.procs.get_mut(id).org = offset;
    self.procs.open.push((id, saved));

    // The proc's own label belongs to it.
    let pc = self.pc();
    self.define(symbol, pc, Kind::Location)?;
    self.symbols.sym_mut(symbol).proc = Some(id);
    self.last_label = Some(symbol);
    if kind == ProcKind::Proc {
      self.scopes.push(self.sym(symbol).name.clone());
    }
    Ok(())
  }

  /// Handles `.endp` and `.endprocgroup`.
  pub(in crate::asm) fn close_proc(
    &mut self,
    kind: ProcKind,
  ) -> Result<(), ErrorType> {
    let (id, saved) = match self.procs.open.last() {
      Some(&(id, saved)) if self.procs.get(id).kind == kind => (id, saved),
      _ => return Err(ErrorType::EndpWithoutProc),
    };
    if self.procs.get(id).cond_depth != self.conds.depth() {
      return Err(ErrorType::ProcIfMismatch);
    }
    self.procs.open.pop();
    if kind == ProcKind::Proc {
      self.scopes.pop();
    }

    let size = self.loc().offset.wrapping_sub(self.procs.get(id).org);
    let p = self.procs.get_mut(id);
    if let Some(placed) = p.placed_size {
      if placed != size {
        return Err(ErrorType::ProcGrew(p.name.clone(), placed, size));
      }
    }
    p.size = size;

    if let Some(saved) = saved {
      self.section = saved.section;
      self.set_loc(saved.loc);
    }
    Ok(())
  }

  /// Removes every unit nothing outside procedures can reach.
  pub(in crate::asm) fn strip_procs(&mut self) {
    let unit_of_sym = |asm: &Self, sym: SymbolId| {
      let sym = asm.defined_candidate(sym);
      asm.sym(sym).proc.map(|p| asm.procs.unit_of(p))
    };

    let mut edges: HashMap<ProcId, Vec<ProcId>> = HashMap::new();
    let mut live = Vec::new();
    for &(from, sym) in &self.procs.refs {
      let to = match unit_of_sym(self, sym) {
        Some(to) => to,
        None => continue,
      };
      match from {
        None => live.push(to),
        Some(from) => {
          let from = self.procs.unit_of(from);
          if from != to {
            edges.entry(from).or_default().push(to);
          }
        }
      }
    }

    let mut reached = HashSet::new();
    while let Some(unit) = live.pop() {
      if reached.insert(unit) {
        live.extend(edges.get(&unit).into_iter().flatten().copied());
      }
    }

    let units = self
      .procs
      .iter()
      .filter(|(_, p)| p.parent.is_none())
      .map(|(id, _)| id)
      .collect::<Vec<_>>();
    for unit in units {
      if reached.contains(&unit) {
        continue;
      }
      tracing::debug!(unit = %self.procs.get(unit).name, "stripping");
      for id in self.procs.family(unit) {
        self.procs.get_mut(id).bank = ProcBank::Stripped;
      }
    }
    self.procs.refs.clear();
  }

  /// Returns the symbol a first-pass reference to `id` ended up meaning.
  ///
  /// A forward reference made inside a scope installs the innermost key,
  /// such as `outer.name`, even when `name` is defined later at an outer
  /// level; such keys are walked outwards to the defined symbol.
  fn defined_candidate(&self, id: SymbolId) -> SymbolId {
    let mut name = self.sym(id).name.as_str();
    loop {
      if let Some(found) = self.symbols.get(name) {
        if self.sym(found).defined {
          return found;
        }
      }
      match name.find('.') {
        Some(i) if i > 0 => name = &name[i + 1..],
        _ => return id,
      }
    }
  }

  /// Packs every unit into a real bank and moves its symbols there.
  pub(in crate::asm) fn relocate(&mut self) -> Result<(), ErrorType> {
    let tramp_bank = self.config.trampoline_bank;
    let mut units = self
      .procs
      .iter()
      .filter(|(_, p)| p.parent.is_none() && p.bank != ProcBank::Stripped)
      .map(|(id, p)| (id, p.size))
      .collect::<Vec<_>>();
    // Largest first; ties keep source order.
    units.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut used = self.usage.clone();
    let mut bank_count = used.bank_count().max(tramp_bank as usize + 1);

    for (unit, size) in units {
      let placement = match self.procs.get(unit).bank {
        ProcBank::Bank(b) => used.best_fit_in(b, size).map(|o| (b, o)),
        ProcBank::Trampoline => {
          used.best_fit_in(tramp_bank, size).map(|o| (tramp_bank, o))
        }
        _ => {
          let candidates =
            (0..bank_count as u32).filter(|&b| b != tramp_bank);
          match used.best_fit(candidates, size) {
            Some(p) => Some(p),
            None => {
              // Open a fresh bank.
              let mut b = bank_count as u32;
              if b == tramp_bank {
                b += 1;
              }
              if b > self.config.max_bank {
                None
              } else {
                bank_count = b as usize + 1;
                Some((b, 0))
              }
            }
          }
        }
      };

      let (bank, org) = match placement {
        Some(p) => p,
        None => {
          return Err(ErrorType::NoBankForProc(
            self.procs.get(unit).name.clone(),
            size,
          ))
        }
      };
      used.mark(bank, org, size);
      tracing::debug!(
        unit = %self.procs.get(unit).name,
        bank,
        org,
        size,
        "placed"
      );

      let delta = org as i32 - self.procs.get(unit).orig_org as i32;
      let pinned = self.procs.get(unit).bank == ProcBank::Trampoline;
      for id in self.procs.family(unit) {
        let p = self.procs.get_mut(id);
        p.bank = if pinned {
          ProcBank::Trampoline
        } else {
          ProcBank::Bank(bank)
        };
        p.org = (p.orig_org as i32 + delta) as u16;
        p.placed_size = Some(p.size);
      }
      self.move_symbols(unit, bank, delta);
    }

    let count = bank_count.max(used.bank_count()) as i32;
    self.symbols.sym_mut(self.bank_count_sym).value = count;
    self.layout = used;
    Ok(())
  }

  /// Shifts every symbol owned by `unit` or its descendants.
  fn move_symbols(&mut self, unit: ProcId, bank: u32, delta: i32) {
    let family = self.procs.family(unit).into_iter().collect::<HashSet<_>>();
    for sym in self.symbols.iter_mut() {
      let owned = sym.proc.map(|p| family.contains(&p)).unwrap_or(false);
      if !owned || sym.kind != Kind::Location {
        continue;
      }
      sym.value += delta;
      sym.bank = bank;
      sym.prev_value = sym.value;
      sym.prev_bank = bank;
    }
  }

  /// Returns the address a `call` to `target` should use, allocating a
  /// trampoline if the callee sits in another bank.
  pub(in crate::asm) fn call_target(
    &mut self,
    target: SymbolId,
    value: i32,
  ) -> Result<i32, ErrorType> {
    let id = match self.sym(target).proc {
      Some(id) if self.procs.get(id).symbol == target => id,
      _ => return Ok(value),
    };
    let callee_bank = match self.procs.get(id).bank {
      ProcBank::Bank(b) if self.procs.get(id).placed_size.is_some() => b,
      _ => return Ok(value),
    };
    if callee_bank == self.loc().bank {
      return Ok(value);
    }
    if self.cpu < Cpu::Huc {
      return Err(ErrorType::CrossBankCall(self.procs.get(id).name.clone()));
    }

    let page = self.config.trampoline_page as i32;
    if self.procs.get(id).call == 0 {
      let len = trampoline_len(self.config.call_style);
      let tramp_bank = self.config.trampoline_bank;
      let start = match self.layout.top_fit_in(tramp_bank, len) {
        Some(start) => start,
        None => {
          return Err(ErrorType::TrampolineFull(self.free_space_report()))
        }
      };
      self.layout.mark(tramp_bank, start, len);
      self.procs.get_mut(id).call = start;
      tracing::debug!(callee = %self.procs.get(id).name, start, "trampoline");
    }
    Ok((page << 13) | self.procs.get(id).call as i32)
  }

  fn free_space_report(&self) -> String {
    let mut out = String::new();
    for bank in 0..self.layout.bank_count() as u32 {
      let free = self.layout.free(bank);
      let _ = write!(out, "\n  bank ${:02x}: {} bytes free", bank, free);
    }
    out
  }

  /// Writes every allocated trampoline into the image.
  pub(in crate::asm) fn write_trampolines(&mut self) -> Result<(), ErrorType> {
    let style = self.config.call_style;
    let bank = self.config.trampoline_bank;
    let tramps = self
      .procs
      .iter()
      .filter(|(_, p)| p.call != 0)
      .filter_map(|(_, p)| match p.bank {
        ProcBank::Bank(b) => Some((p.call, b, self.sym(p.symbol).value)),
        _ => None,
      })
      .collect::<Vec<_>>();
    for (offset, callee_bank, target) in tramps {
      let bytes = trampoline_bytes(
        style,
        self.config.proc_page,
        callee_bank as u8,
        target as u16,
      );
      for (i, byte) in bytes.into_iter().enumerate() {
        self
          .image
          .write(bank, offset + i as u16, byte, Section::Trampoline)
          .map_err(ErrorType::Rom)?;
      }
    }
    Ok(())
  }

  /// Reports procedures left open at the end of a pass.
  pub(in crate::asm) fn check_procs_closed(&mut self) -> Option<ErrorType> {
    let (id, _) = *self.procs.open.last()?;
    Some(ErrorType::ProcOpen(self.procs.get(id).name.clone()))
  }

  /// Returns whether the pass should treat procedure placement as final.
  pub(in crate::asm) fn relocated(&self) -> bool {
    matches!(self.pass, Pass::Extra | Pass::Final)
  }
}

/// The bank virtual (not yet placed) units are assembled in.
pub(in crate::asm) const VIRTUAL_BANK: u32 = 0xfff;

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::test::assemble_text;
  use crate::asm::test::assemble_with;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;
  use crate::config::Config;

  #[test]
  fn trampoline_shapes() {
    let legacy = trampoline_bytes(CallStyle::Legacy, 6, 3, 0xc000);
    assert_eq!(legacy.len(), trampoline_len(CallStyle::Legacy) as usize);
    assert_eq!(
      legacy,
      vec![
        0x43, 0x40, 0x48, 0xa9, 0x03, 0x53, 0x40, 0x20, 0x00, 0xc0, 0x68,
        0x53, 0x40, 0x60
      ]
    );

    let new = trampoline_bytes(CallStyle::New, 6, 3, 0xc000);
    assert_eq!(new.len(), trampoline_len(CallStyle::New) as usize);
    assert_eq!(new[0], 0x42);
    assert_eq!(new[17], 0x60);
  }

  #[test]
  fn groups_move_as_one() {
    let out = assemble_text(
      "
  .org $e000
  jsr g1
  rts
  .procgroup grp
  .proc g1
  jsr g2
  rts
  .endp
  .proc g2
  lda #1
  rts
  .endp
  .endprocgroup
  .procgroup dead
  .proc d1
  jsr d2
  rts
  .endp
  .proc d2
  rts
  .endp
  .endprocgroup
",
    )
    .unwrap();
    let procs = out.procs();
    let get = |name| procs.get(procs.by_name(name).unwrap());
    assert_eq!(get("grp").bank, ProcBank::Bank(1));
    assert_eq!(get("g1").bank, ProcBank::Bank(1));
    assert_eq!(get("g2").bank, ProcBank::Bank(1));
    assert_eq!(get("g1").org - get("grp").org, 0);
    assert_eq!(get("g2").org - get("grp").org, 4);
    for name in ["dead", "d1", "d2"].iter().copied() {
      assert_eq!(get(name).bank, ProcBank::Stripped);
    }

    assert_eq!(out.lookup("g2"), Some(0xc004));
    assert_eq!(bytes(&out, 0, 0, 4), vec![0x20, 0x00, 0xc0, 0x60]);
    assert_eq!(
      bytes(&out, 1, 0, 7),
      vec![0x20, 0x04, 0xc0, 0x60, 0xa9, 0x01, 0x60]
    );
  }

  #[test]
  fn pinned_banks_are_checked() {
    let errors = assemble_text("  .proc far, $200
  rts
  .endp
").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::OperandRange(0x200));
    let errors = assemble_text("  .proc far, -1
  rts
  .endp
").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::OperandRange(-1));
  }

  #[test]
  fn procedures_stay_in_one_bank() {
    let errors = assemble_text(
      "  .org $e000
  jsr big
  rts
  .proc big
  .ds $2000
  rts
  .endp
",
    )
    .unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::ProcStraddle("big".into()));
  }

  #[test]
  fn procedures_close_at_their_depth() {
    let errors = assemble_text(
      "  .org $e000
  .if 1
  .proc inner
  rts
  .endif
  .endp
",
    )
    .unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::ProcIfMismatch);
  }

  #[test]
  fn running_out_of_banks() {
    let mut config = Config::default();
    config.max_bank = 1;
    let errors = assemble_with(
      config,
      "
  .org $e000
  jsr first
  jsr second
  .proc first
  .ds $1800
  rts
  .endp
  .proc second
  .ds $1800
  rts
  .endp
",
    )
    .unwrap_err();
    assert_eq!(
      first_error(&errors),
      ErrorType::NoBankForProc("second".into(), 0x1801)
    );
  }
}
