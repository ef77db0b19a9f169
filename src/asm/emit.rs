//! The location counter and byte emission.
//!
//! Each section keeps its own location: a bank, the MPR page that bank is
//! mapped through, and an offset within the bank. The logical address (the
//! value labels get) is `page << 13 | offset`.

use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::rom::Section;
use crate::rom::BANK_SIZE;

/// A position within the image.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Loc {
  /// The bank being written.
  pub bank: u32,
  /// The MPR page the bank is mapped through.
  pub page: u8,
  /// The offset within the bank.
  pub offset: u16,
}

impl Loc {
  /// Returns the logical address of this location.
  pub fn addr(self) -> i32 {
    ((self.page as i32) << 13) + self.offset as i32
  }
}

/// A map of which bytes of which banks are taken.
#[derive(Clone, Debug, Default)]
pub(in crate::asm) struct Usage {
  banks: Vec<Box<[bool]>>,
}

impl Usage {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn clear(&mut self) {
    self.banks.clear();
  }

  /// Returns the number of banks with any byte taken, counting every bank
  /// below the highest one.
  pub fn bank_count(&self) -> usize {
    self.banks.len()
  }

  pub fn mark(&mut self, bank: u32, start: u16, len: u16) {
    let idx = bank as usize;
    if self.banks.len() <= idx {
      self
        .banks
        .resize_with(idx + 1, || vec![false; BANK_SIZE].into_boxed_slice());
    }
    let end = (start as usize + len as usize).min(BANK_SIZE);
    for used in &mut self.banks[idx][start as usize..end] {
      *used = true;
    }
  }

  /// Returns the number of free bytes in `bank`.
  pub fn free(&self, bank: u32) -> usize {
    match self.banks.get(bank as usize) {
      Some(map) => map.iter().filter(|u| !**u).count(),
      None => BANK_SIZE,
    }
  }

  /// Returns every run of free bytes in `bank`, as `(start, len)`.
  fn gaps(&self, bank: u32) -> Vec<(u16, u16)> {
    let map = match self.banks.get(bank as usize) {
      Some(map) => map,
      None => return vec![(0, BANK_SIZE as u16)],
    };
    let mut gaps = Vec::new();
    let mut start = None;
    for (i, &used) in map.iter().enumerate() {
      match (used, start) {
        (false, None) => start = Some(i),
        (true, Some(s)) => {
          gaps.push((s as u16, (i - s) as u16));
          start = None;
        }
        _ => {}
      }
    }
    if let Some(s) = start {
      gaps.push((s as u16, (BANK_SIZE - s) as u16));
    }
    gaps
  }

  /// Finds the gap in `bank` that holds `size` bytes with the least space
  /// left over, returning its start.
  pub fn best_fit_in(&self, bank: u32, size: u16) -> Option<u16> {
    if size == 0 {
      return Some(0);
    }
    self
      .gaps(bank)
      .into_iter()
      .filter(|&(_, len)| len >= size)
      .min_by_key(|&(_, len)| len - size)
      .map(|(start, _)| start)
  }

  /// Finds the highest `size` bytes that are free in `bank`, returning their
  /// start.
  pub fn top_fit_in(&self, bank: u32, size: u16) -> Option<u16> {
    self
      .gaps(bank)
      .into_iter()
      .rev()
      .find(|&(_, len)| len >= size)
      .map(|(start, len)| start + len - size)
  }

  /// Like `best_fit_in()`, but across several banks. Ties go to the earlier
  /// bank.
  pub fn best_fit(
    &self,
    banks: impl Iterator<Item = u32>,
    size: u16,
  ) -> Option<(u32, u16)> {
    let mut best: Option<(u32, u16, u16)> = None;
    for bank in banks {
      for (start, len) in self.gaps(bank) {
        if len < size {
          continue;
        }
        let left = len - size;
        if best.map_or(true, |(_, _, l)| left < l) {
          best = Some((bank, start, left));
        }
      }
    }
    best.map(|(bank, start, _)| (bank, start))
  }
}

impl Assembler {
  /// Returns the location of the current section.
  pub(in crate::asm) fn loc(&self) -> Loc {
    self.locs.get(&self.section).copied().unwrap_or_default()
  }

  pub(in crate::asm) fn set_loc(&mut self, loc: Loc) {
    self.locs.insert(self.section, loc);
  }

  /// Returns the logical address of the current location.
  pub(in crate::asm) fn pc(&self) -> i32 {
    self.loc().addr()
  }

  /// Puts every section back where a pass starts.
  pub(in crate::asm) fn reset_locs(&mut self) {
    self.locs.clear();
    self.bank_locs.clear();
    self.usage.clear();
    self.section = Section::Code;

    let ram = Loc {
      bank: self.machine.ram_bank(),
      page: self.machine.ram_page(),
      offset: 0,
    };
    let rom = Loc {
      bank: 0,
      page: self.machine.code_page(),
      offset: 0,
    };
    self.locs.insert(Section::Zp, ram);
    self.locs.insert(Section::Bss, Loc { offset: 0x200, ..ram });
    self.locs.insert(Section::Code, rom);
    self.locs.insert(Section::Data, rom);
  }

  /// Fails if the current section cannot hold initialized data.
  pub(in crate::asm) fn check_rom_section(&self) -> Result<(), ErrorType> {
    if self.section.is_ram() {
      return Err(ErrorType::DataInRam(self.section.name()));
    }
    Ok(())
  }

  /// Moves the location forward by `n` bytes, stepping into the next bank
  /// (and page) when the end of a bank is reached.
  ///
  /// Code outside procedures is recorded in the usage map, so that the
  /// relocator knows where procedures may not go.
  pub(in crate::asm) fn advance(&mut self, n: u32) -> Result<(), ErrorType> {
    let in_proc = self.procs.current().is_some();
    let mut loc = self.loc();
    let mut remaining = n;
    loop {
      let room = BANK_SIZE as u32 - (loc.offset as u32).min(BANK_SIZE as u32);
      let step = remaining.min(room);
      if !in_proc && !self.section.is_ram() && loc.bank <= self.config.max_bank
      {
        self.usage.mark(loc.bank, loc.offset, step as u16);
      }
      remaining -= step;

      let end = loc.offset as u32 + step;
      if end < BANK_SIZE as u32 || (in_proc && remaining == 0) {
        loc.offset = end as u16;
        break;
      }
      if let Some(id) = self.procs.current() {
        let unit = self.procs.unit_of(id);
        return Err(ErrorType::ProcStraddle(self.procs.get(unit).name.clone()));
      }
      loc.bank += 1;
      loc.page = (loc.page + 1) & 7;
      loc.offset = 0;
      if remaining == 0 {
        break;
      }
    }
    self.set_loc(loc);
    Ok(())
  }

  /// Places one byte at the current location.
  ///
  /// Bytes only reach the image during the final pass, and never from a
  /// stripped procedure.
  pub(in crate::asm) fn emit(&mut self, byte: u8) -> Result<(), ErrorType> {
    let loc = self.loc();
    self.advance(1)?;
    if self.pass == Pass::Final && !self.procs.in_stripped() {
      self
        .image
        .write(loc.bank, loc.offset, byte, self.section)
        .map_err(ErrorType::Rom)?;
      self.line_bytes.push(byte);
    }
    Ok(())
  }

  /// Places several bytes.
  pub(in crate::asm) fn emit_all(
    &mut self,
    bytes: impl IntoIterator<Item = u8>,
  ) -> Result<(), ErrorType> {
    for byte in bytes {
      self.emit(byte)?;
    }
    Ok(())
  }

  /// Switches to another section.
  pub(in crate::asm) fn set_section(
    &mut self,
    section: Section,
  ) -> Result<(), ErrorType> {
    if section.is_ram() && self.procs.current().is_some() {
      return Err(ErrorType::InProc(section.name()));
    }
    self.section = section;
    Ok(())
  }

  /// Handles `.org`: moves to `addr` within the current bank.
  pub(in crate::asm) fn org(&mut self, addr: i32) -> Result<(), ErrorType> {
    if self.procs.current().is_some() {
      return Err(ErrorType::InProc("org"));
    }
    if !(0..=0xffff).contains(&addr) {
      return Err(ErrorType::OperandRange(addr));
    }
    let mut loc = self.loc();
    loc.page = (addr >> 13) as u8;
    loc.offset = (addr & 0x1fff) as u16;
    self.set_loc(loc);
    Ok(())
  }

  /// Handles `.bank`: switches the current section to another bank,
  /// continuing where that bank was left.
  pub(in crate::asm) fn select_bank(&mut self, bank: i32) -> Result<(), ErrorType> {
    if self.procs.current().is_some() {
      return Err(ErrorType::InProc("bank"));
    }
    self.check_rom_section()?;
    if bank < 0 {
      return Err(ErrorType::OperandRange(bank));
    }
    let bank = bank as u32;
    self.image.check_bank(bank).map_err(ErrorType::Rom)?;

    let mut loc = self.loc();
    self.bank_locs.insert((self.section, loc.bank), loc.offset);
    loc.bank = bank;
    loc.offset = self
      .bank_locs
      .get(&(self.section, bank))
      .copied()
      .unwrap_or(0);
    self.set_loc(loc);
    Ok(())
  }

  /// Handles `.page`: changes the MPR page the current bank is mapped
  /// through.
  pub(in crate::asm) fn set_page(&mut self, page: i32) -> Result<(), ErrorType> {
    if !(0..=7).contains(&page) {
      return Err(ErrorType::OperandRange(page));
    }
    let mut loc = self.loc();
    loc.page = page as u8;
    self.set_loc(loc);
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
  fn best_fit_prefers_tightest_gap() {
    let mut usage = Usage::new();
    usage.mark(0, 0, 0x100);
    usage.mark(0, 0x140, 0x1000);
    // Gaps: [0x100, 0x140) and [0x1140, 0x2000).
    assert_eq!(usage.best_fit_in(0, 0x20), Some(0x100));
    assert_eq!(usage.best_fit_in(0, 0x80), Some(0x1140));
    assert_eq!(usage.best_fit(0..2, 0x1000), Some((1, 0)));
    assert_eq!(usage.best_fit_in(0, 0x2000), None);
    assert_eq!(usage.top_fit_in(0, 0x20), Some(0x1fe0));
    assert_eq!(usage.top_fit_in(1, 0x20), Some(0x1fe0));
    usage.mark(0, 0x1f00, 0x100);
    assert_eq!(usage.top_fit_in(0, 0x40), Some(0x1ec0));
    assert_eq!(usage.top_fit_in(0, 0xf00), None);
    assert_eq!(usage.free(0), BANK_SIZE - 0x1100);
  }

  #[test]
  fn locations() {
    let loc = Loc {
      bank: 3,
      page: 7,
      offset: 0x10,
    };
    assert_eq!(loc.addr(), 0xe010);
  }

  #[test]
  fn banks_remember_their_offsets() {
    let out = assemble_text(
      "  .bank 0\n  .org $e000\n  .db 1\n  .bank 1\n  .org $c000\n  .db 2\n  .bank 0\nhere:  .db 3\n",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 2), vec![1, 3]);
    assert_eq!(bytes(&out, 1, 0, 1), vec![2]);
    // `.bank` keeps the page, so `here` is still mapped at $c000.
    assert_eq!(out.lookup("here"), Some(0xc001));
  }

  #[test]
  fn running_off_a_bank() {
    let out = assemble_text("  .org $fffe\n  .db 1, 2, 3\nafter:\n").unwrap();
    assert_eq!(bytes(&out, 0, 0x1ffe, 2), vec![1, 2]);
    assert_eq!(bytes(&out, 1, 0, 1), vec![3]);
    assert_eq!(out.bank_of("after"), Some(1));
    assert_eq!(out.lookup("after"), Some(0x0001));
  }

  #[test]
  fn no_data_in_ram() {
    let errors = assemble_text("  .zp\n  .db 1\n").unwrap_err();
    assert_eq!(first_error(&errors), ErrorType::DataInRam("zp"));
  }
}
