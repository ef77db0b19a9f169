//! The output image: a sequence of 8 KiB banks.
//!
//! Every 6502-family target this assembler supports maps ROM in 8 KiB pages,
//! so the image is simply an array of such banks. Each bank carries a parallel
//! map recording which section wrote each byte; bytes nobody wrote are
//! `None` in the map and zero in the data.
//!
//! File formats with headers (`.pce`, `.nes`) are produced by writers outside
//! this crate from the raw banks exposed here.

use std::fmt;
use std::io;

/// The size of a bank, in bytes.
pub const BANK_SIZE: usize = 0x2000;

/// The section a byte was written from.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Section {
  /// Zero-page RAM.
  Zp,
  /// Uninitialized RAM.
  Bss,
  /// Code.
  Code,
  /// Read-only data.
  Data,
  /// Cross-bank call trampolines.
  Trampoline,
}

impl Section {
  /// Returns the name of the directive that selects this section.
  pub fn name(self) -> &'static str {
    match self {
      Self::Zp => "zp",
      Self::Bss => "bss",
      Self::Code => "code",
      Self::Data => "data",
      Self::Trampoline => "trampoline",
    }
  }

  /// Returns whether this section lives in RAM, and so never reaches the
  /// image.
  pub fn is_ram(self) -> bool {
    matches!(self, Self::Zp | Self::Bss)
  }
}

/// A single bank of the image.
#[derive(Clone)]
pub struct Bank {
  data: Box<[u8]>,
  map: Box<[Option<Section>]>,
}

impl Bank {
  fn new() -> Self {
    Self {
      data: vec![0; BANK_SIZE].into_boxed_slice(),
      map: vec![None; BANK_SIZE].into_boxed_slice(),
    }
  }

  /// Returns the bytes of this bank.
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// Returns which section wrote each byte of this bank.
  pub fn map(&self) -> &[Option<Section>] {
    &self.map
  }

  /// Returns the number of bytes nobody has written.
  pub fn free(&self) -> usize {
    self.map.iter().filter(|s| s.is_none()).count()
  }
}

impl fmt::Debug for Bank {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "Bank({} bytes used)", BANK_SIZE - self.free())
  }
}

/// An error produced when writing outside the allowed banks.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum RomError {
  /// The bank is beyond the configured maximum bank.
  BankLimit(u32),
  /// The bank is beyond the configured ROM size.
  RomLimit(u32),
}

impl fmt::Display for RomError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      RomError::BankLimit(b) => write!(f, "bank ${:02x} exceeds the bank limit", b),
      RomError::RomLimit(b) => write!(f, "bank ${:02x} exceeds the ROM size", b),
    }
  }
}

/// NES header values collected from the `.ines*` directives.
///
/// Fields a program never set are `None`; `to_ines()` treats them as zero.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct RomHeader {
  /// Program ROM size, in 16 KiB units.
  pub prg_banks: Option<u8>,
  /// Character ROM size, in 8 KiB units.
  pub chr_banks: Option<u8>,
  /// The mapper number.
  pub mapper: Option<u8>,
  /// The mirroring and battery bits of header byte 6.
  pub mirroring: Option<u8>,
}

impl RomHeader {
  /// Returns whether any `.ines*` directive was seen.
  pub fn is_set(&self) -> bool {
    *self != Self::default()
  }

  /// Encodes the 16-byte iNES header.
  pub fn to_ines(&self) -> [u8; 16] {
    let mapper = self.mapper.unwrap_or(0);
    let mut header = [0; 16];
    header[..4].copy_from_slice(b"NES\x1a");
    header[4] = self.prg_banks.unwrap_or(0);
    header[5] = self.chr_banks.unwrap_or(0);
    header[6] = (mapper & 0x0f) << 4 | (self.mirroring.unwrap_or(0) & 0x0f);
    header[7] = mapper & 0xf0;
    header
  }
}

/// A ROM image under construction.
#[derive(Clone, Debug)]
pub struct Image {
  banks: Vec<Bank>,
  max_bank: u32,
  rom_limit: Option<u32>,
}

impl Image {
  /// Creates an empty image which accepts banks `0..=max_bank`, further
  /// limited to `rom_limit` banks if given.
  pub fn new(max_bank: u32, rom_limit: Option<u32>) -> Self {
    Self {
      banks: Vec::new(),
      max_bank,
      rom_limit,
    }
  }

  /// Checks that `bank` may be written to.
  pub fn check_bank(&self, bank: u32) -> Result<(), RomError> {
    if bank > self.max_bank {
      return Err(RomError::BankLimit(bank));
    }
    match self.rom_limit {
      Some(limit) if bank >= limit => Err(RomError::RomLimit(bank)),
      _ => Ok(()),
    }
  }

  /// Writes `byte` at `offset` within `bank`, on behalf of `section`.
  ///
  /// `offset` is taken modulo the bank size.
  pub fn write(
    &mut self,
    bank: u32,
    offset: u16,
    byte: u8,
    section: Section,
  ) -> Result<(), RomError> {
    self.check_bank(bank)?;
    let idx = bank as usize;
    if self.banks.len() <= idx {
      self.banks.resize_with(idx + 1, Bank::new);
    }
    let offset = offset as usize % BANK_SIZE;
    self.banks[idx].data[offset] = byte;
    self.banks[idx].map[offset] = Some(section);
    Ok(())
  }

  /// Reads the byte at `offset` within `bank`, if it was written.
  pub fn get(&self, bank: u32, offset: u16) -> Option<u8> {
    let bank = self.banks.get(bank as usize)?;
    let offset = offset as usize % BANK_SIZE;
    bank.map[offset].map(|_| bank.data[offset])
  }

  /// Returns the banks written so far; the last one is the highest bank
  /// touched.
  pub fn banks(&self) -> &[Bank] {
    &self.banks
  }

  /// Returns the number of banks in use.
  pub fn bank_count(&self) -> usize {
    self.banks.len()
  }

  /// Discards everything written so far.
  pub fn clear(&mut self) {
    self.banks.clear();
  }

  /// Writes the raw banks to `w`.
  ///
  /// With `trim`, unwritten bytes before the first written byte and after the
  /// last one are left out.
  pub fn write_raw(&self, mut w: impl io::Write, trim: bool) -> io::Result<()> {
    let flat = self
      .banks
      .iter()
      .flat_map(|b| b.data.iter().zip(b.map.iter()))
      .collect::<Vec<_>>();

    let (start, end) = if trim {
      let start = flat.iter().position(|(_, s)| s.is_some());
      let end = flat.iter().rposition(|(_, s)| s.is_some());
      match (start, end) {
        (Some(start), Some(end)) => (start, end + 1),
        _ => (0, 0),
      }
    } else {
      (0, flat.len())
    };

    let bytes = flat[start..end].iter().map(|(&b, _)| b).collect::<Vec<_>>();
    w.write_all(&bytes)
  }

  /// Dumps the (interesting) contents of this image to the given `Write`.
  pub fn dump(&self, mut w: impl io::Write) -> io::Result<()> {
    let mut ascii_str = String::new();
    for (bank_num, bank) in self.banks.iter().enumerate() {
      let iter = bank
        .data
        .chunks(32)
        .zip(bank.map.chunks(32))
        .enumerate()
        .filter(|(_, (_, map))| map.iter().any(Option::is_some));
      for (line, (chunk, _)) in iter {
        write!(w, "{:02x}:{:04x}:", bank_num, line * 32)?;

        ascii_str.clear();
        for &byte in chunk {
          write!(w, " {:02x}", byte)?;

          if (0x20..=0x7e).contains(&byte) {
            ascii_str.push(byte as char);
          } else {
            ascii_str.push('.');
          }
        }
        writeln!(w, "  |{}|", ascii_str)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn limits() {
    let mut image = Image::new(3, Some(2));
    assert!(image.write(1, 0, 0xea, Section::Code).is_ok());
    assert_eq!(
      image.write(2, 0, 0xea, Section::Code),
      Err(RomError::RomLimit(2))
    );
    let mut image = Image::new(3, None);
    assert_eq!(
      image.write(4, 0, 0xea, Section::Code),
      Err(RomError::BankLimit(4))
    );
  }

  #[test]
  fn raw_trim() {
    let mut image = Image::new(0x7f, None);
    image.write(0, 0x10, 0xa9, Section::Code).unwrap();
    image.write(0, 0x11, 0x12, Section::Code).unwrap();
    assert_eq!(image.get(0, 0x10), Some(0xa9));
    assert_eq!(image.get(0, 0x12), None);

    let mut out = Vec::new();
    image.write_raw(&mut out, true).unwrap();
    assert_eq!(out, vec![0xa9, 0x12]);

    let mut out = Vec::new();
    image.write_raw(&mut out, false).unwrap();
    assert_eq!(out.len(), BANK_SIZE);
  }

  #[test]
  fn ines_header() {
    let header = RomHeader {
      prg_banks: Some(2),
      chr_banks: Some(1),
      mapper: Some(0x14),
      mirroring: Some(1),
    };
    assert!(header.is_set());
    assert!(!RomHeader::default().is_set());
    assert_eq!(
      header.to_ines(),
      [0x4e, 0x45, 0x53, 0x1a, 2, 1, 0x41, 0x10, 0, 0, 0, 0, 0, 0, 0, 0]
    );
  }

  #[test]
  fn dump_lines() {
    let mut image = Image::new(0x7f, None);
    image.write(1, 0x20, b'A', Section::Data).unwrap();
    let mut out = Vec::new();
    image.dump(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("01:0020: 41 00"));
    assert_eq!(text.lines().count(), 1);
  }
}
