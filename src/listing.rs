//! The assembly listing.
//!
//! The final pass records one entry per source line it assembles: where the
//! line landed, the bytes it produced and its text. `.nolist` and `.list`
//! switch recording off and on; lines coming out of macro expansions are only
//! recorded after `.mlist`.

use std::io;

use crate::asm::LineInfo;

/// How many bytes are shown on each row of the listing.
const BYTES_PER_ROW: usize = 8;

/// One recorded line.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Entry {
  /// The bank the line's bytes were written to.
  pub bank: u32,
  /// The logical address of the line's first byte.
  pub addr: u16,
  /// The bytes the line produced.
  pub bytes: Vec<u8>,
  /// The source line.
  pub line: LineInfo,
}

/// A listing under construction.
#[derive(Clone, Debug)]
pub struct Listing {
  /// Whether lines are recorded at the start of each pass.
  initial: bool,
  enabled: bool,
  macros: bool,
  entries: Vec<Entry>,
}

impl Listing {
  /// Creates an empty listing, recording from the start if `enabled`.
  pub fn new(enabled: bool) -> Self {
    Self {
      initial: enabled,
      enabled,
      macros: false,
      entries: Vec::new(),
    }
  }

  /// Forgets everything recorded and puts the switches back where they
  /// started.
  pub fn reset(&mut self) {
    self.enabled = self.initial;
    self.macros = false;
    self.entries.clear();
  }

  /// Handles `.list` and `.nolist`.
  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
  }

  /// Handles `.mlist` and `.nomlist`.
  pub fn set_macros(&mut self, macros: bool) {
    self.macros = macros;
  }

  /// Records a line, unless recording is switched off for it.
  pub fn record(
    &mut self,
    bank: u32,
    addr: u16,
    bytes: &[u8],
    line: &LineInfo,
    from_macro: bool,
  ) {
    if !self.enabled || (from_macro && !self.macros) {
      return;
    }
    self.entries.push(Entry {
      bank,
      addr,
      bytes: bytes.to_vec(),
      line: line.clone(),
    });
  }

  /// Returns the recorded lines.
  pub fn entries(&self) -> &[Entry] {
    &self.entries
  }

  /// Returns true if nothing has been recorded.
  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// Writes the listing to `w`.
  ///
  /// Each row shows the line number, `bank:address`, up to eight bytes and
  /// the source text; longer byte runs continue on rows of their own.
  pub fn write(&self, mut w: impl io::Write) -> io::Result<()> {
    for entry in &self.entries {
      let mut rows = entry.bytes.chunks(BYTES_PER_ROW);
      let first = rows.next().unwrap_or(&[]);
      let loc = if entry.bytes.is_empty() {
        String::from("       ")
      } else {
        format!("{:02X}:{:04X}", entry.bank, entry.addr)
      };
      writeln!(
        w,
        "{:5} {} {:<24} {}",
        entry.line.line,
        loc,
        hex(first),
        entry.line.text
      )?;

      let mut addr = entry.addr;
      for row in rows {
        addr = addr.wrapping_add(BYTES_PER_ROW as u16);
        writeln!(w, "      {:02X}:{:04X} {}", entry.bank, addr, hex(row))?;
      }
    }
    Ok(())
  }
}

fn hex(bytes: &[u8]) -> String {
  bytes
    .iter()
    .map(|b| format!("{:02X}", b))
    .collect::<Vec<_>>()
    .join(" ")
}

#[cfg(test)]
mod test {
  use super::*;
  use std::path::PathBuf;

  fn info(line: usize, text: &str) -> LineInfo {
    LineInfo {
      file: PathBuf::from("main.s"),
      line,
      text: text.to_string(),
    }
  }

  #[test]
  fn switches() {
    let mut listing = Listing::new(true);
    listing.record(0, 0xe000, &[0xea], &info(1, "  nop"), false);
    listing.record(0, 0xe001, &[0xea], &info(2, "  nop"), true);
    listing.set_macros(true);
    listing.record(0, 0xe001, &[0xea], &info(2, "  nop"), true);
    listing.set_enabled(false);
    listing.record(0, 0xe002, &[0xea], &info(3, "  nop"), false);
    assert_eq!(listing.entries().len(), 2);

    listing.reset();
    assert!(listing.is_empty());
    listing.record(0, 0xe000, &[0xea], &info(1, "  nop"), true);
    assert!(listing.is_empty());
  }

  #[test]
  fn rows() {
    let mut listing = Listing::new(true);
    let bytes = (0..10).collect::<Vec<u8>>();
    listing.record(1, 0xc000, &bytes, &info(7, "  .db 0, 1"), false);
    listing.record(1, 0xc00a, &[], &info(8, "; done"), false);

    let mut out = Vec::new();
    listing.write(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    let lines = text.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("    7 01:C000 00 01 02 03 04 05 06 07"));
    assert!(lines[0].ends_with("  .db 0, 1"));
    assert_eq!(lines[1], "      01:C008 08 09");
    assert!(lines[2].starts_with("    8         "));
  }
}
