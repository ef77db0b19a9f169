//! The 6502-family instruction set architectures the assembler targets.
//!
//! Three CPUs are supported, each a superset of the last:
//! - the NMOS 6502, as found in the NES;
//! - the CMOS 65C02, as found in the Atari Lynx;
//! - the HuC6280, as found in the PC Engine, which adds bank mapping, block
//!   transfer, and Rockwell bit instructions on top of the 65C02.
//!
//! This module provides functions for assembling and disassembling machine
//! code for these CPUs, and describes the memory layout of each [`Machine`].
//!
//! [`Machine`]: enum.Machine.html

use serde::Deserialize;

mod addressing;
mod instruction;
mod mnemonic;

pub use addressing::AddrMode;
pub use instruction::Instruction;
pub use mnemonic::Mnemonic;

/// A CPU generation.
///
/// This enum is ordered: a CPU can execute every instruction available to a
/// CPU that compares smaller than it.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Cpu {
  /// The original NMOS 6502, documented opcodes only.
  Nmos,
  /// The CMOS 65C02 (without the Rockwell bit instructions).
  Cmos,
  /// The Hudson HuC6280.
  Huc,
}

/// A target machine.
///
/// The machine decides which CPU's opcode table is used, where the zero page
/// lives in the logical address space, and how indirect operands are written.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Machine {
  /// The NEC PC Engine / TurboGrafx-16.
  Pce,
  /// The Nintendo Entertainment System.
  Nes,
  /// The Atari Lynx.
  Atari,
}

impl Default for Machine {
  fn default() -> Self {
    Machine::Pce
  }
}

impl Machine {
  /// Gets the machine with the given name, case-insensitively.
  pub fn from_name(name: &str) -> Option<Self> {
    match name.to_ascii_lowercase().as_str() {
      "pce" | "pcengine" | "huc6280" => Some(Self::Pce),
      "nes" | "6502" => Some(Self::Nes),
      "atari" | "lynx" | "65c02" => Some(Self::Atari),
      _ => None,
    }
  }

  /// Returns a name for this machine.
  pub fn name(self) -> &'static str {
    match self {
      Self::Pce => "pce",
      Self::Nes => "nes",
      Self::Atari => "atari",
    }
  }

  /// Returns the CPU this machine is built around.
  pub fn cpu(self) -> Cpu {
    match self {
      Self::Pce => Cpu::Huc,
      Self::Nes => Cpu::Nmos,
      Self::Atari => Cpu::Cmos,
    }
  }

  /// Returns the logical address of the first zero-page byte.
  ///
  /// The HuC6280 maps its zero page at `$2000`, since page 0 holds I/O.
  pub fn zp_base(self) -> i32 {
    match self {
      Self::Pce => 0x2000,
      Self::Nes | Self::Atari => 0x0000,
    }
  }

  /// Returns whether `value` addresses the zero page.
  ///
  /// On the PC Engine both `$00xx` and `$20xx` are accepted, since the
  /// instruction encodes only the low byte either way.
  pub fn is_zp(self, value: i32) -> bool {
    let base = self.zp_base();
    (0..=0xff).contains(&value) || (base..=base + 0xff).contains(&value)
  }

  /// Returns the bank number reported for RAM symbols (zero page and bss).
  pub fn ram_bank(self) -> u32 {
    match self {
      Self::Pce => 0xf8,
      Self::Nes | Self::Atari => 0,
    }
  }

  /// Returns the MPR page that RAM is mapped at.
  pub fn ram_page(self) -> u8 {
    match self {
      Self::Pce => 1,
      Self::Nes | Self::Atari => 0,
    }
  }

  /// Returns the page code and data sections start at.
  pub fn code_page(self) -> u8 {
    match self {
      Self::Pce => 7,
      Self::Nes | Self::Atari => 4,
    }
  }

  /// Returns whether `(...)` denotes an indirect operand.
  ///
  /// The PC Engine convention uses `[...]` for indirection and keeps
  /// parentheses for arithmetic; `[...]` is accepted on every machine.
  pub fn paren_indirect(self) -> bool {
    match self {
      Self::Pce => false,
      Self::Nes | Self::Atari => true,
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn zero_page_windows() {
    assert!(Machine::Pce.is_zp(0x2010));
    assert!(Machine::Pce.is_zp(0x10));
    assert!(!Machine::Pce.is_zp(0x2100));
    assert!(Machine::Nes.is_zp(0xff));
    assert!(!Machine::Nes.is_zp(0x2000));
  }

  #[test]
  fn cpu_ordering() {
    assert!(Cpu::Huc > Cpu::Cmos);
    assert!(Cpu::Cmos > Cpu::Nmos);
    assert_eq!(Machine::from_name("NES"), Some(Machine::Nes));
  }
}
