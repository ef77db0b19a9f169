//! The 6502-family instruction set proper.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::isa::AddrMode;
use crate::isa::Cpu;
use crate::isa::Mnemonic;

/// A 6502-family instruction.
///
/// An instruction consists of a mnemonic plus an addressing mode, together
/// with the opcode that encodes the pair and the oldest CPU that executes it.
/// `Instruction::lookup` can be used to find legal combinations.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct Instruction {
  mne: Mnemonic,
  mode: AddrMode,
  opcode: u8,
  cpu: Cpu,
}

impl Instruction {
  /// Gets this instruction's mnemonic.
  pub fn mnemonic(self) -> Mnemonic {
    self.mne
  }

  /// Gets this instruction's addressing mode.
  pub fn addressing_mode(self) -> AddrMode {
    self.mode
  }

  /// Returns this instruction's opcode.
  pub fn opcode(self) -> u8 {
    self.opcode
  }

  /// Returns the oldest CPU that can execute this instruction.
  pub fn cpu(self) -> Cpu {
    self.cpu
  }

  /// Returns the encoded length of this instruction, opcode included.
  pub fn len(self) -> usize {
    1 + self.mode.operand_len()
  }

  /// Looks up the instruction for `mne` in `mode`, as executed by `cpu`.
  ///
  /// Returns `None` if the combination does not exist, or needs a newer CPU.
  pub fn lookup(mne: Mnemonic, mode: AddrMode, cpu: Cpu) -> Option<Self> {
    BY_NAME
      .get(&(mne, mode))
      .map(|&i| TABLE[i])
      .filter(|i| i.cpu <= cpu)
  }

  /// Decodes `opcode` into an instruction, as understood by `cpu`.
  pub fn decode(opcode: u8, cpu: Cpu) -> Option<Self> {
    BY_OPCODE
      .get(&opcode)
      .map(|&i| TABLE[i])
      .filter(|i| i.cpu <= cpu)
  }

  /// Returns every addressing mode `mne` supports on `cpu`.
  pub fn modes(mne: Mnemonic, cpu: Cpu) -> impl Iterator<Item = AddrMode> {
    TABLE
      .iter()
      .filter(move |i| i.mne == mne && i.cpu <= cpu)
      .map(|i| i.mode)
  }
}

lazy_static! {
  static ref BY_NAME: HashMap<(Mnemonic, AddrMode), usize> = TABLE
    .iter()
    .enumerate()
    .map(|(idx, i)| ((i.mne, i.mode), idx))
    .collect();
  static ref BY_OPCODE: HashMap<u8, usize> = TABLE
    .iter()
    .enumerate()
    .map(|(idx, i)| (i.opcode, idx))
    .collect();
}

macro_rules! cpu_level {
  () => {
    Cpu::Nmos
  };
  ($cpu:ident) => {
    Cpu::$cpu
  };
}

/// A macro for generating the instruction table, i.e., which combinations of
/// mnemonic + addr mode are allowed, what opcode that maps to, and which CPU
/// introduced it. Entries without a CPU annotation exist on the NMOS 6502.
///
/// # Syntax
/// ```ignore
/// instructions! {
///   /// Multiple instruction mnemonic
///   Abc {
///     0xopcode => AddrMode,
///     0xopcode => AddrMode @ Cmos,
///     // ...
///   }
///
///   /// No-argument mnemonic
///   Xyz = 0xopcode @ Huc,
/// }
/// ```
macro_rules! instructions {
  ($($mne:ident $(= $inh_opcode:literal $(@ $inh_cpu:ident)?,)? $({
    $($opcode:literal => $mode:ident $(@ $cpu:ident)?),* $(,)?
  })?)*) => {
    static TABLE: &[Instruction] = &[
      $(
        $(Instruction {
          mne: Mnemonic::$mne,
          mode: AddrMode::Implied,
          opcode: $inh_opcode,
          cpu: cpu_level!($($inh_cpu)?),
        },)?
        $($(Instruction {
          mne: Mnemonic::$mne,
          mode: AddrMode::$mode,
          opcode: $opcode,
          cpu: cpu_level!($($cpu)?),
        },)*)?
      )*
    ];

    #[test]
    fn unique_opcodes() {
      let declared_opcodes = &[
        $($($($opcode,)*)?)*
        $($($inh_opcode,)?)*
      ][..];

      let mut set = std::collections::HashSet::new();
      for op in declared_opcodes {
        assert!(!set.contains(op), "duplicate opcode: {:#x}", op);
        set.insert(*op);
      }
    }
  }
}

instructions! {
  Nop = 0xea,
  Brk = 0x00,

  Adc {
    0x61 => ZpIndX,
    0x65 => Zp,
    0x69 => Imm,
    0x6d => Abs,
    0x71 => ZpIndY,
    0x72 => ZpInd @ Cmos,
    0x75 => ZpX,
    0x79 => AbsY,
    0x7d => AbsX,
  }
  Sbc {
    0xe1 => ZpIndX,
    0xe5 => Zp,
    0xe9 => Imm,
    0xed => Abs,
    0xf1 => ZpIndY,
    0xf2 => ZpInd @ Cmos,
    0xf5 => ZpX,
    0xf9 => AbsY,
    0xfd => AbsX,
  }
  And {
    0x21 => ZpIndX,
    0x25 => Zp,
    0x29 => Imm,
    0x2d => Abs,
    0x31 => ZpIndY,
    0x32 => ZpInd @ Cmos,
    0x35 => ZpX,
    0x39 => AbsY,
    0x3d => AbsX,
  }
  Ora {
    0x01 => ZpIndX,
    0x05 => Zp,
    0x09 => Imm,
    0x0d => Abs,
    0x11 => ZpIndY,
    0x12 => ZpInd @ Cmos,
    0x15 => ZpX,
    0x19 => AbsY,
    0x1d => AbsX,
  }
  Eor {
    0x41 => ZpIndX,
    0x45 => Zp,
    0x49 => Imm,
    0x4d => Abs,
    0x51 => ZpIndY,
    0x52 => ZpInd @ Cmos,
    0x55 => ZpX,
    0x59 => AbsY,
    0x5d => AbsX,
  }
  Cmp {
    0xc1 => ZpIndX,
    0xc5 => Zp,
    0xc9 => Imm,
    0xcd => Abs,
    0xd1 => ZpIndY,
    0xd2 => ZpInd @ Cmos,
    0xd5 => ZpX,
    0xd9 => AbsY,
    0xdd => AbsX,
  }
  Cpx {
    0xe0 => Imm,
    0xe4 => Zp,
    0xec => Abs,
  }
  Cpy {
    0xc0 => Imm,
    0xc4 => Zp,
    0xcc => Abs,
  }
  Bit {
    0x24 => Zp,
    0x2c => Abs,
    0x34 => ZpX @ Cmos,
    0x3c => AbsX @ Cmos,
    0x89 => Imm @ Cmos,
  }

  Asl {
    0x06 => Zp,
    0x0a => Acc,
    0x0e => Abs,
    0x16 => ZpX,
    0x1e => AbsX,
  }
  Lsr {
    0x46 => Zp,
    0x4a => Acc,
    0x4e => Abs,
    0x56 => ZpX,
    0x5e => AbsX,
  }
  Rol {
    0x26 => Zp,
    0x2a => Acc,
    0x2e => Abs,
    0x36 => ZpX,
    0x3e => AbsX,
  }
  Ror {
    0x66 => Zp,
    0x6a => Acc,
    0x6e => Abs,
    0x76 => ZpX,
    0x7e => AbsX,
  }
  Inc {
    0x1a => Acc @ Cmos,
    0xe6 => Zp,
    0xee => Abs,
    0xf6 => ZpX,
    0xfe => AbsX,
  }
  Dec {
    0x3a => Acc @ Cmos,
    0xc6 => Zp,
    0xce => Abs,
    0xd6 => ZpX,
    0xde => AbsX,
  }
  Inx = 0xe8,
  Iny = 0xc8,
  Dex = 0xca,
  Dey = 0x88,

  Lda {
    0xa1 => ZpIndX,
    0xa5 => Zp,
    0xa9 => Imm,
    0xad => Abs,
    0xb1 => ZpIndY,
    0xb2 => ZpInd @ Cmos,
    0xb5 => ZpX,
    0xb9 => AbsY,
    0xbd => AbsX,
  }
  Ldx {
    0xa2 => Imm,
    0xa6 => Zp,
    0xae => Abs,
    0xb6 => ZpY,
    0xbe => AbsY,
  }
  Ldy {
    0xa0 => Imm,
    0xa4 => Zp,
    0xac => Abs,
    0xb4 => ZpX,
    0xbc => AbsX,
  }
  Sta {
    0x81 => ZpIndX,
    0x85 => Zp,
    0x8d => Abs,
    0x91 => ZpIndY,
    0x92 => ZpInd @ Cmos,
    0x95 => ZpX,
    0x99 => AbsY,
    0x9d => AbsX,
  }
  Stx {
    0x86 => Zp,
    0x8e => Abs,
    0x96 => ZpY,
  }
  Sty {
    0x84 => Zp,
    0x8c => Abs,
    0x94 => ZpX,
  }
  Stz {
    0x64 => Zp @ Cmos,
    0x74 => ZpX @ Cmos,
    0x9c => Abs @ Cmos,
    0x9e => AbsX @ Cmos,
  }

  Tax = 0xaa,
  Tay = 0xa8,
  Txa = 0x8a,
  Tya = 0x98,
  Tsx = 0xba,
  Txs = 0x9a,

  Pha = 0x48,
  Php = 0x08,
  Phx = 0xda @ Cmos,
  Phy = 0x5a @ Cmos,
  Pla = 0x68,
  Plp = 0x28,
  Plx = 0xfa @ Cmos,
  Ply = 0x7a @ Cmos,

  Clc = 0x18,
  Cld = 0xd8,
  Cli = 0x58,
  Clv = 0xb8,
  Sec = 0x38,
  Sed = 0xf8,
  Sei = 0x78,

  Trb {
    0x14 => Zp @ Cmos,
    0x1c => Abs @ Cmos,
  }
  Tsb {
    0x04 => Zp @ Cmos,
    0x0c => Abs @ Cmos,
  }

  Bpl { 0x10 => Rel }
  Bmi { 0x30 => Rel }
  Bvc { 0x50 => Rel }
  Bvs { 0x70 => Rel }
  Bcc { 0x90 => Rel }
  Bcs { 0xb0 => Rel }
  Bne { 0xd0 => Rel }
  Beq { 0xf0 => Rel }
  Bra { 0x80 => Rel @ Cmos }
  Bsr { 0x44 => Rel @ Huc }

  Jmp {
    0x4c => Abs,
    0x6c => AbsInd,
    0x7c => AbsIndX @ Cmos,
  }
  Jsr { 0x20 => Abs }
  Rti = 0x40,
  Rts = 0x60,

  Bbr0 { 0x0f => ZpRel @ Huc }
  Bbr1 { 0x1f => ZpRel @ Huc }
  Bbr2 { 0x2f => ZpRel @ Huc }
  Bbr3 { 0x3f => ZpRel @ Huc }
  Bbr4 { 0x4f => ZpRel @ Huc }
  Bbr5 { 0x5f => ZpRel @ Huc }
  Bbr6 { 0x6f => ZpRel @ Huc }
  Bbr7 { 0x7f => ZpRel @ Huc }
  Bbs0 { 0x8f => ZpRel @ Huc }
  Bbs1 { 0x9f => ZpRel @ Huc }
  Bbs2 { 0xaf => ZpRel @ Huc }
  Bbs3 { 0xbf => ZpRel @ Huc }
  Bbs4 { 0xcf => ZpRel @ Huc }
  Bbs5 { 0xdf => ZpRel @ Huc }
  Bbs6 { 0xef => ZpRel @ Huc }
  Bbs7 { 0xff => ZpRel @ Huc }
  Rmb0 { 0x07 => Zp @ Huc }
  Rmb1 { 0x17 => Zp @ Huc }
  Rmb2 { 0x27 => Zp @ Huc }
  Rmb3 { 0x37 => Zp @ Huc }
  Rmb4 { 0x47 => Zp @ Huc }
  Rmb5 { 0x57 => Zp @ Huc }
  Rmb6 { 0x67 => Zp @ Huc }
  Rmb7 { 0x77 => Zp @ Huc }
  Smb0 { 0x87 => Zp @ Huc }
  Smb1 { 0x97 => Zp @ Huc }
  Smb2 { 0xa7 => Zp @ Huc }
  Smb3 { 0xb7 => Zp @ Huc }
  Smb4 { 0xc7 => Zp @ Huc }
  Smb5 { 0xd7 => Zp @ Huc }
  Smb6 { 0xe7 => Zp @ Huc }
  Smb7 { 0xf7 => Zp @ Huc }

  Cla = 0x62 @ Huc,
  Clx = 0x82 @ Huc,
  Cly = 0xc2 @ Huc,
  Csh = 0xd4 @ Huc,
  Csl = 0x54 @ Huc,
  Sax = 0x22 @ Huc,
  Say = 0x42 @ Huc,
  Sxy = 0x02 @ Huc,
  Set = 0xf4 @ Huc,
  St0 { 0x03 => Imm @ Huc }
  St1 { 0x13 => Imm @ Huc }
  St2 { 0x23 => Imm @ Huc }
  Tam { 0x53 => Imm @ Huc }
  Tma { 0x43 => Imm @ Huc }
  Tst {
    0x83 => ImmZp @ Huc,
    0x93 => ImmAbs @ Huc,
    0xa3 => ImmZpX @ Huc,
    0xb3 => ImmAbsX @ Huc,
  }
  Tai { 0xf3 => Block @ Huc }
  Tdd { 0xc3 => Block @ Huc }
  Tia { 0xe3 => Block @ Huc }
  Tii { 0x73 => Block @ Huc }
  Tin { 0xd3 => Block @ Huc }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn round_trip() {
    let lda = Instruction::lookup(Mnemonic::Lda, AddrMode::Imm, Cpu::Huc)
      .unwrap();
    assert_eq!(lda.opcode(), 0xa9);
    assert_eq!(lda.len(), 2);
    assert_eq!(Instruction::decode(0xa9, Cpu::Huc), Some(lda));

    let sta = Instruction::lookup(Mnemonic::Sta, AddrMode::Zp, Cpu::Nmos)
      .unwrap();
    assert_eq!(sta.opcode(), 0x85);
    assert_eq!(Instruction::decode(0x85, Cpu::Nmos), Some(sta));
  }

  #[test]
  fn cpu_levels() {
    assert!(Instruction::lookup(Mnemonic::Stz, AddrMode::Zp, Cpu::Nmos)
      .is_none());
    assert!(Instruction::lookup(Mnemonic::Stz, AddrMode::Zp, Cpu::Cmos)
      .is_some());
    assert!(Instruction::lookup(Mnemonic::Tam, AddrMode::Imm, Cpu::Cmos)
      .is_none());
    assert!(Instruction::decode(0x44, Cpu::Nmos).is_none());
    assert_eq!(
      Instruction::decode(0x44, Cpu::Huc).map(|i| i.mnemonic()),
      Some(Mnemonic::Bsr)
    );
  }

  #[test]
  fn every_mnemonic_has_a_mode() {
    for mne in &[Mnemonic::Nop, Mnemonic::Tii, Mnemonic::Bbr7, Mnemonic::Ldx] {
      assert!(Instruction::modes(*mne, Cpu::Huc).next().is_some());
    }
    let modes = Instruction::modes(Mnemonic::Ldx, Cpu::Nmos).count();
    assert_eq!(modes, 5);
  }
}
