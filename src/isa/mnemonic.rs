//! Instruction mnemonics for the 6502 family.

use std::str::FromStr;

/// The error returned when parsing a `Mnemonic` from a string.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct MnemonicParseError;

/// A macro for generating the `Mnemonic` enum.
macro_rules! mnemonics {
  ($($(#[$attr:meta])* $name:ident: $mne:literal,)*) => {
    /// A 6502-family mnemonic, representing a class of instructions.
    ///
    /// A `Mnemonic` represents a class of instructions with similar
    /// behavior but potentially many addressing modes, such as the nine
    /// instructions starting with `lda`.
    ///
    /// Which CPU supports which combination is recorded by
    /// [`Instruction`](struct.Instruction.html).
    #[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
    pub enum Mnemonic {
      $($(#[$attr])* $name,)*
    }

    impl Mnemonic {
      /// Gets the name of this mnemonic.
      pub fn name(self) -> &'static str {
        match self {
          $(Self::$name => $mne,)*
        }
      }

      /// Gets the mnemonic with the given name, if there is one.
      ///
      /// Matching is case-insensitive: `"LDA"`, `"lda"`, and `"LdA"` will all
      /// return `Mnemonic::Lda`.
      pub fn from_name(name: &str) -> Option<Self> {
        $(if name.eq_ignore_ascii_case($mne) {
          return Some(Mnemonic::$name)
        })*

        None
      }
    }
  };
}

impl FromStr for Mnemonic {
  type Err = MnemonicParseError;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::from_name(s).ok_or(MnemonicParseError)
  }
}

impl Mnemonic {
  /// Returns whether this is a short `pc`-relative branch, which the
  /// assembler may promote to a long form.
  pub fn is_branch(self) -> bool {
    use Mnemonic::*;
    matches!(
      self,
      Bcc | Bcs | Beq | Bmi | Bne | Bpl | Bvc | Bvs | Bra | Bsr
    )
  }

  /// Returns the branch taken on the opposite condition.
  ///
  /// Only conditional branches have an inverse.
  pub fn inverse(self) -> Option<Self> {
    use Mnemonic::*;
    Some(match self {
      Bcc => Bcs,
      Bcs => Bcc,
      Beq => Bne,
      Bne => Beq,
      Bmi => Bpl,
      Bpl => Bmi,
      Bvc => Bvs,
      Bvs => Bvc,
      _ => return None,
    })
  }

  /// Returns whether this is a `bbr`/`bbs` bit branch.
  pub fn is_bit_branch(self) -> bool {
    self.name().starts_with("bb")
  }
}

mnemonics! {
  /// No operation.
  Nop: "nop",
  /// Break: software interrupt.
  Brk: "brk",

  /// Add with carry.
  ///
  /// Adds the byte located at the effective address to the accumulator,
  /// taking into account the carry flag.
  /// ```text
  /// a += *addr + c;
  /// ```
  Adc: "adc",
  /// Subtract with borrow.
  ///
  /// ```text
  /// a -= *addr + !c;
  /// ```
  Sbc: "sbc",
  /// Bitwise AND.
  And: "and",
  /// Bitwise OR.
  Ora: "ora",
  /// Bitwise XOR.
  Eor: "eor",
  /// Compare accumulator.
  ///
  /// Sets flags as if `a - *addr` had been computed.
  Cmp: "cmp",
  /// Compare `x`.
  Cpx: "cpx",
  /// Compare `y`.
  Cpy: "cpy",
  /// Bit test.
  ///
  /// `z` is set from `a & *addr`; `n` and `v` are copied from bits 7 and 6 of
  /// the operand.
  Bit: "bit",

  /// Arithmetic shift left.
  Asl: "asl",
  /// Logical shift right.
  Lsr: "lsr",
  /// Rotate left through carry.
  Rol: "rol",
  /// Rotate right through carry.
  Ror: "ror",
  /// Increment memory or the accumulator.
  Inc: "inc",
  /// Decrement memory or the accumulator.
  Dec: "dec",
  /// Increment `x`.
  Inx: "inx",
  /// Increment `y`.
  Iny: "iny",
  /// Decrement `x`.
  Dex: "dex",
  /// Decrement `y`.
  Dey: "dey",

  /// Load accumulator.
  Lda: "lda",
  /// Load `x`.
  Ldx: "ldx",
  /// Load `y`.
  Ldy: "ldy",
  /// Store accumulator.
  Sta: "sta",
  /// Store `x`.
  Stx: "stx",
  /// Store `y`.
  Sty: "sty",
  /// Store zero.
  Stz: "stz",

  /// Transfer `a` to `x`.
  Tax: "tax",
  /// Transfer `a` to `y`.
  Tay: "tay",
  /// Transfer `x` to `a`.
  Txa: "txa",
  /// Transfer `y` to `a`.
  Tya: "tya",
  /// Transfer the stack pointer to `x`.
  Tsx: "tsx",
  /// Transfer `x` to the stack pointer.
  Txs: "txs",

  /// Push accumulator.
  Pha: "pha",
  /// Push processor status.
  Php: "php",
  /// Push `x`.
  Phx: "phx",
  /// Push `y`.
  Phy: "phy",
  /// Pull accumulator.
  Pla: "pla",
  /// Pull processor status.
  Plp: "plp",
  /// Pull `x`.
  Plx: "plx",
  /// Pull `y`.
  Ply: "ply",

  /// Clear carry.
  Clc: "clc",
  /// Clear decimal mode.
  Cld: "cld",
  /// Clear interrupt disable.
  Cli: "cli",
  /// Clear overflow.
  Clv: "clv",
  /// Set carry.
  Sec: "sec",
  /// Set decimal mode.
  Sed: "sed",
  /// Set interrupt disable.
  Sei: "sei",

  /// Test and reset bits.
  ///
  /// ```text
  /// z = (a & *addr) == 0;
  /// *addr &= !a;
  /// ```
  Trb: "trb",
  /// Test and set bits.
  ///
  /// ```text
  /// z = (a & *addr) == 0;
  /// *addr |= a;
  /// ```
  Tsb: "tsb",

  /// Branch if carry clear.
  Bcc: "bcc",
  /// Branch if carry set.
  Bcs: "bcs",
  /// Branch if equal.
  Beq: "beq",
  /// Branch if not equal.
  Bne: "bne",
  /// Branch if minus.
  Bmi: "bmi",
  /// Branch if plus.
  Bpl: "bpl",
  /// Branch if overflow clear.
  Bvc: "bvc",
  /// Branch if overflow set.
  Bvs: "bvs",
  /// Branch always.
  Bra: "bra",
  /// Branch to subroutine.
  ///
  /// A relative `jsr`, pushing the return address before branching.
  Bsr: "bsr",

  /// Jump.
  Jmp: "jmp",
  /// Jump to subroutine.
  Jsr: "jsr",
  /// Return from interrupt.
  Rti: "rti",
  /// Return from subroutine.
  Rts: "rts",

  /// Branch if bit 0 of a zero-page byte is reset.
  Bbr0: "bbr0",
  /// Branch if bit 1 is reset.
  Bbr1: "bbr1",
  /// Branch if bit 2 is reset.
  Bbr2: "bbr2",
  /// Branch if bit 3 is reset.
  Bbr3: "bbr3",
  /// Branch if bit 4 is reset.
  Bbr4: "bbr4",
  /// Branch if bit 5 is reset.
  Bbr5: "bbr5",
  /// Branch if bit 6 is reset.
  Bbr6: "bbr6",
  /// Branch if bit 7 is reset.
  Bbr7: "bbr7",
  /// Branch if bit 0 of a zero-page byte is set.
  Bbs0: "bbs0",
  /// Branch if bit 1 is set.
  Bbs1: "bbs1",
  /// Branch if bit 2 is set.
  Bbs2: "bbs2",
  /// Branch if bit 3 is set.
  Bbs3: "bbs3",
  /// Branch if bit 4 is set.
  Bbs4: "bbs4",
  /// Branch if bit 5 is set.
  Bbs5: "bbs5",
  /// Branch if bit 6 is set.
  Bbs6: "bbs6",
  /// Branch if bit 7 is set.
  Bbs7: "bbs7",
  /// Reset bit 0 of a zero-page byte.
  Rmb0: "rmb0",
  /// Reset bit 1.
  Rmb1: "rmb1",
  /// Reset bit 2.
  Rmb2: "rmb2",
  /// Reset bit 3.
  Rmb3: "rmb3",
  /// Reset bit 4.
  Rmb4: "rmb4",
  /// Reset bit 5.
  Rmb5: "rmb5",
  /// Reset bit 6.
  Rmb6: "rmb6",
  /// Reset bit 7.
  Rmb7: "rmb7",
  /// Set bit 0 of a zero-page byte.
  Smb0: "smb0",
  /// Set bit 1.
  Smb1: "smb1",
  /// Set bit 2.
  Smb2: "smb2",
  /// Set bit 3.
  Smb3: "smb3",
  /// Set bit 4.
  Smb4: "smb4",
  /// Set bit 5.
  Smb5: "smb5",
  /// Set bit 6.
  Smb6: "smb6",
  /// Set bit 7.
  Smb7: "smb7",

  /// Clear accumulator.
  Cla: "cla",
  /// Clear `x`.
  Clx: "clx",
  /// Clear `y`.
  Cly: "cly",
  /// Switch the CPU to high speed (7.16 MHz).
  Csh: "csh",
  /// Switch the CPU to low speed (1.79 MHz).
  Csl: "csl",
  /// Swap `a` and `x`.
  Sax: "sax",
  /// Swap `a` and `y`.
  Say: "say",
  /// Swap `x` and `y`.
  Sxy: "sxy",
  /// Set the `t` flag.
  ///
  /// The next arithmetic instruction operates on the zero-page byte at `x`
  /// instead of the accumulator.
  Set: "set",
  /// Store an immediate to VDC register select.
  St0: "st0",
  /// Store an immediate to the VDC low data port.
  St1: "st1",
  /// Store an immediate to the VDC high data port.
  St2: "st2",
  /// Transfer `a` to the mapping registers selected by the immediate mask.
  ///
  /// ```text
  /// for i in 0..8 {
  ///   if imm & (1 << i) != 0 { mpr[i] = a; }
  /// }
  /// ```
  Tam: "tam",
  /// Transfer a mapping register to `a`.
  Tma: "tma",
  /// Test bits against an immediate mask.
  Tst: "tst",
  /// Block transfer, alternating source, incrementing destination.
  Tai: "tai",
  /// Block transfer, decrementing source and destination.
  Tdd: "tdd",
  /// Block transfer, incrementing source, alternating destination.
  Tia: "tia",
  /// Block transfer, incrementing source and destination.
  Tii: "tii",
  /// Block transfer, incrementing source, fixed destination.
  Tin: "tin",
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn names_round_trip() {
    assert_eq!(Mnemonic::from_name("LDA"), Some(Mnemonic::Lda));
    assert_eq!("bbs7".parse::<Mnemonic>(), Ok(Mnemonic::Bbs7));
    assert_eq!(Mnemonic::Tii.name(), "tii");
    assert!(Mnemonic::from_name("ld").is_none());
  }

  #[test]
  fn branch_classes() {
    assert!(Mnemonic::Bra.is_branch());
    assert!(!Mnemonic::Bbr3.is_branch());
    assert!(Mnemonic::Bbr3.is_bit_branch());
    assert_eq!(Mnemonic::Beq.inverse(), Some(Mnemonic::Bne));
    assert_eq!(Mnemonic::Bra.inverse(), None);
  }
}
