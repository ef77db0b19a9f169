//! 6502-family addressing modes.
//!
//! Each variant describes how an instruction's operand bytes are used to
//! compute an effective address. The assembler syntax is demonstrated with the
//! unused opcode `xyz`; indirect forms are shown with brackets, which every
//! machine accepts.

/// A 6502-family addressing mode.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum AddrMode {
  /// No operand: `xyz`.
  Implied,
  /// Accumulator: `xyz a`.
  Acc,
  /// Immediate: `xyz #$12`.
  Imm,
  /// Zero page: `xyz $12`.
  Zp,
  /// Zero page, `x`-indexed: `xyz $12, x`.
  ZpX,
  /// Zero page, `y`-indexed: `xyz $12, y`.
  ZpY,
  /// Absolute: `xyz $1234`.
  Abs,
  /// Absolute, `x`-indexed: `xyz $1234, x`.
  AbsX,
  /// Absolute, `y`-indexed: `xyz $1234, y`.
  AbsY,
  /// Zero page indirect: `xyz [$12]`.
  ///
  /// ```text
  /// let addr = *(zp + imm);
  /// ```
  ZpInd,
  /// Zero page, `x`-indexed indirect: `xyz [$12, x]`.
  ///
  /// ```text
  /// let addr = *(zp + imm + x);
  /// ```
  ZpIndX,
  /// Zero page indirect, `y`-indexed: `xyz [$12], y`.
  ///
  /// ```text
  /// let addr = *(zp + imm) + y;
  /// ```
  ZpIndY,
  /// Absolute indirect: `jmp [$1234]`.
  AbsInd,
  /// Absolute, `x`-indexed indirect: `jmp [$1234, x]`.
  AbsIndX,
  /// `pc`-relative: `xyz label`.
  Rel,
  /// Zero page and `pc`-relative, for bit branches: `bbr0 $12, label`.
  ZpRel,
  /// Immediate and zero page: `tst #$12, $34`.
  ImmZp,
  /// Immediate and zero page, `x`-indexed: `tst #$12, $34, x`.
  ImmZpX,
  /// Immediate and absolute: `tst #$12, $3456`.
  ImmAbs,
  /// Immediate and absolute, `x`-indexed: `tst #$12, $3456, x`.
  ImmAbsX,
  /// Block transfer: `tii $1234, $5678, $9abc`.
  Block,
}

impl AddrMode {
  /// Returns the number of operand bytes following the opcode.
  pub fn operand_len(self) -> usize {
    match self {
      Self::Implied | Self::Acc => 0,
      Self::Imm
      | Self::Zp
      | Self::ZpX
      | Self::ZpY
      | Self::ZpInd
      | Self::ZpIndX
      | Self::ZpIndY
      | Self::Rel => 1,
      Self::Abs
      | Self::AbsX
      | Self::AbsY
      | Self::AbsInd
      | Self::AbsIndX
      | Self::ZpRel
      | Self::ImmZp
      | Self::ImmZpX => 2,
      Self::ImmAbs | Self::ImmAbsX => 3,
      Self::Block => 6,
    }
  }

  /// Returns the absolute counterpart of a zero-page mode, if there is one.
  pub fn widened(self) -> Option<Self> {
    match self {
      Self::Zp => Some(Self::Abs),
      Self::ZpX => Some(Self::AbsX),
      Self::ZpY => Some(Self::AbsY),
      Self::ZpInd => Some(Self::AbsInd),
      Self::ZpIndX => Some(Self::AbsIndX),
      Self::ImmZp => Some(Self::ImmAbs),
      Self::ImmZpX => Some(Self::ImmAbsX),
      _ => None,
    }
  }

  /// Returns whether the first memory operand of this mode is a zero-page
  /// byte.
  pub fn is_zp(self) -> bool {
    self.widened().is_some() || matches!(self, Self::ZpIndY | Self::ZpRel)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn widening() {
    assert_eq!(AddrMode::ZpX.widened(), Some(AddrMode::AbsX));
    assert_eq!(AddrMode::ZpIndY.widened(), None);
    assert!(AddrMode::ZpIndY.is_zp());
    assert!(!AddrMode::Abs.is_zp());
    assert_eq!(AddrMode::Block.operand_len(), 6);
  }
}
