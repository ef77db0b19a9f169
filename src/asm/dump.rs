//! The symbol dump.

use std::io;

use crate::asm::procs::ProcBank;
use crate::asm::symbol::Kind;
use crate::asm::symbol::Symbol;
use crate::asm::Output;

impl Output {
  /// Returns whether `sym` belongs in the dump: a defined value the program
  /// itself named, outside any stripped procedure.
  fn dumped(&self, sym: &Symbol) -> bool {
    if !sym.defined || sym.builtin || sym.is_multi() {
      return false;
    }
    if !matches!(sym.kind, Kind::Location | Kind::Constant | Kind::Variable) {
      return false;
    }
    match sym.proc {
      Some(p) => {
        let unit = self.procs.unit_of(p);
        self.procs.get(unit).bank != ProcBank::Stripped
      }
      None => true,
    }
  }

  /// Writes every symbol as `bank<TAB>value<TAB>name`, sorted by name, with
  /// each label's locals indented beneath it. Values are shown as 16 bits.
  pub fn write_symbols(&self, mut w: impl io::Write) -> io::Result<()> {
    let mut globals = self
      .symbols
      .iter()
      .filter(|(_, sym)| sym.parent.is_none() && self.dumped(sym))
      .collect::<Vec<_>>();
    globals.sort_by(|a, b| a.1.name.cmp(&b.1.name));

    for (_, sym) in globals {
      let value = sym.value & 0xffff;
      writeln!(w, "{:02X}\t{:04X}\t{}", sym.bank, value, sym.name)?;
      for &id in &sym.locals {
        let local = self.symbols.sym(id);
        if !self.dumped(local) {
          continue;
        }
        let name = local.name.strip_prefix(&sym.name).unwrap_or(&local.name);
        let value = local.value & 0xffff;
        writeln!(w, "\t{:02X}\t{:04X}\t{}", local.bank, value, name)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use crate::asm::test::assemble_text;

  #[test]
  fn dump_format() {
    let out = assemble_text(
      "
limit = $10
neg = -2
  .org $e000
main:
.loop:
  bra .loop
  .bank 1
  .org $c000
data:
!:
  .db 1
",
    )
    .unwrap();
    let mut text = Vec::new();
    out.write_symbols(&mut text).unwrap();
    assert_eq!(
      String::from_utf8(text).unwrap(),
      "01\tC000\tdata\n00\t0010\tlimit\n00\tE000\tmain\n\t00\tE000\t.loop\n\
       00\tFFFE\tneg\n"
    );
  }
}
