//! The pass scheduler.
//!
//! Assembly runs the whole source several times:
//!
//! 1. `First` discovers symbols and branch sites. Afterwards, unreachable
//!    procedures are stripped and out-of-reach branches promoted.
//! 2. `Iterating` repeats until no branch is promoted and no symbol moves.
//! 3. `Extra` packs procedures into real banks once, then repeats with that
//!    layout until, again, nothing moves.
//! 4. `Final` writes bytes and the listing. Anything moving now is fatal.
//!
//! A pass that ends with errors stops the run before the next one starts.

use std::rc::Rc;

use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::error;
use crate::error::Severity;
use crate::syn::src::SourceFile;

impl Assembler {
  /// Runs every pass over `main`. Returns whether assembly succeeded.
  pub(in crate::asm) fn schedule(&mut self, main: Rc<SourceFile>) -> bool {
    self.pass = Pass::First;
    if !self.run_pass(&main) {
      return false;
    }
    if self.config.strip_procs {
      self.strip_procs();
    }
    self.check_branches();

    self.pass = Pass::Iterating;
    if !self.settle(&main) {
      return false;
    }

    self.pass = Pass::Extra;
    if let Err(e) = self.relocate() {
      self.report_as(e, error::Action::Relocating);
      return false;
    }
    let call_bank = self.config.trampoline_bank as i32;
    self.symbols.sym_mut(self.call_bank_sym).value = call_bank;
    if !self.settle(&main) {
      return false;
    }

    self.pass = Pass::Final;
    self.image.clear();
    if !self.run_pass(&main) {
      return false;
    }
    if let Err(e) = self.write_trampolines() {
      self.report_as(e, error::Action::Relocating);
      return false;
    }
    tracing::info!(
      passes = self.pass_number,
      banks = self.image.bank_count(),
      "assembly finished"
    );
    true
  }

  /// Repeats the current pass until no branch is promoted and no symbol
  /// moves, at most `max_passes` times.
  fn settle(&mut self, main: &Rc<SourceFile>) -> bool {
    for _ in 0..self.config.max_passes {
      if !self.run_pass(main) {
        return false;
      }
      let promoted = self.check_branches();
      if !promoted && !self.changed {
        return true;
      }
    }
    self.cur = None;
    self.report(ErrorType::Converge(self.pass_number));
    false
  }

  /// Puts everything that is rebuilt from scratch on each pass back where it
  /// starts.
  fn start_pass(&mut self, main: &Rc<SourceFile>) {
    self.symbols.start_pass();
    self.procs.start_pass();
    self.reset_locs();
    self.comments.reset();
    self.conds.clear();
    self.capture = None;
    self.scopes.clear();
    self.last_label = None;
    self.rs = 0;
    self.structs.clear();
    self.macro_counter = 0;
    self.branch_idx = 0;
    self.sizes.rollover();
    self.listing.reset();
    self.changed = false;

    self.input.clear();
    self.push_file(Rc::clone(main));
  }

  /// Runs one pass of the line loop. Returns whether the pass finished
  /// without errors.
  pub(in crate::asm) fn run_pass(&mut self, main: &Rc<SourceFile>) -> bool {
    self.pass_number += 1;
    tracing::debug!(pass = %self.pass, number = self.pass_number, "starting pass");
    self.start_pass(main);

    while !self.stop {
      let (text, info) = match self.next_line() {
        Some(line) => line,
        None => break,
      };
      self.cur = Some(info);
      self.line_bytes.clear();
      let start = self.loc();
      let was_stripped = self.procs.in_stripped();
      let from_macro = self.in_macro();

      if let Err(e) = self.process_line(&text) {
        self.report(e);
      }

      let stripped = was_stripped || self.procs.in_stripped();
      if self.pass == Pass::Final && !stripped {
        if let Some(info) = &self.cur {
          self.listing.record(
            start.bank,
            start.addr() as u16,
            &self.line_bytes,
            info,
            from_macro,
          );
        }
      }
    }

    if !self.stop {
      self.end_pass();
    }
    self.cur = None;
    self
      .errors
      .iter()
      .all(|e| e.inner.severity() < Severity::Error)
  }

  /// Reports blocks left open at the end of the source.
  fn end_pass(&mut self) {
    if let Some(cap) = self.capture.take() {
      self.cur = cap.start.clone();
      self.report(ErrorType::MissingEnd(cap.closer()));
    }
    self.cur = None;
    if self.conds.depth() > 0 {
      self.report(ErrorType::MissingEnd("endif"));
    }
    if let Some(e) = self.check_procs_closed() {
      self.report(e);
    }
    if let Some(s) = self.structs.last() {
      let name = s.name.clone();
      self.report(ErrorType::StructOpen(name));
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::asm::procs::ProcBank;
  use crate::asm::test::assemble_text;
  use crate::asm::test::bytes;
  use crate::asm::test::first_error;
  use crate::config::Config;
  use crate::rom::BANK_SIZE;

  #[test]
  fn multi_label_instances() {
    let out = assemble_text(
      "
  .org $e000
  .dw foo!+
foo!: nop
foo!: nop
foo!: nop
  .dw foo!-
",
    )
    .unwrap();
    assert_eq!(
      bytes(&out, 0, 0, 7),
      vec![0x02, 0xe0, 0xea, 0xea, 0xea, 0x04, 0xe0]
    );
  }

  #[test]
  fn stripping() {
    let out = assemble_text(
      "
  .org $e000
  jsr used
  rts
  .proc used
  jsr helper
  rts
  .endp
  .proc helper
  rts
  .endp
  .proc unused
  jsr other
  rts
  .endp
  .proc other
  rts
  .endp
",
    )
    .unwrap();
    let procs = out.procs();
    let bank = |name| procs.get(procs.by_name(name).unwrap()).bank;
    assert_eq!(bank("used"), ProcBank::Bank(1));
    assert_eq!(bank("helper"), ProcBank::Bank(1));
    assert_eq!(bank("unused"), ProcBank::Stripped);
    assert_eq!(bank("other"), ProcBank::Stripped);

    assert_eq!(bytes(&out, 0, 0, 4), vec![0x20, 0x00, 0xc0, 0x60]);
    assert_eq!(
      bytes(&out, 1, 0, 5),
      vec![0x20, 0x04, 0xc0, 0x60, 0x60]
    );
    assert_eq!(out.image.get(1, 5), None);
    assert_eq!(out.bank_of("helper"), Some(1));
  }

  #[test]
  fn nothing_is_stripped_when_disabled() {
    let mut config = Config::default();
    config.strip_procs = false;
    let mut asm = Assembler::new(config);
    asm.add_source("main.s", "  .proc lonely\n  rts\n  .endp\n");
    let out = asm.run(std::path::Path::new("main.s")).unwrap();
    let id = out.procs().by_name("lonely").unwrap();
    assert_eq!(out.procs().get(id).bank, ProcBank::Bank(1));
  }

  #[test]
  fn procedures_fit_their_banks() {
    let out = assemble_text(
      "
  .org $e000
  .ds $1000
  jsr first
  jsr second
  jsr third
  .proc first
  .ds $1800
  rts
  .endp
  .proc second
  .ds $0c00
  rts
  .endp
  .proc third
  .ds $0800
  rts
  .endp
",
    )
    .unwrap();

    let placed = out
      .procs()
      .iter()
      .map(|(_, p)| match p.bank {
        ProcBank::Bank(b) => (b, p.org as usize, p.size as usize),
        other => panic!("{} not placed: {:?}", p.name, other),
      })
      .collect::<Vec<_>>();
    for (i, &(bank, org, size)) in placed.iter().enumerate() {
      assert_ne!(bank, 0);
      assert!(org + size <= BANK_SIZE);
      for &(bank2, org2, size2) in &placed[i + 1..] {
        assert!(bank != bank2 || org + size <= org2 || org2 + size2 <= org);
      }
    }
    assert_eq!(placed[0].0, 1);
    assert_eq!(placed[1].0, 2);
    assert_eq!(placed[2], (2, 0xc01, 0x801));
    assert_eq!(out.lookup("_bank_count"), Some(3));
  }

  #[test]
  fn cross_bank_calls_use_trampolines() {
    let out = assemble_text(
      "
  .org $e000
main:
  call far
  rts
  .proc far, 2
  lda #1
  rts
  .endp
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 4), vec![0x20, 0xf2, 0xff, 0x60]);
    assert_eq!(
      bytes(&out, 0, 0x1ff2, 14),
      vec![
        0x43, 0x40, 0x48, 0xa9, 0x02, 0x53, 0x40, 0x20, 0x00, 0xc0, 0x68,
        0x53, 0x40, 0x60
      ]
    );
    assert_eq!(bytes(&out, 2, 0, 3), vec![0xa9, 0x01, 0x60]);
  }

  #[test]
  fn trampolines_avoid_fixed_code() {
    let out = assemble_text(
      "
  .org $e000
main:
  call far
  rts
  .org $fffe
  .dw main
  .proc far, 2
  lda #1
  rts
  .endp
",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 4), vec![0x20, 0xf0, 0xff, 0x60]);
    assert_eq!(
      bytes(&out, 0, 0x1ff0, 16),
      vec![
        0x43, 0x40, 0x48, 0xa9, 0x02, 0x53, 0x40, 0x20, 0x00, 0xc0, 0x68,
        0x53, 0x40, 0x60, 0x00, 0xe0
      ]
    );
  }

  #[test]
  fn trampoline_bank_can_fill_up() {
    let errors = assemble_text(
      "
  .org $e000
main:
  call far
  rts
  .ds $1ff2
  .proc far, 2
  rts
  .endp
",
    )
    .unwrap_err();
    assert!(matches!(first_error(&errors), ErrorType::TrampolineFull(_)));
  }

  #[test]
  fn runaway_values_never_converge() {
    let errors = assemble_text("a = b + 1\nb = a\n").unwrap_err();
    assert!(matches!(first_error(&errors), ErrorType::Converge(_)));
  }

  #[test]
  fn errors_stop_before_the_next_pass() {
    let errors = assemble_text("  .fail \"once\"\n").unwrap_err();
    assert_eq!(errors.len(), 1);
  }

  #[test]
  fn final_pass_is_idempotent() {
    let text = "
  .org $e000
  bne done
  lda table, x
  jsr work
done:
  rts
table: .db 1, 2, 3
  .proc work
  ldx #0
.loop:
  inx
  bne .loop
  rts
  .endp
";
    let mut asm = Assembler::new(Config::default());
    asm.add_source("main.s", text);
    let main = asm.sources.load_text("main.s", None).unwrap();
    assert!(asm.schedule(Rc::clone(&main)));

    let mut first = Vec::new();
    asm.image.write_raw(&mut first, false).unwrap();
    asm.image.clear();
    assert!(asm.run_pass(&main));
    let mut second = Vec::new();
    asm.image.write_raw(&mut second, false).unwrap();
    assert_eq!(first, second);
    assert!(asm.errors.is_empty());
  }

  #[test]
  fn listing_skips_stripped_code() {
    let out = assemble_text(
      "  .org $e000\n  nop\n  .proc dead\n  rts\n  .endp\n  .db 1\n",
    )
    .unwrap();
    let texts = out
      .listing
      .entries()
      .iter()
      .map(|e| e.line.text.trim())
      .collect::<Vec<_>>();
    assert_eq!(texts, vec![".org $e000", "nop", ".db 1"]);
    assert_eq!(out.listing.entries()[1].bytes, vec![0xea]);
  }
}
