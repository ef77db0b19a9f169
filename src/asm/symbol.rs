//! The symbol table.
//!
//! Symbols live in an arena and are referred to by `SymbolId`; a name map
//! gives the id for a fully qualified name. Symbols are never removed. At the
//! start of every pass each symbol forgets whether it was defined or referenced,
//! but remembers what it looked like in the previous pass so that forward
//! references and layout changes can be detected.

use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::asm::data::DataKind;
use crate::asm::procs::ProcId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::asm::Pass;
use crate::rom::Section;
use crate::syn::line::Label;

/// An index into the symbol table.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct SymbolId(usize);

/// What a symbol stands for.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
  /// Referenced, but never defined.
  Undefined,
  /// An address, defined by a label.
  Location,
  /// A constant, defined by `=` or `.equ`.
  Constant,
  /// A variable, defined by `.set`; may be redefined freely.
  Variable,
  /// A macro.
  Macro,
  /// A user function, defined by `.func`.
  Function,
  /// Another name for a different symbol.
  Alias,
  /// The counter behind a multi-label.
  Multi,
}

/// A symbol table entry.
#[derive(Clone, Debug)]
pub struct Symbol {
  /// The fully qualified name.
  pub name: String,
  /// What this symbol currently stands for.
  pub kind: Kind,
  /// The value, normally a logical address.
  pub value: i32,
  /// The bank the value lives in.
  pub bank: u32,
  /// The MPR page the value is mapped through.
  pub page: u8,
  /// The overlay index.
  pub overlay: i32,
  /// The section the symbol was defined in.
  pub section: Option<Section>,

  /// Whether the symbol was defined during this pass.
  pub defined: bool,
  /// Whether the symbol was referenced during this pass.
  pub referenced: bool,
  /// Whether the symbol was defined during the previous pass.
  pub prev_defined: bool,
  /// Whether the symbol was referenced during the previous pass.
  pub prev_referenced: bool,
  /// The value at the end of the previous pass.
  pub prev_value: i32,
  /// The bank at the end of the previous pass.
  pub prev_bank: u32,

  /// The procedure this symbol was defined in.
  pub proc: Option<ProcId>,
  /// VRAM address attached by data providers.
  pub vram: Option<i32>,
  /// Palette index attached by data providers.
  pub pal: Option<i32>,
  /// The kind of data this label names.
  pub data_kind: Option<DataKind>,
  /// The size, in bytes, of the data this label names.
  pub data_size: i32,
  /// The number of elements in the data this label names.
  pub data_count: i32,

  /// Local labels chained under this one.
  pub locals: Vec<SymbolId>,
  /// The label this local is chained under.
  pub parent: Option<SymbolId>,
  /// For multi-label counters: instances defined so far in this pass.
  pub defcnt: i32,
  /// Where the symbol was defined.
  pub location: Option<(PathBuf, usize)>,
  /// Whether the assembler owns this symbol.
  pub builtin: bool,

  /// The body of a macro.
  pub macro_body: Option<Rc<[String]>>,
  /// The body of a user function.
  pub func_body: Option<Rc<str>>,
  /// The target of an alias.
  pub alias: Option<SymbolId>,
}

impl Symbol {
  fn new(name: &str) -> Self {
    Self {
      name: name.to_string(),
      kind: Kind::Undefined,
      value: 0,
      bank: 0,
      page: 0,
      overlay: 0,
      section: None,
      defined: false,
      referenced: false,
      prev_defined: false,
      prev_referenced: false,
      prev_value: 0,
      prev_bank: 0,
      proc: None,
      vram: None,
      pal: None,
      data_kind: None,
      data_size: 0,
      data_count: 0,
      locals: Vec::new(),
      parent: None,
      defcnt: 0,
      location: None,
      builtin: false,
      macro_body: None,
      func_body: None,
      alias: None,
    }
  }

  /// Returns whether this symbol has a value this pass or had one last pass.
  pub fn is_known(&self) -> bool {
    self.defined || self.prev_defined || self.builtin
  }

  /// Returns whether this symbol is the hidden counter or an instance of a
  /// multi-label.
  pub fn is_multi(&self) -> bool {
    self.name.starts_with('!')
  }
}

/// The symbol arena.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
  syms: Vec<Symbol>,
  by_name: HashMap<String, SymbolId>,
}

impl SymbolTable {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Looks up a fully qualified name.
  pub fn get(&self, name: &str) -> Option<SymbolId> {
    self.by_name.get(name).copied()
  }

  /// Looks up a fully qualified name, creating an undefined symbol if needed.
  pub fn install(&mut self, name: &str) -> SymbolId {
    if let Some(id) = self.get(name) {
      return id;
    }
    let id = SymbolId(self.syms.len());
    self.syms.push(Symbol::new(name));
    self.by_name.insert(name.to_string(), id);
    id
  }

  /// Returns the symbol behind `id`.
  pub fn sym(&self, id: SymbolId) -> &Symbol {
    &self.syms[id.0]
  }

  /// Returns the symbol behind `id`, mutably.
  pub fn sym_mut(&mut self, id: SymbolId) -> &mut Symbol {
    &mut self.syms[id.0]
  }

  /// Iterates over every symbol, in creation order.
  pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
    self.syms.iter().enumerate().map(|(i, s)| (SymbolId(i), s))
  }

  /// Iterates mutably over every symbol.
  pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Symbol> {
    self.syms.iter_mut()
  }

  /// Installs an assembler-owned constant.
  pub fn builtin(&mut self, name: &str, value: i32) -> SymbolId {
    let id = self.install(name);
    let sym = self.sym_mut(id);
    sym.kind = Kind::Constant;
    sym.value = value;
    sym.prev_value = value;
    sym.builtin = true;
    sym.defined = true;
    id
  }

  /// Rolls every symbol over into a new pass.
  pub fn start_pass(&mut self) {
    for sym in &mut self.syms {
      if sym.builtin {
        continue;
      }
      sym.prev_defined = sym.defined;
      sym.prev_referenced = sym.referenced;
      sym.prev_value = sym.value;
      sym.prev_bank = sym.bank;
      sym.defined = false;
      sym.referenced = false;
      sym.defcnt = 0;
    }
  }
}

/// Returns whether `name` names a local label.
pub fn is_local(name: &str) -> bool {
  name.starts_with('.') || name.starts_with('@')
}

/// Returns the key of instance `n` of the multi-label `name`.
fn multi_instance(name: &str, n: i32) -> String {
  format!("!{}#{}", name, n)
}

impl Assembler {
  /// Returns the symbol behind `id`.
  pub(in crate::asm) fn sym(&self, id: SymbolId) -> &Symbol {
    self.symbols.sym(id)
  }

  /// Turns a possibly-local name into a fully qualified key.
  fn local_key(&self, name: &str) -> Result<String, ErrorType> {
    match self.last_label {
      Some(parent) => Ok(format!("{}{}", self.sym(parent).name, name)),
      None => Err(ErrorType::NoParentLabel(name.to_string())),
    }
  }

  /// Returns the candidate keys for an unqualified name, innermost first.
  fn scoped_keys(&self, name: &str) -> Vec<String> {
    self
      .scopes
      .iter()
      .rev()
      .map(|scope| format!("{}.{}", scope, name))
      .chain(std::iter::once(name.to_string()))
      .collect()
  }

  /// Resolves a name appearing in an expression to a symbol, installing it
  /// if it has never been seen.
  pub(in crate::asm) fn resolve(
    &mut self,
    name: &str,
  ) -> Result<SymbolId, ErrorType> {
    if is_local(name) {
      let key = self.local_key(name)?;
      return Ok(self.symbols.install(&key));
    }

    let keys = self.scoped_keys(name);
    let known = keys
      .iter()
      .filter_map(|k| self.symbols.get(k))
      .find(|&id| self.sym(id).is_known());
    let existing = || keys.iter().find_map(|k| self.symbols.get(k));
    let id = match known.or_else(existing) {
      Some(id) => id,
      None => self.symbols.install(&keys[0]),
    };
    self.follow_alias(id)
  }

  fn follow_alias(&self, mut id: SymbolId) -> Result<SymbolId, ErrorType> {
    for _ in 0..8 {
      match (self.sym(id).kind, self.sym(id).alias) {
        (Kind::Alias, Some(target)) => id = target,
        _ => return Ok(id),
      }
    }
    Err(ErrorType::AliasLoop(self.sym(id).name.clone()))
  }

  /// Resolves a multi-label reference such as `name!++`.
  pub(in crate::asm) fn resolve_multi(
    &mut self,
    name: &str,
    steps: i32,
  ) -> Result<SymbolId, ErrorType> {
    let counter = self.symbols.install(&format!("!{}", name));
    let defcnt = self.sym(counter).defcnt;
    let n = if steps > 0 {
      defcnt + steps
    } else {
      defcnt + steps + 1
    };
    if n <= 0 {
      return Err(ErrorType::MultiLabelRange(format!("{}!", name)));
    }
    Ok(self.symbols.install(&multi_instance(name, n)))
  }

  /// Returns the key a label definition of `name` installs.
  fn definition_key(&self, name: &str) -> Result<String, ErrorType> {
    if is_local(name) {
      return self.local_key(name);
    }
    Ok(match self.scopes.last() {
      Some(scope) => format!("{}.{}", scope, name),
      None => name.to_string(),
    })
  }

  /// Installs the symbol a definition of `name` refers to, without defining
  /// it yet.
  pub(in crate::asm) fn install_definition(
    &mut self,
    name: &str,
  ) -> Result<SymbolId, ErrorType> {
    if let Some(base) = name.strip_suffix('!') {
      let counter = self.symbols.install(&format!("!{}", base));
      let sym = self.symbols.sym_mut(counter);
      sym.kind = Kind::Multi;
      sym.defcnt += 1;
      let n = sym.defcnt;
      return Ok(self.symbols.install(&multi_instance(base, n)));
    }

    let key = self.definition_key(name)?;
    let id = self.symbols.install(&key);
    if is_local(name) && self.sym(id).parent.is_none() {
      if let Some(parent) = self.last_label {
        self.symbols.sym_mut(id).parent = Some(parent);
        self.symbols.sym_mut(parent).locals.push(id);
      }
    }
    Ok(id)
  }

  /// Defines the label at the start of a line as the current location.
  pub(in crate::asm) fn define_label(
    &mut self,
    label: &Label,
  ) -> Result<SymbolId, ErrorType> {
    let id = self.install_definition(label.name)?;
    let pc = self.pc();
    self.define(id, pc, Kind::Location)?;
    if !label.is_multi() && !is_local(label.name) {
      self.last_label = Some(id);
    }
    Ok(id)
  }

  /// Defines `id` with `value`, for the given reason.
  ///
  /// Symbols may be defined once per pass, unless they are variables. A
  /// location or constant that moves relative to the previous pass requests
  /// another pass, and is fatal during the final one.
  pub(in crate::asm) fn define(
    &mut self,
    id: SymbolId,
    value: i32,
    reason: Kind,
  ) -> Result<(), ErrorType> {
    let (bank, page, section) = match reason {
      Kind::Location => {
        let loc = self.loc();
        (loc.bank, loc.page, Some(self.section))
      }
      _ => (0, 0, None),
    };
    let proc = self.procs.current();
    let location = self.cur.as_ref().map(|l| (l.file.clone(), l.line));
    let pass = self.pass;

    let sym = self.symbols.sym_mut(id);
    if sym.builtin || matches!(sym.kind, Kind::Macro | Kind::Function) {
      return Err(ErrorType::Redefined(sym.name.clone()));
    }

    if sym.defined {
      let same = sym.kind == reason && sym.value == value && sym.bank == bank;
      if reason == Kind::Variable && sym.kind == Kind::Variable {
        sym.value = value;
        return Ok(());
      } else if !same {
        return Err(ErrorType::Redefined(sym.name.clone()));
      }
      return Ok(());
    }

    let mut moved = false;
    if matches!(reason, Kind::Location | Kind::Constant) {
      if sym.prev_defined {
        moved = sym.prev_value != value || sym.prev_bank != bank;
      } else if pass != Pass::First {
        moved = true;
      }
    }

    sym.kind = reason;
    sym.value = value;
    sym.bank = bank;
    sym.page = page;
    sym.section = section;
    sym.defined = true;
    sym.location = location;
    if reason == Kind::Location {
      sym.proc = proc;
    }

    if moved {
      if pass == Pass::Final {
        return Err(ErrorType::SymbolMoved(sym.name.clone()));
      }
      tracing::trace!(symbol = %sym.name, value, "symbol moved");
      self.changed = true;
    }
    Ok(())
  }

  /// Marks `id` as referenced, recording the reference for procedure
  /// stripping.
  pub(in crate::asm) fn reference(&mut self, id: SymbolId) {
    self.symbols.sym_mut(id).referenced = true;
    if self.pass == Pass::First {
      let from = self.procs.current();
      self.procs.record_ref(from, id);
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::config::Config;
  use crate::error::Severity;

  #[test]
  fn install_is_idempotent() {
    let mut table = SymbolTable::new();
    let a = table.install("foo");
    let b = table.install("foo");
    assert_eq!(a, b);
    assert_eq!(table.sym(a).kind, Kind::Undefined);
    assert_eq!(table.get("bar"), None);
  }

  #[test]
  fn pass_rollover() {
    let mut table = SymbolTable::new();
    let id = table.install("foo");
    {
      let sym = table.sym_mut(id);
      sym.kind = Kind::Location;
      sym.value = 0xe000;
      sym.defined = true;
    }
    let builtin = table.builtin("_bank_count", 1);
    table.start_pass();

    let sym = table.sym(id);
    assert!(!sym.defined);
    assert!(sym.prev_defined);
    assert_eq!(sym.prev_value, 0xe000);
    assert!(sym.is_known());
    assert!(table.sym(builtin).defined);
  }

  #[test]
  fn locals_and_multis() {
    assert!(is_local(".loop"));
    assert!(is_local("@x"));
    assert!(!is_local("main.loop"));
    assert_eq!(multi_instance("", 2), "!#2");
  }

  #[test]
  fn moving_is_fatal_in_the_final_pass() {
    let mut asm = Assembler::new(Config::default());
    let id = asm.symbols.install("start");
    asm.define(id, 0xe000, Kind::Constant).unwrap();

    asm.symbols.start_pass();
    asm.pass = Pass::Iterating;
    asm.define(id, 0xe002, Kind::Constant).unwrap();
    assert!(asm.changed);

    asm.symbols.start_pass();
    asm.pass = Pass::Final;
    let err = asm.define(id, 0xe004, Kind::Constant).unwrap_err();
    assert_eq!(err, ErrorType::SymbolMoved("start".into()));
    assert_eq!(err.severity(), Severity::Fatal);
  }
}
