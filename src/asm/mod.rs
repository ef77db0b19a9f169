//! The hucasm assembler, for converting assembly sources into a bank image.
//!
//! Assembly is a sequence of passes over the whole source, driven by the
//! scheduler in [`pass`]. Every pass runs the same line loop: fetch a line from
//! the input stack, split it into fields, then hand it to the instruction
//! encoder, a pseudo-op, or a macro. Only the final pass writes bytes.
//!
//! [`pass`]: pass/index.html

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::path::PathBuf;

use crate::asm::code::Branch;
use crate::asm::code::SizeLog;
use crate::asm::cond::Conds;
use crate::asm::dir::Directive;
use crate::asm::emit::Loc;
use crate::asm::emit::Usage;
use crate::asm::input::Capture;
use crate::asm::input::Frame;
use crate::asm::procs::ProcTable;
use crate::asm::symbol::Kind;
use crate::asm::symbol::SymbolId;
use crate::asm::symbol::SymbolTable;
use crate::config::Config;
use crate::error;
use crate::error::Errors;
use crate::error::Severity;
use crate::isa::Cpu;
use crate::isa::Machine;
use crate::isa::Mnemonic;
use crate::listing::Listing;
use crate::rom::Image;
use crate::rom::RomError;
use crate::rom::RomHeader;
use crate::rom::Section;
use crate::syn::comment::CommentFolder;
use crate::syn::line::Line;
use crate::syn::src::Sources;
use crate::syn::token::LexError;

pub mod data;
pub mod procs;
pub mod symbol;

mod code;
mod cond;
mod dir;
mod dump;
mod emit;
mod expr;
mod input;
mod pass;

pub use data::DataBlock;
pub use data::DataKind;
pub use data::DataProvider;
pub use data::DataRequest;
pub use expr::Value;

/// Assembles the file at `path` with the given configuration.
///
/// Returns the finished `Output` on success, or every diagnostic collected
/// before assembly stopped.
pub fn assemble(config: Config, path: &Path) -> Result<Output, Errors<Error>> {
  Assembler::new(config).run(path)
}

/// The state of the pass scheduler.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Pass {
  /// The first pass: discovers symbols and branch sites.
  First,
  /// Passes repeated until no branch is promoted and no symbol moves.
  Iterating,
  /// Passes run with the relocated procedure layout.
  Extra,
  /// The last pass, which writes bytes.
  Final,
}

impl fmt::Display for Pass {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      Pass::First => "first",
      Pass::Iterating => "iterating",
      Pass::Extra => "extra",
      Pass::Final => "final",
    };
    f.write_str(name)
  }
}

/// An error type, not including the line that caused it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErrorType {
  /// A line that does not fit the line grammar, at the given column.
  Syntax(usize),
  /// An operand that could not be lexed.
  Lex(LexError),
  /// An op that is neither an instruction, a directive nor a macro.
  UnknownInstruction(String),
  /// A `.`-prefixed op that names no directive.
  UnknownDirective(String),
  /// An operand whose syntax no addressing mode of the mnemonic accepts.
  BadAddressing(Mnemonic),
  /// A directive with missing or malformed arguments.
  BadArgs(&'static str),
  /// A directive that may not appear inside a procedure.
  InProc(&'static str),

  /// A symbol that is still undefined in the final pass.
  Undefined(String),
  /// Division or modulo by zero.
  DivideByZero,
  /// A malformed expression.
  ExprSyntax(String),
  /// An expression nesting too deep for the evaluator's stacks.
  ExprTooComplex,
  /// Unbalanced parentheses in an expression.
  UnbalancedParens,
  /// A pseudo-function given something other than a single symbol.
  FunctionArg(&'static str),
  /// A string literal where a number is expected.
  StringInExpr,
  /// User functions calling each other too deeply.
  FunctionDepth,
  /// A malformed `bank:address` pair.
  BankAddr,

  /// A value that does not fit its operand.
  OperandRange(i32),
  /// A zero-page operand outside the zero page.
  ZpRange(i32),
  /// A branch target that is out of reach.
  BranchRange(i32),
  /// A branch that was promoted to its long form.
  LongBranch(Mnemonic),
  /// An instruction that runs over the end of its bank.
  BankCrossing,

  /// A local label with no global label before it.
  NoParentLabel(String),
  /// An alias chain that never ends.
  AliasLoop(String),
  /// A multi-label reference before the label's first instance.
  MultiLabelRange(String),
  /// A symbol defined twice, differently.
  Redefined(String),
  /// A symbol whose address changed during the final pass.
  SymbolMoved(String),
  /// An instruction whose size changed during the final pass.
  SizeChanged(u16, u16),
  /// The passes never settled.
  Converge(usize),

  /// A macro defined inside another macro.
  MacroNested,
  /// A macro defined twice in one pass.
  MacroRedefined(String),
  /// Macros expanding into each other too deeply.
  MacroDepth,
  /// Includes nested too deeply.
  IncludeDepth,
  /// A closing directive with nothing to close.
  Unmatched(&'static str),
  /// A block left open at the end of the source.
  MissingEnd(&'static str),
  /// A file that could not be opened.
  FileNotFound(String, String),

  /// A data include with no provider to serve it.
  NoDataProvider(&'static str),
  /// A data provider refused a request.
  DataProvider(String),
  /// Data placed in a RAM section.
  DataInRam(&'static str),

  /// A procedure still open at the end of the source.
  ProcOpen(String),
  /// `.endp` with no procedure to close.
  EndpWithoutProc,
  /// `.endp` at a different conditional depth than its `.proc`.
  ProcIfMismatch,
  /// A procedure crossing the end of its bank.
  ProcStraddle(String),
  /// A procedure that changed size after it was placed.
  ProcGrew(String, u16, u16),
  /// A procedure that fits in no bank.
  NoBankForProc(String, u16),
  /// The trampoline bank is full.
  TrampolineFull(String),
  /// A cross-bank call on a CPU without bank mapping.
  CrossBankCall(String),
  /// A `.struct` still open at the end of the source.
  StructOpen(String),

  /// A write outside the allowed banks.
  Rom(RomError),
  /// `.fail`.
  User(String),
  /// `.warn`.
  UserWarning(String),
}

impl ErrorType {
  /// Returns how serious this error is.
  pub fn severity(&self) -> Severity {
    use ErrorType::*;
    match self {
      LongBranch(_) | BankCrossing | UserWarning(_) => Severity::Warning,
      SymbolMoved(_)
      | SizeChanged(..)
      | ProcOpen(_)
      | ProcStraddle(_)
      | ProcGrew(..)
      | NoBankForProc(..)
      | TrampolineFull(_)
      | StructOpen(_)
      | Rom(_) => Severity::Fatal,
      _ => Severity::Error,
    }
  }
}

impl fmt::Display for ErrorType {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    use ErrorType::*;
    match self {
      Syntax(col) => write!(f, "syntax error at column {}", col + 1),
      Lex(e) => write!(f, "{}", e),
      UnknownInstruction(op) => write!(f, "unknown instruction: {}", op),
      UnknownDirective(op) => write!(f, "unknown directive: {}", op),
      BadAddressing(mne) => write!(f, "incorrect addressing mode for {}", mne.name()),
      BadArgs(dir) => write!(f, "bad arguments to .{}", dir),
      InProc(dir) => write!(f, ".{} is not allowed inside a procedure", dir),

      Undefined(name) => write!(f, "undefined symbol: {}", name),
      DivideByZero => write!(f, "divide by zero"),
      ExprSyntax(what) => write!(f, "malformed expression: {}", what),
      ExprTooComplex => write!(f, "expression too complex"),
      UnbalancedParens => write!(f, "unbalanced parentheses"),
      FunctionArg(func) => write!(f, "{}() needs exactly one symbol", func),
      StringInExpr => write!(f, "string where a number is expected"),
      FunctionDepth => write!(f, "user functions nested too deeply"),
      BankAddr => write!(f, "bad bank:address pair"),

      OperandRange(v) => write!(f, "operand out of range: ${:x}", v),
      ZpRange(v) => write!(f, "not a zero-page address: ${:x}", v),
      BranchRange(d) => write!(f, "branch out of range by {} bytes", d),
      LongBranch(mne) => write!(f, "{} promoted to a long branch", mne.name()),
      BankCrossing => write!(f, "instruction crosses a bank boundary"),

      NoParentLabel(name) => write!(f, "local label {} has no parent", name),
      AliasLoop(name) => write!(f, "alias loop through {}", name),
      MultiLabelRange(name) => write!(f, "no such instance of {}", name),
      Redefined(name) => write!(f, "{} already defined differently", name),
      SymbolMoved(name) => {
        write!(f, "address of {} changed in the final pass", name)
      }
      SizeChanged(was, now) => write!(
        f,
        "instruction size changed in the final pass ({} to {} bytes)",
        was, now
      ),
      Converge(n) => write!(f, "failed to converge after {} passes", n),

      MacroNested => write!(f, "macros cannot be defined inside macros"),
      MacroRedefined(name) => write!(f, "macro {} already defined", name),
      MacroDepth => write!(f, "macros nested too deeply"),
      IncludeDepth => write!(f, "includes nested too deeply"),
      Unmatched(dir) => write!(f, ".{} without a matching opener", dir),
      MissingEnd(dir) => write!(f, "missing .{}", dir),
      FileNotFound(name, why) => write!(f, "cannot open {}: {}", name, why),

      NoDataProvider(dir) => write!(f, "no data provider for .{}", dir),
      DataProvider(why) => write!(f, "{}", why),
      DataInRam(section) => {
        write!(f, "cannot place data in the .{} section", section)
      }

      ProcOpen(name) => write!(f, "procedure {} is never closed", name),
      EndpWithoutProc => write!(f, ".endp without .proc"),
      ProcIfMismatch => write!(f, ".endp and .proc in different .if blocks"),
      ProcStraddle(name) => write!(f, "procedure {} crosses a bank boundary", name),
      ProcGrew(name, was, now) => write!(
        f,
        "procedure {} changed size after placement ({} to {} bytes)",
        name, was, now
      ),
      NoBankForProc(name, size) => {
        write!(f, "no bank has room for {} ({} bytes)", name, size)
      }
      TrampolineFull(banks) => write!(f, "trampoline bank is full{}", banks),
      CrossBankCall(name) => {
        write!(f, "cannot call {} in another bank on this CPU", name)
      }
      StructOpen(name) => write!(f, "struct {} is never closed", name),

      Rom(e) => write!(f, "{}", e),
      User(msg) => write!(f, "{}", msg),
      UserWarning(msg) => write!(f, "{}", msg),
    }
  }
}

/// A source location: a file, a line within it, and the line's text.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct LineInfo {
  /// The file the line came from.
  pub file: PathBuf,
  /// The one-indexed line number.
  pub line: usize,
  /// The text of the line, after macro substitution.
  pub text: String,
}

/// An error produced during the assembly process.
#[derive(Clone, Debug)]
pub struct Error {
  /// The type of error.
  pub inner: ErrorType,
  /// The line at which the error was encountered, if any.
  pub line: Option<LineInfo>,
  /// What the assembler was doing at the time.
  pub action: error::Action,
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.inner)
  }
}

impl error::Error for Error {
  fn cause(&self) -> error::Cause<'_> {
    match &self.line {
      Some(l) => error::Cause::Line {
        file: &l.file,
        line: l.line,
        text: &l.text,
      },
      None => error::Cause::Nowhere,
    }
  }

  fn action(&self) -> Option<error::Action> {
    Some(self.action)
  }

  fn severity(&self) -> Severity {
    self.inner.severity()
  }
}

/// The result of a successful assembly.
#[derive(Debug)]
pub struct Output {
  /// The assembled banks.
  pub image: Image,
  /// The listing, as recorded during the final pass.
  pub listing: Listing,
  /// Values set by the `.ines*` directives.
  pub header: RomHeader,
  /// Warnings raised during the final pass.
  pub warnings: Errors<Error>,
  symbols: SymbolTable,
  procs: ProcTable,
}

impl Output {
  /// Returns the value of the defined symbol with the given fully
  /// qualified name.
  pub fn lookup(&self, name: &str) -> Option<i32> {
    let id = self.symbols.get(name)?;
    let sym = self.symbols.sym(id);
    match sym.kind {
      Kind::Location | Kind::Constant | Kind::Variable if sym.defined => {
        Some(sym.value)
      }
      _ => None,
    }
  }

  /// Returns the bank of the defined symbol with the given name.
  pub fn bank_of(&self, name: &str) -> Option<u32> {
    self.lookup(name)?;
    self.symbols.get(name).map(|id| self.symbols.sym(id).bank)
  }

  /// Returns the procedure table as it stood after the final pass.
  pub fn procs(&self) -> &ProcTable {
    &self.procs
  }
}

/// Bookkeeping for an open `.struct`.
#[derive(Clone, Debug)]
struct StructFrame {
  name: String,
  saved_rs: i32,
}

/// The main state struct for the assembler.
pub struct Assembler {
  /// Run-wide settings.
  config: Config,
  machine: Machine,
  cpu: Cpu,
  sources: Sources,
  provider: Option<Box<dyn DataProvider>>,

  pass: Pass,
  /// Number of passes run so far, of any kind.
  pass_number: usize,
  /// Set whenever something moved relative to the previous pass.
  changed: bool,
  /// Set by fatal errors; checked before every line.
  stop: bool,

  section: Section,
  locs: HashMap<Section, Loc>,
  /// The offset each bank was left at, per section, restored by `.bank`.
  bank_locs: HashMap<(Section, u32), u16>,
  /// Bytes written by code outside procedures, this pass.
  usage: Usage,
  /// Bank usage after procedure placement.
  layout: Usage,

  symbols: SymbolTable,
  scopes: Vec<String>,
  last_label: Option<SymbolId>,
  rs: i32,
  structs: Vec<StructFrame>,
  bank_count_sym: SymbolId,
  call_bank_sym: SymbolId,

  input: Vec<Frame>,
  comments: CommentFolder,
  conds: Conds,
  capture: Option<Capture>,
  macro_counter: u32,

  branches: Vec<Branch>,
  branch_idx: usize,
  sizes: SizeLog,

  procs: ProcTable,

  image: Image,
  listing: Listing,
  header: RomHeader,
  cur: Option<LineInfo>,
  line_bytes: Vec<u8>,
  errors: Errors<Error>,

  _not_send: PhantomData<*const ()>,
}

impl Assembler {
  /// Creates a new assembler for the given configuration.
  pub fn new(config: Config) -> Self {
    let machine = config.machine;
    let mut symbols = SymbolTable::new();
    let bank_count_sym = symbols.builtin("_bank_count", 0);
    let call_bank_sym =
      symbols.builtin("_call_bank", config.trampoline_bank as i32);
    for (name, value) in &config.defines {
      symbols.builtin(name, *value);
    }

    Self {
      machine,
      cpu: machine.cpu(),
      sources: Sources::new(config.include_paths.clone()),
      provider: None,

      pass: Pass::First,
      pass_number: 0,
      changed: false,
      stop: false,

      section: Section::Code,
      locs: HashMap::new(),
      bank_locs: HashMap::new(),
      usage: Usage::new(),
      layout: Usage::new(),

      symbols,
      scopes: Vec::new(),
      last_label: None,
      rs: 0,
      structs: Vec::new(),
      bank_count_sym,
      call_bank_sym,

      input: Vec::new(),
      comments: CommentFolder::new(),
      conds: Conds::new(),
      capture: None,
      macro_counter: 0,

      branches: Vec::new(),
      branch_idx: 0,
      sizes: SizeLog::default(),

      procs: ProcTable::new(),

      image: Image::new(config.max_bank, config.rom_size_limit),
      listing: Listing::new(config.listing),
      header: RomHeader::default(),
      cur: None,
      line_bytes: Vec::new(),
      errors: Errors::new(),

      config,
      _not_send: PhantomData,
    }
  }

  /// Installs the provider that serves `.incchr` and the other graphics
  /// includes.
  pub fn with_provider(mut self, provider: Box<dyn DataProvider>) -> Self {
    self.provider = Some(provider);
    self
  }

  /// Registers an in-memory source file, which `run()` and `.include` will
  /// find before looking at the filesystem.
  pub fn add_source(&mut self, name: impl Into<PathBuf>, text: &str) {
    self.sources.add_virtual(name, text);
  }

  /// Registers an in-memory binary file for `.incbin` and friends.
  pub fn add_data(&mut self, name: impl Into<PathBuf>, data: &[u8]) {
    self.sources.add_virtual_data(name, data);
  }

  /// Runs every pass over the file at `path`.
  pub fn run(mut self, path: &Path) -> Result<Output, Errors<Error>> {
    let name = path.to_string_lossy().into_owned();
    let main = match self.sources.load_text(&name, None) {
      Ok(file) => file,
      Err(e) => {
        let mut errors = Errors::new();
        errors.push(Error {
          inner: ErrorType::FileNotFound(name, e.to_string()),
          line: None,
          action: error::Action::Loading,
        });
        return Err(errors);
      }
    };

    if !self.schedule(main) {
      return Err(self.errors);
    }

    Ok(Output {
      image: self.image,
      listing: self.listing,
      header: self.header,
      warnings: self.errors,
      symbols: self.symbols,
      procs: self.procs,
    })
  }

  /// Records an error at the current line.
  ///
  /// Warnings are only kept during the final pass, since earlier passes may
  /// see layouts that never make it to the output.
  fn report(&mut self, inner: ErrorType) {
    self.report_as(inner, error::Action::Assembling);
  }

  fn report_as(&mut self, inner: ErrorType, action: error::Action) {
    let severity = inner.severity();
    if severity == Severity::Warning && self.pass != Pass::Final {
      return;
    }
    if severity == Severity::Fatal {
      self.stop = true;
    }
    tracing::debug!(pass = %self.pass, error = %inner, "diagnostic");
    self.errors.push(Error {
      inner,
      line: self.cur.clone(),
      action,
    });
  }

  /// Returns whether `word`, found at the start of a line, is an op rather
  /// than a label. Macro names are not: a macro call must be indented.
  fn is_keyword(&self, word: &str) -> bool {
    if let Some(name) = word.strip_prefix('.') {
      return Directive::from_name(name).is_some();
    }
    Mnemonic::from_name(word).is_some()
      || word.eq_ignore_ascii_case("call")
      || Directive::from_name(word).map_or(false, Directive::dotless)
  }

  /// Returns the macro named `name`, if one is defined.
  fn find_macro(&self, name: &str) -> Option<SymbolId> {
    self
      .symbols
      .get(name)
      .filter(|&id| self.sym(id).kind == Kind::Macro)
  }

  /// Assembles one line of source.
  fn process_line(&mut self, text: &str) -> Result<(), ErrorType> {
    let folded = if self.config.c_comments {
      self.comments.fold(text)
    } else {
      text.into()
    };
    let parsed = Line::parse(&folded, |w| self.is_keyword(w));
    if self.capture.is_some() {
      return self.capture_line(text, parsed.as_ref().ok());
    }
    let line = parsed.map_err(|e| ErrorType::Syntax(e.offset))?;

    if !self.conds.active() {
      return self.skip_line(&line);
    }
    if line.is_blank() {
      return Ok(());
    }

    let op = match line.op {
      Some(op) => Some(self.classify(op)?),
      None => None,
    };
    let takes_label = match op {
      Some(Op::Directive(d)) => d.takes_label(),
      _ => false,
    };
    let label = match line.label {
      Some(label) if !takes_label => Some(self.define_label(&label)?),
      _ => None,
    };

    match op {
      None => Ok(()),
      Some(Op::Instruction(mne)) => self.instruction(mne, line.operand),
      Some(Op::Call) => self.call(line.operand),
      Some(Op::Macro(id)) => self.expand_macro(id, line.operand),
      Some(Op::Directive(d)) => {
        self.directive(d, line.label.as_ref(), label, line.operand)
      }
    }
  }

  /// Works out what kind of op `op` is.
  fn classify(&self, op: &str) -> Result<Op, ErrorType> {
    if op == "=" {
      return Ok(Op::Directive(Directive::Equ));
    }
    if let Some(name) = op.strip_prefix('.') {
      return Directive::from_name(name)
        .map(Op::Directive)
        .ok_or_else(|| ErrorType::UnknownDirective(op.to_string()));
    }
    if let Some(mne) = Mnemonic::from_name(op) {
      return Ok(Op::Instruction(mne));
    }
    if op.eq_ignore_ascii_case("call") {
      return Ok(Op::Call);
    }
    if let Some(id) = self.find_macro(op) {
      return Ok(Op::Macro(id));
    }
    match Directive::from_name(op) {
      Some(d) if d.dotless() => Ok(Op::Directive(d)),
      _ => Err(ErrorType::UnknownInstruction(op.to_string())),
    }
  }
}

/// What a line's op turned out to be.
#[derive(Copy, Clone, Debug)]
enum Op {
  Instruction(Mnemonic),
  Call,
  Macro(SymbolId),
  Directive(Directive),
}

#[cfg(test)]
mod test {
  use super::*;

  /// Assembles `text` as the file `main.s` with the default configuration.
  pub(in crate::asm) fn assemble_text(text: &str) -> Result<Output, Errors<Error>> {
    assemble_with(Config::default(), text)
  }

  pub(in crate::asm) fn assemble_with(
    config: Config,
    text: &str,
  ) -> Result<Output, Errors<Error>> {
    let mut asm = Assembler::new(config);
    asm.add_source("main.s", text);
    asm.run(Path::new("main.s"))
  }

  /// Returns the first error's type.
  pub(in crate::asm) fn first_error(errors: &Errors<Error>) -> ErrorType {
    errors
      .iter()
      .find(|e| e.inner.severity() >= Severity::Error)
      .map(|e| e.inner.clone())
      .expect("no errors")
  }

  /// Reads `len` bytes from the image.
  pub(in crate::asm) fn bytes(out: &Output, bank: u32, offset: u16, len: u16) -> Vec<u8> {
    (offset..offset + len)
      .map(|o| out.image.get(bank, o).unwrap_or(0))
      .collect()
  }

  #[test]
  fn missing_file() {
    let errors = Assembler::new(Config::default())
      .run(Path::new("no/such/file.s"))
      .unwrap_err();
    assert!(matches!(first_error(&errors), ErrorType::FileNotFound(..)));
  }

  #[test]
  fn severities() {
    assert_eq!(ErrorType::DivideByZero.severity(), Severity::Error);
    assert_eq!(ErrorType::BankCrossing.severity(), Severity::Warning);
    assert_eq!(
      ErrorType::SymbolMoved("x".into()).severity(),
      Severity::Fatal
    );
  }

  #[test]
  fn unknown_ops() {
    let errors = assemble_text("  frob 1\n").unwrap_err();
    assert_eq!(
      first_error(&errors),
      ErrorType::UnknownInstruction("frob".into())
    );
    let errors = assemble_text("  .frob 1\n").unwrap_err();
    assert_eq!(
      first_error(&errors),
      ErrorType::UnknownDirective(".frob".into())
    );
  }

  #[test]
  fn defines_from_config() {
    let mut config = Config::default();
    config.defines.push(("DEBUG".into(), 1));
    let out = assemble_with(
      config,
      "  .org $e000\n  .if DEBUG\n  lda #1\n  .else\n  lda #2\n  .endif\n",
    )
    .unwrap();
    assert_eq!(bytes(&out, 0, 0, 2), vec![0xa9, 0x01]);
  }
}
