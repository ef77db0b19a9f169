//! Error printing facilities.
//!
//! These functions are used to simplify the display of various assembler
//! diagnostics to the user. The [`Error`] trait describes how a Rust error type
//! can be converted into a simple diagnostic.
//!
//! Every diagnostic carries a [`Severity`]. Warnings never stop assembly,
//! errors stop it after the current pass, and fatal errors stop it at once.
//!
//! [`Error`]: trait.Error.html
//! [`Severity`]: enum.Severity.html

use std::fmt;
use std::io;
use std::path::Path;

/// An error which can be described as a diagnostic.
///
/// Types that implement `Error` must also implement [`std::fmt::Display`]. For
/// the user-displayed error to look right, this implementation should only be
/// one line long.
///
/// [`std::fmt::Display`]: https://doc.rust-lang.org/std/fmt/trait.Display.html
pub trait Error: fmt::Debug + fmt::Display {
  /// Returns a `Cause` describing the input that resulted in the error.
  fn cause(&self) -> Cause<'_>;
  /// Returns an action this error is associated with, if any at all.
  fn action(&self) -> Option<Action>;
  /// Returns how bad this error is.
  fn severity(&self) -> Severity;
}

/// How serious a diagnostic is.
///
/// This enum is ordered: `Warning < Error < Fatal`.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Severity {
  /// Recorded and shown, but does not block output.
  Warning,
  /// Counted; the current pass finishes but no further pass is started.
  Error,
  /// Stops all further line processing immediately.
  Fatal,
}

impl Severity {
  fn describe(self) -> &'static str {
    match self {
      Self::Warning => "warning",
      Self::Error => "error",
      Self::Fatal => "fatal",
    }
  }
}

/// A collection of errors that may built up over the course of an action.
///
/// The type parameter `E` should be a type implementing [`Error`].
///
/// [`Error`]: trait.Error.html
#[derive(Debug)]
pub struct Errors<E>(Vec<E>);

impl<E> Errors<E> {
  /// Creates an empty `Errors`.
  pub fn new() -> Self {
    Errors(Vec::new())
  }

  /// Returns true if nothing at all has been added yet.
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Returns the number of diagnostics, of any severity.
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Adds a new error to this `Errors`.
  pub fn push(&mut self, error: E) {
    self.0.push(error);
  }

  /// Extends this `Errors` by consuming another `Errors`.
  pub fn extend(&mut self, mut errors: Errors<E>) {
    self.0.reserve(errors.0.len());
    for e in errors.0.drain(..) {
      self.push(e);
    }
  }

  /// Returns an iterator over the collected diagnostics.
  pub fn iter(&self) -> impl Iterator<Item = &E> {
    self.0.iter()
  }
}

impl<E> Default for Errors<E> {
  fn default() -> Self {
    Self::new()
  }
}

impl<E: Error> Errors<E> {
  /// Returns true if this `Errors` contains nothing worse than warnings.
  pub fn is_ok(&self) -> bool {
    self.error_count() == 0
  }

  /// Returns the number of diagnostics that are errors or fatal errors.
  pub fn error_count(&self) -> usize {
    self
      .0
      .iter()
      .filter(|e| e.severity() >= Severity::Error)
      .count()
  }

  /// Returns the number of warnings.
  pub fn warning_count(&self) -> usize {
    self
      .0
      .iter()
      .filter(|e| e.severity() == Severity::Warning)
      .count()
  }

  /// Returns true if any fatal error was recorded.
  pub fn has_fatal(&self) -> bool {
    self.0.iter().any(|e| e.severity() == Severity::Fatal)
  }

  /// Dumps this collection of errors as user-displayable text into `sink`.
  ///
  /// Returns `Ok(true)` if anything was written.
  pub fn dump_to(&self, mut sink: impl io::Write) -> io::Result<bool> {
    if self.0.is_empty() {
      return Ok(false);
    }

    for (i, error) in self.0.iter().enumerate() {
      writeln!(sink, "{}: {}", error.severity().describe(), error)?;
      match error.cause() {
        Cause::Line { file, line, text } => {
          if let Some(action) = error.action() {
            writeln!(
              sink,
              "  while {} {}:{}",
              action.describe(),
              file.display(),
              line
            )?;
          } else {
            writeln!(sink, "  at {}:{}", file.display(), line)?;
          }
          writeln!(sink, "{} | {}", line, text.trim_end_matches('\n'))?;
        }
        Cause::File(path) => {
          if let Some(action) = error.action() {
            writeln!(sink, "  while {} {}", action.describe(), path.display())?;
          } else {
            writeln!(sink, "  at {}", path.display())?;
          }
        }
        Cause::Nowhere => {
          if let Some(action) = error.action() {
            writeln!(sink, "  while {}", action.describe())?;
          }
        }
      }

      if i != self.0.len() - 1 {
        writeln!(sink)?;
      }
    }

    Ok(true)
  }

  /// Calls `dump_to()` on `stderr`, exiting the process with the given
  /// `exit_code` if any errors are present.
  pub fn dump_and_die(self, code: i32) {
    // Writing to stderr is fairly unlikely to fail, so panicking is a fine
    // response here.
    self.dump_to(io::stderr()).unwrap();
    if !self.is_ok() {
      eprintln!();
      eprintln!("error: there were {} errors", self.error_count());
      std::process::exit(code)
    }
  }
}

/// The place where an error occured, to varrying degrees of specificity.
pub enum Cause<'a> {
  /// A line within a file, allowing the offending line to be shown to the
  /// user. Line numbers are one-indexed.
  Line {
    /// The file the line came from.
    file: &'a Path,
    /// The line number.
    line: usize,
    /// The text of the line.
    text: &'a str,
  },
  /// A file, for when we don't know much about where the error came from
  /// within.
  File(&'a Path),
  /// Errors that come from the assembly as a whole, like running out of banks.
  Nowhere,
}

/// An action that the assembler performs, which an error may be associated
/// with.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Action {
  /// Reading source or data files.
  Loading,
  /// The assembly step, converting lines into bytes.
  Assembling,
  /// Packing procedures into banks.
  Relocating,
  /// Writing output files.
  Writing,
}

impl Action {
  fn describe(self) -> &'static str {
    match self {
      Self::Loading => "loading",
      Self::Assembling => "assembling",
      Self::Relocating => "relocating",
      Self::Writing => "writing",
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[derive(Debug)]
  struct Dummy(Severity);

  impl fmt::Display for Dummy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
      write!(f, "dummy")
    }
  }

  impl Error for Dummy {
    fn cause(&self) -> Cause<'_> {
      Cause::Line {
        file: Path::new("main.s"),
        line: 3,
        text: "  lda #1",
      }
    }
    fn action(&self) -> Option<Action> {
      Some(Action::Assembling)
    }
    fn severity(&self) -> Severity {
      self.0
    }
  }

  #[test]
  fn warnings_are_ok() {
    let mut errors = Errors::new();
    errors.push(Dummy(Severity::Warning));
    assert!(errors.is_ok());
    assert_eq!(errors.warning_count(), 1);

    errors.push(Dummy(Severity::Fatal));
    assert!(!errors.is_ok());
    assert!(errors.has_fatal());
    assert_eq!(errors.error_count(), 1);
  }

  #[test]
  fn dump_format() {
    let mut errors = Errors::new();
    errors.push(Dummy(Severity::Error));
    let mut out = Vec::new();
    assert!(errors.dump_to(&mut out).unwrap());
    let text = String::from_utf8(out).unwrap();
    assert_eq!(
      text,
      "error: dummy\n  while assembling main.s:3\n3 |   lda #1\n"
    );
  }
}
