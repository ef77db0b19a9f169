//! Assembler configuration.
//!
//! A [`Config`] can be loaded from a JSON5 file, and every field has a
//! default, so an empty file (or no file at all) is a valid configuration.
//! Command-line flags are applied on top by the binary.
//!
//! [`Config`]: struct.Config.html

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;

use crate::isa::Machine;

/// How cross-bank `call`s switch banks.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStyle {
  /// A 14-byte trampoline that clobbers `a`.
  Legacy,
  /// An 18-byte trampoline that preserves `a` and `y` by swapping through
  /// `say`.
  New,
}

impl Default for CallStyle {
  fn default() -> Self {
    CallStyle::Legacy
  }
}

/// Configuration for a whole assembly run.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
  /// The target machine.
  pub machine: Machine,
  /// The highest bank number code may be placed in.
  pub max_bank: u32,
  /// The ROM size limit in banks, if any.
  pub rom_size_limit: Option<u32>,
  /// Extra directories searched by `.include` and `.incbin`.
  pub include_paths: Vec<PathBuf>,
  /// Symbols predefined as constants before the first pass.
  pub defines: Vec<(String, i32)>,
  /// Whether procedures unreachable from non-procedure code are removed.
  pub strip_procs: bool,
  /// Whether out-of-range branches are promoted to long forms.
  pub auto_branch: bool,
  /// Whether every promoted branch is reported with a warning.
  pub warn_long_branch: bool,
  /// The trampoline shape used for cross-bank calls.
  pub call_style: CallStyle,
  /// The MPR page procedures are mapped through.
  pub proc_page: u8,
  /// The bank holding call trampolines.
  pub trampoline_bank: u32,
  /// The MPR page trampolines are mapped through.
  pub trampoline_page: u8,
  /// Whether `//` and `/* */` comments are recognized.
  pub c_comments: bool,
  /// Whether the listing starts enabled.
  pub listing: bool,
  /// The most passes the `Iterating` and `Extra` states may each run.
  pub max_passes: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      machine: Machine::Pce,
      max_bank: 0x7f,
      rom_size_limit: None,
      include_paths: Vec::new(),
      defines: Vec::new(),
      strip_procs: true,
      auto_branch: true,
      warn_long_branch: false,
      call_style: CallStyle::Legacy,
      proc_page: 6,
      trampoline_bank: 0,
      trampoline_page: 7,
      c_comments: true,
      listing: true,
      max_passes: 16,
    }
  }
}

/// An error encountered while loading a configuration file.
#[derive(Debug)]
pub enum ConfigError {
  /// The file could not be read.
  Io(io::Error),
  /// The file is not valid JSON5, or does not describe a `Config`.
  Parse(json5::Error),
}

impl fmt::Display for ConfigError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      ConfigError::Io(e) => write!(f, "{}", e),
      ConfigError::Parse(e) => write!(f, "{}", e),
    }
  }
}

impl std::error::Error for ConfigError {}

impl Config {
  /// Parses a configuration from JSON5 text.
  pub fn from_json5(text: &str) -> Result<Self, ConfigError> {
    json5::from_str(text).map_err(ConfigError::Parse)
  }

  /// Loads a configuration from a JSON5 file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = fs::read_to_string(path).map_err(ConfigError::Io)?;
    Self::from_json5(&text)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn defaults() {
    let config = Config::from_json5("{}").unwrap();
    assert_eq!(config.machine, Machine::Pce);
    assert_eq!(config.max_bank, 0x7f);
    assert!(config.strip_procs);
    assert_eq!(config.call_style, CallStyle::Legacy);
  }

  #[test]
  fn overrides() {
    let config = Config::from_json5(
      r#"{
        // Target the NES.
        machine: "nes",
        call_style: "new",
        defines: [["DEBUG", 1]],
        max_passes: 4,
      }"#,
    )
    .unwrap();
    assert_eq!(config.machine, Machine::Nes);
    assert_eq!(config.call_style, CallStyle::New);
    assert_eq!(config.defines, vec![("DEBUG".to_string(), 1)]);
    assert_eq!(config.max_passes, 4);
  }

  #[test]
  fn unknown_fields_are_rejected() {
    assert!(Config::from_json5("{ bogus: 1 }").is_err());
  }
}
