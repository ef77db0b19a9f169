//! The hucasm command-line driver.

#![deny(unsafe_code)]

use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process;

use lazy_static::lazy_static;
use regex::Regex;
use structopt::StructOpt;
use tracing::Level;

use hucasm::asm;
use hucasm::config::Config;
use hucasm::isa::Machine;

#[derive(StructOpt)]
#[structopt(name = "hucasm", about = "A 6502-family cross-assembler")]
struct Args {
  /// The source file to assemble.
  #[structopt(parse(from_os_str))]
  input: PathBuf,

  /// The ROM image to write; defaults to the input renamed after the
  /// machine, as in `game.pce`.
  #[structopt(short, long, parse(from_os_str))]
  output: Option<PathBuf>,

  /// Extra directories to search for included files.
  #[structopt(short = "I", long = "include", parse(from_os_str))]
  include: Vec<PathBuf>,

  /// Predefined symbols, as `NAME` or `NAME=value`.
  #[structopt(short = "D", long = "define", parse(try_from_str = parse_define))]
  define: Vec<(String, i32)>,

  /// A JSON5 configuration file; flags override its settings.
  #[structopt(long, parse(from_os_str))]
  config: Option<PathBuf>,

  /// The target machine: `pce`, `nes` or `atari`.
  #[structopt(long, parse(try_from_str = parse_machine))]
  machine: Option<Machine>,

  /// Writes a listing to this file.
  #[structopt(long, parse(from_os_str))]
  listing: Option<PathBuf>,

  /// Writes the symbol table to this file.
  #[structopt(long, parse(from_os_str))]
  symbols: Option<PathBuf>,

  /// Leaves unwritten bytes at either end of the image out of the output.
  #[structopt(long)]
  trim: bool,

  /// One of `trace`, `debug`, `info`, `warn` or `error`.
  #[structopt(long, default_value = "warn")]
  log_level: Level,
}

/// Parses a `-D` argument. A bare name is defined as 1.
fn parse_define(arg: &str) -> Result<(String, i32), String> {
  lazy_static! {
    static ref DEFINE: Regex =
      Regex::new(r"^([A-Za-z_][A-Za-z0-9_.]*)(?:=(\$[0-9A-Fa-f]+|-?[0-9]+))?$")
        .unwrap();
  }
  let caps = DEFINE
    .captures(arg)
    .ok_or_else(|| format!("invalid NAME=value: `{}`", arg))?;
  let value = match caps.get(2).map(|m| m.as_str()) {
    None => 1,
    Some(hex) if hex.starts_with('$') => i32::from_str_radix(&hex[1..], 16)
      .map_err(|e| format!("invalid value in `{}`: {}", arg, e))?,
    Some(dec) => dec
      .parse()
      .map_err(|e| format!("invalid value in `{}`: {}", arg, e))?,
  };
  Ok((caps[1].to_string(), value))
}

fn parse_machine(arg: &str) -> Result<Machine, String> {
  Machine::from_name(arg).ok_or_else(|| format!("unknown machine: `{}`", arg))
}

/// Creates `path` and hands it to `write`, exiting on failure.
fn write_file(path: &Path, write: impl FnOnce(&mut File) -> io::Result<()>) {
  let result = File::create(path).and_then(|mut f| {
    write(&mut f)?;
    f.flush()
  });
  if let Err(e) = result {
    tracing::error!("cannot write {}: {}", path.display(), e);
    process::exit(1);
  }
}

fn main() {
  let args = Args::from_args();
  tracing_subscriber::fmt()
    .with_max_level(args.log_level)
    .with_writer(io::stderr)
    .init();

  let mut config = match &args.config {
    Some(path) => match Config::load(path) {
      Ok(config) => config,
      Err(e) => {
        tracing::error!("cannot load {}: {}", path.display(), e);
        process::exit(1);
      }
    },
    None => Config::default(),
  };
  if let Some(machine) = args.machine {
    config.machine = machine;
  }
  config.include_paths.extend(args.include.iter().cloned());
  config.defines.extend(args.define.iter().cloned());
  config.listing = config.listing || args.listing.is_some();
  tracing::debug!(?config, "configured");
  let extension = match config.machine {
    Machine::Pce => "pce",
    Machine::Nes => "nes",
    Machine::Atari => "bin",
  };

  let out = match asm::assemble(config, &args.input) {
    Ok(out) => out,
    Err(errors) => {
      errors.dump_and_die(1);
      process::exit(1);
    }
  };
  let _ = out.warnings.dump_to(io::stderr());

  let output = args
    .output
    .clone()
    .unwrap_or_else(|| args.input.with_extension(extension));
  write_file(&output, |f| {
    if out.header.is_set() {
      f.write_all(&out.header.to_ines())?;
    }
    out.image.write_raw(f, args.trim)
  });
  if let Some(path) = &args.listing {
    write_file(path, |f| out.listing.write(f));
  }
  if let Some(path) = &args.symbols {
    write_file(path, |f| out.write_symbols(f));
  }
  tracing::info!(
    output = %output.display(),
    banks = out.image.bank_count(),
    "wrote image"
  );
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn defines() {
    assert_eq!(parse_define("DEBUG"), Ok(("DEBUG".into(), 1)));
    assert_eq!(parse_define("LEVEL=-3"), Ok(("LEVEL".into(), -3)));
    assert_eq!(parse_define("BASE=$c000"), Ok(("BASE".into(), 0xc000)));
    assert!(parse_define("=3").is_err());
    assert!(parse_define("X=y").is_err());
  }

  #[test]
  fn machines() {
    assert_eq!(parse_machine("NES"), Ok(Machine::Nes));
    assert!(parse_machine("snes").is_err());
  }
}
