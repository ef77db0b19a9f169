//! External data: `.incbin` and the graphics include family.
//!
//! The assembler itself only knows how to place bytes. Converting images,
//! palettes or tile maps into bytes is the job of a [`DataProvider`], which
//! receives the directive's file (already loaded) and its numeric arguments,
//! and returns the bytes to place at the current location. `.incbin` is served
//! by a built-in provider.
//!
//! [`DataProvider`]: trait.DataProvider.html

use std::fmt;
use std::path::Path;

use crate::asm::symbol::SymbolId;
use crate::asm::Assembler;
use crate::asm::ErrorType;
use crate::syn::args::split_args;
use crate::syn::token::unescape;

/// The kind of data a label names.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DataKind {
  /// Bytes from `.db`.
  Byte,
  /// Words from `.dw`, `.dwl` or `.dwh`.
  Word,
  /// Double words from `.dd`.
  Dword,
  /// Raw bytes from `.incbin`.
  Binary,
  /// Character (background tile) data from `.incchr`.
  Chr,
  /// Sprite data from `.incspr`.
  Spr,
  /// Palette data from `.incpal`.
  Pal,
  /// A background attribute table from `.incbat`.
  Bat,
  /// Tile data from `.inctile`.
  Tile,
}

impl DataKind {
  /// Returns the directive name associated with this kind.
  pub fn name(self) -> &'static str {
    match self {
      Self::Byte => "db",
      Self::Word => "dw",
      Self::Dword => "dd",
      Self::Binary => "incbin",
      Self::Chr => "incchr",
      Self::Spr => "incspr",
      Self::Pal => "incpal",
      Self::Bat => "incbat",
      Self::Tile => "inctile",
    }
  }
}

impl fmt::Display for DataKind {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}", self.name())
  }
}

/// A request for external data.
#[derive(Debug)]
pub struct DataRequest<'a> {
  /// Which directive made the request.
  pub kind: DataKind,
  /// The file named by the directive.
  pub file: &'a Path,
  /// The contents of `file`.
  pub data: &'a [u8],
  /// The remaining arguments, evaluated.
  pub args: &'a [i32],
}

/// The bytes produced for a request.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct DataBlock {
  /// The bytes to place at the current location.
  pub bytes: Vec<u8>,
  /// The number of elements (tiles, sprites, colors) the bytes hold.
  pub count: usize,
  /// The VRAM address the data is meant for, if the provider knows it.
  pub vram: Option<i32>,
  /// The palette index the data uses, if the provider knows it.
  pub pal: Option<i32>,
}

/// A source of converted data.
pub trait DataProvider {
  /// Produces the bytes for `request`, or a message describing why it cannot.
  fn load(&mut self, request: &DataRequest) -> Result<DataBlock, String>;
}

/// The `.incbin` provider: the file's bytes, optionally sliced by an offset
/// and a length.
#[derive(Copy, Clone, Debug, Default)]
pub struct BinaryProvider;

impl DataProvider for BinaryProvider {
  fn load(&mut self, request: &DataRequest) -> Result<DataBlock, String> {
    let data = request.data;
    let start = request.args.get(0).copied().unwrap_or(0);
    if start < 0 || start as usize > data.len() {
      return Err(format!("offset {} is outside the file", start));
    }
    let start = start as usize;
    let len = match request.args.get(1) {
      Some(&len) if len < 0 || start + len as usize > data.len() => {
        return Err(format!("length {} runs past the end of the file", len))
      }
      Some(&len) => len as usize,
      None => data.len() - start,
    };
    let bytes = data[start..start + len].to_vec();
    Ok(DataBlock {
      count: bytes.len(),
      bytes,
      ..DataBlock::default()
    })
  }
}

/// Returns the file name held by a string-literal argument.
pub(in crate::asm) fn file_arg(arg: &str) -> Option<String> {
  let arg = arg.trim();
  if arg.len() >= 2 && arg.starts_with('"') && arg.ends_with('"') {
    String::from_utf8(unescape(&arg[1..arg.len() - 1])).ok()
  } else {
    None
  }
}

impl Assembler {
  /// Handles `.incbin` and the graphics includes: loads the file, asks the
  /// provider for bytes, and places them.
  pub(in crate::asm) fn include_data(
    &mut self,
    kind: DataKind,
    operand: &str,
    label: Option<SymbolId>,
  ) -> Result<(), ErrorType> {
    self.check_rom_section()?;
    let args = split_args(operand);
    let name = args
      .get(0)
      .and_then(|a| file_arg(a))
      .ok_or(ErrorType::BadArgs(kind.name()))?;

    let mut values = Vec::with_capacity(args.len().saturating_sub(1));
    for arg in args.iter().skip(1) {
      values.push(self.eval(arg)?.value);
    }

    let from = self.cur.as_ref().map(|c| c.file.clone());
    let data = self
      .sources
      .load_data(&name, from.as_deref())
      .map_err(|e| ErrorType::FileNotFound(name.clone(), e.to_string()))?;

    let request = DataRequest {
      kind,
      file: Path::new(&name),
      data: &data[..],
      args: &values,
    };
    let block = if kind == DataKind::Binary {
      BinaryProvider.load(&request)
    } else {
      match self.provider.as_mut() {
        Some(provider) => provider.load(&request),
        None => return Err(ErrorType::NoDataProvider(kind.name())),
      }
    }
    .map_err(ErrorType::DataProvider)?;

    if let Some(id) = label {
      let sym = self.symbols.sym_mut(id);
      sym.data_kind = Some(kind);
      sym.data_size = block.bytes.len() as i32;
      sym.data_count = block.count as i32;
      sym.vram = block.vram;
      sym.pal = block.pal;
    }
    for byte in block.bytes {
      self.emit(byte)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  fn request<'a>(data: &'a [u8], args: &'a [i32]) -> DataRequest<'a> {
    DataRequest {
      kind: DataKind::Binary,
      file: Path::new("x.bin"),
      data,
      args,
    }
  }

  #[test]
  fn binary_slices() {
    let data = [1, 2, 3, 4, 5];
    let block = BinaryProvider.load(&request(&data, &[])).unwrap();
    assert_eq!(block.bytes, vec![1, 2, 3, 4, 5]);
    assert_eq!(block.count, 5);

    let block = BinaryProvider.load(&request(&data, &[1, 2])).unwrap();
    assert_eq!(block.bytes, vec![2, 3]);

    assert!(BinaryProvider.load(&request(&data, &[4, 2])).is_err());
    assert!(BinaryProvider.load(&request(&data, &[6])).is_err());
  }

  #[test]
  fn file_args() {
    assert_eq!(file_arg(" \"gfx/font.pcx\" "), Some("gfx/font.pcx".into()));
    assert_eq!(file_arg("font"), None);
  }
}
