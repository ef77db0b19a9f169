//! Storage widths for assembled values.
//!
//! Expressions evaluate to `i32`; `.db`, `.dw` and `.dd` store them as one,
//! two or four little-endian bytes.

use std::fmt;

/// How many bytes a stored value takes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Width {
  /// A byte.
  I8,
  /// A word.
  I16,
  /// A double word.
  I32,
}

impl Width {
  /// Returns the number of bytes a value of this width occupies.
  pub fn bytes(self) -> usize {
    match self {
      Self::I8 => 1,
      Self::I16 => 2,
      Self::I32 => 4,
    }
  }

  /// Checks that `val` can be stored in this width without losing anything
  /// but sign bits.
  ///
  /// Both readings are accepted, so a byte holds anything from -128 to 255.
  ///
  /// ```
  /// # use hucasm::int::Width;
  /// assert!(Width::I8.in_range(255));
  /// assert!(Width::I8.in_range(-128));
  /// assert!(!Width::I8.in_range(256));
  /// assert!(!Width::I16.in_range(-32769));
  /// ```
  pub fn in_range(self, val: i32) -> bool {
    match self {
      Self::I8 => (-0x80..=0xff).contains(&val),
      Self::I16 => (-0x8000..=0xffff).contains(&val),
      Self::I32 => true,
    }
  }

  /// Returns the little-endian bytes of `val`, truncated to this width.
  pub fn le_bytes(self, val: i32) -> impl Iterator<Item = u8> {
    let bytes = val.to_le_bytes();
    (0..self.bytes()).map(move |i| bytes[i])
  }
}

impl fmt::Display for Width {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    let name = match self {
      Self::I8 => "byte",
      Self::I16 => "word",
      Self::I32 => "dword",
    };
    f.write_str(name)
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn le_bytes_truncate() {
    let bytes = Width::I16.le_bytes(0x12345).collect::<Vec<_>>();
    assert_eq!(bytes, vec![0x45, 0x23]);
    let bytes = Width::I32.le_bytes(-1).collect::<Vec<_>>();
    assert_eq!(bytes, vec![0xff; 4]);
  }

  #[test]
  fn ranges() {
    assert!(Width::I16.in_range(0xffff));
    assert!(Width::I16.in_range(-32768));
    assert!(!Width::I16.in_range(0x10000));
    assert!(Width::I32.in_range(i32::MIN));
    assert_eq!(Width::I16.to_string(), "word");
  }
}
