//! Source files: loading, include-path search, and in-memory files.
//!
//! Every pass re-reads the same sources, so files are read from disk once and
//! shared afterwards through `Rc`.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::rc::Rc;

/// A loaded text file, split into lines.
#[derive(Debug)]
pub struct SourceFile {
  path: PathBuf,
  lines: Vec<String>,
}

impl SourceFile {
  /// Creates a file from `text`, splitting it into lines.
  pub fn new(path: impl Into<PathBuf>, text: &str) -> Self {
    Self {
      path: path.into(),
      lines: text.lines().map(String::from).collect(),
    }
  }

  /// Returns the path this file was loaded from, or its virtual name.
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Returns the lines of this file, without line terminators.
  pub fn lines(&self) -> &[String] {
    &self.lines
  }
}

/// A cache of every file the assembler has opened.
#[derive(Debug, Default)]
pub struct Sources {
  include_paths: Vec<PathBuf>,
  virtual_text: HashMap<PathBuf, Rc<SourceFile>>,
  virtual_data: HashMap<PathBuf, Rc<[u8]>>,
  text: HashMap<PathBuf, Rc<SourceFile>>,
  data: HashMap<PathBuf, Rc<[u8]>>,
}

impl Sources {
  /// Creates a new cache which searches `include_paths` after the including
  /// file's directory.
  pub fn new(include_paths: Vec<PathBuf>) -> Self {
    Self {
      include_paths,
      ..Self::default()
    }
  }

  /// Registers an in-memory text file under `name`.
  ///
  /// Virtual files take priority over the filesystem.
  pub fn add_virtual(&mut self, name: impl Into<PathBuf>, text: &str) {
    let name = name.into();
    let file = Rc::new(SourceFile::new(name.clone(), text));
    self.virtual_text.insert(name, file);
  }

  /// Registers an in-memory binary file under `name`.
  pub fn add_virtual_data(&mut self, name: impl Into<PathBuf>, data: &[u8]) {
    self.virtual_data.insert(name.into(), data.into());
  }

  /// Loads a text file, searching next to `from` and then the include paths.
  pub fn load_text(
    &mut self,
    name: &str,
    from: Option<&Path>,
  ) -> io::Result<Rc<SourceFile>> {
    if let Some(file) = self.virtual_text.get(Path::new(name)) {
      return Ok(Rc::clone(file));
    }
    let path = self.resolve(name, from)?;
    if let Some(file) = self.text.get(&path) {
      return Ok(Rc::clone(file));
    }

    let bytes = fs::read(&path)?;
    let text = String::from_utf8_lossy(&bytes);
    let file = Rc::new(SourceFile::new(path.clone(), &text));
    self.text.insert(path, Rc::clone(&file));
    Ok(file)
  }

  /// Loads a binary file, searching the same places as `load_text()`.
  pub fn load_data(
    &mut self,
    name: &str,
    from: Option<&Path>,
  ) -> io::Result<Rc<[u8]>> {
    if let Some(data) = self.virtual_data.get(Path::new(name)) {
      return Ok(Rc::clone(data));
    }
    let path = self.resolve(name, from)?;
    if let Some(data) = self.data.get(&path) {
      return Ok(Rc::clone(data));
    }

    let data: Rc<[u8]> = fs::read(&path)?.into();
    self.data.insert(path, Rc::clone(&data));
    Ok(data)
  }

  fn resolve(&self, name: &str, from: Option<&Path>) -> io::Result<PathBuf> {
    let name = Path::new(name);
    if name.is_absolute() {
      return Ok(name.to_path_buf());
    }

    let dir = from.and_then(Path::parent);
    dir
      .into_iter()
      .map(|d| d.join(name))
      .chain(std::iter::once(name.to_path_buf()))
      .chain(self.include_paths.iter().map(|d| d.join(name)))
      .find(|p| p.is_file())
      .ok_or_else(|| {
        io::Error::new(
          io::ErrorKind::NotFound,
          format!("cannot find {}", name.display()),
        )
      })
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn virtual_files() {
    let mut sources = Sources::new(Vec::new());
    sources.add_virtual("main.s", "  nop\n  rts\n");
    sources.add_virtual_data("tiles.bin", &[1, 2, 3]);

    let file = sources.load_text("main.s", None).unwrap();
    assert_eq!(file.lines(), &["  nop".to_string(), "  rts".to_string()]);
    assert_eq!(file.path(), Path::new("main.s"));
    assert_eq!(&*sources.load_data("tiles.bin", None).unwrap(), &[1, 2, 3]);
  }

  #[test]
  fn missing_files() {
    let mut sources = Sources::new(vec![PathBuf::from("/nonexistent")]);
    let err = sources.load_text("nope.s", None).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::NotFound);
  }
}
