//! The external-collaborator seam for loading module source text (spec.md
//! §1: tokenization and parsing are out of scope; this crate only needs
//! *something* that hands back bytes for a canonical path and *something*
//! that turns those bytes into a [`crate::ast::Program`]).
//!
//! `why_lib`'s loader reaches straight for `std::fs`; we keep that as the
//! default but put a trait in front of it so tests can supply in-memory
//! fixtures instead of touching disk, the way `why_lib`'s own test harness
//! swaps in string literals rather than files.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::ast::Program;
use crate::error::SemaError;

/// Reads raw module source text given a canonical path.
pub trait SourceProvider {
    fn read(&self, canonical_path: &Path) -> std::io::Result<String>;
}

/// Default provider: plain `std::fs`, mirroring
/// `why_lib`'s `load_module`/`load_modules`.
#[derive(Debug, Default)]
pub struct FsProvider;

impl SourceProvider for FsProvider {
    fn read(&self, canonical_path: &Path) -> std::io::Result<String> {
        fs::read_to_string(canonical_path)
    }
}

/// An in-memory provider for tests and fixtures: canonical path strings map
/// directly to source text, no filesystem involved.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    files: HashMap<PathBuf, String>,
}

impl MemoryProvider {
    pub fn new() -> MemoryProvider {
        MemoryProvider::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, source: impl Into<String>) {
        self.files.insert(path.into(), source.into());
    }
}

impl SourceProvider for MemoryProvider {
    fn read(&self, canonical_path: &Path) -> std::io::Result<String> {
        self.files.get(canonical_path).cloned().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no in-memory source for '{}'", canonical_path.display()),
            )
        })
    }
}

/// Turns already-read source text into a [`Program`]. The tokenizer and
/// parser that would normally sit behind this trait are out of scope (spec.md
/// §1); this crate only depends on the seam existing.
pub trait ProgramParser {
    fn parse(&self, module: Rc<str>, source: &str) -> Result<Program, SemaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_provider_round_trips_inserted_source() {
        let mut provider = MemoryProvider::new();
        provider.insert("/project/main.dmd", "fn main() {}");
        assert_eq!(
            provider.read(Path::new("/project/main.dmd")).unwrap(),
            "fn main() {}"
        );
    }

    #[test]
    fn memory_provider_reports_missing_files() {
        let provider = MemoryProvider::new();
        assert!(provider.read(Path::new("/nowhere.dmd")).is_err());
    }
}
