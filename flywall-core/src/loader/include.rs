//! `include "path"` resolution with cycle detection.
//!
//! Paths are relative to the file that declares them. A visited-path set is
//! threaded through the recursive parse so a cycle fails fast with
//! `ConfigCycle` rather than overflowing the stack.

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::Error;

#[derive(Default)]
pub struct Visited {
    stack: Vec<Utf8PathBuf>,
}

impl Visited {
    pub fn enter(&mut self, path: &Utf8Path) -> Result<(), Error> {
        let canonical = canonicalize_lossy(path);
        if self.stack.iter().any(|p| p == &canonical) {
            let cycle = self
                .stack
                .iter()
                .map(|p| p.as_str())
                .chain(std::iter::once(canonical.as_str()))
                .collect::<Vec<_>>()
                .join(" -> ");
            return Err(Error::ConfigCycle(cycle));
        }
        self.stack.push(canonical);
        Ok(())
    }

    pub fn exit(&mut self) {
        self.stack.pop();
    }
}

fn canonicalize_lossy(path: &Utf8Path) -> Utf8PathBuf {
    std::fs::canonicalize(path)
        .ok()
        .and_then(|p| Utf8PathBuf::from_path_buf(p).ok())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Resolves an `include "path"` directive relative to the including file.
pub fn resolve_path(including_file: &Utf8Path, included: &str) -> Utf8PathBuf {
    let base = including_file.parent().unwrap_or(Utf8Path::new("."));
    base.join(included)
}
