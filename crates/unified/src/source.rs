//! Resolves logical shader names into raw text, hiding whether the text came
//! from disk or from an in-memory table. The registry hands it names and asks
//! again later to find out whether the content moved on.
//!
//! Types:
//!
//! - `ShaderSource` is one immutable snapshot of a shader file together with
//!   its content version.
//! - `SourceLoader` is the seam the registry talks to; `FileLoader` searches a
//!   list of roots on disk, `MemoryLoader` serves text registered at runtime.
//! - `LoadError` separates a missing file from one that could not be read.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("shader '{name}' not found (searched {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("failed to read shader '{name}' from {}: {source}", path.display())]
    Io {
        name: String,
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

/// One immutable snapshot of a unified shader file.
///
/// A reload never mutates a source in place; it produces a new snapshot whose
/// `version` is one greater than the snapshot it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    name: String,
    path: Option<PathBuf>,
    text: Arc<str>,
    version: u64,
}

impl ShaderSource {
    pub fn new(name: impl Into<String>, text: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            path: None,
            text: text.into(),
            version: 1,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Location on disk, when the source was read from a file.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Byte-for-byte comparison of the two snapshots' text.
    pub fn same_content(&self, other: &ShaderSource) -> bool {
        self.text.as_bytes() == other.text.as_bytes()
    }

    /// Turns a freshly loaded snapshot into the successor of `previous`.
    pub fn succeeding(mut self, previous: &ShaderSource) -> Self {
        self.version = previous.version.saturating_add(1);
        self
    }
}

pub trait SourceLoader: Send + Sync {
    /// Reads the current text behind `name`.
    fn load(&self, name: &str) -> Result<ShaderSource, LoadError>;

    /// Reloads `previous` and returns a new version only when the bytes changed.
    fn refresh(&self, previous: &ShaderSource) -> Result<Option<ShaderSource>, LoadError> {
        let fresh = self.load(previous.name())?;
        if fresh.same_content(previous) {
            Ok(None)
        } else {
            Ok(Some(fresh.succeeding(previous)))
        }
    }
}

/// Loads shader files from disk, trying each search root in order.
#[derive(Debug, Clone)]
pub struct FileLoader {
    roots: Vec<PathBuf>,
}

impl FileLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn with_defaults() -> Self {
        Self::new(vec![PathBuf::from("shaders")])
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() || path.exists() {
            vec![path.to_path_buf()]
        } else {
            self.roots.iter().map(|root| root.join(path)).collect()
        }
    }
}

impl SourceLoader for FileLoader {
    fn load(&self, name: &str) -> Result<ShaderSource, LoadError> {
        if name.trim().is_empty() {
            return Err(LoadError::NotFound {
                name: name.to_string(),
                searched: Vec::new(),
            });
        }

        let candidates = self.candidates(name);
        for candidate in &candidates {
            if !candidate.is_file() {
                continue;
            }
            debug!(shader = name, path = %candidate.display(), "reading unified shader");
            return match fs::read_to_string(candidate) {
                Ok(text) => Ok(ShaderSource::new(name, text).with_path(candidate)),
                Err(err) => {
                    warn!(shader = name, path = %candidate.display(), error = %err, "failed to read unified shader");
                    Err(LoadError::Io {
                        name: name.to_string(),
                        path: candidate.clone(),
                        source: Arc::new(err),
                    })
                }
            };
        }

        Err(LoadError::NotFound {
            name: name.to_string(),
            searched: candidates,
        })
    }
}

/// Serves shader text registered at runtime, e.g. sources embedded with
/// `include_str!`. Replacing an entry's text is seen as a content change.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    sources: RwLock<HashMap<String, Arc<str>>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, text: impl Into<Arc<str>>) {
        self.sources.write().insert(name.into(), text.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.sources.write().remove(name).is_some()
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, name: &str) -> Result<ShaderSource, LoadError> {
        self.sources
            .read()
            .get(name)
            .map(|text| ShaderSource::new(name, text.clone()))
            .ok_or_else(|| LoadError::NotFound {
                name: name.to_string(),
                searched: Vec::new(),
            })
    }
}
