// source.rs — Source unit registry
//
// Loads mica source files, decodes them per their coding cookie, parses
// and annotates them once, and caches the result process-wide. Cache
// entries are invalidated by content hash, so a file edited on disk
// between lookups is reloaded rather than served stale.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use sha2::{Digest, Sha256};

use crate::parser;
use crate::tree::Tree;

// ── Errors ───────────────────────────────────────────────────────────────

/// Errors that can occur while loading a source unit.
#[derive(Debug)]
pub enum SourceError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The coding cookie names an encoding the engine does not support.
    UnknownEncoding { path: PathBuf, name: String },
    /// The bytes are not valid in the declared (or default) encoding.
    DecodeError { path: PathBuf, encoding: String },
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::IoError { path, source } => {
                write!(f, "{}: {}", path.display(), source)
            }
            SourceError::UnknownEncoding { path, name } => {
                write!(f, "{}: unknown source encoding '{}'", path.display(), name)
            }
            SourceError::DecodeError { path, encoding } => {
                write!(
                    f,
                    "{}: source is not valid {}",
                    path.display(),
                    encoding
                )
            }
        }
    }
}

impl std::error::Error for SourceError {}

// ── Line index ───────────────────────────────────────────────────────────

/// Byte offsets of line starts, for offset <-> line conversion.
/// Lines are 1-based; offsets are byte positions into the text.
#[derive(Debug)]
pub struct LineIndex {
    starts: Vec<u32>,
    len: u32,
}

impl LineIndex {
    pub fn new(text: &str) -> LineIndex {
        let mut starts = vec![0u32];
        for (i, b) in text.bytes().enumerate() {
            if b == b'\n' {
                starts.push(i as u32 + 1);
            }
        }
        LineIndex {
            starts,
            len: text.len() as u32,
        }
    }

    /// 1-based line containing the byte offset.
    pub fn line_of(&self, offset: u32) -> u32 {
        match self.starts.binary_search(&offset) {
            Ok(i) => i as u32 + 1,
            Err(i) => i as u32,
        }
    }

    /// Byte range `[start, end)` of a 1-based line, excluding the newline.
    pub fn line_range(&self, line: u32) -> Option<(u32, u32)> {
        let i = line.checked_sub(1)? as usize;
        let start = *self.starts.get(i)?;
        let end = self
            .starts
            .get(i + 1)
            .map(|s| s - 1)
            .unwrap_or(self.len);
        Some((start, end))
    }

    pub fn line_count(&self) -> u32 {
        self.starts.len() as u32
    }
}

// ── Source unit ──────────────────────────────────────────────────────────

/// A decoded, parsed, annotated source file. Immutable once built; shared
/// via `Arc` between the registry and any compiled units derived from it.
pub struct SourceUnit {
    /// Registry key: the file path, or a synthetic `<text-N>` id.
    pub id: String,
    pub text: String,
    /// Content hash of the decoded text, for invalidation.
    pub hash: [u8; 32],
    /// The annotated tree, or `None` when the text did not parse.
    tree: Option<Tree>,
    lines: LineIndex,
}

impl SourceUnit {
    fn new(id: String, text: String) -> SourceUnit {
        let hash = content_hash(&text);
        let lines = LineIndex::new(&text);
        let result = parser::parse(&text);
        let tree = result.module.as_ref().map(Tree::build);
        SourceUnit {
            id,
            text,
            hash,
            tree,
            lines,
        }
    }

    /// The annotated tree. `None` means the text has a syntax error and
    /// execution points against it resolve to `ParseUnavailable`.
    pub fn tree(&self) -> Option<&Tree> {
        self.tree.as_ref()
    }

    pub fn lines(&self) -> &LineIndex {
        &self.lines
    }

    /// The innermost statement overlapping a 1-based line, if any.
    pub fn statement_at_line(&self, line: u32) -> Option<crate::tree::NodeId> {
        let tree = self.tree.as_ref()?;
        let (start, end) = self.lines.line_range(line)?;
        tree.iter()
            .filter(|&(id, node)| {
                tree.is_statement(id)
                    && !matches!(node.kind, crate::tree::NodeKind::Module)
                    && node.span.start < end
                    && node.span.end > start
            })
            .min_by_key(|(_, node)| node.span.len())
            .map(|(id, _)| id)
    }
}

impl fmt::Debug for SourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceUnit")
            .field("id", &self.id)
            .field("bytes", &self.text.len())
            .field("parsed", &self.tree.is_some())
            .finish()
    }
}

fn content_hash(text: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.finalize().into()
}

// ── Registry ─────────────────────────────────────────────────────────────

fn registry() -> &'static Mutex<HashMap<String, Arc<SourceUnit>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<SourceUnit>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Load (or re-fetch from cache) the source unit for a file on disk.
/// The cached entry is replaced when the file's content hash has changed.
pub fn for_path(path: &Path) -> Result<Arc<SourceUnit>, SourceError> {
    let bytes = std::fs::read(path).map_err(|e| SourceError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let text = decode(&bytes, path)?;
    let id = path.to_string_lossy().into_owned();

    let mut map = lock_registry();
    if let Some(existing) = map.get(&id) {
        if existing.hash == content_hash(&text) {
            return Ok(Arc::clone(existing));
        }
    }
    let unit = Arc::new(SourceUnit::new(id.clone(), text));
    map.insert(id, Arc::clone(&unit));
    Ok(unit)
}

/// Register in-memory text under a fresh synthetic id. Used by tests and
/// by callers compiling strings rather than files.
pub fn for_text(text: &str) -> Arc<SourceUnit> {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let id = format!("<text-{}>", NEXT.fetch_add(1, Ordering::Relaxed));
    let unit = Arc::new(SourceUnit::new(id.clone(), text.to_string()));
    lock_registry().insert(id, Arc::clone(&unit));
    unit
}

/// Look up a cached unit by id without touching the filesystem.
pub fn lookup(id: &str) -> Option<Arc<SourceUnit>> {
    lock_registry().get(id).map(Arc::clone)
}

/// Drop every cached unit. Compiled units holding an `Arc` keep theirs.
pub fn clear() {
    lock_registry().clear();
}

fn lock_registry() -> std::sync::MutexGuard<'static, HashMap<String, Arc<SourceUnit>>> {
    // A poisoned lock only means another thread panicked mid-insert; the
    // map itself is always in a consistent state.
    match registry().lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ── Decoding ─────────────────────────────────────────────────────────────

/// Decode source bytes. A `# coding: <name>` comment on one of the first
/// two lines selects the encoding; utf-8 is the default and latin-1 is
/// the one alternative.
fn decode(bytes: &[u8], path: &Path) -> Result<String, SourceError> {
    match coding_cookie(bytes) {
        Some(name) => match name.as_str() {
            "utf-8" | "utf8" => decode_utf8(bytes, path),
            "latin-1" | "latin1" | "iso-8859-1" => {
                Ok(bytes.iter().map(|&b| b as char).collect())
            }
            _ => Err(SourceError::UnknownEncoding {
                path: path.to_path_buf(),
                name,
            }),
        },
        None => decode_utf8(bytes, path),
    }
}

fn decode_utf8(bytes: &[u8], path: &Path) -> Result<String, SourceError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| SourceError::DecodeError {
        path: path.to_path_buf(),
        encoding: "utf-8".to_string(),
    })
}

/// Scan the first two lines for a `# coding: <name>` comment. The cookie
/// line is ASCII by construction, so the scan works on raw bytes.
fn coding_cookie(bytes: &[u8]) -> Option<String> {
    for line in bytes.split(|&b| b == b'\n').take(2) {
        let line = std::str::from_utf8(line).ok()?;
        let trimmed = line.trim_start();
        let rest = trimmed.strip_prefix('#')?.trim_start();
        if let Some(name) = rest.strip_prefix("coding:") {
            return Some(name.trim().to_ascii_lowercase());
        }
    }
    None
}
