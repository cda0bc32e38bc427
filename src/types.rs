//! Core types for reference resolution and schema flattening.

use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

/// Largest external document the resolver will accept (100 MiB).
pub const MAX_FILE_SIZE: u64 = 104_857_600;

/// Resolver-wide recursion ceiling, tracked per calling thread.
pub const MAX_RECURSION_DEPTH: usize = 50;

/// Directory depth ceiling for the recursive filename search.
pub const MAX_SEARCH_DEPTH: usize = 10;

/// File extensions an external reference may point at (compared case-insensitively).
pub const ALLOWED_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Schema keywords that hold a list of composed member schemas.
pub const COMPOSITION_KEYWORDS: &[&str] = &["allOf", "oneOf", "anyOf"];

/// Returns the JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Serialization format of a document, picked by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Detect the format from a path's extension (case-insensitive).
    ///
    /// Returns `None` for anything outside [`ALLOWED_EXTENSIONS`].
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

/// A parsed API description document.
///
/// Documents are shared behind `Arc` and never mutated once loaded, so the
/// address of every node inside `root` is stable for as long as any handle
/// to the document is alive.
#[derive(Debug)]
pub struct Document {
    root: Value,
    source: Option<PathBuf>,
}

impl Document {
    /// Wrap an already-parsed value. `source` is the file it came from, if any.
    pub fn new(root: Value, source: Option<PathBuf>) -> Self {
        Self { root, source }
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Directory that relative references in this document resolve against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// The named-schema registry of this document.
    ///
    /// Checks `components.schemas` (OpenAPI 3), then `definitions`
    /// (Swagger 2), then `$defs` (JSON Schema).
    pub fn schema_registry(&self) -> Option<(&'static str, &serde_json::Map<String, Value>)> {
        if let Some(schemas) = self
            .root
            .get("components")
            .and_then(|c| c.get("schemas"))
            .and_then(Value::as_object)
        {
            return Some(("/components/schemas", schemas));
        }
        if let Some(defs) = self.root.get("definitions").and_then(Value::as_object) {
            return Some(("/definitions", defs));
        }
        self.root
            .get("$defs")
            .and_then(Value::as_object)
            .map(|defs| ("/$defs", defs))
    }
}

/// Identity of a schema node: the address of the loaded value.
///
/// Two structurally equal fragments at different places in a document have
/// different ids. Only meaningful while the owning document is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn of(node: &Value) -> Self {
        NodeId(node as *const Value as usize)
    }
}

/// A handle to one schema node inside a shared document.
///
/// Holds the document alive, so the node's [`NodeId`] stays valid for the
/// handle's lifetime. Equality and hashing are by identity.
#[derive(Clone)]
pub struct SchemaRef {
    document: Arc<Document>,
    pointer: String,
    id: NodeId,
}

static MISSING: Value = Value::Null;

impl SchemaRef {
    /// Handle to the node at `pointer` (RFC 6901, already escaped).
    ///
    /// Returns `None` if nothing lives at that pointer.
    pub fn new(document: Arc<Document>, pointer: impl Into<String>) -> Option<Self> {
        let pointer = pointer.into();
        let id = NodeId::of(document.root().pointer(&pointer)?);
        Some(Self {
            document,
            pointer,
            id,
        })
    }

    /// Handle to the document root.
    pub fn root(document: Arc<Document>) -> Self {
        let id = NodeId::of(document.root());
        Self {
            document,
            pointer: String::new(),
            id,
        }
    }

    pub fn node(&self) -> &Value {
        self.document.root().pointer(&self.pointer).unwrap_or(&MISSING)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Handle to a direct child reached by `key`.
    pub fn child(&self, key: &str) -> Option<Self> {
        let pointer = format!("{}/{}", self.pointer, escape_pointer_segment(key));
        Self::new(Arc::clone(&self.document), pointer)
    }

    /// Handle to the `index`th element of an array child.
    pub fn item(&self, key: &str, index: usize) -> Option<Self> {
        let pointer = format!(
            "{}/{}/{}",
            self.pointer,
            escape_pointer_segment(key),
            index
        );
        Self::new(Arc::clone(&self.document), pointer)
    }
}

impl PartialEq for SchemaRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SchemaRef {}

impl Hash for SchemaRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

// Hash is the NodeId's hash, so maps keyed by SchemaRef can be queried by id.
impl Borrow<NodeId> for SchemaRef {
    fn borrow(&self) -> &NodeId {
        &self.id
    }
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .document
            .source()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        write!(f, "SchemaRef({}#{})", source, self.pointer)
    }
}

/// Escape a key for use as a JSON Pointer segment (`~` → `~0`, `/` → `~1`).
pub fn escape_pointer_segment(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
