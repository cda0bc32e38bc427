//! Reference dereferencing with a pass-scoped document cache.
//!
//! A [`Dereferencer`] lives for one resolution pass. External documents are
//! parsed once per pass and shared by every reference that points into them;
//! the cache is dropped with the dereferencer, so independent passes never
//! share mutable state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::error::ResolveError;
use crate::loader::{load_document, navigate_fragment, Reference};
use crate::path_resolver::SecurePathResolver;
use crate::types::{Document, SchemaRef};

/// Documents loaded during one pass, keyed by resolved path.
#[derive(Debug, Default)]
pub struct DocumentCache {
    documents: HashMap<PathBuf, Arc<Document>>,
    loads: usize,
    hits: usize,
}

impl DocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached document for `path`, parsing it on first use.
    pub fn get_or_load(&mut self, path: &Path) -> Result<Arc<Document>, ResolveError> {
        if let Some(doc) = self.documents.get(path) {
            self.hits += 1;
            tracing::trace!(path = %path.display(), "document cache hit");
            return Ok(Arc::clone(doc));
        }

        let doc = load_document(path)?;
        self.loads += 1;
        self.documents.insert(path.to_path_buf(), Arc::clone(&doc));
        Ok(doc)
    }

    /// Register an already parsed document under `path`.
    ///
    /// Does not count as a load. An existing entry for `path` is kept.
    pub fn insert(&mut self, path: PathBuf, document: Arc<Document>) {
        self.documents.entry(path).or_insert(document);
    }

    /// Number of documents parsed so far.
    pub fn loads(&self) -> usize {
        self.loads
    }

    /// Number of lookups served without parsing.
    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }
}

/// Follows `$ref` values to their target nodes.
#[derive(Debug)]
pub struct Dereferencer<'r> {
    resolver: &'r SecurePathResolver,
    cache: DocumentCache,
}

impl<'r> Dereferencer<'r> {
    /// Start a new pass with an empty cache.
    pub fn new(resolver: &'r SecurePathResolver) -> Self {
        Self {
            resolver,
            cache: DocumentCache::new(),
        }
    }

    /// Start a new pass rooted at `root`.
    ///
    /// References that lead back into `root`'s file resolve to `root` itself,
    /// so its nodes keep one identity for the whole pass.
    pub fn with_root(resolver: &'r SecurePathResolver, root: &Arc<Document>) -> Self {
        let mut deref = Self::new(resolver);
        if let Some(path) = root.source().and_then(|p| p.canonicalize().ok()) {
            tracing::trace!(path = %path.display(), "seeded pass cache with root document");
            deref.cache.insert(path, Arc::clone(root));
        }
        deref
    }

    pub fn resolver(&self) -> &'r SecurePathResolver {
        self.resolver
    }

    pub fn cache(&self) -> &DocumentCache {
        &self.cache
    }

    /// Return the node `reference` points at, seen from `current`.
    ///
    /// Internal references are looked up in `current`. External ones go
    /// through the resolver relative to `current`'s directory, and their
    /// fragment (if any) is looked up in the loaded document.
    ///
    /// # Errors
    ///
    /// Propagates resolver errors (`ReferenceNotFound`, `FileTooLarge`, ...),
    /// parse errors, and `UnresolvedReference` for a missing fragment target.
    pub fn dereference(
        &mut self,
        reference: &str,
        current: &Arc<Document>,
    ) -> Result<SchemaRef, ResolveError> {
        match Reference::parse(reference)? {
            Reference::Internal { fragment } => resolve_fragment(current, fragment, reference),
            Reference::External { file, fragment } => {
                let path = self.resolver.resolve(file, current.base_dir())?;
                let doc = self.cache.get_or_load(&path)?;
                match fragment {
                    Some(fragment) => resolve_fragment(&doc, fragment, reference),
                    None => Ok(SchemaRef::root(doc)),
                }
            }
        }
    }

    /// If `node` is a reference object, return its target.
    pub fn follow(&mut self, node: &SchemaRef) -> Result<Option<SchemaRef>, ResolveError> {
        match ref_target(node.node()) {
            Some(reference) => self.dereference(reference, node.document()).map(Some),
            None => Ok(None),
        }
    }
}

/// The `$ref` string of a reference object, if `node` is one.
pub fn ref_target(node: &Value) -> Option<&str> {
    node.get("$ref").and_then(Value::as_str)
}

/// True if `reference` points outside the current document.
pub fn is_external(reference: &str) -> bool {
    matches!(Reference::parse(reference), Ok(Reference::External { .. }))
}

fn resolve_fragment(
    doc: &Arc<Document>,
    fragment: &str,
    reference: &str,
) -> Result<SchemaRef, ResolveError> {
    let pointer = navigate_fragment(doc.root(), fragment).map_err(|_| {
        ResolveError::UnresolvedReference {
            reference: reference.to_string(),
            chain: Vec::new(),
        }
    })?;
    SchemaRef::new(Arc::clone(doc), pointer).ok_or_else(|| ResolveError::UnresolvedReference {
        reference: reference.to_string(),
        chain: Vec::new(),
    })
}
