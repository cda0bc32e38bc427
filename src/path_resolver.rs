//! Sandboxed resolution of external reference file paths.
//!
//! [`SecurePathResolver::resolve`] turns the file part of a `$ref` into an
//! existing regular file that provably lies inside the directory it was
//! resolved against. Lookup order:
//!
//! 1. relative to the referencing document's directory (or the cwd)
//! 2. relative to each search path, in configured order
//! 3. if the reference contains `..`, steps 1-2 again with only the filename
//! 4. a depth-bounded recursive filename search under each search path
//!
//! A candidate whose canonical path escapes its base directory is logged as
//! a traversal attempt and skipped; the search then moves on to the next
//! candidate. An oversized match aborts the whole resolution.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use walkdir::WalkDir;

use crate::error::ResolveError;
use crate::search_path::{ResolverConfig, SearchPathSet};
use crate::types::{DocumentFormat, MAX_FILE_SIZE, MAX_RECURSION_DEPTH, MAX_SEARCH_DEPTH};

static NEXT_RESOLVER_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // resolver id -> recursion depth on this thread
    static DEPTHS: RefCell<HashMap<u64, usize>> = RefCell::new(HashMap::new());
}

/// Resolves external reference paths inside a sandbox of allowed directories.
///
/// Safe to share between threads: the search paths never change after
/// construction and recursion depth is tracked per calling thread.
#[derive(Debug)]
pub struct SecurePathResolver {
    id: u64,
    search_paths: SearchPathSet,
}

/// Holds one level of the calling thread's recursion depth.
///
/// Dropping the guard releases the level. Not `Send`: the level belongs to
/// the thread that entered it.
#[must_use = "the depth level is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct DepthGuard {
    resolver_id: u64,
    _not_send: PhantomData<*const ()>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        // try_with: the thread-local may already be gone during thread teardown
        let _ = DEPTHS.try_with(|depths| {
            if let Some(depth) = depths.borrow_mut().get_mut(&self.resolver_id) {
                *depth = depth.saturating_sub(1);
            }
        });
    }
}

impl SecurePathResolver {
    pub fn new(search_paths: SearchPathSet) -> Self {
        Self {
            id: NEXT_RESOLVER_ID.fetch_add(1, Ordering::Relaxed),
            search_paths,
        }
    }

    /// Build a resolver from config, the environment and the process property.
    pub fn from_config(config: &ResolverConfig) -> Self {
        Self::new(SearchPathSet::from_config(config))
    }

    pub fn search_paths(&self) -> &SearchPathSet {
        &self.search_paths
    }

    /// Enter one level of recursion on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::RecursionLimit` if this thread is already
    /// [`MAX_RECURSION_DEPTH`] levels deep on this resolver.
    pub fn enter(&self) -> Result<DepthGuard, ResolveError> {
        let entered = DEPTHS.with(|depths| {
            let mut depths = depths.borrow_mut();
            let depth = depths.entry(self.id).or_insert(0);
            if *depth >= MAX_RECURSION_DEPTH {
                false
            } else {
                *depth += 1;
                true
            }
        });

        if !entered {
            tracing::warn!(limit = MAX_RECURSION_DEPTH, "resolver recursion limit reached");
            return Err(ResolveError::RecursionLimit {
                limit: MAX_RECURSION_DEPTH,
            });
        }

        Ok(DepthGuard {
            resolver_id: self.id,
            _not_send: PhantomData,
        })
    }

    /// Recursion depth of the calling thread on this resolver.
    pub fn current_depth(&self) -> usize {
        DEPTHS.with(|depths| depths.borrow().get(&self.id).copied().unwrap_or(0))
    }

    /// Reset the calling thread's depth to zero.
    pub fn reset_depth(&self) {
        DEPTHS.with(|depths| {
            depths.borrow_mut().insert(self.id, 0);
        });
    }

    /// Forget the calling thread's depth entry for this resolver.
    ///
    /// Call from each worker thread when it is done with the resolver.
    /// Dropping the resolver does this for the dropping thread only.
    pub fn release_thread_state(&self) {
        let _ = DEPTHS.try_with(|depths| {
            depths.borrow_mut().remove(&self.id);
        });
    }

    /// Resolve the file part of a reference to a validated path.
    ///
    /// `base_dir` is the directory of the referencing document; without it,
    /// the current working directory is used as the base.
    ///
    /// # Errors
    ///
    /// - `InvalidReference` for an empty or whitespace-only reference
    /// - `InvalidExtension` unless the file ends in `.yaml`, `.yml` or `.json`
    /// - `FileTooLarge` if the first matching file exceeds [`MAX_FILE_SIZE`]
    /// - `ReferenceNotFound` if no candidate survives the sandbox checks
    pub fn resolve(&self, reference: &str, base_dir: Option<&Path>) -> Result<PathBuf, ResolveError> {
        if reference.trim().is_empty() {
            return Err(ResolveError::InvalidReference {
                reference: reference.to_string(),
                message: "reference is empty".to_string(),
            });
        }

        let sanitized = sanitize_reference(reference);
        if sanitized.is_empty() {
            return Err(ResolveError::InvalidReference {
                reference: reference.to_string(),
                message: "reference is empty after sanitizing".to_string(),
            });
        }

        if DocumentFormat::from_path(Path::new(&sanitized)).is_none() {
            return Err(ResolveError::InvalidExtension {
                reference: reference.to_string(),
            });
        }

        let base = match base_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|source| ResolveError::ReadError {
                path: PathBuf::from("."),
                source,
            })?,
        };

        if let Some(found) = self.resolve_against_roots(&sanitized, &base)? {
            return Ok(found);
        }

        let file_name = Path::new(&sanitized)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());

        if let Some(name) = &file_name {
            if has_traversal_segment(&sanitized) {
                tracing::debug!(reference, file_name = %name, "retrying with filename only");
                if let Some(found) = self.resolve_against_roots(name, &base)? {
                    return Ok(found);
                }
            }

            for root in self.search_paths.iter() {
                if let Some(found) = self.search_tree(root, name)? {
                    return Ok(found);
                }
            }
        }

        Err(ResolveError::ReferenceNotFound {
            reference: reference.to_string(),
            searched: self.search_paths.len() + 1,
            chain: Vec::new(),
        })
    }

    /// Try `relative` under the base directory, then under each search path.
    fn resolve_against_roots(
        &self,
        relative: &str,
        base: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        let roots = std::iter::once(base).chain(self.search_paths.iter());
        for root in roots {
            if let Some(found) = accept_candidate(&root.join(relative), root)? {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// Depth-bounded search for a file named `file_name` under `root`.
    fn search_tree(&self, root: &Path, file_name: &str) -> Result<Option<PathBuf>, ResolveError> {
        let _guard = self.enter()?;

        let matches = WalkDir::new(root)
            .max_depth(MAX_SEARCH_DEPTH)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file() && entry.file_name() == file_name);

        for entry in matches {
            if let Some(found) = accept_candidate(entry.path(), root)? {
                tracing::debug!(path = %found.display(), "found by recursive search");
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

impl Drop for SecurePathResolver {
    fn drop(&mut self) {
        self.release_thread_state();
    }
}

/// Validate one candidate, turning a traversal attempt into "no match".
fn accept_candidate(candidate: &Path, boundary: &Path) -> Result<Option<PathBuf>, ResolveError> {
    match validate_candidate(candidate, boundary) {
        Err(ResolveError::TraversalDetected { path, boundary }) => {
            tracing::warn!(
                target: "schema_graph::security",
                candidate = %path.display(),
                boundary = %boundary.display(),
                "path traversal attempt blocked"
            );
            Ok(None)
        }
        other => other,
    }
}

/// Check that `candidate` is a regular file inside `boundary` within the size cap.
///
/// Returns `Ok(None)` if the candidate does not exist or is not a regular file.
fn validate_candidate(candidate: &Path, boundary: &Path) -> Result<Option<PathBuf>, ResolveError> {
    let Ok(resolved) = candidate.canonicalize() else {
        return Ok(None);
    };
    let Ok(boundary) = boundary.canonicalize() else {
        return Ok(None);
    };

    if !resolved.starts_with(&boundary) {
        return Err(ResolveError::TraversalDetected {
            path: resolved,
            boundary,
        });
    }

    let metadata = std::fs::metadata(&resolved).map_err(|source| ResolveError::ReadError {
        path: resolved.clone(),
        source,
    })?;
    if !metadata.is_file() {
        tracing::debug!(path = %resolved.display(), "candidate is not a regular file");
        return Ok(None);
    }

    if metadata.len() > MAX_FILE_SIZE {
        return Err(ResolveError::FileTooLarge {
            path: resolved,
            size: metadata.len(),
            limit: MAX_FILE_SIZE,
            chain: Vec::new(),
        });
    }

    Ok(Some(resolved))
}

/// Strip NUL bytes, trim whitespace and normalize separators to `/`.
///
/// `..` segments are kept; the boundary check is what rejects traversal.
pub fn sanitize_reference(reference: &str) -> String {
    reference
        .replace('\0', "")
        .trim()
        .replace('\\', "/")
}

fn has_traversal_segment(reference: &str) -> bool {
    reference.split('/').any(|segment| segment == "..")
}
