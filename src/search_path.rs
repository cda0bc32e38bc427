//! Search path configuration for external reference lookup.
//!
//! A [`SearchPathSet`] is built once from three sources, in priority order:
//!
//! 1. explicit entries from [`ResolverConfig`]
//! 2. the `SCHEMA_GRAPH_SEARCH_PATH` environment variable (one directory)
//! 3. the process-wide search path property (see [`set_search_path_property`])
//!
//! Every entry is canonicalized; anything that does not exist or is not a
//! directory is dropped, and duplicates keep their first position.

use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Default environment variable naming an extra search directory.
pub const SEARCH_PATH_ENV: &str = "SCHEMA_GRAPH_SEARCH_PATH";

static SEARCH_PATH_PROPERTY: RwLock<Option<PathBuf>> = parking_lot::const_rwlock(None);

/// Set (or clear) the process-wide search path property.
///
/// Read once by every resolver constructed afterwards; resolvers that
/// already exist are unaffected.
pub fn set_search_path_property(path: Option<PathBuf>) {
    *SEARCH_PATH_PROPERTY.write() = path;
}

/// Current value of the process-wide search path property.
pub fn search_path_property() -> Option<PathBuf> {
    SEARCH_PATH_PROPERTY.read().clone()
}

/// Construction options for a resolver.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Caller-supplied search directories, in lookup order.
    pub search_paths: Vec<PathBuf>,
    /// Environment variable consulted for one extra directory.
    pub env_var: String,
    /// When false, neither the environment variable nor the process
    /// property is consulted.
    pub use_environment: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_paths: Vec::new(),
            env_var: SEARCH_PATH_ENV.to_string(),
            use_environment: true,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one search directory.
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Append several search directories.
    pub fn search_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.search_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Use a different environment variable for the extra directory.
    pub fn env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = name.into();
        self
    }

    pub fn use_environment(mut self, enabled: bool) -> Self {
        self.use_environment = enabled;
        self
    }
}

/// Ordered, deduplicated set of validated search directories.
///
/// Immutable after construction, so it can be read from any number of
/// threads without locking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPathSet {
    entries: Vec<PathBuf>,
}

impl SearchPathSet {
    /// Build the set from a config, the environment and the process property.
    pub fn from_config(config: &ResolverConfig) -> Self {
        let mut candidates: Vec<PathBuf> = config.search_paths.clone();

        if config.use_environment {
            if let Some(value) = std::env::var_os(&config.env_var) {
                if !value.is_empty() {
                    candidates.push(PathBuf::from(value));
                }
            }
            if let Some(property) = search_path_property() {
                candidates.push(property);
            }
        }

        Self::from_candidates(candidates)
    }

    /// Build the set from explicit entries only.
    pub fn from_candidates<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut entries: Vec<PathBuf> = Vec::new();

        for candidate in candidates {
            let candidate = candidate.as_ref();
            let Some(dir) = validate_directory(candidate) else {
                tracing::debug!(entry = %candidate.display(), "dropping search path entry");
                continue;
            };
            if !entries.contains(&dir) {
                entries.push(dir);
            }
        }

        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical form of `path` if it names an existing directory.
fn validate_directory(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    let canonical = path.canonicalize().ok()?;
    canonical.is_dir().then_some(canonical)
}
