//! Error types for reference resolution and schema flattening.

use std::path::PathBuf;
use thiserror::Error;

/// Errors during reference resolution and composition.
#[derive(Debug, Error)]
pub enum ResolveError {
    // Reference errors (exit code 2)
    #[error("invalid reference \"{reference}\": {message}")]
    InvalidReference { reference: String, message: String },

    #[error("invalid extension for \"{reference}\": expected one of .yaml, .yml, .json")]
    InvalidExtension { reference: String },

    #[error("unresolved reference {reference} (via {})", chain_display(.chain))]
    UnresolvedReference {
        reference: String,
        /// Reference chain that led here, outermost first.
        chain: Vec<String>,
    },

    #[error("resolver recursion limit of {limit} exceeded")]
    RecursionLimit { limit: usize },

    /// Raised per candidate while searching and never surfaced on its own;
    /// the resolver logs it and moves on to the next candidate.
    #[error("path {path} escapes {boundary}")]
    TraversalDetected { path: PathBuf, boundary: PathBuf },

    // IO errors (exit code 3)
    #[error("reference not found: {reference} (searched {searched} location(s)){}", via_suffix(.chain))]
    ReferenceNotFound {
        reference: String,
        searched: usize,
        /// Reference chain that led here, outermost first.
        chain: Vec<String>,
    },

    #[error("file too large: {path} is {size} bytes (limit {limit}){}", via_suffix(.chain))]
    FileTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
        chain: Vec<String>,
    },

    #[error("cannot read {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parse errors (exit code 2)
    #[error("invalid JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML: {source}")]
    InvalidYaml {
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid document: {message}")]
    InvalidDocument { message: String },
}

fn chain_display(chain: &[String]) -> String {
    if chain.is_empty() {
        "document root".to_string()
    } else {
        chain.join(" -> ")
    }
}

fn via_suffix(chain: &[String]) -> String {
    if chain.is_empty() {
        String::new()
    } else {
        format!(" via {}", chain.join(" -> "))
    }
}

impl ResolveError {
    /// Returns the exit code for this error type.
    pub fn exit_code(&self) -> i32 {
        match self {
            ResolveError::ReferenceNotFound { .. }
            | ResolveError::FileTooLarge { .. }
            | ResolveError::ReadError { .. } => 3,
            _ => 2,
        }
    }

    /// Prepend a reference to the chain of a lookup failure.
    ///
    /// Applies to `UnresolvedReference`, `ReferenceNotFound` and
    /// `FileTooLarge`; other variants pass through unchanged.
    pub(crate) fn via(mut self, reference: &str) -> Self {
        match &mut self {
            ResolveError::UnresolvedReference { chain, .. }
            | ResolveError::ReferenceNotFound { chain, .. }
            | ResolveError::FileTooLarge { chain, .. } => {
                chain.insert(0, reference.to_string());
            }
            _ => {}
        }
        self
    }

    /// Reference chain carried by a lookup failure, outermost first.
    pub fn chain(&self) -> &[String] {
        match self {
            ResolveError::UnresolvedReference { chain, .. }
            | ResolveError::ReferenceNotFound { chain, .. }
            | ResolveError::FileTooLarge { chain, .. } => chain,
            _ => &[],
        }
    }
}
