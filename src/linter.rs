//! Reference checking - static analysis of `$ref` values in documents.
//!
//! Reports, without aborting on the first failure:
//! - syntax errors in the document itself
//! - malformed references
//! - external files that cannot be found inside the sandbox
//! - fragments that do not resolve
//! - oversized external documents

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use walkdir::WalkDir;

use crate::dereference::Dereferencer;
use crate::error::ResolveError;
use crate::loader::{is_remote, load_document};
use crate::path_resolver::SecurePathResolver;
use crate::types::{escape_pointer_segment, json_type_name, Document, DocumentFormat};

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A single diagnostic message from checking.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: String,
    /// JSON pointer to the reference object (e.g., "/components/schemas/User/properties/pet")
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub message: String,
}

/// Result of checking a single file.
#[derive(Debug, Clone, Serialize)]
pub struct FileResult {
    pub file: PathBuf,
    pub status: FileStatus,
    pub references_checked: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

/// Status of a checked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Error,
    Warning,
}

/// Result of checking a directory or set of files.
#[derive(Debug, Clone, Serialize)]
pub struct LintResult {
    pub path: PathBuf,
    pub files_checked: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub results: Vec<FileResult>,
}

impl LintResult {
    /// Returns true if all files passed (no errors).
    pub fn is_ok(&self) -> bool {
        self.errors == 0
    }
}

/// Check a file or directory.
///
/// If path is a directory, recursively finds all `.json`, `.yaml` and
/// `.yml` files. If `strict` is true, warnings count as failures.
pub fn lint(path: &Path, resolver: &SecurePathResolver, strict: bool) -> LintResult {
    let files = collect_documents(path);
    let base = if path.is_file() {
        path.parent().unwrap_or(path)
    } else {
        path
    };
    let mut results = Vec::new();
    let mut total_errors = 0;
    let mut total_warnings = 0;

    for file in &files {
        let file_result = lint_file(file, base, resolver);
        total_errors += count(&file_result.diagnostics, Severity::Error);
        total_warnings += count(&file_result.diagnostics, Severity::Warning);
        results.push(file_result);
    }

    let failed = results
        .iter()
        .filter(|r| {
            if strict {
                r.status != FileStatus::Ok
            } else {
                r.status == FileStatus::Error
            }
        })
        .count();

    LintResult {
        path: path.to_path_buf(),
        files_checked: files.len(),
        passed: files.len() - failed,
        failed,
        errors: total_errors,
        warnings: total_warnings,
        results,
    }
}

/// Check a single document file.
pub fn lint_file(file: &Path, base_path: &Path, resolver: &SecurePathResolver) -> FileResult {
    let display = file.strip_prefix(base_path).unwrap_or(file).to_path_buf();

    let document = match load_document(file) {
        Ok(doc) => doc,
        Err(e) => {
            return FileResult {
                file: display,
                status: FileStatus::Error,
                references_checked: 0,
                diagnostics: vec![Diagnostic {
                    severity: Severity::Error,
                    code: "E001".to_string(),
                    path: "/".to_string(),
                    reference: None,
                    message: format!("syntax error: {}", e),
                }],
            }
        }
    };

    let (references_checked, diagnostics) = check_document(&document, resolver);

    let status = if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        FileStatus::Error
    } else if diagnostics.is_empty() {
        FileStatus::Ok
    } else {
        FileStatus::Warning
    };

    FileResult {
        file: display,
        status,
        references_checked,
        diagnostics,
    }
}

/// Check every `$ref` in `document`.
///
/// Returns the number of references seen and the diagnostics. External
/// documents are loaded once for the whole check.
pub fn check_document(
    document: &Arc<Document>,
    resolver: &SecurePathResolver,
) -> (usize, Vec<Diagnostic>) {
    let mut checker = RefChecker {
        document,
        deref: Dereferencer::with_root(resolver, document),
        checked: 0,
        diagnostics: Vec::new(),
    };
    checker.check_value(document.root(), "");
    (checker.checked, checker.diagnostics)
}

struct RefChecker<'a, 'r> {
    document: &'a Arc<Document>,
    deref: Dereferencer<'r>,
    checked: usize,
    diagnostics: Vec<Diagnostic>,
}

impl RefChecker<'_, '_> {
    fn check_value(&mut self, value: &Value, path: &str) {
        match value {
            Value::Object(map) => {
                match map.get("$ref") {
                    Some(Value::String(reference)) => self.check_single_ref(reference, path),
                    Some(other) => self.push(
                        Severity::Error,
                        "E001",
                        path,
                        None,
                        format!("$ref must be a string, got {}", json_type_name(other)),
                    ),
                    None => {}
                }

                for (key, val) in map {
                    let child_path = format!("{}/{}", path, escape_pointer_segment(key));
                    self.check_value(val, &child_path);
                }
            }
            Value::Array(arr) => {
                for (i, item) in arr.iter().enumerate() {
                    let child_path = format!("{}/{}", path, i);
                    self.check_value(item, &child_path);
                }
            }
            _ => {}
        }
    }

    fn check_single_ref(&mut self, reference: &str, path: &str) {
        self.checked += 1;

        // Remote documents are outside the sandbox - note and move on
        if is_remote(reference) {
            self.push(
                Severity::Warning,
                "W001",
                path,
                Some(reference),
                "remote reference not checked".to_string(),
            );
            return;
        }

        let Err(err) = self.deref.dereference(reference, self.document) else {
            return;
        };

        let code = match &err {
            ResolveError::InvalidReference { .. } => "E001",
            ResolveError::InvalidExtension { .. } | ResolveError::ReferenceNotFound { .. } => {
                "E002"
            }
            ResolveError::UnresolvedReference { .. } => "E003",
            ResolveError::FileTooLarge { .. } => "E004",
            _ => "E005",
        };
        self.push(Severity::Error, code, path, Some(reference), err.to_string());
    }

    fn push(
        &mut self,
        severity: Severity,
        code: &str,
        path: &str,
        reference: Option<&str>,
        message: String,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            code: code.to_string(),
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            reference: reference.map(String::from),
            message,
        });
    }
}

fn count(diagnostics: &[Diagnostic], severity: Severity) -> usize {
    diagnostics.iter().filter(|d| d.severity == severity).count()
}

/// Collect all document files in a path (file or directory).
fn collect_documents(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        if DocumentFormat::from_path(path).is_some() {
            return vec![path.to_path_buf()];
        }
        return vec![];
    }

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| DocumentFormat::from_path(p).is_some())
        .collect();
    files.sort();
    files
}
