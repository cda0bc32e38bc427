//! Document loading and reference parsing.
//!
//! Handles loading documents from files and strings (JSON or YAML), splitting
//! `$ref` values into file and fragment parts, and navigating JSON Pointer
//! fragments.

use std::path::Path;
use std::sync::Arc;

use percent_encoding::percent_decode_str;
use serde_json::Value;

use crate::error::ResolveError;
use crate::types::{escape_pointer_segment, Document, DocumentFormat};

/// A classified `$ref` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference<'a> {
    /// Points within the current document, e.g. `#/components/schemas/User`.
    Internal { fragment: &'a str },
    /// Points at another file, optionally followed by a fragment.
    External {
        file: &'a str,
        fragment: Option<&'a str>,
    },
}

impl<'a> Reference<'a> {
    /// Classify a raw `$ref` value.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidReference` for empty references and for
    /// references carrying a URL scheme; only local files are resolvable.
    pub fn parse(raw: &'a str) -> Result<Self, ResolveError> {
        if raw.trim().is_empty() {
            return Err(ResolveError::InvalidReference {
                reference: raw.to_string(),
                message: "reference is empty".to_string(),
            });
        }

        if raw.starts_with('#') {
            return Ok(Reference::Internal { fragment: raw });
        }

        if is_remote(raw) {
            return Err(ResolveError::InvalidReference {
                reference: raw.to_string(),
                message: "remote references are not supported".to_string(),
            });
        }

        let (file, fragment) = match raw.find('#') {
            Some(idx) => (&raw[..idx], Some(&raw[idx..])),
            None => (raw, None),
        };
        Ok(Reference::External { file, fragment })
    }
}

/// Check if a reference carries a URL scheme (`http://`, `file://`, ...).
pub fn is_remote(reference: &str) -> bool {
    match reference.find("://") {
        Some(idx) => {
            let scheme = &reference[..idx];
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Load a document from a file path.
///
/// The format is picked from the extension.
///
/// # Errors
///
/// Returns `ResolveError::ReadError` if the file can't be read,
/// `ResolveError::InvalidExtension` for unknown extensions, or a parse error.
pub fn load_document(path: &Path) -> Result<Arc<Document>, ResolveError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| ResolveError::InvalidExtension {
        reference: path.display().to_string(),
    })?;

    let content = std::fs::read_to_string(path).map_err(|source| ResolveError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;

    let root = parse_content(&content, format)?;
    tracing::debug!(path = %path.display(), "loaded document");
    Ok(Arc::new(Document::new(root, Some(path.to_path_buf()))))
}

/// Load a document from a string.
///
/// The document has no source path, so relative external references in it
/// resolve against the current directory.
pub fn load_document_str(content: &str, format: DocumentFormat) -> Result<Arc<Document>, ResolveError> {
    let root = parse_content(content, format)?;
    Ok(Arc::new(Document::new(root, None)))
}

fn parse_content(content: &str, format: DocumentFormat) -> Result<Value, ResolveError> {
    match format {
        DocumentFormat::Json => {
            serde_json::from_str(content).map_err(|source| ResolveError::InvalidJson { source })
        }
        DocumentFormat::Yaml => {
            let yaml: serde_yaml::Value = serde_yaml::from_str(content)
                .map_err(|source| ResolveError::InvalidYaml { source })?;
            yaml_to_json(yaml)
        }
    }
}

/// Convert a YAML value into JSON, rejecting non-string mapping keys.
///
/// Numeric and boolean keys (`200:` in a responses map) are stringified the
/// way a JSON document would spell them.
fn yaml_to_json(yaml: serde_yaml::Value) -> Result<Value, ResolveError> {
    use serde_yaml::Value as Yaml;

    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = serde_json::Map::new();
            for (key, value) in mapping {
                let key = match key {
                    Yaml::String(s) => s,
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Bool(b) => b.to_string(),
                    other => {
                        return Err(ResolveError::InvalidDocument {
                            message: format!("unsupported mapping key: {:?}", other),
                        })
                    }
                };
                map.insert(key, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => yaml_to_json(tagged.value)?,
    })
}

/// Navigate a JSON Pointer fragment (e.g., "#/components/schemas/User").
///
/// Returns the escaped JSON Pointer of the target within `root`; an empty
/// string means the document root. Segments are unescaped (`~1`, `~0`) and
/// percent-decoded before lookup.
///
/// # Errors
///
/// Returns `ResolveError::UnresolvedReference` if any segment is absent.
pub fn navigate_fragment(root: &Value, fragment: &str) -> Result<String, ResolveError> {
    let path = fragment.trim_start_matches('#');
    if path.is_empty() || path == "/" {
        return Ok(String::new());
    }

    let unresolved = || ResolveError::UnresolvedReference {
        reference: fragment.to_string(),
        chain: Vec::new(),
    };

    let mut pointer = String::new();
    let mut current = root;
    for part in path.trim_start_matches('/').split('/') {
        let key = decode_pointer_segment(part);
        current = match current {
            Value::Object(map) => map.get(&key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(unresolved)?;
        pointer.push('/');
        pointer.push_str(&escape_pointer_segment(&key));
    }
    Ok(pointer)
}

/// Decode a JSON Pointer segment (handles `~1`, `~0` and percent-encoding).
pub fn decode_pointer_segment(segment: &str) -> String {
    let decoded = segment.replace("~1", "/").replace("~0", "~");
    percent_decode_str(&decoded).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn load_json_file() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        writeln!(file, r#"{{"type": "object"}}"#).unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.root()["type"], "object");
        assert_eq!(doc.source(), Some(file.path()));
    }

    #[test]
    fn load_yaml_file() {
        let mut file = Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "type: object\nproperties:\n  id:\n    type: string").unwrap();

        let doc = load_document(file.path()).unwrap();
        assert_eq!(doc.root()["properties"]["id"]["type"], "string");
    }

    #[test]
    fn load_missing_file() {
        let result = load_document(Path::new("/nonexistent/path.json"));
        assert!(matches!(result, Err(ResolveError::ReadError { .. })));
    }

    #[test]
    fn load_unknown_extension() {
        let result = load_document(Path::new("/tmp/schema.txt"));
        assert!(matches!(result, Err(ResolveError::InvalidExtension { .. })));
    }

    #[test]
    fn load_invalid_json() {
        let result = load_document_str("not json", DocumentFormat::Json);
        assert!(matches!(result, Err(ResolveError::InvalidJson { .. })));
    }

    #[test]
    fn load_invalid_yaml() {
        let result = load_document_str("a: [unclosed", DocumentFormat::Yaml);
        assert!(matches!(result, Err(ResolveError::InvalidYaml { .. })));
    }

    #[test]
    fn yaml_numeric_keys_become_strings() {
        let doc = load_document_str(
            "responses:\n  200:\n    description: ok\n",
            DocumentFormat::Yaml,
        )
        .unwrap();
        assert_eq!(doc.root()["responses"]["200"]["description"], "ok");
    }

    #[test]
    fn yaml_preserves_key_order() {
        let doc = load_document_str("z: 1\na: 2\nm: 3\n", DocumentFormat::Yaml).unwrap();
        let keys: Vec<&String> = doc.root().as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn yaml_sequence_keys_are_rejected() {
        let result = load_document_str("? [a, b]\n: value\n", DocumentFormat::Yaml);
        assert!(matches!(result, Err(ResolveError::InvalidDocument { .. })));
    }

    #[test]
    fn parse_internal_reference() {
        assert_eq!(
            Reference::parse("#/components/schemas/User").unwrap(),
            Reference::Internal {
                fragment: "#/components/schemas/User"
            }
        );
    }

    #[test]
    fn parse_external_reference_with_fragment() {
        assert_eq!(
            Reference::parse("models/user.yaml#/User").unwrap(),
            Reference::External {
                file: "models/user.yaml",
                fragment: Some("#/User")
            }
        );
    }

    #[test]
    fn parse_bare_external_reference() {
        assert_eq!(
            Reference::parse("../common/Error.json").unwrap(),
            Reference::External {
                file: "../common/Error.json",
                fragment: None
            }
        );
    }

    #[test]
    fn parse_rejects_remote_and_empty() {
        assert!(matches!(
            Reference::parse("https://example.com/api.yaml#/X"),
            Err(ResolveError::InvalidReference { .. })
        ));
        assert!(matches!(
            Reference::parse("   "),
            Err(ResolveError::InvalidReference { .. })
        ));
    }

    #[test]
    fn is_remote_detects_schemes() {
        assert!(is_remote("https://example.com/schema.json"));
        assert!(is_remote("file:///etc/passwd.json"));
        assert!(!is_remote("./schema.json"));
        assert!(!is_remote("dir/schema.json"));
    }

    #[test]
    fn navigate_fragment_returns_escaped_pointer() {
        let root = json!({
            "components": { "schemas": { "a/b": { "type": "string" } } }
        });
        let pointer = navigate_fragment(&root, "#/components/schemas/a~1b").unwrap();
        assert_eq!(pointer, "/components/schemas/a~1b");
        assert_eq!(root.pointer(&pointer).unwrap()["type"], "string");
    }

    #[test]
    fn navigate_fragment_percent_decodes() {
        let root = json!({ "definitions": { "User Profile": {} } });
        let pointer = navigate_fragment(&root, "#/definitions/User%20Profile").unwrap();
        assert!(root.pointer(&pointer).is_some());
    }

    #[test]
    fn navigate_fragment_indexes_arrays() {
        let root = json!({ "allOf": [{}, { "title": "second" }] });
        let pointer = navigate_fragment(&root, "#/allOf/1").unwrap();
        assert_eq!(root.pointer(&pointer).unwrap()["title"], "second");
    }

    #[test]
    fn navigate_fragment_root() {
        let root = json!({ "type": "object" });
        assert_eq!(navigate_fragment(&root, "#").unwrap(), "");
        assert_eq!(navigate_fragment(&root, "#/").unwrap(), "");
    }

    #[test]
    fn navigate_fragment_missing_segment() {
        let root = json!({ "components": { "schemas": {} } });
        let result = navigate_fragment(&root, "#/components/schemas/Missing");
        assert!(matches!(
            result,
            Err(ResolveError::UnresolvedReference { reference, .. })
                if reference == "#/components/schemas/Missing"
        ));
    }
}
