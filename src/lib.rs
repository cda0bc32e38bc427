//! Schema Graph Resolver
//!
//! Turns an API description document (OpenAPI, Swagger or plain JSON Schema,
//! in JSON or YAML) into a fully resolved, cycle-safe schema graph for
//! downstream source generation.
//!
//! Two pieces do the work:
//!
//! - [`SecurePathResolver`] finds the files external `$ref`s point at,
//!   inside a sandbox of allowed directories.
//! - [`SchemaGraphNormalizer`] flattens every named schema's `$ref` /
//!   `allOf` / `oneOf` / `anyOf` chain into one property set and names the
//!   anonymous inline object schemas it finds.
//!
//! # Example
//!
//! ```
//! use schema_graph::{
//!     load_document_str, DocumentFormat, ResolverConfig, SchemaGraphNormalizer,
//!     SecurePathResolver,
//! };
//!
//! let doc = load_document_str(
//!     r##"{
//!         "components": { "schemas": {
//!             "Base": { "required": ["id"], "properties": { "id": { "type": "string" } } },
//!             "User": {
//!                 "allOf": [
//!                     { "$ref": "#/components/schemas/Base" },
//!                     { "properties": { "address": {
//!                         "type": "object",
//!                         "properties": { "city": { "type": "string" } }
//!                     } } }
//!                 ]
//!             }
//!         } }
//!     }"##,
//!     DocumentFormat::Json,
//! )
//! .unwrap();
//!
//! let resolver = SecurePathResolver::from_config(&ResolverConfig::new().use_environment(false));
//! let graph = SchemaGraphNormalizer::new(&resolver).normalize(doc).unwrap();
//!
//! let user = graph.composition("User").unwrap();
//! assert_eq!(user.property_names().collect::<Vec<_>>(), ["id", "address"]);
//! assert!(user.is_required("id"));
//!
//! let address = user.property("address").unwrap();
//! assert_eq!(graph.inline_name(address), Some("Address"));
//! ```
//!
//! # Sandbox
//!
//! | Check        | Rule                                                          |
//! |--------------|---------------------------------------------------------------|
//! | Extension    | `.yaml`, `.yml` or `.json` (case-insensitive)                 |
//! | Boundary     | canonical path must stay inside the directory it came from    |
//! | Size         | at most 100 MiB                                               |
//! | Kind         | regular files only                                            |
//!
//! Traversal attempts are logged under the `schema_graph::security` target
//! and skipped; resolution then continues with the next search location.

mod compose;
mod dereference;
mod error;
mod linter;
mod loader;
mod normalize;
mod path_resolver;
mod search_path;
mod types;

pub use compose::{CompositionResult, SchemaComposer, VisitedSet};
pub use dereference::{is_external, ref_target, Dereferencer, DocumentCache};
pub use error::ResolveError;
pub use linter::{
    check_document, lint, lint_file, Diagnostic, FileResult, FileStatus, LintResult, Severity,
};
pub use loader::{
    decode_pointer_segment, is_remote, load_document, load_document_str, navigate_fragment,
    Reference,
};
pub use normalize::{
    GraphSummary, InlineSchemaRegistry, InlineSummary, PropertySummary, ResolvedGraph,
    ResolvedSchema, SchemaGraphNormalizer, SchemaSummary,
};
pub use path_resolver::{sanitize_reference, DepthGuard, SecurePathResolver};
pub use search_path::{
    search_path_property, set_search_path_property, ResolverConfig, SearchPathSet,
    SEARCH_PATH_ENV,
};
pub use types::{
    escape_pointer_segment, json_type_name, Document, DocumentFormat, NodeId, SchemaRef,
    ALLOWED_EXTENSIONS, COMPOSITION_KEYWORDS, MAX_FILE_SIZE, MAX_RECURSION_DEPTH,
    MAX_SEARCH_DEPTH,
};
