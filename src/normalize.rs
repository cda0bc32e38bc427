//! Whole-document normalization into a resolved schema graph.
//!
//! For every named schema in a document's registry, the normalizer computes
//! the flattened [`CompositionResult`] and then names every anonymous inline
//! object schema it can reach through properties, array items and
//! `additionalProperties`. Emitters consume the resulting [`ResolvedGraph`]
//! read-only.
//!
//! # Inline schema naming
//!
//! 1. the schema's `title`
//! 2. the property it was found under
//! 3. `InlineSchema{n}`
//!
//! Names are converted to UpperCamelCase and suffixed with a number when
//! they collide with a named schema or an earlier inline name.

use std::collections::HashSet;
use std::sync::Arc;

use heck::ToUpperCamelCase;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::compose::{CompositionResult, SchemaComposer};
use crate::dereference::Dereferencer;
use crate::error::ResolveError;
use crate::path_resolver::SecurePathResolver;
use crate::types::{escape_pointer_segment, Document, NodeId, SchemaRef, COMPOSITION_KEYWORDS};

/// Synthetic names for anonymous inline object schemas, keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct InlineSchemaRegistry {
    names: IndexMap<SchemaRef, String>,
    taken: HashSet<String>,
    fallback_counter: usize,
}

impl InlineSchemaRegistry {
    fn with_reserved<'a>(reserved: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            taken: reserved.into_iter().map(String::from).collect(),
            ..Self::default()
        }
    }

    /// Name assigned to `node`, if it was registered.
    pub fn name_of(&self, node: &SchemaRef) -> Option<&str> {
        self.names.get(node).map(String::as_str)
    }

    /// Name assigned to the node with identity `id`, if any.
    pub fn name_of_id(&self, id: NodeId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn contains(&self, node: &SchemaRef) -> bool {
        self.names.contains_key(node)
    }

    /// Registered schemas in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (&SchemaRef, &str)> {
        self.names.iter().map(|(node, name)| (node, name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Assign a unique name to `node`. No-op if it already has one.
    fn register(&mut self, node: SchemaRef, title: Option<&str>, discovered_as: Option<&str>) {
        if self.names.contains_key(&node) {
            return;
        }

        let base = title
            .map(|t| t.to_upper_camel_case())
            .filter(|n| !n.is_empty())
            .or_else(|| {
                discovered_as
                    .map(|p| p.to_upper_camel_case())
                    .filter(|n| !n.is_empty())
            })
            .unwrap_or_else(|| {
                self.fallback_counter += 1;
                format!("InlineSchema{}", self.fallback_counter)
            });

        let mut name = base.clone();
        let mut suffix = 2;
        while self.taken.contains(&name) {
            name = format!("{}{}", base, suffix);
            suffix += 1;
        }

        tracing::debug!(name = %name, pointer = node.pointer(), "registered inline schema");
        self.taken.insert(name.clone());
        self.names.insert(node, name);
    }
}

/// A named schema together with its flattened view.
#[derive(Debug, Clone)]
pub struct ResolvedSchema {
    pub name: String,
    pub schema: SchemaRef,
    pub composition: CompositionResult,
}

/// The fully resolved graph of one document.
#[derive(Debug)]
pub struct ResolvedGraph {
    document: Arc<Document>,
    schemas: IndexMap<String, ResolvedSchema>,
    inline: InlineSchemaRegistry,
    external_loads: usize,
}

impl ResolvedGraph {
    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    /// Named schemas in document order.
    pub fn schema_names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schema(&self, name: &str) -> Option<&ResolvedSchema> {
        self.schemas.get(name)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &ResolvedSchema> {
        self.schemas.values()
    }

    pub fn composition(&self, name: &str) -> Option<&CompositionResult> {
        self.schemas.get(name).map(|s| &s.composition)
    }

    pub fn inline_schemas(&self) -> &InlineSchemaRegistry {
        &self.inline
    }

    pub fn inline_name(&self, node: &SchemaRef) -> Option<&str> {
        self.inline.name_of(node)
    }

    /// External documents parsed during the pass that built this graph.
    pub fn external_documents_loaded(&self) -> usize {
        self.external_loads
    }

    /// Serializable overview of the graph.
    pub fn summary(&self) -> GraphSummary {
        let schemas = self
            .schemas
            .iter()
            .map(|(name, resolved)| {
                let properties = resolved
                    .composition
                    .properties
                    .iter()
                    .map(|(prop_name, node)| PropertySummary {
                        name: prop_name.clone(),
                        location: location(node),
                        inline_name: self.inline.name_of(node).map(String::from),
                    })
                    .collect();
                let summary = SchemaSummary {
                    properties,
                    required: resolved.composition.required.iter().cloned().collect(),
                };
                (name.clone(), summary)
            })
            .collect();

        let inline_schemas = self
            .inline
            .iter()
            .map(|(node, name)| InlineSummary {
                name: name.to_string(),
                location: location(node),
            })
            .collect();

        GraphSummary {
            schemas,
            inline_schemas,
        }
    }
}

/// Serializable overview of a [`ResolvedGraph`].
#[derive(Debug, Clone, Serialize)]
pub struct GraphSummary {
    pub schemas: IndexMap<String, SchemaSummary>,
    pub inline_schemas: Vec<InlineSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub properties: Vec<PropertySummary>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertySummary {
    pub name: String,
    /// `file#pointer` of the property schema.
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineSummary {
    pub name: String,
    pub location: String,
}

fn location(node: &SchemaRef) -> String {
    let file = node
        .document()
        .source()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}#{}", file, node.pointer())
}

/// Drives a resolution pass over a whole document.
pub struct SchemaGraphNormalizer<'r> {
    resolver: &'r SecurePathResolver,
}

impl<'r> SchemaGraphNormalizer<'r> {
    pub fn new(resolver: &'r SecurePathResolver) -> Self {
        Self { resolver }
    }

    /// Resolve every named schema of `document`.
    ///
    /// The external document cache lives exactly as long as this call.
    ///
    /// # Errors
    ///
    /// Fails on the first schema that cannot be flattened; no partial graph
    /// is returned.
    pub fn normalize(&self, document: Arc<Document>) -> Result<ResolvedGraph, ResolveError> {
        let named = named_schemas(&document);
        self.build(document, named.clone(), &named)
    }

    /// Resolve only the schema called `name`, as a graph of one.
    ///
    /// Other named schemas are neither flattened nor walked, so a broken
    /// sibling does not affect the result. Their names stay reserved for
    /// inline naming.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` if `document` has no schema called
    /// `name`, otherwise any error from flattening that schema.
    pub fn normalize_only(
        &self,
        document: Arc<Document>,
        name: &str,
    ) -> Result<ResolvedGraph, ResolveError> {
        let named = named_schemas(&document);
        let selected: Vec<_> = named
            .iter()
            .filter(|(candidate, _)| candidate == name)
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(missing_schema(&document, name));
        }
        self.build(document, selected, &named)
    }

    /// Resolve a single named schema of `document`.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedReference` if `document` has no schema called `name`.
    pub fn normalize_schema(
        &self,
        document: &Arc<Document>,
        name: &str,
    ) -> Result<ResolvedSchema, ResolveError> {
        let mut graph = self.normalize_only(Arc::clone(document), name)?;
        graph
            .schemas
            .swap_remove(name)
            .ok_or_else(|| missing_schema(document, name))
    }

    fn build(
        &self,
        document: Arc<Document>,
        selected: Vec<(String, SchemaRef)>,
        named: &[(String, SchemaRef)],
    ) -> Result<ResolvedGraph, ResolveError> {
        let mut deref = Dereferencer::with_root(self.resolver, &document);

        let mut schemas = IndexMap::new();
        for (name, schema) in selected {
            let composition = SchemaComposer::new(&mut deref).flatten(&schema)?;
            tracing::debug!(
                schema = %name,
                properties = composition.properties.len(),
                "flattened schema"
            );
            schemas.insert(
                name.clone(),
                ResolvedSchema {
                    name,
                    schema,
                    composition,
                },
            );
        }

        let inline = collect_inline(named, &schemas);

        Ok(ResolvedGraph {
            document,
            schemas,
            inline,
            external_loads: deref.cache().loads(),
        })
    }
}

fn missing_schema(document: &Arc<Document>, name: &str) -> ResolveError {
    let prefix = document
        .schema_registry()
        .map_or("/components/schemas", |(prefix, _)| prefix);
    ResolveError::UnresolvedReference {
        reference: format!("#{}/{}", prefix, escape_pointer_segment(name)),
        chain: Vec::new(),
    }
}

/// The document's named schemas, in registry order.
fn named_schemas(document: &Arc<Document>) -> Vec<(String, SchemaRef)> {
    let Some((prefix, registry)) = document.schema_registry() else {
        return Vec::new();
    };

    registry
        .keys()
        .filter_map(|name| {
            let pointer = format!("{}/{}", prefix, escape_pointer_segment(name));
            SchemaRef::new(Arc::clone(document), pointer).map(|schema| (name.clone(), schema))
        })
        .collect()
}

/// Register anonymous inline object schemas reachable from `schemas`.
///
/// Walks each schema where it is declared first, then every property of its
/// flattened view, which picks up inline schemas that arrive through
/// references into other documents.
fn collect_inline(
    named: &[(String, SchemaRef)],
    schemas: &IndexMap<String, ResolvedSchema>,
) -> InlineSchemaRegistry {
    let mut collector = InlineCollector {
        top_level: named.iter().map(|(_, schema)| schema.id()).collect(),
        visited: HashSet::new(),
        registry: InlineSchemaRegistry::with_reserved(named.iter().map(|(n, _)| n.as_str())),
    };

    for resolved in schemas.values() {
        collector.walk(&resolved.schema, None, false);
    }
    for resolved in schemas.values() {
        for (name, property) in &resolved.composition.properties {
            collector.walk(property, Some(name), false);
        }
    }

    collector.registry
}

struct InlineCollector {
    top_level: HashSet<NodeId>,
    // separate from any composition visited set; spans the whole document
    visited: HashSet<NodeId>,
    registry: InlineSchemaRegistry,
}

impl InlineCollector {
    fn walk(&mut self, node: &SchemaRef, discovered_as: Option<&str>, composition_member: bool) {
        if !self.visited.insert(node.id()) {
            return;
        }

        let value = node.node();
        if !value.is_object() {
            return;
        }

        if !composition_member && !self.top_level.contains(&node.id()) && is_object_schema(value) {
            let title = value.get("title").and_then(Value::as_str);
            self.registry.register(node.clone(), title, discovered_as);
        }

        if let Some(props) = value.get("properties").and_then(Value::as_object) {
            if let Some(props_ref) = node.child("properties") {
                for name in props.keys() {
                    if let Some(prop) = props_ref.child(name) {
                        self.walk(&prop, Some(name), false);
                    }
                }
            }
        }

        for keyword in ["items", "additionalProperties"] {
            if value.get(keyword).is_some_and(Value::is_object) {
                if let Some(child) = node.child(keyword) {
                    self.walk(&child, discovered_as, false);
                }
            }
        }

        for &keyword in COMPOSITION_KEYWORDS {
            let count = value.get(keyword).and_then(Value::as_array).map_or(0, Vec::len);
            for index in 0..count {
                if let Some(member) = node.item(keyword, index) {
                    self.walk(&member, discovered_as, true);
                }
            }
        }
    }
}

/// An object schema with at least one declared property.
fn is_object_schema(value: &Value) -> bool {
    let has_properties = value
        .get("properties")
        .and_then(Value::as_object)
        .is_some_and(|props| !props.is_empty());
    let typed_object = match value.get("type") {
        None => true,
        Some(Value::String(t)) => t == "object",
        Some(Value::Array(types)) => types.iter().any(|t| t == "object"),
        Some(_) => false,
    };
    has_properties && typed_object
}
