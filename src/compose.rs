//! Schema composition flattening.
//!
//! Collapses a schema's `$ref` chain and `allOf` / `oneOf` / `anyOf` members
//! into one ordered property map plus a required-name set.
//!
//! # Merge rules
//!
//! | Node shape              | Result                                          |
//! |-------------------------|-------------------------------------------------|
//! | `$ref`                  | result of the target                            |
//! | `allOf`                 | members merged in order, later names win        |
//! | `oneOf` / `anyOf`       | same as `allOf` (superset view, no discriminant)|
//! | anything else           | own `properties` and `required`                 |
//!
//! A node that is already on the recursion path contributes nothing, which
//! is how cycles (`A` → `B` → `A`) terminate.

use std::collections::HashSet;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::dereference::{is_external, ref_target, Dereferencer};
use crate::error::ResolveError;
use crate::types::{NodeId, SchemaRef};

/// Identities of the nodes on the active recursion path.
pub type VisitedSet = HashSet<NodeId>;

/// Flattened view of one schema.
#[derive(Debug, Clone, Default)]
pub struct CompositionResult {
    /// Property name -> property schema, in merge order.
    pub properties: IndexMap<String, SchemaRef>,
    /// Union of every contributing `required` list, first-seen order.
    pub required: IndexSet<String>,
}

impl CompositionResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `other` into `self`; `other` wins on property name collisions.
    pub fn merge(&mut self, other: CompositionResult) {
        for (name, schema) in other.properties {
            self.properties.insert(name, schema);
        }
        self.required.extend(other.required);
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && self.required.is_empty()
    }

    pub fn property(&self, name: &str) -> Option<&SchemaRef> {
        self.properties.get(name)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.contains(name)
    }
}

/// Flattens schemas, following references through a [`Dereferencer`].
pub struct SchemaComposer<'d, 'r> {
    deref: &'d mut Dereferencer<'r>,
}

impl<'d, 'r> SchemaComposer<'d, 'r> {
    pub fn new(deref: &'d mut Dereferencer<'r>) -> Self {
        Self { deref }
    }

    /// Flatten `node` with a fresh visited set.
    pub fn flatten(&mut self, node: &SchemaRef) -> Result<CompositionResult, ResolveError> {
        let mut visited = VisitedSet::new();
        self.merge_properties(node, &mut visited)
    }

    /// Flatten `node`, skipping anything already in `visited`.
    ///
    /// `visited` holds the nodes on the active recursion path. `node` is in
    /// it while its members are merged and leaves it on return, so a cycle
    /// back to it yields an empty result at the point of re-entry while a
    /// sibling that reaches the same node again still contributes.
    ///
    /// # Errors
    ///
    /// Any dereference failure aborts the whole flattening. Lookup failures
    /// carry the chain of references that led to them. Following an external
    /// reference holds one level of the resolver's per-thread recursion
    /// depth, so very long cross-file chains fail with `RecursionLimit`.
    pub fn merge_properties(
        &mut self,
        node: &SchemaRef,
        visited: &mut VisitedSet,
    ) -> Result<CompositionResult, ResolveError> {
        let id = node.id();
        if !visited.insert(id) {
            tracing::trace!(node = ?node, "cycle terminated");
            return Ok(CompositionResult::new());
        }

        let result = self.merge_node(node, visited);
        visited.remove(&id);
        result
    }

    fn merge_node(
        &mut self,
        node: &SchemaRef,
        visited: &mut VisitedSet,
    ) -> Result<CompositionResult, ResolveError> {
        let value = node.node();

        if let Some(reference) = ref_target(value) {
            let target = self.deref.dereference(reference, node.document())?;
            let _guard = if is_external(reference) {
                Some(self.deref.resolver().enter()?)
            } else {
                None
            };
            return self
                .merge_properties(&target, visited)
                .map_err(|e| e.via(reference));
        }

        let mut result = CompositionResult::new();

        if let Some(members) = value.get("allOf").and_then(Value::as_array) {
            self.merge_members(node, "allOf", members.len(), visited, &mut result)?;
        } else if value.get("oneOf").is_some() || value.get("anyOf").is_some() {
            for keyword in ["oneOf", "anyOf"] {
                if let Some(members) = value.get(keyword).and_then(Value::as_array) {
                    self.merge_members(node, keyword, members.len(), visited, &mut result)?;
                }
            }
        } else {
            result.merge(own_properties(node));
        }

        Ok(result)
    }

    fn merge_members(
        &mut self,
        node: &SchemaRef,
        keyword: &str,
        count: usize,
        visited: &mut VisitedSet,
        result: &mut CompositionResult,
    ) -> Result<(), ResolveError> {
        for index in 0..count {
            if let Some(member) = node.item(keyword, index) {
                let merged = self.merge_properties(&member, visited)?;
                result.merge(merged);
            }
        }
        Ok(())
    }
}

/// The node's directly declared `properties` and `required`.
fn own_properties(node: &SchemaRef) -> CompositionResult {
    let mut result = CompositionResult::new();
    let value = node.node();

    if let Some(props) = value.get("properties").and_then(Value::as_object) {
        if let Some(props_ref) = node.child("properties") {
            for name in props.keys() {
                if let Some(prop) = props_ref.child(name) {
                    result.properties.insert(name.clone(), prop);
                }
            }
        }
    }

    if let Some(required) = value.get("required").and_then(Value::as_array) {
        result
            .required
            .extend(required.iter().filter_map(Value::as_str).map(String::from));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_resolver::SecurePathResolver;
    use crate::search_path::SearchPathSet;
    use crate::types::Document;
    use serde_json::json;
    use std::sync::Arc;

    fn schema(doc: &Arc<Document>, name: &str) -> SchemaRef {
        SchemaRef::new(Arc::clone(doc), format!("/components/schemas/{}", name)).unwrap()
    }

    fn flatten(doc: Value, name: &str) -> Result<CompositionResult, ResolveError> {
        let doc = Arc::new(Document::new(doc, None));
        let resolver = SecurePathResolver::new(SearchPathSet::default());
        let mut deref = Dereferencer::new(&resolver);
        SchemaComposer::new(&mut deref).flatten(&schema(&doc, name))
    }

    fn names(result: &CompositionResult) -> Vec<&str> {
        result.property_names().collect()
    }

    #[test]
    fn plain_properties_and_required() {
        let result = flatten(
            json!({ "components": { "schemas": { "User": {
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": { "type": "string" },
                    "email": { "type": "string" }
                }
            }}}}),
            "User",
        )
        .unwrap();

        assert_eq!(names(&result), ["id", "email"]);
        assert!(result.is_required("id"));
        assert!(!result.is_required("email"));
        assert_eq!(
            result.property("id").unwrap().pointer(),
            "/components/schemas/User/properties/id"
        );
    }

    #[test]
    fn all_of_merges_reference_and_inline_member() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Base": {
                    "required": ["id"],
                    "properties": { "id": { "type": "string" } }
                },
                "Extended": {
                    "allOf": [
                        { "$ref": "#/components/schemas/Base" },
                        {
                            "required": ["name"],
                            "properties": { "name": { "type": "string" } }
                        }
                    ]
                }
            }}}),
            "Extended",
        )
        .unwrap();

        assert_eq!(names(&result), ["id", "name"]);
        assert!(result.is_required("id"));
        assert!(result.is_required("name"));
    }

    #[test]
    fn later_all_of_member_wins_collision() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Base": { "properties": { "name": { "type": "integer" } } },
                "Extended": {
                    "allOf": [
                        { "$ref": "#/components/schemas/Base" },
                        { "properties": { "name": { "type": "string" } } }
                    ]
                }
            }}}),
            "Extended",
        )
        .unwrap();

        assert_eq!(result.properties.len(), 1);
        assert_eq!(result.property("name").unwrap().node()["type"], "string");
    }

    #[test]
    fn required_is_deduplicated_union() {
        let result = flatten(
            json!({ "components": { "schemas": { "X": {
                "allOf": [
                    { "required": ["a", "b"], "properties": { "a": {}, "b": {} } },
                    { "required": ["b", "c"], "properties": { "c": {} } }
                ]
            }}}}),
            "X",
        )
        .unwrap();

        let required: Vec<&String> = result.required.iter().collect();
        assert_eq!(required, ["a", "b", "c"]);
    }

    #[test]
    fn one_of_and_any_of_merge_all_branches() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Cat": { "properties": { "meows": { "type": "boolean" } } },
                "Dog": { "properties": { "barks": { "type": "boolean" } } },
                "Pet": {
                    "oneOf": [
                        { "$ref": "#/components/schemas/Cat" },
                        { "$ref": "#/components/schemas/Dog" }
                    ],
                    "anyOf": [
                        { "properties": { "name": { "type": "string" } } }
                    ]
                }
            }}}),
            "Pet",
        )
        .unwrap();

        assert_eq!(names(&result), ["meows", "barks", "name"]);
    }

    #[test]
    fn all_of_takes_precedence_over_own_properties() {
        let result = flatten(
            json!({ "components": { "schemas": { "X": {
                "allOf": [ { "properties": { "a": {} } } ],
                "properties": { "ignored": {} }
            }}}}),
            "X",
        )
        .unwrap();

        assert_eq!(names(&result), ["a"]);
    }

    #[test]
    fn reference_chain_is_followed() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "A": { "$ref": "#/components/schemas/B" },
                "B": { "$ref": "#/components/schemas/C" },
                "C": { "properties": { "deep": {} } }
            }}}),
            "A",
        )
        .unwrap();

        assert_eq!(names(&result), ["deep"]);
    }

    #[test]
    fn mutual_all_of_cycle_terminates() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "A": {
                    "allOf": [
                        { "properties": { "a": {} } },
                        { "$ref": "#/components/schemas/B" }
                    ]
                },
                "B": {
                    "allOf": [
                        { "properties": { "b": {} } },
                        { "$ref": "#/components/schemas/A" }
                    ]
                }
            }}}),
            "A",
        )
        .unwrap();

        assert_eq!(names(&result), ["a", "b"]);
    }

    #[test]
    fn self_reference_terminates_empty() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Loop": { "$ref": "#/components/schemas/Loop" }
            }}}),
            "Loop",
        )
        .unwrap();

        assert!(result.is_empty());
    }

    #[test]
    fn recursive_property_is_not_expanded() {
        let result = flatten(
            json!({ "components": { "schemas": { "Node": {
                "properties": {
                    "value": { "type": "integer" },
                    "next": { "$ref": "#/components/schemas/Node" }
                }
            }}}}),
            "Node",
        )
        .unwrap();

        assert_eq!(names(&result), ["value", "next"]);
        assert_eq!(
            result.property("next").unwrap().node()["$ref"],
            "#/components/schemas/Node"
        );
    }

    #[test]
    fn missing_reference_reports_chain() {
        let err = flatten(
            json!({ "components": { "schemas": {
                "Top": { "allOf": [ { "$ref": "#/components/schemas/Mid" } ] },
                "Mid": { "$ref": "#/components/schemas/Gone" }
            }}}),
            "Top",
        )
        .unwrap_err();

        match err {
            ResolveError::UnresolvedReference { reference, chain } => {
                assert_eq!(reference, "#/components/schemas/Gone");
                assert_eq!(chain, ["#/components/schemas/Mid"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn repeated_member_wins_again_after_override() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Base": { "properties": { "name": { "type": "integer" } } },
                "X": { "allOf": [
                    { "$ref": "#/components/schemas/Base" },
                    { "properties": { "name": { "type": "string" } } },
                    { "$ref": "#/components/schemas/Base" }
                ]}
            }}}),
            "X",
        )
        .unwrap();

        assert_eq!(names(&result), ["name"]);
        assert_eq!(result.property("name").unwrap().node()["type"], "integer");
    }

    #[test]
    fn diamond_reaches_shared_base_through_both_branches() {
        let result = flatten(
            json!({ "components": { "schemas": {
                "Base": { "required": ["id"], "properties": { "id": {} } },
                "Left": { "allOf": [
                    { "$ref": "#/components/schemas/Base" },
                    { "properties": { "left": {} } }
                ]},
                "Right": { "allOf": [
                    { "properties": { "id": { "type": "string" } } },
                    { "$ref": "#/components/schemas/Base" }
                ]},
                "Both": { "allOf": [
                    { "$ref": "#/components/schemas/Left" },
                    { "$ref": "#/components/schemas/Right" }
                ]}
            }}}),
            "Both",
        )
        .unwrap();

        assert_eq!(names(&result), ["id", "left"]);
        // Right re-merges Base after its own `id`, so Base's declaration wins
        assert!(result.property("id").unwrap().node().get("type").is_none());
        assert!(result.is_required("id"));
    }

    #[test]
    fn visited_set_is_empty_after_flattening() {
        let doc = Arc::new(Document::new(
            json!({ "components": { "schemas": {
                "A": { "allOf": [
                    { "properties": { "a": {} } },
                    { "$ref": "#/components/schemas/A" }
                ]}
            }}}),
            None,
        ));
        let resolver = SecurePathResolver::new(SearchPathSet::default());
        let mut deref = Dereferencer::new(&resolver);
        let mut visited = VisitedSet::new();

        let result = SchemaComposer::new(&mut deref)
            .merge_properties(&schema(&doc, "A"), &mut visited)
            .unwrap();
        assert_eq!(names(&result), ["a"]);
        assert!(visited.is_empty());
    }

    #[test]
    fn merge_keeps_first_position_on_overwrite() {
        let doc = Arc::new(Document::new(json!({ "a": {}, "b": {}, "c": {} }), None));
        let root = SchemaRef::root(Arc::clone(&doc));
        let mut first = CompositionResult::new();
        first.properties.insert("x".into(), root.child("a").unwrap());
        first.properties.insert("y".into(), root.child("b").unwrap());
        let mut second = CompositionResult::new();
        second.properties.insert("x".into(), root.child("c").unwrap());

        first.merge(second);
        assert_eq!(names(&first), ["x", "y"]);
        assert_eq!(first.property("x").unwrap().pointer(), "/c");
    }
}
