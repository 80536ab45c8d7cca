//! Explicit field-name translation between wire and local schemas.
//!
//! Each entity type registers a [`FieldMapping`] listing `(wire, local)`
//! name pairs. Fields without an entry pass through unchanged unless the
//! mapping is strict, in which case they are rejected so schema drift
//! surfaces as an error instead of a silently dropped field.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Field mapping for a single entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Entity type this mapping belongs to.
    pub entity_type: String,
    /// Pairs of `(wire name, local name)`.
    #[serde(default)]
    pub fields: Vec<(String, String)>,
    /// Reject fields that have no entry.
    #[serde(default)]
    pub strict: bool,
}

impl FieldMapping {
    /// Creates an empty, permissive mapping.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: Vec::new(),
            strict: false,
        }
    }

    /// Adds a `(wire, local)` pair.
    pub fn field(mut self, wire: impl Into<String>, local: impl Into<String>) -> Self {
        self.fields.push((wire.into(), local.into()));
        self
    }

    /// Makes unmapped fields an error.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
struct CompiledMapping {
    wire_to_local: BTreeMap<String, String>,
    local_to_wire: BTreeMap<String, String>,
    strict: bool,
}

impl CompiledMapping {
    fn compile(mapping: &FieldMapping) -> ProtocolResult<Self> {
        let mut compiled = CompiledMapping {
            strict: mapping.strict,
            ..Default::default()
        };
        let mut seen_wire = HashSet::new();
        let mut seen_local = HashSet::new();

        for (wire, local) in &mapping.fields {
            for (seen, name) in [(&mut seen_wire, wire), (&mut seen_local, local)] {
                if !seen.insert(name.clone()) {
                    return Err(ProtocolError::DuplicateMapping {
                        entity_type: mapping.entity_type.clone(),
                        field: name.clone(),
                    });
                }
            }
            compiled.wire_to_local.insert(wire.clone(), local.clone());
            compiled.local_to_wire.insert(local.clone(), wire.clone());
        }

        Ok(compiled)
    }
}

/// Registry of per-entity-type field mappings.
///
/// Entity types without a registered mapping are translated as identity.
#[derive(Debug, Clone, Default)]
pub struct MappingTable {
    mappings: HashMap<String, CompiledMapping>,
}

impl MappingTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mapping, replacing any previous one for the same type.
    pub fn register(&mut self, mapping: &FieldMapping) -> ProtocolResult<()> {
        let compiled = CompiledMapping::compile(mapping)?;
        self.mappings.insert(mapping.entity_type.clone(), compiled);
        Ok(())
    }

    /// Builds a table from a list of mappings.
    pub fn from_mappings<'a>(
        mappings: impl IntoIterator<Item = &'a FieldMapping>,
    ) -> ProtocolResult<Self> {
        let mut table = Self::new();
        for mapping in mappings {
            table.register(mapping)?;
        }
        Ok(table)
    }

    /// Returns true if `entity_type` has a registered mapping.
    pub fn contains(&self, entity_type: &str) -> bool {
        self.mappings.contains_key(entity_type)
    }

    /// Translates wire field names to local names.
    pub fn to_local(
        &self,
        entity_type: &str,
        fields: Map<String, Value>,
    ) -> ProtocolResult<Map<String, Value>> {
        match self.mappings.get(entity_type) {
            Some(mapping) => translate(entity_type, fields, &mapping.wire_to_local, mapping.strict),
            None => Ok(fields),
        }
    }

    /// Translates local field names to wire names.
    pub fn to_wire(
        &self,
        entity_type: &str,
        fields: Map<String, Value>,
    ) -> ProtocolResult<Map<String, Value>> {
        match self.mappings.get(entity_type) {
            Some(mapping) => translate(entity_type, fields, &mapping.local_to_wire, mapping.strict),
            None => Ok(fields),
        }
    }

    /// Translates a local payload to wire naming.
    ///
    /// Object payloads are translated field by field; any other JSON value
    /// (e.g. `null` for a delete) is passed through.
    pub fn payload_to_wire(&self, entity_type: &str, payload: Value) -> ProtocolResult<Value> {
        match payload {
            Value::Object(fields) => self.to_wire(entity_type, fields).map(Value::Object),
            other => Ok(other),
        }
    }
}

fn translate(
    entity_type: &str,
    fields: Map<String, Value>,
    names: &BTreeMap<String, String>,
    strict: bool,
) -> ProtocolResult<Map<String, Value>> {
    let mut out = Map::with_capacity(fields.len());
    for (name, value) in fields {
        match names.get(&name) {
            Some(target) => {
                out.insert(target.clone(), value);
            }
            None if strict => {
                return Err(ProtocolError::UnmappedField {
                    entity_type: entity_type.to_string(),
                    field: name,
                });
            }
            None => {
                out.insert(name, value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn table() -> MappingTable {
        let mut table = MappingTable::new();
        table
            .register(
                &FieldMapping::new("artists")
                    .field("stage_name", "stageName")
                    .field("genre_id", "genreId"),
            )
            .unwrap();
        table
            .register(&FieldMapping::new("balance").field("amount_cents", "amountCents").strict())
            .unwrap();
        table
    }

    #[test]
    fn translates_both_directions() {
        let t = table();
        let local = t
            .to_local("artists", object(json!({"stage_name": "Nova", "bio": "hi"})))
            .unwrap();
        assert_eq!(Value::Object(local.clone()), json!({"stageName": "Nova", "bio": "hi"}));

        let wire = t.to_wire("artists", local).unwrap();
        assert_eq!(Value::Object(wire), json!({"stage_name": "Nova", "bio": "hi"}));
    }

    #[test]
    fn strict_mapping_rejects_unknown_fields() {
        let t = table();
        let err = t
            .to_local("balance", object(json!({"amount_cents": 5, "currency": "EUR"})))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnmappedField { field, .. } if field == "currency"));
    }

    #[test]
    fn unregistered_types_are_identity() {
        let t = table();
        let fields = object(json!({"any_thing": 1}));
        assert_eq!(t.to_local("events", fields.clone()).unwrap(), fields);
        assert!(!t.contains("events"));
    }

    #[test]
    fn duplicate_targets_are_rejected() {
        let mut t = MappingTable::new();
        let err = t
            .register(&FieldMapping::new("artists").field("a", "x").field("b", "x"))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::DuplicateMapping { field, .. } if field == "x"));
    }

    #[test]
    fn non_object_payload_passes_through() {
        let t = table();
        assert_eq!(t.payload_to_wire("artists", Value::Null).unwrap(), Value::Null);
    }
}
