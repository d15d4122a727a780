//! # Schema and Data Model
//!
//! Entity schemas define the structure of input microdata: entity types,
//! their typed fields, and relationships between them (foreign keys and the
//! auto-derived reverse relations used for aggregation over children).
//!
//! [`Data`] is an immutable input snapshot - per-entity row tables plus a
//! `(entity, primary key) -> row` index built once at construction so
//! foreign-key resolution is O(1) during evaluation.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::ast::EntityDecl;
use crate::value::{DataKey, FieldType, Row, Value};

/// Primary-key field name expected on every row.
pub const PRIMARY_KEY: &str = "id";

/// A typed field on an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub dtype: FieldType,
}

/// A relationship to another entity. `many = false` is a foreign key held
/// on this entity's rows; `many = true` is the reverse relation (a view,
/// never a stored field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub target: String,
    pub many: bool,
}

/// An entity type: a named table shape. Field order is declaration order
/// and also the native wire column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub fields: Vec<Field>,
    pub relations: Vec<Relation>,
}

impl Entity {
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Declared field names in wire order.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

impl From<&EntityDecl> for Entity {
    fn from(decl: &EntityDecl) -> Self {
        Entity {
            name: decl.name.clone(),
            fields: decl
                .fields
                .iter()
                .map(|f| Field {
                    name: f.name.clone(),
                    dtype: f.dtype,
                })
                .collect(),
            relations: decl
                .relations
                .iter()
                .map(|r| Relation {
                    name: r.name.clone(),
                    target: r.target.clone(),
                    many: r.many,
                })
                .collect(),
        }
    }
}

/// Complete schema for a ruleset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub entities: HashMap<String, Entity>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.name.clone(), entity);
    }

    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.get(name)
    }

    /// Foreign-key field on `child` rows pointing at `parent`, if any.
    /// This is what a reverse relation on `parent` joins through.
    pub fn fk_field_to(&self, child: &str, parent: &str) -> Option<&str> {
        self.entities.get(child)?.relations.iter().find_map(|r| {
            if !r.many && r.target == parent {
                Some(r.name.as_str())
            } else {
                None
            }
        })
    }

    /// Validate input data against the schema. Returns every problem found
    /// rather than stopping at the first.
    pub fn validate_data(&self, data: &Data) -> Vec<String> {
        let mut errors = Vec::new();

        for (entity_name, rows) in &data.tables {
            let Some(entity) = self.entities.get(entity_name) else {
                errors.push(format!("unknown entity: {}", entity_name));
                continue;
            };

            let mut seen_keys: HashMap<DataKey, usize> = HashMap::new();
            for (i, row) in rows.iter().enumerate() {
                match row.get(PRIMARY_KEY) {
                    None => errors.push(format!(
                        "{}[{}]: missing '{}' field",
                        entity_name, i, PRIMARY_KEY
                    )),
                    Some(pk) => match pk.as_key() {
                        None => errors.push(format!(
                            "{}[{}]: primary key must be int, str, or bool, got {}",
                            entity_name,
                            i,
                            pk.type_name()
                        )),
                        Some(key) => {
                            if let Some(first) = seen_keys.insert(key, i) {
                                errors.push(format!(
                                    "{}[{}]: duplicate primary key (first seen at row {})",
                                    entity_name, i, first
                                ));
                            }
                        }
                    },
                }

                for field in &entity.fields {
                    if field.name == PRIMARY_KEY {
                        continue;
                    }
                    match row.get(&field.name) {
                        None => errors.push(format!(
                            "{}[{}]: missing field '{}'",
                            entity_name, i, field.name
                        )),
                        Some(Value::Null) => {}
                        Some(value) if !field.dtype.matches(value) => errors.push(format!(
                            "{}[{}]: field '{}' expects {}, got {}",
                            entity_name,
                            i,
                            field.name,
                            field.dtype,
                            value.type_name()
                        )),
                        Some(_) => {}
                    }
                }

                for relation in &entity.relations {
                    if relation.many {
                        continue;
                    }
                    match row.get(&relation.name) {
                        None => errors.push(format!(
                            "{}[{}]: missing relation '{}'",
                            entity_name, i, relation.name
                        )),
                        Some(Value::Null) => {}
                        Some(fk) => {
                            if data.get_row(&relation.target, fk).is_none() {
                                errors.push(format!(
                                    "{}[{}]: relation '{}' references missing {} {}",
                                    entity_name, i, relation.name, relation.target, fk
                                ));
                            }
                        }
                    }
                }
            }
        }

        errors
    }

    /// [`Schema::validate_data`] as a hard failure.
    pub fn check_data(&self, data: &Data) -> Result<(), DataError> {
        let errors = self.validate_data(data);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DataError::InvalidData { errors })
        }
    }
}

/// Input data failed schema validation.
#[derive(Debug, Clone, Error)]
pub enum DataError {
    #[error("invalid input data: {}", errors.join("; "))]
    InvalidData { errors: Vec<String> },
}

/// An immutable input snapshot: per-entity row tables with a primary-key
/// index. Evaluation reads but never writes it.
#[derive(Debug, Clone, Default)]
pub struct Data {
    tables: HashMap<String, Vec<Row>>,
    index: HashMap<(String, DataKey), usize>,
}

impl Data {
    /// Index the given tables. Rows without an indexable primary key are
    /// still evaluable; they just cannot be FK targets. Duplicate keys are
    /// reported by [`Schema::validate_data`]; here the first row wins.
    pub fn new(tables: HashMap<String, Vec<Row>>) -> Self {
        let mut index = HashMap::new();
        for (entity, rows) in &tables {
            for (i, row) in rows.iter().enumerate() {
                if let Some(key) = row.get(PRIMARY_KEY).and_then(Value::as_key) {
                    index.entry((entity.clone(), key)).or_insert(i);
                }
            }
        }
        Data { tables, index }
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Rows for an entity; absent entities read as empty tables.
    pub fn get_rows(&self, entity: &str) -> &[Row] {
        self.tables.get(entity).map_or(&[], Vec::as_slice)
    }

    /// O(1) primary-key lookup.
    pub fn get_row(&self, entity: &str, key: &Value) -> Option<&Row> {
        let key = key.as_key()?;
        let i = *self.index.get(&(entity.to_string(), key))?;
        self.tables.get(entity)?.get(i)
    }

    /// Child rows whose `fk_field` equals `key` (reverse-relation view).
    pub fn get_related(&self, entity: &str, fk_field: &str, key: &Value) -> Vec<&Row> {
        self.get_rows(entity)
            .iter()
            .filter(|row| row.get(fk_field).is_some_and(|v| v.loose_eq(key)))
            .collect()
    }
}

impl From<HashMap<String, Vec<Row>>> for Data {
    fn from(tables: HashMap<String, Vec<Row>>) -> Self {
        Data::new(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn household_schema() -> Schema {
        let mut schema = Schema::new();
        schema.add_entity(Entity {
            name: "household".into(),
            fields: vec![Field {
                name: "id".into(),
                dtype: FieldType::Int,
            }],
            relations: vec![Relation {
                name: "members".into(),
                target: "person".into(),
                many: true,
            }],
        });
        schema.add_entity(Entity {
            name: "person".into(),
            fields: vec![
                Field {
                    name: "id".into(),
                    dtype: FieldType::Int,
                },
                Field {
                    name: "income".into(),
                    dtype: FieldType::Float,
                },
            ],
            relations: vec![Relation {
                name: "household".into(),
                target: "household".into(),
                many: false,
            }],
        });
        schema
    }

    fn sample_data() -> Data {
        let mut tables = HashMap::new();
        tables.insert(
            "household".to_string(),
            vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(2))])],
        );
        tables.insert(
            "person".to_string(),
            vec![
                row(&[
                    ("id", Value::Int(10)),
                    ("income", Value::Float(100.0)),
                    ("household", Value::Int(1)),
                ]),
                row(&[
                    ("id", Value::Int(11)),
                    ("income", Value::Float(250.0)),
                    ("household", Value::Int(1)),
                ]),
                row(&[
                    ("id", Value::Int(12)),
                    ("income", Value::Float(80.0)),
                    ("household", Value::Int(2)),
                ]),
            ],
        );
        Data::new(tables)
    }

    #[test]
    fn test_pk_lookup() {
        let data = sample_data();
        let found = data.get_row("person", &Value::Int(11)).unwrap();
        assert_eq!(found.get("income"), Some(&Value::Float(250.0)));
        assert!(data.get_row("person", &Value::Int(99)).is_none());
    }

    #[test]
    fn test_reverse_relation_rows() {
        let data = sample_data();
        let members = data.get_related("person", "household", &Value::Int(1));
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn test_fk_field_derivation() {
        let schema = household_schema();
        assert_eq!(schema.fk_field_to("person", "household"), Some("household"));
        assert_eq!(schema.fk_field_to("household", "person"), None);
    }

    #[test]
    fn test_valid_data_passes() {
        let schema = household_schema();
        let data = sample_data();
        assert!(schema.validate_data(&data).is_empty());
    }

    #[test]
    fn test_dangling_fk_reported() {
        let schema = household_schema();
        let mut tables = HashMap::new();
        tables.insert("household".to_string(), vec![row(&[("id", Value::Int(1))])]);
        tables.insert(
            "person".to_string(),
            vec![row(&[
                ("id", Value::Int(10)),
                ("income", Value::Float(1.0)),
                ("household", Value::Int(7)),
            ])],
        );
        let errors = schema.validate_data(&Data::new(tables));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing household"));
    }

    #[test]
    fn test_missing_field_and_duplicate_pk_reported() {
        let schema = household_schema();
        let mut tables = HashMap::new();
        tables.insert(
            "household".to_string(),
            vec![row(&[("id", Value::Int(1))]), row(&[("id", Value::Int(1))])],
        );
        tables.insert(
            "person".to_string(),
            vec![row(&[("id", Value::Int(10)), ("household", Value::Int(1))])],
        );
        let errors = schema.validate_data(&Data::new(tables));
        assert!(errors.iter().any(|e| e.contains("duplicate primary key")));
        assert!(errors.iter().any(|e| e.contains("missing field 'income'")));
    }

    #[test]
    fn test_unknown_entity_reported() {
        let schema = household_schema();
        let mut tables = HashMap::new();
        tables.insert("alien".to_string(), vec![row(&[("id", Value::Int(1))])]);
        let errors = schema.validate_data(&Data::new(tables));
        assert_eq!(errors, vec!["unknown entity: alien".to_string()]);
    }
}
