//! Keyspace resolution for an entity bound to suffix values.
//!
//! A [`Context`] pairs an entity with an optional live object and explicit
//! suffix bindings. Expanding it yields one [`BoundContext`] per combination
//! of multi-valued (IN) bindings; each bound context names at most one
//! keyspace.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::datatype::Value;
use crate::error::{MapperError, Result};
use crate::metadata::{ColumnDescriptor, EntityDescriptor, TableDescriptor};
use crate::schema::ObjectRef;

lazy_static! {
    static ref OUTSIDE_NAME: Regex = Regex::new(r"[^A-Za-z0-9_]").expect("keyspace pattern");
}

#[derive(Debug, Clone, PartialEq)]
pub enum SuffixBinding {
    One(Value),
    Many(Vec<Value>),
}

impl SuffixBinding {
    fn values(&self) -> &[Value] {
        match self {
            SuffixBinding::One(v) => std::slice::from_ref(v),
            SuffixBinding::Many(vs) => vs,
        }
    }
}

/// Joins the template and the suffix values with `_`, lower-cases the result
/// and replaces anything outside `[A-Za-z0-9_]` with `_`.
pub fn keyspace_name<'a>(template: &str, values: impl IntoIterator<Item = &'a Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if !template.is_empty() {
        parts.push(template.to_owned());
    }
    parts.extend(values.into_iter().map(|v| v.to_string()));
    let joined = parts.join("_").to_lowercase();
    OUTSIDE_NAME.replace_all(&joined, "_").into_owned()
}

enum Candidate {
    Keyspace(String),
    Excluded { suffix: String, value: String },
}

fn candidate(entity: &EntityDescriptor, suffixes: &BTreeMap<String, Value>) -> Result<Candidate> {
    let keyspace = entity
        .keyspace()
        .ok_or_else(|| MapperError::schema(entity.type_name(), "has no keyspace"))?;
    let mut values = Vec::with_capacity(entity.suffixes().len());
    for suffix in entity.suffixes() {
        let value = suffixes
            .get(suffix.name())
            .ok_or_else(|| MapperError::MissingSuffix(suffix.name().to_owned()))?;
        if value.is_null() {
            return Err(MapperError::MissingSuffix(suffix.name().to_owned()));
        }
        let plain = value.to_string();
        if suffix.is_excluded(&plain) {
            return Ok(Candidate::Excluded {
                suffix: suffix.name().to_owned(),
                value: plain,
            });
        }
        values.push(value);
    }
    Ok(Candidate::Keyspace(keyspace_name(keyspace.name(), values)))
}

/// Keyspace for exactly one set of suffix values. An excluded value is an error here.
pub fn resolve_keyspace(entity: &EntityDescriptor, suffixes: &BTreeMap<String, Value>) -> Result<String> {
    match candidate(entity, suffixes)? {
        Candidate::Keyspace(name) => Ok(name),
        Candidate::Excluded { suffix, value } => Err(MapperError::ExcludedSuffix { suffix, value }),
    }
}

// ------------- Context -------------
#[derive(Debug, Clone)]
pub struct Context {
    entity: Arc<EntityDescriptor>,
    object: Option<ObjectRef>,
    bindings: BTreeMap<String, SuffixBinding>,
}

impl Context {
    pub fn new(entity: Arc<EntityDescriptor>) -> Self {
        Self {
            entity,
            object: None,
            bindings: BTreeMap::new(),
        }
    }
    pub fn for_object(entity: Arc<EntityDescriptor>, object: ObjectRef) -> Result<Self> {
        entity.check_instance(&object)?;
        Ok(Self {
            entity,
            object: Some(object),
            bindings: BTreeMap::new(),
        })
    }
    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }
    pub fn object(&self) -> Option<&ObjectRef> {
        self.object.as_ref()
    }
    pub fn has_binding(&self, suffix: &str) -> bool {
        self.bindings.contains_key(suffix)
    }

    /// Binds a suffix explicitly; overrides the bound object's value.
    pub fn bind(&mut self, suffix: &str, binding: SuffixBinding) -> Result<()> {
        let declared = self.entity.suffix(suffix).ok_or_else(|| {
            MapperError::validation(format!("'{}' is not a suffix key of {}", suffix, self.entity.type_name()))
        })?;
        for value in binding.values() {
            if value.is_null() || !declared.field().data_type().accepts(value) {
                return Err(MapperError::validation(format!(
                    "suffix '{}' cannot be bound to {:?}",
                    suffix, value
                )));
            }
        }
        self.bindings.insert(suffix.to_owned(), binding);
        Ok(())
    }

    /// One bound context per combination of suffix values, in suffix
    /// declaration order.
    pub fn bound_contexts(&self) -> Result<Vec<BoundContext>> {
        let from_object = match &self.object {
            Some(object) => self.entity.for_object(object)?.suffix_values(object)?,
            None => BTreeMap::new(),
        };
        let mut combinations: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
        for suffix in self.entity.suffixes() {
            let values: Vec<Value> = match (self.bindings.get(suffix.name()), from_object.get(suffix.name())) {
                (Some(binding), _) => binding.values().to_vec(),
                (None, Some(value)) if !value.is_null() => vec![value.clone()],
                _ => return Err(MapperError::MissingSuffix(suffix.name().to_owned())),
            };
            let mut expanded = Vec::with_capacity(combinations.len() * values.len());
            for combination in &combinations {
                for value in &values {
                    let mut next = combination.clone();
                    next.insert(suffix.name().to_owned(), value.clone());
                    expanded.push(next);
                }
            }
            combinations = expanded;
        }
        if combinations.len() > 1 {
            debug!(entity = self.entity.type_name(), candidates = combinations.len(), "suffix fan-out");
        }
        Ok(combinations
            .into_iter()
            .map(|suffixes| BoundContext {
                entity: Arc::clone(&self.entity),
                object: self.object.clone(),
                suffixes,
            })
            .collect())
    }
}

// ------------- Bound context -------------
#[derive(Debug, Clone)]
pub struct BoundContext {
    entity: Arc<EntityDescriptor>,
    object: Option<ObjectRef>,
    suffixes: BTreeMap<String, Value>,
}

impl BoundContext {
    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.entity
    }
    pub fn object(&self) -> Option<&ObjectRef> {
        self.object.as_ref()
    }
    pub fn suffixes(&self) -> &BTreeMap<String, Value> {
        &self.suffixes
    }

    /// `None` when a suffix value is excluded; the candidate then produces nothing.
    pub fn keyspace(&self) -> Result<Option<String>> {
        match candidate(&self.entity, &self.suffixes)? {
            Candidate::Keyspace(name) => Ok(Some(name)),
            Candidate::Excluded { suffix, value } => {
                debug!(entity = self.entity.type_name(), suffix = %suffix, value = %value, "excluded suffix, skipping");
                Ok(None)
            }
        }
    }

    /// Values of `table`'s columns read off `source`, or off the bound object.
    /// `source` must be an instance of the context's entity.
    pub fn object_values(
        &self,
        table: &TableDescriptor,
        source: Option<&ObjectRef>,
    ) -> Result<Vec<(Arc<ColumnDescriptor>, Value)>> {
        let object = match (source, &self.object) {
            (Some(source), _) => source,
            (None, Some(bound)) => bound,
            (None, None) => {
                return Err(MapperError::validation(format!(
                    "no {} object bound to read values from",
                    self.entity.type_name()
                )));
            }
        };
        let reader = self.entity.for_object(object)?;
        let Some(own_table) = reader.table(table.name()) else {
            return Ok(Vec::new());
        };
        let values = reader.read_columns(own_table, object)?;
        Ok(values
            .into_iter()
            .filter_map(|(column, value)| table.column(column.name()).map(|target| (Arc::clone(target), value)))
            .collect())
    }
}
