//! Entity metadata: descriptors compiled from the declarative schema.
//!
//! An [`EntityDescriptor`] is built once per type by the
//! [`DescriptorKeeper`](crate::keeper::DescriptorKeeper) and is immutable
//! afterwards. It knows the keyspace template and suffix keys, every
//! [`TableDescriptor`] with its key layout, and how to read column values off
//! a live object or rebuild an object from a row.

use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

// type-key values map to variants and back
use bimap::BiMap;
use seahash::SeaHasher;
use tracing::debug;

use crate::codec::decode_column;
use crate::datatype::{DataTypeDefinition, Value};
use crate::error::{MapperError, Result};
use crate::persisted::ColumnPersister;
use crate::result::Row;
use crate::schema::{AccessError, Accessor, Factory, ObjectRef, Replication, SortOrder};

pub type OtherHasher = BuildHasherDefault<SeaHasher>;

// ------------- Field -------------
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) declaring_type: &'static str,
    pub(crate) data_type: DataTypeDefinition,
    pub(crate) mandatory: bool,
    pub(crate) persister: Option<ColumnPersister>,
    pub(crate) accessor: Accessor,
    pub(crate) nested: Option<Arc<EntityDescriptor>>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn declaring_type(&self) -> &'static str {
        self.declaring_type
    }
    pub fn data_type(&self) -> &DataTypeDefinition {
        &self.data_type
    }
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }
    pub fn persister(&self) -> Option<&ColumnPersister> {
        self.persister.as_ref()
    }
    pub fn nested(&self) -> Option<&Arc<EntityDescriptor>> {
        self.nested.as_ref()
    }

    /// Reads the field off `object`; `None` when the object is not of the declaring type.
    pub(crate) fn get(&self, object: &dyn Any) -> Result<Option<Value>> {
        match &self.accessor {
            Accessor::Value(access) => Ok(access.get(object)),
            Accessor::Nested(access) => match (access.get(object), &self.nested) {
                (Some(inner), Some(nested)) => nested.to_udt_value(inner).map(Some),
                _ => Ok(None),
            },
        }
    }

    pub(crate) fn set(&self, object: &mut dyn Any, value: Value) -> std::result::Result<(), AccessError> {
        match &self.accessor {
            Accessor::Value(access) => access.set(object, value),
            Accessor::Nested(access) => {
                if value.is_null() {
                    return Ok(());
                }
                let nested = self.nested.as_ref().ok_or(AccessError::WrongShape)?;
                let inner = nested.from_udt_value(value).map_err(|_| AccessError::WrongShape)?;
                access.set(object, inner)
            }
        }
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.name)
            .field("declaring_type", &self.declaring_type)
            .field("data_type", &self.data_type)
            .field("mandatory", &self.mandatory)
            .field("persister", &self.persister.as_ref().map(|p| p.name().to_owned()))
            .finish()
    }
}

// ------------- Column -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Regular,
    PartitionKey(u32),
    ClusteringKey(u32, SortOrder),
    TypeKey,
}

#[derive(Debug)]
pub struct ColumnDescriptor {
    pub(crate) name: String,
    pub(crate) field: Arc<FieldDescriptor>,
    pub(crate) data_type: DataTypeDefinition,
    pub(crate) role: ColumnRole,
    pub(crate) index: bool,
    pub(crate) multi_key: bool,
}

impl ColumnDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn field(&self) -> &Arc<FieldDescriptor> {
        &self.field
    }
    /// Stored type, as declared in CREATE TABLE.
    pub fn data_type(&self) -> &DataTypeDefinition {
        &self.data_type
    }
    /// Type that clause and assignment values are checked against.
    pub fn value_type(&self) -> &DataTypeDefinition {
        if self.multi_key {
            self.field.data_type.element().unwrap_or(&self.field.data_type)
        } else {
            &self.field.data_type
        }
    }
    pub fn role(&self) -> ColumnRole {
        self.role
    }
    pub fn declaring_type(&self) -> &'static str {
        self.field.declaring_type
    }
    pub fn is_partition_key(&self) -> bool {
        matches!(self.role, ColumnRole::PartitionKey(_))
    }
    pub fn is_clustering_key(&self) -> bool {
        matches!(self.role, ColumnRole::ClusteringKey(_, _))
    }
    pub fn is_primary_key(&self) -> bool {
        self.is_partition_key() || self.is_clustering_key()
    }
    pub fn is_type_key(&self) -> bool {
        matches!(self.role, ColumnRole::TypeKey)
    }
    pub fn is_index(&self) -> bool {
        self.index
    }
    pub fn is_multi_key(&self) -> bool {
        self.multi_key
    }
    pub fn is_counter(&self) -> bool {
        self.data_type.is_counter()
    }
    pub fn is_mandatory(&self) -> bool {
        self.field.mandatory
    }
    /// Null is never valid for mandatory, primary-key or type-key columns.
    pub fn rejects_null(&self) -> bool {
        self.is_mandatory() || self.is_primary_key() || self.is_type_key()
    }
}

// ------------- Table -------------
/// Hook invoked once per table while a descriptor is built; may remove columns.
pub trait TableFilter: Send + Sync {
    fn filter(&self, table: &mut TableDescriptor) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub(crate) name: String,
    pub(crate) entity: &'static str,
    pub(crate) keyless: bool,
    pub(crate) columns: Vec<Arc<ColumnDescriptor>>,
    lookup: HashMap<String, usize, OtherHasher>,
    partition_keys: Vec<Arc<ColumnDescriptor>>,
    clustering_keys: Vec<Arc<ColumnDescriptor>>,
}

impl TableDescriptor {
    pub(crate) fn new(name: &str, entity: &'static str, keyless: bool, columns: Vec<Arc<ColumnDescriptor>>) -> Self {
        let mut table = Self {
            name: name.to_owned(),
            entity,
            keyless,
            columns,
            lookup: HashMap::default(),
            partition_keys: Vec::new(),
            clustering_keys: Vec::new(),
        };
        table.reindex();
        table
    }

    fn reindex(&mut self) {
        self.lookup = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        let mut partition: Vec<(u32, Arc<ColumnDescriptor>)> = Vec::new();
        let mut clustering: Vec<(u32, Arc<ColumnDescriptor>)> = Vec::new();
        for column in &self.columns {
            match column.role {
                ColumnRole::PartitionKey(order) => partition.push((order, Arc::clone(column))),
                ColumnRole::ClusteringKey(order, _) => clustering.push((order, Arc::clone(column))),
                _ => (),
            }
        }
        partition.sort_by_key(|(order, _)| *order);
        clustering.sort_by_key(|(order, _)| *order);
        self.partition_keys = partition.into_iter().map(|(_, c)| c).collect();
        self.clustering_keys = clustering.into_iter().map(|(_, c)| c).collect();
    }

    pub(crate) fn push_column(&mut self, column: Arc<ColumnDescriptor>) {
        self.columns.push(column);
        self.reindex();
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    /// Name of the entity type this table was built for.
    pub fn entity(&self) -> &'static str {
        self.entity
    }
    /// Keyless tables only describe nested types and are never queried.
    pub fn is_keyless(&self) -> bool {
        self.keyless
    }
    pub fn columns(&self) -> &[Arc<ColumnDescriptor>] {
        &self.columns
    }
    pub fn column(&self, name: &str) -> Option<&Arc<ColumnDescriptor>> {
        self.lookup.get(name).map(|i| &self.columns[*i])
    }
    pub fn has_column(&self, name: &str) -> bool {
        self.lookup.contains_key(name)
    }
    pub fn partition_keys(&self) -> &[Arc<ColumnDescriptor>] {
        &self.partition_keys
    }
    pub fn clustering_keys(&self) -> &[Arc<ColumnDescriptor>] {
        &self.clustering_keys
    }
    pub fn primary_keys(&self) -> impl Iterator<Item = &Arc<ColumnDescriptor>> {
        self.partition_keys.iter().chain(self.clustering_keys.iter())
    }
    pub fn type_key(&self) -> Option<&Arc<ColumnDescriptor>> {
        self.columns.iter().find(|c| c.is_type_key())
    }
    pub fn multi_keys(&self) -> impl Iterator<Item = &Arc<ColumnDescriptor>> {
        self.columns.iter().filter(|c| c.multi_key)
    }
    pub fn indexes(&self) -> impl Iterator<Item = &Arc<ColumnDescriptor>> {
        self.columns.iter().filter(|c| c.index)
    }
    pub fn mandatory_columns(&self) -> impl Iterator<Item = &Arc<ColumnDescriptor>> {
        self.columns.iter().filter(|c| c.is_mandatory())
    }
    pub fn is_counter_table(&self) -> bool {
        self.columns.iter().any(|c| c.is_counter())
    }

    /// Removes a regular column. Key and type-key columns are never removed;
    /// returns whether a column was dropped.
    pub fn remove_column(&mut self, name: &str) -> bool {
        let Some(index) = self.lookup.get(name).copied() else {
            return false;
        };
        let column = &self.columns[index];
        if column.is_primary_key() || column.is_type_key() {
            return false;
        }
        self.columns.remove(index);
        self.reindex();
        true
    }
}

// ------------- Entity -------------
#[derive(Debug, Clone)]
pub struct KeyspaceDescriptor {
    pub(crate) name: String,
    pub(crate) replication: Replication,
    pub(crate) durable_writes: bool,
}

impl KeyspaceDescriptor {
    /// The keyspace-name template.
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn replication(&self) -> &Replication {
        &self.replication
    }
    pub fn durable_writes(&self) -> bool {
        self.durable_writes
    }
}

#[derive(Debug, Clone)]
pub struct SuffixDescriptor {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) exclude: Vec<String>,
    pub(crate) field: Arc<FieldDescriptor>,
}

impl SuffixDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
    pub fn excludes(&self) -> &[String] {
        &self.exclude
    }
    pub fn is_excluded(&self, value: &str) -> bool {
        self.exclude.iter().any(|e| e == value)
    }
    pub fn field(&self) -> &Arc<FieldDescriptor> {
        &self.field
    }
}

#[derive(Debug)]
pub enum DescriptorKind {
    Standard,
    Root {
        type_key: String,
        type_values: BiMap<String, TypeId>,
        variants: Vec<Arc<EntityDescriptor>>,
    },
    Variant {
        root_type: TypeId,
        root_name: &'static str,
        type_value: String,
    },
    Udt {
        name: String,
    },
}

pub struct EntityDescriptor {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) kind: DescriptorKind,
    pub(crate) keyspace: Option<KeyspaceDescriptor>,
    pub(crate) suffixes: Vec<SuffixDescriptor>,
    pub(crate) tables: Vec<Arc<TableDescriptor>>,
    pub(crate) fields: Vec<Arc<FieldDescriptor>>,
    pub(crate) factory: Factory,
}

impl EntityDescriptor {
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn kind(&self) -> &DescriptorKind {
        &self.kind
    }
    pub fn keyspace(&self) -> Option<&KeyspaceDescriptor> {
        self.keyspace.as_ref()
    }
    pub fn suffixes(&self) -> &[SuffixDescriptor] {
        &self.suffixes
    }
    pub fn suffix(&self, name: &str) -> Option<&SuffixDescriptor> {
        self.suffixes.iter().find(|s| s.name == name)
    }
    pub fn tables(&self) -> &[Arc<TableDescriptor>] {
        &self.tables
    }
    pub fn table(&self, name: &str) -> Option<&Arc<TableDescriptor>> {
        self.tables.iter().find(|t| t.name == name)
    }
    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }
    pub fn field(&self, name: &str) -> Option<&Arc<FieldDescriptor>> {
        self.fields.iter().find(|f| f.name == name)
    }
    pub fn is_udt(&self) -> bool {
        matches!(self.kind, DescriptorKind::Udt { .. })
    }
    pub fn udt_name(&self) -> Option<&str> {
        match &self.kind {
            DescriptorKind::Udt { name } => Some(name),
            _ => None,
        }
    }
    /// The fixed type-key value of a variant.
    pub fn type_value(&self) -> Option<&str> {
        match &self.kind {
            DescriptorKind::Variant { type_value, .. } => Some(type_value),
            _ => None,
        }
    }
    pub fn variants(&self) -> &[Arc<EntityDescriptor>] {
        match &self.kind {
            DescriptorKind::Root { variants, .. } => variants,
            _ => &[],
        }
    }
    /// Nested types used by any field, depth first, without duplicates.
    pub fn nested_types(&self) -> Vec<Arc<EntityDescriptor>> {
        let mut found: Vec<Arc<EntityDescriptor>> = Vec::new();
        self.collect_nested(&mut found);
        found
    }
    fn collect_nested(&self, found: &mut Vec<Arc<EntityDescriptor>>) {
        let nested = self
            .fields
            .iter()
            .filter_map(|f| f.nested.clone())
            .chain(self.variants().iter().flat_map(|v| v.fields.iter().filter_map(|f| f.nested.clone())));
        for udt in nested {
            if found.iter().any(|f| f.type_id == udt.type_id) {
                continue;
            }
            udt.collect_nested(found);
            found.push(udt);
        }
    }

    /// Whether an object of `type_id` is an instance of this entity.
    pub fn is_instance(&self, type_id: TypeId) -> bool {
        if type_id == self.type_id {
            return true;
        }
        match &self.kind {
            DescriptorKind::Root { type_values, .. } => type_values.contains_right(&type_id),
            _ => false,
        }
    }
    pub fn check_instance(&self, object: &ObjectRef) -> Result<()> {
        if self.is_instance(object.type_id()) {
            Ok(())
        } else {
            Err(MapperError::TypeMismatch {
                expected: self.type_name.to_owned(),
                found: object.type_name().to_owned(),
            })
        }
    }
    /// Descriptor that can read `object`: this one, or the matching variant of a root.
    pub fn for_object(self: &Arc<Self>, object: &ObjectRef) -> Result<Arc<EntityDescriptor>> {
        self.check_instance(object)?;
        if object.type_id() == self.type_id {
            return Ok(Arc::clone(self));
        }
        self.variants()
            .iter()
            .find(|v| v.type_id == object.type_id())
            .cloned()
            .ok_or_else(|| MapperError::TypeMismatch {
                expected: self.type_name.to_owned(),
                found: object.type_name().to_owned(),
            })
    }

    /// Resets a variant object's type-key field if it disagrees with the
    /// variant's fixed value.
    pub fn heal_type_key(&self, object: &ObjectRef) -> Result<()> {
        let DescriptorKind::Variant { type_value, .. } = &self.kind else {
            return Ok(());
        };
        let Some(column) = self.tables.iter().find_map(|t| t.type_key().cloned()) else {
            return Ok(());
        };
        let expected = Value::Text(type_value.clone());
        let current = object.read(|o| column.field.get(o))??;
        if current.as_ref() != Some(&expected) {
            debug!(
                entity = self.type_name,
                field = %column.field.name,
                found = ?current,
                expected = %type_value,
                "correcting type key of bound object"
            );
            object
                .write(|o| column.field.set(o, expected))?
                .map_err(|_| MapperError::schema(self.type_name, "type-key field cannot hold its type value"))?;
        }
        Ok(())
    }

    /// Current values of `table`'s columns on `object`. Columns declared by
    /// another type of the same family are skipped.
    pub fn read_columns(
        &self,
        table: &TableDescriptor,
        object: &ObjectRef,
    ) -> Result<Vec<(Arc<ColumnDescriptor>, Value)>> {
        self.heal_type_key(object)?;
        object.read(|o| {
            let mut values = Vec::with_capacity(table.columns.len());
            for column in &table.columns {
                if let Some(value) = column.field.get(o)? {
                    values.push((Arc::clone(column), value));
                }
            }
            Ok(values)
        })?
    }

    /// Current suffix values on `object`, by suffix name.
    pub fn suffix_values(&self, object: &ObjectRef) -> Result<BTreeMap<String, Value>> {
        object.read(|o| {
            let mut values = BTreeMap::new();
            for suffix in &self.suffixes {
                if let Some(value) = suffix.field.get(o)? {
                    values.insert(suffix.name.clone(), value);
                }
            }
            Ok(values)
        })?
    }

    pub(crate) fn to_udt_value(&self, object: &dyn Any) -> Result<Value> {
        let mut values = Vec::new();
        for table in &self.tables {
            for column in &table.columns {
                if let Some(value) = column.field.get(object)? {
                    let stored = crate::codec::ColumnValue::for_field(&column.field, value).encoded()?;
                    values.push((column.name.clone(), stored));
                }
            }
        }
        Ok(Value::Udt(values))
    }

    pub(crate) fn from_udt_value(&self, value: Value) -> Result<Box<dyn Any + Send + Sync>> {
        let Value::Udt(values) = value else {
            return Err(MapperError::conversion(self.type_name, format!("expected a udt value, got {}", value.kind())));
        };
        let mut object = (self.factory)();
        for (name, stored) in values {
            let Some(column) = self.tables.iter().find_map(|t| t.column(&name)) else {
                continue;
            };
            let decoded = decode_column(&column.field, stored)?;
            self.assign(object.as_mut(), column, decoded)?;
        }
        Ok(object)
    }

    fn assign(&self, object: &mut dyn Any, column: &ColumnDescriptor, value: Value) -> Result<()> {
        let was_null = value.is_null();
        let kind = value.kind();
        match column.field.set(object, value) {
            Ok(()) => Ok(()),
            Err(AccessError::WrongShape) if was_null && !column.rejects_null() => Ok(()),
            Err(AccessError::WrongShape) => Err(MapperError::conversion(
                self.type_name,
                format!("column '{}' cannot hold a {} value", column.name, kind),
            )),
            Err(AccessError::WrongObject) => Err(MapperError::conversion(
                self.type_name,
                format!("column '{}' belongs to {}", column.name, column.declaring_type()),
            )),
        }
    }

    /// Rebuilds an object from a row of `table`. Roots dispatch to the variant
    /// named by the row's type key; `suffixes` fill the suffix-key fields.
    pub fn decode_row(
        self: &Arc<Self>,
        table: &str,
        row: &Row,
        suffixes: &BTreeMap<String, Value>,
    ) -> Result<Box<dyn Any + Send + Sync>> {
        if let DescriptorKind::Root {
            type_key,
            type_values,
            variants,
        } = &self.kind
        {
            let value = row
                .get(type_key)
                .and_then(Value::as_str)
                .ok_or_else(|| MapperError::conversion(self.type_name, format!("missing type key column '{}'", type_key)))?;
            let variant = type_values
                .get_by_left(value)
                .and_then(|id| variants.iter().find(|v| v.type_id == *id))
                .ok_or_else(|| MapperError::conversion(self.type_name, format!("unknown type '{}'", value)))?;
            return variant.decode_row(table, row, suffixes);
        }
        let table = self
            .table(table)
            .ok_or_else(|| MapperError::conversion(self.type_name, format!("unknown table '{}'", table)))?;
        let mut object = (self.factory)();
        for column in &table.columns {
            let stored = match row.get(&column.name) {
                Some(stored) => stored.clone(),
                None if column.rejects_null() => {
                    return Err(MapperError::conversion(
                        self.type_name,
                        format!("missing column '{}' in row", column.name),
                    ));
                }
                None => continue,
            };
            if stored.is_null() && column.rejects_null() {
                return Err(MapperError::conversion(
                    self.type_name,
                    format!("null value for column '{}'", column.name),
                ));
            }
            if column.is_type_key() {
                if let Some(expected) = self.type_value() {
                    if stored.as_str() != Some(expected) {
                        return Err(MapperError::conversion(
                            self.type_name,
                            format!("row is of type {:?}, not '{}'", stored.as_str(), expected),
                        ));
                    }
                }
            }
            let decoded = decode_column(&column.field, stored)?;
            let decoded = if column.multi_key && !decoded.is_null() {
                Value::Set(vec![decoded])
            } else {
                decoded
            };
            self.assign(object.as_mut(), column, decoded)?;
        }
        for suffix in &self.suffixes {
            if let Some(value) = suffixes.get(&suffix.name) {
                if suffix.field.set(object.as_mut(), value.clone()).is_err() {
                    return Err(MapperError::conversion(
                        self.type_name,
                        format!("suffix '{}' cannot hold a {} value", suffix.name, value.kind()),
                    ));
                }
            }
        }
        Ok(object)
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("type_name", &self.type_name)
            .field("keyspace", &self.keyspace)
            .field("suffixes", &self.suffixes.iter().map(|s| &s.name).collect::<Vec<_>>())
            .field("tables", &self.tables.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}
