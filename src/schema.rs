//! Declarative schema input.
//!
//! An [`Entity`] describes itself once through [`EntitySchema`]: its keyspace
//! template and suffix keys, its tables, and one [`FieldSchema`] per mapped
//! field. Fields are bound through a pair of `fn` accessors (a lens), so no
//! runtime introspection is needed. The metadata model compiles this input
//! into descriptors (see [`crate::metadata`]).
//!
//! ```
//! use cqlmap::datatype::{CqlType, DataTypeDefinition};
//! use cqlmap::schema::{Entity, EntitySchema, FieldSchema, KeyspaceSchema, TableSchema};
//!
//! #[derive(Default)]
//! struct Person { id: String, name: String, tenant: String }
//!
//! impl Entity for Person {
//!     fn schema() -> EntitySchema {
//!         EntitySchema::standard::<Person>()
//!             .keyspace(KeyspaceSchema::new("app").suffix("tenant"))
//!             .table(TableSchema::new("people"))
//!             .field(FieldSchema::new::<Person, String>("id", DataTypeDefinition::scalar(CqlType::Text), |p| &p.id, |p| &mut p.id)
//!                 .column("id").partition_key(0))
//!             .field(FieldSchema::new::<Person, String>("name", DataTypeDefinition::scalar(CqlType::Text), |p| &p.name, |p| &mut p.name)
//!                 .column("name"))
//!             .field(FieldSchema::new::<Person, String>("tenant", DataTypeDefinition::scalar(CqlType::Text), |p| &p.tenant, |p| &mut p.tenant)
//!                 .suffix("tenant", "tenant", &[]))
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::datatype::{DataTypeDefinition, FieldValue, Value};
use crate::error::{MapperError, Result};
use crate::persisted::ColumnPersister;

pub type SchemaFn = fn() -> EntitySchema;
pub type Factory = Arc<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// A mapped application type.
pub trait Entity: Any + Send + Sync + Default {
    fn schema() -> EntitySchema;
}

pub(crate) fn short_type_name<E: ?Sized>() -> &'static str {
    let full = std::any::type_name::<E>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

// ------------- Entity -------------
#[derive(Clone)]
pub(crate) enum EntityKind {
    Standard,
    Root { variants: Vec<SchemaFn> },
    Variant { root: SchemaFn, type_value: String },
    Udt { name: String },
}

pub struct EntitySchema {
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) kind: EntityKind,
    pub(crate) keyspace: Option<KeyspaceSchema>,
    pub(crate) tables: Vec<TableSchema>,
    pub(crate) fields: Vec<FieldSchema>,
    pub(crate) factory: Factory,
}

impl EntitySchema {
    fn of<E: Entity>(kind: EntityKind) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            type_name: short_type_name::<E>(),
            kind,
            keyspace: None,
            tables: Vec::new(),
            fields: Vec::new(),
            factory: Arc::new(|| Box::new(E::default())),
        }
    }
    pub fn standard<E: Entity>() -> Self {
        Self::of::<E>(EntityKind::Standard)
    }
    /// Root of a polymorphic family; variants share its tables.
    pub fn root<E: Entity>() -> Self {
        Self::of::<E>(EntityKind::Root {
            variants: Vec::new(),
        })
    }
    /// Variant of `R` whose type-key column is fixed to `type_value`.
    pub fn variant<E: Entity, R: Entity>(type_value: &str) -> Self {
        Self::of::<E>(EntityKind::Variant {
            root: R::schema,
            type_value: type_value.to_owned(),
        })
    }
    /// Nested value type, stored inside a column of another entity.
    pub fn udt<E: Entity>(name: &str) -> Self {
        Self::of::<E>(EntityKind::Udt {
            name: name.to_owned(),
        })
    }

    pub fn keyspace(mut self, keyspace: KeyspaceSchema) -> Self {
        self.keyspace = Some(keyspace);
        self
    }
    pub fn table(mut self, table: TableSchema) -> Self {
        self.tables.push(table);
        self
    }
    pub fn field(mut self, field: FieldSchema) -> Self {
        self.fields.push(field);
        self
    }
    /// Registers a variant of this root.
    pub fn with_variant<V: Entity>(mut self) -> Self {
        if let EntityKind::Root { variants } = &mut self.kind {
            variants.push(V::schema);
        }
        self
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
    pub fn udt_name(&self) -> Option<&str> {
        match &self.kind {
            EntityKind::Udt { name } => Some(name),
            _ => None,
        }
    }
}

// ------------- Keyspace -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Replication {
    Simple { factor: u32 },
    NetworkTopology(Vec<(String, u32)>),
}

#[derive(Debug, Clone)]
pub struct KeyspaceSchema {
    pub(crate) name: String,
    pub(crate) suffix_types: Vec<String>,
    pub(crate) replication: Replication,
    pub(crate) durable_writes: bool,
}

impl KeyspaceSchema {
    /// `name` is the template every resolved keyspace name starts with; it may be empty.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            suffix_types: Vec::new(),
            replication: Replication::Simple { factor: 1 },
            durable_writes: true,
        }
    }
    /// Declares the next suffix, by type tag, in keyspace-name order.
    pub fn suffix(mut self, type_tag: &str) -> Self {
        self.suffix_types.push(type_tag.to_owned());
        self
    }
    pub fn replication(mut self, replication: Replication) -> Self {
        self.replication = replication;
        self
    }
    pub fn durable_writes(mut self, durable_writes: bool) -> Self {
        self.durable_writes = durable_writes;
        self
    }
}

// ------------- Table -------------
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub(crate) name: String,
}

impl TableSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
        }
    }
}

// ------------- Field -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    PartitionKey(u32),
    ClusteringKey(u32, SortOrder),
    TypeKey,
}

// `table: None` applies to every table of the entity.
#[derive(Debug, Clone)]
pub(crate) struct ColumnSchema {
    pub(crate) table: Option<String>,
    pub(crate) name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct KeySchema {
    pub(crate) table: Option<String>,
    pub(crate) role: KeyRole,
}

#[derive(Debug, Clone)]
pub(crate) struct SuffixSchema {
    pub(crate) name: String,
    pub(crate) type_tag: String,
    pub(crate) exclude: Vec<String>,
}

pub(crate) fn applies(table: &Option<String>, name: &str) -> bool {
    table.as_deref().is_none_or(|t| t == name)
}

pub struct FieldSchema {
    pub(crate) name: String,
    pub(crate) data_type: DataTypeDefinition,
    pub(crate) accessor: Accessor,
    pub(crate) columns: Vec<ColumnSchema>,
    pub(crate) keys: Vec<KeySchema>,
    pub(crate) indexes: Vec<Option<String>>,
    pub(crate) multi_key: bool,
    pub(crate) mandatory: bool,
    pub(crate) suffix: Option<SuffixSchema>,
    pub(crate) persister: Option<(ColumnPersister, DataTypeDefinition)>,
}

impl FieldSchema {
    fn with_accessor(name: &str, data_type: DataTypeDefinition, accessor: Accessor) -> Self {
        Self {
            name: name.to_owned(),
            data_type,
            accessor,
            columns: Vec::new(),
            keys: Vec::new(),
            indexes: Vec::new(),
            multi_key: false,
            mandatory: false,
            suffix: None,
            persister: None,
        }
    }
    /// Field of entity `E` holding an `F`, bound through a getter/setter lens.
    pub fn new<E: Any, F: FieldValue>(
        name: &str,
        data_type: DataTypeDefinition,
        get: fn(&E) -> &F,
        get_mut: fn(&mut E) -> &mut F,
    ) -> Self {
        let lens = Lens { get, get_mut };
        Self::with_accessor(name, data_type, Accessor::Value(Arc::new(lens)))
    }
    /// Field of entity `E` holding a nested value type `U`.
    pub fn udt<E: Any, U: Entity>(name: &str, get: fn(&E) -> &U, get_mut: fn(&mut E) -> &mut U) -> Self {
        let lens = NestedLens { get, get_mut };
        Self::with_accessor(name, DataTypeDefinition::udt::<U>(), Accessor::Nested(Arc::new(lens)))
    }

    pub fn column(mut self, name: &str) -> Self {
        self.columns.push(ColumnSchema {
            table: None,
            name: name.to_owned(),
        });
        self
    }
    pub fn column_in(mut self, table: &str, name: &str) -> Self {
        self.columns.push(ColumnSchema {
            table: Some(table.to_owned()),
            name: name.to_owned(),
        });
        self
    }
    fn key(mut self, table: Option<&str>, role: KeyRole) -> Self {
        self.keys.push(KeySchema {
            table: table.map(str::to_owned),
            role,
        });
        self
    }
    pub fn partition_key(self, order: u32) -> Self {
        self.key(None, KeyRole::PartitionKey(order))
    }
    pub fn partition_key_in(self, table: &str, order: u32) -> Self {
        self.key(Some(table), KeyRole::PartitionKey(order))
    }
    pub fn clustering_key(self, order: u32, sort: SortOrder) -> Self {
        self.key(None, KeyRole::ClusteringKey(order, sort))
    }
    pub fn clustering_key_in(self, table: &str, order: u32, sort: SortOrder) -> Self {
        self.key(Some(table), KeyRole::ClusteringKey(order, sort))
    }
    pub fn type_key(self) -> Self {
        self.key(None, KeyRole::TypeKey)
    }
    pub fn index(mut self) -> Self {
        self.indexes.push(None);
        self
    }
    pub fn index_in(mut self, table: &str) -> Self {
        self.indexes.push(Some(table.to_owned()));
        self
    }
    /// Set-valued key column stored as one row per element.
    pub fn multi_key(mut self) -> Self {
        self.multi_key = true;
        self
    }
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }
    /// Marks this field as the suffix key `name` of type `type_tag`. Values in
    /// `exclude` never resolve to a keyspace.
    pub fn suffix(mut self, name: &str, type_tag: &str, exclude: &[&str]) -> Self {
        self.suffix = Some(SuffixSchema {
            name: name.to_owned(),
            type_tag: type_tag.to_owned(),
            exclude: exclude.iter().map(|e| (*e).to_owned()).collect(),
        });
        self
    }
    /// Stores the field through `persister`; the column holds `persisted_type`.
    pub fn persisted(mut self, persister: ColumnPersister, persisted_type: DataTypeDefinition) -> Self {
        self.persister = Some((persister, persisted_type));
        self
    }
}

// ------------- Accessors -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessError {
    WrongObject,
    WrongShape,
}

pub(crate) trait ValueAccess: Send + Sync {
    fn get(&self, object: &dyn Any) -> Option<Value>;
    fn set(&self, object: &mut dyn Any, value: Value) -> std::result::Result<(), AccessError>;
}

pub(crate) trait ObjectAccess: Send + Sync {
    fn get<'a>(&self, object: &'a dyn Any) -> Option<&'a dyn Any>;
    fn set(&self, object: &mut dyn Any, value: Box<dyn Any>) -> std::result::Result<(), AccessError>;
}

#[derive(Clone)]
pub(crate) enum Accessor {
    Value(Arc<dyn ValueAccess>),
    Nested(Arc<dyn ObjectAccess>),
}

struct Lens<E, F> {
    get: fn(&E) -> &F,
    get_mut: fn(&mut E) -> &mut F,
}

impl<E: Any, F: FieldValue> ValueAccess for Lens<E, F> {
    fn get(&self, object: &dyn Any) -> Option<Value> {
        object.downcast_ref::<E>().map(|e| (self.get)(e).to_value())
    }
    fn set(&self, object: &mut dyn Any, value: Value) -> std::result::Result<(), AccessError> {
        let e = object.downcast_mut::<E>().ok_or(AccessError::WrongObject)?;
        *(self.get_mut)(e) = F::from_value(value).ok_or(AccessError::WrongShape)?;
        Ok(())
    }
}

struct NestedLens<E, U> {
    get: fn(&E) -> &U,
    get_mut: fn(&mut E) -> &mut U,
}

impl<E: Any, U: Any> ObjectAccess for NestedLens<E, U> {
    fn get<'a>(&self, object: &'a dyn Any) -> Option<&'a dyn Any> {
        object.downcast_ref::<E>().map(|e| (self.get)(e) as &dyn Any)
    }
    fn set(&self, object: &mut dyn Any, value: Box<dyn Any>) -> std::result::Result<(), AccessError> {
        let e = object.downcast_mut::<E>().ok_or(AccessError::WrongObject)?;
        let u = value.downcast::<U>().map_err(|_| AccessError::WrongShape)?;
        *(self.get_mut)(e) = *u;
        Ok(())
    }
}

// ------------- Live objects -------------
/// Type-erased handle to a live, shared entity instance.
#[derive(Clone)]
pub struct ObjectRef {
    inner: Arc<RwLock<dyn Any + Send + Sync>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl ObjectRef {
    pub fn new<E: Entity>(object: &Arc<RwLock<E>>) -> Self {
        let inner: Arc<RwLock<dyn Any + Send + Sync>> = object.clone();
        Self {
            inner,
            type_id: TypeId::of::<E>(),
            type_name: short_type_name::<E>(),
        }
    }
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
    pub fn same_object(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
    pub(crate) fn read<R>(&self, f: impl FnOnce(&dyn Any) -> R) -> Result<R> {
        let guard = self
            .inner
            .read()
            .map_err(|e| MapperError::Lock(format!("{} object: {}", self.type_name, e)))?;
        Ok(f(&*guard))
    }
    pub(crate) fn write<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> Result<R> {
        let mut guard = self
            .inner
            .write()
            .map_err(|e| MapperError::Lock(format!("{} object: {}", self.type_name, e)))?;
        Ok(f(&mut *guard))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectRef({})", self.type_name)
    }
}

impl<E: Entity> From<&Arc<RwLock<E>>> for ObjectRef {
    fn from(object: &Arc<RwLock<E>>) -> Self {
        ObjectRef::new(object)
    }
}
