//! Compiles [`EntitySchema`]s into [`EntityDescriptor`]s and keeps them.
//!
//! Every descriptor is built at most once per keeper and shared afterwards.
//! Construction runs outside the lock; if two threads race on the same type,
//! the first descriptor kept wins and the other is dropped. A type whose
//! construction needs its own descriptor, directly or through nested types,
//! is refused instead of being built forever.

use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};

use bimap::BiMap;
use tracing::{debug, trace, warn};

use crate::datatype::{CqlType, DataTypeDefinition};
use crate::error::{MapperError, Result};
use crate::metadata::{
    ColumnDescriptor, ColumnRole, DescriptorKind, EntityDescriptor, FieldDescriptor, KeyspaceDescriptor,
    OtherHasher, SuffixDescriptor, TableDescriptor, TableFilter,
};
use crate::schema::{applies, Accessor, Entity, EntityKind, EntitySchema, FieldSchema, KeyRole, SchemaFn};

pub struct DescriptorKeeper {
    kept: Mutex<HashMap<TypeId, Arc<EntityDescriptor>, OtherHasher>>,
    // types under construction, per building thread
    building: Mutex<HashSet<(TypeId, ThreadId)>>,
    filters: Vec<Arc<dyn TableFilter>>,
}

// Marks a type as under construction on this thread until dropped.
struct Building<'a> {
    keeper: &'a DescriptorKeeper,
    key: (TypeId, ThreadId),
}

impl Drop for Building<'_> {
    fn drop(&mut self) {
        if let Ok(mut building) = self.keeper.building.lock() {
            building.remove(&self.key);
        }
    }
}

impl Default for DescriptorKeeper {
    fn default() -> Self {
        Self::new()
    }
}

impl DescriptorKeeper {
    pub fn new() -> Self {
        Self {
            kept: Mutex::new(HashMap::default()),
            building: Mutex::new(HashSet::new()),
            filters: Vec::new(),
        }
    }
    /// Adds a hook run on every table as it is built.
    pub fn with_filter(mut self, filter: Arc<dyn TableFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn resolve<E: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.resolve_schema(TypeId::of::<E>(), E::schema)
    }

    pub fn resolve_schema(&self, type_id: TypeId, schema: SchemaFn) -> Result<Arc<EntityDescriptor>> {
        if let Some(kept) = self.kept.lock()?.get(&type_id) {
            return Ok(Arc::clone(kept));
        }
        let schema = schema();
        let _building = self.start_building(type_id, schema.type_name())?;
        let descriptor = self.build(schema)?;
        let (kept, previously_kept) = self.keep(descriptor)?;
        if previously_kept {
            trace!(entity = kept.type_name(), "descriptor built concurrently, keeping the first");
        } else {
            debug!(
                entity = kept.type_name(),
                tables = kept.tables().len(),
                suffixes = kept.suffixes().len(),
                "descriptor kept"
            );
        }
        Ok(kept)
    }

    fn start_building(&self, type_id: TypeId, type_name: &'static str) -> Result<Building<'_>> {
        let key = (type_id, thread::current().id());
        if !self.building.lock()?.insert(key) {
            warn!(entity = type_name, "type refers to itself");
            return Err(MapperError::schema(type_name, "type refers to itself through its nested types"));
        }
        Ok(Building { keeper: self, key })
    }

    fn keep(&self, descriptor: EntityDescriptor) -> Result<(Arc<EntityDescriptor>, bool)> {
        let mut kept = self.kept.lock()?;
        match kept.entry(descriptor.type_id) {
            Entry::Vacant(e) => Ok((Arc::clone(e.insert(Arc::new(descriptor))), false)),
            Entry::Occupied(e) => Ok((Arc::clone(e.get()), true)),
        }
    }

    pub fn len(&self) -> usize {
        self.kept.lock().map(|k| k.len()).unwrap_or_default()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------- Construction -------------
    fn build(&self, schema: EntitySchema) -> Result<EntityDescriptor> {
        let EntitySchema {
            type_id,
            type_name,
            kind,
            keyspace,
            tables,
            fields,
            factory,
        } = schema;
        let field_descriptors = self.fields(type_name, &fields)?;
        let (kind, keyspace, table_schemas) = match kind {
            EntityKind::Udt { name } => {
                let table = self.table(type_name, &name, true, &fields, &field_descriptors)?;
                if fields.iter().any(|f| f.suffix.is_some()) {
                    return Err(MapperError::schema(type_name, "nested types cannot declare suffix keys"));
                }
                return Ok(EntityDescriptor {
                    type_id,
                    type_name,
                    kind: DescriptorKind::Udt { name },
                    keyspace: None,
                    suffixes: Vec::new(),
                    tables: vec![Arc::new(table)],
                    fields: field_descriptors,
                    factory,
                });
            }
            EntityKind::Standard => (DescriptorKind::Standard, keyspace, tables),
            EntityKind::Variant { root, type_value } => {
                let root_schema = root();
                if !matches!(root_schema.kind, EntityKind::Root { .. }) {
                    return Err(MapperError::schema(
                        type_name,
                        format!("{} is not declared as a polymorphic root", root_schema.type_name),
                    ));
                }
                let kind = DescriptorKind::Variant {
                    root_type: root_schema.type_id,
                    root_name: root_schema.type_name,
                    type_value,
                };
                // variants live in the root's keyspace and tables
                (kind, root_schema.keyspace, root_schema.tables)
            }
            EntityKind::Root { variants } => {
                let (type_values, variant_descriptors) = self.variants(type_name, type_id, &variants)?;
                let kind = DescriptorKind::Root {
                    type_key: String::new(),
                    type_values,
                    variants: variant_descriptors,
                };
                (kind, keyspace, tables)
            }
        };

        let keyspace = keyspace.ok_or_else(|| MapperError::schema(type_name, "missing keyspace declaration"))?;
        if table_schemas.is_empty() {
            return Err(MapperError::schema(type_name, "declares no tables"));
        }
        let mut names = HashSet::new();
        for table in &table_schemas {
            if !names.insert(table.name.as_str()) {
                return Err(MapperError::schema(type_name, format!("duplicate table '{}'", table.name)));
            }
        }
        let suffixes = suffixes(type_name, &keyspace.suffix_types, &fields, &field_descriptors)?;

        let mut built = Vec::with_capacity(table_schemas.len());
        for table in &table_schemas {
            built.push(self.table(type_name, &table.name, false, &fields, &field_descriptors)?);
        }
        let kind = match kind {
            DescriptorKind::Root {
                type_values, variants, ..
            } => {
                let type_key = merge_variants(type_name, &mut built, &variants)?;
                DescriptorKind::Root {
                    type_key,
                    type_values,
                    variants,
                }
            }
            DescriptorKind::Variant { .. } => {
                for table in &built {
                    if table.type_key().is_none() {
                        return Err(MapperError::schema(
                            type_name,
                            format!("variant declares no type-key column in table '{}'", table.name),
                        ));
                    }
                }
                kind
            }
            other => other,
        };

        let mut tables = Vec::with_capacity(built.len());
        for mut table in built {
            self.apply_filters(&mut table);
            tables.push(Arc::new(table));
        }
        Ok(EntityDescriptor {
            type_id,
            type_name,
            kind,
            keyspace: Some(KeyspaceDescriptor {
                name: keyspace.name,
                replication: keyspace.replication,
                durable_writes: keyspace.durable_writes,
            }),
            suffixes,
            tables,
            fields: field_descriptors,
            factory,
        })
    }

    fn variants(
        &self,
        type_name: &'static str,
        root_type: TypeId,
        variants: &[SchemaFn],
    ) -> Result<(BiMap<String, TypeId>, Vec<Arc<EntityDescriptor>>)> {
        if variants.is_empty() {
            return Err(MapperError::schema(type_name, "polymorphic root declares no variants"));
        }
        let mut type_values = BiMap::new();
        let mut descriptors = Vec::with_capacity(variants.len());
        for schema in variants {
            let variant_type = schema().type_id;
            let variant = self.resolve_schema(variant_type, *schema)?;
            match variant.kind() {
                DescriptorKind::Variant {
                    root_type: declared,
                    type_value,
                    ..
                } if *declared == root_type => {
                    if type_values.insert_no_overwrite(type_value.clone(), variant.type_id()).is_err() {
                        return Err(MapperError::schema(
                            type_name,
                            format!("type value '{}' is used by more than one variant", type_value),
                        ));
                    }
                }
                _ => {
                    return Err(MapperError::schema(
                        type_name,
                        format!("{} is not a variant of this root", variant.type_name()),
                    ));
                }
            }
            descriptors.push(variant);
        }
        Ok((type_values, descriptors))
    }

    fn fields(&self, type_name: &'static str, fields: &[FieldSchema]) -> Result<Vec<Arc<FieldDescriptor>>> {
        let mut names = HashSet::new();
        let mut descriptors = Vec::with_capacity(fields.len());
        for field in fields {
            if !names.insert(field.name.as_str()) {
                return Err(MapperError::schema(type_name, format!("duplicate field '{}'", field.name)));
            }
            if field.suffix.is_some() && (!field.keys.is_empty() || !field.indexes.is_empty()) {
                return Err(MapperError::schema(
                    type_name,
                    format!("suffix field '{}' cannot also be a key or an index", field.name),
                ));
            }
            if field.multi_key && !matches!(field.data_type, DataTypeDefinition::Set(_)) {
                return Err(MapperError::schema(
                    type_name,
                    format!("multi-key field '{}' must be a set, not {}", field.name, field.data_type),
                ));
            }
            let nested = match (&field.accessor, &field.data_type) {
                (Accessor::Nested(_), DataTypeDefinition::Udt(udt)) => {
                    Some(self.resolve_schema(udt.type_id, udt.schema)?)
                }
                (Accessor::Nested(_), other) => {
                    return Err(MapperError::schema(
                        type_name,
                        format!("nested field '{}' is declared as {}", field.name, other),
                    ));
                }
                _ => None,
            };
            descriptors.push(Arc::new(FieldDescriptor {
                name: field.name.clone(),
                declaring_type: type_name,
                data_type: field.data_type.clone(),
                mandatory: field.mandatory,
                persister: field.persister.as_ref().map(|(p, _)| Arc::clone(p)),
                accessor: field.accessor.clone(),
                nested,
            }));
        }
        Ok(descriptors)
    }

    fn table(
        &self,
        type_name: &'static str,
        table_name: &str,
        keyless: bool,
        fields: &[FieldSchema],
        descriptors: &[Arc<FieldDescriptor>],
    ) -> Result<TableDescriptor> {
        let fail = |message: String| MapperError::schema(type_name, format!("table '{}': {}", table_name, message));
        let mut columns: Vec<Arc<ColumnDescriptor>> = Vec::new();
        for (schema, field) in fields.iter().zip(descriptors) {
            let mapped: Vec<_> = schema.columns.iter().filter(|c| applies(&c.table, table_name)).collect();
            let keys: Vec<_> = schema.keys.iter().filter(|k| applies(&k.table, table_name)).collect();
            let index = schema.indexes.iter().any(|t| applies(t, table_name));
            if mapped.len() > 1 {
                return Err(fail(format!("field '{}' maps to more than one column", schema.name)));
            }
            if keys.len() > 1 {
                return Err(fail(format!("field '{}' has more than one key role", schema.name)));
            }
            let Some(column) = mapped.first() else {
                if !keys.is_empty() || index {
                    return Err(fail(format!("field '{}' has a key or index role but no column", schema.name)));
                }
                continue;
            };
            if columns.iter().any(|c| c.name == column.name) {
                return Err(fail(format!("duplicate column '{}'", column.name)));
            }
            let role = match keys.first().map(|k| k.role) {
                None => ColumnRole::Regular,
                Some(KeyRole::PartitionKey(order)) => ColumnRole::PartitionKey(order),
                Some(KeyRole::ClusteringKey(order, sort)) => ColumnRole::ClusteringKey(order, sort),
                Some(KeyRole::TypeKey) => ColumnRole::TypeKey,
            };
            let is_key = matches!(role, ColumnRole::PartitionKey(_) | ColumnRole::ClusteringKey(_, _));
            if schema.multi_key && !is_key {
                return Err(fail(format!("multi-key column '{}' is not a key", column.name)));
            }
            if is_key && field.data_type.is_counter() {
                return Err(fail(format!("counter column '{}' cannot be a key", column.name)));
            }
            if role == ColumnRole::TypeKey && !field.data_type.is_text() {
                return Err(fail(format!("type-key column '{}' must be textual", column.name)));
            }
            let data_type = match (&schema.persister, schema.multi_key) {
                (Some((_, persisted)), _) => persisted.clone(),
                (None, true) => field.data_type.element().cloned().unwrap_or(DataTypeDefinition::scalar(CqlType::Blob)),
                (None, false) => field.data_type.clone(),
            };
            if index && data_type.is_counter() {
                return Err(fail(format!("counter column '{}' cannot be indexed", column.name)));
            }
            columns.push(Arc::new(ColumnDescriptor {
                name: column.name.clone(),
                field: Arc::clone(field),
                data_type,
                role,
                index,
                multi_key: schema.multi_key,
            }));
        }

        let table = TableDescriptor::new(table_name, type_name, keyless, columns);
        if keyless {
            if table.columns().iter().any(|c| c.role() != ColumnRole::Regular || c.is_index()) {
                return Err(fail("nested types cannot declare keys or indexes".to_owned()));
            }
            return Ok(table);
        }
        if table.partition_keys().is_empty() {
            return Err(fail("no partition key".to_owned()));
        }
        check_orders(table.partition_keys().iter().map(|c| (c.role(), c.name())), &fail)?;
        check_orders(table.clustering_keys().iter().map(|c| (c.role(), c.name())), &fail)?;
        if table.columns().iter().filter(|c| c.is_type_key()).count() > 1 {
            return Err(fail("more than one type-key column".to_owned()));
        }
        check_counters(&table).map_err(fail)?;
        Ok(table)
    }

    fn apply_filters(&self, table: &mut TableDescriptor) {
        for filter in &self.filters {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| filter.filter(table)));
            match outcome {
                Ok(Ok(())) => (),
                Ok(Err(e)) => warn!(table = %table.name(), error = %e, "table filter failed, ignoring"),
                Err(_) => warn!(table = %table.name(), "table filter panicked, ignoring"),
            }
        }
    }
}

fn check_orders<'a>(
    keys: impl Iterator<Item = (ColumnRole, &'a str)>,
    fail: &impl Fn(String) -> MapperError,
) -> Result<()> {
    let mut previous: Option<u32> = None;
    for (role, name) in keys {
        let order = match role {
            ColumnRole::PartitionKey(o) | ColumnRole::ClusteringKey(o, _) => o,
            _ => continue,
        };
        if previous == Some(order) {
            return Err(fail(format!("key column '{}' repeats key order {}", name, order)));
        }
        previous = Some(order);
    }
    Ok(())
}

fn check_counters(table: &TableDescriptor) -> std::result::Result<(), String> {
    let regular = || table.columns().iter().filter(|c| !c.is_primary_key());
    let counters = regular().filter(|c| c.is_counter()).count();
    if counters > 0 && counters < regular().count() {
        return Err("counter columns cannot be mixed with non-counter columns".to_owned());
    }
    Ok(())
}

fn suffixes(
    type_name: &'static str,
    suffix_types: &[String],
    fields: &[FieldSchema],
    descriptors: &[Arc<FieldDescriptor>],
) -> Result<Vec<SuffixDescriptor>> {
    let mut found: Vec<SuffixDescriptor> = Vec::new();
    for (schema, field) in fields.iter().zip(descriptors) {
        let Some(suffix) = &schema.suffix else {
            continue;
        };
        if !suffix_types.contains(&suffix.type_tag) {
            return Err(MapperError::schema(
                type_name,
                format!("suffix '{}' has type '{}' which the keyspace does not declare", suffix.name, suffix.type_tag),
            ));
        }
        if found.iter().any(|s| s.name == suffix.name || s.type_tag == suffix.type_tag) {
            return Err(MapperError::schema(
                type_name,
                format!("suffix '{}' of type '{}' is declared twice", suffix.name, suffix.type_tag),
            ));
        }
        found.push(SuffixDescriptor {
            name: suffix.name.clone(),
            type_tag: suffix.type_tag.clone(),
            exclude: suffix.exclude.clone(),
            field: Arc::clone(field),
        });
    }
    let mut ordered = Vec::with_capacity(suffix_types.len());
    for type_tag in suffix_types {
        let position = found.iter().position(|s| &s.type_tag == type_tag).ok_or_else(|| {
            MapperError::schema(type_name, format!("no field provides keyspace suffix '{}'", type_tag))
        })?;
        ordered.push(found.swap_remove(position));
    }
    Ok(ordered)
}

/// Folds variant-only columns into the root's tables and returns the type-key column name.
fn merge_variants(
    type_name: &'static str,
    tables: &mut [TableDescriptor],
    variants: &[Arc<EntityDescriptor>],
) -> Result<String> {
    let mut type_key: Option<String> = None;
    for table in tables.iter_mut() {
        let key = table
            .type_key()
            .map(|c| c.name().to_owned())
            .ok_or_else(|| MapperError::schema(type_name, format!("root declares no type-key column in table '{}'", table.name())))?;
        match &type_key {
            Some(existing) if *existing != key => {
                return Err(MapperError::schema(type_name, "type-key column differs between tables"));
            }
            _ => type_key = Some(key.clone()),
        }
        for variant in variants {
            let Some(variant_table) = variant.table(table.name()) else {
                continue;
            };
            for column in variant_table.columns() {
                match table.column(column.name()) {
                    Some(existing) if existing.data_type() != column.data_type() => {
                        return Err(MapperError::SchemaConflict {
                            column: column.name().to_owned(),
                            first: existing.declaring_type().to_owned(),
                            second: column.declaring_type().to_owned(),
                        });
                    }
                    Some(existing) if existing.role() != column.role() => {
                        return Err(MapperError::SchemaConflict {
                            column: column.name().to_owned(),
                            first: existing.declaring_type().to_owned(),
                            second: column.declaring_type().to_owned(),
                        });
                    }
                    Some(_) => (),
                    None if column.role() != ColumnRole::Regular => {
                        return Err(MapperError::schema(
                            variant.type_name(),
                            format!("key column '{}' is not declared by the root", column.name()),
                        ));
                    }
                    None => table.push_column(Arc::clone(column)),
                }
            }
        }
    }
    type_key.ok_or_else(|| MapperError::schema(type_name, "declares no tables"))
}

