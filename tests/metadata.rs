mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use common::*;
use cqlmap::datatype::{CqlType, DataTypeDefinition, Value};
use cqlmap::keeper::DescriptorKeeper;
use cqlmap::metadata::{ColumnRole, DescriptorKind, TableDescriptor, TableFilter};
use cqlmap::result::Row;
use cqlmap::schema::{Entity, EntitySchema, FieldSchema, KeyspaceSchema, ObjectRef, TableSchema};
use cqlmap::MapperError;

fn schema_message<E: Entity>() -> String {
    match DescriptorKeeper::new().resolve::<E>() {
        Err(MapperError::SchemaDefinition { message, .. }) => message,
        Err(other) => panic!("expected a schema error, got {other:?}"),
        Ok(_) => panic!("{} should not resolve", std::any::type_name::<E>()),
    }
}

// ------------- Broken schemas -------------
#[derive(Default)]
struct NoPartition {
    id: String,
}
impl Entity for NoPartition {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<NoPartition>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(FieldSchema::new::<NoPartition, String>("id", text(), |e| &e.id, |e| &mut e.id).column("id"))
    }
}

#[derive(Default)]
struct SharedColumn {
    a: String,
    b: String,
}
impl Entity for SharedColumn {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<SharedColumn>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<SharedColumn, String>("a", text(), |e| &e.a, |e| &mut e.a)
                    .column("x")
                    .partition_key(0),
            )
            .field(FieldSchema::new::<SharedColumn, String>("b", text(), |e| &e.b, |e| &mut e.b).column("x"))
    }
}

#[derive(Default)]
struct KeyWithoutColumn {
    id: String,
}
impl Entity for KeyWithoutColumn {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<KeyWithoutColumn>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(FieldSchema::new::<KeyWithoutColumn, String>("id", text(), |e| &e.id, |e| &mut e.id).partition_key(0))
    }
}

#[derive(Default)]
struct NoKeyspace {
    id: String,
}
impl Entity for NoKeyspace {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<NoKeyspace>()
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<NoKeyspace, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
    }
}

#[derive(Default)]
struct UndeclaredSuffix {
    id: String,
    zone: String,
}
impl Entity for UndeclaredSuffix {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<UndeclaredSuffix>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<UndeclaredSuffix, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<UndeclaredSuffix, String>("zone", text(), |e| &e.zone, |e| &mut e.zone)
                    .suffix("zone", "zone", &[]),
            )
    }
}

#[derive(Default)]
struct MixedCounters {
    id: String,
    hits: i64,
    label: String,
}
impl Entity for MixedCounters {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<MixedCounters>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<MixedCounters, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<MixedCounters, i64>(
                    "hits",
                    DataTypeDefinition::scalar(CqlType::Counter),
                    |e| &e.hits,
                    |e| &mut e.hits,
                )
                .column("hits"),
            )
            .field(FieldSchema::new::<MixedCounters, String>("label", text(), |e| &e.label, |e| &mut e.label).column("label"))
    }
}

// A root whose variants disagree on the type of a shared column.
#[derive(Default)]
struct Animal {
    id: String,
    kind: String,
}
impl Entity for Animal {
    fn schema() -> EntitySchema {
        EntitySchema::root::<Animal>()
            .keyspace(KeyspaceSchema::new("zoo"))
            .table(TableSchema::new("animals"))
            .field(
                FieldSchema::new::<Animal, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Animal, String>("kind", text(), |e| &e.kind, |e| &mut e.kind)
                    .column("kind")
                    .type_key(),
            )
            .with_variant::<Dog>()
            .with_variant::<Cat>()
    }
}

#[derive(Default)]
struct Dog {
    id: String,
    kind: String,
    weight: i32,
}
impl Entity for Dog {
    fn schema() -> EntitySchema {
        EntitySchema::variant::<Dog, Animal>("dog")
            .field(
                FieldSchema::new::<Dog, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Dog, String>("kind", text(), |e| &e.kind, |e| &mut e.kind)
                    .column("kind")
                    .type_key(),
            )
            .field(FieldSchema::new::<Dog, i32>("weight", int(), |e| &e.weight, |e| &mut e.weight).column("weight"))
    }
}

#[derive(Default)]
struct Cat {
    id: String,
    kind: String,
    weight: String,
}
impl Entity for Cat {
    fn schema() -> EntitySchema {
        EntitySchema::variant::<Cat, Animal>("cat")
            .field(
                FieldSchema::new::<Cat, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Cat, String>("kind", text(), |e| &e.kind, |e| &mut e.kind)
                    .column("kind")
                    .type_key(),
            )
            .field(FieldSchema::new::<Cat, String>("weight", text(), |e| &e.weight, |e| &mut e.weight).column("weight"))
    }
}

#[derive(Default)]
struct TwoTypeKeys {
    id: String,
    kind: String,
    flavour: String,
}
impl Entity for TwoTypeKeys {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<TwoTypeKeys>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<TwoTypeKeys, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<TwoTypeKeys, String>("kind", text(), |e| &e.kind, |e| &mut e.kind)
                    .column("kind")
                    .type_key(),
            )
            .field(
                FieldSchema::new::<TwoTypeKeys, String>("flavour", text(), |e| &e.flavour, |e| &mut e.flavour)
                    .column("flavour")
                    .type_key(),
            )
    }
}

// A nested type holding itself; the lens hands back the same object.
#[derive(Default)]
struct Chain {
    label: String,
}
impl Entity for Chain {
    fn schema() -> EntitySchema {
        EntitySchema::udt::<Chain>("chain")
            .field(FieldSchema::new::<Chain, String>("label", text(), |e| &e.label, |e| &mut e.label).column("label"))
            .field(FieldSchema::udt::<Chain, Chain>("next", |e| e, |e| e).column("next"))
    }
}

#[derive(Default)]
struct ChainHolder {
    id: String,
    chain: Chain,
}
impl Entity for ChainHolder {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<ChainHolder>()
            .keyspace(KeyspaceSchema::new("broken"))
            .table(TableSchema::new("t"))
            .field(
                FieldSchema::new::<ChainHolder, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(FieldSchema::udt::<ChainHolder, Chain>("chain", |e| &e.chain, |e| &mut e.chain).column("chain"))
    }
}

// ------------- Schema errors -------------
#[test]
fn tables_need_a_partition_key() {
    let message = schema_message::<NoPartition>();
    assert!(message.contains("no partition key"), "{message}");
}

#[test]
fn columns_map_to_one_field() {
    let message = schema_message::<SharedColumn>();
    assert!(message.contains("duplicate column 'x'"), "{message}");
}

#[test]
fn key_roles_need_a_column() {
    let message = schema_message::<KeyWithoutColumn>();
    assert!(message.contains("no column"), "{message}");
}

#[test]
fn keyspace_is_required() {
    let message = schema_message::<NoKeyspace>();
    assert!(message.contains("keyspace"), "{message}");
}

#[test]
fn suffix_types_must_be_declared_on_the_keyspace() {
    let message = schema_message::<UndeclaredSuffix>();
    assert!(message.contains("zone"), "{message}");
}

#[test]
fn counters_do_not_mix_with_regular_columns() {
    let message = schema_message::<MixedCounters>();
    assert!(message.contains("counter"), "{message}");
}

#[test]
fn one_type_key_column_per_table() {
    let message = schema_message::<TwoTypeKeys>();
    assert!(message.contains("more than one type-key column"), "{message}");
}

#[test]
fn self_referencing_nested_types_are_refused() {
    let message = schema_message::<Chain>();
    assert!(message.contains("refers to itself"), "{message}");
    let message = schema_message::<ChainHolder>();
    assert!(message.contains("refers to itself"), "{message}");

    // a refused type leaves the keeper usable
    let keeper = DescriptorKeeper::new();
    assert!(keeper.resolve::<Chain>().is_err());
    assert!(keeper.resolve::<Chain>().is_err());
    keeper.resolve::<Customer>().unwrap();
    assert_eq!(keeper.len(), 2, "Customer and its Address");
}

#[test]
fn conflicting_variant_columns_are_reported() {
    match DescriptorKeeper::new().resolve::<Animal>() {
        Err(MapperError::SchemaConflict { column, first, second }) => {
            assert_eq!(column, "weight");
            assert!(first.ends_with("Dog"), "{first}");
            assert!(second.ends_with("Cat"), "{second}");
        }
        Err(other) => panic!("expected a conflict, got {other:?}"),
        Ok(_) => panic!("Animal should not resolve"),
    }
}

// ------------- Descriptors -------------
#[test]
fn every_table_has_a_partition_key() {
    let keeper = DescriptorKeeper::new();
    let entities = [
        keeper.resolve::<Account>().unwrap(),
        keeper.resolve::<Event>().unwrap(),
        keeper.resolve::<Tagged>().unwrap(),
        keeper.resolve::<PageViews>().unwrap(),
        keeper.resolve::<Vehicle>().unwrap(),
        keeper.resolve::<Customer>().unwrap(),
    ];
    for entity in &entities {
        for table in entity.tables() {
            assert!(!table.partition_keys().is_empty(), "{}.{}", entity.type_name(), table.name());
        }
    }
}

#[test]
fn key_roles_are_per_table() {
    let keeper = DescriptorKeeper::new();
    let account = keeper.resolve::<Account>().unwrap();
    let by_id = account.table("accounts").unwrap();
    let by_name = account.table("accounts_by_name").unwrap();
    assert!(by_id.column("id").unwrap().is_partition_key());
    assert!(by_id.column("name").unwrap().is_mandatory());
    assert!(by_name.column("name").unwrap().is_partition_key());
    assert!(by_name.column("id").unwrap().is_clustering_key());
    assert!(!by_id.has_column("tenant"), "suffix fields need no column");
    assert_eq!(account.suffixes().len(), 1);
    assert_eq!(account.suffix("tenant").unwrap().excludes(), ["blocked".to_owned()]);
}

#[test]
fn descriptors_are_built_once() {
    let keeper = Arc::new(DescriptorKeeper::new());
    let first = keeper.resolve::<Account>().unwrap();
    let second = keeper.resolve::<Account>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let keeper = Arc::clone(&keeper);
            thread::spawn(move || keeper.resolve::<Event>().unwrap())
        })
        .collect();
    let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(resolved.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(keeper.len(), 2);
}

#[test]
fn root_merges_variant_columns() {
    let keeper = DescriptorKeeper::new();
    let vehicle = keeper.resolve::<Vehicle>().unwrap();
    let table = vehicle.table("vehicles").unwrap();
    assert!(table.has_column("doors"));
    assert!(table.has_column("gears"));
    assert_eq!(table.column("kind").unwrap().role(), ColumnRole::TypeKey);
    match vehicle.kind() {
        DescriptorKind::Root { type_key, .. } => assert_eq!(type_key, "kind"),
        other => panic!("expected a root, got {other:?}"),
    }
    assert_eq!(vehicle.variants().len(), 2);

    let car = keeper.resolve::<Car>().unwrap();
    assert_eq!(car.type_value(), Some("car"));
    assert!(!car.table("vehicles").unwrap().has_column("gears"));
}

#[test]
fn roots_dispatch_objects_to_their_variant() {
    let keeper = DescriptorKeeper::new();
    let vehicle = keeper.resolve::<Vehicle>().unwrap();
    let car = shared(Car::default());
    let reader = vehicle.for_object(&ObjectRef::new(&car)).unwrap();
    assert_eq!(reader.type_value(), Some("car"));

    let account = shared(alice());
    let err = vehicle.for_object(&ObjectRef::new(&account)).unwrap_err();
    assert!(matches!(err, MapperError::TypeMismatch { .. }), "got {err:?}");
}

#[test]
fn variant_objects_get_their_type_key_corrected() {
    let keeper = DescriptorKeeper::new();
    let car = keeper.resolve::<Car>().unwrap();
    let object = shared(Car {
        id: "c1".into(),
        kind: "truck".into(),
        doors: 4,
    });
    car.heal_type_key(&ObjectRef::new(&object)).unwrap();
    assert_eq!(object.read().unwrap().kind, "car");
}

#[test]
fn nested_types_are_collected() {
    let keeper = DescriptorKeeper::new();
    let customer = keeper.resolve::<Customer>().unwrap();
    let nested = customer.nested_types();
    assert_eq!(nested.len(), 1);
    assert!(nested[0].is_udt());
    assert_eq!(nested[0].udt_name(), Some("address"));
    assert_eq!(
        customer.table("customers").unwrap().column("address").unwrap().data_type().cql_name(),
        "frozen<address>"
    );
}

// ------------- Table filters -------------
struct DropTags;
impl TableFilter for DropTags {
    fn filter(&self, table: &mut TableDescriptor) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        table.remove_column("tags");
        assert!(!table.remove_column("id"), "key columns stay");
        Ok(())
    }
}

struct Failing;
impl TableFilter for Failing {
    fn filter(&self, _table: &mut TableDescriptor) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("refusing".into())
    }
}

struct Panicking;
impl TableFilter for Panicking {
    fn filter(&self, table: &mut TableDescriptor) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        panic!("filter blew up on {}", table.name());
    }
}

#[test]
fn filters_can_remove_columns() {
    let keeper = DescriptorKeeper::new().with_filter(Arc::new(DropTags));
    let account = keeper.resolve::<Account>().unwrap();
    for table in account.tables() {
        assert!(!table.has_column("tags"), "{}", table.name());
        assert!(table.has_column("id"));
    }
}

#[test]
fn failing_filters_are_ignored() {
    let keeper = DescriptorKeeper::new()
        .with_filter(Arc::new(Failing))
        .with_filter(Arc::new(Panicking))
        .with_filter(Arc::new(DropTags));
    let account = keeper.resolve::<Account>().unwrap();
    assert!(!account.table("accounts").unwrap().has_column("tags"));
}

// ------------- Row conversion -------------
#[test]
fn rows_decode_into_objects() {
    let keeper = DescriptorKeeper::new();
    let account = keeper.resolve::<Account>().unwrap();
    let row = Row::new()
        .with("id", "a1")
        .with("name", "Alice")
        .with("tags", Value::Set(vec![Value::from("admin")]))
        .with("score", 84i64);
    let mut suffixes = BTreeMap::new();
    suffixes.insert("tenant".to_owned(), Value::from("Acme"));
    let decoded = account.decode_row("accounts", &row, &suffixes).unwrap();
    let decoded = decoded.downcast::<Account>().unwrap();
    assert_eq!(decoded.id, "a1");
    assert_eq!(decoded.score, 42, "persisted columns are decoded");
    assert!(decoded.tags.contains("admin"));
    assert_eq!(decoded.tenant, "Acme");
}

#[test]
fn rows_missing_keys_are_rejected() {
    let keeper = DescriptorKeeper::new();
    let account = keeper.resolve::<Account>().unwrap();
    let row = Row::new().with("name", "Alice");
    let err = account.decode_row("accounts", &row, &BTreeMap::new()).unwrap_err();
    assert!(matches!(err, MapperError::ObjectConversion { .. }), "got {err:?}");
}

#[test]
fn root_rows_decode_into_variants() {
    let keeper = DescriptorKeeper::new();
    let vehicle = keeper.resolve::<Vehicle>().unwrap();
    let row = Row::new().with("id", "b1").with("kind", "bike").with("gears", 21);
    let decoded = vehicle.decode_row("vehicles", &row, &BTreeMap::new()).unwrap();
    let bike = decoded.downcast::<Bike>().unwrap();
    assert_eq!(bike.gears, 21);
    assert_eq!(bike.kind, "bike");

    let unknown = Row::new().with("id", "x").with("kind", "boat");
    assert!(vehicle.decode_row("vehicles", &unknown, &BTreeMap::new()).is_err());
}

#[test]
fn udt_columns_decode_into_nested_objects() {
    let keeper = DescriptorKeeper::new();
    let customer = keeper.resolve::<Customer>().unwrap();
    let row = Row::new().with("id", "c1").with(
        "address",
        Value::Udt(vec![
            ("street".to_owned(), Value::from("Main St 1")),
            ("city".to_owned(), Value::from("Springfield")),
        ]),
    );
    let decoded = customer.decode_row("customers", &row, &BTreeMap::new()).unwrap();
    let decoded = decoded.downcast::<Customer>().unwrap();
    assert_eq!(decoded.address.city, "Springfield");
}

#[test]
fn multi_key_rows_hold_one_element() {
    let keeper = DescriptorKeeper::new();
    let tagged = keeper.resolve::<Tagged>().unwrap();
    let row = Row::new().with("label", "red").with("id", "t1").with("note", "n");
    let decoded = tagged.decode_row("by_label", &row, &BTreeMap::new()).unwrap();
    let decoded = decoded.downcast::<Tagged>().unwrap();
    assert_eq!(decoded.labels.len(), 1);
    assert!(decoded.labels.contains("red"));
}
