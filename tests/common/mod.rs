#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, RwLock};

use cqlmap::datatype::{CqlType, DataTypeDefinition, Value};
use cqlmap::error::PersisterError;
use cqlmap::executor::{Executor, Request};
use cqlmap::pending::{Pending, Promise};
use cqlmap::persisted::Persister;
use cqlmap::result::{PagedRows, ResultSet, Row};
use cqlmap::schema::{Entity, EntitySchema, FieldSchema, KeyspaceSchema, SortOrder, TableSchema};
use cqlmap::Mapper;

pub fn text() -> DataTypeDefinition {
    DataTypeDefinition::scalar(CqlType::Text)
}
pub fn bigint() -> DataTypeDefinition {
    DataTypeDefinition::scalar(CqlType::BigInt)
}
pub fn int() -> DataTypeDefinition {
    DataTypeDefinition::scalar(CqlType::Int)
}

pub fn shared<E>(object: E) -> Arc<RwLock<E>> {
    Arc::new(RwLock::new(object))
}

// ------------- Persister -------------
/// Stores integers doubled.
pub struct Doubler;

impl Persister<Value, Value> for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }
    fn encode(&self, value: &Value) -> Result<Value, PersisterError> {
        value.as_i64().map(|i| Value::BigInt(i * 2)).ok_or_else(|| "not an integer".into())
    }
    fn decode(&self, persisted: &Value) -> Result<Value, PersisterError> {
        persisted.as_i64().map(|i| Value::BigInt(i / 2)).ok_or_else(|| "not an integer".into())
    }
}

// ------------- Entities -------------
/// One suffix, two tables, a persisted column.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub score: i64,
    pub tenant: String,
}

impl Entity for Account {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<Account>()
            .keyspace(KeyspaceSchema::new("app").suffix("tenant"))
            .table(TableSchema::new("accounts"))
            .table(TableSchema::new("accounts_by_name"))
            .field(
                FieldSchema::new::<Account, String>("id", text(), |a| &a.id, |a| &mut a.id)
                    .column("id")
                    .partition_key_in("accounts", 0)
                    .clustering_key_in("accounts_by_name", 0, SortOrder::Ascending),
            )
            .field(
                FieldSchema::new::<Account, String>("name", text(), |a| &a.name, |a| &mut a.name)
                    .column("name")
                    .partition_key_in("accounts_by_name", 0)
                    .mandatory(),
            )
            .field(
                FieldSchema::new::<Account, BTreeSet<String>>(
                    "tags",
                    DataTypeDefinition::set(CqlType::Text),
                    |a| &a.tags,
                    |a| &mut a.tags,
                )
                .column("tags"),
            )
            .field(
                FieldSchema::new::<Account, i64>("score", bigint(), |a| &a.score, |a| &mut a.score)
                    .column("score")
                    .persisted(Arc::new(Doubler), bigint()),
            )
            .field(
                FieldSchema::new::<Account, String>("tenant", text(), |a| &a.tenant, |a| &mut a.tenant)
                    .suffix("tenant", "tenant", &["blocked"]),
            )
    }
}

pub fn alice() -> Account {
    Account {
        id: "a1".into(),
        name: "Alice".into(),
        tags: BTreeSet::new(),
        score: 21,
        tenant: "Acme".into(),
    }
}

/// Two suffixes, a descending clustering key, an index.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Event {
    pub region: String,
    pub year: i32,
    pub id: String,
    pub at: i64,
    pub kind: String,
}

impl Entity for Event {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<Event>()
            .keyspace(KeyspaceSchema::new("audit").suffix("region").suffix("year"))
            .table(TableSchema::new("events"))
            .field(
                FieldSchema::new::<Event, String>("region", text(), |e| &e.region, |e| &mut e.region)
                    .suffix("region", "region", &[]),
            )
            .field(
                FieldSchema::new::<Event, i32>("year", int(), |e| &e.year, |e| &mut e.year)
                    .suffix("year", "year", &["1999"]),
            )
            .field(
                FieldSchema::new::<Event, String>("id", text(), |e| &e.id, |e| &mut e.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Event, i64>("at", bigint(), |e| &e.at, |e| &mut e.at)
                    .column("at")
                    .clustering_key(0, SortOrder::Descending),
            )
            .field(
                FieldSchema::new::<Event, String>("kind", text(), |e| &e.kind, |e| &mut e.kind)
                    .column("kind")
                    .index(),
            )
    }
}

/// Set-valued partition key, one row per label.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Tagged {
    pub id: String,
    pub labels: BTreeSet<String>,
    pub note: String,
}

impl Entity for Tagged {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<Tagged>()
            .keyspace(KeyspaceSchema::new("tags"))
            .table(TableSchema::new("by_label"))
            .field(
                FieldSchema::new::<Tagged, BTreeSet<String>>(
                    "labels",
                    DataTypeDefinition::set(CqlType::Text),
                    |t| &t.labels,
                    |t| &mut t.labels,
                )
                .column("label")
                .partition_key(0)
                .multi_key(),
            )
            .field(
                FieldSchema::new::<Tagged, String>("id", text(), |t| &t.id, |t| &mut t.id)
                    .column("id")
                    .clustering_key(0, SortOrder::Ascending),
            )
            .field(FieldSchema::new::<Tagged, String>("note", text(), |t| &t.note, |t| &mut t.note).column("note"))
    }
}

/// Counter table.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PageViews {
    pub page: String,
    pub views: i64,
}

impl Entity for PageViews {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<PageViews>()
            .keyspace(KeyspaceSchema::new("stats"))
            .table(TableSchema::new("page_views"))
            .field(
                FieldSchema::new::<PageViews, String>("page", text(), |p| &p.page, |p| &mut p.page)
                    .column("page")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<PageViews, i64>(
                    "views",
                    DataTypeDefinition::scalar(CqlType::Counter),
                    |p| &p.views,
                    |p| &mut p.views,
                )
                .column("views"),
            )
    }
}

// ------------- Polymorphic family -------------
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Vehicle {
    pub id: String,
    pub kind: String,
}

impl Entity for Vehicle {
    fn schema() -> EntitySchema {
        EntitySchema::root::<Vehicle>()
            .keyspace(KeyspaceSchema::new("fleet"))
            .table(TableSchema::new("vehicles"))
            .field(
                FieldSchema::new::<Vehicle, String>("id", text(), |v| &v.id, |v| &mut v.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Vehicle, String>("kind", text(), |v| &v.kind, |v| &mut v.kind)
                    .column("kind")
                    .type_key(),
            )
            .with_variant::<Car>()
            .with_variant::<Bike>()
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Car {
    pub id: String,
    pub kind: String,
    pub doors: i32,
}

impl Entity for Car {
    fn schema() -> EntitySchema {
        EntitySchema::variant::<Car, Vehicle>("car")
            .field(
                FieldSchema::new::<Car, String>("id", text(), |c| &c.id, |c| &mut c.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Car, String>("kind", text(), |c| &c.kind, |c| &mut c.kind)
                    .column("kind")
                    .type_key(),
            )
            .field(FieldSchema::new::<Car, i32>("doors", int(), |c| &c.doors, |c| &mut c.doors).column("doors"))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Bike {
    pub id: String,
    pub kind: String,
    pub gears: i32,
}

impl Entity for Bike {
    fn schema() -> EntitySchema {
        EntitySchema::variant::<Bike, Vehicle>("bike")
            .field(
                FieldSchema::new::<Bike, String>("id", text(), |b| &b.id, |b| &mut b.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Bike, String>("kind", text(), |b| &b.kind, |b| &mut b.kind)
                    .column("kind")
                    .type_key(),
            )
            .field(FieldSchema::new::<Bike, i32>("gears", int(), |b| &b.gears, |b| &mut b.gears).column("gears"))
    }
}

// ------------- Nested type -------------
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Address {
    pub street: String,
    pub city: String,
}

impl Entity for Address {
    fn schema() -> EntitySchema {
        EntitySchema::udt::<Address>("address")
            .field(
                FieldSchema::new::<Address, String>("street", text(), |a| &a.street, |a| &mut a.street)
                    .column("street"),
            )
            .field(FieldSchema::new::<Address, String>("city", text(), |a| &a.city, |a| &mut a.city).column("city"))
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Customer {
    pub id: String,
    pub address: Address,
}

impl Entity for Customer {
    fn schema() -> EntitySchema {
        EntitySchema::standard::<Customer>()
            .keyspace(KeyspaceSchema::new("crm"))
            .table(TableSchema::new("customers"))
            .field(
                FieldSchema::new::<Customer, String>("id", text(), |c| &c.id, |c| &mut c.id)
                    .column("id")
                    .partition_key(0),
            )
            .field(
                FieldSchema::udt::<Customer, Address>("address", |c| &c.address, |c| &mut c.address).column("address"),
            )
    }
}

// ------------- Executor -------------
type Responder = Box<dyn Fn(&Request) -> cqlmap::Result<Vec<Row>> + Send + Sync>;

/// Records every request and answers it synchronously.
pub struct ScriptedExecutor {
    requests: Mutex<Vec<Request>>,
    respond: Responder,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Self::responding(|_| Ok(Vec::new()))
    }
    pub fn responding(respond: impl Fn(&Request) -> cqlmap::Result<Vec<Row>> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }
    pub fn queries(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.query).collect()
    }
}

impl Executor for ScriptedExecutor {
    fn execute_async(&self, request: Request) -> Pending<Box<dyn ResultSet>> {
        let outcome = (self.respond)(&request).map(|rows| Box::new(PagedRows::new(rows)) as Box<dyn ResultSet>);
        self.requests.lock().unwrap().push(request);
        Pending::ready(outcome)
    }
}

/// Answers requests whose query passes `answers` at once and keeps the others open.
pub struct HoldingExecutor {
    answers: Box<dyn Fn(&str) -> bool + Send + Sync>,
    held: Mutex<Vec<(String, Promise<Box<dyn ResultSet>>)>>,
}

impl HoldingExecutor {
    pub fn new(answers: impl Fn(&str) -> bool + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            answers: Box::new(answers),
            held: Mutex::new(Vec::new()),
        })
    }
    pub fn held(&self) -> Vec<String> {
        self.held.lock().unwrap().iter().map(|(query, _)| query.clone()).collect()
    }
}

impl Executor for HoldingExecutor {
    fn execute_async(&self, request: Request) -> Pending<Box<dyn ResultSet>> {
        if (self.answers)(&request.query) {
            return Pending::ready(Ok(Box::new(PagedRows::empty())));
        }
        let (promise, pending) = Pending::channel();
        self.held.lock().unwrap().push((request.query, promise));
        pending
    }
}

pub fn mapper(executor: &Arc<ScriptedExecutor>) -> Mapper {
    cqlmap::config::init_tracing("cqlmap=debug");
    Mapper::new(executor.clone())
}
