use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};

use cqlmap::clause::Clause;
use cqlmap::datatype::{CqlType, DataTypeDefinition};
use cqlmap::executor::{Executor, Request};
use cqlmap::pending::Pending;
use cqlmap::result::{PagedRows, ResultSet};
use cqlmap::schema::{Entity, EntitySchema, FieldSchema, KeyspaceSchema, SortOrder, TableSchema};
use cqlmap::statement::{ClauseBearing, Executable};
use cqlmap::Mapper;

// ------------- Reading -------------
#[derive(Debug, Default)]
struct Reading {
    site: String,
    year: i32,
    sensor: String,
    at: i64,
    value: i64,
}

impl Entity for Reading {
    fn schema() -> EntitySchema {
        let text = DataTypeDefinition::scalar(CqlType::Text);
        let bigint = DataTypeDefinition::scalar(CqlType::BigInt);
        EntitySchema::standard::<Reading>()
            .keyspace(KeyspaceSchema::new("telemetry").suffix("site").suffix("year"))
            .table(TableSchema::new("readings"))
            .field(FieldSchema::new::<Reading, String>("site", text.clone(), |r| &r.site, |r| &mut r.site).suffix(
                "site",
                "site",
                &[],
            ))
            .field(
                FieldSchema::new::<Reading, i32>(
                    "year",
                    DataTypeDefinition::scalar(CqlType::Int),
                    |r| &r.year,
                    |r| &mut r.year,
                )
                .suffix("year", "year", &[]),
            )
            .field(
                FieldSchema::new::<Reading, String>("sensor", text, |r| &r.sensor, |r| &mut r.sensor)
                    .column("sensor")
                    .partition_key(0),
            )
            .field(
                FieldSchema::new::<Reading, i64>("at", bigint.clone(), |r| &r.at, |r| &mut r.at)
                    .column("at")
                    .clustering_key(0, SortOrder::Descending),
            )
            .field(FieldSchema::new::<Reading, i64>("value", bigint, |r| &r.value, |r| &mut r.value).column("value"))
    }
}

struct Discard;

impl Executor for Discard {
    fn execute_async(&self, _request: Request) -> Pending<Box<dyn ResultSet>> {
        Pending::ready(Ok(Box::new(PagedRows::empty())))
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    cqlmap::config::init_tracing("warn");
    let mapper = Mapper::new(Arc::new(Discard));
    // warm the descriptor cache
    mapper.descriptor::<Reading>().expect("valid schema");

    c.bench_function("compile single", |b| {
        b.iter(|| {
            let mut select = mapper
                .select::<Reading>()
                .expect("select")
                .suffix("site", "oslo")
                .suffix("year", 2024)
                .where_clause(Clause::eq("sensor", "s1"))
                .and(Clause::gte("at", 1_000i64))
                .limit(100);
            black_box(select.compile().expect("compiles"));
        })
    });

    c.bench_function("compile fan-out 2x3", |b| {
        b.iter(|| {
            let mut select = mapper
                .select::<Reading>()
                .expect("select")
                .suffix_in("site", ["oslo", "bergen"])
                .suffix_in("year", [2023, 2024, 2025])
                .where_clause(Clause::eq("sensor", "s1"));
            black_box(select.compile().expect("compiles"));
        })
    });

    let mut cached = mapper
        .select::<Reading>()
        .expect("select")
        .suffix_in("site", ["oslo", "bergen"])
        .suffix("year", 2024);
    cached.compile().expect("compiles");
    c.bench_function("compile cache hit", |b| b.iter(|| black_box(cached.compile().expect("cached"))));
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
