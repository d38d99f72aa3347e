mod common;

use std::collections::BTreeMap;

use common::*;
use cqlmap::context::{keyspace_name, resolve_keyspace, Context, SuffixBinding};
use cqlmap::datatype::Value;
use cqlmap::keeper::DescriptorKeeper;
use cqlmap::statement::{ClauseBearing, Executable, Plan};
use cqlmap::MapperError;

#[test]
fn keyspace_names_are_normalized() {
    assert_eq!(keyspace_name("app", &[Value::from("Acme-Corp")]), "app_acme_corp");
    assert_eq!(keyspace_name("", &[Value::from("NA")]), "na");
    assert_eq!(keyspace_name("audit", &[Value::from("eu"), Value::from(2024)]), "audit_eu_2024");
    assert_eq!(keyspace_name("Plain", &[] as &[Value]), "plain");
}

#[test]
fn resolve_keyspace_needs_every_suffix() {
    let keeper = DescriptorKeeper::new();
    let event = keeper.resolve::<Event>().unwrap();
    let mut suffixes = BTreeMap::new();
    suffixes.insert("region".to_owned(), Value::from("EU"));
    let missing = resolve_keyspace(&event, &suffixes).unwrap_err();
    assert!(matches!(missing, MapperError::MissingSuffix(ref s) if s == "year"), "got {missing:?}");

    suffixes.insert("year".to_owned(), Value::from(2024));
    assert_eq!(resolve_keyspace(&event, &suffixes).unwrap(), "audit_eu_2024");
}

#[test]
fn resolve_keyspace_rejects_excluded_values() {
    let keeper = DescriptorKeeper::new();
    let event = keeper.resolve::<Event>().unwrap();
    let mut suffixes = BTreeMap::new();
    suffixes.insert("region".to_owned(), Value::from("eu"));
    suffixes.insert("year".to_owned(), Value::from(1999));
    match resolve_keyspace(&event, &suffixes) {
        Err(MapperError::ExcludedSuffix { suffix, value }) => {
            assert_eq!(suffix, "year");
            assert_eq!(value, "1999");
        }
        other => panic!("expected an excluded suffix, got {other:?}"),
    }
}

#[test]
fn bound_contexts_cover_the_cartesian_product() {
    let keeper = DescriptorKeeper::new();
    let mut context = Context::new(keeper.resolve::<Event>().unwrap());
    context
        .bind("region", SuffixBinding::Many(vec![Value::from("eu"), Value::from("us")]))
        .unwrap();
    context
        .bind("year", SuffixBinding::Many(vec![Value::from(2023), Value::from(2024), Value::from(2025)]))
        .unwrap();
    let keyspaces: Vec<String> = context
        .bound_contexts()
        .unwrap()
        .iter()
        .map(|c| c.keyspace().unwrap().unwrap())
        .collect();
    assert_eq!(
        keyspaces,
        vec![
            "audit_eu_2023",
            "audit_eu_2024",
            "audit_eu_2025",
            "audit_us_2023",
            "audit_us_2024",
            "audit_us_2025"
        ]
    );
}

#[test]
fn binding_rejects_unknown_suffixes_and_wrong_types() {
    let keeper = DescriptorKeeper::new();
    let mut context = Context::new(keeper.resolve::<Event>().unwrap());
    assert!(context.bind("tenant", SuffixBinding::One(Value::from("x"))).is_err());
    assert!(context.bind("year", SuffixBinding::One(Value::from("last"))).is_err());
    assert!(context.bind("region", SuffixBinding::One(Value::Null)).is_err());
    assert!(!context.has_binding("year"));
}

#[test]
fn fan_out_renders_one_fragment_per_keyspace() {
    let executor = ScriptedExecutor::new();
    let mapper = mapper(&executor);
    let mut select = mapper
        .select::<Event>()
        .unwrap()
        .suffix_in("region", ["eu", "us"])
        .suffix_in("year", [2023, 2024, 2025]);
    let compiled = select.compile().unwrap();
    assert_eq!(compiled.fragments().len(), 6);
    let Plan::FanOut(queries) = compiled.plan() else {
        panic!("expected a fan-out plan, got {:?}", compiled.plan());
    };
    assert_eq!(queries.len(), 6);
    assert_eq!(queries[0], "SELECT * FROM audit_eu_2023.events;");
    assert_eq!(queries[5], "SELECT * FROM audit_us_2025.events;");
    let text = compiled.text().unwrap();
    assert!(text.starts_with("BEGIN SEQUENCE SELECT * FROM audit_eu_2023.events;"), "{text}");
    assert!(text.ends_with("SELECT * FROM audit_us_2025.events; APPLY SEQUENCE;"), "{text}");

    mapper.execute(&mut select).unwrap();
    assert_eq!(executor.queries().len(), 6, "one request per branch");
}

#[test]
fn excluded_candidates_are_skipped() {
    let executor = ScriptedExecutor::new();
    let mapper = mapper(&executor);
    let mut select = mapper
        .select::<Event>()
        .unwrap()
        .suffix("region", "eu")
        .suffix_in("year", [1999, 2024]);
    assert_eq!(
        select.query_string().unwrap().as_deref(),
        Some("SELECT * FROM audit_eu_2024.events;")
    );
}

#[test]
fn fully_excluded_statements_compile_to_nothing() {
    let executor = ScriptedExecutor::new();
    let mapper = mapper(&executor);
    let mut select = mapper.select::<Event>().unwrap().suffix("region", "eu").suffix("year", 1999);
    let compiled = select.compile().unwrap();
    assert_eq!(compiled.text(), None);
    assert_eq!(compiled.plan(), &Plan::Empty);

    let mut rows = mapper.execute(&mut select).unwrap();
    assert!(rows.one().unwrap().is_none());
    assert!(executor.queries().is_empty(), "nothing reaches the executor");
}

#[test]
fn unbound_suffix_fails_compilation() {
    let executor = ScriptedExecutor::new();
    let mapper = mapper(&executor);
    let mut select = mapper.select::<Event>().unwrap().suffix("region", "eu");
    let err = select.compile().unwrap_err();
    assert!(matches!(err, MapperError::MissingSuffix(ref s) if s == "year"), "got {err:?}");
}

#[test]
fn bound_object_supplies_its_suffixes() {
    let executor = ScriptedExecutor::new();
    let mapper = mapper(&executor);
    let account = shared(alice());
    let mut select = mapper.select_object(&account).unwrap();
    assert_eq!(
        select.query_string().unwrap().as_deref(),
        Some("SELECT * FROM app_acme.accounts WHERE id='a1';")
    );

    let mut moved = mapper.select_object(&account).unwrap().suffix("tenant", "Other Co");
    assert_eq!(
        moved.query_string().unwrap().as_deref(),
        Some("SELECT * FROM app_other_co.accounts WHERE id='a1';"),
        "explicit binding wins over the object's value"
    );
}
