use cqlmap::datatype::{CqlType, DataTypeDefinition, FieldValue, Value};
use cqlmap::render;
use uuid::Uuid;

const HYPHENATED: &str = "550e8400-e29b-41d4-a716-446655440000";
// version nibble 1, time based
const TIME_BASED: &str = "c232ab00-9414-11ec-b3c8-9f6bdeced846";

#[test]
fn uuids_parse_from_every_textual_form() {
    let expected = Value::uuid(HYPHENATED).unwrap();
    for form in [
        "550e8400e29b41d4a716446655440000",
        "urn:uuid:550e8400-e29b-41d4-a716-446655440000",
        "{550e8400-e29b-41d4-a716-446655440000}",
        "550E8400-E29B-41D4-A716-446655440000",
    ] {
        assert_eq!(Value::uuid(form), Some(expected.clone()), "form {form}");
    }
    assert_eq!(Value::uuid("550e8400-e29b"), None);
}

#[test]
fn uuids_render_hyphenated_and_unquoted() {
    let value = Value::uuid("550E8400E29B41D4A716446655440000").unwrap();
    assert_eq!(render::literal(&value).unwrap(), HYPHENATED);
    assert_eq!(value.to_string(), HYPHENATED);
}

#[test]
fn timeuuid_columns_take_only_time_based_uuids() {
    let random = Value::Uuid(Uuid::new_v4());
    let time_based = Value::uuid(TIME_BASED).unwrap();
    assert!(CqlType::Uuid.accepts(&random));
    assert!(CqlType::Uuid.accepts(&time_based));
    assert!(CqlType::TimeUuid.accepts(&time_based));
    assert!(!CqlType::TimeUuid.accepts(&random));
    assert!(!DataTypeDefinition::scalar(CqlType::TimeUuid).accepts(&random));
}

#[test]
fn uuid_fields_convert_without_losing_the_nil_uuid() {
    assert_eq!(Uuid::nil().to_value(), Value::Uuid(Uuid::nil()));
    assert_eq!(Option::<Uuid>::None.to_value(), Value::Null);

    let parsed = Uuid::from_value(Value::Text("550e8400e29b41d4a716446655440000".to_owned()));
    assert_eq!(parsed.map(|u| u.to_string()), Some(HYPHENATED.to_owned()));
    assert_eq!(Uuid::from_value(Value::Text("not a uuid".to_owned())), None);
    assert_eq!(String::from_value(Value::uuid(TIME_BASED).unwrap()), Some(TIME_BASED.to_owned()));
}
