//! Data type definitions and the runtime value model.
//!
//! A column's [`DataTypeDefinition`] classifies it as a scalar, a collection
//! of some element type, or a nested user-defined type. Values travel through
//! the crate as [`Value`], which is also the shape rows arrive in from the
//! execution collaborator. Rust field types convert to and from [`Value`]
//! through the [`FieldValue`] trait.

// used for timestamps and dates
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
// used for decimal numbers
use bigdecimal::BigDecimal;

use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;

use uuid::Uuid;

use crate::schema::{Entity, SchemaFn};

// ------------- Scalar types --------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CqlType {
    Ascii,
    BigInt,
    Blob,
    Boolean,
    Counter,
    Date,
    Decimal,
    Double,
    Float,
    Inet,
    Int,
    SmallInt,
    Text,
    Timestamp,
    TimeUuid,
    TinyInt,
    Uuid,
    Varchar,
    VarInt,
}

impl CqlType {
    pub fn name(self) -> &'static str {
        match self {
            CqlType::Ascii => "ascii",
            CqlType::BigInt => "bigint",
            CqlType::Blob => "blob",
            CqlType::Boolean => "boolean",
            CqlType::Counter => "counter",
            CqlType::Date => "date",
            CqlType::Decimal => "decimal",
            CqlType::Double => "double",
            CqlType::Float => "float",
            CqlType::Inet => "inet",
            CqlType::Int => "int",
            CqlType::SmallInt => "smallint",
            CqlType::Text => "text",
            CqlType::Timestamp => "timestamp",
            CqlType::TimeUuid => "timeuuid",
            CqlType::TinyInt => "tinyint",
            CqlType::Uuid => "uuid",
            CqlType::Varchar => "varchar",
            CqlType::VarInt => "varint",
        }
    }
    pub fn is_text(self) -> bool {
        matches!(self, CqlType::Ascii | CqlType::Text | CqlType::Varchar)
    }
    /// Whether a non-null value may be stored in a column of this type.
    /// Integers widen, nothing narrows.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (t, Value::Text(_)) => t.is_text(),
            (CqlType::TinyInt, Value::TinyInt(_)) => true,
            (CqlType::SmallInt, Value::TinyInt(_) | Value::SmallInt(_)) => true,
            (CqlType::Int, Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_)) => true,
            (
                CqlType::BigInt | CqlType::Counter | CqlType::VarInt,
                Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_),
            ) => true,
            (CqlType::Float, Value::Float(_)) => true,
            (CqlType::Double, Value::Float(_) | Value::Double(_)) => true,
            (CqlType::Decimal, Value::Decimal(_)) => true,
            (CqlType::Boolean, Value::Boolean(_)) => true,
            (CqlType::Blob, Value::Blob(_)) => true,
            (CqlType::Timestamp, Value::Timestamp(_)) => true,
            (CqlType::Date, Value::Date(_)) => true,
            (CqlType::Uuid, Value::Uuid(_)) => true,
            // time-based UUIDs only
            (CqlType::TimeUuid, Value::Uuid(u)) => u.get_version_num() == 1,
            (CqlType::Inet, Value::Inet(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CqlType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- Nested types --------------
/// Reference to a nested (user-defined) type; resolved to a descriptor by the keeper.
/// The schema is only read when the name is first asked for, so a type may refer to itself.
#[derive(Clone)]
pub struct UdtType {
    pub(crate) type_id: TypeId,
    name: OnceLock<String>,
    pub(crate) schema: SchemaFn,
}

impl UdtType {
    pub fn name(&self) -> &str {
        self.name.get_or_init(|| {
            let schema = (self.schema)();
            schema.udt_name().unwrap_or(schema.type_name()).to_owned()
        })
    }
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl PartialEq for UdtType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl fmt::Debug for UdtType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UdtType({})", self.name())
    }
}

// ------------- Data type definitions --------------
#[derive(Debug, Clone, PartialEq)]
pub enum DataTypeDefinition {
    Scalar(CqlType),
    List(Box<DataTypeDefinition>),
    Set(Box<DataTypeDefinition>),
    Map(Box<DataTypeDefinition>, Box<DataTypeDefinition>),
    Udt(UdtType),
}

impl DataTypeDefinition {
    pub fn scalar(t: CqlType) -> Self {
        Self::Scalar(t)
    }
    pub fn list(element: CqlType) -> Self {
        Self::List(Box::new(Self::Scalar(element)))
    }
    pub fn set(element: CqlType) -> Self {
        Self::Set(Box::new(Self::Scalar(element)))
    }
    pub fn map(key: CqlType, value: CqlType) -> Self {
        Self::Map(Box::new(Self::Scalar(key)), Box::new(Self::Scalar(value)))
    }
    pub fn list_of(element: DataTypeDefinition) -> Self {
        Self::List(Box::new(element))
    }
    pub fn set_of(element: DataTypeDefinition) -> Self {
        Self::Set(Box::new(element))
    }
    pub fn udt<U: Entity>() -> Self {
        Self::Udt(UdtType {
            type_id: TypeId::of::<U>(),
            name: OnceLock::new(),
            schema: U::schema,
        })
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::List(_) | Self::Set(_) | Self::Map(_, _))
    }
    pub fn is_counter(&self) -> bool {
        matches!(self, Self::Scalar(CqlType::Counter))
    }
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Scalar(t) if t.is_text())
    }
    /// Element type of a list or set.
    pub fn element(&self) -> Option<&DataTypeDefinition> {
        match self {
            Self::List(e) | Self::Set(e) => Some(e),
            _ => None,
        }
    }

    /// The CQL spelling of this type, with nested types frozen where CQL requires it.
    pub fn cql_name(&self) -> String {
        match self {
            Self::Scalar(t) => t.name().to_owned(),
            Self::List(e) => format!("list<{}>", e.nested_name()),
            Self::Set(e) => format!("set<{}>", e.nested_name()),
            Self::Map(k, v) => format!("map<{}, {}>", k.nested_name(), v.nested_name()),
            Self::Udt(u) => format!("frozen<{}>", u.name()),
        }
    }
    fn nested_name(&self) -> String {
        match self {
            Self::Scalar(_) | Self::Udt(_) => self.cql_name(),
            _ => format!("frozen<{}>", self.cql_name()),
        }
    }

    /// Whether a value has the shape this type declares. Null is accepted here;
    /// null-ness is checked against column flags separately.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Scalar(t), v) => t.accepts(v),
            (Self::List(e) | Self::Set(e), Value::List(items) | Value::Set(items)) => {
                items.iter().all(|i| !i.is_null() && e.accepts(i))
            }
            (Self::Map(k, v), Value::Map(entries)) => entries
                .iter()
                .all(|(ek, ev)| !ek.is_null() && !ev.is_null() && k.accepts(ek) && v.accepts(ev)),
            (Self::Udt(_), Value::Udt(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DataTypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.cql_name())
    }
}

// ------------- Values --------------
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    TinyInt(i8),
    SmallInt(i16),
    Int(i32),
    BigInt(i64),
    Float(f32),
    Double(f64),
    Decimal(BigDecimal),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Uuid(Uuid),
    Inet(String),
    List(Vec<Value>),
    Set(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Udt(Vec<(String, Value)>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::TinyInt(_) => "tinyint",
            Value::SmallInt(_) => "smallint",
            Value::Int(_) => "int",
            Value::BigInt(_) => "bigint",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
            Value::Date(_) => "date",
            Value::Uuid(_) => "uuid",
            Value::Inet(_) => "inet",
            Value::List(_) => "list",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
            Value::Udt(_) => "udt",
        }
    }
    /// Any integer variant widened to i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::TinyInt(i) => Some(i64::from(*i)),
            Value::SmallInt(i) => Some(i64::from(*i)),
            Value::Int(i) => Some(i64::from(*i)),
            Value::BigInt(i) => Some(*i),
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) | Value::Inet(s) => Some(s),
            _ => None,
        }
    }
    /// Elements of a list or set.
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }
    /// Parses any textual UUID form: hyphenated, simple, braced or urn.
    pub fn uuid(s: &str) -> Option<Value> {
        Uuid::parse_str(s).ok().map(Value::Uuid)
    }
}

// Plain form, used when a value becomes part of a keyspace name.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::TinyInt(i) => write!(f, "{}", i),
            Value::SmallInt(i) => write!(f, "{}", i),
            Value::Int(i) => write!(f, "{}", i),
            Value::BigInt(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Text(s) | Value::Inet(s) => write!(f, "{}", s),
            Value::Uuid(u) => write!(f, "{}", u),
            Value::Blob(b) => {
                write!(f, "0x")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Value::Date(d) => write!(f, "{}", d),
            Value::List(items) | Value::Set(items) => {
                let parts: Vec<String> = items.iter().map(|i| i.to_string()).collect();
                write!(f, "{}", parts.join("_"))
            }
            Value::Map(entries) => {
                let parts: Vec<String> = entries.iter().map(|(k, v)| format!("{}_{}", k, v)).collect();
                write!(f, "{}", parts.join("_"))
            }
            Value::Udt(fields) => {
                let parts: Vec<String> = fields.iter().map(|(_, v)| v.to_string()).collect();
                write!(f, "{}", parts.join("_"))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}
impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}
impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i)
    }
}
impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::BigInt(i)
    }
}
impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}
impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Double(x)
    }
}

// ------------- Field conversions --------------
/// Conversion between a Rust field type and [`Value`].
pub trait FieldValue: Sized + Send + Sync + 'static {
    fn to_value(&self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

impl FieldValue for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
    fn from_value(value: Value) -> Option<Self> {
        Some(value)
    }
}

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Boolean(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

macro_rules! integer_field_value {
    ($($ty:ty => $variant:ident),+) => {
        $(
            impl FieldValue for $ty {
                fn to_value(&self) -> Value {
                    Value::$variant(*self)
                }
                fn from_value(value: Value) -> Option<Self> {
                    value.as_i64().and_then(|i| <$ty>::try_from(i).ok())
                }
            }
        )+
    };
}
integer_field_value!(i8 => TinyInt, i16 => SmallInt, i32 => Int, i64 => BigInt);

impl FieldValue for f32 {
    fn to_value(&self) -> Value {
        Value::Float(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Float(x) => Some(x),
            _ => None,
        }
    }
}
impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::Double(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Double(x) => Some(x),
            Value::Float(x) => Some(f64::from(x)),
            _ => None,
        }
    }
}
impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Text(s) | Value::Inet(s) => Some(s),
            Value::Uuid(u) => Some(u.to_string()),
            _ => None,
        }
    }
}
impl FieldValue for BigDecimal {
    fn to_value(&self) -> Value {
        Value::Decimal(self.clone())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Decimal(d) => Some(d),
            _ => None,
        }
    }
}
impl FieldValue for DateTime<Utc> {
    fn to_value(&self) -> Value {
        Value::Timestamp(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Timestamp(t) => Some(t),
            _ => None,
        }
    }
}
impl FieldValue for NaiveDate {
    fn to_value(&self) -> Value {
        Value::Date(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Date(d) => Some(d),
            _ => None,
        }
    }
}

/// Binary payload; a newtype so `Vec<u8>` is not mistaken for a list of tinyints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Blob(pub Vec<u8>);

impl FieldValue for Blob {
    fn to_value(&self) -> Value {
        Value::Blob(self.0.clone())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Blob(b) => Some(Blob(b)),
            _ => None,
        }
    }
}

impl FieldValue for Uuid {
    fn to_value(&self) -> Value {
        Value::Uuid(*self)
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Uuid(u) => Some(u),
            Value::Text(s) => Uuid::parse_str(&s).ok(),
            _ => None,
        }
    }
}

impl<T: FieldValue> FieldValue for Option<T> {
    fn to_value(&self) -> Value {
        match self {
            Some(v) => v.to_value(),
            None => Value::Null,
        }
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            v => T::from_value(v).map(Some),
        }
    }
}
impl<T: FieldValue> FieldValue for Vec<T> {
    fn to_value(&self) -> Value {
        Value::List(self.iter().map(FieldValue::to_value).collect())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::List(items) | Value::Set(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Some(Vec::new()),
            _ => None,
        }
    }
}
impl<T: FieldValue + Ord> FieldValue for BTreeSet<T> {
    fn to_value(&self) -> Value {
        Value::Set(self.iter().map(FieldValue::to_value).collect())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::List(items) | Value::Set(items) => items.into_iter().map(T::from_value).collect(),
            Value::Null => Some(BTreeSet::new()),
            _ => None,
        }
    }
}
impl<K: FieldValue + Ord, V: FieldValue> FieldValue for BTreeMap<K, V> {
    fn to_value(&self) -> Value {
        Value::Map(self.iter().map(|(k, v)| (k.to_value(), v.to_value())).collect())
    }
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Some((K::from_value(k)?, V::from_value(v)?)))
                .collect(),
            Value::Null => Some(BTreeMap::new()),
            _ => None,
        }
    }
}
