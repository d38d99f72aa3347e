//! Custom persisters and the dual-representation cache built on them.
//!
//! A [`Persister`] transforms a field's decoded value into the form that is
//! actually stored, and back. [`PersistedValue`] caches both sides so that a
//! value rendered several times (one statement per keyspace, a value used in
//! both a SET and an IF) is only encoded once.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::datatype::Value;
use crate::error::PersisterError;

pub trait Persister<T, PT>: Send + Sync {
    /// Name reported in codec errors.
    fn name(&self) -> &str;
    fn encode(&self, value: &T) -> Result<PT, PersisterError>;
    fn decode(&self, persisted: &PT) -> Result<T, PersisterError>;
}

/// Persister operating on column values, as attached to a field.
pub type ColumnPersister = Arc<dyn Persister<Value, Value>>;

// ------------- Persisted value -------------
#[derive(Clone)]
enum Slot<V> {
    Stale,
    Fresh(Option<V>),
}

impl<V> Slot<V> {
    fn is_fresh(&self) -> bool {
        matches!(self, Slot::Fresh(_))
    }
}

/// Decoded value `T` and its persisted encoding `PT`, each derived lazily
/// from the other. At most one side is stale at any time. A null on either
/// side maps to null on the other without calling the persister.
pub struct PersistedValue<T, PT> {
    persister: Arc<dyn Persister<T, PT>>,
    decoded: Slot<T>,
    encoded: Slot<PT>,
}

impl<T, PT> PersistedValue<T, PT> {
    pub fn new(persister: Arc<dyn Persister<T, PT>>) -> Self {
        Self {
            persister,
            decoded: Slot::Fresh(None),
            encoded: Slot::Fresh(None),
        }
    }
    pub fn from_decoded(persister: Arc<dyn Persister<T, PT>>, value: Option<T>) -> Self {
        let mut pv = Self::new(persister);
        pv.set_decoded_value(value);
        pv
    }
    pub fn from_encoded(persister: Arc<dyn Persister<T, PT>>, value: Option<PT>) -> Self {
        let mut pv = Self::new(persister);
        pv.set_encoded_value(value);
        pv
    }
    pub fn persister(&self) -> &Arc<dyn Persister<T, PT>> {
        &self.persister
    }

    pub fn set_decoded_value(&mut self, value: Option<T>) {
        self.decoded = Slot::Fresh(value);
        self.encoded = Slot::Stale;
    }
    pub fn set_encoded_value(&mut self, value: Option<PT>) {
        self.encoded = Slot::Fresh(value);
        self.decoded = Slot::Stale;
    }

    pub fn decoded_value(&mut self) -> Result<Option<&T>, PersisterError> {
        if let Slot::Stale = self.decoded {
            let decoded = match &self.encoded {
                Slot::Fresh(Some(pt)) => Some(self.persister.decode(pt)?),
                _ => None,
            };
            self.decoded = Slot::Fresh(decoded);
        }
        match &self.decoded {
            Slot::Fresh(v) => Ok(v.as_ref()),
            Slot::Stale => Ok(None),
        }
    }
    pub fn encoded_value(&mut self) -> Result<Option<&PT>, PersisterError> {
        if let Slot::Stale = self.encoded {
            let encoded = match &self.decoded {
                Slot::Fresh(Some(t)) => Some(self.persister.encode(t)?),
                _ => None,
            };
            self.encoded = Slot::Fresh(encoded);
        }
        match &self.encoded {
            Slot::Fresh(v) => Ok(v.as_ref()),
            Slot::Stale => Ok(None),
        }
    }
}

impl<T, PT: Clone> PersistedValue<T, PT> {
    // Encoded side without memoizing, for comparisons through `&self`.
    fn derive_encoded(&self) -> Result<Option<PT>, PersisterError> {
        match (&self.encoded, &self.decoded) {
            (Slot::Fresh(pt), _) => Ok(pt.clone()),
            (Slot::Stale, Slot::Fresh(Some(t))) => self.persister.encode(t).map(Some),
            (Slot::Stale, _) => Ok(None),
        }
    }
}

impl<T: Clone, PT: Clone> Clone for PersistedValue<T, PT> {
    fn clone(&self) -> Self {
        Self {
            persister: Arc::clone(&self.persister),
            decoded: self.decoded.clone(),
            encoded: self.encoded.clone(),
        }
    }
}

// Compares the decoded sides when both are fresh, else the encoded sides when
// both are fresh, else re-derives the encoded side of each.
impl<T: PartialEq, PT: PartialEq + Clone> PartialEq for PersistedValue<T, PT> {
    fn eq(&self, other: &Self) -> bool {
        if let (Slot::Fresh(a), Slot::Fresh(b)) = (&self.decoded, &other.decoded) {
            return a == b;
        }
        if let (Slot::Fresh(a), Slot::Fresh(b)) = (&self.encoded, &other.encoded) {
            return a == b;
        }
        match (self.derive_encoded(), other.derive_encoded()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

// Hashes the encoded side so that equal values hash equally whichever side is fresh.
impl<T, PT: Hash + Clone> Hash for PersistedValue<T, PT> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.derive_encoded().ok().flatten().hash(state);
    }
}

impl<T: fmt::Debug, PT: fmt::Debug> fmt::Debug for PersistedValue<T, PT> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = f.debug_struct("PersistedValue");
        s.field("persister", &self.persister.name());
        match &self.decoded {
            Slot::Fresh(v) => s.field("decoded", v),
            Slot::Stale => s.field("decoded", &"<stale>"),
        };
        match &self.encoded {
            Slot::Fresh(v) => s.field("encoded", v),
            Slot::Stale => s.field("encoded", &"<stale>"),
        };
        s.finish()
    }
}

impl<T, PT> PersistedValue<T, PT> {
    pub fn is_decoded_fresh(&self) -> bool {
        self.decoded.is_fresh()
    }
    pub fn is_encoded_fresh(&self) -> bool {
        self.encoded.is_fresh()
    }
}

// ------------- JSON persister -------------
/// Stores any value as JSON text. Decoding yields the generic shape JSON can
/// express: integers as bigint, other numbers as double, arrays as lists and
/// objects as text-keyed maps.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPersister;

impl JsonPersister {
    fn to_json(value: &Value) -> serde_json::Value {
        use serde_json::Value as J;
        match value {
            Value::Null => J::Null,
            Value::Boolean(b) => J::Bool(*b),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                J::from(value.as_i64().unwrap_or_default())
            }
            Value::Float(x) => J::from(f64::from(*x)),
            Value::Double(x) => J::from(*x),
            Value::List(items) | Value::Set(items) => J::Array(items.iter().map(Self::to_json).collect()),
            Value::Map(entries) => J::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), Self::to_json(v)))
                    .collect(),
            ),
            Value::Udt(fields) => J::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::to_json(v)))
                    .collect(),
            ),
            other => J::String(other.to_string()),
        }
    }
    fn from_json(json: serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::Null,
            J::Bool(b) => Value::Boolean(b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::BigInt(i),
                None => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::Text(s),
            J::Array(items) => Value::List(items.into_iter().map(Self::from_json).collect()),
            J::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (Value::Text(k), Self::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl Persister<Value, Value> for JsonPersister {
    fn name(&self) -> &str {
        "json"
    }
    fn encode(&self, value: &Value) -> Result<Value, PersisterError> {
        Ok(Value::Text(serde_json::to_string(&Self::to_json(value))?))
    }
    fn decode(&self, persisted: &Value) -> Result<Value, PersisterError> {
        match persisted {
            Value::Text(s) => Ok(Self::from_json(serde_json::from_str(s)?)),
            other => Err(format!("expected json text, got {}", other.kind()).into()),
        }
    }
}
