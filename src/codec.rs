//! Column-level encoding.
//!
//! A [`ColumnValue`] is what clauses and assignments carry once bound to a
//! column: either a plain value, or a [`PersistedValue`] for fields declared
//! with a persister. Persister failures surface as
//! [`MapperError::ValueCodec`] naming the field and the persister.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::datatype::Value;
use crate::error::{MapperError, PersisterError, Result};
use crate::metadata::FieldDescriptor;
use crate::persisted::PersistedValue;

#[derive(Clone)]
pub enum ColumnValue {
    Plain(Value),
    Persisted {
        field: String,
        cell: Arc<Mutex<PersistedValue<Value, Value>>>,
    },
}

fn codec_error(field: &str, persister: &str, source: PersisterError) -> MapperError {
    MapperError::ValueCodec {
        field: field.to_owned(),
        persister: persister.to_owned(),
        source,
    }
}

impl ColumnValue {
    /// Wraps a decoded field value, routing it through the field's persister if it has one.
    pub fn for_field(field: &FieldDescriptor, value: Value) -> Self {
        match field.persister() {
            Some(persister) => {
                let decoded = (!value.is_null()).then_some(value);
                ColumnValue::Persisted {
                    field: field.name().to_owned(),
                    cell: Arc::new(Mutex::new(PersistedValue::from_decoded(Arc::clone(persister), decoded))),
                }
            }
            None => ColumnValue::Plain(value),
        }
    }

    /// The value as stored, i.e. what gets rendered into query text.
    pub fn encoded(&self) -> Result<Value> {
        match self {
            ColumnValue::Plain(v) => Ok(v.clone()),
            ColumnValue::Persisted { field, cell } => {
                let mut pv = cell.lock()?;
                let name = pv.persister().name().to_owned();
                pv.encoded_value()
                    .map(|v| v.cloned().unwrap_or(Value::Null))
                    .map_err(|e| codec_error(field, &name, e))
            }
        }
    }
    /// The value as the field sees it.
    pub fn decoded(&self) -> Result<Value> {
        match self {
            ColumnValue::Plain(v) => Ok(v.clone()),
            ColumnValue::Persisted { field, cell } => {
                let mut pv = cell.lock()?;
                let name = pv.persister().name().to_owned();
                pv.decoded_value()
                    .map(|v| v.cloned().unwrap_or(Value::Null))
                    .map_err(|e| codec_error(field, &name, e))
            }
        }
    }
    pub fn is_null(&self) -> bool {
        match self {
            ColumnValue::Plain(v) => v.is_null(),
            ColumnValue::Persisted { cell, .. } => cell
                .lock()
                .map(|mut pv| matches!(pv.decoded_value(), Ok(None)))
                .unwrap_or(false),
        }
    }
}

impl fmt::Debug for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ColumnValue::Plain(v) => write!(f, "{:?}", v),
            ColumnValue::Persisted { field, cell } => match cell.lock() {
                Ok(pv) => write!(f, "{}: {:?}", field, *pv),
                Err(_) => write!(f, "{}: <poisoned>", field),
            },
        }
    }
}

/// Decodes a stored column value back into the field's value.
pub fn decode_column(field: &FieldDescriptor, stored: Value) -> Result<Value> {
    match field.persister() {
        Some(persister) if !stored.is_null() => {
            let mut pv = PersistedValue::from_encoded(Arc::clone(persister), Some(stored));
            pv.decoded_value()
                .map(|v| v.cloned().unwrap_or(Value::Null))
                .map_err(|e| codec_error(field.name(), persister.name(), e))
        }
        _ => Ok(stored),
    }
}
