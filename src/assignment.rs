//! SET clauses of an UPDATE.

use std::sync::Arc;

use crate::clause::{BoundClause, BoundOperand};
use crate::codec::ColumnValue;
use crate::context::BoundContext;
use crate::datatype::{DataTypeDefinition, Value};
use crate::error::{MapperError, Result};
use crate::metadata::{ColumnDescriptor, TableDescriptor};
use crate::render::{identifier, write_literal};
use crate::schema::ObjectRef;

#[derive(Debug, Clone)]
pub enum DelayedAssignment {
    /// `column = <the object's current value>`.
    SetFrom { column: String, source: Option<ObjectRef> },
    /// Every non-key column of the target table, from the object.
    SetAllFrom { source: Option<ObjectRef> },
}

#[derive(Debug, Clone)]
pub enum Assignment {
    Set(String, Value),
    /// Sets `value` only if the column currently holds `old`.
    Replace { column: String, value: Value, old: Value },
    Incr(String, i64),
    Decr(String, i64),
    Prepend(String, Value),
    Append(String, Value),
    SetIdx(String, usize, Value),
    Add(String, Value),
    Remove(String, Value),
    Put(String, Value, Value),
    Delayed(DelayedAssignment),
}

impl Assignment {
    pub fn set(column: &str, value: impl Into<Value>) -> Self {
        Assignment::Set(column.to_owned(), value.into())
    }
    pub fn replace(column: &str, value: impl Into<Value>, old: impl Into<Value>) -> Self {
        Assignment::Replace {
            column: column.to_owned(),
            value: value.into(),
            old: old.into(),
        }
    }
    pub fn incr(column: &str, by: i64) -> Self {
        Assignment::Incr(column.to_owned(), by)
    }
    pub fn decr(column: &str, by: i64) -> Self {
        Assignment::Decr(column.to_owned(), by)
    }
    pub fn prepend(column: &str, items: Vec<Value>) -> Self {
        Assignment::Prepend(column.to_owned(), Value::List(items))
    }
    pub fn append(column: &str, items: Vec<Value>) -> Self {
        Assignment::Append(column.to_owned(), Value::List(items))
    }
    pub fn set_idx(column: &str, index: usize, value: impl Into<Value>) -> Self {
        Assignment::SetIdx(column.to_owned(), index, value.into())
    }
    pub fn add(column: &str, items: Vec<Value>) -> Self {
        Assignment::Add(column.to_owned(), Value::Set(items))
    }
    pub fn remove(column: &str, items: Vec<Value>) -> Self {
        Assignment::Remove(column.to_owned(), Value::Set(items))
    }
    pub fn put(column: &str, key: impl Into<Value>, value: impl Into<Value>) -> Self {
        Assignment::Put(column.to_owned(), key.into(), value.into())
    }
    pub fn set_from_bound(column: &str) -> Self {
        Assignment::Delayed(DelayedAssignment::SetFrom {
            column: column.to_owned(),
            source: None,
        })
    }
    pub fn set_from(column: &str, source: impl Into<ObjectRef>) -> Self {
        Assignment::Delayed(DelayedAssignment::SetFrom {
            column: column.to_owned(),
            source: Some(source.into()),
        })
    }
    pub fn set_all_from_bound() -> Self {
        Assignment::Delayed(DelayedAssignment::SetAllFrom { source: None })
    }
    pub fn set_all_from(source: impl Into<ObjectRef>) -> Self {
        Assignment::Delayed(DelayedAssignment::SetAllFrom {
            source: Some(source.into()),
        })
    }

    pub fn is_delayed(&self) -> bool {
        matches!(self, Assignment::Delayed(_))
    }
    pub fn is_counter(&self) -> bool {
        matches!(self, Assignment::Incr(_, _) | Assignment::Decr(_, _))
    }

    /// Binds a concrete assignment to `table`.
    pub fn bind(&self, table: &TableDescriptor) -> Result<BoundAssignment> {
        let name = match self {
            Assignment::Set(c, _)
            | Assignment::Replace { column: c, .. }
            | Assignment::Incr(c, _)
            | Assignment::Decr(c, _)
            | Assignment::Prepend(c, _)
            | Assignment::Append(c, _)
            | Assignment::SetIdx(c, _, _)
            | Assignment::Add(c, _)
            | Assignment::Remove(c, _)
            | Assignment::Put(c, _, _) => c,
            Assignment::Delayed(_) => return Err(MapperError::validation("delayed assignment needs a bound object")),
        };
        let column = table.column(name).cloned().ok_or_else(|| {
            MapperError::validation(format!("unknown column '{}' in table '{}'", name, table.name()))
        })?;
        let plain = |v: &Value| ColumnValue::Plain(v.clone());
        let operation = match self {
            Assignment::Set(_, v) => Operation::Set(ColumnValue::for_field(column.field(), v.clone())),
            Assignment::Replace { value, old, .. } => Operation::Replace {
                value: ColumnValue::for_field(column.field(), value.clone()),
                old: ColumnValue::for_field(column.field(), old.clone()),
            },
            Assignment::Incr(_, by) => Operation::Incr(*by),
            Assignment::Decr(_, by) => Operation::Decr(*by),
            Assignment::Prepend(_, v) => Operation::Prepend(plain(v)),
            Assignment::Append(_, v) => Operation::Append(plain(v)),
            Assignment::SetIdx(_, i, v) => Operation::SetIdx(*i, plain(v)),
            Assignment::Add(_, v) => Operation::Add(plain(v)),
            Assignment::Remove(_, v) => Operation::Remove(plain(v)),
            Assignment::Put(_, k, v) => Operation::Put(plain(k), plain(v)),
            Assignment::Delayed(_) => return Err(MapperError::validation("delayed assignment needs a bound object")),
        };
        let bound = BoundAssignment { column, operation };
        bound.validate(table)?;
        Ok(bound)
    }

    /// Expands a delayed assignment against a bound context. Columns missing
    /// from the target table are skipped, as are key columns.
    pub fn resolve(&self, table: &TableDescriptor, context: &BoundContext) -> Result<Vec<BoundAssignment>> {
        let Assignment::Delayed(delayed) = self else {
            return Ok(vec![self.bind(table)?]);
        };
        let (wanted, source) = match delayed {
            DelayedAssignment::SetFrom { column, source } => {
                if !table.has_column(column) {
                    return Ok(Vec::new());
                }
                (Some(column.as_str()), source.as_ref())
            }
            DelayedAssignment::SetAllFrom { source } => (None, source.as_ref()),
        };
        let mut bound = Vec::new();
        for (column, value) in context.object_values(table, source)? {
            if wanted.is_some_and(|w| w != column.name()) {
                continue;
            }
            if column.is_primary_key() || column.is_type_key() || column.is_counter() {
                continue;
            }
            let assignment = BoundAssignment {
                operation: Operation::Set(ColumnValue::for_field(column.field(), value)),
                column,
            };
            assignment.validate(table)?;
            bound.push(assignment);
        }
        Ok(bound)
    }
}

// ------------- Bound assignments -------------
#[derive(Debug, Clone)]
pub enum Operation {
    Set(ColumnValue),
    Replace { value: ColumnValue, old: ColumnValue },
    Incr(i64),
    Decr(i64),
    Prepend(ColumnValue),
    Append(ColumnValue),
    SetIdx(usize, ColumnValue),
    Add(ColumnValue),
    Remove(ColumnValue),
    Put(ColumnValue, ColumnValue),
}

#[derive(Debug, Clone)]
pub struct BoundAssignment {
    column: Arc<ColumnDescriptor>,
    operation: Operation,
}

fn invalid(column: &ColumnDescriptor, message: &str) -> MapperError {
    MapperError::validation(format!("column '{}': {}", column.name(), message))
}

impl BoundAssignment {
    pub fn column(&self) -> &Arc<ColumnDescriptor> {
        &self.column
    }
    pub fn operation(&self) -> &Operation {
        &self.operation
    }
    pub fn is_counter(&self) -> bool {
        matches!(self.operation, Operation::Incr(_) | Operation::Decr(_))
    }

    /// The IF condition a Replace contributes.
    pub fn condition(&self) -> Option<BoundClause> {
        match &self.operation {
            Operation::Replace { old, .. } => Some(BoundClause::new(Arc::clone(&self.column), BoundOperand::Eq(old.clone()))),
            _ => None,
        }
    }

    fn check(&self, value: &ColumnValue) -> Result<()> {
        let column = &self.column;
        let decoded = value.decoded()?;
        if decoded.is_null() && column.rejects_null() {
            return Err(invalid(column, "cannot be null"));
        }
        if !column.value_type().accepts(&decoded) {
            return Err(invalid(column, &format!("{} cannot hold {:?}", column.value_type(), decoded)));
        }
        Ok(())
    }

    fn check_collection(&self, value: &ColumnValue, list_only: bool) -> Result<()> {
        let column = &self.column;
        if column.field().persister().is_some() {
            return Err(invalid(column, "collection operations are not available on persisted columns"));
        }
        let declared = column.value_type();
        let element = match declared {
            DataTypeDefinition::List(e) => e,
            DataTypeDefinition::Set(e) if !list_only => e,
            other => return Err(invalid(column, &format!("operation not valid on {}", other))),
        };
        let items = value
            .decoded()?
            .elements()
            .map(<[Value]>::to_vec)
            .ok_or_else(|| invalid(column, "expects a collection of elements"))?;
        for item in &items {
            if item.is_null() {
                return Err(invalid(column, "collection elements cannot be null"));
            }
            if !element.accepts(item) {
                return Err(invalid(column, &format!("element {:?} is not {}", item, element)));
            }
        }
        Ok(())
    }

    pub fn validate(&self, table: &TableDescriptor) -> Result<()> {
        let column = &self.column;
        if !table.has_column(column.name()) {
            return Err(MapperError::validation(format!(
                "unknown column '{}' in table '{}'",
                column.name(),
                table.name()
            )));
        }
        if column.is_primary_key() {
            return Err(invalid(column, "primary-key columns cannot be assigned"));
        }
        if column.is_counter() && !self.is_counter() {
            return Err(invalid(column, "counter columns only take increments"));
        }
        match &self.operation {
            Operation::Set(v) => self.check(v),
            Operation::Replace { value, old } => {
                self.check(value)?;
                self.check(old)
            }
            Operation::Incr(_) | Operation::Decr(_) => {
                if column.is_counter() {
                    Ok(())
                } else {
                    Err(invalid(column, "increments need a counter column"))
                }
            }
            Operation::Prepend(v) | Operation::Append(v) => self.check_collection(v, true),
            Operation::Add(v) | Operation::Remove(v) => self.check_collection(v, false),
            Operation::SetIdx(_, v) => {
                let DataTypeDefinition::List(element) = column.value_type() else {
                    return Err(invalid(column, "indexed assignment needs a list column"));
                };
                let decoded = v.decoded()?;
                if decoded.is_null() || !element.accepts(&decoded) {
                    return Err(invalid(column, &format!("list element {:?} is not {}", decoded, element)));
                }
                Ok(())
            }
            Operation::Put(k, v) => {
                let DataTypeDefinition::Map(key_type, value_type) = column.value_type() else {
                    return Err(invalid(column, "put needs a map column"));
                };
                let (key, value) = (k.decoded()?, v.decoded()?);
                if key.is_null() || value.is_null() {
                    return Err(invalid(column, "map entries cannot be null"));
                }
                if !key_type.accepts(&key) || !value_type.accepts(&value) {
                    return Err(invalid(column, &format!("entry {:?}:{:?} is not {}", key, value, column.value_type())));
                }
                Ok(())
            }
        }
    }

    pub fn render_into(&self, _table: &TableDescriptor, buf: &mut String) -> Result<()> {
        let name = identifier(self.column.name());
        if let Operation::SetIdx(index, v) = &self.operation {
            buf.push_str(&format!("{}[{}]=", name, index));
            return write_literal(buf, &v.encoded()?);
        }
        buf.push_str(&name);
        buf.push('=');
        match &self.operation {
            Operation::Set(v) | Operation::Replace { value: v, .. } => write_literal(buf, &v.encoded()?)?,
            Operation::Incr(by) => buf.push_str(&format!("{}+{}", name, by)),
            Operation::Decr(by) => buf.push_str(&format!("{}-{}", name, by)),
            Operation::Prepend(v) => {
                write_literal(buf, &v.encoded()?)?;
                buf.push('+');
                buf.push_str(&name);
            }
            Operation::Append(v) => {
                buf.push_str(&name);
                buf.push('+');
                write_literal(buf, &v.encoded()?)?;
            }
            Operation::Add(v) | Operation::Remove(v) => {
                let sign = if matches!(self.operation, Operation::Add(_)) { '+' } else { '-' };
                buf.push_str(&name);
                buf.push(sign);
                write_literal(buf, &as_collection_literal(self.column.value_type(), v.encoded()?))?;
            }
            Operation::Put(k, v) => {
                buf.push_str(&name);
                buf.push('+');
                write_literal(buf, &Value::Map(vec![(k.encoded()?, v.encoded()?)]))?;
            }
            Operation::SetIdx(_, _) => (),
        }
        Ok(())
    }
}

// Lists take `[..]`, sets take `{..}`, whatever shape the caller passed.
fn as_collection_literal(declared: &DataTypeDefinition, value: Value) -> Value {
    match (declared, value) {
        (DataTypeDefinition::List(_), Value::Set(items)) => Value::List(items),
        (DataTypeDefinition::Set(_), Value::List(items)) => Value::Set(items),
        (_, value) => value,
    }
}

pub fn render_all(assignments: &[BoundAssignment], table: &TableDescriptor, buf: &mut String) -> Result<()> {
    for (i, assignment) in assignments.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        assignment.render_into(table, buf)?;
    }
    Ok(())
}
