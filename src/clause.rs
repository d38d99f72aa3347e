//! WHERE and IF clauses.
//!
//! A [`Clause`] is what callers build. Binding it to a table and a
//! [`BoundContext`] yields zero or more [`BoundClause`]s: concrete clauses
//! are validated and wrapped once, delayed ones read their values off a live
//! object first.

use std::sync::Arc;

use crate::codec::ColumnValue;
use crate::context::{BoundContext, SuffixBinding};
use crate::datatype::{DataTypeDefinition, Value};
use crate::error::{MapperError, Result};
use crate::metadata::{ColumnDescriptor, EntityDescriptor, TableDescriptor};
use crate::render::{identifier, write_literal};
use crate::schema::ObjectRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Relation {
    pub fn symbol(self) -> &'static str {
        match self {
            Relation::Lt => "<",
            Relation::Lte => "<=",
            Relation::Gt => ">",
            Relation::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyScope {
    Partition,
    Primary,
}

#[derive(Debug, Clone)]
pub enum DelayedClause {
    /// Restricts the key columns of the target table to the object's values.
    KeyOf { source: Option<ObjectRef>, scope: KeyScope },
    /// `column = <the object's current value>`.
    ColumnOf { column: String, source: Option<ObjectRef> },
}

#[derive(Debug, Clone)]
pub enum Clause {
    Eq(String, Value),
    In(String, Vec<Value>),
    Range(String, Relation, Value),
    Contains(String, Value),
    ContainsKey(String, Value),
    Delayed(DelayedClause),
}

impl Clause {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Clause::Eq(column.to_owned(), value.into())
    }
    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Clause::In(column.to_owned(), values.into_iter().map(Into::into).collect())
    }
    pub fn lt(column: &str, value: impl Into<Value>) -> Self {
        Clause::Range(column.to_owned(), Relation::Lt, value.into())
    }
    pub fn lte(column: &str, value: impl Into<Value>) -> Self {
        Clause::Range(column.to_owned(), Relation::Lte, value.into())
    }
    pub fn gt(column: &str, value: impl Into<Value>) -> Self {
        Clause::Range(column.to_owned(), Relation::Gt, value.into())
    }
    pub fn gte(column: &str, value: impl Into<Value>) -> Self {
        Clause::Range(column.to_owned(), Relation::Gte, value.into())
    }
    pub fn contains(column: &str, value: impl Into<Value>) -> Self {
        Clause::Contains(column.to_owned(), value.into())
    }
    pub fn contains_key(column: &str, value: impl Into<Value>) -> Self {
        Clause::ContainsKey(column.to_owned(), value.into())
    }
    /// Primary key of the bound object.
    pub fn key_of_bound() -> Self {
        Clause::Delayed(DelayedClause::KeyOf {
            source: None,
            scope: KeyScope::Primary,
        })
    }
    /// Primary key of `source`, which must be an instance of the statement's entity.
    pub fn key_of(source: impl Into<ObjectRef>) -> Self {
        Clause::Delayed(DelayedClause::KeyOf {
            source: Some(source.into()),
            scope: KeyScope::Primary,
        })
    }
    pub fn partition_of(source: impl Into<ObjectRef>) -> Self {
        Clause::Delayed(DelayedClause::KeyOf {
            source: Some(source.into()),
            scope: KeyScope::Partition,
        })
    }
    pub fn column_of_bound(column: &str) -> Self {
        Clause::Delayed(DelayedClause::ColumnOf {
            column: column.to_owned(),
            source: None,
        })
    }
    pub fn column_of(column: &str, source: impl Into<ObjectRef>) -> Self {
        Clause::Delayed(DelayedClause::ColumnOf {
            column: column.to_owned(),
            source: Some(source.into()),
        })
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            Clause::Eq(c, _)
            | Clause::In(c, _)
            | Clause::Range(c, _, _)
            | Clause::Contains(c, _)
            | Clause::ContainsKey(c, _) => Some(c),
            Clause::Delayed(DelayedClause::ColumnOf { column, .. }) => Some(column),
            Clause::Delayed(DelayedClause::KeyOf { .. }) => None,
        }
    }
    pub fn is_delayed(&self) -> bool {
        matches!(self, Clause::Delayed(_))
    }

    /// The suffix binding this clause stands for, if it names a suffix key.
    pub fn suffix_binding(&self, entity: &EntityDescriptor) -> Option<(String, SuffixBinding)> {
        match self {
            Clause::Eq(c, v) if entity.suffix(c).is_some() => Some((c.clone(), SuffixBinding::One(v.clone()))),
            Clause::In(c, vs) if entity.suffix(c).is_some() => Some((c.clone(), SuffixBinding::Many(vs.clone()))),
            _ => None,
        }
    }

    /// Resolves against `table`. Clauses naming only a suffix key resolve to nothing.
    pub fn bind(&self, table: &TableDescriptor, entity: &EntityDescriptor) -> Result<Vec<BoundClause>> {
        let column = match self.column() {
            Some(name) if self.is_delayed() => {
                return Err(MapperError::validation(format!("clause on '{}' needs a bound object", name)));
            }
            Some(name) => match table.column(name) {
                Some(column) => Arc::clone(column),
                None if entity.suffix(name).is_some() && self.suffix_binding(entity).is_some() => {
                    return Ok(Vec::new());
                }
                None => {
                    return Err(MapperError::validation(format!(
                        "unknown column '{}' in table '{}'",
                        name,
                        table.name()
                    )));
                }
            },
            None => return Err(MapperError::validation("key clause needs a bound object")),
        };
        let operand = match self {
            Clause::Eq(_, v) => BoundOperand::Eq(wrap(&column, v)),
            Clause::In(_, vs) => BoundOperand::In(vs.iter().map(|v| wrap(&column, v)).collect()),
            Clause::Range(_, r, v) => BoundOperand::Range(*r, wrap(&column, v)),
            Clause::Contains(_, v) => BoundOperand::Contains(ColumnValue::Plain(v.clone())),
            Clause::ContainsKey(_, v) => BoundOperand::ContainsKey(ColumnValue::Plain(v.clone())),
            Clause::Delayed(_) => return Ok(Vec::new()),
        };
        let bound = BoundClause::new(column, operand);
        bound.validate(table)?;
        Ok(vec![bound])
    }

    /// Resolves a delayed clause against a bound context; concrete clauses bind as usual.
    pub fn resolve(&self, table: &TableDescriptor, context: &BoundContext) -> Result<Vec<BoundClause>> {
        let Clause::Delayed(delayed) = self else {
            return self.bind(table, context.entity());
        };
        let mut bound = Vec::new();
        match delayed {
            DelayedClause::KeyOf { source, scope } => {
                let values = context.object_values(table, source.as_ref())?;
                let keys: Vec<&Arc<ColumnDescriptor>> = match scope {
                    KeyScope::Partition => table.partition_keys().iter().collect(),
                    KeyScope::Primary => table.primary_keys().collect(),
                };
                for key in keys {
                    let value = values
                        .iter()
                        .find(|(c, _)| c.name() == key.name())
                        .map(|(_, v)| v.clone())
                        .unwrap_or(Value::Null);
                    bound.push(key_clause(key, value));
                }
            }
            DelayedClause::ColumnOf { column, source } => {
                if !table.has_column(column) {
                    return Ok(bound);
                }
                let values = context.object_values(table, source.as_ref())?;
                if let Some((target, value)) = values.into_iter().find(|(c, _)| c.name() == column) {
                    bound.push(key_clause(&target, value));
                }
            }
        }
        for clause in &bound {
            clause.validate(table)?;
        }
        Ok(bound)
    }
}

fn wrap(column: &ColumnDescriptor, value: &Value) -> ColumnValue {
    if column.is_multi_key() {
        ColumnValue::Plain(value.clone())
    } else {
        ColumnValue::for_field(column.field(), value.clone())
    }
}

// A multi-key column holds a set on the object but one element per row.
fn key_clause(column: &Arc<ColumnDescriptor>, value: Value) -> BoundClause {
    let operand = match (column.is_multi_key(), value) {
        (true, Value::Set(items)) | (true, Value::List(items)) => {
            BoundOperand::In(items.into_iter().map(ColumnValue::Plain).collect())
        }
        (_, value) => BoundOperand::Eq(wrap(column, &value)),
    };
    BoundClause::new(Arc::clone(column), operand)
}

// ------------- Bound clauses -------------
#[derive(Debug, Clone)]
pub enum BoundOperand {
    Eq(ColumnValue),
    In(Vec<ColumnValue>),
    Range(Relation, ColumnValue),
    Contains(ColumnValue),
    ContainsKey(ColumnValue),
}

#[derive(Debug, Clone)]
pub struct BoundClause {
    column: Arc<ColumnDescriptor>,
    operand: BoundOperand,
}

impl BoundClause {
    pub(crate) fn new(column: Arc<ColumnDescriptor>, operand: BoundOperand) -> Self {
        Self { column, operand }
    }
    pub fn column(&self) -> &Arc<ColumnDescriptor> {
        &self.column
    }
    pub fn operand(&self) -> &BoundOperand {
        &self.operand
    }
    /// Equality or membership, the only relations that pin down a key column.
    pub fn restricts_exactly(&self) -> bool {
        matches!(self.operand, BoundOperand::Eq(_) | BoundOperand::In(_))
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
        let check = |value: &ColumnValue, expected: &DataTypeDefinition| -> Result<()> {
            let decoded = value.decoded()?;
            if decoded.is_null() && column.rejects_null() {
                return Err(MapperError::validation(format!("column '{}' cannot be null", column.name())));
            }
            if !expected.accepts(&decoded) {
                return Err(MapperError::validation(format!(
                    "column '{}' of type {} cannot be compared with {:?}",
                    column.name(),
                    expected,
                    decoded
                )));
            }
            Ok(())
        };
        match &self.operand {
            BoundOperand::Eq(v) | BoundOperand::Range(_, v) => check(v, column.value_type()),
            BoundOperand::In(vs) => {
                for v in vs {
                    if v.is_null() {
                        return Err(MapperError::validation(format!(
                            "IN on column '{}' cannot contain null",
                            column.name()
                        )));
                    }
                    check(v, column.value_type())?;
                }
                Ok(())
            }
            BoundOperand::Contains(v) => {
                let element = match column.value_type() {
                    DataTypeDefinition::List(e) | DataTypeDefinition::Set(e) | DataTypeDefinition::Map(_, e) => e,
                    other => {
                        return Err(MapperError::validation(format!(
                            "CONTAINS needs a collection column, '{}' is {}",
                            column.name(),
                            other
                        )));
                    }
                };
                if v.is_null() {
                    return Err(MapperError::validation("CONTAINS cannot test for null"));
                }
                check(v, element)
            }
            BoundOperand::ContainsKey(v) => {
                let DataTypeDefinition::Map(key, _) = column.value_type() else {
                    return Err(MapperError::validation(format!(
                        "CONTAINS KEY needs a map column, '{}' is {}",
                        column.name(),
                        column.value_type()
                    )));
                };
                if v.is_null() {
                    return Err(MapperError::validation("CONTAINS KEY cannot test for null"));
                }
                check(v, key)
            }
        }
    }

    pub fn render_into(&self, _table: &TableDescriptor, buf: &mut String) -> Result<()> {
        buf.push_str(&identifier(self.column.name()));
        match &self.operand {
            BoundOperand::Eq(v) => {
                buf.push('=');
                write_literal(buf, &v.encoded()?)?;
            }
            BoundOperand::In(vs) => {
                buf.push_str(" IN (");
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    write_literal(buf, &v.encoded()?)?;
                }
                buf.push(')');
            }
            BoundOperand::Range(r, v) => {
                buf.push_str(r.symbol());
                write_literal(buf, &v.encoded()?)?;
            }
            BoundOperand::Contains(v) => {
                buf.push_str(" CONTAINS ");
                write_literal(buf, &v.encoded()?)?;
            }
            BoundOperand::ContainsKey(v) => {
                buf.push_str(" CONTAINS KEY ");
                write_literal(buf, &v.encoded()?)?;
            }
        }
        Ok(())
    }
}

/// Renders `clauses` joined by ` AND `.
pub fn render_all(clauses: &[BoundClause], table: &TableDescriptor, buf: &mut String) -> Result<()> {
    for (i, clause) in clauses.iter().enumerate() {
        if i > 0 {
            buf.push_str(" AND ");
        }
        clause.render_into(table, buf)?;
    }
    Ok(())
}
