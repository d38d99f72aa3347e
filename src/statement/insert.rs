use std::sync::Arc;

use super::{leaf_executable, using, Core, Fragment, Grouping, Target, UsingBearing};
use crate::codec::ColumnValue;
use crate::context::SuffixBinding;
use crate::datatype::Value;
use crate::error::{MapperError, Result};
use crate::metadata::{ColumnDescriptor, EntityDescriptor, TableDescriptor};
use crate::render::{identifier, write_literal};
use crate::schema::ObjectRef;

/// INSERT of the bound object's columns, plus explicitly set values.
#[derive(Debug, Clone)]
pub struct Insert {
    pub(crate) core: Core,
    target: Target,
    values: Vec<(String, Value)>,
    if_not_exists: bool,
    ttl: Option<u32>,
    timestamp: Option<i64>,
}

impl Insert {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            values: Vec::new(),
            if_not_exists: false,
            ttl: None,
            timestamp: None,
        })
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.target.entity
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }

    /// Sets a column explicitly, overriding the object's value.
    pub fn value(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.values.retain(|(c, _)| c != column);
        self.values.push((column.to_owned(), value.into()));
        self.core.invalidate();
        self
    }
    /// Binds a suffix key; needed when no object is bound.
    pub fn suffix(mut self, suffix: &str, value: impl Into<Value>) -> Self {
        self.values.retain(|(c, _)| c != suffix);
        self.values.push((suffix.to_owned(), value.into()));
        self.core.invalidate();
        self
    }
    pub fn if_not_exists(mut self) -> Self {
        self.if_not_exists = true;
        self.core.invalidate();
        self
    }
    pub fn using_ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self.core.invalidate();
        self
    }

    fn grouping(&self) -> Grouping {
        Grouping::Batch
    }

    // Column values for one candidate: the object's, then explicit ones on top.
    fn row(&self, object_values: Vec<(Arc<ColumnDescriptor>, Value)>) -> Result<Vec<(Arc<ColumnDescriptor>, Value)>> {
        let table = &self.target.table;
        let mut row = object_values;
        for (name, value) in &self.values {
            if self.target.entity.suffix(name).is_some() && !table.has_column(name) {
                continue;
            }
            let column = table.column(name).ok_or_else(|| {
                MapperError::validation(format!("unknown column '{}' in table '{}'", name, table.name()))
            })?;
            if !column.field().data_type().accepts(value) {
                return Err(MapperError::validation(format!(
                    "column '{}' of type {} cannot hold {:?}",
                    name,
                    column.field().data_type(),
                    value
                )));
            }
            row.retain(|(c, _)| c.name() != name);
            row.push((Arc::clone(column), value.clone()));
        }
        if let (Some(type_value), Some(type_key)) = (self.target.entity.type_value(), table.type_key()) {
            row.retain(|(c, _)| !c.is_type_key());
            row.push((Arc::clone(type_key), Value::Text(type_value.to_owned())));
        }
        for column in table.columns() {
            let value = row.iter().find(|(c, _)| c.name() == column.name()).map(|(_, v)| v);
            let missing = value.is_none_or(Value::is_null);
            if missing && column.rejects_null() {
                return Err(MapperError::validation(format!("column '{}' cannot be null", column.name())));
            }
        }
        row.retain(|(c, v)| !(v.is_null() || c.is_counter()));
        // keep table order for stable text
        row.sort_by_key(|(c, _)| table.columns().iter().position(|t| t.name() == c.name()));
        Ok(row)
    }

    // One row per combination of multi-key elements.
    fn expand(row: Vec<(Arc<ColumnDescriptor>, Value)>) -> Result<Vec<Vec<(Arc<ColumnDescriptor>, Value)>>> {
        let mut rows = vec![Vec::with_capacity(row.len())];
        for (column, value) in row {
            if !column.is_multi_key() {
                for r in rows.iter_mut() {
                    r.push((Arc::clone(&column), value.clone()));
                }
                continue;
            }
            let elements = value.elements().map(<[Value]>::to_vec).unwrap_or_else(|| vec![value.clone()]);
            if elements.is_empty() {
                return Err(MapperError::validation(format!(
                    "multi-key column '{}' has no elements",
                    column.name()
                )));
            }
            let mut expanded = Vec::with_capacity(rows.len() * elements.len());
            for r in &rows {
                for element in &elements {
                    let mut next = r.clone();
                    next.push((Arc::clone(&column), element.clone()));
                    expanded.push(next);
                }
            }
            rows = expanded;
        }
        Ok(rows)
    }

    fn render(&self) -> Result<Vec<Fragment>> {
        let mut target = self.target.clone();
        for (name, value) in &self.values {
            if target.entity.suffix(name).is_some() {
                target.context.bind(name, SuffixBinding::One(value.clone()))?;
            }
        }
        let has_object = target.context.object().is_some();
        target.fragments(&[], |context, table| {
            let from_object = if has_object {
                context.object_values(&target.table, None)?
            } else {
                Vec::new()
            };
            let row = self.row(from_object)?;
            if row.is_empty() {
                return Err(MapperError::validation("nothing to insert"));
            }
            let mut texts = Vec::new();
            for row in Self::expand(row)? {
                let names: Vec<String> = row.iter().map(|(c, _)| identifier(c.name())).collect();
                let mut text = format!("INSERT INTO {} ({}) VALUES (", table, names.join(","));
                for (i, (column, value)) in row.into_iter().enumerate() {
                    if i > 0 {
                        text.push(',');
                    }
                    let stored = if column.is_multi_key() {
                        value
                    } else {
                        ColumnValue::for_field(column.field(), value).encoded()?
                    };
                    write_literal(&mut text, &stored)?;
                }
                text.push(')');
                if self.if_not_exists {
                    text.push_str(" IF NOT EXISTS");
                }
                text.push_str(&using(self.ttl, self.timestamp));
                texts.push(text);
            }
            Ok(texts)
        })
    }
}

impl UsingBearing for Insert {
    fn using_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self.core.invalidate();
        self
    }
}

leaf_executable!(Insert);
