use std::sync::Arc;

use super::{
    leaf_executable, require_restricted, using, ClauseBearing, ConditionBearing, Core, Fragment, Grouping, Target,
    UsingBearing,
};
use crate::clause::{render_all, Clause};
use crate::error::{MapperError, Result};
use crate::metadata::{EntityDescriptor, TableDescriptor};
use crate::render::identifier;
use crate::schema::ObjectRef;

/// DELETE of rows, or of some columns of rows. Without explicit WHERE
/// clauses the bound object's primary key is used.
#[derive(Debug, Clone)]
pub struct Delete {
    pub(crate) core: Core,
    target: Target,
    columns: Vec<String>,
    clauses: Vec<Clause>,
    conditions: Vec<Clause>,
    if_exists: bool,
    timestamp: Option<i64>,
}

impl Delete {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            columns: Vec::new(),
            clauses: Vec::new(),
            conditions: Vec::new(),
            if_exists: false,
            timestamp: None,
        })
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.target.entity
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }

    /// Deletes only `column` rather than whole rows.
    pub fn column(mut self, column: &str) -> Self {
        self.columns.push(column.to_owned());
        self.core.invalidate();
        self
    }

    fn grouping(&self) -> Grouping {
        Grouping::Batch
    }

    fn render(&self) -> Result<Vec<Fragment>> {
        let target = &self.target;
        for column in &self.columns {
            match target.table.column(column) {
                Some(c) if c.is_primary_key() => {
                    return Err(MapperError::validation(format!("cannot delete key column '{}'", column)));
                }
                Some(_) => (),
                None => {
                    return Err(MapperError::validation(format!(
                        "unknown column '{}' in table '{}'",
                        column,
                        target.table.name()
                    )));
                }
            }
        }
        let explicit = self.clauses.iter().any(|c| c.suffix_binding(&target.entity).is_none());
        let mut clauses = self.clauses.clone();
        if !explicit && target.context.object().is_some() {
            clauses.push(Clause::key_of_bound());
        }
        let prebound = target.prebind(&clauses)?;
        let prebound_conditions = target.prebind(&self.conditions)?;
        target.fragments(&clauses, |context, table| {
            let restrictions = target.resolve(&clauses, &prebound, context)?;
            require_restricted(target.table.partition_keys().iter(), &restrictions, "DELETE")?;
            let conditions = target.resolve(&self.conditions, &prebound_conditions, context)?;
            let mut text = String::from("DELETE ");
            if !self.columns.is_empty() {
                let names: Vec<String> = self.columns.iter().map(|c| identifier(c)).collect();
                text.push_str(&names.join(","));
                text.push(' ');
            }
            text.push_str("FROM ");
            text.push_str(table);
            text.push_str(&using(None, self.timestamp));
            text.push_str(" WHERE ");
            render_all(&restrictions, &target.table, &mut text)?;
            if self.if_exists && !conditions.is_empty() {
                return Err(MapperError::validation("IF EXISTS cannot be combined with IF conditions"));
            }
            if self.if_exists {
                text.push_str(" IF EXISTS");
            } else if !conditions.is_empty() {
                text.push_str(" IF ");
                render_all(&conditions, &target.table, &mut text)?;
            }
            Ok(vec![text])
        })
    }
}

impl ClauseBearing for Delete {
    fn where_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self.core.invalidate();
        self
    }
}

impl ConditionBearing for Delete {
    fn only_if(mut self, condition: Clause) -> Self {
        self.conditions.push(condition);
        self.core.invalidate();
        self
    }
    fn if_exists(mut self) -> Self {
        self.if_exists = true;
        self.core.invalidate();
        self
    }
}

impl UsingBearing for Delete {
    fn using_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self.core.invalidate();
        self
    }
}

leaf_executable!(Delete);
