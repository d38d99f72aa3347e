use std::sync::Arc;

use super::{leaf_executable, ClauseBearing, Core, Fragment, Grouping, Target};
use crate::clause::{render_all, Clause};
use crate::error::{MapperError, Result};
use crate::metadata::{EntityDescriptor, TableDescriptor};
use crate::render::identifier;
use crate::schema::{ObjectRef, SortOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Columns(Vec<String>),
    Count,
}

#[derive(Debug, Clone)]
pub struct Select {
    pub(crate) core: Core,
    target: Target,
    clauses: Vec<Clause>,
    projection: Projection,
    distinct: bool,
    ordering: Vec<(String, SortOrder)>,
    limit: Option<u32>,
    allow_filtering: bool,
}

impl Select {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            clauses: Vec::new(),
            projection: Projection::All,
            distinct: false,
            ordering: Vec::new(),
            limit: None,
            allow_filtering: false,
        })
    }

    pub fn entity(&self) -> &Arc<EntityDescriptor> {
        &self.target.entity
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.projection = Projection::Columns(columns.iter().map(|c| (*c).to_owned()).collect());
        self.core.invalidate();
        self
    }
    pub fn count(mut self) -> Self {
        self.projection = Projection::Count;
        self.core.invalidate();
        self
    }
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self.core.invalidate();
        self
    }
    pub fn order_by(mut self, column: &str, order: SortOrder) -> Self {
        self.ordering.push((column.to_owned(), order));
        self.core.invalidate();
        self
    }
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self.core.invalidate();
        self
    }
    pub fn allow_filtering(mut self) -> Self {
        self.allow_filtering = true;
        self.core.invalidate();
        self
    }

    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }

    fn check(&self) -> Result<()> {
        let table = &self.target.table;
        if let Projection::Columns(columns) = &self.projection {
            if columns.is_empty() {
                return Err(MapperError::validation("empty column selection"));
            }
            for column in columns {
                if !table.has_column(column) {
                    return Err(MapperError::validation(format!(
                        "unknown column '{}' in table '{}'",
                        column,
                        table.name()
                    )));
                }
            }
        }
        for (column, _) in &self.ordering {
            let clustering = table.column(column).is_some_and(|c| c.is_clustering_key());
            if !clustering {
                return Err(MapperError::validation(format!(
                    "ORDER BY needs a clustering column, '{}' is not one",
                    column
                )));
            }
        }
        if self.limit == Some(0) {
            return Err(MapperError::validation("LIMIT must be positive"));
        }
        Ok(())
    }

    fn render(&self) -> Result<Vec<Fragment>> {
        self.check()?;
        let target = &self.target;
        let mut clauses = self.clauses.clone();
        // a variant shares its root's table and only sees its own rows
        if let (Some(type_value), Some(type_key)) = (target.entity.type_value(), target.table.type_key()) {
            clauses.push(Clause::eq(type_key.name(), type_value));
        }
        let prebound = target.prebind(&clauses)?;
        target.fragments(&clauses, |context, table| {
            let restrictions = target.resolve(&clauses, &prebound, context)?;
            let mut text = String::from("SELECT ");
            if self.distinct {
                text.push_str("DISTINCT ");
            }
            match &self.projection {
                Projection::All => text.push('*'),
                Projection::Count => text.push_str("COUNT(*)"),
                Projection::Columns(columns) => {
                    let names: Vec<String> = columns.iter().map(|c| identifier(c)).collect();
                    text.push_str(&names.join(","));
                }
            }
            text.push_str(" FROM ");
            text.push_str(table);
            if !restrictions.is_empty() {
                text.push_str(" WHERE ");
                render_all(&restrictions, &target.table, &mut text)?;
            }
            if !self.ordering.is_empty() {
                let order: Vec<String> = self
                    .ordering
                    .iter()
                    .map(|(c, o)| format!("{} {}", identifier(c), o.keyword()))
                    .collect();
                text.push_str(" ORDER BY ");
                text.push_str(&order.join(","));
            }
            if let Some(limit) = self.limit {
                text.push_str(&format!(" LIMIT {}", limit));
            }
            if self.allow_filtering {
                text.push_str(" ALLOW FILTERING");
            }
            Ok(vec![text])
        })
    }
}

impl ClauseBearing for Select {
    fn where_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self.core.invalidate();
        self
    }
}

leaf_executable!(Select);
