use std::sync::Arc;

use super::{leaf_executable, ClauseBearing, Core, Fragment, Grouping, Target};
use crate::clause::Clause;
use crate::error::{MapperError, Result};
use crate::metadata::{ColumnRole, EntityDescriptor, TableDescriptor};
use crate::render::{identifier, qualified, quote};
use crate::schema::{ObjectRef, Replication, SortOrder};

// Schema statements only accept suffix bindings in their WHERE position.
fn suffixes_only(clauses: &[Clause], entity: &EntityDescriptor, statement: &str) -> Result<()> {
    match clauses.iter().find(|c| c.suffix_binding(entity).is_none()) {
        Some(clause) => Err(MapperError::validation(format!(
            "{} only takes suffix bindings, not a clause on {:?}",
            statement,
            clause.column()
        ))),
        None => Ok(()),
    }
}

macro_rules! suffix_bearing {
    ($kind:ty) => {
        impl ClauseBearing for $kind {
            fn where_clause(mut self, clause: Clause) -> Self {
                self.suffixes.push(clause);
                self.core.invalidate();
                self
            }
        }
    };
}

fn replication_map(replication: &Replication) -> String {
    match replication {
        Replication::Simple { factor } => {
            format!("{{'class':'SimpleStrategy','replication_factor':{}}}", factor)
        }
        Replication::NetworkTopology(centers) => {
            let mut map = String::from("{'class':'NetworkTopologyStrategy'");
            for (center, factor) in centers {
                map.push_str(&format!(",{}:{}", quote(center), factor));
            }
            map.push('}');
            map
        }
    }
}

// ------------- Truncate -------------
#[derive(Debug, Clone)]
pub struct Truncate {
    pub(crate) core: Core,
    target: Target,
    suffixes: Vec<Clause>,
}

impl Truncate {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, None)?,
            suffixes: Vec::new(),
        })
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }
    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }
    fn render(&self) -> Result<Vec<Fragment>> {
        suffixes_only(&self.suffixes, &self.target.entity, "TRUNCATE")?;
        self.target
            .fragments(&self.suffixes, |_, table| Ok(vec![format!("TRUNCATE {}", table)]))
    }
}

suffix_bearing!(Truncate);
leaf_executable!(Truncate);

// ------------- Keyspace -------------
#[derive(Debug, Clone)]
pub struct CreateKeyspace {
    pub(crate) core: Core,
    target: Target,
    suffixes: Vec<Clause>,
    if_not_exists: bool,
}

impl CreateKeyspace {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, None, object)?,
            suffixes: Vec::new(),
            if_not_exists: true,
        })
    }
    /// `IF NOT EXISTS` is rendered unless turned off here.
    pub fn if_not_exists(mut self, enabled: bool) -> Self {
        self.if_not_exists = enabled;
        self.core.invalidate();
        self
    }
    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }
    fn render(&self) -> Result<Vec<Fragment>> {
        let entity = &self.target.entity;
        suffixes_only(&self.suffixes, entity, "CREATE KEYSPACE")?;
        let declared = entity
            .keyspace()
            .ok_or_else(|| MapperError::schema(entity.type_name(), "has no keyspace"))?;
        self.target.keyspace_fragments(&self.suffixes, |_, keyspace| {
            Ok(vec![format!(
                "CREATE KEYSPACE {}{} WITH replication = {} AND durable_writes = {}",
                if self.if_not_exists { "IF NOT EXISTS " } else { "" },
                identifier(keyspace),
                replication_map(declared.replication()),
                declared.durable_writes()
            )])
        })
    }
}

suffix_bearing!(CreateKeyspace);
leaf_executable!(CreateKeyspace);

// ------------- Table -------------
#[derive(Debug, Clone)]
pub struct CreateTable {
    pub(crate) core: Core,
    target: Target,
    suffixes: Vec<Clause>,
    if_not_exists: bool,
}

impl CreateTable {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            suffixes: Vec::new(),
            if_not_exists: true,
        })
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }
    pub fn if_not_exists(mut self, enabled: bool) -> Self {
        self.if_not_exists = enabled;
        self.core.invalidate();
        self
    }
    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }

    // Everything after the qualified table name.
    fn definition(table: &TableDescriptor) -> String {
        let mut columns: Vec<String> = table
            .columns()
            .iter()
            .map(|c| format!("{} {}", identifier(c.name()), c.data_type().cql_name()))
            .collect();
        let partition: Vec<String> = table.partition_keys().iter().map(|c| identifier(c.name())).collect();
        let mut key = if partition.len() == 1 {
            partition[0].clone()
        } else {
            format!("({})", partition.join(","))
        };
        for column in table.clustering_keys() {
            key.push(',');
            key.push_str(&identifier(column.name()));
        }
        columns.push(format!("PRIMARY KEY ({})", key));
        let mut text = format!(" ({})", columns.join(","));
        let descending = table
            .clustering_keys()
            .iter()
            .any(|c| matches!(c.role(), ColumnRole::ClusteringKey(_, SortOrder::Descending)));
        if descending {
            let order: Vec<String> = table
                .clustering_keys()
                .iter()
                .map(|c| {
                    let order = match c.role() {
                        ColumnRole::ClusteringKey(_, order) => order,
                        _ => SortOrder::Ascending,
                    };
                    format!("{} {}", identifier(c.name()), order.keyword())
                })
                .collect();
            text.push_str(&format!(" WITH CLUSTERING ORDER BY ({})", order.join(",")));
        }
        text
    }

    fn render(&self) -> Result<Vec<Fragment>> {
        suffixes_only(&self.suffixes, &self.target.entity, "CREATE TABLE")?;
        let definition = Self::definition(&self.target.table);
        self.target.fragments(&self.suffixes, |_, table| {
            Ok(vec![format!(
                "CREATE TABLE {}{}{}",
                if self.if_not_exists { "IF NOT EXISTS " } else { "" },
                table,
                definition
            )])
        })
    }
}

suffix_bearing!(CreateTable);
leaf_executable!(CreateTable);

// ------------- Index -------------
/// One CREATE INDEX per indexed column of the table. A table without
/// indexes compiles to nothing.
#[derive(Debug, Clone)]
pub struct CreateIndex {
    pub(crate) core: Core,
    target: Target,
    suffixes: Vec<Clause>,
    columns: Vec<String>,
}

impl CreateIndex {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            suffixes: Vec::new(),
            columns: Vec::new(),
        })
    }
    pub fn table(&self) -> &Arc<TableDescriptor> {
        &self.target.table
    }
    /// Limits creation to `column`; by default every indexed column is covered.
    pub fn column(mut self, column: &str) -> Self {
        self.columns.push(column.to_owned());
        self.core.invalidate();
        self
    }
    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }
    fn render(&self) -> Result<Vec<Fragment>> {
        let table = &self.target.table;
        suffixes_only(&self.suffixes, &self.target.entity, "CREATE INDEX")?;
        for column in &self.columns {
            if !table.column(column).is_some_and(|c| c.is_index()) {
                return Err(MapperError::validation(format!(
                    "'{}' is not an indexed column of table '{}'",
                    column,
                    table.name()
                )));
            }
        }
        let indexed: Vec<String> = table
            .indexes()
            .filter(|c| self.columns.is_empty() || self.columns.iter().any(|n| n == c.name()))
            .map(|c| c.name().to_owned())
            .collect();
        self.target.fragments(&self.suffixes, |_, qualified_table| {
            Ok(indexed
                .iter()
                .map(|column| {
                    format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                        identifier(&format!("{}_{}_idx", table.name(), column)),
                        qualified_table,
                        identifier(column)
                    )
                })
                .collect())
        })
    }
}

suffix_bearing!(CreateIndex);
leaf_executable!(CreateIndex);

// ------------- Type -------------
/// CREATE TYPE for a nested type, in the keyspace(s) of the owning entity.
#[derive(Debug, Clone)]
pub struct CreateType {
    pub(crate) core: Core,
    target: Target,
    udt: Arc<EntityDescriptor>,
    suffixes: Vec<Clause>,
}

impl CreateType {
    pub(crate) fn new(owner: Arc<EntityDescriptor>, udt: Arc<EntityDescriptor>, object: Option<ObjectRef>) -> Result<Self> {
        if !udt.is_udt() {
            return Err(MapperError::validation(format!("{} is not a nested type", udt.type_name())));
        }
        Ok(Self {
            core: Core::default(),
            target: Target::new(owner, None, object)?,
            udt,
            suffixes: Vec::new(),
        })
    }
    pub fn nested(&self) -> &Arc<EntityDescriptor> {
        &self.udt
    }
    fn grouping(&self) -> Grouping {
        Grouping::Sequence
    }
    fn render(&self) -> Result<Vec<Fragment>> {
        suffixes_only(&self.suffixes, &self.target.entity, "CREATE TYPE")?;
        let name = self.udt.udt_name().unwrap_or(self.udt.type_name());
        let fields: Vec<String> = self
            .udt
            .tables()
            .iter()
            .flat_map(|t| t.columns())
            .map(|c| format!("{} {}", identifier(c.name()), c.data_type().cql_name()))
            .collect();
        if fields.is_empty() {
            return Err(MapperError::schema(self.udt.type_name(), "nested type has no fields"));
        }
        self.target.keyspace_fragments(&self.suffixes, |_, keyspace| {
            Ok(vec![format!(
                "CREATE TYPE IF NOT EXISTS {} ({})",
                qualified(keyspace, name),
                fields.join(",")
            )])
        })
    }
}

suffix_bearing!(CreateType);
leaf_executable!(CreateType);
