//! Statements and their compilation.
//!
//! Every statement is a builder owned by one caller. Fluent calls consume and
//! return it, and each one drops the compiled cache. Compilation resolves
//! suffix bindings into one [`BoundContext`] per candidate keyspace, renders
//! one fragment per surviving candidate and memoizes the outcome until the
//! next mutation or execution.
//!
//! A leaf that produced several fragments (a suffix fan-out) shows them
//! wrapped in a BATCH or SEQUENCE envelope, but executes each one as its own
//! request.

mod ddl;
mod delete;
mod group;
mod insert;
mod select;
mod update;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::clause::{BoundClause, Clause};
use crate::context::{BoundContext, Context};
use crate::datatype::Value;
use crate::error::{MapperError, Result};
use crate::executor::{Consistency, RequestOptions};
use crate::metadata::{EntityDescriptor, TableDescriptor};
use crate::render::qualified;
use crate::schema::ObjectRef;

pub use self::ddl::{CreateIndex, CreateKeyspace, CreateTable, CreateType, Truncate};
pub use self::delete::Delete;
pub use self::group::{Batch, BatchKind, Sequence};
pub use self::insert::Insert;
pub use self::select::{Projection, Select};
pub use self::update::Update;

// ------------- Compiled form -------------
/// One rendered leaf query, without its terminating `;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub keyspace: String,
    pub text: String,
    pub suffixes: BTreeMap<String, Value>,
}

/// How a compiled statement is submitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Nothing to run; every candidate was excluded.
    Empty,
    Single(String),
    /// One request per fragment, joined.
    FanOut(Vec<String>),
    /// Units run one after another.
    Sequence(Vec<Plan>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    text: Option<String>,
    fragments: Vec<Fragment>,
    plan: Plan,
    counter: bool,
}

/// Envelope for a leaf that fanned out into several fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Grouping {
    Batch,
    CounterBatch,
    Sequence,
}

impl Compiled {
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }
    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }
    pub fn plan(&self) -> &Plan {
        &self.plan
    }
    pub fn is_counter(&self) -> bool {
        self.counter
    }

    pub(crate) fn leaf(fragments: Vec<Fragment>, grouping: Grouping) -> Self {
        let counter = grouping == Grouping::CounterBatch;
        match fragments.len() {
            0 => Self {
                text: None,
                fragments,
                plan: Plan::Empty,
                counter,
            },
            1 => {
                let text = format!("{};", fragments[0].text);
                Self {
                    text: Some(text.clone()),
                    fragments,
                    plan: Plan::Single(text),
                    counter,
                }
            }
            _ => {
                let (begin, apply) = match grouping {
                    Grouping::Batch => ("BATCH", "BATCH"),
                    Grouping::CounterBatch => ("COUNTER BATCH", "BATCH"),
                    Grouping::Sequence => ("SEQUENCE", "SEQUENCE"),
                };
                let text = envelope(begin, "", apply, fragments.iter().map(|f| f.text.as_str()));
                let plan = Plan::FanOut(fragments.iter().map(|f| format!("{};", f.text)).collect());
                Self {
                    text: Some(text),
                    fragments,
                    plan,
                    counter,
                }
            }
        }
    }

    pub(crate) fn grouped(text: Option<String>, fragments: Vec<Fragment>, plan: Plan, counter: bool) -> Self {
        Self {
            text,
            fragments,
            plan,
            counter,
        }
    }
}

/// `BEGIN <begin><options> body; body; APPLY <apply>;`
pub(crate) fn envelope<'a>(begin: &str, options: &str, apply: &str, bodies: impl Iterator<Item = &'a str>) -> String {
    let mut text = format!("BEGIN {}{}", begin, options);
    for body in bodies {
        text.push(' ');
        text.push_str(body);
        text.push(';');
    }
    text.push_str(&format!(" APPLY {};", apply));
    text
}

#[derive(Debug, Clone, Default)]
pub(crate) enum QueryCache {
    #[default]
    Stale,
    Compiled(Arc<Compiled>),
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Core {
    pub(crate) options: RequestOptions,
    cache: QueryCache,
}

impl Core {
    pub(crate) fn invalidate(&mut self) {
        self.cache = QueryCache::Stale;
    }
    pub(crate) fn cached(&self) -> Option<Arc<Compiled>> {
        match &self.cache {
            QueryCache::Compiled(compiled) => Some(Arc::clone(compiled)),
            QueryCache::Stale => None,
        }
    }
    pub(crate) fn store(&mut self, compiled: Compiled) -> Arc<Compiled> {
        let compiled = Arc::new(compiled);
        self.cache = QueryCache::Compiled(Arc::clone(&compiled));
        compiled
    }
    pub(crate) fn is_compiled(&self) -> bool {
        matches!(self.cache, QueryCache::Compiled(_))
    }
}

// ------------- Target -------------
/// Entity, table and suffix context a leaf statement works on.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) entity: Arc<EntityDescriptor>,
    pub(crate) table: Arc<TableDescriptor>,
    pub(crate) context: Context,
}

impl Target {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        let table = match table {
            Some(name) => entity.table(name).cloned().ok_or_else(|| {
                MapperError::validation(format!("{} has no table '{}'", entity.type_name(), name))
            })?,
            None => entity
                .tables()
                .first()
                .cloned()
                .ok_or_else(|| MapperError::validation(format!("{} has no tables", entity.type_name())))?,
        };
        if table.is_keyless() {
            return Err(MapperError::validation(format!(
                "{} is a nested type and cannot be queried",
                entity.type_name()
            )));
        }
        let context = match object {
            Some(object) => Context::for_object(Arc::clone(&entity), object)?,
            None => Context::new(Arc::clone(&entity)),
        };
        Ok(Self { entity, table, context })
    }

    /// Candidate contexts, with suffix clauses folded into the bindings.
    pub(crate) fn bound_contexts(&self, clauses: &[Clause]) -> Result<Vec<BoundContext>> {
        let mut context = self.context.clone();
        for clause in clauses {
            if let Some((suffix, binding)) = clause.suffix_binding(&self.entity) {
                context.bind(&suffix, binding)?;
            }
        }
        context.bound_contexts()
    }

    /// Binds the concrete clauses once; delayed ones are left as `None`.
    pub(crate) fn prebind(&self, clauses: &[Clause]) -> Result<Vec<Option<Vec<BoundClause>>>> {
        clauses
            .iter()
            .map(|c| {
                if c.is_delayed() {
                    Ok(None)
                } else {
                    c.bind(&self.table, &self.entity).map(Some)
                }
            })
            .collect()
    }

    /// Clauses for one candidate, in declaration order.
    pub(crate) fn resolve(
        &self,
        clauses: &[Clause],
        prebound: &[Option<Vec<BoundClause>>],
        context: &BoundContext,
    ) -> Result<Vec<BoundClause>> {
        let mut resolved = Vec::new();
        for (clause, bound) in clauses.iter().zip(prebound) {
            match bound {
                Some(bound) => resolved.extend(bound.iter().cloned()),
                None => resolved.extend(clause.resolve(&self.table, context)?),
            }
        }
        Ok(resolved)
    }

    /// Renders one candidate per bound context; excluded candidates produce nothing.
    pub(crate) fn fragments<F>(&self, clauses: &[Clause], mut render: F) -> Result<Vec<Fragment>>
    where
        F: FnMut(&BoundContext, &str) -> Result<Vec<String>>,
    {
        self.keyspace_fragments(clauses, |context, keyspace| {
            render(context, &qualified(keyspace, self.table.name()))
        })
    }

    /// Like [`Target::fragments`], but hands the renderer the bare keyspace name.
    pub(crate) fn keyspace_fragments<F>(&self, clauses: &[Clause], mut render: F) -> Result<Vec<Fragment>>
    where
        F: FnMut(&BoundContext, &str) -> Result<Vec<String>>,
    {
        let mut fragments = Vec::new();
        for context in self.bound_contexts(clauses)? {
            let Some(keyspace) = context.keyspace()? else {
                continue;
            };
            for text in render(&context, &keyspace)? {
                fragments.push(Fragment {
                    keyspace: keyspace.clone(),
                    text,
                    suffixes: context.suffixes().clone(),
                });
            }
        }
        Ok(fragments)
    }
}

/// Checks every listed key column is pinned by `=` or `IN`.
pub(crate) fn require_restricted<'a>(
    keys: impl Iterator<Item = &'a Arc<crate::metadata::ColumnDescriptor>>,
    clauses: &[BoundClause],
    statement: &str,
) -> Result<()> {
    for key in keys {
        let pinned = clauses
            .iter()
            .any(|c| c.column().name() == key.name() && c.restricts_exactly());
        if !pinned {
            return Err(MapperError::validation(format!(
                "{} must restrict key column '{}'",
                statement,
                key.name()
            )));
        }
    }
    Ok(())
}

/// ` USING TTL n AND TIMESTAMP m`, or nothing.
pub(crate) fn using(ttl: Option<u32>, timestamp: Option<i64>) -> String {
    match (ttl, timestamp) {
        (Some(ttl), Some(ts)) => format!(" USING TTL {} AND TIMESTAMP {}", ttl, ts),
        (Some(ttl), None) => format!(" USING TTL {}", ttl),
        (None, Some(ts)) => format!(" USING TIMESTAMP {}", ts),
        (None, None) => String::new(),
    }
}

// ------------- Capabilities -------------
/// Compilation and pass-through options, shared by every statement.
pub trait Executable {
    /// Compiled form, from the cache when clean.
    fn compile(&mut self) -> Result<Arc<Compiled>>;
    fn options(&self) -> &RequestOptions;
    fn options_mut(&mut self) -> &mut RequestOptions;
    /// Drops the compiled cache.
    fn mark_dirty(&mut self);
    fn is_compiled(&self) -> bool;

    /// Query text; `None` when every candidate was excluded.
    fn query_string(&mut self) -> Result<Option<String>> {
        Ok(self.compile()?.text.clone())
    }
    /// Drops the cache after execution. Recompiling gives the same text.
    fn clear_cache(&mut self) {
        self.mark_dirty();
    }

    fn consistency(mut self, consistency: Consistency) -> Self
    where
        Self: Sized,
    {
        self.options_mut().consistency = Some(consistency);
        self
    }
    fn serial_consistency(mut self, consistency: Consistency) -> Self
    where
        Self: Sized,
    {
        self.options_mut().serial_consistency = Some(consistency);
        self
    }
    fn fetch_size(mut self, rows: u32) -> Self
    where
        Self: Sized,
    {
        self.options_mut().fetch_size = Some(rows);
        self
    }
    fn enable_tracing(mut self) -> Self
    where
        Self: Sized,
    {
        self.options_mut().tracing = true;
        self
    }
    fn idempotent(mut self, idempotent: bool) -> Self
    where
        Self: Sized,
    {
        self.options_mut().idempotent = Some(idempotent);
        self
    }
}

pub trait ClauseBearing: Sized {
    fn where_clause(self, clause: Clause) -> Self;
    fn and(self, clause: Clause) -> Self {
        self.where_clause(clause)
    }
    /// Binds a suffix key directly, as `where_clause(Clause::eq(suffix, value))` would.
    fn suffix(self, suffix: &str, value: impl Into<Value>) -> Self {
        self.where_clause(Clause::eq(suffix, value))
    }
    fn suffix_in<V: Into<Value>>(self, suffix: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.where_clause(Clause::is_in(suffix, values))
    }
}

pub trait AssignmentBearing: Sized {
    fn with(self, assignment: crate::assignment::Assignment) -> Self;
}

pub trait ConditionBearing: Sized {
    fn only_if(self, condition: Clause) -> Self;
    fn if_exists(self) -> Self;
}

pub trait UsingBearing: Sized {
    fn using_timestamp(self, micros: i64) -> Self;
}

// Leaf statements share this shape.
macro_rules! leaf_executable {
    ($kind:ty) => {
        impl $crate::statement::Executable for $kind {
            fn compile(&mut self) -> $crate::error::Result<std::sync::Arc<$crate::statement::Compiled>> {
                if let Some(compiled) = self.core.cached() {
                    return Ok(compiled);
                }
                let fragments = self.render()?;
                let compiled = $crate::statement::Compiled::leaf(fragments, self.grouping());
                Ok(self.core.store(compiled))
            }
            fn options(&self) -> &$crate::executor::RequestOptions {
                &self.core.options
            }
            fn options_mut(&mut self) -> &mut $crate::executor::RequestOptions {
                &mut self.core.options
            }
            fn mark_dirty(&mut self) {
                self.core.invalidate();
            }
            fn is_compiled(&self) -> bool {
                self.core.is_compiled()
            }
        }
    };
}
pub(crate) use leaf_executable;

// ------------- Tagged union -------------
#[derive(Debug, Clone)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Truncate(Truncate),
    Batch(Batch),
    Sequence(Sequence),
    CreateKeyspace(CreateKeyspace),
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    CreateType(CreateType),
}

macro_rules! each_statement {
    ($value:expr, $s:ident => $body:expr) => {
        match $value {
            Statement::Select($s) => $body,
            Statement::Insert($s) => $body,
            Statement::Update($s) => $body,
            Statement::Delete($s) => $body,
            Statement::Truncate($s) => $body,
            Statement::Batch($s) => $body,
            Statement::Sequence($s) => $body,
            Statement::CreateKeyspace($s) => $body,
            Statement::CreateTable($s) => $body,
            Statement::CreateIndex($s) => $body,
            Statement::CreateType($s) => $body,
        }
    };
}

impl Statement {
    /// Whether the statement may be part of a BATCH.
    pub fn is_batchable(&self) -> bool {
        matches!(
            self,
            Statement::Insert(_) | Statement::Update(_) | Statement::Delete(_) | Statement::Batch(_)
        )
    }
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::Select(_) => "select",
            Statement::Insert(_) => "insert",
            Statement::Update(_) => "update",
            Statement::Delete(_) => "delete",
            Statement::Truncate(_) => "truncate",
            Statement::Batch(_) => "batch",
            Statement::Sequence(_) => "sequence",
            Statement::CreateKeyspace(_) => "create keyspace",
            Statement::CreateTable(_) => "create table",
            Statement::CreateIndex(_) => "create index",
            Statement::CreateType(_) => "create type",
        }
    }
}

impl Executable for Statement {
    fn compile(&mut self) -> Result<Arc<Compiled>> {
        each_statement!(self, s => s.compile())
    }
    fn options(&self) -> &RequestOptions {
        each_statement!(self, s => s.options())
    }
    fn options_mut(&mut self) -> &mut RequestOptions {
        each_statement!(self, s => s.options_mut())
    }
    fn mark_dirty(&mut self) {
        each_statement!(self, s => s.mark_dirty())
    }
    fn is_compiled(&self) -> bool {
        each_statement!(self, s => s.is_compiled())
    }
    fn clear_cache(&mut self) {
        each_statement!(self, s => s.clear_cache())
    }
}

macro_rules! statement_from {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Statement {
                fn from(statement: $variant) -> Self {
                    Statement::$variant(statement)
                }
            }
        )*
    };
}

statement_from!(
    Select,
    Insert,
    Update,
    Delete,
    Truncate,
    Batch,
    Sequence,
    CreateKeyspace,
    CreateTable,
    CreateIndex,
    CreateType
);
