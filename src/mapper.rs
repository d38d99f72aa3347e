//! The facade applications hold on to.
//!
//! A [`Mapper`] owns the executor, the descriptor cache and the request
//! defaults. It hands out statement builders and submits them, following the
//! compiled [`Plan`]: a single request, one request per fan-out branch joined
//! by a [`CompoundFuture`], or sequence units one after another.

use std::any::TypeId;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use tracing::{debug, trace};

use crate::clause::Clause;
use crate::config::MapperConfig;
use crate::error::{MapperError, Result};
use crate::executor::{Executor, Request, RequestOptions};
use crate::fanout::CompoundFuture;
use crate::keeper::DescriptorKeeper;
use crate::metadata::{DescriptorKind, EntityDescriptor};
use crate::pending::{Pending, Promise};
use crate::result::{ObjectSet, PagedRows, ResultSet};
use crate::schema::{Entity, ObjectRef};
use crate::statement::{
    Batch, ClauseBearing, CreateIndex, CreateKeyspace, CreateTable, CreateType, Delete, Executable, Insert, Plan,
    Select, Sequence, Truncate, Update,
};

type Rows = Box<dyn ResultSet>;

pub struct Mapper {
    executor: Arc<dyn Executor>,
    keeper: Arc<DescriptorKeeper>,
    config: MapperConfig,
}

impl Mapper {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self::with_config(executor, MapperConfig::default())
    }
    pub fn with_config(executor: Arc<dyn Executor>, config: MapperConfig) -> Self {
        Self {
            executor,
            keeper: Arc::new(DescriptorKeeper::new()),
            config,
        }
    }
    /// Shares a descriptor cache, typically one carrying table filters.
    pub fn with_keeper(mut self, keeper: Arc<DescriptorKeeper>) -> Self {
        self.keeper = keeper;
        self
    }
    pub fn keeper(&self) -> &Arc<DescriptorKeeper> {
        &self.keeper
    }
    pub fn config(&self) -> &MapperConfig {
        &self.config
    }
    pub fn descriptor<E: Entity>(&self) -> Result<Arc<EntityDescriptor>> {
        self.keeper.resolve::<E>()
    }

    // ------------- Statements -------------
    pub fn select<E: Entity>(&self) -> Result<Select> {
        Select::new(self.descriptor::<E>()?, None, None)
    }
    pub fn select_from<E: Entity>(&self, table: &str) -> Result<Select> {
        Select::new(self.descriptor::<E>()?, Some(table), None)
    }
    /// Select of the row holding `object`, by its primary key.
    pub fn select_object<E: Entity>(&self, object: &Arc<RwLock<E>>) -> Result<Select> {
        let select = Select::new(self.descriptor::<E>()?, None, Some(ObjectRef::new(object)))?;
        Ok(select.where_clause(Clause::key_of_bound()))
    }

    pub fn insert<E: Entity>(&self, object: &Arc<RwLock<E>>) -> Result<Insert> {
        Insert::new(self.descriptor::<E>()?, None, Some(ObjectRef::new(object)))
    }
    pub fn insert_in<E: Entity>(&self, object: &Arc<RwLock<E>>, table: &str) -> Result<Insert> {
        Insert::new(self.descriptor::<E>()?, Some(table), Some(ObjectRef::new(object)))
    }
    /// Insert built from explicit values only.
    pub fn insert_into<E: Entity>(&self, table: &str) -> Result<Insert> {
        Insert::new(self.descriptor::<E>()?, Some(table), None)
    }
    /// One insert per table of the entity, in a logged batch.
    pub fn insert_all<E: Entity>(&self, object: &Arc<RwLock<E>>) -> Result<Batch> {
        let entity = self.descriptor::<E>()?;
        let mut batch = Batch::new();
        for table in entity.tables() {
            batch = batch.add(Insert::new(
                Arc::clone(&entity),
                Some(table.name()),
                Some(ObjectRef::new(object)),
            )?);
        }
        Ok(batch)
    }

    pub fn update<E: Entity>(&self, object: &Arc<RwLock<E>>) -> Result<Update> {
        Update::new(self.descriptor::<E>()?, None, Some(ObjectRef::new(object)))
    }
    pub fn update_table<E: Entity>(&self, object: &Arc<RwLock<E>>, table: &str) -> Result<Update> {
        Update::new(self.descriptor::<E>()?, Some(table), Some(ObjectRef::new(object)))
    }
    /// Update restricted by explicit clauses only.
    pub fn update_where<E: Entity>(&self) -> Result<Update> {
        Update::new(self.descriptor::<E>()?, None, None)
    }

    pub fn delete<E: Entity>(&self, object: &Arc<RwLock<E>>) -> Result<Delete> {
        Delete::new(self.descriptor::<E>()?, None, Some(ObjectRef::new(object)))
    }
    pub fn delete_from<E: Entity>(&self) -> Result<Delete> {
        Delete::new(self.descriptor::<E>()?, None, None)
    }
    pub fn truncate<E: Entity>(&self) -> Result<Truncate> {
        Truncate::new(self.descriptor::<E>()?, None)
    }

    pub fn batch(&self) -> Batch {
        Batch::new()
    }
    pub fn sequence(&self) -> Sequence {
        Sequence::new()
    }

    pub fn create_keyspace<E: Entity>(&self) -> Result<CreateKeyspace> {
        CreateKeyspace::new(self.descriptor::<E>()?, None)
    }
    pub fn create_table<E: Entity>(&self, table: Option<&str>) -> Result<CreateTable> {
        CreateTable::new(self.descriptor::<E>()?, table, None)
    }
    pub fn create_index<E: Entity>(&self, table: Option<&str>) -> Result<CreateIndex> {
        CreateIndex::new(self.descriptor::<E>()?, table, None)
    }
    /// CREATE TYPE for `U`, in the keyspace of `E`.
    pub fn create_type<E: Entity, U: Entity>(&self) -> Result<CreateType> {
        CreateType::new(self.descriptor::<E>()?, self.descriptor::<U>()?, None)
    }

    /// Keyspace, nested types, tables, then indexes of `E`, with `suffixes`
    /// bound on every step.
    pub fn create_schema<E: Entity>(&self, suffixes: &[Clause]) -> Result<Sequence> {
        let entity = self.descriptor::<E>()?;
        if let DescriptorKind::Variant { root_name, .. } = entity.kind() {
            return Err(MapperError::validation(format!(
                "{} shares the tables of {}; create the schema through the root",
                entity.type_name(),
                root_name
            )));
        }
        let mut sequence = Sequence::new().add(with_suffixes(
            CreateKeyspace::new(Arc::clone(&entity), None)?,
            suffixes.to_vec(),
        ));
        for udt in entity.nested_types() {
            sequence = sequence.add(with_suffixes(
                CreateType::new(Arc::clone(&entity), udt, None)?,
                suffixes.to_vec(),
            ));
        }
        for table in entity.tables() {
            sequence = sequence.add(with_suffixes(
                CreateTable::new(Arc::clone(&entity), Some(table.name()), None)?,
                suffixes.to_vec(),
            ));
        }
        for table in entity.tables().iter().filter(|t| t.indexes().next().is_some()) {
            sequence = sequence.add(with_suffixes(
                CreateIndex::new(Arc::clone(&entity), Some(table.name()), None)?,
                suffixes.to_vec(),
            ));
        }
        Ok(sequence)
    }

    // ------------- Execution -------------
    /// Compiles and submits `statement`, then drops its compiled cache.
    pub fn execute_async(&self, statement: &mut impl Executable) -> Result<Pending<Rows>> {
        let compiled = statement.compile()?;
        let options = statement.options().or(&self.config.request_defaults());
        statement.clear_cache();
        Ok(submit(&self.executor, compiled.plan(), &options))
    }

    /// Blocks until the result is available.
    pub fn execute(&self, statement: &mut impl Executable) -> Result<Rows> {
        self.execute_async(statement)?.wait()
    }

    /// Runs `select` and decodes its rows into `E` objects.
    pub fn execute_objects<E: Entity>(&self, select: &mut Select) -> Result<ObjectSet<E>> {
        let entity = Arc::clone(select.entity());
        if !entity.is_instance(TypeId::of::<E>()) {
            return Err(MapperError::TypeMismatch {
                expected: entity.type_name().to_owned(),
                found: std::any::type_name::<E>().to_owned(),
            });
        }
        let table = select.table().name().to_owned();
        let branch_suffixes = select
            .compile()?
            .fragments()
            .iter()
            .map(|f| f.suffixes.clone())
            .collect();
        let rows = self.execute(select)?;
        Ok(ObjectSet::new(rows, entity, &table, branch_suffixes))
    }
}

fn with_suffixes<S: ClauseBearing>(statement: S, suffixes: Vec<Clause>) -> S {
    suffixes.into_iter().fold(statement, S::where_clause)
}

fn submit(executor: &Arc<dyn Executor>, plan: &Plan, options: &RequestOptions) -> Pending<Rows> {
    match plan {
        Plan::Empty => {
            debug!("nothing to submit, every candidate was excluded");
            Pending::ready(Ok(Box::new(PagedRows::empty())))
        }
        Plan::Single(query) => {
            trace!(query = %query, "submitting");
            executor.execute_async(Request {
                query: query.clone(),
                options: options.clone(),
            })
        }
        Plan::FanOut(queries) => {
            let branches = queries
                .iter()
                .map(|query| submit(executor, &Plan::Single(query.clone()), options))
                .collect();
            CompoundFuture::new(branches)
                .into_pending()
                .map(|joined| Ok(Box::new(joined) as Rows))
        }
        Plan::Sequence(units) => {
            let (promise, pending) = Pending::channel();
            run_units(Arc::clone(executor), units.iter().cloned().collect(), options.clone(), promise, None);
            pending
        }
    }
}

// Submits the next unit once the previous one completed; the last result wins.
fn run_units(
    executor: Arc<dyn Executor>,
    mut units: VecDeque<Plan>,
    options: RequestOptions,
    promise: Promise<Rows>,
    last: Option<Rows>,
) {
    if promise.is_cancelled() {
        return;
    }
    let Some(unit) = units.pop_front() else {
        promise.complete(Ok(last.unwrap_or_else(|| Box::new(PagedRows::empty()))));
        return;
    };
    let step = submit(&executor, &unit, &options);
    let current = step.clone();
    promise.set_canceller(move || current.cancel());
    let observed = step.clone();
    step.add_listener(move || match observed.try_take() {
        Ok(rows) => run_units(executor, units, options, promise, Some(rows)),
        Err(error) => {
            debug!(error = %error, remaining = units.len(), "sequence stopped");
            promise.complete(Err(error));
        }
    });
}
