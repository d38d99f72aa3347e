//! Rows and result sequences as returned by the execution collaborator.

use std::any::{type_name, Any};
use std::collections::{BTreeMap, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::datatype::Value;
use crate::error::{MapperError, Result};
use crate::metadata::EntityDescriptor;
use crate::pending::Pending;
use crate::schema::Entity;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.columns.push((column.to_owned(), value.into()));
        self
    }
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }
    pub fn columns(&self) -> &[(String, Value)] {
        &self.columns
    }
    pub fn len(&self) -> usize {
        self.columns.len()
    }
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl From<Vec<(String, Value)>> for Row {
    fn from(columns: Vec<(String, Value)>) -> Self {
        Self { columns }
    }
}

/// A paged sequence of rows.
///
/// `one` and `is_exhausted` fetch the next page themselves when the current
/// one runs out; `available_without_fetching` never does.
pub trait ResultSet: Send {
    fn one(&mut self) -> Result<Option<Row>>;
    fn all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.one()? {
            rows.push(row);
        }
        Ok(rows)
    }
    fn is_exhausted(&mut self) -> bool;
    fn is_fully_fetched(&self) -> bool;
    fn available_without_fetching(&self) -> usize;
    fn fetch_more(&mut self) -> Pending<()>;
    /// Outcome of a conditional write; true for unconditional statements.
    fn was_applied(&self) -> bool;
    /// Fan-out branch the last row came from; always 0 for a single request.
    fn branch(&self) -> usize {
        0
    }
}

/// In-memory paged rows.
#[derive(Debug, Default)]
pub struct PagedRows {
    current: VecDeque<Row>,
    pages: VecDeque<Vec<Row>>,
    applied: bool,
}

impl PagedRows {
    pub fn new(rows: Vec<Row>) -> Self {
        Self::paged(vec![rows])
    }
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }
    /// First page is available immediately, later ones on fetch.
    pub fn paged(pages: Vec<Vec<Row>>) -> Self {
        let mut pages: VecDeque<Vec<Row>> = pages.into();
        let current = pages.pop_front().unwrap_or_default().into();
        Self {
            current,
            pages,
            applied: true,
        }
    }
    pub fn with_applied(mut self, applied: bool) -> Self {
        self.applied = applied;
        self
    }
    fn next_page(&mut self) {
        if let Some(page) = self.pages.pop_front() {
            self.current.extend(page);
        }
    }
}

impl ResultSet for PagedRows {
    fn one(&mut self) -> Result<Option<Row>> {
        while self.current.is_empty() && !self.pages.is_empty() {
            self.next_page();
        }
        Ok(self.current.pop_front())
    }
    fn is_exhausted(&mut self) -> bool {
        while self.current.is_empty() && !self.pages.is_empty() {
            self.next_page();
        }
        self.current.is_empty()
    }
    fn is_fully_fetched(&self) -> bool {
        self.pages.is_empty()
    }
    fn available_without_fetching(&self) -> usize {
        self.current.len()
    }
    fn fetch_more(&mut self) -> Pending<()> {
        self.next_page();
        Pending::ready(Ok(()))
    }
    fn was_applied(&self) -> bool {
        self.applied
    }
}

// ------------- Objects -------------
/// Objects decoded from the rows of a select, branch by branch.
pub struct ObjectSet<E> {
    rows: Box<dyn ResultSet>,
    entity: Arc<EntityDescriptor>,
    table: String,
    branch_suffixes: Vec<BTreeMap<String, Value>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> ObjectSet<E> {
    /// `branch_suffixes[i]` are the suffix values of fan-out branch `i`.
    pub fn new(
        rows: Box<dyn ResultSet>,
        entity: Arc<EntityDescriptor>,
        table: &str,
        branch_suffixes: Vec<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            rows,
            entity,
            table: table.to_owned(),
            branch_suffixes,
            _entity: PhantomData,
        }
    }

    /// Next object, of whatever concrete type its row decodes to.
    pub fn one_any(&mut self) -> Result<Option<Box<dyn Any + Send + Sync>>> {
        let Some(row) = self.rows.one()? else {
            return Ok(None);
        };
        let empty = BTreeMap::new();
        let suffixes = self.branch_suffixes.get(self.rows.branch()).unwrap_or(&empty);
        self.entity.decode_row(&self.table, &row, suffixes).map(Some)
    }

    pub fn one(&mut self) -> Result<Option<E>> {
        let Some(object) = self.one_any()? else {
            return Ok(None);
        };
        match object.downcast::<E>() {
            Ok(object) => Ok(Some(*object)),
            Err(_) => Err(MapperError::TypeMismatch {
                expected: type_name::<E>().to_owned(),
                found: "a row of another variant".to_owned(),
            }),
        }
    }

    pub fn all(&mut self) -> Result<Vec<E>> {
        let mut objects = Vec::new();
        while let Some(object) = self.one()? {
            objects.push(object);
        }
        Ok(objects)
    }

    pub fn was_applied(&self) -> bool {
        self.rows.was_applied()
    }
    /// The underlying rows.
    pub fn rows(&mut self) -> &mut dyn ResultSet {
        self.rows.as_mut()
    }
}

impl<E: Entity> Iterator for ObjectSet<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        self.one().transpose()
    }
}
