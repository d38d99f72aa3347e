use std::sync::Arc;

use super::{envelope, Compiled, Core, Executable, Plan, Statement, UsingBearing};
use crate::error::{MapperError, Result};
use crate::executor::RequestOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchKind {
    #[default]
    Logged,
    Unlogged,
    Counter,
}

impl BatchKind {
    fn keyword(self) -> &'static str {
        match self {
            BatchKind::Logged => "BATCH",
            BatchKind::Unlogged => "UNLOGGED BATCH",
            BatchKind::Counter => "COUNTER BATCH",
        }
    }
}

/// Mutations submitted as one BATCH request. Nested batches are flattened
/// into this one.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    core: Core,
    kind: BatchKind,
    children: Vec<Statement>,
    timestamp: Option<i64>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn unlogged(mut self) -> Self {
        self.kind = BatchKind::Unlogged;
        self.core.invalidate();
        self
    }
    pub fn counter(mut self) -> Self {
        self.kind = BatchKind::Counter;
        self.core.invalidate();
        self
    }
    pub fn add(mut self, statement: impl Into<Statement>) -> Self {
        self.children.push(statement.into());
        self.core.invalidate();
        self
    }
    pub fn kind(&self) -> BatchKind {
        self.kind
    }
    pub fn children(&self) -> &[Statement] {
        &self.children
    }
    pub fn len(&self) -> usize {
        self.children.len()
    }
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
    /// Drops the cache, and the children's caches too when `cascade` is set.
    pub fn invalidate(&mut self, cascade: bool) {
        self.core.invalidate();
        if cascade {
            self.children.iter_mut().for_each(Executable::mark_dirty);
        }
    }
}

impl UsingBearing for Batch {
    fn using_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self.core.invalidate();
        self
    }
}

impl Executable for Batch {
    fn compile(&mut self) -> Result<Arc<Compiled>> {
        if let Some(compiled) = self.core.cached() {
            return Ok(compiled);
        }
        let mut fragments = Vec::new();
        let (mut counters, mut others) = (0, 0);
        for child in &mut self.children {
            if !child.is_batchable() {
                return Err(MapperError::validation(format!("a {} cannot be part of a batch", child.kind())));
            }
            let compiled = child.compile()?;
            if compiled.is_counter() {
                counters += compiled.fragments().len();
            } else {
                others += compiled.fragments().len();
            }
            fragments.extend(compiled.fragments().iter().cloned());
        }
        if counters > 0 && others > 0 {
            return Err(MapperError::validation("counter and non-counter mutations cannot share a batch"));
        }
        let kind = match (self.kind, counters > 0) {
            (_, true) => BatchKind::Counter,
            (BatchKind::Counter, false) if others > 0 => {
                return Err(MapperError::validation("a counter batch only takes counter updates"));
            }
            (kind, false) => kind,
        };
        let counter = kind == BatchKind::Counter;
        if fragments.is_empty() {
            return Ok(self.core.store(Compiled::grouped(None, fragments, Plan::Empty, counter)));
        }
        let options = self
            .timestamp
            .map(|ts| format!(" USING TIMESTAMP {}", ts))
            .unwrap_or_default();
        let text = envelope(kind.keyword(), &options, "BATCH", fragments.iter().map(|f| f.text.as_str()));
        let plan = Plan::Single(text.clone());
        Ok(self.core.store(Compiled::grouped(Some(text), fragments, plan, counter)))
    }
    fn options(&self) -> &RequestOptions {
        &self.core.options
    }
    fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.core.options
    }
    fn mark_dirty(&mut self) {
        self.invalidate(false);
    }
    fn is_compiled(&self) -> bool {
        self.core.is_compiled()
    }
    fn clear_cache(&mut self) {
        self.invalidate(true);
    }
}

/// Statements run strictly one after another; the last one's result is returned.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    core: Core,
    children: Vec<Statement>,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn add(mut self, statement: impl Into<Statement>) -> Self {
        self.children.push(statement.into());
        self.core.invalidate();
        self
    }
    pub fn children(&self) -> &[Statement] {
        &self.children
    }
    pub fn len(&self) -> usize {
        self.children.len()
    }
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
    pub fn invalidate(&mut self, cascade: bool) {
        self.core.invalidate();
        if cascade {
            self.children.iter_mut().for_each(Executable::mark_dirty);
        }
    }
}

impl Executable for Sequence {
    fn compile(&mut self) -> Result<Arc<Compiled>> {
        if let Some(compiled) = self.core.cached() {
            return Ok(compiled);
        }
        let mut fragments = Vec::new();
        let mut bodies = Vec::new();
        let mut plans = Vec::new();
        for child in &mut self.children {
            let compiled = child.compile()?;
            let Some(text) = compiled.text() else {
                continue;
            };
            bodies.push(text.trim_end_matches(';').to_owned());
            plans.push(compiled.plan().clone());
            fragments.extend(compiled.fragments().iter().cloned());
        }
        if bodies.is_empty() {
            return Ok(self.core.store(Compiled::grouped(None, fragments, Plan::Empty, false)));
        }
        let text = envelope("SEQUENCE", "", "SEQUENCE", bodies.iter().map(String::as_str));
        Ok(self.core.store(Compiled::grouped(Some(text), fragments, Plan::Sequence(plans), false)))
    }
    fn options(&self) -> &RequestOptions {
        &self.core.options
    }
    fn options_mut(&mut self) -> &mut RequestOptions {
        &mut self.core.options
    }
    fn mark_dirty(&mut self) {
        self.invalidate(false);
    }
    fn is_compiled(&self) -> bool {
        self.core.is_compiled()
    }
    fn clear_cache(&mut self) {
        self.invalidate(true);
    }
}
