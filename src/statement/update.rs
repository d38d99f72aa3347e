use std::sync::Arc;

use super::{
    leaf_executable, require_restricted, using, AssignmentBearing, ClauseBearing, ConditionBearing, Core, Fragment,
    Grouping, Target, UsingBearing,
};
use crate::assignment::{self, Assignment};
use crate::clause::{self, Clause};
use crate::error::{MapperError, Result};
use crate::metadata::{EntityDescriptor, TableDescriptor};
use crate::schema::ObjectRef;

/// UPDATE of one row per candidate keyspace. Without explicit WHERE clauses
/// the bound object's primary key is used.
#[derive(Debug, Clone)]
pub struct Update {
    pub(crate) core: Core,
    target: Target,
    assignments: Vec<Assignment>,
    clauses: Vec<Clause>,
    conditions: Vec<Clause>,
    if_exists: bool,
    ttl: Option<u32>,
    timestamp: Option<i64>,
}

impl Update {
    pub(crate) fn new(entity: Arc<EntityDescriptor>, table: Option<&str>, object: Option<ObjectRef>) -> Result<Self> {
        Ok(Self {
            core: Core::default(),
            target: Target::new(entity, table, object)?,
            assignments: Vec::new(),
            clauses: Vec::new(),
            conditions: Vec::new(),
            if_exists: false,
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
    pub fn is_counter(&self) -> bool {
        !self.assignments.is_empty() && self.assignments.iter().all(Assignment::is_counter)
    }
    pub fn using_ttl(mut self, seconds: u32) -> Self {
        self.ttl = Some(seconds);
        self.core.invalidate();
        self
    }

    fn grouping(&self) -> Grouping {
        if self.is_counter() {
            Grouping::CounterBatch
        } else {
            Grouping::Batch
        }
    }

    fn restrictions(&self) -> Vec<Clause> {
        let explicit = self.clauses.iter().any(|c| c.suffix_binding(&self.target.entity).is_none());
        if explicit || self.target.context.object().is_none() {
            self.clauses.clone()
        } else {
            let mut clauses = self.clauses.clone();
            clauses.push(Clause::key_of_bound());
            clauses
        }
    }

    fn render(&self) -> Result<Vec<Fragment>> {
        if self.assignments.is_empty() {
            return Err(MapperError::validation("UPDATE without assignments"));
        }
        let counters = self.assignments.iter().filter(|a| a.is_counter()).count();
        if counters > 0 && counters < self.assignments.len() {
            return Err(MapperError::validation("counter increments cannot be mixed with other assignments"));
        }
        let target = &self.target;
        let clauses = self.restrictions();
        let prebound = target.prebind(&clauses)?;
        let prebound_conditions = target.prebind(&self.conditions)?;
        let concrete: Vec<Option<_>> = self
            .assignments
            .iter()
            .map(|a| if a.is_delayed() { Ok(None) } else { a.bind(&target.table).map(Some) })
            .collect::<Result<_>>()?;
        target.fragments(&clauses, |context, table| {
            let restrictions = target.resolve(&clauses, &prebound, context)?;
            require_restricted(target.table.primary_keys(), &restrictions, "UPDATE")?;
            let mut assignments = Vec::new();
            for (assignment, bound) in self.assignments.iter().zip(&concrete) {
                match bound {
                    Some(bound) => assignments.push(bound.clone()),
                    None => assignments.extend(assignment.resolve(&target.table, context)?),
                }
            }
            if assignments.is_empty() {
                return Err(MapperError::validation("UPDATE resolved to no assignments"));
            }
            let mut conditions = target.resolve(&self.conditions, &prebound_conditions, context)?;
            conditions.extend(assignments.iter().filter_map(|a| a.condition()));

            let mut text = format!("UPDATE {}{} SET ", table, using(self.ttl, self.timestamp));
            assignment::render_all(&assignments, &target.table, &mut text)?;
            text.push_str(" WHERE ");
            clause::render_all(&restrictions, &target.table, &mut text)?;
            if self.if_exists && !conditions.is_empty() {
                return Err(MapperError::validation("IF EXISTS cannot be combined with IF conditions"));
            }
            if self.if_exists {
                text.push_str(" IF EXISTS");
            } else if !conditions.is_empty() {
                text.push_str(" IF ");
                clause::render_all(&conditions, &target.table, &mut text)?;
            }
            Ok(vec![text])
        })
    }
}

impl ClauseBearing for Update {
    fn where_clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self.core.invalidate();
        self
    }
}

impl AssignmentBearing for Update {
    fn with(mut self, assignment: Assignment) -> Self {
        self.assignments.push(assignment);
        self.core.invalidate();
        self
    }
}

impl ConditionBearing for Update {
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

impl UsingBearing for Update {
    fn using_timestamp(mut self, micros: i64) -> Self {
        self.timestamp = Some(micros);
        self.core.invalidate();
        self
    }
}

leaf_executable!(Update);
