//! Joins the results of one statement fanned out over several keyspaces.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{MapperError, Result};
use crate::pending::{Pending, Promise};
use crate::result::{ResultSet, Row};

type Branch = Pending<Box<dyn ResultSet>>;

// Completion flags; only flag updates happen under the lock.
struct Join {
    completed: Vec<bool>,
    first_failure: Option<usize>,
    promise: Option<Promise<CompoundResult>>,
}

/// AND-join over the branches of a fan-out. Completes once every branch has;
/// fails with the first branch failure observed.
pub struct CompoundFuture {
    branches: Vec<Branch>,
    joined: Pending<CompoundResult>,
}

impl CompoundFuture {
    pub fn new(branches: Vec<Branch>) -> Self {
        let (promise, joined) = Pending::channel();
        if branches.is_empty() {
            promise.complete(Ok(CompoundResult::new(Vec::new())));
            return Self { branches, joined };
        }
        debug!(branches = branches.len(), "joining fan-out");
        let cancelled = branches.clone();
        promise.set_canceller(move || Self::cancel_all(&cancelled));
        let join = Arc::new(Mutex::new(Join {
            completed: vec![false; branches.len()],
            first_failure: None,
            promise: Some(promise),
        }));
        for (index, branch) in branches.iter().enumerate() {
            let join = Arc::clone(&join);
            let all = branches.clone();
            let observed = branch.clone();
            branch.add_listener(move || {
                let finished = {
                    let Ok(mut state) = join.lock() else {
                        return;
                    };
                    state.completed[index] = true;
                    if observed.is_failed() && state.first_failure.is_none() {
                        state.first_failure = Some(index);
                    }
                    if state.completed.iter().all(|c| *c) {
                        state.promise.take().map(|p| (p, state.first_failure))
                    } else {
                        None
                    }
                };
                if let Some((promise, first_failure)) = finished {
                    promise.complete(Self::collect(&all, first_failure));
                }
            });
        }
        Self { branches, joined }
    }

    fn collect(branches: &[Branch], first_failure: Option<usize>) -> Result<CompoundResult> {
        if let Some(index) = first_failure {
            let error = branches[index]
                .try_take()
                .err()
                .unwrap_or_else(|| MapperError::Execution(format!("branch {} failed", index)));
            warn!(branch = index, error = %error, "fan-out branch failed");
            return Err(error);
        }
        let mut results = Vec::with_capacity(branches.len());
        for branch in branches {
            results.push(branch.try_take()?);
        }
        Ok(CompoundResult::new(results))
    }

    pub fn branches(&self) -> usize {
        self.branches.len()
    }
    pub fn is_done(&self) -> bool {
        self.joined.is_done()
    }

    // Every branch is asked, even after one refused.
    fn cancel_all(branches: &[Branch]) -> bool {
        let mut all = true;
        for branch in branches {
            all &= branch.cancel();
        }
        all
    }

    /// Cancels every branch; true only if each of them was cancelled.
    pub fn cancel(&self) -> bool {
        Self::cancel_all(&self.branches)
    }

    /// Blocks until every branch completed. The joined result is handed out once,
    /// a second `get` fails with `Execution("outcome already taken")`.
    pub fn get(&self) -> Result<CompoundResult> {
        self.joined.wait()
    }

    /// Waits on each branch in turn against one shared deadline.
    pub fn get_timeout(&self, timeout: Duration) -> Result<CompoundResult> {
        let deadline = Instant::now() + timeout;
        for branch in &self.branches {
            if !branch.wait_until(deadline) {
                return Err(MapperError::Timeout);
            }
        }
        // settled branches have run their listeners, so the join is complete
        self.joined.wait()
    }

    /// The joined handle. Cancelling it cancels every branch and reports, like
    /// [`CompoundFuture::cancel`], whether all of them were stopped.
    pub fn into_pending(self) -> Pending<CompoundResult> {
        self.joined
    }
}

/// Branch results read one after the other, in branch order.
pub struct CompoundResult {
    branches: Vec<Box<dyn ResultSet>>,
    current: usize,
}

impl CompoundResult {
    pub fn new(branches: Vec<Box<dyn ResultSet>>) -> Self {
        Self { branches, current: 0 }
    }
    /// Index of the branch the last returned row came from.
    pub fn current_branch(&self) -> usize {
        self.current
    }
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }
}

impl ResultSet for CompoundResult {
    fn one(&mut self) -> Result<Option<Row>> {
        while self.current < self.branches.len() {
            if let Some(row) = self.branches[self.current].one()? {
                return Ok(Some(row));
            }
            if self.current + 1 == self.branches.len() {
                break;
            }
            self.current += 1;
        }
        Ok(None)
    }
    fn is_exhausted(&mut self) -> bool {
        while self.current < self.branches.len() {
            if !self.branches[self.current].is_exhausted() {
                return false;
            }
            if self.current + 1 == self.branches.len() {
                break;
            }
            self.current += 1;
        }
        true
    }
    fn is_fully_fetched(&self) -> bool {
        self.branches.iter().all(|b| b.is_fully_fetched())
    }
    fn available_without_fetching(&self) -> usize {
        let mut available = 0;
        for branch in self.branches.iter().skip(self.current) {
            available += branch.available_without_fetching();
            if !branch.is_fully_fetched() {
                break;
            }
        }
        available
    }
    fn fetch_more(&mut self) -> Pending<()> {
        match self.branches.iter().position(|b| !b.is_fully_fetched()) {
            Some(index) => self.branches[index].fetch_more(),
            None => match self.branches.first_mut() {
                Some(first) => first.fetch_more(),
                None => Pending::ready(Ok(())),
            },
        }
    }
    fn was_applied(&self) -> bool {
        self.branches.iter().all(|b| b.was_applied())
    }
    fn branch(&self) -> usize {
        self.current
    }
}
