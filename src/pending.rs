//! One-shot asynchronous handles.
//!
//! A [`Pending`] is completed exactly once through its [`Promise`], by
//! success, failure or cancellation. It can be awaited as a future, waited on
//! from blocking code, and observed through listeners. Listeners run after the
//! state lock is released, so a listener may call back into the same handle,
//! and they have all returned before blocked waiters or the awaiting task see
//! the outcome. A listener must therefore not block on its own handle.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures_util::task::AtomicWaker;

use crate::error::{MapperError, Result};

type Listener = Box<dyn FnOnce() + Send>;
// Reports whether the work behind the handle was actually stopped.
type Canceller = Box<dyn FnOnce() -> bool + Send>;

struct State<T> {
    outcome: Option<Result<T>>,
    done: bool,
    // set once the listeners of a completed handle have run
    settled: bool,
    failed: bool,
    cancelled: bool,
    listeners: Vec<Listener>,
    canceller: Option<Canceller>,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
    waker: AtomicWaker,
}

impl<T> Shared<T> {
    // Outcomes are plain data, a panic elsewhere cannot leave them half-written.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // False if the handle had already completed, otherwise what the canceller reports.
    fn finish(&self, outcome: Result<T>, cancelled: bool) -> bool {
        let (listeners, canceller) = {
            let mut state = self.lock();
            if state.done {
                return false;
            }
            state.done = true;
            state.failed = outcome.is_err();
            state.cancelled = cancelled;
            state.outcome = Some(outcome);
            let canceller = if cancelled { state.canceller.take() } else { None };
            state.canceller = None;
            (std::mem::take(&mut state.listeners), canceller)
        };
        let stopped = canceller.is_none_or(|canceller| canceller());
        for listener in listeners {
            listener();
        }
        self.lock().settled = true;
        self.ready.notify_all();
        self.waker.wake();
        stopped
    }
}

/// Handle to a value that becomes available later.
pub struct Pending<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Pending<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Completing side of a [`Pending`]. Dropping it without completing fails the handle.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Pending<T> {
    pub fn channel() -> (Promise<T>, Pending<T>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                outcome: None,
                done: false,
                settled: false,
                failed: false,
                cancelled: false,
                listeners: Vec::new(),
                canceller: None,
            }),
            ready: Condvar::new(),
            waker: AtomicWaker::new(),
        });
        (
            Promise {
                shared: Arc::clone(&shared),
            },
            Pending { shared },
        )
    }

    /// An already completed handle.
    pub fn ready(outcome: Result<T>) -> Self {
        let (promise, pending) = Self::channel();
        promise.complete(outcome);
        pending
    }

    /// Runs `future` on the current tokio runtime. Cancelling the handle aborts the task.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Self::ready(Err(MapperError::Execution("no tokio runtime to spawn on".to_owned())));
        };
        let (promise, pending) = Self::channel();
        let task = runtime.spawn(async move {
            promise.complete(future.await);
        });
        let abort = task.abort_handle();
        let mut state = pending.shared.lock();
        if !state.done {
            state.canceller = Some(Box::new(move || {
                abort.abort();
                true
            }));
        }
        drop(state);
        pending
    }

    /// Completes the handle as cancelled and stops the work behind it. True only
    /// if the handle was still open and its canceller, if any, stopped everything.
    pub fn cancel(&self) -> bool {
        self.shared.finish(Err(MapperError::Cancelled), true)
    }
    pub fn is_done(&self) -> bool {
        self.shared.lock().done
    }
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }
    pub fn is_failed(&self) -> bool {
        self.shared.lock().failed
    }

    /// Runs `listener` once the handle completes, immediately if it already has.
    pub fn add_listener(&self, listener: impl FnOnce() + Send + 'static) {
        {
            let mut state = self.shared.lock();
            if !state.done {
                state.listeners.push(Box::new(listener));
                return;
            }
        }
        listener();
    }

    fn take(state: &mut State<T>) -> Result<T> {
        state
            .outcome
            .take()
            .unwrap_or_else(|| Err(MapperError::Execution("outcome already taken".to_owned())))
    }

    /// Blocks until completion and takes the outcome. The outcome is handed out
    /// once; later takers get `Execution("outcome already taken")`.
    pub fn wait(&self) -> Result<T> {
        let mut state = self.shared.lock();
        while !state.settled {
            state = self.shared.ready.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        Self::take(&mut state)
    }

    /// Blocks until completion or `deadline`; returns whether the handle completed.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        let mut state = self.shared.lock();
        while !state.settled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .ready
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        true
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Result<T> {
        if !self.wait_until(Instant::now() + timeout) {
            return Err(MapperError::Timeout);
        }
        self.try_take()
    }

    /// Takes the outcome of a completed handle.
    pub fn try_take(&self) -> Result<T> {
        let mut state = self.shared.lock();
        if !state.done {
            return Err(MapperError::Execution("not completed yet".to_owned()));
        }
        Self::take(&mut state)
    }

    /// A handle completing with `f` applied to this one's outcome.
    /// Cancelling the mapped handle cancels this one and reports its result.
    pub fn map<U, F>(self, f: F) -> Pending<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        let (promise, mapped) = Pending::channel();
        let upstream = self.clone();
        promise.set_canceller(move || upstream.cancel());
        let source = self.clone();
        self.add_listener(move || {
            promise.complete(source.try_take().and_then(f));
        });
        mapped
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Returns false if the handle was already completed or cancelled.
    pub fn complete(self, outcome: Result<T>) -> bool {
        self.shared.finish(outcome, false)
    }
    /// Registers what cancelling the handle should stop.
    pub fn set_canceller(&self, canceller: impl FnOnce() -> bool + Send + 'static) {
        let mut state = self.shared.lock();
        if !state.done {
            state.canceller = Some(Box::new(canceller));
        }
    }
    pub fn is_cancelled(&self) -> bool {
        self.shared.lock().cancelled
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        self.shared
            .finish(Err(MapperError::Execution("completion dropped".to_owned())), false);
    }
}

// One task awaits a handle at a time; clones are for listeners and blocking waiters.
impl<T: Send + 'static> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // register first so a completion racing this poll still wakes us
        self.shared.waker.register(cx.waker());
        let mut state = self.shared.lock();
        if state.settled {
            return Poll::Ready(Self::take(&mut state));
        }
        Poll::Pending
    }
}
