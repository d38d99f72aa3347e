use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use cqlmap::fanout::CompoundFuture;
use cqlmap::pending::{Pending, Promise};
use cqlmap::result::{PagedRows, ResultSet, Row};
use cqlmap::MapperError;

type Rows = Box<dyn ResultSet>;

fn rows(branch: i32, count: i32) -> Rows {
    Box::new(PagedRows::new(
        (0..count).map(|n| Row::new().with("branch", branch).with("n", n)).collect(),
    ))
}

fn open(count: usize) -> (Vec<Promise<Rows>>, Vec<Pending<Rows>>) {
    (0..count).map(|_| Pending::channel()).unzip()
}

fn branch_of(row: &Row) -> i64 {
    row.get("branch").and_then(|v| v.as_i64()).expect("branch column")
}

#[test]
fn joins_branches_in_order() {
    let (promises, branches) = open(3);
    let compound = CompoundFuture::new(branches);
    assert_eq!(compound.branches(), 3);
    // complete out of order; results still come back in branch order
    let mut promises = promises.into_iter();
    let (first, second, third) = (promises.next().unwrap(), promises.next().unwrap(), promises.next().unwrap());
    assert!(third.complete(Ok(rows(2, 3))));
    assert!(!compound.is_done());
    assert!(first.complete(Ok(rows(0, 2))));
    assert!(second.complete(Ok(rows(1, 0))));
    assert!(compound.is_done());

    let mut joined = compound.get().unwrap();
    let all = joined.all().unwrap();
    assert_eq!(all.len(), 5);
    let order: Vec<i64> = all.iter().map(branch_of).collect();
    assert_eq!(order, vec![0, 0, 2, 2, 2]);
    assert!(joined.is_exhausted());
}

#[test]
fn current_branch_follows_the_rows() {
    let compound = CompoundFuture::new(vec![Pending::ready(Ok(rows(0, 1))), Pending::ready(Ok(rows(1, 1)))]);
    let mut joined = compound.get().unwrap();
    joined.one().unwrap().unwrap();
    assert_eq!(joined.branch(), 0);
    joined.one().unwrap().unwrap();
    assert_eq!(joined.branch(), 1);
    assert!(joined.one().unwrap().is_none());
}

#[test]
fn first_failure_fails_the_join() {
    let (promises, branches) = open(3);
    let compound = CompoundFuture::new(branches);
    let mut promises = promises.into_iter();
    promises.next().unwrap().complete(Ok(rows(0, 1)));
    promises.next().unwrap().complete(Err(MapperError::Execution("node down".to_owned())));
    promises.next().unwrap().complete(Ok(rows(2, 1)));
    match compound.get() {
        Err(MapperError::Execution(message)) => assert_eq!(message, "node down"),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("join should fail"),
    }
}

#[test]
fn cancel_reports_whether_every_branch_was_cancelled() {
    let (_promises, branches) = open(2);
    let compound = CompoundFuture::new(branches.clone());
    assert!(compound.cancel());
    assert!(branches.iter().all(Pending::is_cancelled));
    assert!(matches!(compound.get(), Err(MapperError::Cancelled)));

    let (mut promises, branches) = open(2);
    let compound = CompoundFuture::new(branches.clone());
    promises.remove(0).complete(Ok(rows(0, 1)));
    assert!(!compound.cancel(), "a completed branch cannot be cancelled");
    assert!(branches[1].is_cancelled());
}

#[test]
fn cancelling_the_joined_handle_cancels_branches() {
    let (_promises, branches) = open(2);
    let joined = CompoundFuture::new(branches.clone()).into_pending();
    assert!(joined.cancel());
    assert!(branches.iter().all(Pending::is_cancelled));
}

#[test]
fn joined_handle_cancel_needs_every_branch() {
    let (mut promises, branches) = open(3);
    let joined = CompoundFuture::new(branches.clone()).into_pending();
    promises.remove(0).complete(Ok(rows(0, 1)));
    assert!(!joined.cancel(), "the first branch had already completed");
    assert!(joined.is_cancelled());
    assert!(branches[1].is_cancelled() && branches[2].is_cancelled());
}

#[test]
fn mapped_handle_forwards_the_upstream_cancel() {
    let (promise, upstream) = Pending::<i32>::channel();
    promise.set_canceller(|| false);
    let mapped = upstream.clone().map(|n| Ok(n + 1));
    assert!(!mapped.cancel(), "the upstream work could not be stopped");
    assert!(upstream.is_cancelled());
}

#[test]
fn get_timeout_gives_up() {
    let (_promises, branches) = open(2);
    let compound = CompoundFuture::new(branches);
    let outcome = compound.get_timeout(Duration::from_millis(20));
    assert!(matches!(outcome, Err(MapperError::Timeout)));
}

#[test]
fn get_timeout_shares_one_deadline_across_staggered_branches() {
    let (promises, branches) = open(3);
    let compound = CompoundFuture::new(branches);
    let started = Instant::now();
    let mut promises = promises.into_iter();
    let (first, second, third) = (promises.next().unwrap(), promises.next().unwrap(), promises.next().unwrap());
    third.complete(Ok(rows(2, 1)));
    let late = thread::spawn(move || {
        thread::sleep(Duration::from_millis(500));
        first.complete(Ok(rows(0, 1)));
        thread::sleep(Duration::from_millis(100));
        second.complete(Ok(rows(1, 1)));
    });
    // a third of the budget per branch would have expired before the first branch
    let mut joined = compound.get_timeout(Duration::from_secs(1)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
    let order: Vec<i64> = joined.all().unwrap().iter().map(branch_of).collect();
    assert_eq!(order, vec![0, 1, 2]);
    late.join().unwrap();
}

#[test]
fn joined_result_is_handed_out_once() {
    let compound = CompoundFuture::new(vec![Pending::ready(Ok(rows(0, 1)))]);
    assert_eq!(compound.get().unwrap().all().unwrap().len(), 1);
    match compound.get() {
        Err(MapperError::Execution(message)) => assert_eq!(message, "outcome already taken"),
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("the result was already taken"),
    }
}

#[test]
fn listeners_finish_before_waiters_wake() {
    let (promise, pending) = Pending::<i32>::channel();
    let heard = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&heard);
    pending.add_listener(move || {
        thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
    });
    let waiter = {
        let pending = pending.clone();
        let heard = Arc::clone(&heard);
        thread::spawn(move || {
            pending.wait().unwrap();
            heard.load(Ordering::SeqCst)
        })
    };
    thread::sleep(Duration::from_millis(20));
    promise.complete(Ok(7));
    assert!(waiter.join().unwrap(), "the waiter woke before the listener ran");
}

#[test]
fn no_branches_complete_immediately() {
    let compound = CompoundFuture::new(Vec::new());
    assert!(compound.is_done());
    let mut joined = compound.get().unwrap();
    assert!(joined.one().unwrap().is_none());
    assert_eq!(joined.branch_count(), 0);
}

#[test]
fn availability_stops_at_the_first_partial_branch() {
    let single = |n: i32| Row::new().with("n", n);
    let compound = CompoundFuture::new(vec![
        Pending::ready(Ok(rows(0, 2))),
        Pending::ready(Ok(Box::new(PagedRows::paged(vec![vec![single(1)], vec![single(2)]])) as Rows)),
        Pending::ready(Ok(rows(2, 3))),
    ]);
    let mut joined = compound.get().unwrap();
    assert!(!joined.is_fully_fetched());
    assert_eq!(joined.available_without_fetching(), 3);
    joined.fetch_more().wait().unwrap();
    assert!(joined.is_fully_fetched());
    assert_eq!(joined.available_without_fetching(), 7);
}

#[test]
fn was_applied_needs_every_branch() {
    let compound = CompoundFuture::new(vec![
        Pending::ready(Ok(rows(0, 0))),
        Pending::ready(Ok(Box::new(PagedRows::empty().with_applied(false)) as Rows)),
    ]);
    assert!(!compound.get().unwrap().was_applied());
}

#[tokio::test]
async fn joined_handle_can_be_awaited() {
    let branches = vec![
        Pending::spawn(async { Ok(rows(0, 2)) }),
        Pending::spawn(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(rows(1, 1))
        }),
    ];
    let mut joined = CompoundFuture::new(branches).into_pending().await.unwrap();
    assert_eq!(joined.all().unwrap().len(), 3);
}

#[tokio::test]
async fn cancelled_spawn_reports_cancellation() {
    let pending: Pending<i32> = Pending::spawn(async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(1)
    });
    assert!(pending.cancel());
    assert!(matches!(pending.await, Err(MapperError::Cancelled)));
}

#[tokio::test]
async fn mapped_handle_transforms_the_outcome() {
    let doubled = Pending::spawn(async { Ok(21) }).map(|n: i32| Ok(n * 2));
    assert_eq!(doubled.await.unwrap(), 42);
}

#[tokio::test]
async fn awaiting_task_wakes_on_completion_from_another_thread() {
    let (promise, pending) = Pending::<i32>::channel();
    let completer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        promise.complete(Ok(5))
    });
    assert_eq!(pending.await.unwrap(), 5);
    assert!(completer.join().unwrap());
}
