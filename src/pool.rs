//! A fixed-size worker pool with a dependency-aware scheduler.
//!
//! Tasks declare prerequisite task ids and become runnable only when every
//! prerequisite has completed. Task bodies call
//! [`TaskCompleter::task_completed`] immediately before returning; a body
//! that panics is caught at the task boundary, logged, and completed anyway
//! so dependents proceed with the last known good state.

use crate::utils;
use std::{
    collections::{HashMap, HashSet, VecDeque},
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{Arc, Condvar, Mutex},
    thread,
};

/// Derives the stable 64-bit id of a task key (typically a package name or a
/// well-known string).
pub fn task_id(key: &str) -> u64 {
    utils::fnv1a(key.as_bytes())
}

type Thunk = Box<dyn FnOnce(&TaskCompleter) + Send + 'static>;

struct PendingTask {
    prerequisites: HashSet<u64>,
    thunk: Thunk,
}

#[derive(Default)]
struct PoolState {
    pending: HashMap<u64, PendingTask>,
    runnable: VecDeque<u64>,
    completed: HashSet<u64>,
    in_flight: usize,
    shutdown: bool,
}

impl PoolState {
    fn quiescent(&self) -> bool {
        self.pending.is_empty() && self.runnable.is_empty() && self.in_flight == 0
    }
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_cv: Condvar,
    idle_cv: Condvar,
}

/// Handle passed into task bodies for completion signalling.
#[derive(Clone)]
pub struct TaskCompleter {
    shared: Arc<PoolShared>,
}

impl TaskCompleter {
    /// Marks `id` complete and unblocks dependents. Idempotent.
    pub fn task_completed(&self, id: u64) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.completed.insert(id) {
            return;
        }
        let mut now_runnable = Vec::new();
        for (task, pending) in state.pending.iter_mut() {
            if pending.prerequisites.remove(&id) && pending.prerequisites.is_empty() {
                now_runnable.push(*task);
            }
        }
        state.runnable.extend(now_runnable);
        self.shared.work_cv.notify_all();
        if state.quiescent() {
            self.shared.idle_cv.notify_all();
        }
    }
}

/// DAG-aware worker pool driving package recompiles.
pub struct TaskPool {
    shared: Arc<PoolShared>,
    workers: Vec<thread::JoinHandle<()>>,
}

impl TaskPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState::default()),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });
        let workers = (0..size)
            .map(|i| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("conjure-pool-{i}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn pool worker")
            })
            .collect();
        trace!("task pool started with {size} workers");
        Self { shared, workers }
    }

    /// A completer handle for task bodies and orchestrator callbacks.
    pub fn completer(&self) -> TaskCompleter {
        TaskCompleter { shared: Arc::clone(&self.shared) }
    }

    /// Registers a task. Prerequisites that already completed are satisfied
    /// immediately; ids that have not completed must belong to tasks that are
    /// or will be registered. Re-adding an id that is still pending coalesces
    /// into the existing entry. Waves of recompiles must be submitted in
    /// dependency order so a re-added prerequisite is visible before its
    /// dependents are registered.
    pub fn add_task<F>(&self, id: u64, prerequisites: impl IntoIterator<Item = u64>, thunk: F)
    where
        F: FnOnce(&TaskCompleter) + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        if state.pending.contains_key(&id) {
            trace!("task {id:#x} already pending, coalescing");
            return;
        }
        state.completed.remove(&id);

        let prerequisites: HashSet<u64> = prerequisites
            .into_iter()
            .filter(|p| *p != id && !state.completed.contains(p))
            .collect();

        let runnable = prerequisites.is_empty();
        state.pending.insert(id, PendingTask { prerequisites, thunk: Box::new(thunk) });
        if runnable {
            state.runnable.push_back(id);
            self.shared.work_cv.notify_one();
        }
    }

    /// Blocks until no task is pending, runnable or in flight.
    pub fn wait_until_all_complete(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.quiescent() {
            state = self.shared.idle_cv.wait(state).unwrap();
        }
    }

    /// The number of tasks not yet finished.
    pub fn outstanding(&self) -> usize {
        let state = self.shared.state.lock().unwrap();
        state.pending.len() + state.in_flight
    }
}

impl Drop for TaskPool {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.shutdown = true;
        }
        self.shared.work_cv.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    let completer = TaskCompleter { shared: Arc::clone(&shared) };
    loop {
        let (id, thunk) = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if state.shutdown {
                    return;
                }
                if let Some(id) = state.runnable.pop_front() {
                    if let Some(pending) = state.pending.remove(&id) {
                        state.in_flight += 1;
                        break (id, pending.thunk);
                    }
                    continue;
                }
                state = shared.work_cv.wait(state).unwrap();
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| thunk(&completer)));
        if result.is_err() {
            error!("task {id:#x} panicked; completing it so dependents proceed");
        }
        // release the prerequisite count even when the body failed to
        completer.task_completed(id);

        let mut state = shared.state.lock().unwrap();
        state.in_flight -= 1;
        if state.quiescent() {
            shared.idle_cv.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_tasks_in_prerequisite_order() {
        let pool = TaskPool::new(4);
        let log = Arc::new(Mutex::new(Vec::new()));

        let a = task_id("a");
        let b = task_id("b");
        let c = task_id("c");

        for (id, prereqs, name) in [
            (c, vec![a, b], "c"),
            (b, vec![a], "b"),
            (a, vec![], "a"),
        ] {
            let log = Arc::clone(&log);
            pool.add_task(id, prereqs, move |done| {
                log.lock().unwrap().push(name);
                done.task_completed(id);
            });
        }
        pool.wait_until_all_complete();

        let log = log.lock().unwrap();
        let pos = |n: &str| log.iter().position(|x| *x == n).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
    }

    #[test]
    fn completed_prerequisites_are_satisfied_immediately() {
        let pool = TaskPool::new(1);
        let a = task_id("a");
        pool.add_task(a, [], move |done| done.task_completed(a));
        pool.wait_until_all_complete();

        let ran = Arc::new(AtomicUsize::new(0));
        let b = task_id("b");
        let ran2 = Arc::clone(&ran);
        pool.add_task(b, [a], move |done| {
            ran2.fetch_add(1, Ordering::SeqCst);
            done.task_completed(b);
        });
        pool.wait_until_all_complete();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readding_a_pending_task_coalesces() {
        let pool = TaskPool::new(1);
        let gate = task_id("gate");
        let dup = task_id("dup");
        let runs = Arc::new(AtomicUsize::new(0));

        // keep dup blocked behind gate while re-adding it
        for _ in 0..3 {
            let runs = Arc::clone(&runs);
            pool.add_task(dup, [gate], move |done| {
                runs.fetch_add(1, Ordering::SeqCst);
                done.task_completed(dup);
            });
        }
        pool.add_task(gate, [], move |done| done.task_completed(gate));
        pool.wait_until_all_complete();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_task_still_unblocks_dependents() {
        let pool = TaskPool::new(2);
        let bad = task_id("bad");
        let dependent = task_id("dependent");
        let ran = Arc::new(AtomicUsize::new(0));

        pool.add_task(bad, [], move |_| panic!("front-end exploded"));
        let ran2 = Arc::clone(&ran);
        pool.add_task(dependent, [bad], move |done| {
            ran2.fetch_add(1, Ordering::SeqCst);
            done.task_completed(dependent);
        });
        pool.wait_until_all_complete();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn serial_pool_is_deterministic() {
        let pool = TaskPool::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let ids: Vec<u64> = (0..8).map(|i| task_id(&format!("t{i}"))).collect();
        for (i, id) in ids.iter().copied().enumerate() {
            let order = Arc::clone(&order);
            let prereqs: Vec<u64> = if i == 0 { vec![] } else { vec![ids[i - 1]] };
            pool.add_task(id, prereqs, move |done| {
                order.lock().unwrap().push(i);
                done.task_completed(id);
            });
        }
        pool.wait_until_all_complete();
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
    }
}
