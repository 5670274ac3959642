use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use command_executor::command::Command;
use command_executor::shutdown_mode::ShutdownMode;
use command_executor::thread_pool::ThreadPool;
use command_executor::thread_pool_builder::ThreadPoolBuilder;

use crate::error::SortError;

/// A self contained unit of work. Tasks own their parameters and talk to other tasks only
/// through the files they read and write.
pub(crate) trait Task: Send + Sync + 'static {
    fn run(&self) -> Result<(), SortError>;

    fn name(&self) -> String;
}

#[derive(Default)]
struct GroupState {
    pending: usize,
    completed: usize,
    skipped: usize,
    error: Option<SortError>,
}

/// Tracks the tasks of one phase: per task results, the barrier and the failure flag
pub(crate) struct TaskGroup {
    state: Mutex<GroupState>,
    done: Condvar,
    failed: AtomicBool,
}

impl TaskGroup {
    pub(crate) fn new() -> Arc<TaskGroup> {
        Arc::new(
            TaskGroup {
                state: Mutex::new(GroupState::default()),
                done: Condvar::new(),
                failed: AtomicBool::new(false),
            }
        )
    }

    fn lock(&self) -> MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self) {
        self.lock().pending += 1;
    }

    /// Record the outcome of a task. `None` marks a task skipped after a failure.
    pub(crate) fn complete(&self, result: Option<Result<(), SortError>>) {
        let mut state = self.lock();
        match result {
            None => state.skipped += 1,
            Some(Ok(())) => state.completed += 1,
            Some(Err(e)) => {
                self.failed.store(true, Ordering::SeqCst);
                if state.error.is_none() {
                    state.error = Some(e);
                } else {
                    log::error!("Additional task failure: {}", e);
                }
            }
        }
        state.pending -= 1;
        if state.pending == 0 {
            self.done.notify_all();
        }
    }

    /// Block until every registered task finished. Returns the number of completed tasks or the
    /// first error.
    pub(crate) fn wait(&self) -> Result<usize, SortError> {
        let mut state = self.lock();
        while state.pending > 0 {
            state = self.done.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        if state.skipped > 0 {
            log::warn!("Skipped {} tasks after a failure", state.skipped);
        }
        match state.error.take() {
            Some(e) => Err(e),
            None => Ok(state.completed),
        }
    }
}

struct TaskCommand<T: Task> {
    task: T,
    group: Arc<TaskGroup>,
}

impl<T: Task> Command for TaskCommand<T> {
    fn execute(&self) -> Result<(), anyhow::Error> {
        if self.group.is_failed() {
            self.group.complete(None);
            return Ok(());
        }
        log::debug!("Start {}, thread: {}", self.task.name(), thread::current().name().unwrap_or("unnamed"));
        let result = catch_unwind(AssertUnwindSafe(|| self.task.run()))
            .unwrap_or_else(|payload| {
                let reason = payload.downcast_ref::<&str>().map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                Err(SortError::WorkerFailure { reason: format!("{} panicked: {}", self.task.name(), reason) })
            });
        if let Err(e) = &result {
            log::error!("Failed {}: {}", self.task.name(), e);
        }
        self.group.complete(Some(result));
        Ok(())
    }
}

/// Fixed size pool reused by every phase of a run
pub(crate) struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub(crate) fn new(tasks: usize, queue_size: usize) -> Result<WorkerPool, SortError> {
        let mut thread_pool_builder = ThreadPoolBuilder::new();
        let pool = thread_pool_builder
            .with_name("sorting".to_string())
            .with_tasks(tasks)
            .with_queue_size(queue_size)
            .with_shutdown_mode(ShutdownMode::CompletePending)
            .build()
            .map_err(|e| SortError::WorkerFailure { reason: format!("failed to start worker pool: {}", e) })?;
        Ok(WorkerPool { pool })
    }

    /// Dispatch `tasks` and wait for all of them (barrier). Dispatch stops at the first observed
    /// failure, tasks that were not started yet are skipped and running tasks finish.
    pub(crate) fn run_all<T: Task>(&mut self, tasks: Vec<T>) -> Result<usize, SortError> {
        let group = TaskGroup::new();
        let total = tasks.len();
        let mut dispatched = 0;
        for task in tasks {
            if group.is_failed() {
                log::warn!("Stopped dispatching after a failure, {} of {} tasks dispatched", dispatched, total);
                break;
            }
            group.register();
            self.pool.submit(Box::new(TaskCommand { task, group: group.clone() }));
            dispatched += 1;
        }
        group.wait()
    }

    pub(crate) fn shutdown(mut self) -> Result<(), SortError> {
        log::info!("Shutting down worker pool");
        self.pool.shutdown();
        self.pool.join()
            .map_err(|e| SortError::WorkerFailure { reason: format!("failed to join worker pool: {}", e) })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::error::SortError;
    use crate::worker_pool::{Task, TaskGroup, WorkerPool};

    struct CountingTask {
        counter: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Task for CountingTask {
        fn run(&self) -> Result<(), SortError> {
            thread::sleep(Duration::from_millis(5));
            if self.fail {
                return Err(SortError::WorkerFailure { reason: "boom".to_string() });
            }
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> String {
            "counting".to_string()
        }
    }

    struct PanickingTask;

    impl Task for PanickingTask {
        fn run(&self) -> Result<(), SortError> {
            panic!("bad chunk")
        }

        fn name(&self) -> String {
            "panicking".to_string()
        }
    }

    #[test]
    fn test_barrier_waits_for_all() -> Result<(), anyhow::Error> {
        let mut pool = WorkerPool::new(4, 64)?;
        let counter = Arc::new(AtomicUsize::new(0));
        let tasks = (0..20).map(|_| CountingTask { counter: counter.clone(), fail: false }).collect();
        let completed = pool.run_all(tasks)?;
        assert_eq!(completed, 20);
        assert_eq!(counter.load(Ordering::SeqCst), 20);

        // the pool is reused by the next phase
        let tasks = (0..3).map(|_| CountingTask { counter: counter.clone(), fail: false }).collect();
        assert_eq!(pool.run_all(tasks)?, 3);
        pool.shutdown()?;
        Ok(())
    }

    #[test]
    fn test_failure_is_reported() -> Result<(), anyhow::Error> {
        let mut pool = WorkerPool::new(1, 64)?;
        let counter = Arc::new(AtomicUsize::new(0));
        let mut tasks = vec![CountingTask { counter: counter.clone(), fail: true }];
        tasks.extend((0..10).map(|_| CountingTask { counter: counter.clone(), fail: false }));
        let result = pool.run_all(tasks);
        assert!(matches!(result, Err(SortError::WorkerFailure { .. })));
        assert!(counter.load(Ordering::SeqCst) < 10);
        pool.shutdown()?;
        Ok(())
    }

    #[test]
    fn test_panic_is_worker_failure() -> Result<(), anyhow::Error> {
        let mut pool = WorkerPool::new(2, 64)?;
        match pool.run_all(vec![PanickingTask]) {
            Err(SortError::WorkerFailure { reason }) => assert!(reason.contains("bad chunk")),
            other => panic!("expected worker failure, got {:?}", other),
        }
        pool.shutdown()?;
        Ok(())
    }

    #[test]
    fn test_empty_group() -> Result<(), anyhow::Error> {
        let group = TaskGroup::new();
        assert_eq!(group.wait()?, 0);
        Ok(())
    }
}
