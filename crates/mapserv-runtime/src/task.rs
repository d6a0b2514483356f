//! AsyncTask: a unit of work that crosses the host/worker boundary
//!
//! A task is built on the host from plain owned input, a worker-side work
//! function and a host-side completion. On submission the dispatcher splits
//! it in two:
//!
//! - a [`Job`] that moves to a worker thread together with the input and
//!   writes exactly one [`TaskResult`] into the task's slot;
//! - a finisher that stays on the host and hands the slot's result to the
//!   completion once the worker reports the task done.
//!
//! Work functions never see host objects; they only get the worker's
//! [`WorkerScope`] and their own input.

use crate::dispatcher::WorkerScope;
use crate::error::{ErrorKind, MapserverError};
use crate::handle::Retained;
use mapserv_sdk::MapEngine;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

/// Unique identifier for a submitted task
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// What a task delivers: exactly one of error or result
pub type TaskResult<O> = Result<O, MapserverError>;

/// Worker-side half of a task
pub(crate) type Job<E> = Box<dyn for<'s> FnOnce(&mut WorkerScope<'s, E>) + Send>;

/// Host-side half of a task
pub(crate) type Finisher = Box<dyn FnOnce()>;

type Work<E, I, O> = Box<dyn for<'s> FnOnce(&mut WorkerScope<'s, E>, I) -> TaskResult<O> + Send>;
type Completion<O> = Box<dyn FnOnce(TaskResult<O>)>;
type Slot<O> = Arc<Mutex<Option<TaskResult<O>>>>;

/// A captured unit of work with its completion
pub struct AsyncTask<E: MapEngine, I, O> {
    id: TaskId,
    name: &'static str,
    input: I,
    work: Work<E, I, O>,
    completion: Completion<O>,
    retained: Option<Retained<E>>,
}

impl<E, I, O> AsyncTask<E, I, O>
where
    E: MapEngine,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Create a task.
    ///
    /// `work` runs on a worker with the task's input; `completion` runs on
    /// the host thread with whatever `work` returned.
    pub fn new<W, C>(name: &'static str, input: I, work: W, completion: C) -> Self
    where
        W: for<'s> FnOnce(&mut WorkerScope<'s, E>, I) -> TaskResult<O> + Send + 'static,
        C: FnOnce(TaskResult<O>) + 'static,
    {
        Self {
            id: TaskId::new(),
            name,
            input,
            work: Box::new(work),
            completion: Box::new(completion),
            retained: None,
        }
    }

    /// Keep a map alive until this task's completion has run
    pub fn retaining(mut self, retained: Retained<E>) -> Self {
        self.retained = Some(retained);
        self
    }

    /// The task's identifier
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Short operation name used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Split into the worker job and the host finisher
    pub(crate) fn into_parts(self) -> (Job<E>, Finisher) {
        let AsyncTask {
            id,
            name,
            input,
            work,
            completion,
            retained,
        } = self;

        let slot: Slot<O> = Arc::new(Mutex::new(None));
        let worker_slot = Arc::clone(&slot);

        let job: Job<E> = Box::new(move |scope: &mut WorkerScope<'_, E>| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *scope, input)));
            let result = match outcome {
                Ok(result) => result,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!(task = %id, op = name, worker = scope.worker(), "worker panicked: {}", message);
                    scope.ctx.reset();
                    Err(MapserverError::new(ErrorKind::WorkerPanic, message).with_routine(name))
                }
            };
            *worker_slot.lock() = Some(result);
        });

        let finisher: Finisher = Box::new(move || {
            // Released after the completion returns or unwinds
            let _retained = retained;
            let result = slot.lock().take().unwrap_or_else(|| {
                Err(MapserverError::new(ErrorKind::WorkerPanic, "Task finished without a result").with_routine(name))
            });
            trace!(task = %id, op = name, ok = result.is_ok(), "running completion");
            completion(result);
        });

        (job, finisher)
    }
}

impl<E: MapEngine, I, O> fmt::Debug for AsyncTask<E, I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncTask")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("retains_map", &self.retained.is_some())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        ErrorKind::WorkerPanic.fallback_message().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_increase() {
        let a = TaskId::new();
        let b = TaskId::new();
        assert!(b > a);
        assert_eq!(format!("{}", TaskId(7)), "task-7");
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "Worker panicked");
    }
}
