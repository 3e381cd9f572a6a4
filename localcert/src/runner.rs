//! Background execution of lifecycle operations
//!
//! Store calls block (and the unlock prompt may block indefinitely), so
//! lifecycle operations run on tokio's blocking pool. Each dispatched
//! operation delivers exactly one result, either through a [`TaskHandle`] or
//! a callback.

use crate::error::{Error, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Awaitable single-shot result of a dispatched operation
#[derive(Debug)]
pub struct TaskHandle<T> {
    label: String,
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Label the operation was dispatched with
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Wait for the operation's result
    ///
    /// Returns [`Error::TaskFailed`] if the worker went away without
    /// delivering one.
    pub async fn join(self) -> Result<T> {
        self.rx.await.unwrap_or_else(|_| {
            Err(Error::TaskFailed(format!(
                "{} was dropped before delivering a result",
                self.label
            )))
        })
    }
}

/// Runs blocking lifecycle operations off the caller's task
#[derive(Debug, Clone)]
pub struct AsyncTaskRunner {
    handle: Handle,
}

impl AsyncTaskRunner {
    /// Create a runner that schedules onto `handle`
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Create a runner on the runtime the caller is running in
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::TaskFailed(format!("no tokio runtime: {}", e)))
    }

    /// Run `op` on the blocking pool and return a handle to its result
    ///
    /// A panic inside `op` is delivered as [`Error::TaskFailed`].
    pub fn dispatch<T, F>(&self, label: impl Into<String>, op: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let label = label.into();
        let (tx, rx) = oneshot::channel();

        let task_label = label.clone();
        debug!("Dispatching {}", task_label);
        self.handle.spawn_blocking(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                warn!("{} panicked: {}", task_label, message);
                Err(Error::TaskFailed(format!("{} panicked: {}", task_label, message)))
            });
            if tx.send(result).is_err() {
                debug!("{} finished after its handle was dropped", task_label);
            }
        });

        TaskHandle { label, rx }
    }

    /// Run `op` on the blocking pool and pass its result to `callback`
    ///
    /// The callback runs exactly once, on a runtime task, with either the
    /// operation's value or its error.
    pub fn dispatch_with_callback<T, F, C>(&self, label: impl Into<String>, op: F, callback: C)
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
        C: FnOnce(Result<T>) + Send + 'static,
    {
        let task = self.dispatch(label, op);
        self.handle.spawn(async move {
            callback(task.join().await);
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
