//! Task dispatch: run instrument work off the caller's task with a
//! bounded wait.
//!
//! A [`Dispatcher`] submits jobs (typically "query an instrument and push
//! the result into the store") onto the shared tokio worker pool. Every
//! job carries a label; a failing job is logged with that label before the
//! error propagates, so no failure is ever silently swallowed.
//!
//! Waiting is bounded: [`TaskHandle::wait`] gives up after the caller's
//! timeout but does NOT cancel the running job. There is no safe way to
//! abort a query already sent to an instrument (it would desynchronize the
//! echo matching), so a timed-out job keeps its worker until it completes
//! and its eventual result is discarded.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;

use crate::error::CryoError;

/// Submits labelled jobs to the shared worker pool.
///
/// Cloneable; all clones feed the same runtime.
#[derive(Clone, Debug)]
pub struct Dispatcher {
    handle: tokio::runtime::Handle,
}

impl Dispatcher {
    /// Build a dispatcher on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime context.
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Build a dispatcher on an explicit runtime handle.
    pub fn on(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Submit a job for execution on the worker pool.
    ///
    /// The job runs regardless of whether the returned handle is awaited.
    /// If it resolves to an error, the error is logged together with the
    /// job's label before being handed to the awaiting caller.
    pub fn submit<F, T>(&self, label: impl Into<String>, job: F) -> TaskHandle<T>
    where
        F: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let label = label.into();
        let task_label = label.clone();
        let join = self.handle.spawn(async move {
            match job.await {
                Ok(value) => Ok(value),
                Err(error) => {
                    tracing::error!(task = %task_label, %error, "task failed");
                    Err(error)
                }
            }
        });
        TaskHandle { label, join }
    }

    /// Submit a job whose result nobody will wait for.
    ///
    /// Used for store-change notifications: delivery failures are logged,
    /// the writer is never blocked.
    pub fn submit_detached<F>(&self, label: impl Into<String>, job: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        drop(self.submit(label, job));
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a submitted job.
pub struct TaskHandle<T> {
    label: String,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// The label this job was submitted under.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Await the job's result, giving up after `timeout`.
    ///
    /// Timing out abandons the wait only; the job keeps running on its
    /// worker and its eventual result is discarded.
    pub async fn wait(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.join).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => {
                tracing::error!(task = %self.label, %join_error, "task worker lost");
                Err(CryoError::TaskAborted { label: self.label }.into())
            }
            Err(_) => {
                tracing::warn!(
                    task = %self.label,
                    timeout_ms = timeout.as_millis() as u64,
                    "abandoning wait, task keeps running"
                );
                Err(CryoError::TaskTimedOut {
                    label: self.label,
                    waited_ms: timeout.as_millis() as u64,
                }
                .into())
            }
        }
    }
}
