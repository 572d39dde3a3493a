//! Job type to handler dispatch table.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{DispatchError, JobError};

/// Executes one job type.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job with its `data` and return a result value.
    async fn execute(&self, data: serde_json::Value) -> Result<serde_json::Value, JobError>;
}

type BoxedJobFuture = Pin<Box<dyn Future<Output = Result<serde_json::Value, JobError>> + Send>>;

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(serde_json::Value) -> BoxedJobFuture + Send + Sync,
{
    async fn execute(&self, data: serde_json::Value) -> Result<serde_json::Value, JobError> {
        (self.f)(data).await
    }
}

/// Immutable map from job type to handler.
///
/// Built once with [`HandlerRegistry::builder`] and shared behind an `Arc`.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    /// Start building a registry.
    ///
    /// # Examples
    ///
    /// ```
    /// use shepherd_queue::{HandlerRegistry, JobError};
    /// use serde_json::json;
    ///
    /// let registry = HandlerRegistry::builder()
    ///     .handler_fn("double", |data| async move {
    ///         match data["n"].as_i64() {
    ///             Some(n) => Ok(json!(n * 2)),
    ///             None => Err(JobError::new("n missing")),
    ///         }
    ///     })
    ///     .build();
    ///
    /// assert!(registry.contains("double"));
    /// ```
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Look up the handler for `job_type`.
    pub fn get(&self, job_type: &str) -> Option<&Arc<dyn JobHandler>> {
        self.handlers.get(job_type)
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    /// Registered job types, sorted.
    pub fn job_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for `job_type`.
    pub async fn execute(
        &self,
        job_type: &str,
        data: serde_json::Value,
    ) -> Result<serde_json::Value, DispatchError> {
        let handler = self
            .get(job_type)
            .ok_or_else(|| DispatchError::UnknownJobType(job_type.to_string()))?;
        Ok(handler.execute(data).await?)
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler. A later registration for the same type wins.
    pub fn handler(mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Register an async closure.
    pub fn handler_fn<F, Fut>(self, job_type: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, JobError>> + Send + 'static,
    {
        let boxed = move |data: serde_json::Value| -> BoxedJobFuture { Box::pin(f(data)) };
        self.handler(job_type, FnHandler { f: boxed })
    }

    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}
