//! Request-scoped context
//!
//! Every entry point (HTTP handler, scheduled ingestion run) builds one
//! [`RequestContext`] and passes it down explicitly. It carries the trace id
//! used in every log line and the [`OperationKind`] that decides how a
//! storage failure is reported.

use crate::core::error::{StorageError, StormError, StormResult};
use crate::core::store::BackendUnavailable;
use std::fmt;
use std::future::Future;
use tracing::Instrument;
use uuid::Uuid;

/// Header used to propagate a caller-supplied trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// What kind of work a call performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Read,
    Write,
    /// Scheduled warning ingestion (reads and writes)
    Ingest,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Write => "write",
            OperationKind::Ingest => "ingest",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context passed alongside every core call
#[derive(Debug, Clone)]
pub struct RequestContext {
    trace_id: Uuid,
    operation: OperationKind,
}

impl RequestContext {
    /// New context with a fresh trace id
    pub fn new(operation: OperationKind) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            operation,
        }
    }

    /// Context continuing an existing trace
    pub fn with_trace_id(trace_id: Uuid, operation: OperationKind) -> Self {
        Self {
            trace_id,
            operation,
        }
    }

    /// Same trace, different operation kind
    pub fn for_operation(&self, operation: OperationKind) -> Self {
        Self {
            trace_id: self.trace_id,
            operation,
        }
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// Span tagging everything below it with this context
    pub fn span(&self, name: &'static str) -> tracing::Span {
        tracing::info_span!(
            "op",
            call = name,
            trace_id = %self.trace_id,
            operation = %self.operation
        )
    }

    /// Classify a storage collaborator failure by this context's operation kind
    ///
    /// The error is logged here, then handed back for propagation.
    pub fn storage_error(&self, err: anyhow::Error) -> StormError {
        tracing::error!(
            trace_id = %self.trace_id,
            operation = %self.operation,
            error = %err,
            "storage call failed"
        );
        if let Some(down) = err.downcast_ref::<BackendUnavailable>() {
            return StormError::Storage(StorageError::Unavailable {
                backend: down.backend.clone(),
            });
        }
        let message = err.to_string();
        let storage = match self.operation {
            OperationKind::Read => StorageError::ReadFailed { message },
            OperationKind::Write | OperationKind::Ingest => StorageError::WriteFailed { message },
        };
        StormError::Storage(storage)
    }

    /// Run a storage call, classifying its failure with [`Self::storage_error`]
    pub async fn storage<T, F>(&self, fut: F) -> StormResult<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        fut.await.map_err(|e| self.storage_error(e))
    }

    /// Run `fut` inside this context's span, logging its outcome
    pub async fn instrument<T, F>(&self, name: &'static str, fut: F) -> StormResult<T>
    where
        F: Future<Output = StormResult<T>>,
    {
        let result = fut.instrument(self.span(name)).await;
        match &result {
            Ok(_) => tracing::debug!(trace_id = %self.trace_id, call = name, "completed"),
            Err(e) if e.is_client_error() => {
                tracing::debug!(trace_id = %self.trace_id, call = name, error = %e, "rejected")
            }
            Err(e) => tracing::warn!(trace_id = %self.trace_id, call = name, error = %e, "failed"),
        }
        result
    }
}
