//! Session acquisition seam between the executor and the database driver.

use async_trait::async_trait;

use tenantgraph_core::{ExecutionError, Params, Row};

/// One acquired database session, backed by a single transaction.
///
/// Callers must end every session they open with `commit` or `rollback`,
/// on every exit path. [`settle`] does this from a call's outcome.
#[async_trait]
pub trait GraphSession: Send {
    /// Submit one query and collect all of its rows.
    async fn run(&mut self, query: &str, params: &Params) -> Result<Vec<Row>, ExecutionError>;

    /// Commit the session's work and release it.
    async fn commit(self: Box<Self>) -> Result<(), ExecutionError>;

    /// Discard the session's work and release it. Failures are logged.
    async fn rollback(self: Box<Self>);
}

/// Hands out independent sessions; shared by all concurrent calls.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn GraphSession>, ExecutionError>;
}

/// End `session` according to `outcome`: commit on success, roll back on
/// failure. A failed commit turns the outcome into that error.
pub(crate) async fn settle<T>(
    session: Box<dyn GraphSession>,
    outcome: Result<T, ExecutionError>,
) -> Result<T, ExecutionError> {
    match outcome {
        Ok(value) => {
            session.commit().await?;
            Ok(value)
        }
        Err(e) => {
            session.rollback().await;
            Err(e)
        }
    }
}
