use super::outcome::{Outcome, Phase};
use crate::channel::{ChannelError, CommandChannel, QueryResult, SessionContext};
use crate::error::{Result, SfDriftError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs one statement at a time over a [`CommandChannel`].
///
/// Statement failures come back as failed [`Outcome`]s. Only connection-level
/// failures are returned as errors.
#[derive(Clone)]
pub struct CommandExecutor {
    channel: Arc<dyn CommandChannel>,
}

impl CommandExecutor {
    pub fn new(channel: Arc<dyn CommandChannel>) -> Self {
        Self { channel }
    }

    pub async fn ensure_connected(&self, context: &SessionContext) -> Result<()> {
        self.channel.ping(context).await.map_err(|e| match e {
            ChannelError::Connection(msg) | ChannelError::Statement(msg) => {
                SfDriftError::Connection(msg)
            }
        })
    }

    pub async fn execute(
        &self,
        context: &SessionContext,
        phase: Phase,
        description: impl Into<String>,
        sql: &str,
    ) -> Result<Outcome> {
        let description = description.into();
        debug!(phase = %phase, context = %context, sql = %sql, "executing statement");

        match self.channel.execute(context, sql).await {
            Ok(_) => {
                debug!(phase = %phase, description = %description, "statement succeeded");
                Ok(Outcome::applied(phase, description))
            }
            Err(ChannelError::Statement(msg)) => {
                warn!(phase = %phase, description = %description, error = %msg, "statement failed");
                Ok(Outcome::failed(phase, description, &msg))
            }
            Err(ChannelError::Connection(msg)) => Err(SfDriftError::Connection(msg)),
        }
    }

    /// Rows of a read-only query, or `None` when the statement itself failed.
    pub async fn fetch_all(
        &self,
        context: &SessionContext,
        sql: &str,
    ) -> Result<Option<QueryResult>> {
        match self.channel.execute(context, sql).await {
            Ok(result) => Ok(Some(result)),
            Err(ChannelError::Statement(msg)) => {
                debug!(context = %context, sql = %sql, error = %msg, "query failed");
                Ok(None)
            }
            Err(ChannelError::Connection(msg)) => Err(SfDriftError::Connection(msg)),
        }
    }
}
