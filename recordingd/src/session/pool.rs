use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use parking_lot::Mutex;
use crate::config::ConnectionConfig;
use crate::error::ApiError;
use crate::session::{Connector, SessionError, TargetSession};
use crate::store::Target;

/// Hands out target sessions for the length of one task.
///
/// Idle sessions are kept per connect URL. A session goes back to the pool
/// only when the task that borrowed it finished without a session or
/// internal failure; errors, timeouts, cancellation and panics all discard it.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    idle: Mutex<HashMap<String, Vec<Arc<dyn TargetSession>>>>,
    max_idle_per_target: usize,
    connect_timeout: Duration,
    task_timeout: Duration,
}

/// A borrowed session. Dropping it releases the session.
struct Lease<'a> {
    manager: &'a ConnectionManager,
    connect_url: String,
    session: Option<Arc<dyn TargetSession>>,
    reusable: bool,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.manager.release(&self.connect_url, session, self.reusable);
        }
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &ConnectionConfig) -> Self {
        Self {
            connector,
            idle: Mutex::new(HashMap::new()),
            max_idle_per_target: config.max_idle_per_target,
            connect_timeout: config.connect_timeout(),
            task_timeout: config.task_timeout(),
        }
    }

    /// Run `task` against a session for `target`.
    ///
    /// Errors raised by the task itself come back untouched; a task that
    /// outlives the task timeout fails as `Upstream`.
    pub async fn execute_connected_task<T, F, Fut>(&self, target: &Target, task: F) -> Result<T, ApiError>
    where
        F: FnOnce(Arc<dyn TargetSession>) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let session = self.acquire(target).await?;
        let mut lease = Lease {
            manager: self,
            connect_url: target.connect_url.clone(),
            session: Some(session.clone()),
            reusable: false,
        };

        let result = match tokio::time::timeout(self.task_timeout, task(session)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Task against {} timed out", target.connect_url);
                Err(SessionError::Timeout(self.task_timeout).into())
            }
        };

        lease.reusable = !matches!(
            result,
            Err(ApiError::Upstream { .. }) | Err(ApiError::Unexpected(_))
        );
        result
    }

    /// Number of idle sessions pooled for a connect URL
    pub fn idle_count(&self, connect_url: &str) -> usize {
        self.idle.lock().get(connect_url).map_or(0, Vec::len)
    }

    async fn acquire(&self, target: &Target) -> Result<Arc<dyn TargetSession>, SessionError> {
        let pooled = self
            .idle
            .lock()
            .get_mut(&target.connect_url)
            .and_then(Vec::pop);
        if let Some(session) = pooled {
            tracing::debug!("Reusing pooled session for {}", target.connect_url);
            return Ok(session);
        }

        tracing::debug!("Opening session to {}", target.connect_url);
        match tokio::time::timeout(self.connect_timeout, self.connector.connect(target)).await {
            Ok(session) => session,
            Err(_) => Err(SessionError::Timeout(self.connect_timeout)),
        }
    }

    fn release(&self, connect_url: &str, session: Arc<dyn TargetSession>, reusable: bool) {
        if !reusable {
            tracing::debug!("Discarding session for {}", connect_url);
            return;
        }

        let mut idle = self.idle.lock();
        let sessions = idle.entry(connect_url.to_string()).or_default();
        if sessions.len() < self.max_idle_per_target {
            sessions.push(session);
        }
    }
}
