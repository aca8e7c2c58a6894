use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OwnedMutexGuard};
use shared::types::RecordingState;
use crate::store::db::RecordingDb;
use crate::store::{ActiveRecording, StoreError, Target};

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Commands sent to the store thread
pub enum StoreCommand {
    UpsertTarget {
        connect_url: String,
        alias: Option<String>,
        reply: Reply<Target>,
    },
    FindTargetById(i64, Reply<Option<Target>>),
    FindTargetByConnectUrl(String, Reply<Option<Target>>),
    ListTargets(Reply<Vec<Target>>),
    DeleteTarget(i64, Reply<bool>),
    InsertRecording(ActiveRecording, Reply<()>),
    DeleteRecording {
        target_id: i64,
        remote_id: i64,
        reply: Reply<bool>,
    },
    UpdateRecordingState {
        target_id: i64,
        remote_id: i64,
        state: RecordingState,
        reply: Reply<bool>,
    },
    Shutdown,
}

/// Exclusive hold on one target for the span of a mutating request.
pub type TargetLock = OwnedMutexGuard<()>;

/// Handle to the recording store. Every database call runs on a single
/// dedicated thread, so individual operations never interleave.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreCommand>,
    locks: Arc<Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>>,
}

impl StoreHandle {
    /// Spawn a new store thread with the given database
    pub fn spawn(mut db: RecordingDb) -> Self {
        let (tx, mut rx) = mpsc::channel::<StoreCommand>(256);

        thread::spawn(move || {
            while let Some(cmd) = rx.blocking_recv() {
                match cmd {
                    StoreCommand::UpsertTarget { connect_url, alias, reply } => {
                        let _ = reply.send(db.upsert_target(&connect_url, alias.as_deref()));
                    }
                    StoreCommand::FindTargetById(id, reply) => {
                        let _ = reply.send(db.find_target_by_id(id));
                    }
                    StoreCommand::FindTargetByConnectUrl(connect_url, reply) => {
                        let _ = reply.send(db.find_target_by_connect_url(&connect_url));
                    }
                    StoreCommand::ListTargets(reply) => {
                        let _ = reply.send(db.list_targets());
                    }
                    StoreCommand::DeleteTarget(id, reply) => {
                        let _ = reply.send(db.delete_target(id));
                    }
                    StoreCommand::InsertRecording(recording, reply) => {
                        let _ = reply.send(db.insert_recording(&recording));
                    }
                    StoreCommand::DeleteRecording { target_id, remote_id, reply } => {
                        let _ = reply.send(db.delete_recording(target_id, remote_id));
                    }
                    StoreCommand::UpdateRecordingState { target_id, remote_id, state, reply } => {
                        let _ = reply.send(db.update_recording_state(target_id, remote_id, state));
                    }
                    StoreCommand::Shutdown => {
                        tracing::info!("Store thread shutting down");
                        break;
                    }
                }
            }
        });

        Self {
            tx,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn request<T>(&self, cmd: impl FnOnce(Reply<T>) -> StoreCommand) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(cmd(reply)).await.map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }

    /// Take the per-target lock. Mutating requests hold it from the first
    /// lookup until their store write has committed, so two requests against
    /// the same target are fully serialized.
    ///
    /// Entries live until the target is deleted, so only lock ids of targets
    /// known to exist.
    pub async fn lock_target(&self, target_id: i64) -> TargetLock {
        let lock = {
            let mut locks = self.locks.lock();
            locks.entry(target_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of targets with a lock entry
    #[cfg(test)]
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    pub async fn upsert_target(&self, connect_url: String, alias: Option<String>) -> Result<Target, StoreError> {
        self.request(|reply| StoreCommand::UpsertTarget { connect_url, alias, reply })
            .await
    }

    pub async fn find_target_by_id(&self, id: i64) -> Result<Option<Target>, StoreError> {
        self.request(|reply| StoreCommand::FindTargetById(id, reply)).await
    }

    /// Look up a target by connect URL; absence is an error.
    pub async fn find_target_by_connect_url(&self, connect_url: String) -> Result<Target, StoreError> {
        let missing = format!("Target {}", connect_url);
        self.request(|reply| StoreCommand::FindTargetByConnectUrl(connect_url, reply))
            .await?
            .ok_or(StoreError::NotFound(missing))
    }

    pub async fn list_targets(&self) -> Result<Vec<Target>, StoreError> {
        self.request(StoreCommand::ListTargets).await
    }

    pub async fn delete_target(&self, id: i64) -> Result<bool, StoreError> {
        let removed = self.request(|reply| StoreCommand::DeleteTarget(id, reply)).await?;
        if removed {
            self.locks.lock().remove(&id);
        }
        Ok(removed)
    }

    pub async fn insert_recording(&self, recording: ActiveRecording) -> Result<(), StoreError> {
        self.request(|reply| StoreCommand::InsertRecording(recording, reply)).await
    }

    pub async fn delete_recording(&self, target_id: i64, remote_id: i64) -> Result<bool, StoreError> {
        self.request(|reply| StoreCommand::DeleteRecording { target_id, remote_id, reply })
            .await
    }

    pub async fn update_recording_state(
        &self,
        target_id: i64,
        remote_id: i64,
        state: RecordingState,
    ) -> Result<bool, StoreError> {
        self.request(|reply| StoreCommand::UpdateRecordingState {
            target_id,
            remote_id,
            state,
            reply,
        })
        .await
    }

    /// Shutdown the store thread
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.tx.send(StoreCommand::Shutdown).await.map_err(|_| StoreError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use shared::types::Metadata;

    const URL: &str = "service:jmx:rmi:///jndi/rmi://localhost:9091/jmxrmi";

    fn handle() -> StoreHandle {
        StoreHandle::spawn(RecordingDb::open(":memory:").unwrap())
    }

    fn recording(target_id: i64, remote_id: i64, name: &str) -> ActiveRecording {
        ActiveRecording {
            target_id,
            remote_id,
            name: name.to_string(),
            state: RecordingState::New,
            duration: 0,
            start_time: 0,
            continuous: true,
            to_disk: false,
            max_size: 0,
            max_age: 0,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_thread() {
        let store = handle();
        let target = store.upsert_target(URL.to_string(), None).await.unwrap();

        store.insert_recording(recording(target.id, 1, "r1")).await.unwrap();
        let loaded = store.find_target_by_connect_url(URL.to_string()).await.unwrap();
        assert_eq!(loaded.active_recordings.len(), 1);

        assert!(store.delete_recording(target.id, 1).await.unwrap());
        let loaded = store.find_target_by_id(target.id).await.unwrap().unwrap();
        assert!(loaded.active_recordings.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_connect_url_is_not_found() {
        let store = handle();
        let err = store.find_target_by_connect_url("nope".to_string()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail_closed() {
        let store = handle();
        store.shutdown().await.unwrap();
        // Give the thread a moment to drop its receiver
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = store.list_targets().await.unwrap_err();
        assert!(matches!(err, StoreError::Closed));
    }

    #[tokio::test]
    async fn test_delete_target_drops_recordings_and_lock() {
        let store = handle();
        let target = store.upsert_target(URL.to_string(), None).await.unwrap();
        store.insert_recording(recording(target.id, 1, "r1")).await.unwrap();
        drop(store.lock_target(target.id).await);
        assert_eq!(store.lock_count(), 1);

        assert!(store.delete_target(target.id).await.unwrap());

        assert_eq!(store.lock_count(), 0);
        assert!(store.find_target_by_id(target.id).await.unwrap().is_none());
        assert!(store.list_targets().await.unwrap().is_empty());
        assert!(!store.delete_target(target.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_target_lock_serializes_holders() {
        let store = handle();
        let guard = store.lock_target(1).await;

        let contender = store.clone();
        let waiter = tokio::spawn(async move {
            let _guard = contender.lock_target(1).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        // A different target is not blocked
        let _other = store.lock_target(2).await;

        drop(guard);
        waiter.await.unwrap();
    }
}
