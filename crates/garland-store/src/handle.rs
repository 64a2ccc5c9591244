//! Serialized async access to the database.
//!
//! `rusqlite::Connection` is not `Sync`, and the sync engine runs record
//! pulls concurrently. [`StoreHandle`] keeps the connection on one dedicated
//! worker thread; async callers submit closures and await the result, so
//! every store operation executes in submission order without blocking the
//! async executor.

use tokio::sync::{mpsc, oneshot};

use crate::database::Database;
use crate::error::{Result, StoreError};

type Job = Box<dyn FnOnce(&mut Database) + Send>;

/// Cloneable async handle to a [`Database`] owned by a worker thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<Job>,
}

impl StoreHandle {
    /// Move the database onto a dedicated worker thread and return a handle.
    ///
    /// The worker exits once every handle clone has been dropped.
    pub fn spawn(db: Database) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(64);

        std::thread::Builder::new()
            .name("garland-store".into())
            .spawn(move || {
                let mut db = db;
                while let Some(job) = rx.blocking_recv() {
                    job(&mut db);
                }
                tracing::debug!("store worker stopped");
            })
            .expect("failed to spawn store worker thread");

        Self { tx }
    }

    /// Run a closure against the database on the worker thread and await its
    /// result.
    pub async fn with<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |db| {
            let _ = reply_tx.send(f(db));
        });

        self.tx
            .send(job)
            .await
            .map_err(|_| StoreError::WorkerStopped)?;

        reply_rx.await.map_err(|_| StoreError::WorkerStopped)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recipient;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let handle = StoreHandle::spawn(Database::open_in_memory().unwrap());

        let alice = Recipient::new("Alice");
        let id = alice.id;

        handle
            .with(move |db| db.insert_recipient(&alice))
            .await
            .unwrap();

        let fetched = handle.with(move |db| db.get_recipient(id)).await.unwrap();
        assert_eq!(fetched.name, "Alice");
    }

    #[tokio::test]
    async fn errors_propagate_to_caller() {
        let handle = StoreHandle::spawn(Database::open_in_memory().unwrap());

        let missing = uuid::Uuid::new_v4();
        let result = handle.with(move |db| db.get_recipient(missing)).await;
        assert!(matches!(result, Err(StoreError::NotFound)));
    }
}
