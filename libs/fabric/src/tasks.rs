//! Request/response correlation.
//!
//! A [`TaskTable`] owns every pending call made through it: each entry pairs
//! the outbound request with a one-shot callback that fires when the matching
//! response arrives (or when the entry's deadline expires). Entries are keyed
//! exclusively by `task_id`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use codec::{Direction, TaskPayload};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, warn};

use crate::{FabricError, Result};

/// Length of minted task identifiers.
pub const TASK_ID_LEN: usize = 16;

/// One-shot response callback. Runs exactly once, outside the table lock.
pub type ResponseCallback = Box<dyn FnOnce(TaskPayload) + Send>;

/// Draws a [`TASK_ID_LEN`]-character id from the alphanumeric alphabet.
///
/// Uniqueness against pending entries is the table's job
/// ([`TaskTable::mint_id`]); emitters that need an uncorrelated id (event
/// broadcasts) use this directly.
pub fn random_task_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TASK_ID_LEN)
        .map(char::from)
        .collect()
}

struct TaskEntry {
    request: TaskPayload,
    callback: ResponseCallback,
    created_at: Instant,
}

/// Table of pending tasks awaiting their responses.
///
/// Internally a single coarse mutex around the id map; the lock is held only
/// for map operations and always released before a callback runs.
pub struct TaskTable {
    inner: Mutex<HashMap<String, TaskEntry>>,
    deadline: Option<Duration>,
}

impl TaskTable {
    /// `deadline` bounds how long an entry may stay pending before
    /// [`TaskTable::sweep_expired`] reclaims it; `None` keeps entries until
    /// answered.
    pub fn new(deadline: Option<Duration>) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            deadline,
        }
    }

    /// Registers a pending task under `request.task_id`.
    ///
    /// # Errors
    ///
    /// [`FabricError::DuplicateTask`] if the id is already pending — a
    /// colliding id must never silently overwrite an outstanding entry.
    pub fn create(&self, request: TaskPayload, callback: ResponseCallback) -> Result<()> {
        let mut tasks = self.inner.lock();
        if tasks.contains_key(&request.task_id) {
            return Err(FabricError::DuplicateTask(request.task_id));
        }
        let task_id = request.task_id.clone();
        tasks.insert(
            task_id,
            TaskEntry {
                request,
                callback,
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    /// Completes a pending task with its response.
    ///
    /// Removes the entry, fires its callback exactly once with `response`,
    /// and returns the detached original request.
    ///
    /// # Errors
    ///
    /// [`FabricError::NotAResponse`] if `direction` is not
    /// [`Direction::Response`]; [`FabricError::UnknownTask`] if no entry is
    /// pending under the response's id.
    pub fn respond(&self, direction: Direction, response: TaskPayload) -> Result<TaskPayload> {
        if direction != Direction::Response {
            return Err(FabricError::NotAResponse(response.task_id));
        }

        let entry = {
            let mut tasks = self.inner.lock();
            tasks
                .remove(&response.task_id)
                .ok_or_else(|| FabricError::UnknownTask(response.task_id.clone()))?
        };

        debug!(task_id = %response.task_id, "task completed");
        (entry.callback)(response);
        Ok(entry.request)
    }

    /// Mints a task id that is unique among currently pending entries.
    ///
    /// Ids are [`TASK_ID_LEN`] characters from the alphanumeric alphabet;
    /// collisions with pending ids are re-drawn rather than ignored.
    pub fn mint_id(&self) -> String {
        self.mint_id_with(random_task_id)
    }

    fn mint_id_with(&self, mut draw: impl FnMut() -> String) -> String {
        let tasks = self.inner.lock();
        loop {
            let id = draw();
            if !tasks.contains_key(&id) {
                return id;
            }
            debug!(task_id = %id, "minted id collides with a pending task, re-drawing");
        }
    }

    /// Whether an entry is pending under `task_id`.
    pub fn contains(&self, task_id: &str) -> bool {
        self.inner.lock().contains_key(task_id)
    }

    /// Number of pending entries.
    pub fn pending(&self) -> usize {
        self.inner.lock().len()
    }

    /// Reclaims entries older than the table deadline.
    ///
    /// Each expired entry's callback fires exactly once with a synthesized
    /// error response, so abandoned calls surface the same way answered ones
    /// do. Returns the number reclaimed. No-op for tables without a deadline.
    pub fn sweep_expired(&self) -> usize {
        let Some(deadline) = self.deadline else {
            return 0;
        };

        let now = Instant::now();
        let expired: Vec<TaskEntry> = {
            let mut tasks = self.inner.lock();
            let stale: Vec<String> = tasks
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created_at) >= deadline)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| tasks.remove(&id))
                .collect()
        };

        let reclaimed = expired.len();
        for entry in expired {
            let task_id = entry.request.task_id.clone();
            warn!(task_id = %task_id, "task exceeded deadline, completing with error");
            (entry.callback)(TaskPayload {
                task_id,
                method: None,
                event: None,
                data: None,
                error: Some("task deadline exceeded".to_string()),
            });
        }
        reclaimed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request(task_id: &str) -> TaskPayload {
        TaskPayload {
            task_id: task_id.to_string(),
            method: Some("test".to_string()),
            event: None,
            data: None,
            error: None,
        }
    }

    fn response(task_id: &str) -> TaskPayload {
        TaskPayload {
            task_id: task_id.to_string(),
            method: None,
            event: None,
            data: Some(serde_json::json!([])),
            error: None,
        }
    }

    #[test]
    fn duplicate_create_fails() {
        let table = TaskTable::new(None);
        table.create(request("T1"), Box::new(|_| {})).unwrap();

        let err = table.create(request("T1"), Box::new(|_| {})).unwrap_err();
        assert!(matches!(err, FabricError::DuplicateTask(id) if id == "T1"));
        assert_eq!(table.pending(), 1);
    }

    #[test]
    fn respond_to_unknown_id_fails() {
        let table = TaskTable::new(None);
        let err = table
            .respond(Direction::Response, response("missing"))
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownTask(id) if id == "missing"));
    }

    #[test]
    fn respond_rejects_request_direction() {
        let table = TaskTable::new(None);
        table.create(request("T1"), Box::new(|_| {})).unwrap();

        let err = table
            .respond(Direction::Request, response("T1"))
            .unwrap_err();
        assert!(matches!(err, FabricError::NotAResponse(_)));
        // The entry must survive a rejected respond.
        assert!(table.contains("T1"));
    }

    #[test]
    fn respond_fires_callback_once_and_retires_the_id() {
        let table = TaskTable::new(None);
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        table
            .create(
                request("T1"),
                Box::new(move |resp| {
                    assert_eq!(resp.task_id, "T1");
                    assert_eq!(resp.data, Some(serde_json::json!([])));
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        let original = table.respond(Direction::Response, response("T1")).unwrap();
        assert_eq!(original.method.as_deref(), Some("test"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The id is unusable afterwards.
        assert!(!table.contains("T1"));
        assert!(matches!(
            table.respond(Direction::Response, response("T1")),
            Err(FabricError::UnknownTask(_))
        ));
    }

    #[test]
    fn minted_ids_avoid_pending_collisions() {
        let table = TaskTable::new(None);
        table.create(request("COLLIDE"), Box::new(|_| {})).unwrap();

        let mut draws = vec!["FRESH".to_string(), "COLLIDE".to_string()];
        let id = table.mint_id_with(|| draws.pop().expect("draws exhausted"));
        assert_eq!(id, "FRESH");
    }

    #[test]
    fn minted_ids_use_the_full_alphabet_length() {
        let table = TaskTable::new(None);
        let id = table.mint_id();
        assert_eq!(id.len(), TASK_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(table.mint_id(), id);
    }

    #[test]
    fn sweep_reclaims_expired_entries_with_an_error() {
        let table = TaskTable::new(Some(Duration::ZERO));
        let calls = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&calls);
        table
            .create(
                request("T1"),
                Box::new(move |resp| {
                    assert_eq!(resp.error.as_deref(), Some("task deadline exceeded"));
                    seen.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(table.sweep_expired(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(table.pending(), 0);

        // Already reclaimed; nothing left to sweep or answer.
        assert_eq!(table.sweep_expired(), 0);
        assert!(matches!(
            table.respond(Direction::Response, response("T1")),
            Err(FabricError::UnknownTask(_))
        ));
    }

    #[test]
    fn tables_without_deadline_never_expire() {
        let table = TaskTable::new(None);
        table.create(request("T1"), Box::new(|_| {})).unwrap();
        assert_eq!(table.sweep_expired(), 0);
        assert!(table.contains("T1"));
    }
}
