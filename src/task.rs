//! Background task bookkeeping shared by the export and build workers
//! (spec.md §4.6/§9): a registry of cancellable, progress-reporting tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

fn unix_time_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// A point-in-time, serializable view of one task. Carries everything an
/// outer layer needs without reaching into the registry's internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub status: TaskStatus,
    pub done: u64,
    pub total: u64,
    pub error: Option<String>,
    pub start_time: u64,
    pub end_time: Option<u64>,
    pub duration_seconds: Option<u64>,
}

struct TaskEntry {
    status: RwLock<TaskStatus>,
    done: AtomicU64,
    total: AtomicU64,
    cancel: AtomicBool,
    error: RwLock<Option<String>>,
    start_time: u64,
    end_time: AtomicU64,
}

impl TaskEntry {
    fn new() -> Self {
        Self {
            status: RwLock::new(TaskStatus::Pending),
            done: AtomicU64::new(0),
            total: AtomicU64::new(0),
            cancel: AtomicBool::new(false),
            error: RwLock::new(None),
            start_time: unix_time_secs(),
            end_time: AtomicU64::new(0),
        }
    }
}

/// A cheap, cloneable reference to one task's live state. Held by the
/// worker doing the work, so it can report progress and observe cancellation.
#[derive(Clone)]
pub struct TaskHandle {
    id: String,
    entry: Arc<TaskEntry>,
}

impl TaskHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_processing(&self) {
        *self.entry.status.write().unwrap() = TaskStatus::Processing;
    }

    pub fn set_progress(&self, done: u64, total: u64) {
        self.entry.done.store(done, Ordering::Relaxed);
        self.entry.total.store(total, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.cancel.load(Ordering::Relaxed)
    }

    pub fn set_completed(&self) {
        self.entry.end_time.store(unix_time_secs(), Ordering::Relaxed);
        *self.entry.status.write().unwrap() = TaskStatus::Completed;
    }

    pub fn set_failed(&self, message: impl Into<String>) {
        *self.entry.error.write().unwrap() = Some(message.into());
        self.entry.end_time.store(unix_time_secs(), Ordering::Relaxed);
        *self.entry.status.write().unwrap() = TaskStatus::Failed;
    }

    pub fn set_cancelled(&self) {
        self.entry.end_time.store(unix_time_secs(), Ordering::Relaxed);
        *self.entry.status.write().unwrap() = TaskStatus::Cancelled;
    }
}

/// Registry of all tasks known to this process. Cancellation is a one-shot
/// flag: once set, it never clears, and workers are expected to poll it and
/// transition to `Cancelled` rather than `Completed`.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self { tasks: RwLock::new(HashMap::new()) }
    }

    pub fn create(&self, id: impl Into<String>) -> TaskHandle {
        let id = id.into();
        let entry = Arc::new(TaskEntry::new());
        self.tasks.write().unwrap().insert(id.clone(), entry.clone());
        TaskHandle { id, entry }
    }

    pub fn snapshot(&self, id: &str) -> Option<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap();
        let entry = tasks.get(id)?;
        let end_raw = entry.end_time.load(Ordering::Relaxed);
        let end_time = if end_raw == 0 { None } else { Some(end_raw) };
        Some(TaskSnapshot {
            id: id.to_string(),
            status: *entry.status.read().unwrap(),
            done: entry.done.load(Ordering::Relaxed),
            total: entry.total.load(Ordering::Relaxed),
            error: entry.error.read().unwrap().clone(),
            start_time: entry.start_time,
            end_time,
            duration_seconds: end_time.map(|end| end.saturating_sub(entry.start_time)),
        })
    }

    pub fn list(&self) -> Vec<TaskSnapshot> {
        let tasks = self.tasks.read().unwrap();
        tasks
            .keys()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Sets the one-shot cancellation flag. Returns `false` if no such task
    /// exists; does nothing to a task that already finished.
    pub fn cancel(&self, id: &str) -> bool {
        let tasks = self.tasks.read().unwrap();
        match tasks.get(id) {
            Some(entry) => {
                entry.cancel.store(true, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        self.tasks.write().unwrap().remove(id).is_some()
    }
}
