//! In-memory store: one async mutex over all tables.

use tokio::sync::Mutex;

use super::Tables;

/// Single-writer store handle. Created by the process entrypoint and passed
/// to every component that needs it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to every table. `f` is synchronous, so
    /// the lock is never held across an await point.
    pub async fn transact<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().await;
        f(&mut tables)
    }

    pub async fn read<R>(&self, f: impl FnOnce(&Tables) -> R) -> R {
        let tables = self.tables.lock().await;
        f(&tables)
    }
}
