//! Storage for the single current position record.
//!
//! The controller only needs read/write access to one `Position`. Two stores are
//! provided:
//! - `MemoryPositionStore`: process-local, for tests and dry runs
//! - `PersistenceManager`: SQLite, survives restarts and keeps an event log

mod sqlite;

pub use sqlite::{PersistenceManager, PositionEvent};

use crate::error::Result;
use crate::position::Position;
use std::sync::RwLock;

/// Read/write access to the current position record.
pub trait PositionStore: Send + Sync {
    /// The last saved position, if any.
    fn load(&self) -> Result<Option<Position>>;

    /// Replace the current position record.
    fn save(&self, position: &Position) -> Result<()>;
}

/// In-memory position store.
#[derive(Debug, Default)]
pub struct MemoryPositionStore {
    current: RwLock<Option<Position>>,
}

impl MemoryPositionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionStore for MemoryPositionStore {
    fn load(&self) -> Result<Option<Position>> {
        Ok(self
            .current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone()))
    }

    fn save(&self, position: &Position) -> Result<()> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Some(position.clone());
        Ok(())
    }
}
