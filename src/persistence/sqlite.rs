//! SQLite persistence for the hedged position.
//!
//! Persists state to survive restarts:
//! - The current position record (singleton row)
//! - An append-only log of every status transition

use super::PositionStore;
use crate::error::{HedgeError, Result as HedgeResult};
use crate::position::{Position, PositionStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{debug, info};

/// One row of the transition log.
#[derive(Debug, Clone)]
pub struct PositionEvent {
    pub timestamp: DateTime<Utc>,
    pub status: PositionStatus,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub hedge_size: Decimal,
    pub detail: Option<String>,
}

/// SQLite-based persistence manager.
pub struct PersistenceManager {
    conn: Mutex<Connection>,
}

impl PersistenceManager {
    /// Create a new persistence manager, initializing the database if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let manager = Self {
            conn: Mutex::new(conn),
        };
        manager.init_schema()?;

        info!("Persistence manager initialized at {:?}", db_path.as_ref());
        Ok(manager)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                r#"
            -- Current position (singleton row)
            CREATE TABLE IF NOT EXISTS position_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                status TEXT NOT NULL,
                lower_price TEXT NOT NULL,
                upper_price TEXT NOT NULL,
                pool_asset_amount TEXT NOT NULL,
                paired_asset_amount TEXT NOT NULL,
                hedge_size TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                pool_handle TEXT,
                hedge_order_ref TEXT,
                fault TEXT,
                opened_at TEXT,
                updated_at TEXT NOT NULL,
                rebalance_count INTEGER NOT NULL
            );

            -- Transition log
            CREATE TABLE IF NOT EXISTS position_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                status TEXT NOT NULL,
                lower_price TEXT NOT NULL,
                upper_price TEXT NOT NULL,
                hedge_size TEXT NOT NULL,
                detail TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_position_events_ts ON position_events(timestamp);
            "#,
            )
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Save the current position and append a transition event.
    pub fn save_position(&self, position: &Position) -> Result<()> {
        let pool_handle = position
            .pool_handle
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let hedge_order_ref = position
            .hedge_order_ref
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let fault = position.fault.as_ref().map(serde_json::to_string).transpose()?;
        let detail = position
            .fault
            .as_ref()
            .map(|f| format!("{} failed: {}", f.step, f.error));

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            INSERT OR REPLACE INTO position_state
                (id, status, lower_price, upper_price, pool_asset_amount, paired_asset_amount,
                 hedge_size, entry_price, pool_handle, hedge_order_ref, fault, opened_at,
                 updated_at, rebalance_count)
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                position.status.as_str(),
                position.lower_price.to_string(),
                position.upper_price.to_string(),
                position.pool_asset_amount.to_string(),
                position.paired_asset_amount.to_string(),
                position.hedge_size.to_string(),
                position.entry_price.to_string(),
                pool_handle,
                hedge_order_ref,
                fault,
                position.opened_at.map(|t| t.to_rfc3339()),
                position.updated_at.to_rfc3339(),
                position.rebalance_count,
            ],
        )?;

        tx.execute(
            r#"
            INSERT INTO position_events (timestamp, status, lower_price, upper_price, hedge_size, detail)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                position.updated_at.to_rfc3339(),
                position.status.as_str(),
                position.lower_price.to_string(),
                position.upper_price.to_string(),
                position.hedge_size.to_string(),
                detail,
            ],
        )?;

        tx.commit()?;

        debug!(status = %position.status, "Position state saved");
        Ok(())
    }

    /// Load the current position, if one has been saved.
    pub fn load_position(&self) -> Result<Option<Position>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                r#"
                SELECT status, lower_price, upper_price, pool_asset_amount, paired_asset_amount,
                       hedge_size, entry_price, pool_handle, hedge_order_ref, fault, opened_at,
                       updated_at, rebalance_count
                FROM position_state WHERE id = 1
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, Option<String>>(8)?,
                        row.get::<_, Option<String>>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, String>(11)?,
                        row.get::<_, u32>(12)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            status,
            lower,
            upper,
            pool_amount,
            paired_amount,
            hedge_size,
            entry_price,
            pool_handle,
            hedge_order_ref,
            fault,
            opened_at,
            updated_at,
            rebalance_count,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(Position {
            status: PositionStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            lower_price: parse_decimal(&lower)?,
            upper_price: parse_decimal(&upper)?,
            pool_asset_amount: parse_decimal(&pool_amount)?,
            paired_asset_amount: parse_decimal(&paired_amount)?,
            hedge_size: parse_decimal(&hedge_size)?,
            entry_price: parse_decimal(&entry_price)?,
            pool_handle: pool_handle
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Invalid pool handle")?,
            hedge_order_ref: hedge_order_ref
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Invalid hedge order ref")?,
            fault: fault
                .map(|s| serde_json::from_str(&s))
                .transpose()
                .context("Invalid fault record")?,
            opened_at: opened_at.map(|s| parse_time(&s)).transpose()?,
            updated_at: parse_time(&updated_at)?,
            rebalance_count,
        }))
    }

    /// Most recent transition events, newest first.
    pub fn recent_events(&self, limit: usize) -> Result<Vec<PositionEvent>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            r#"
            SELECT timestamp, status, lower_price, upper_price, hedge_size, detail
            FROM position_events ORDER BY id DESC LIMIT ?1
            "#,
        )?;

        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (timestamp, status, lower, upper, hedge_size, detail) = row?;
            events.push(PositionEvent {
                timestamp: parse_time(&timestamp)?,
                status: PositionStatus::from_str(&status).map_err(anyhow::Error::msg)?,
                lower_price: parse_decimal(&lower)?,
                upper_price: parse_decimal(&upper)?,
                hedge_size: parse_decimal(&hedge_size)?,
                detail,
            });
        }
        Ok(events)
    }
}

impl PositionStore for PersistenceManager {
    fn load(&self) -> HedgeResult<Option<Position>> {
        self.load_position()
            .map_err(|e| HedgeError::Persistence(format!("{:#}", e)))
    }

    fn save(&self, position: &Position) -> HedgeResult<()> {
        self.save_position(position)
            .map_err(|e| HedgeError::Persistence(format!("{:#}", e)))
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).with_context(|| format!("Invalid decimal: {}", s))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp: {}", s))?
        .with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{FailedStep, LegState, OrderRef, PositionHandle};
    use rust_decimal_macros::dec;

    fn active_position() -> Position {
        Position {
            lower_price: dec!(0.95),
            upper_price: dec!(1.05),
            pool_asset_amount: dec!(500),
            paired_asset_amount: dec!(500),
            hedge_size: dec!(500),
            pool_handle: Some(PositionHandle::new("0xpos")),
            hedge_order_ref: Some(OrderRef {
                order_id: "77".to_string(),
                symbol: "SUIUSDC".to_string(),
                requested_quantity: dec!(500),
                filled_quantity: dec!(500),
            }),
            status: PositionStatus::Active,
            entry_price: dec!(1.00),
            opened_at: Some(Utc::now()),
            ..Position::uninitialized()
        }
    }

    #[test]
    fn test_save_and_load_position() {
        let manager = PersistenceManager::new(":memory:").unwrap();
        assert!(manager.load_position().unwrap().is_none());

        let position = active_position();
        manager.save_position(&position).unwrap();

        let loaded = manager.load_position().unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Active);
        assert_eq!(loaded.lower_price, dec!(0.95));
        assert_eq!(loaded.hedge_size, dec!(500));
        assert_eq!(loaded.pool_handle, position.pool_handle);
        assert_eq!(loaded.hedge_order_ref, position.hedge_order_ref);
    }

    #[test]
    fn test_fault_round_trip_and_event_log() {
        let manager = PersistenceManager::new(":memory:").unwrap();

        let position = active_position();
        manager.save(&position).unwrap();

        let faulted = position
            .clear_pool_leg()
            .into_faulted(FailedStep::HedgeClose, LegState::Unknown, "timed out");
        manager.save(&faulted).unwrap();

        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(loaded.status, PositionStatus::Faulted);
        assert!(loaded.pool_handle.is_none());
        let fault = loaded.fault.unwrap();
        assert_eq!(fault.step, FailedStep::HedgeClose);
        assert_eq!(fault.legs, LegState::Unknown);

        let events = manager.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, PositionStatus::Faulted);
        assert_eq!(
            events[0].detail.as_deref(),
            Some("hedge close failed: timed out")
        );
        assert_eq!(events[1].status, PositionStatus::Active);
    }
}
