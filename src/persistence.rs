//! Persistence Sink: `SignalRepository` trait plus a SQLite write-behind
//! implementation. Grounded on the teacher's `signals/db_storage.rs`
//! (WAL pragma set, `parking_lot::Mutex<Connection>`), adapted from a
//! synchronous read-path cache to a bounded write-behind queue flushed
//! on size, timer, or shutdown (§4.7 of SPEC_FULL.md).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::models::{Event, Outcome, Signal, TrackedSignal};

const FLUSH_BATCH_SIZE: usize = 50;
const FLUSH_INTERVAL_SECS: u64 = 2;

#[async_trait]
pub trait SignalRepository: Send + Sync {
    async fn append_signal(&self, signal: Signal) -> Result<()>;
    async fn append_event(&self, event: Event) -> Result<()>;
    async fn record_performance(&self, signal: TrackedSignal) -> Result<()>;
    async fn list_open(&self) -> Result<Vec<TrackedSignal>>;
    async fn list_recent(&self, limit: usize) -> Result<Vec<Signal>>;
}

enum PendingWrite {
    Signal(Signal),
    Event(Event),
    Performance(TrackedSignal),
}

pub struct SqliteRepository {
    conn: Arc<Mutex<Connection>>,
    queue: Arc<Mutex<Vec<PendingWrite>>>,
}

impl SqliteRepository {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("opening sqlite database")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;

             CREATE TABLE IF NOT EXISTS signals (
                 id TEXT PRIMARY KEY,
                 symbol TEXT NOT NULL,
                 direction TEXT NOT NULL,
                 score REAL NOT NULL,
                 mtf_score REAL NOT NULL,
                 mtf_aligned INTEGER NOT NULL,
                 trigger_events TEXT NOT NULL,
                 entry_price REAL,
                 tp_price REAL,
                 sl_price REAL,
                 atr REAL,
                 timestamp INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_signals_symbol_ts ON signals(symbol, timestamp DESC);

             CREATE TABLE IF NOT EXISTS events (
                 symbol TEXT NOT NULL,
                 event_type TEXT NOT NULL,
                 payload TEXT NOT NULL,
                 ts INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_events_symbol_ts ON events(symbol, ts DESC);

             CREATE TABLE IF NOT EXISTS performance (
                 symbol TEXT NOT NULL,
                 direction TEXT NOT NULL,
                 entry_price REAL NOT NULL,
                 close_price REAL,
                 outcome TEXT NOT NULL,
                 pnl_pct REAL,
                 opened_at INTEGER NOT NULL,
                 closed_at INTEGER,
                 PRIMARY KEY (symbol, opened_at)
             );",
        )
        .context("initializing sqlite schema")?;

        Ok(SqliteRepository {
            conn: Arc::new(Mutex::new(conn)),
            queue: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Background drain task: flushes on batch size or a periodic
    /// timer, and once more on shutdown.
    pub async fn run_flush_loop(&self, shutdown: Arc<AtomicBool>) {
        let mut tick = tokio::time::interval(Duration::from_secs(FLUSH_INTERVAL_SECS));
        loop {
            tick.tick().await;
            self.flush();
            if shutdown.load(Ordering::Relaxed) {
                self.flush();
                break;
            }
        }
    }

    fn enqueue(&self, item: PendingWrite) {
        let mut queue = self.queue.lock();
        queue.push(item);
        if queue.len() >= FLUSH_BATCH_SIZE {
            let batch: Vec<PendingWrite> = queue.drain(..).collect();
            drop(queue);
            self.write_batch(batch);
        }
    }

    fn flush(&self) {
        let batch: Vec<PendingWrite> = {
            let mut queue = self.queue.lock();
            queue.drain(..).collect()
        };
        if !batch.is_empty() {
            self.write_batch(batch);
        }
    }

    fn write_batch(&self, batch: Vec<PendingWrite>) {
        let conn = self.conn.lock();
        let result = (|| -> rusqlite::Result<()> {
            for item in &batch {
                match item {
                    PendingWrite::Signal(s) => {
                        conn.execute(
                            "INSERT OR REPLACE INTO signals
                             (id, symbol, direction, score, mtf_score, mtf_aligned, trigger_events,
                              entry_price, tp_price, sl_price, atr, timestamp)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                            params![
                                s.id,
                                s.symbol,
                                s.direction.as_str(),
                                s.score,
                                s.mtf_score,
                                s.mtf_aligned as i64,
                                s.trigger_events.join(","),
                                s.entry_price,
                                s.tp_price,
                                s.sl_price,
                                s.atr,
                                s.timestamp,
                            ],
                        )?;
                    }
                    PendingWrite::Event(e) => {
                        conn.execute(
                            "INSERT INTO events (symbol, event_type, payload, ts) VALUES (?1,?2,?3,?4)",
                            params![
                                e.symbol(),
                                e.event_type(),
                                serde_json::to_string(e).unwrap_or_default(),
                                e.ts(),
                            ],
                        )?;
                    }
                    PendingWrite::Performance(t) => {
                        conn.execute(
                            "INSERT OR REPLACE INTO performance
                             (symbol, direction, entry_price, close_price, outcome, pnl_pct, opened_at, closed_at)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                            params![
                                t.symbol,
                                t.direction.as_str(),
                                t.entry_price,
                                t.close_price,
                                t.outcome.as_str(),
                                t.pnl_pct,
                                t.opened_at,
                                t.closed_at,
                            ],
                        )?;
                    }
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                metrics::counter!("persistence_batch_flush_total").increment(1);
            }
            Err(e) => {
                metrics::counter!("persistence_batch_failed_total").increment(1);
                tracing::error!(error = %e, "persistence batch flush failed");
            }
        }
    }
}

#[async_trait]
impl SignalRepository for SqliteRepository {
    async fn append_signal(&self, signal: Signal) -> Result<()> {
        self.enqueue(PendingWrite::Signal(signal));
        Ok(())
    }

    async fn append_event(&self, event: Event) -> Result<()> {
        self.enqueue(PendingWrite::Event(event));
        Ok(())
    }

    async fn record_performance(&self, signal: TrackedSignal) -> Result<()> {
        self.enqueue(PendingWrite::Performance(signal));
        Ok(())
    }

    async fn list_open(&self) -> Result<Vec<TrackedSignal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, direction, entry_price, close_price, outcome, pnl_pct, opened_at, closed_at
             FROM performance WHERE outcome = 'open'",
        )?;
        let rows = stmt.query_map([], |row| {
            let direction_str: String = row.get(1)?;
            let outcome_str: String = row.get(4)?;
            Ok(TrackedSignal {
                symbol: row.get(0)?,
                direction: if direction_str == "long" {
                    crate::models::Direction::Long
                } else {
                    crate::models::Direction::Short
                },
                score: 0.0,
                entry_price: row.get(2)?,
                tp_price: 0.0,
                sl_price: 0.0,
                atr_at_entry: 0.0,
                opened_at: row.get(6)?,
                ttl: 0,
                outcome: match outcome_str.as_str() {
                    "tp_hit" => Outcome::TpHit,
                    "sl_hit" => Outcome::SlHit,
                    "expired" => Outcome::Expired,
                    "manual" => Outcome::Manual,
                    "reversed" => Outcome::Reversed,
                    _ => Outcome::Open,
                },
                closed_at: row.get(7)?,
                close_price: row.get(3)?,
                pnl_pct: row.get(5)?,
                trigger_events: Vec::new(),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Signal>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, direction, score, mtf_score, mtf_aligned, trigger_events,
                    entry_price, tp_price, sl_price, atr, timestamp
             FROM signals ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let direction_str: String = row.get(2)?;
            let triggers: String = row.get(6)?;
            Ok(Signal {
                id: row.get(0)?,
                symbol: row.get(1)?,
                direction: if direction_str == "long" {
                    crate::models::Direction::Long
                } else {
                    crate::models::Direction::Short
                },
                score: row.get(3)?,
                mtf_score: row.get(4)?,
                mtf_aligned: row.get::<_, i64>(5)? != 0,
                trigger_events: triggers.split(',').filter(|s| !s.is_empty()).map(String::from).collect(),
                features_snapshot: crate::models::FeatureSnapshot::default(),
                timestamp: row.get(11)?,
                entry_price: row.get(7)?,
                tp_price: row.get(8)?,
                sl_price: row.get(9)?,
                atr: row.get(10)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_signal() -> Signal {
        Signal {
            id: "sig-1".into(),
            symbol: "BTCUSDT".into(),
            direction: crate::models::Direction::Long,
            score: 0.7,
            mtf_score: 0.5,
            mtf_aligned: true,
            trigger_events: vec!["atr_expansion".into()],
            features_snapshot: crate::models::FeatureSnapshot::default(),
            timestamp: 1,
            entry_price: Some(100.0),
            tp_price: Some(104.0),
            sl_price: Some(98.0),
            atr: Some(2.0),
        }
    }

    #[tokio::test]
    async fn writes_and_reads_back_a_signal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let repo = SqliteRepository::open(path.to_str().unwrap()).unwrap();
        repo.append_signal(sample_signal()).await.unwrap();
        repo.flush();
        let recent = repo.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].symbol, "BTCUSDT");
    }

    #[tokio::test]
    async fn flush_is_a_noop_on_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test2.db");
        let repo = SqliteRepository::open(path.to_str().unwrap()).unwrap();
        repo.flush();
        assert!(repo.list_recent(10).await.unwrap().is_empty());
    }
}
