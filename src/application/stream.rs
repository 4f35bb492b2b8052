//! Run progress/log stream
//!
//! A long-lived push channel per run. Each tick reads the latest run row
//! and log tail and emits `progress` / `log` events only when their
//! content changed since the last emission; `ping` keeps the channel
//! warm through silent stretches. The channel self-terminates with one
//! `end` event when the run reaches a terminal status (or does not
//! exist), and releases its connection slot when the client goes away.
//!
//! Ticks hold no locks and tolerate missed intermediate states; the next
//! tick reflects whatever is current.

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use crate::domain::entities::RunStatus;
use crate::domain::errors::ImportError;
use crate::domain::events::{LogBatch, LogEntryWire, ProgressSnapshot, RunEvent};
use crate::infrastructure::config::StreamConfig;
use crate::infrastructure::repositories::{LogRepository, RunRepository};

const LOG_BATCH_LIMIT: i64 = 50;

/// Decrements its caller class's connection count when dropped, however
/// the stream ends.
struct ConnectionSlot {
    class: String,
    connections: Arc<Mutex<HashMap<String, usize>>>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = map.get_mut(&self.class) {
            *count = count.saturating_sub(1);
        }
    }
}

pub struct RunStreamService {
    runs: RunRepository,
    logs: LogRepository,
    config: StreamConfig,
    connections: Arc<Mutex<HashMap<String, usize>>>,
}

impl RunStreamService {
    pub fn new(pool: SqlitePool, config: StreamConfig) -> Self {
        Self {
            runs: RunRepository::new(pool.clone()),
            logs: LogRepository::new(pool),
            config,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn acquire_slot(&self, caller_class: &str) -> Result<ConnectionSlot, ImportError> {
        let mut map = self
            .connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let count = map.entry(caller_class.to_string()).or_insert(0);
        if *count >= self.config.max_connections_per_class {
            return Err(ImportError::RateLimited {
                retry_after_seconds: 30,
            });
        }
        *count += 1;
        Ok(ConnectionSlot {
            class: caller_class.to_string(),
            connections: Arc::clone(&self.connections),
        })
    }

    /// Open a push channel for a run. `cursor` resumes the log tail from
    /// a previous connection. Connections past the per-class cap are
    /// rejected with the 429-equivalent error.
    pub fn stream_run(
        &self,
        run_id: &str,
        caller_class: &str,
        cursor: Option<i64>,
    ) -> Result<ReceiverStream<RunEvent>, ImportError> {
        let slot = self.acquire_slot(caller_class)?;

        let (tx, rx) = mpsc::channel(32);
        let runs = self.runs.clone();
        let logs = self.logs.clone();
        let config = self.config.clone();
        let run_id = run_id.to_string();

        tokio::spawn(async move {
            let _slot = slot;
            let mut cursor = cursor.unwrap_or(0);
            let mut last_snapshot: Option<ProgressSnapshot> = None;
            let mut reported_stuck = false;
            let mut silent_ticks = 0u32;
            let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_ms.max(10)));

            loop {
                ticker.tick().await;

                let run = match runs.find(&run_id).await {
                    Ok(run) => run,
                    Err(e) => {
                        warn!("Stream tick read failed for run {}: {:#}", run_id, e);
                        let event = RunEvent::Error {
                            code: "read_failed".to_string(),
                            message: e.to_string(),
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                        continue;
                    }
                };

                let Some(run) = run else {
                    let _ = tx
                        .send(RunEvent::End {
                            reason: "not_found".to_string(),
                            error: Some(format!("run {run_id} does not exist")),
                        })
                        .await;
                    break;
                };

                let mut emitted = false;

                let snapshot = ProgressSnapshot {
                    run_id: run.id.clone(),
                    status: run.status,
                    progress: run.progress.clone(),
                    summary: run.summary.clone(),
                    updated_at: run.updated_at,
                };
                if last_snapshot.as_ref() != Some(&snapshot) {
                    reported_stuck = false;
                    if tx.send(RunEvent::Progress(snapshot.clone())).await.is_err() {
                        break;
                    }
                    last_snapshot = Some(snapshot);
                    emitted = true;
                }

                match logs.tail_after(&run_id, cursor, LOG_BATCH_LIMIT).await {
                    Ok(entries) if !entries.is_empty() => {
                        cursor = entries.last().map(|entry| entry.id).unwrap_or(cursor);
                        let batch = LogBatch {
                            cursor,
                            entries: entries.iter().map(LogEntryWire::from_log).collect(),
                        };
                        if tx.send(RunEvent::Log(batch)).await.is_err() {
                            break;
                        }
                        emitted = true;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!("Log tail read failed for run {}: {:#}", run_id, e);
                    }
                }

                if run.status.is_terminal() {
                    let _ = tx
                        .send(RunEvent::End {
                            reason: run.status.as_str().to_string(),
                            error: None,
                        })
                        .await;
                    break;
                }

                // Stuck detection: explicit sentinel or a stale heartbeat
                let stale = Utc::now() - run.updated_at
                    > ChronoDuration::seconds(config.stuck_after_seconds);
                if (run.status == RunStatus::Stuck || stale) && !reported_stuck {
                    reported_stuck = true;
                    let event = RunEvent::Error {
                        code: "stuck".to_string(),
                        message: format!(
                            "run has not reported progress since {}",
                            run.updated_at
                        ),
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    emitted = true;
                }

                if emitted {
                    silent_ticks = 0;
                } else {
                    silent_ticks += 1;
                    if silent_ticks >= config.ping_every_ticks {
                        silent_ticks = 0;
                        if tx.send(RunEvent::Ping { at: Utc::now() }).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}
