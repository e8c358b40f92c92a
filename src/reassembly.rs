//! Reassembly of readings split across several MQTT frames.
//!
//! Devices whose encoded reading exceeds the broker's practical message size
//! publish it as numbered parts on `<root>/<serial>/chunked/<total>/<index>`.
//! [`ReassemblyTable`] buffers those parts per device until every index has
//! arrived, then hands back the payload concatenated in index order.
//!
//! Policy:
//! - A part announcing a different total than the buffered session starts a
//!   new session; the old parts are dropped (last writer wins).
//! - A part arriving for a session that already completed starts a new
//!   session, so a completed session is reported ready exactly once.
//! - Incomplete sessions are swept after `stale_after`, completed ones after
//!   `completed_retention`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::ReassemblyError;

/// Upper bound on the part slots reserved up front; the part count comes from
/// the topic and is not trusted for allocation.
const MAX_PREALLOCATED_PARTS: u32 = 64;

// ---

/// Result of feeding one part to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartOutcome {
    /// The session is still waiting for parts.
    Buffered { received: u32, expected: u32 },
    /// The last missing part arrived; this is the whole message.
    Assembled(Bytes),
}

/// What a sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub completed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.stale + self.completed
    }
}

/// One in-flight multi-part message.
#[derive(Debug)]
struct ReassemblyEntry {
    /// Parts keyed by 1-based index. Emptied once assembled.
    parts: HashMap<u32, Bytes>,
    expected_parts: u32,
    created_at: DateTime<Utc>,
    complete: bool,
}

impl ReassemblyEntry {
    fn new(expected_parts: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            parts: HashMap::with_capacity(expected_parts.min(MAX_PREALLOCATED_PARTS) as usize),
            expected_parts,
            created_at,
            complete: false,
        }
    }

    fn has_all_parts(&self) -> bool {
        self.parts.len() == self.expected_parts as usize
    }

    /// Concatenate the parts in index order and release them.
    fn assemble(&mut self) -> Bytes {
        let size = self.parts.values().map(Bytes::len).sum();
        let mut buffer = BytesMut::with_capacity(size);

        for index in 1..=self.expected_parts {
            // Keys are validated to lie in 1..=expected, and the count matched.
            if let Some(part) = self.parts.get(&index) {
                buffer.extend_from_slice(part);
            }
        }

        self.parts.clear();
        self.complete = true;
        buffer.freeze()
    }
}

/// Mutex-guarded table of reassembly sessions keyed by device serial.
///
/// Every read-modify-write of an entry, including the sweep, happens inside a
/// single critical section.
#[derive(Debug, Default)]
pub struct ReassemblyTable {
    sessions: Mutex<HashMap<String, ReassemblyEntry>>,
}

impl ReassemblyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store one part of the message identified by `session_key`.
    pub async fn accept_part(
        &self,
        session_key: &str,
        total_parts: u32,
        part_index: u32,
        payload: Bytes,
    ) -> Result<PartOutcome, ReassemblyError> {
        self.accept_part_at(Utc::now(), session_key, total_parts, part_index, payload)
            .await
    }

    /// [`accept_part`](Self::accept_part) with an explicit clock.
    pub async fn accept_part_at(
        &self,
        now: DateTime<Utc>,
        session_key: &str,
        total_parts: u32,
        part_index: u32,
        payload: Bytes,
    ) -> Result<PartOutcome, ReassemblyError> {
        // ---
        if session_key.is_empty() {
            return Err(ReassemblyError::EmptySessionKey);
        }
        if total_parts == 0 || part_index == 0 || part_index > total_parts {
            return Err(ReassemblyError::InvalidChunk {
                total: total_parts,
                index: part_index,
            });
        }

        let mut sessions = self.sessions.lock().await;

        let restart = match sessions.get(session_key) {
            None => false,
            Some(entry) if entry.complete => true,
            Some(entry) if entry.expected_parts != total_parts => {
                tracing::warn!(
                    session_key,
                    previous_total = entry.expected_parts,
                    total_parts,
                    discarded = entry.parts.len(),
                    "Part count changed mid-transfer, starting a new session"
                );
                true
            }
            Some(_) => false,
        };
        if restart {
            sessions.remove(session_key);
        }

        let entry = sessions
            .entry(session_key.to_string())
            .or_insert_with(|| ReassemblyEntry::new(total_parts, now));

        if entry.parts.insert(part_index, payload).is_some() {
            tracing::debug!(session_key, part_index, "Duplicate part replaced");
        }

        if entry.has_all_parts() {
            let assembled = entry.assemble();
            tracing::info!(
                session_key,
                total_parts,
                bytes = assembled.len(),
                "Reassembled chunked message"
            );
            return Ok(PartOutcome::Assembled(assembled));
        }

        Ok(PartOutcome::Buffered {
            received: entry.parts.len() as u32,
            expected: entry.expected_parts,
        })
    }

    /// Drop incomplete sessions older than `stale_after` and completed ones
    /// older than `completed_retention`.
    pub async fn sweep(
        &self,
        now: DateTime<Utc>,
        stale_after: Duration,
        completed_retention: Duration,
    ) -> SweepReport {
        // ---
        let mut report = SweepReport::default();
        let mut sessions = self.sessions.lock().await;

        sessions.retain(|session_key, entry| {
            let age = now - entry.created_at;
            if entry.complete && age > completed_retention {
                report.completed += 1;
                false
            } else if !entry.complete && age > stale_after {
                tracing::info!(
                    session_key = session_key.as_str(),
                    received = entry.parts.len(),
                    expected = entry.expected_parts,
                    "Dropping stale reassembly session"
                );
                report.stale += 1;
                false
            } else {
                true
            }
        });

        report
    }

    /// Number of live sessions, complete or not.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}

/// Periodically sweep `table` until `cancel` is triggered.
pub async fn run_sweeper(
    table: Arc<ReassemblyTable>,
    interval: StdDuration,
    stale_after: Duration,
    completed_retention: Duration,
    cancel: CancellationToken,
) {
    // ---
    tracing::info!(
        interval_secs = interval.as_secs(),
        stale_after_secs = stale_after.num_seconds(),
        completed_retention_secs = completed_retention.num_seconds(),
        "Reassembly sweeper started"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately; nothing can be stale yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reassembly sweeper stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = table.sweep(Utc::now(), stale_after, completed_retention).await;
                if report.total() > 0 {
                    tracing::info!(
                        stale = report.stale,
                        completed = report.completed,
                        "Reassembly sweep removed sessions"
                    );
                } else {
                    tracing::debug!("Reassembly sweep: nothing to remove");
                }
            }
        }
    }
}
