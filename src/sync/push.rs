//! Ingestion coordinator: the push path
//!
//! Pushes run through a fixed sequence: identity binding, batch bound,
//! backpressure, then per-delta dedup → validation → clock merge → LWW
//! append. A failure on delta N leaves deltas before N buffered; fingerprint
//! dedup makes client retries from the failing delta safe.

use crate::core::error::Error;
use crate::schema::validate::ValidationPipeline;
use crate::storage::buffer::DeltaBuffer;
use crate::system::metrics::Metrics;
use crate::types::{HlcClock, HlcTimestamp, RowDelta, SyncPush};
use std::sync::Arc;

/// Hard bound on deltas per push
pub const MAX_PUSH_DELTAS: usize = 10_000;

/// Outcome of one accepted push
#[derive(Debug)]
pub struct PushOutcome {
    /// Server clock after the push
    pub server_hlc: HlcTimestamp,
    /// Deltas accepted, counting idempotent duplicates
    pub accepted: usize,
    /// Records that actually entered the log (merged where applicable);
    /// excludes purely idempotent duplicates
    pub deltas: Vec<Arc<RowDelta>>,
}

/// Validates, deduplicates and LWW-appends pushed deltas
pub struct IngestionCoordinator {
    buffer: Arc<DeltaBuffer>,
    clock: Arc<HlcClock>,
    pipeline: ValidationPipeline,
    max_backpressure_bytes: usize,
}

impl IngestionCoordinator {
    /// Create a coordinator over a buffer and clock
    pub fn new(
        buffer: Arc<DeltaBuffer>,
        clock: Arc<HlcClock>,
        pipeline: ValidationPipeline,
        max_backpressure_bytes: usize,
    ) -> Self {
        Self { buffer, clock, pipeline, max_backpressure_bytes }
    }

    /// Ingest one push. `bound_client_id` is the transport-authenticated
    /// identity, when the transport provides one.
    pub fn push(
        &self,
        push: SyncPush,
        bound_client_id: Option<&str>,
    ) -> Result<PushOutcome, Error> {
        if let Some(bound) = bound_client_id {
            if bound != push.client_id {
                Metrics::global().ingest.pushes_rejected.inc();
                return Err(Error::forbidden(format!(
                    "push clientId '{}' does not match bound identity",
                    push.client_id
                )));
            }
        }

        if push.deltas.len() > MAX_PUSH_DELTAS {
            Metrics::global().ingest.pushes_rejected.inc();
            return Err(Error::validation(format!(
                "push carries {} deltas (limit {MAX_PUSH_DELTAS})",
                push.deltas.len()
            )));
        }

        // Checked once, before any append: a full buffer rejects the whole
        // push so the flusher can catch up.
        let buffered_bytes = self.buffer.estimated_bytes();
        if buffered_bytes > self.max_backpressure_bytes {
            Metrics::global().ingest.pushes_rejected.inc();
            return Err(Error::Backpressure {
                buffered_bytes,
                limit_bytes: self.max_backpressure_bytes,
            });
        }

        let mut accepted = 0usize;
        let mut ingested = Vec::new();
        for delta in push.deltas {
            if self.buffer.has_delta(&delta.delta_id) {
                // Idempotent replay; already covered by an earlier append.
                accepted += 1;
                Metrics::global().ingest.deltas_deduplicated.inc();
                continue;
            }

            self.pipeline.validate(&delta)?;
            self.clock.recv(delta.hlc)?;

            let outcome = self.buffer.merge_append(delta);
            if outcome.merged {
                Metrics::global().ingest.deltas_merged.inc();
            }
            Metrics::global().ingest.deltas_ingested.inc();
            accepted += 1;
            ingested.push(outcome.appended);
        }

        Metrics::global()
            .ingest
            .buffer_bytes
            .set(self.buffer.estimated_bytes() as i64);

        tracing::debug!(
            client_id = %push.client_id,
            accepted,
            appended = ingested.len(),
            "push ingested"
        );

        Ok(PushOutcome { server_hlc: self.clock.now(), accepted, deltas: ingested })
    }
}
