//! Distributed identifier generation for financial records
//!
//! Produces strictly increasing, collision-free 63-bit integer identifiers
//! that are safe across concurrently running engine instances. An identifier
//! packs a millisecond timestamp offset from the engine epoch (41 bits), an
//! intra-millisecond sequence counter (12 bits), and the instance's worker
//! id in the low bits (10 bits). Creation paths use these ids as primary
//! keys assigned before the row is persisted, so cross-referenced records
//! (an application and its invoice, say) can be built in one transaction.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{EngineError, EngineResult};

/// Engine epoch: 2024-01-01T00:00:00Z, as milliseconds since the Unix epoch
const ENGINE_EPOCH_MS: i64 = 1_704_067_200_000;

const WORKER_ID_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;

const MAX_WORKER_ID: i64 = (1 << WORKER_ID_BITS) - 1;
const MAX_SEQUENCE: i64 = (1 << SEQUENCE_BITS) - 1;

const SEQUENCE_SHIFT: u8 = WORKER_ID_BITS;
const TIMESTAMP_SHIFT: u8 = WORKER_ID_BITS + SEQUENCE_BITS;

/// Mutable generator state, guarded by a single mutex.
///
/// `last_timestamp` is the engine-epoch offset of the most recent id. It
/// never decreases, even if the wall clock reads earlier than a previous
/// observation.
struct GeneratorState {
    last_timestamp: i64,
    sequence: i64,
}

/// Identifier generator for one engine instance
///
/// Callers invoke [`next_id`](SequenceGenerator::next_id) from any number of
/// concurrent request handlers; the internal mutex serializes access to the
/// timestamp/sequence pair. The generator performs no I/O and never blocks
/// except to wait out an exhausted intra-millisecond sequence.
pub struct SequenceGenerator {
    worker_id: i64,
    state: Mutex<GeneratorState>,
}

impl SequenceGenerator {
    /// Create a generator for the given worker id (must fit in 10 bits)
    pub fn new(worker_id: u16) -> EngineResult<Self> {
        if i64::from(worker_id) > MAX_WORKER_ID {
            return Err(EngineError::Validation(format!(
                "worker id {} out of range, must be in 0..={}",
                worker_id, MAX_WORKER_ID
            )));
        }

        Ok(Self {
            worker_id: i64::from(worker_id),
            state: Mutex::new(GeneratorState {
                last_timestamp: 0,
                sequence: 0,
            }),
        })
    }

    /// Generate the next identifier
    ///
    /// Successive calls from the same instance return strictly increasing
    /// values, including many calls within one millisecond. Sequence
    /// exhaustion spins until the clock advances rather than wrapping.
    pub fn next_id(&self) -> i64 {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut now = elapsed_millis();
        if now < state.last_timestamp {
            // Clock read earlier than the last observation: treat the clock
            // as not having advanced so ids never go backwards.
            now = state.last_timestamp;
        }

        if now == state.last_timestamp {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                now = wait_until_after(state.last_timestamp);
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.last_timestamp = now;

        (now << TIMESTAMP_SHIFT) | (state.sequence << SEQUENCE_SHIFT) | self.worker_id
    }

    /// Worker id this generator stamps into the low bits
    pub fn worker_id(&self) -> u16 {
        self.worker_id as u16
    }
}

/// Milliseconds elapsed since the engine epoch, clamped to be non-negative
fn elapsed_millis() -> i64 {
    let unix_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0);
    (unix_ms - ENGINE_EPOCH_MS).max(0)
}

/// Spin until the clock reads strictly later than `timestamp`
fn wait_until_after(timestamp: i64) -> i64 {
    loop {
        let now = elapsed_millis();
        if now > timestamp {
            return now;
        }
        std::hint::spin_loop();
    }
}
