//! Correlation ids for matching retry acknowledgments.
//!
//! The transport does not tell response handlers which request they answer, so
//! every queued retry carries an id of its own that the peer echoes back. Ids
//! are snowflakes:
//!
//! ```text
//!  63                    22 21        12 11          0
//! ┌────────────────────────┬────────────┬─────────────┐
//! │ millis since EPOCH (41)│ machine(10)│ sequence(12)│
//! └────────────────────────┴────────────┴─────────────┘
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Custom epoch for the timestamp field: 2024-01-01T00:00:00Z.
pub const EPOCH_MILLIS: u64 = 1_704_067_200_000;

const TIMESTAMP_BITS: u32 = 41;
const MACHINE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

const TIMESTAMP_MASK: u64 = (1 << TIMESTAMP_BITS) - 1;
const MACHINE_MASK: u64 = (1 << MACHINE_BITS) - 1;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Largest valid machine id.
pub const MAX_MACHINE_ID: u16 = MACHINE_MASK as u16;

/// Application-level id embedded in a retry payload and echoed in its ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub u64);

impl CorrelationId {
    /// Pack the three snowflake fields. Out-of-range bits are masked off.
    #[must_use]
    pub const fn compose(millis: u64, machine_id: u64, sequence: u64) -> Self {
        Self(
            (millis & TIMESTAMP_MASK) << (MACHINE_BITS + SEQUENCE_BITS)
                | (machine_id & MACHINE_MASK) << SEQUENCE_BITS
                | (sequence & SEQUENCE_MASK),
        )
    }

    /// Milliseconds since [`EPOCH_MILLIS`].
    #[must_use]
    pub const fn millis(self) -> u64 {
        (self.0 >> (MACHINE_BITS + SEQUENCE_BITS)) & TIMESTAMP_MASK
    }

    #[must_use]
    pub const fn machine_id(self) -> u64 {
        (self.0 >> SEQUENCE_BITS) & MACHINE_MASK
    }

    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for CorrelationId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Machine id derived from the process id.
#[must_use]
pub fn default_machine_id() -> u16 {
    (std::process::id() & u32::from(MAX_MACHINE_ID)) as u16
}

#[derive(Debug, Default)]
struct GeneratorState {
    last_millis: u64,
    sequence: u64,
}

/// Thread-safe snowflake generator.
///
/// Ids from one generator are strictly increasing. When a millisecond's
/// sequence space runs out, or the wall clock steps backwards, the generator
/// keeps counting on its own logical clock instead of repeating an id.
#[derive(Debug)]
pub struct CorrelationIdGenerator {
    machine_id: u64,
    state: Mutex<GeneratorState>,
}

impl Default for CorrelationIdGenerator {
    fn default() -> Self {
        Self::new(default_machine_id())
    }
}

impl CorrelationIdGenerator {
    /// Create a generator for `machine_id` (masked to 10 bits).
    #[must_use]
    pub fn new(machine_id: u16) -> Self {
        Self {
            machine_id: u64::from(machine_id) & MACHINE_MASK,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    #[must_use]
    pub const fn machine_id(&self) -> u64 {
        self.machine_id
    }

    /// Next id, stamped with the current wall clock.
    pub fn next_id(&self) -> CorrelationId {
        self.next_at(now_millis())
    }

    fn next_at(&self, now: u64) -> CorrelationId {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if now > state.last_millis {
            state.last_millis = now;
            state.sequence = 0;
        } else if state.sequence == SEQUENCE_MASK {
            state.last_millis += 1;
            state.sequence = 0;
        } else {
            state.sequence += 1;
        }
        CorrelationId::compose(state.last_millis, self.machine_id, state.sequence)
    }
}

fn now_millis() -> u64 {
    let since_unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0);
    since_unix.saturating_sub(EPOCH_MILLIS) & TIMESTAMP_MASK
}
