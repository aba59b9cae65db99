use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Custom epoch: 2025-01-01T00:00:00Z in milliseconds since Unix epoch.
const RELAY_EPOCH_MS: u64 = 1_735_689_600_000;

const NODE_BITS: u64 = 10;
const SEQUENCE_BITS: u64 = 12;
const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

struct State {
    last_ms: u64,
    sequence: u64,
}

/// 64-bit time-ordered ID generator used for chat message ids.
///
/// Layout (MSB → LSB):
/// - Bits 63–22: Timestamp (42 bits), ms since the relay epoch
/// - Bits 21–12: Node ID (10 bits)
/// - Bits 11–0:  Sequence (12 bits), per-ms counter
///
/// IDs from one generator are strictly increasing, so ordering a log by id
/// is the same as ordering it by insertion.
pub struct SnowflakeGenerator {
    node_id: u64,
    state: Mutex<State>,
}

impl SnowflakeGenerator {
    /// Create a generator. Node ids wider than 10 bits are masked.
    pub fn new(node_id: u16) -> Self {
        Self {
            node_id: u64::from(node_id) & ((1 << NODE_BITS) - 1),
            state: Mutex::new(State {
                last_ms: 0,
                sequence: 0,
            }),
        }
    }

    pub fn generate(&self) -> i64 {
        let mut state = self.state.lock();

        // A clock that stepped backwards keeps issuing ids from the last
        // observed millisecond so ids never go backwards.
        let mut now_ms = current_ms().max(state.last_ms);

        if now_ms == state.last_ms {
            state.sequence = (state.sequence + 1) & SEQUENCE_MASK;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                now_ms = state.last_ms + 1;
            }
        } else {
            state.sequence = 0;
        }

        state.last_ms = now_ms;

        let ts = now_ms.saturating_sub(RELAY_EPOCH_MS);
        let id = (ts << (NODE_BITS + SEQUENCE_BITS)) | (self.node_id << SEQUENCE_BITS) | state.sequence;

        id as i64
    }
}

fn current_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(RELAY_EPOCH_MS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generates_unique_increasing_ids() {
        let gen = SnowflakeGenerator::new(1);
        let mut seen = HashSet::new();
        let mut prev = 0i64;
        for _ in 0..10_000 {
            let id = gen.generate();
            assert!(id > prev, "not monotonic: {prev} >= {id}");
            assert!(seen.insert(id), "duplicate snowflake: {id}");
            prev = id;
        }
    }

    #[test]
    fn oversized_node_id_is_masked() {
        let gen = SnowflakeGenerator::new(u16::MAX);
        assert!(gen.generate() > 0);
    }
}
