use std::sync::Mutex;

use anyhow::{bail, Result};
use chrono::Utc;

use crate::persistence::IdGenerator;

/// 2024-01-01T00:00:00Z in milliseconds.
const CUSTOM_EPOCH_MS: i64 = 1_704_067_200_000;
const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;
const MAX_NODE_ID: u16 = (1 << NODE_BITS) - 1;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;

#[derive(Debug, Default)]
struct SnowflakeState {
    last_ms: i64,
    sequence: u16,
}

/// Snowflake-style IDs: 41 bits of milliseconds since a custom epoch, 10 bits
/// of node id, 12 bits of per-millisecond sequence.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node_id: u16,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeGenerator {
    pub fn new(node_id: u16) -> Result<Self> {
        if node_id > MAX_NODE_ID {
            bail!("node id {} out of range (max {})", node_id, MAX_NODE_ID);
        }

        Ok(SnowflakeGenerator {
            node_id,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis() - CUSTOM_EPOCH_MS
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn next_id(&self) -> Result<i64> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("snowflake generator state poisoned"))?;

        let mut now = Self::now_ms();
        if now < state.last_ms {
            bail!(
                "clock moved backwards by {} ms, refusing to generate id",
                state.last_ms - now
            );
        }

        if now == state.last_ms {
            state.sequence = (state.sequence + 1) & MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence exhausted for this millisecond.
                while now <= state.last_ms {
                    std::hint::spin_loop();
                    now = Self::now_ms();
                }
            }
        } else {
            state.sequence = 0;
        }
        state.last_ms = now;

        Ok((now << (NODE_BITS + SEQUENCE_BITS))
            | (i64::from(self.node_id) << SEQUENCE_BITS)
            | i64::from(state.sequence))
    }
}
