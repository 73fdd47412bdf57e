use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::mapper::EntityTypeCode;
use crate::player::{NetworkId, PlayerId};

const MAX_PENDING: usize = 1024;

/// Lifecycle notifications the executive and adapters emit for an external
/// recorder. Transport and format of the recorder itself are out of scope;
/// this is the buffered seam it drains.
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    PlayerAdded {
        network_id: NetworkId,
        player_id: PlayerId,
    },
    PlayerRemoved {
        network_id: NetworkId,
        player_id: PlayerId,
    },
    /// An output NIB decided drift or heartbeat required a fresh update.
    StateUpdateEmitted {
        family_id: u8,
        player_id: PlayerId,
    },
    /// An incoming entity matched no template and was dropped.
    EntityUnmapped {
        family_id: u8,
        entity_type: EntityTypeCode,
    },
    NibTimedOut {
        family_id: u8,
        player_id: PlayerId,
    },
    PoolDegraded {
        requested: usize,
        actual: usize,
    },
    FrameOverrun {
        frame: u64,
        overrun: Duration,
    },
}

/// Bounded multi-producer event buffer; oldest entries are evicted when
/// no consumer keeps up.
#[derive(Debug, Default)]
pub struct EventLog {
    pending: Mutex<VecDeque<SimEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: SimEvent) {
        let mut pending = self.pending.lock().unwrap();
        if pending.len() >= MAX_PENDING {
            pending.pop_front();
        }
        pending.push_back(event);
    }

    pub fn drain(&self) -> Vec<SimEvent> {
        self.pending.lock().unwrap().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}
