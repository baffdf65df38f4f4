//! Distributed snapshot bookkeeping (Chandy-Lamport over the ring).
//!
//! Each node records its local fish count at the moment its snapshot starts
//! and buffers fish that arrive on channels still being recorded. A channel
//! stops being recorded when the marker arrives on it. Once both inbound
//! channels are closed the local snapshot is finished; a collection token
//! then circulates leftward accumulating the per-node counts.

use aquaring_messages::SnapshotToken;
use aquaring_types::FishModel;

/// Which inbound channels are currently being recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordMode {
    Idle,
    Left,
    Right,
    Both,
}

/// Per-round snapshot state.
pub struct SnapshotState {
    /// A round is in progress on this node.
    pub active: bool,
    /// The local part of the round is done (both channels closed).
    pub finished: bool,
    /// This node's count has been added to a collection token this round.
    pub added: bool,
    /// This node started the round and owns the final result.
    pub initiator: bool,
    pub mode: RecordMode,
    /// Fish count captured when the local snapshot started, plus whatever
    /// the channel buffers contribute on finish.
    pub local_count: u64,
    left_buffer: Vec<FishModel>,
    right_buffer: Vec<FishModel>,
    /// Collection token that arrived before the local snapshot finished.
    pub parked_token: Option<SnapshotToken>,
}

impl SnapshotState {
    pub fn new() -> Self {
        Self {
            active: false,
            finished: false,
            added: false,
            initiator: false,
            mode: RecordMode::Idle,
            local_count: 0,
            left_buffer: Vec::new(),
            right_buffer: Vec::new(),
            parked_token: None,
        }
    }

    /// Start a round: capture the local count and begin recording `mode`.
    pub fn begin(&mut self, local_count: u64, mode: RecordMode, initiator: bool) {
        self.active = true;
        self.finished = false;
        self.initiator = initiator;
        self.local_count = local_count;
        self.mode = mode;
    }

    /// Whether a fish arriving from the given side must be buffered rather
    /// than entering the tank immediately.
    pub fn should_buffer(&self, from_left: bool) -> bool {
        match self.mode {
            RecordMode::Idle => false,
            RecordMode::Both => true,
            RecordMode::Left => from_left,
            RecordMode::Right => !from_left,
        }
    }

    pub fn buffer(&mut self, from_left: bool, fish: FishModel) {
        if from_left {
            self.left_buffer.push(fish);
        } else {
            self.right_buffer.push(fish);
        }
    }

    /// Stop recording the channel the marker arrived on. Returns true when
    /// no channel remains open, i.e. the local snapshot can finish.
    pub fn close_channel(&mut self, from_left: bool) -> bool {
        self.mode = match (self.mode, from_left) {
            (RecordMode::Both, true) => RecordMode::Right,
            (RecordMode::Both, false) => RecordMode::Left,
            (RecordMode::Left, true) | (RecordMode::Right, false) => RecordMode::Idle,
            (mode, _) => mode,
        };
        self.mode == RecordMode::Idle
    }

    /// Finish the local snapshot: fold the buffered channel fish into the
    /// count and hand them back so the caller can let them enter the tank.
    pub fn finish(&mut self) -> Vec<FishModel> {
        self.finished = true;
        self.mode = RecordMode::Idle;
        let mut buffered: Vec<FishModel> = self.left_buffer.drain(..).collect();
        buffered.extend(self.right_buffer.drain(..));
        self.local_count += buffered.len() as u64;
        buffered
    }

    /// Clear all round state once the collection token has passed through.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquaring_types::{Direction, FishId, TankId};

    fn fish(n: u32) -> FishModel {
        FishModel::new(FishId::new(n, &TankId::numbered(1)), 100, 100, Direction::Right)
    }

    #[test]
    fn buffers_only_on_recorded_channels() {
        let mut state = SnapshotState::new();
        assert!(!state.should_buffer(true));

        state.begin(3, RecordMode::Both, true);
        assert!(state.should_buffer(true));
        assert!(state.should_buffer(false));

        assert!(!state.close_channel(true));
        assert!(!state.should_buffer(true));
        assert!(state.should_buffer(false));

        assert!(state.close_channel(false));
    }

    #[test]
    fn finish_folds_buffered_fish_into_count() {
        let mut state = SnapshotState::new();
        state.begin(2, RecordMode::Both, false);
        state.buffer(true, fish(1));
        state.buffer(false, fish(2));
        state.buffer(false, fish(3));
        state.close_channel(true);
        state.close_channel(false);

        let delivered = state.finish();
        assert_eq!(delivered.len(), 3);
        assert_eq!(state.local_count, 5);
        assert!(state.finished);
    }

    #[test]
    fn closing_an_unrecorded_channel_is_a_no_op() {
        let mut state = SnapshotState::new();
        state.begin(1, RecordMode::Left, false);
        assert!(!state.close_channel(false));
        assert_eq!(state.mode, RecordMode::Left);
        assert!(state.close_channel(true));
    }

    #[test]
    fn reset_clears_round_state() {
        let mut state = SnapshotState::new();
        state.begin(4, RecordMode::Both, true);
        state.close_channel(true);
        state.close_channel(false);
        state.finish();
        state.added = true;
        state.reset();
        assert!(!state.active && !state.finished && !state.added);
        assert_eq!(state.mode, RecordMode::Idle);
        assert_eq!(state.local_count, 0);
    }
}
