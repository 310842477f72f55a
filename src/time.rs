//! Pure round/time arithmetic shared by every layer (spec §6).
//!
//! `genesis_time` and `now` are unix seconds; `period` is whole seconds.
//! These mirror `forest_beacon::DrandBeacon::max_beacon_round_for_epoch`'s
//! shape (a handful of integer-division helpers over genesis/period) but
//! operate on drand's own round numbering rather than Filecoin epochs.

use crate::model::Round;

/// `RoundAt(t) = ((t - genesis) / period) + 1` for `t >= genesis`, else 0.
pub fn round_at(genesis_time: u64, period_secs: u64, time: u64) -> Round {
    if period_secs == 0 || time < genesis_time {
        return 0;
    }
    ((time - genesis_time) / period_secs) + 1
}

/// `TimeOfRound(r) = genesis + (r - 1) * period`.
pub fn time_of_round(genesis_time: u64, period_secs: u64, round: Round) -> u64 {
    genesis_time + round.saturating_sub(1) * period_secs
}

/// `NextRoundBoundary(t) = TimeOfRound(CurrentRound(t) + 1)`.
pub fn next_round_boundary(genesis_time: u64, period_secs: u64, time: u64) -> u64 {
    let current = round_at(genesis_time, period_secs, time);
    let next = if current == 0 { 1 } else { current + 1 };
    time_of_round(genesis_time, period_secs, next)
}

/// Current unix-second timestamp. Kept as a single indirection point so
/// tests can't accidentally depend on wall-clock skew across assertions.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs()
}
