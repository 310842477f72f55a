//! C5 — synthesizes a `Watch` stream from periodic `Get(latest)` calls,
//! aligned to round boundaries. A pure function of `(ctx, client,
//! chain_info)`, per spec §4.3.

use std::sync::Arc as StdArc;

use futures::stream;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{BeaconStream, Client};
use crate::model::{Beacon, ChainInfo};
use crate::time;

#[derive(Clone, Copy)]
enum PollState {
    /// Haven't issued the immediate first `Get` yet.
    Start,
    /// Waiting for the next round boundary before polling again.
    Waiting,
}

/// Builds the polling stream described by spec §4.3:
/// 1. Immediately issue `Get(latest)`.
/// 2. Sleep until the next round boundary.
/// 3. Repeat forever, forwarding successes and logging (but not
///    forwarding) failures.
/// 4. Stop when `ctx` is cancelled.
///
/// Guarantees at most one in-flight `Get` at a time: the loop never
/// issues a new `Get` before the previous one (and, on success, the
/// following sleep) completes.
pub fn watch(
    ctx: CancellationToken,
    client: StdArc<dyn Client>,
    chain_info: StdArc<ChainInfo>,
) -> BeaconStream {
    let stream = stream::unfold(PollState::Start, move |mut state| {
        let ctx = ctx.clone();
        let client = client.clone();
        let chain_info = chain_info.clone();
        async move {
            loop {
                if ctx.is_cancelled() {
                    return None;
                }

                if let PollState::Waiting = state {
                    let now = time::unix_now();
                    let boundary = chain_info.next_round_boundary(now);
                    let wait = boundary.saturating_sub(now);
                    tokio::select! {
                        _ = sleep(Duration::from_secs(wait)) => {}
                        _ = ctx.cancelled() => return None,
                    }
                }

                let result: Result<Beacon, _> = tokio::select! {
                    r = client.get(ctx.child_token(), 0) => r,
                    _ = ctx.cancelled() => return None,
                };

                match result {
                    Ok(beacon) => {
                        debug!(round = beacon.round, "polling watcher forwarded a round");
                        return Some((beacon, PollState::Waiting));
                    }
                    Err(err) => {
                        warn!(error = %err, "polling watcher Get(latest) failed, retrying at next boundary");
                        state = PollState::Waiting;
                        // loop again rather than emitting an item.
                    }
                }
            }
        }
    });
    Box::pin(stream)
}
