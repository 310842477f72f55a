//! C8 — detects a silent upstream `Watch` stream and falls back to
//! `Get(latest)` rather than leaving subscribers hanging, and suppresses
//! any non-monotone or duplicate round the upstream might replay.
//!
//! Grounded on `chain_sync`'s tipset-staleness watchdog (a timer racing
//! gossip traffic that falls back to a direct RPC poll on silence) adapted
//! to spec §4.5's grace-period design.

use std::sync::Arc as StdArc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::client::{BeaconStream, Client};
use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};

#[derive(Clone, Copy)]
pub struct FailoverConfig {
    /// How long the upstream stream may stay silent before a direct
    /// `Get(latest)` fallback is attempted.
    pub grace_period: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self { grace_period: Duration::from_secs(30) }
    }
}

struct Inner {
    client: StdArc<dyn Client>,
    config: FailoverConfig,
}

#[derive(Clone)]
pub struct FailoverWatcher(StdArc<Inner>);

impl FailoverWatcher {
    pub fn new(client: StdArc<dyn Client>, config: FailoverConfig) -> Self {
        Self(StdArc::new(Inner { client, config }))
    }
}

struct FailoverState {
    upstream: BeaconStream,
    last_round: Round,
}

#[async_trait]
impl Client for FailoverWatcher {
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError> {
        self.0.client.get(ctx, round).await
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        let upstream = self.0.client.watch(ctx.child_token()).await;
        let grace = self.0.config.grace_period;
        let client = self.0.client.clone();
        let state = FailoverState { upstream, last_round: 0 };

        let stream = stream::unfold((state, ctx, client, grace), |(mut state, ctx, client, grace)| async move {
            loop {
                if ctx.is_cancelled() {
                    return None;
                }
                tokio::select! {
                    item = state.upstream.next() => {
                        match item {
                            Some(beacon) => {
                                if beacon.round > state.last_round {
                                    state.last_round = beacon.round;
                                    return Some((beacon, (state, ctx, client, grace)));
                                }
                                // stale or duplicate round: keep waiting, counts as activity.
                            }
                            None => return None,
                        }
                    }
                    _ = sleep(grace) => {
                        match client.get(ctx.child_token(), 0).await {
                            Ok(beacon) if beacon.round > state.last_round => {
                                warn!(round = beacon.round, "failover: upstream silent, fell back to Get(latest)");
                                state.last_round = beacon.round;
                                return Some((beacon, (state, ctx, client, grace)));
                            }
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "failover: fallback Get(latest) failed"),
                        }
                    }
                }
            }
        });
        Box::pin(stream)
    }

    async fn info(&self, ctx: CancellationToken) -> Result<StdArc<ChainInfo>, ClientError> {
        self.0.client.info(ctx).await
    }

    fn round_at(&self, time: u64) -> Round {
        self.0.client.round_at(time)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.0.client.close().await
    }
}
