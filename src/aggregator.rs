//! C7 — fans a single upstream `Watch` stream out to any number of
//! concurrent subscribers, so N callers to [`WatchAggregator::watch`] cost
//! the inner client exactly one live subscription.
//!
//! Grounded on `chain_sync`'s network-event fan-out
//! (`network_context.rs`'s broadcast of a single upstream event to every
//! interested consumer) generalized to per-subscriber bounded channels
//! with drop-on-full backpressure, per spec §4.6. The cheap-clone
//! `Arc<Inner>` handle shape follows the reference `CachingClient`
//! (`#[derive(Clone)] struct CachingClient { client: BasicClient, cache:
//! Arc<Mutex<Cache>> }`) so the distribute task and an optional auto-watch
//! supervisor can each hold an owned, 'static handle back to `self`.

use std::sync::Arc as StdArc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{receiver_stream, BeaconStream, Client};
use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};

/// Bounded per-subscriber output queue (spec §4.6). A slow subscriber loses
/// values rather than stalling every other subscriber or the distribute
/// task itself.
const SUBSCRIBER_CAPACITY: usize = 5;

struct Subscriber {
    sender: mpsc::Sender<Beacon>,
    cancel: CancellationToken,
}

struct Inner {
    client: StdArc<dyn Client>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Cancels the currently running distribute task, if any.
    distribute_ctx: Mutex<Option<CancellationToken>>,
    auto_watch_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Auto-watch keeps one phantom subscription alive so the distribute task
/// (and, transitively, every wrapper below it) stays warm even with no
/// external `Watch` caller, per spec §4.6's "always-on" mode.
#[derive(Clone, Copy)]
pub struct AutoWatchConfig {
    pub retry_backoff: Duration,
}

#[derive(Clone)]
pub struct WatchAggregator(StdArc<Inner>);

impl WatchAggregator {
    pub fn new(client: StdArc<dyn Client>) -> Self {
        Self(StdArc::new(Inner {
            client,
            subscribers: Mutex::new(Vec::new()),
            distribute_ctx: Mutex::new(None),
            auto_watch_handle: Mutex::new(None),
        }))
    }

    /// Starts (or keeps alive) a phantom subscription so the aggregator
    /// never lets its distribute task die for lack of subscribers.
    pub fn start_auto_watch(&self, config: AutoWatchConfig) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let ctx = CancellationToken::new();
                let mut stream = this.watch(ctx.clone()).await;
                debug!("aggregator: auto-watch phantom subscription started");
                while stream.next().await.is_some() {
                    // drain silently; real consumers get their own subscription.
                }
                debug!("aggregator: auto-watch subscription ended, retrying after backoff");
                tokio::time::sleep(config.retry_backoff).await;
            }
        });
        *self.0.auto_watch_handle.lock() = Some(handle);
    }

    fn spawn_distribute(&self) {
        let this = self.clone();
        let ctx = CancellationToken::new();
        *self.0.distribute_ctx.lock() = Some(ctx.clone());
        tokio::spawn(async move { this.distribute(ctx).await });
    }

    async fn distribute(&self, ctx: CancellationToken) {
        let mut upstream = self.0.client.watch(ctx.child_token()).await;
        loop {
            let head_cancel = {
                let subs = self.0.subscribers.lock();
                if subs.is_empty() {
                    break;
                }
                subs[0].cancel.clone()
            };

            tokio::select! {
                item = upstream.next() => {
                    match item {
                        Some(beacon) => self.fan_out(&beacon),
                        None => {
                            warn!("aggregator: upstream watch ended, closing all subscribers");
                            self.0.subscribers.lock().clear();
                            break;
                        }
                    }
                }
                _ = head_cancel.cancelled() => {
                    self.0.subscribers.lock().retain(|s| !s.cancel.is_cancelled());
                }
                _ = ctx.cancelled() => break,
            }
        }
        *self.0.distribute_ctx.lock() = None;
    }

    fn fan_out(&self, beacon: &Beacon) {
        let mut subs = self.0.subscribers.lock();
        subs.retain_mut(|s| {
            if s.cancel.is_cancelled() {
                return false;
            }
            match s.sender.try_send(beacon.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(round = beacon.round, "aggregator: dropping round for slow subscriber");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[async_trait]
impl Client for WatchAggregator {
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError> {
        self.0.client.get(ctx, round).await
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let spawn_needed = {
            let mut subs = self.0.subscribers.lock();
            subs.push(Subscriber { sender: tx, cancel: ctx });
            subs.len() == 1
        };
        if spawn_needed {
            self.spawn_distribute();
        }
        receiver_stream(rx)
    }

    async fn info(&self, ctx: CancellationToken) -> Result<StdArc<ChainInfo>, ClientError> {
        self.0.client.info(ctx).await
    }

    fn round_at(&self, time: u64) -> Round {
        self.0.client.round_at(time)
    }

    async fn close(&self) -> Result<(), ClientError> {
        if let Some(handle) = self.0.auto_watch_handle.lock().take() {
            handle.abort();
        }
        if let Some(ctx) = self.0.distribute_ctx.lock().take() {
            ctx.cancel();
        }
        self.0.subscribers.lock().clear();
        self.0.client.close().await
    }
}
