//! C9 — transparently serves `Get` from the bounded cache (C4) when
//! possible, and populates it from both `Get` and `Watch` traffic.
//!
//! Grounded on `forest_beacon::DrandBeacon::extract_beacon_entry` (checks
//! `local_cache` before calling into the tipset's attached beacon entries)
//! generalized to the `Get`/`Watch` pair.

use std::sync::Arc as StdArc;

use async_trait::async_trait;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::Cache;
use crate::client::{BeaconStream, Client};
use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};

struct Inner {
    client: StdArc<dyn Client>,
    cache: Cache,
}

#[derive(Clone)]
pub struct CachingClient(StdArc<Inner>);

impl CachingClient {
    pub fn new(client: StdArc<dyn Client>, capacity: usize) -> Self {
        Self(StdArc::new(Inner { client, cache: Cache::new(capacity) }))
    }
}

#[async_trait]
impl Client for CachingClient {
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError> {
        // round == 0 means "latest": never servable from a cache of
        // already-resolved rounds, so it always reaches the inner client.
        if round != 0 {
            if let Some(beacon) = self.0.cache.try_get(round) {
                debug!(round, "caching: cache hit");
                return Ok(beacon);
            }
        }
        let beacon = self.0.client.get(ctx, round).await?;
        // cache under the resolved round, not the caller's (possibly 0) argument.
        self.0.cache.add(beacon.clone());
        Ok(beacon)
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        let upstream = self.0.client.watch(ctx).await;
        let this = self.clone();
        let stream = stream::unfold((upstream, this), |(mut upstream, this)| async move {
            let beacon = futures::StreamExt::next(&mut upstream).await?;
            this.0.cache.add(beacon.clone());
            Some((beacon, (upstream, this)))
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
