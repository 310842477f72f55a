//! C6 — races a set of endpoint clients, ranks them by round-trip time,
//! and picks the fastest. Grounded on
//! `blockchain/chain_sync/src/network_context.rs`'s
//! `handle_chain_exchange_request` (spawn a bounded number of concurrent
//! requests, first success wins, track failures) generalized from "one
//! peer succeeds" to the head-start + RTT-ranked racing spec §4.4
//! describes, and on `peer_manager.rs`'s "one guarded list of
//! candidates" shape for [`ClientStat`].

use std::sync::Arc as StdArc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::{BeaconStream, Client};
use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};
use crate::polling;

/// A single endpoint's round-trip-time sample, per spec §3 `ClientStat`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Rtt {
    /// No sample, or the last sample aged out past `rtt_ttl` — sorts
    /// first so the endpoint gets re-probed.
    Unknown,
    /// A real measurement; sorts by duration, ascending.
    Measured(Duration),
    /// The last call to this endpoint failed — sorts last.
    Failed,
}

struct ClientStat {
    endpoint: StdArc<dyn Client>,
    rtt: Rtt,
    sampled_at: Instant,
}

/// Configuration for [`OptimizingClient`], spec §4.4.
#[derive(Clone, Copy, Debug)]
pub struct OptimizingConfig {
    pub rtt_ttl: Duration,
    pub request_timeout: Duration,
    pub head_start: Duration,
    /// Concurrency cap `N`: how many endpoints to race in the fan-out
    /// phase, including the fast-path probe.
    pub concurrency: usize,
}

impl Default for OptimizingConfig {
    fn default() -> Self {
        Self {
            rtt_ttl: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(5),
            head_start: Duration::from_millis(0),
            concurrency: 4,
        }
    }
}

struct Inner {
    stats: RwLock<Vec<ClientStat>>,
    config: OptimizingConfig,
}

/// Races `Get` across its endpoints and serves `Watch` via [`polling`]
/// over itself, so every round benefits from the same racing logic (spec
/// §4.4). Cheaply `Clone`: internal state lives behind an `Arc`, matching
/// the handle-style clients in this ecosystem (e.g. `reqwest::Client`).
#[derive(Clone)]
pub struct OptimizingClient {
    inner: StdArc<Inner>,
}

impl OptimizingClient {
    pub fn new(endpoints: Vec<StdArc<dyn Client>>, config: OptimizingConfig) -> Self {
        let stats = endpoints
            .into_iter()
            .map(|endpoint| ClientStat {
                endpoint,
                rtt: Rtt::Unknown,
                sampled_at: Instant::now(),
            })
            .collect();
        Self {
            inner: StdArc::new(Inner {
                stats: RwLock::new(stats),
                config,
            }),
        }
    }

    /// Snapshot of endpoints in current RTT-ascending order, after
    /// resetting any entry whose sample has aged past `rtt_ttl` back to
    /// `Unknown` (spec §4.4's periodic re-probe rule).
    fn snapshot(&self) -> Vec<StdArc<dyn Client>> {
        let mut stats = self.inner.stats.write();
        let ttl = self.inner.config.rtt_ttl;
        let now = Instant::now();
        for stat in stats.iter_mut() {
            if !matches!(stat.rtt, Rtt::Unknown) && now.duration_since(stat.sampled_at) >= ttl {
                stat.rtt = Rtt::Unknown;
            }
        }
        stats.sort_by(|a, b| a.rtt.cmp(&b.rtt));
        stats.iter().map(|s| s.endpoint.clone()).collect()
    }

    fn record_sample(&self, endpoint: &StdArc<dyn Client>, rtt: Rtt) {
        let mut stats = self.inner.stats.write();
        if let Some(stat) = stats
            .iter_mut()
            .find(|s| StdArc::ptr_eq(&s.endpoint, endpoint))
        {
            stat.rtt = rtt;
            stat.sampled_at = Instant::now();
        }
        stats.sort_by(|a, b| a.rtt.cmp(&b.rtt));
    }

    async fn probe(
        endpoint: StdArc<dyn Client>,
        ctx: CancellationToken,
        round: Round,
    ) -> (StdArc<dyn Client>, Result<Beacon, ClientError>, Duration) {
        let start = Instant::now();
        let result = endpoint.get(ctx, round).await;
        (endpoint, result, start.elapsed())
    }
}

#[async_trait::async_trait]
impl Client for OptimizingClient {
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError> {
        let candidates = self.snapshot();
        if candidates.is_empty() {
            return Err(ClientError::NoResult { round: Some(round) });
        }

        let cfg = self.inner.config;
        let deadline = Instant::now() + cfg.request_timeout;

        let mut joinset: JoinSet<(StdArc<dyn Client>, Result<Beacon, ClientError>, Duration)> =
            JoinSet::new();
        let mut probed = 0usize;

        // Fast path: race the single best-ranked endpoint against a
        // head-start timer before paying for a full fan-out.
        let first = candidates[0].clone();
        joinset.spawn(Self::probe(first, ctx.child_token(), round));
        probed += 1;

        let head_start_winner = if cfg.head_start.is_zero() {
            None
        } else {
            tokio::select! {
                joined = joinset.join_next() => joined,
                _ = tokio::time::sleep(cfg.head_start) => None,
            }
        };

        if let Some(Ok((endpoint, Ok(beacon), elapsed))) = &head_start_winner {
            self.record_sample(endpoint, Rtt::Measured(*elapsed));
            debug!(round = beacon.round, elapsed_ms = elapsed.as_millis() as u64, "optimizing client: fast path hit");
            return Ok(beacon.clone());
        }
        if let Some(Ok((endpoint, Err(_), _))) = &head_start_winner {
            self.record_sample(endpoint, Rtt::Failed);
        }

        // Fan out to the remaining candidates (and keep whichever
        // first-endpoint probe is still outstanding in the same set).
        for endpoint in candidates.iter().skip(1).take(cfg.concurrency.saturating_sub(1)) {
            joinset.spawn(Self::probe(endpoint.clone(), ctx.child_token(), round));
            probed += 1;
        }

        let mut last_err = None;
        loop {
            if ctx.is_cancelled() {
                joinset.abort_all();
                return Err(ClientError::Cancelled);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let joined = tokio::select! {
                joined = joinset.join_next() => joined,
                _ = tokio::time::sleep(remaining) => None,
                _ = ctx.cancelled() => { joinset.abort_all(); return Err(ClientError::Cancelled); }
            };
            match joined {
                Some(Ok((endpoint, Ok(beacon), elapsed))) => {
                    self.record_sample(&endpoint, Rtt::Measured(elapsed));
                    // Let stragglers keep running so their RTT samples
                    // still feed back into ranking, but don't block this
                    // call on them.
                    self.drain_remaining_in_background(joinset);
                    return Ok(beacon);
                }
                Some(Ok((endpoint, Err(err), _))) => {
                    self.record_sample(&endpoint, Rtt::Failed);
                    warn!(error = %err, "optimizing client: endpoint probe failed");
                    last_err = Some(err);
                }
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "optimizing client: probe task panicked");
                }
                None => break,
            }
        }

        debug!(probed, "optimizing client: all probed endpoints exhausted for this call");
        Err(last_err.unwrap_or(ClientError::NoResult { round: Some(round) }))
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        let chain_info = match self.info(ctx.child_token()).await {
            Ok(info) => info,
            Err(err) => {
                warn!(error = %err, "optimizing client: watch could not resolve chain info, closing stream immediately");
                return Box::pin(futures::stream::empty());
            }
        };
        let handle: StdArc<dyn Client> = StdArc::new(self.clone());
        polling::watch(ctx, handle, chain_info)
    }

    async fn info(&self, ctx: CancellationToken) -> Result<StdArc<ChainInfo>, ClientError> {
        let candidates = self.snapshot();
        let mut last_err = None;
        for endpoint in candidates {
            match endpoint.info(ctx.child_token()).await {
                Ok(info) => return Ok(info),
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or(ClientError::NoResult { round: None }))
    }

    fn round_at(&self, time: u64) -> Round {
        let stats = self.inner.stats.read();
        stats.first().map(|s| s.endpoint.round_at(time)).unwrap_or(0)
    }

    async fn close(&self) -> Result<(), ClientError> {
        let endpoints: Vec<_> = {
            let stats = self.inner.stats.read();
            stats.iter().map(|s| s.endpoint.clone()).collect()
        };
        let mut first_err = None;
        for endpoint in endpoints {
            if let Err(err) = endpoint.close().await {
                warn!(error = %err, "optimizing client: error closing endpoint");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl OptimizingClient {
    fn drain_remaining_in_background(
        &self,
        mut joinset: JoinSet<(StdArc<dyn Client>, Result<Beacon, ClientError>, Duration)>,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            while let Some(joined) = joinset.join_next().await {
                match joined {
                    Ok((endpoint, Ok(_), elapsed)) => this.record_sample(&endpoint, Rtt::Measured(elapsed)),
                    Ok((endpoint, Err(_), _)) => this.record_sample(&endpoint, Rtt::Failed),
                    Err(_) => {}
                }
            }
        });
    }
}
