//! An in-memory [`Client`] test double, grounded on
//! `forest_beacon::MockBeacon` ("deterministic based on an interval",
//! `blockchain/beacon/src/mock_beacon.rs`) but generalized to support
//! configurable per-call latency (for racing tests) and a scripted
//! `Watch` stream (for aggregator/failover tests), matching the seed
//! scenarios in spec §8.
//!
//! Beacons produced here are well-formed (`randomness == H(signature)`,
//! chained `previous_signature` linkage) but are not BLS-signed; they are
//! meant to exercise every layer except [`crate::verifying`], which has
//! its own cryptographically real fixtures.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc as StdArc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::client::{BeaconStream, Client};
use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};

pub fn beacon_for_round(round: Round) -> Beacon {
    let signature = sig_for_round(round);
    let previous_signature = if round <= 1 { vec![] } else { sig_for_round(round - 1) };
    Beacon {
        round,
        randomness: Beacon::derive_randomness(&signature),
        signature,
        previous_signature,
    }
}

fn sig_for_round(round: Round) -> Vec<u8> {
    let mut sig = vec![0xAB; 8];
    sig.extend_from_slice(&round.to_be_bytes());
    sig
}

pub fn default_chain_info() -> ChainInfo {
    ChainInfo::new(vec![1, 2, 3, 4], 1, 0, "mock-scheme".into(), None)
}

/// In-memory endpoint: `get` pops the next scripted round (or fails if
/// exhausted / configured to always fail); `watch` replays a scripted
/// `(delay, round)` sequence, if one was configured.
pub struct MockClient {
    rounds: Mutex<VecDeque<Round>>,
    delay: Duration,
    always_fail: bool,
    watch_script: Mutex<Option<Vec<(Duration, Round)>>>,
    chain_info: StdArc<ChainInfo>,
    call_count: StdArc<AtomicUsize>,
    closed: AtomicBool,
}

impl MockClient {
    pub fn new(rounds: Vec<Round>, delay: Duration) -> Self {
        Self {
            rounds: Mutex::new(rounds.into_iter().collect()),
            delay,
            always_fail: false,
            watch_script: Mutex::new(None),
            chain_info: StdArc::new(default_chain_info()),
            call_count: StdArc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_rounds(rounds: Vec<Round>) -> Self {
        Self::new(rounds, Duration::ZERO)
    }

    pub fn with_rounds_and_delay(rounds: Vec<Round>, delay: Duration) -> Self {
        Self::new(rounds, delay)
    }

    pub fn always_failing() -> Self {
        let mut client = Self::new(vec![], Duration::ZERO);
        client.always_fail = true;
        client
    }

    pub fn with_watch_script(self, script: Vec<(Duration, Round)>) -> Self {
        *self.watch_script.lock().unwrap() = Some(script);
        self
    }

    pub fn with_chain_info(mut self, chain_info: ChainInfo) -> Self {
        self.chain_info = StdArc::new(chain_info);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for MockClient {
    async fn get(&self, ctx: CancellationToken, _round: Round) -> Result<Beacon, ClientError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Closed);
        }
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = ctx.cancelled() => return Err(ClientError::Cancelled),
            }
        }
        if self.always_fail {
            return Err(ClientError::transport(std::io::Error::other("mock: configured to always fail")));
        }
        let mut rounds = self.rounds.lock().unwrap();
        match rounds.pop_front() {
            Some(round) => Ok(beacon_for_round(round)),
            None => Err(ClientError::NoResult { round: None }),
        }
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        let script = self.watch_script.lock().unwrap().clone().unwrap_or_default();
        let stream = async_stream_from_script(ctx, script);
        Box::pin(stream)
    }

    async fn info(&self, _ctx: CancellationToken) -> Result<StdArc<ChainInfo>, ClientError> {
        Ok(self.chain_info.clone())
    }

    fn round_at(&self, time: u64) -> Round {
        self.chain_info.round_at(time)
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

fn async_stream_from_script(
    ctx: CancellationToken,
    script: Vec<(Duration, Round)>,
) -> impl futures::Stream<Item = Beacon> {
    futures::stream::unfold((script.into_iter(), ctx), |(mut iter, ctx)| async move {
        let (delay, round) = iter.next()?;
        if ctx.is_cancelled() {
            return None;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancelled() => return None,
        }
        Some((beacon_for_round(round), (iter, ctx)))
    })
}
