//! C2 — the polymorphic endpoint-client contract every layer implements.
//!
//! Mirrors the shape of `forest_beacon::Beacon` (`async fn entry(&self,
//! round) -> Result<BeaconEntry, _>`) generalized to the full spec §4.1
//! capability set and threaded through an explicit
//! [`tokio_util::sync::CancellationToken`] rather than an implicit
//! context object (spec §9).

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::ClientError;
use crate::model::{Beacon, ChainInfo, Round};

/// A lazy, finite-on-cancel sequence of [`Beacon`]s, at most one per round,
/// in strictly ascending round order. Per spec §7, failures never appear
/// as stream items — the stream simply ends early and the failure is
/// logged by whichever layer observed it.
pub type BeaconStream = Pin<Box<dyn Stream<Item = Beacon> + Send>>;

/// The capability set every layer in the pipeline exposes (spec §4.1).
/// Wrappers own an `Arc<dyn Client>` inner client and delegate whichever
/// operations they don't override, per spec §9's "embedded-type
/// polymorphism" redesign note.
#[async_trait]
pub trait Client: Send + Sync {
    /// Fetch a single round. `round == 0` means "latest available".
    /// Honours `ctx`: an already-cancelled or cancelled-mid-flight token
    /// yields [`ClientError::Cancelled`].
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError>;

    /// Open a live stream of new rounds. The stream ends when `ctx` is
    /// cancelled or an unrecoverable error occurs upstream.
    async fn watch(&self, ctx: CancellationToken) -> BeaconStream;

    /// Chain parameters for this client's chain.
    async fn info(&self, ctx: CancellationToken) -> Result<Arc<ChainInfo>, ClientError>;

    /// Pure function of chain parameters and wall-clock time; does not
    /// perform I/O (spec §4.1). Implementations typically delegate to
    /// [`crate::time::round_at`] via a cached [`ChainInfo`].
    fn round_at(&self, time: u64) -> Round;

    /// Releases this client's resources. Idempotent: calling it more than
    /// once must not error or panic.
    async fn close(&self) -> Result<(), ClientError>;
}

#[async_trait]
impl<T: Client + ?Sized> Client for Arc<T> {
    async fn get(&self, ctx: CancellationToken, round: Round) -> Result<Beacon, ClientError> {
        (**self).get(ctx, round).await
    }

    async fn watch(&self, ctx: CancellationToken) -> BeaconStream {
        (**self).watch(ctx).await
    }

    async fn info(&self, ctx: CancellationToken) -> Result<Arc<ChainInfo>, ClientError> {
        (**self).info(ctx).await
    }

    fn round_at(&self, time: u64) -> Round {
        (**self).round_at(time)
    }

    async fn close(&self) -> Result<(), ClientError> {
        (**self).close().await
    }
}

/// Adapts a bounded `mpsc::Receiver` into a [`BeaconStream`], used by the
/// watch aggregator (C7) to hand each subscriber its own channel-backed
/// stream.
struct ReceiverStream(mpsc::Receiver<Beacon>);

impl Stream for ReceiverStream {
    type Item = Beacon;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.0.poll_recv(cx)
    }
}

pub(crate) fn receiver_stream(rx: mpsc::Receiver<Beacon>) -> BeaconStream {
    Box::pin(ReceiverStream(rx))
}
