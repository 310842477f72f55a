//! C11 — assembles the wrapper stack in the fixed order spec §9 requires
//! (racing → caching → failover → fan-out → verifying) and performs the
//! root-of-trust check against the caller-supplied [`ChainInfo`], if any.
//!
//! `ClientConfig`/`ClientConfigBuilder` follow the `derive_builder`
//! pattern used throughout the teacher repo's configuration types
//! (`build_fn(validate = "...")` rejecting structurally invalid configs
//! before any I/O happens).

use std::sync::Arc as StdArc;
use std::time::Duration;

use derive_builder::Builder;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::aggregator::{AutoWatchConfig, WatchAggregator};
use crate::caching::CachingClient;
use crate::client::Client;
use crate::error::ClientError;
use crate::failover::FailoverConfig;
use crate::failover::FailoverWatcher;
use crate::model::ChainInfo;
use crate::optimizing::{OptimizingClient, OptimizingConfig};
use crate::verifying::{VerifyingClient, VerifyingConfig};

/// Configuration for the fully assembled client. Build with
/// [`ClientConfigBuilder`], then pass to [`ClientConfig::build`].
#[derive(Builder)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct ClientConfig {
    /// The endpoints to race (spec §4.4). Must be non-empty.
    pub endpoints: Vec<StdArc<dyn Client>>,

    /// A pinned, previously-trusted chain identity. When set, construction
    /// fails with [`ClientError::RootOfTrustMismatch`] if the endpoints'
    /// observed [`ChainInfo`] hash doesn't match (spec §4.2's
    /// trust-on-first-use vs. pinned-trust distinction).
    #[builder(default)]
    pub chain_info: Option<ChainInfo>,

    /// A pinned chain hash, as a lighter-weight alternative to supplying
    /// the full `chain_info`. If both are set, they must agree (checked
    /// eagerly by [`ClientConfigBuilder::validate`]).
    #[builder(default)]
    pub chain_hash: Option<Vec<u8>>,

    /// Permits construction with no root of trust at all (neither
    /// `chain_info` nor `chain_hash` set), trusting whatever the
    /// endpoints report. Defaults to `false`: by default at least one of
    /// `chain_info`/`chain_hash` is required.
    #[builder(default = "false")]
    pub insecure: bool,

    #[builder(default)]
    pub optimizing: OptimizingConfig,

    /// Bounded ARC cache capacity (spec §4.2); `0` disables caching.
    #[builder(default = "64")]
    pub cache_capacity: usize,

    #[builder(default)]
    pub failover: FailoverConfig,

    #[builder(default)]
    pub verifying: VerifyingConfig,

    /// Keep one phantom subscription alive so cache/failover state stays
    /// warm even without an external `Watch` caller (spec §4.6).
    #[builder(default = "false")]
    pub auto_watch: bool,

    #[builder(default = "Duration::from_secs(10)")]
    pub auto_watch_retry_backoff: Duration,
}

impl ClientConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        match &self.endpoints {
            None => return Err("endpoints must be set".into()),
            Some(endpoints) if endpoints.is_empty() => {
                return Err("at least one endpoint is required".into())
            }
            Some(_) => {}
        }
        if let (Some(Some(info)), Some(Some(hash))) = (&self.chain_info, &self.chain_hash) {
            if &info.hash != hash {
                return Err("chain_info and chain_hash disagree".into());
            }
        }
        Ok(())
    }
}

impl ClientConfig {
    /// Assembles the wrapper pipeline and performs the root-of-trust
    /// check. Requires I/O (at least one `info` call against the
    /// endpoints), hence async — unlike the builder's synchronous
    /// structural validation.
    pub async fn build(self, ctx: CancellationToken) -> Result<StdArc<dyn Client>, ClientError> {
        let optimizing: StdArc<dyn Client> =
            StdArc::new(OptimizingClient::new(self.endpoints, self.optimizing));

        let pinned_hash = self
            .chain_info
            .as_ref()
            .map(|ci| ci.hash.clone())
            .or_else(|| self.chain_hash.clone());

        if pinned_hash.is_none() && !self.insecure {
            return Err(ClientError::ConfigInvalid(
                "no root of trust supplied (chain_info/chain_hash); set `insecure` to proceed without one".into(),
            ));
        }

        let observed = optimizing.info(ctx.child_token()).await?;
        if let Some(hash) = &pinned_hash {
            if *hash != observed.hash {
                return Err(ClientError::RootOfTrustMismatch(format!(
                    "pinned chain hash {} does not match endpoints' reported {observed}",
                    hex::encode(hash)
                )));
            }
        } else {
            info!(chain = %observed, "no root of trust pinned (insecure mode), trusting endpoints on first use");
        }
        let chain_info = match self.chain_info {
            Some(trusted) => StdArc::new(trusted),
            None => observed,
        };

        let caching: StdArc<dyn Client> =
            StdArc::new(CachingClient::new(optimizing, self.cache_capacity));
        let failover: StdArc<dyn Client> =
            StdArc::new(FailoverWatcher::new(caching, self.failover));

        let aggregator = WatchAggregator::new(failover);
        if self.auto_watch {
            aggregator.start_auto_watch(AutoWatchConfig {
                retry_backoff: self.auto_watch_retry_backoff,
            });
        }
        let aggregator: StdArc<dyn Client> = StdArc::new(aggregator);

        let verifying: StdArc<dyn Client> =
            StdArc::new(VerifyingClient::new(aggregator, chain_info, self.verifying));
        Ok(verifying)
    }
}
