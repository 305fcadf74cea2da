//! The channel watcher (§4.4): a periodic task per account with a cached
//! incoming claim, polling on-chain state and triggering a profitable
//! on-chain claim when the channel is disputed or has vanished.

use crate::chain::{ChainOp, ChannelSigner, OnChainClient};
use crate::channel::{ChannelClaim, IncomingChannel};
use crate::outgoing::Authorize;
use crate::queue::PRIORITY_CLAIM_CHANNEL;
use crate::refresh;
use crate::store::Store;
use crate::transport::Transport;
use crate::PeerEngine;
use tracing_futures::Instrument;

/// Starts the watcher loop for this account if it isn't already running.
/// Idempotent: safe to call after every accepted claim (§4.3, "ensure the
/// channel watcher is running").
pub fn ensure_running<St, Ch, Tr, Si>(engine: &PeerEngine<St, Ch, Tr, Si>)
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    {
        let mut running = engine.inner.watcher_running.lock();
        if *running {
            return;
        }
        *running = true;
    }

    let engine = engine.clone();
    tokio::spawn(async move { run_watcher_loop(engine).await });
}

async fn run_watcher_loop<St, Ch, Tr, Si>(engine: PeerEngine<St, Ch, Tr, Si>)
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    loop {
        tokio::time::delay_for(engine.inner.config.channel_watcher_interval()).await;

        let cached = match engine.inner.incoming.state() {
            Some(claim) => claim,
            None => break,
        };

        let span = tracing::debug_span!("channel_watcher", account = engine.account_name());
        async {
            match engine.inner.chain.channel(cached.channel.channel_id).await {
                Ok(fresh) => {
                    let disputed_or_gone = match &fresh {
                        None => true,
                        Some(channel) => channel.disputed_until.is_some(),
                    };
                    if disputed_or_gone {
                        engine.claim_if_profitable(true, None).await;
                    }
                }
                Err(error) => {
                    tracing::debug!(%error, "channel watcher failed to refresh on-chain state");
                }
            }
        }
        .instrument(span)
        .await;

        if engine.inner.incoming.state().is_none() {
            break;
        }
    }

    *engine.inner.watcher_running.lock() = false;
}

impl<St, Ch, Tr, Si> PeerEngine<St, Ch, Tr, Si>
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    /// Submits the best incoming claim on-chain when it's worth the gas
    /// (or unconditionally, when `authorize` is supplied) (§4.4).
    pub async fn claim_if_profitable(&self, require_disputed: bool, authorize: Option<Authorize>) {
        let engine = self.clone();
        let result = self
            .inner
            .incoming
            .add(PRIORITY_CLAIM_CHANNEL, move |state| {
                let engine = engine.clone();
                let authorize = authorize.clone();
                async move {
                    engine
                        .claim_if_profitable_reducer(state, require_disputed, authorize)
                        .await
                }
            })
            .await;

        if let Ok(new_state) = result {
            let _ = self.persist_with_incoming(new_state).await;
        }
    }

    async fn claim_if_profitable_reducer(
        &self,
        state: Option<IncomingChannel>,
        require_disputed: bool,
        authorize: Option<Authorize>,
    ) -> Option<IncomingChannel> {
        let cached = state?;
        let channel_id = cached.channel.channel_id;

        let fresh = match self.inner.chain.channel(channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                tracing::debug!(?channel_id, "channel is already gone on-chain");
                return None;
            }
            Err(error) => {
                tracing::error!(%error, "failed to refresh channel state before claiming");
                return Some(cached);
            }
        };
        let claim = ChannelClaim::new(fresh, cached.spent, cached.signature);

        if require_disputed && fresh.disputed_until.is_none() {
            return Some(claim);
        }

        let fee = match self.inner.chain.estimate_fee(ChainOp::Claim).await {
            Ok(fee) => fee,
            Err(error) => {
                tracing::error!(%error, "failed to estimate claim fee");
                return Some(claim);
            }
        };

        let proceed = match authorize {
            Some(authorize) => authorize(fee).await.is_ok(),
            None => fee < claim.spent,
        };
        if !proceed {
            tracing::debug!(?channel_id, %fee, spent = %claim.spent, "claim not profitable; skipping");
            return Some(claim);
        }

        if let Err(error) = self.inner.chain.claim(&claim).await {
            tracing::error!(%error, "claim submission failed");
            return Some(claim);
        }

        match refresh::poll_until(&self.inner.chain, channel_id, |state| state.is_none()).await {
            Ok(_) => None,
            Err(error) => {
                tracing::error!(%error, "channel did not disappear on-chain after being claimed");
                Some(claim)
            }
        }
    }
}
