//! The incoming claim validation engine (§4.3): the multi-stage
//! acceptance algorithm (fetch gate, new/existing-channel branch, universal
//! checks, uniqueness registry, novelty, commit) plus the bounded retry
//! envelope for on-chain staleness.

use crate::chain::{recover_claim_signer, ChannelSigner, OnChainClient};
use crate::channel::{Channel, ChannelClaim, IncomingChannel};
use crate::messaging::MachinomyClaim;
use crate::queue::PRIORITY_VALIDATE_CLAIM;
use crate::refresh;
use crate::store::Store;
use crate::transport::Transport;
use crate::units;
use crate::PeerEngine;
use std::time::Duration;

const RETRY_DELAY: Duration = Duration::from_millis(250);

enum ClaimOutcome {
    Commit(IncomingChannel),
    Reject,
    VanishedChannel,
    Retry,
}

impl<St, Ch, Tr, Si> PeerEngine<St, Ch, Tr, Si>
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    /// Validates an incoming claim and, if accepted, credits the peer's
    /// payment and advances the best-known claim (§4.3).
    pub async fn validate_claim(&self, claim_msg: MachinomyClaim) {
        let engine = self.clone();
        let result = self
            .inner
            .incoming
            .add(PRIORITY_VALIDATE_CLAIM, move |state| {
                let engine = engine.clone();
                async move { engine.validate_claim_reducer(state, claim_msg).await }
            })
            .await;

        if let Ok(new_state) = result {
            let _ = self.persist_with_incoming(new_state).await;
            if new_state.is_some() {
                crate::watcher::ensure_running(self);
            }
        }
    }

    async fn validate_claim_reducer(
        &self,
        state: Option<IncomingChannel>,
        msg: MachinomyClaim,
    ) -> Option<IncomingChannel> {
        let mut attempts: u32 = 0;
        loop {
            match self.try_validate_claim(&state, &msg).await {
                ClaimOutcome::Commit(new_claim) => return Some(new_claim),
                ClaimOutcome::Reject => return state,
                ClaimOutcome::VanishedChannel => return None,
                ClaimOutcome::Retry => {
                    if attempts + 1 >= refresh::MAX_ATTEMPTS {
                        tracing::debug!(
                            channel_id = ?msg.channel_id,
                            "claim validation exhausted its retry budget"
                        );
                        return state;
                    }
                    attempts += 1;
                    tokio::time::delay_for(RETRY_DELAY).await;
                }
            }
        }
    }

    async fn try_validate_claim(
        &self,
        state: &Option<IncomingChannel>,
        msg: &MachinomyClaim,
    ) -> ClaimOutcome {
        let need_fetch = match state {
            None => true,
            Some(cached) => msg.value > cached.channel.value,
        };

        let fetched: Option<Channel> = if need_fetch {
            match self.inner.chain.channel(msg.channel_id).await {
                Ok(channel) => channel,
                Err(error) => {
                    tracing::debug!(%error, "on-chain read failed during claim validation");
                    return ClaimOutcome::Reject;
                }
            }
        } else {
            state.as_ref().map(|c| c.channel)
        };

        let channel = match state {
            None => {
                let channel = match fetched {
                    Some(channel) => channel,
                    None => return ClaimOutcome::Retry,
                };
                if channel.receiver != self.inner.signer.address() {
                    tracing::debug!("incoming channel's receiver is not this account");
                    return ClaimOutcome::Reject;
                }
                if channel.dispute_period < self.inner.config.min_incoming_dispute_period {
                    tracing::debug!("incoming channel's dispute period is below the configured minimum");
                    return ClaimOutcome::Reject;
                }
                channel
            }
            Some(cached) => {
                let channel = match fetched {
                    Some(channel) => channel,
                    None => return ClaimOutcome::VanishedChannel,
                };
                if msg.channel_id != cached.channel.channel_id {
                    tracing::debug!("claim references a different channel than the cached one");
                    return ClaimOutcome::Reject;
                }
                channel
            }
        };

        if msg.contract_address != self.inner.config.contract_address {
            tracing::debug!("claim's contract address does not match the configured contract");
            return ClaimOutcome::Reject;
        }

        match recover_claim_signer(msg.contract_address, msg.channel_id, msg.value, &msg.signature) {
            Ok(signer) if signer == channel.sender => {}
            Ok(_) => {
                tracing::debug!("claim signature does not recover to the channel's sender");
                return ClaimOutcome::Reject;
            }
            Err(error) => {
                tracing::debug!(%error, "claim signature failed to recover");
                return ClaimOutcome::Reject;
            }
        }

        if channel.value < msg.value {
            return ClaimOutcome::Retry;
        }

        if state.is_none() {
            match self
                .inner
                .store
                .bind_channel(msg.channel_id, &self.inner.account_name)
                .await
            {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(channel_id = ?msg.channel_id, "channel id is already bound to another account");
                    return ClaimOutcome::Reject;
                }
                Err(error) => {
                    tracing::debug!(%error, "store error while binding channel id");
                    return ClaimOutcome::Reject;
                }
            }
        }

        let cached_spent = state.as_ref().map(|c| c.spent).unwrap_or_default();
        let capped = msg.value.min(channel.value);
        if state.is_some() && capped <= cached_spent {
            tracing::debug!("claim does not improve on the cached claim");
            return ClaimOutcome::Reject;
        }
        let increment = capped.saturating_sub(cached_spent);

        let increment_gwei = units::wei_to_gwei_round_down(increment);
        {
            let mut balances = self.inner.balances.lock();
            balances.receivable -= increment_gwei;
        }

        ClaimOutcome::Commit(ChannelClaim::new(channel, capped, msg.signature))
    }
}
