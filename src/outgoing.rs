//! The outgoing settlement engine (§4.2): auto-funds and tops up the
//! outgoing channel, signs monotonically increasing claims, and transmits
//! them to the peer. Everything here runs inside the outgoing reducer
//! queue, except during an in-flight deposit, when claim creation is
//! routed to a transient side-queue instead (§5).

use crate::chain::{ChainOp, ChannelSigner, OnChainClient};
use crate::channel::{ChannelClaim, OutgoingChannel};
use crate::errors::{AuthorizationDeclined, EngineError, QueueError};
use crate::queue::ReducerQueue;
use crate::refresh;
use crate::store::Store;
use crate::transport::Transport;
use crate::units;
use crate::PeerEngine;
use ethereum_types::U256;
use futures::future::BoxFuture;
use rand::Rng;
use std::sync::Arc;

/// Approves (or declines) spending `fee` wei on a transaction. Declining
/// leaves the prior state untouched and is not logged as an error (§7).
pub type Authorize = Arc<dyn Fn(U256) -> BoxFuture<'static, Result<(), AuthorizationDeclined>> + Send + Sync>;

pub fn no_op_authorize() -> Authorize {
    Arc::new(|_fee| Box::pin(async { Ok(()) }))
}

impl<St, Ch, Tr, Si> PeerEngine<St, Ch, Tr, Si>
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    /// Opens a channel if none exists yet, else deposits into the existing
    /// one (§4.2).
    pub async fn fund_outgoing_channel(
        &self,
        value: U256,
        authorize: Authorize,
    ) -> Result<Option<OutgoingChannel>, QueueError> {
        let engine = self.clone();
        self.inner
            .outgoing
            .add(0, move |state| {
                let engine = engine.clone();
                let authorize = authorize.clone();
                async move {
                    let result = match state {
                        None => engine.open_channel_reducer(value, authorize).await,
                        Some(claim) => {
                            engine.deposit_to_channel_reducer(claim, value, authorize).await
                        }
                    };
                    let _ = engine.persist_with_outgoing(result).await;
                    result
                }
            })
            .await
    }

    /// Opportunistically opens or tops up the outgoing channel after each
    /// incoming claim and at startup (§4.2). Never blocks its caller.
    pub async fn auto_fund(&self) {
        let state = self.inner.outgoing.state();
        let channel_amount = U256::from(self.inner.config.outgoing_channel_amount);
        let needs_funding = match &state {
            None => true,
            Some(claim) => claim.channel.remaining(claim.spent) < channel_amount / 2,
        };
        if !needs_funding {
            return;
        }

        let incoming_value = self
            .inner
            .incoming
            .state()
            .map(|c| c.channel.value)
            .unwrap_or_default();
        if incoming_value < U256::from(self.inner.config.min_incoming_channel_amount) {
            return;
        }

        if let Err(error) = self.fund_outgoing_channel(channel_amount, no_op_authorize()).await {
            tracing::debug!(%error, "auto-fund attempt was not processed");
        }
    }

    pub(crate) fn spawn_auto_fund(&self) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.auto_fund().await;
        });
    }

    /// Adds to the settlement backlog and schedules a claim. Routes to the
    /// deposit side-queue when one is active, else the main outgoing queue
    /// (§4.2).
    pub async fn send_money(&self, amount: Option<i64>) {
        let increment = {
            let mut balances = self.inner.balances.lock();
            let increment = amount.unwrap_or_else(|| balances.payable.max(0));
            balances.payout_amount += increment;
            increment
        };
        tracing::debug!(increment, "scheduling settlement");

        let side_queue = self.inner.deposit_side_queue.lock().clone();
        let engine = self.clone();
        match side_queue {
            Some(queue) => {
                let _ = queue
                    .add(0, move |state| {
                        let engine = engine.clone();
                        async move { engine.create_claim_reducer(state).await }
                    })
                    .await;
            }
            None => {
                let _ = self
                    .inner
                    .outgoing
                    .add(0, move |state| {
                        let engine = engine.clone();
                        async move {
                            let result = engine.create_claim_reducer(state).await;
                            let _ = engine.persist_with_outgoing(result).await;
                            result
                        }
                    })
                    .await;
            }
        }
    }

    async fn open_channel_reducer(&self, value: U256, authorize: Authorize) -> Option<OutgoingChannel> {
        let peer_address = match self.ensure_peer_address().await {
            Some(address) => address,
            None => {
                tracing::debug!("peer address still unknown; not opening a channel");
                return None;
            }
        };

        let mut channel_id_bytes = [0u8; 32];
        rand::thread_rng().fill(&mut channel_id_bytes[..]);
        let channel_id = crate::channel::ChannelId::from(channel_id_bytes);

        let fee = match self.inner.chain.estimate_fee(ChainOp::Open).await {
            Ok(fee) => fee,
            Err(error) => {
                tracing::error!(%error, "failed to estimate channel-open fee");
                return None;
            }
        };
        if authorize(fee).await.is_err() {
            return None;
        }

        if let Err(error) = self
            .inner
            .chain
            .open(
                channel_id,
                peer_address,
                value,
                self.inner.config.outgoing_dispute_period,
            )
            .await
        {
            tracing::error!(%error, "open transaction failed");
            return None;
        }

        let channel = match refresh::poll_until(&self.inner.chain, channel_id, |state| state.is_some()).await {
            Ok(Some(channel)) => channel,
            _ => {
                tracing::error!(?channel_id, "opened channel never became visible on-chain");
                return None;
            }
        };

        let signature = match self
            .inner
            .signer
            .sign_claim(channel.contract_address, channel_id, U256::zero())
            .await
        {
            Ok(signature) => signature,
            Err(error) => {
                tracing::error!(%error, "failed to sign proof-of-channel claim");
                return None;
            }
        };

        let claim = ChannelClaim::new(channel, U256::zero(), signature);
        self.transmit_claim(&claim).await;
        Some(claim)
    }

    async fn deposit_to_channel_reducer(
        &self,
        claim: OutgoingChannel,
        value: U256,
        authorize: Authorize,
    ) -> Option<OutgoingChannel> {
        let channel_id = claim.channel.channel_id;
        let pre_value = claim.channel.value;

        let side_queue = Arc::new(ReducerQueue::new(Some(claim)));
        *self.inner.deposit_side_queue.lock() = Some(side_queue.clone());

        let engine = self.clone();
        let claim_fut = side_queue.add(0, move |state| {
            let engine = engine.clone();
            async move { engine.create_claim_reducer(state).await }
        });

        let deposit_fut: BoxFuture<'_, Result<(), EngineError>> = Box::pin(async {
            let fee = self.inner.chain.estimate_fee(ChainOp::Deposit).await?;
            authorize(fee).await?;
            self.inner.chain.deposit(channel_id, value).await?;
            Ok(())
        });

        let (_, deposit_result) = tokio::join!(claim_fut, deposit_fut);

        let fresh_channel = match deposit_result {
            Ok(()) => {
                let target = pre_value + value;
                match refresh::poll_until(&self.inner.chain, channel_id, move |state| {
                    matches!(state, Some(c) if c.value >= target)
                })
                .await
                {
                    Ok(channel) => {
                        self.notify_channel_deposit().await;
                        channel
                    }
                    Err(error) => {
                        tracing::error!(%error, "deposit never reflected on-chain within the refresh budget");
                        None
                    }
                }
            }
            Err(error) => {
                tracing::error!(%error, "deposit transaction failed");
                None
            }
        };

        let side_final = match side_queue.clear().await {
            Ok(state) => state,
            Err(_) => None,
        };
        *self.inner.deposit_side_queue.lock() = None;

        match (fresh_channel, side_final) {
            (Some(fresh), Some(side_claim)) => Some(ChannelClaim::new(
                fresh,
                side_claim.spent.min(fresh.value),
                side_claim.signature,
            )),
            (None, side_claim) => side_claim,
            (Some(_), None) => None,
        }
    }

    /// The claim-producing reducer (§4.2). Runs inside either the main
    /// outgoing queue or the deposit side-queue.
    pub(crate) async fn create_claim_reducer(
        &self,
        state: Option<OutgoingChannel>,
    ) -> Option<OutgoingChannel> {
        self.spawn_auto_fund();

        let channel = state?;

        let payout_gwei = self.inner.balances.lock().payout_amount;
        let budget_wei = units::gwei_to_wei(payout_gwei);
        if budget_wei.is_zero() {
            return Some(channel);
        }

        let remaining = channel.channel.remaining(channel.spent);
        if remaining.is_zero() {
            return Some(channel);
        }

        let increment = budget_wei.min(remaining);
        let new_spent = channel.spent + increment;

        let signature = match self
            .inner
            .signer
            .sign_claim(channel.channel.contract_address, channel.channel.channel_id, new_spent)
            .await
        {
            Ok(signature) => signature,
            Err(error) => {
                tracing::error!(%error, "failed to sign claim");
                return Some(channel);
            }
        };

        let new_claim = ChannelClaim::new(channel.channel, new_spent, signature);
        self.transmit_claim(&new_claim).await;

        let increment_gwei = units::wei_to_gwei_round_down(increment);
        {
            let mut balances = self.inner.balances.lock();
            balances.payable -= increment_gwei;
            // §9: the source clamps the backlog to <= 0 after every
            // settlement rather than floors it at 0. Kept as-is pending
            // confirmation it isn't relied upon downstream.
            balances.payout_amount = (balances.payout_amount - increment_gwei).min(0);
        }

        Some(new_claim)
    }
}
