//! The on-chain refresh protocol (§4.7): poll `OnChainClient::channel` every
//! second, up to 20 attempts, until a predicate over the observed state
//! holds. Used to wait for channel appearance after `open`, value equality
//! after `deposit`, and absence after `claim`.

use crate::chain::OnChainClient;
use crate::channel::{Channel, ChannelId};
use crate::errors::ChainError;
use std::time::Duration;

pub const MAX_ATTEMPTS: u32 = 20;
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls `chain.channel(channel_id)` until `predicate` accepts the observed
/// state (`None` included, so callers can wait for a channel to disappear).
/// Returns the accepted state, or `ChainError::RefreshTimedOut` once
/// `MAX_ATTEMPTS` is exhausted.
pub async fn poll_until<P>(
    chain: &dyn OnChainClient,
    channel_id: ChannelId,
    mut predicate: P,
) -> Result<Option<Channel>, ChainError>
where
    P: FnMut(&Option<Channel>) -> bool,
{
    for attempt in 0..MAX_ATTEMPTS {
        let state = chain.channel(channel_id).await?;
        if predicate(&state) {
            return Ok(state);
        }
        if attempt + 1 < MAX_ATTEMPTS {
            tokio::time::delay_for(POLL_INTERVAL).await;
        }
    }
    Err(ChainError::RefreshTimedOut)
}
