//! The per-peer persisted state (§3): balance plus the two channel claims
//! (ours outgoing, theirs incoming) and enough channel metadata to resume
//! after a restart without re-fetching everything from chain.

use crate::channel::{IncomingChannel, OutgoingChannel};
use ethereum_types::Address;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub account_name: String,
    pub peer_address: Option<Address>,

    /// Owed to us by the peer, in gwei (§3 `receivableBalance`).
    pub receivable: i64,
    /// Owed by us to the peer, in gwei (§3 `payableBalance`). Independent of
    /// `receivable` — both can be nonzero at once.
    pub payable: i64,

    /// The channel we pay this peer out of.
    pub outgoing_channel: Option<OutgoingChannel>,
    /// The channel this peer pays us out of.
    pub incoming_channel: Option<IncomingChannel>,
}

impl AccountSnapshot {
    pub fn new(account_name: impl Into<String>) -> Self {
        AccountSnapshot {
            account_name: account_name.into(),
            peer_address: None,
            receivable: 0,
            payable: 0,
            outgoing_channel: None,
            incoming_channel: None,
        }
    }
}
