//! Message bodies for the five peer sub-protocols (§4.6): `info`,
//! `channelDeposit`, `requestClose`, `machinomy`, `ilp`. Dispatch into the
//! incoming/outgoing engines lives on `PeerEngine` in `lib.rs`; this module
//! only owns the wire shapes and their (de)serialization into
//! `SubProtocolData`.

use crate::chain::{ChannelSigner, OnChainClient};
use crate::channel::{ChannelClaim, ChannelId, FlatSignature};
use crate::refresh;
use crate::store::Store;
use crate::transport::{ContentType, PeerMessage, SubProtocolData, Transport};
use crate::PeerEngine;
use ethereum_types::{Address, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PROTOCOL_INFO: &str = "info";
pub const PROTOCOL_CHANNEL_DEPOSIT: &str = "channelDeposit";
pub const PROTOCOL_REQUEST_CLOSE: &str = "requestClose";
pub const PROTOCOL_MACHINOMY: &str = "machinomy";
pub const PROTOCOL_ILP: &str = "ilp";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoMessage {
    pub address: Address,
}

impl InfoMessage {
    pub fn into_sub_protocol(&self) -> SubProtocolData {
        SubProtocolData {
            protocol_name: PROTOCOL_INFO.into(),
            content_type: ContentType::TextPlainUtf8,
            data: serde_json::to_vec(self).expect("InfoMessage always serializes"),
        }
    }

    pub fn from_sub_protocol(data: &SubProtocolData) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(&data.data)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachinomyClaim {
    pub channel_id: ChannelId,
    pub signature: FlatSignature,
    pub value: U256,
    pub contract_address: Address,
}

impl MachinomyClaim {
    pub fn into_sub_protocol(&self) -> SubProtocolData {
        SubProtocolData {
            protocol_name: PROTOCOL_MACHINOMY.into(),
            content_type: ContentType::TextPlainUtf8,
            data: serde_json::to_vec(self).expect("MachinomyClaim always serializes"),
        }
    }

    pub fn from_sub_protocol(data: &SubProtocolData) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(&data.data)
    }
}

/// `channelDeposit` and `requestClose` carry no payload; their sub-protocol
/// name alone is the signal.
pub fn empty_sub_protocol(name: &'static str) -> SubProtocolData {
    SubProtocolData::new(name, Vec::new())
}

/// Wraps a raw ILP packet for the `ilp` sub-protocol.
pub fn ilp_sub_protocol(packet_bytes: Vec<u8>) -> SubProtocolData {
    SubProtocolData::new(PROTOCOL_ILP, packet_bytes)
}

impl<St, Ch, Tr, Si> PeerEngine<St, Ch, Tr, Si>
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    /// Dispatches a framed peer message to the right sub-protocol handler
    /// and returns the response to send back (§4.6).
    pub async fn handle_peer_message(&self, message: PeerMessage) -> PeerMessage {
        let mut response_protocols = Vec::new();

        if let Some(data) = message.protocol(PROTOCOL_INFO) {
            if let Ok(info) = InfoMessage::from_sub_protocol(data) {
                self.link_peer_address(info.address);
            }
            let our_info = InfoMessage {
                address: self.inner.signer.address(),
            };
            response_protocols.push(our_info.into_sub_protocol());
        }

        if message.protocol(PROTOCOL_CHANNEL_DEPOSIT).is_some() {
            let engine = self.clone();
            tokio::spawn(async move { engine.handle_channel_deposit_notification().await });
        }

        if message.protocol(PROTOCOL_REQUEST_CLOSE).is_some() {
            let engine = self.clone();
            tokio::spawn(async move { engine.claim_if_profitable(false, None).await });
        }

        if let Some(data) = message.protocol(PROTOCOL_MACHINOMY) {
            if let Ok(claim) = MachinomyClaim::from_sub_protocol(data) {
                self.validate_claim(claim).await;
            }
        }

        PeerMessage {
            request_id: message.request_id,
            protocols: response_protocols,
        }
    }

    /// Resolves `peerAddress`, exchanging `info` messages if it isn't
    /// known yet (§4.2 step 1).
    pub(crate) async fn ensure_peer_address(&self) -> Option<Address> {
        if let Some(address) = *self.inner.peer_address.lock() {
            return Some(address);
        }

        let our_info = InfoMessage {
            address: self.inner.signer.address(),
        };
        let request = PeerMessage {
            request_id: rand::random(),
            protocols: vec![our_info.into_sub_protocol()],
        };
        let response = match self.inner.transport.send(&self.inner.account_name, request).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(%error, "info exchange with peer failed");
                return None;
            }
        };

        let info = response
            .protocol(PROTOCOL_INFO)
            .and_then(|data| InfoMessage::from_sub_protocol(data).ok())?;
        self.link_peer_address(info.address)
    }

    /// Links `peerAddress` on first contact; refuses (logged, not errored)
    /// a second, different address (§4.6).
    pub(crate) fn link_peer_address(&self, address: Address) -> Option<Address> {
        let mut guard = self.inner.peer_address.lock();
        match *guard {
            Some(existing) if existing == address => Some(existing),
            Some(existing) => {
                tracing::debug!(
                    ?existing,
                    attempted = ?address,
                    "refusing to relink an account's peer address"
                );
                None
            }
            None => {
                *guard = Some(address);
                Some(address)
            }
        }
    }

    pub(crate) async fn transmit_claim(&self, claim: &ChannelClaim) {
        let message = MachinomyClaim {
            channel_id: claim.channel.channel_id,
            signature: claim.signature,
            value: claim.spent,
            contract_address: claim.channel.contract_address,
        };
        let peer_message = PeerMessage {
            request_id: rand::random(),
            protocols: vec![message.into_sub_protocol()],
        };
        if let Err(error) = self
            .inner
            .transport
            .send(&self.inner.account_name, peer_message)
            .await
        {
            tracing::debug!(%error, "failed to transmit claim to peer");
        }
    }

    pub(crate) async fn notify_channel_deposit(&self) {
        let peer_message = PeerMessage {
            request_id: rand::random(),
            protocols: vec![empty_sub_protocol(PROTOCOL_CHANNEL_DEPOSIT)],
        };
        if let Err(error) = self
            .inner
            .transport
            .send(&self.inner.account_name, peer_message)
            .await
        {
            tracing::debug!(%error, "failed to notify peer of deposit");
        }
    }

    /// Polls for the peer's deposit (250 ms × 20, distinct from the 1 s
    /// refresh cadence used elsewhere — §4.6) and, once observed,
    /// reconciles the cached incoming claim inside the incoming queue.
    async fn handle_channel_deposit_notification(&self) {
        let cached = match self.inner.incoming.state() {
            Some(claim) => claim,
            None => return,
        };
        let channel_id = cached.channel.channel_id;
        let prior_value = cached.channel.value;

        let mut observed = None;
        for attempt in 0..refresh::MAX_ATTEMPTS {
            match self.inner.chain.channel(channel_id).await {
                Ok(Some(channel)) if channel.value > prior_value => {
                    observed = Some(channel);
                    break;
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::debug!(%error, "chain read failed while polling for a peer's deposit");
                }
            }
            if attempt + 1 < refresh::MAX_ATTEMPTS {
                tokio::time::delay_for(Duration::from_millis(250)).await;
            }
        }

        let fresh = match observed {
            Some(channel) => channel,
            None => {
                tracing::debug!(?channel_id, "peer's deposit notification did not resolve in time");
                return;
            }
        };

        let result = self
            .inner
            .incoming
            .add(crate::queue::PRIORITY_VALIDATE_CLAIM, move |state| async move {
                match state {
                    Some(existing) if existing.channel.channel_id == fresh.channel_id => {
                        Some(ChannelClaim::new(fresh, existing.spent, existing.signature))
                    }
                    other => other,
                }
            })
            .await;

        if let Ok(new_state) = result {
            let _ = self.persist_with_incoming(new_state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_message_round_trips_through_sub_protocol() {
        let info = InfoMessage {
            address: Address::from_low_u64_be(0xAAAA),
        };
        let wire = info.into_sub_protocol();
        assert_eq!(wire.protocol_name, PROTOCOL_INFO);
        let back = InfoMessage::from_sub_protocol(&wire).unwrap();
        assert_eq!(back, info);
    }
}
