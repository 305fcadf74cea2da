//! The on-chain channel data model (§3). `Channel` carries the fields common
//! to both directions; `ChannelClaim` adds the latest signed claim
//! (`spent`/`signature`). `OutgoingChannel` and `IncomingChannel` are the same
//! shape, per the spec ("IncomingChannel = OutgoingChannel with the same
//! shape") — kept as distinct type aliases so call sites read intention.

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub type ChannelId = H256;

/// 65-byte flat ECDSA signature: 32-byte `r`, 32-byte `s`, 1-byte `v` with
/// `v` in `{0x1b, 0x1c}` (27/28), per §6.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FlatSignature(pub [u8; 65]);

impl FlatSignature {
    pub fn r(&self) -> &[u8] {
        &self.0[0..32]
    }

    pub fn s(&self) -> &[u8] {
        &self.0[32..64]
    }

    pub fn v(&self) -> u8 {
        self.0[64]
    }

    pub fn from_parts(r: [u8; 32], s: [u8; 32], v: u8) -> Self {
        let mut bytes = [0u8; 65];
        bytes[0..32].copy_from_slice(&r);
        bytes[32..64].copy_from_slice(&s);
        bytes[64] = v;
        FlatSignature(bytes)
    }
}

impl fmt::Debug for FlatSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FlatSignature(0x{})", hex::encode(&self.0[..]))
    }
}

// serde doesn't derive for arrays longer than 32 elements on the serde
// version pinned here, so the 65-byte signature is framed as a hex string,
// matching how the rest of the workspace serializes fixed-width byte blobs.
impl Serialize for FlatSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0[..]))
    }
}

impl<'de> Deserialize<'de> for FlatSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        if bytes.len() != 65 {
            return Err(serde::de::Error::custom(format!(
                "expected a 65-byte signature, got {} bytes",
                bytes.len()
            )));
        }
        let mut out = [0u8; 65];
        out.copy_from_slice(&bytes);
        Ok(FlatSignature(out))
    }
}

/// Fields common to both directions of a unidirectional payment channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: ChannelId,
    pub contract_address: Address,
    pub sender: Address,
    pub receiver: Address,
    /// Total amount deposited on-chain, in wei.
    pub value: U256,
    /// Dispute period, in blocks.
    pub dispute_period: u32,
    /// Set once the sender has started an on-chain dispute/close.
    pub disputed_until: Option<u64>,
}

impl Channel {
    pub fn remaining(&self, spent: U256) -> U256 {
        self.value.saturating_sub(spent)
    }
}

/// A channel plus the latest claim known against it. Used identically for
/// the channel we pay out of (`OutgoingChannel`) and the channel the peer
/// pays us out of (`IncomingChannel`).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelClaim {
    pub channel: Channel,
    /// Wei paid out under the latest signed claim. Invariant: `0 <= spent <= channel.value`.
    pub spent: U256,
    pub signature: FlatSignature,
}

impl ChannelClaim {
    pub fn new(channel: Channel, spent: U256, signature: FlatSignature) -> Self {
        debug_assert!(spent <= channel.value, "spent must never exceed value");
        ChannelClaim {
            channel,
            spent,
            signature,
        }
    }
}

pub type OutgoingChannel = ChannelClaim;
pub type IncomingChannel = ChannelClaim;
