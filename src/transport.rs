//! The peer-message transport boundary (§4.6). Framing mirrors
//! `interledger-btp::packet::ProtocolData`/`BtpMessage`: a peer message is a
//! request id plus an ordered list of named, typed sub-protocol payloads.
//! The actual wire transport (BTP, or anything else) is out of scope (§1);
//! this module only defines the shape and the trait the engine sends
//! through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentType {
    ApplicationOctetStream,
    TextPlainUtf8,
}

/// One named sub-protocol payload within a peer message, named the same way
/// `ProtocolData` is in the BTP packet format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubProtocolData {
    pub protocol_name: Cow<'static, str>,
    pub content_type: ContentType,
    pub data: Vec<u8>,
}

impl SubProtocolData {
    pub fn new(protocol_name: &'static str, data: Vec<u8>) -> Self {
        SubProtocolData {
            protocol_name: Cow::Borrowed(protocol_name),
            content_type: ContentType::ApplicationOctetStream,
            data,
        }
    }
}

/// A full peer message: one or more sub-protocol payloads sent together,
/// identified by `request_id` for request/response correlation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMessage {
    pub request_id: u32,
    pub protocols: Vec<SubProtocolData>,
}

impl PeerMessage {
    pub fn protocol(&self, name: &str) -> Option<&SubProtocolData> {
        self.protocols.iter().find(|p| p.protocol_name == name)
    }
}

/// Sends/receives framed peer messages to/from a named account. An
/// external collaborator; how messages actually reach the peer (BTP over
/// websocket, or anything else) is out of scope.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        account_name: &str,
        message: PeerMessage,
    ) -> Result<PeerMessage, crate::errors::TransportError>;
}
