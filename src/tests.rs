//! End-to-end scenario tests (§8), exercised against in-memory fakes for
//! every external collaborator. Lives as a crate-internal `#[cfg(test)]`
//! module (not `tests/`) since the scenarios need direct access to
//! `Inner`'s private fields the way `interledger-store-memory`'s own tests
//! reach into its store directly.

use crate::chain::{ChainOp, ChannelSigner, LocalSigner, OnChainClient};
use crate::channel::{Channel, ChannelId};
use crate::config::EngineConfig;
use crate::errors::ChainError;
use crate::messaging::MachinomyClaim;
use crate::outgoing::no_op_authorize;
use crate::store::memory::InMemoryStore;
use crate::store::Store;
use crate::transport::{PeerMessage, Transport};
use crate::PeerEngine;
use async_trait::async_trait;
use ethereum_types::{Address, U256};
use parking_lot::Mutex;
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Clone)]
struct FakeChain {
    channels: Arc<Mutex<HashMap<ChannelId, Channel>>>,
    fee: U256,
}

impl FakeChain {
    fn new(fee: u64) -> Self {
        FakeChain {
            channels: Arc::new(Mutex::new(HashMap::new())),
            fee: U256::from(fee),
        }
    }

    fn seed(&self, channel: Channel) {
        self.channels.lock().insert(channel.channel_id, channel);
    }
}

#[async_trait]
impl OnChainClient for FakeChain {
    async fn channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, ChainError> {
        Ok(self.channels.lock().get(&channel_id).copied())
    }

    async fn gas_price(&self) -> Result<U256, ChainError> {
        Ok(U256::from(1u64))
    }

    async fn estimate_fee(&self, _op: ChainOp) -> Result<U256, ChainError> {
        Ok(self.fee)
    }

    async fn open(
        &self,
        channel_id: ChannelId,
        receiver: Address,
        value: U256,
        dispute_period: u32,
    ) -> Result<(), ChainError> {
        let channel = Channel {
            channel_id,
            contract_address: Address::from_low_u64_be(0xC0FFEE),
            sender: Address::from_low_u64_be(0xAAAA),
            receiver,
            value,
            dispute_period,
            disputed_until: None,
        };
        self.channels.lock().insert(channel_id, channel);
        Ok(())
    }

    async fn deposit(&self, channel_id: ChannelId, value: U256) -> Result<(), ChainError> {
        let mut channels = self.channels.lock();
        let channel = channels
            .get_mut(&channel_id)
            .ok_or(ChainError::ChannelNotFound(channel_id))?;
        channel.value += value;
        Ok(())
    }

    async fn claim(&self, claim: &crate::channel::ChannelClaim) -> Result<(), ChainError> {
        self.channels.lock().remove(&claim.channel.channel_id);
        Ok(())
    }
}

#[derive(Clone)]
struct NoopTransport;

#[async_trait]
impl Transport for NoopTransport {
    async fn send(
        &self,
        _account_name: &str,
        message: PeerMessage,
    ) -> Result<PeerMessage, crate::errors::TransportError> {
        Ok(PeerMessage {
            request_id: message.request_id,
            protocols: Vec::new(),
        })
    }
}

fn config(contract: Address, our_address: Address) -> EngineConfig {
    EngineConfig {
        contract_address: contract,
        our_address,
        outgoing_channel_amount: 1_000_000_000,
        min_incoming_channel_amount: 1_000_000,
        outgoing_dispute_period: 100,
        min_incoming_dispute_period: 50,
        channel_watcher_interval_ms: 60_000,
        max_packet_amount: 1_000_000,
        max_balance: 1_000_000_000,
    }
}

fn signer(byte: u8) -> LocalSigner {
    LocalSigner::new(SecretKey::from_slice(&[byte; 32]).unwrap())
}

/// Scenario 1 (§8): open and zero-claim.
#[tokio::test]
async fn open_and_zero_claim() {
    let our_signer = signer(0x11);
    let peer_address = Address::from_low_u64_be(0xAAAA);
    let contract = Address::from_low_u64_be(0xC0FFEE);

    let store = InMemoryStore::new();
    store
        .put_account(
            "peer",
            crate::account::AccountSnapshot {
                account_name: "peer".into(),
                peer_address: Some(peer_address),
                receivable: 0,
                payable: 0,
                outgoing_channel: None,
                incoming_channel: None,
            },
        )
        .await
        .unwrap();

    let chain = FakeChain::new(1);
    let engine = PeerEngine::load(
        config(contract, our_signer.address()),
        store,
        chain,
        NoopTransport,
        our_signer,
        "peer",
    )
    .await
    .unwrap();

    let outgoing = engine
        .fund_outgoing_channel(U256::from(1_000_000_000u64), no_op_authorize())
        .await
        .unwrap();

    let claim = outgoing.expect("a channel should have been opened");
    assert_eq!(claim.channel.value, U256::from(1_000_000_000u64));
    assert_eq!(claim.spent, U256::zero());
}

/// Scenario 6 (§8): uniqueness collision.
#[tokio::test]
async fn uniqueness_collision_rejects_second_account() {
    let contract = Address::from_low_u64_be(0xC0FFEE);
    let our_address_a = signer(0x21).address();
    let our_address_b = signer(0x22).address();
    let peer_signer = signer(0x33);

    let channel_id = ChannelId::repeat_byte(0xBE);
    let channel = Channel {
        channel_id,
        contract_address: contract,
        sender: peer_signer.address(),
        receiver: our_address_a,
        value: U256::from(1_000_000_000u64),
        dispute_period: 100,
        disputed_until: None,
    };

    let chain_a = FakeChain::new(1);
    chain_a.seed(channel);
    let store_a = InMemoryStore::new();
    let engine_a = PeerEngine::load(
        config(contract, our_address_a),
        store_a.clone(),
        chain_a.clone(),
        NoopTransport,
        signer(0x21),
        "account-a",
    )
    .await
    .unwrap();

    let spent = U256::from(100u64);
    let signature = peer_signer.sign_claim(contract, channel_id, spent).await.unwrap();
    engine_a
        .validate_claim(MachinomyClaim {
            channel_id,
            signature,
            value: spent,
            contract_address: contract,
        })
        .await;
    assert!(engine_a.inner.incoming.state().is_some());

    let mut channel_b = channel;
    channel_b.receiver = our_address_b;
    let chain_b = FakeChain::new(1);
    chain_b.seed(channel_b);
    let store_b = InMemoryStore::new();
    // Share the uniqueness registry the way a single deployment would: the
    // same store instance backs both accounts.
    store_b
        .bind_channel(channel_id, "account-a")
        .await
        .unwrap();

    let engine_b = PeerEngine::load(
        config(contract, our_address_b),
        store_b,
        chain_b,
        NoopTransport,
        signer(0x22),
        "account-b",
    )
    .await
    .unwrap();

    let signature_b = peer_signer.sign_claim(contract, channel_id, spent).await.unwrap();
    engine_b
        .validate_claim(MachinomyClaim {
            channel_id,
            signature: signature_b,
            value: spent,
            contract_address: contract,
        })
        .await;

    assert!(engine_b.inner.incoming.state().is_none());
}

/// Scenario 5 (§8): unprofitable close request is a no-op.
#[tokio::test]
async fn unprofitable_claim_is_skipped() {
    let contract = Address::from_low_u64_be(0xC0FFEE);
    let our_signer = signer(0x44);
    let peer_signer = signer(0x55);

    let channel_id = ChannelId::repeat_byte(0x10);
    let channel = Channel {
        channel_id,
        contract_address: contract,
        sender: peer_signer.address(),
        receiver: our_signer.address(),
        value: U256::from(1_000_000u64),
        dispute_period: 100,
        disputed_until: None,
    };

    let chain = FakeChain::new(20_000_000); // fee (2e7) > spent (1e7)
    chain.seed(channel);
    let store = InMemoryStore::new();
    let engine = PeerEngine::load(
        config(contract, our_signer.address()),
        store,
        chain.clone(),
        NoopTransport,
        our_signer,
        "peer",
    )
    .await
    .unwrap();

    let spent = U256::from(10_000_000u64);
    let signature = peer_signer.sign_claim(contract, channel_id, spent).await.unwrap();
    engine
        .validate_claim(MachinomyClaim {
            channel_id,
            signature,
            value: spent,
            contract_address: contract,
        })
        .await;
    assert!(engine.inner.incoming.state().is_some());

    engine.claim_if_profitable(false, None).await;

    // The fee exceeds the claimable amount, so the channel should still be
    // present both in our cache and on the fake chain.
    assert!(engine.inner.incoming.state().is_some());
    assert!(chain.channel(channel_id).await.unwrap().is_some());
}

/// Claim with value 0 is accepted for a brand-new channel.
#[tokio::test]
async fn zero_value_claim_accepted_on_new_channel() {
    let contract = Address::from_low_u64_be(0xC0FFEE);
    let our_signer = signer(0x66);
    let peer_signer = signer(0x77);

    let channel_id = ChannelId::repeat_byte(0x20);
    let channel = Channel {
        channel_id,
        contract_address: contract,
        sender: peer_signer.address(),
        receiver: our_signer.address(),
        value: U256::from(1_000_000u64),
        dispute_period: 100,
        disputed_until: None,
    };

    let chain = FakeChain::new(1);
    chain.seed(channel);
    let store = InMemoryStore::new();
    let engine = PeerEngine::load(
        config(contract, our_signer.address()),
        store,
        chain,
        NoopTransport,
        our_signer,
        "peer",
    )
    .await
    .unwrap();

    let signature = peer_signer.sign_claim(contract, channel_id, U256::zero()).await.unwrap();
    engine
        .validate_claim(MachinomyClaim {
            channel_id,
            signature,
            value: U256::zero(),
            contract_address: contract,
        })
        .await;

    let cached = engine.inner.incoming.state().expect("proof-of-channel claim should be accepted");
    assert_eq!(cached.spent, U256::zero());
}

/// §8 universal invariant: accepted incoming claims' `spent` is monotone
/// non-decreasing across an arbitrary sequence of increasing claims.
#[tokio::test]
async fn accepted_claims_spent_is_monotone() {
    let contract = Address::from_low_u64_be(0xC0FFEE);
    let our_signer = signer(0x88);
    let peer_signer = signer(0x99);

    let channel_id = ChannelId::repeat_byte(0x30);
    let channel = Channel {
        channel_id,
        contract_address: contract,
        sender: peer_signer.address(),
        receiver: our_signer.address(),
        value: U256::from(1_000_000_000u64),
        dispute_period: 100,
        disputed_until: None,
    };

    let chain = FakeChain::new(1);
    chain.seed(channel);
    let store = InMemoryStore::new();
    let engine = PeerEngine::load(
        config(contract, our_signer.address()),
        store,
        chain,
        NoopTransport,
        our_signer,
        "peer",
    )
    .await
    .unwrap();

    let mut last_spent = U256::zero();
    for step in [0u64, 10_000, 10_000, 50_000, 200_000, 200_000, 999_999_999] {
        let value = U256::from(step);
        let signature = peer_signer.sign_claim(contract, channel_id, value).await.unwrap();
        engine
            .validate_claim(MachinomyClaim {
                channel_id,
                signature,
                value,
                contract_address: contract,
            })
            .await;

        if let Some(cached) = engine.inner.incoming.state() {
            assert!(cached.spent >= last_spent, "spent must never regress");
            last_spent = cached.spent;
        }
    }
    assert_eq!(last_spent, U256::from(999_999_999u64));
}

proptest::proptest! {
    /// §8 universal invariant, generalized: for any sequence of claim
    /// values, the cached `spent` is monotone non-decreasing.
    #[test]
    fn accepted_claims_spent_is_monotone_prop(
        values in proptest::collection::vec(0u64..2_000_000_000u64, 1..12)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let monotone = rt.block_on(async {
            let contract = Address::from_low_u64_be(0xC0FFEE);
            let our_signer = signer(0xAB);
            let peer_signer = signer(0xCD);

            let channel_id = ChannelId::repeat_byte(0x31);
            let channel = Channel {
                channel_id,
                contract_address: contract,
                sender: peer_signer.address(),
                receiver: our_signer.address(),
                value: U256::from(2_000_000_000u64),
                dispute_period: 100,
                disputed_until: None,
            };

            let chain = FakeChain::new(1);
            chain.seed(channel);
            let store = InMemoryStore::new();
            let engine = PeerEngine::load(
                config(contract, our_signer.address()),
                store,
                chain,
                NoopTransport,
                our_signer,
                "peer",
            )
            .await
            .unwrap();

            let mut last_spent = U256::zero();
            let mut monotone = true;
            for step in &values {
                let value = U256::from(*step);
                let signature = peer_signer.sign_claim(contract, channel_id, value).await.unwrap();
                engine
                    .validate_claim(MachinomyClaim {
                        channel_id,
                        signature,
                        value,
                        contract_address: contract,
                    })
                    .await;

                if let Some(cached) = engine.inner.incoming.state() {
                    if cached.spent < last_spent {
                        monotone = false;
                    }
                    last_spent = cached.spent;
                }
            }
            monotone
        });

        proptest::prop_assert!(monotone, "spent must never regress");
    }
}
