//! The on-chain adapter boundary (§5, §6). `OnChainClient` is the external
//! collaborator that knows how to read and submit to the payment-channel
//! contract; `ChannelSigner`/`ChannelVerifier` wrap claim signing and
//! recovery. `LocalSigner` is a concrete secp256k1 + Keccak256 signer kept
//! in the main crate rather than behind a test flag, the same way
//! `interledger-settlement-engines` ships `impl EthereumLedgerTxSigner for
//! Secret<String>` as a real, non-test signer.

use crate::channel::{Channel, ChannelClaim, ChannelId, FlatSignature};
use crate::errors::ChainError;
use async_trait::async_trait;
use ethereum_types::{Address, H256, U256};
use secp256k1::recovery::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

/// The action being costed by `estimate_fee`, so a caller's `authorize`
/// hook can show the user what they're paying for (§5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainOp {
    Open,
    Deposit,
    Claim,
}

/// Read/write access to the payment-channel contract. An external
/// collaborator: the engine never encodes transactions itself, matching
/// the spec's framing of the chain adapter as an interface only (§5).
#[async_trait]
pub trait OnChainClient: Send + Sync {
    async fn channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, ChainError>;
    async fn gas_price(&self) -> Result<U256, ChainError>;
    async fn estimate_fee(&self, op: ChainOp) -> Result<U256, ChainError>;

    /// Opens a channel under a caller-chosen `channel_id` (the caller
    /// generates a fresh random id before calling this, per §4.2).
    async fn open(
        &self,
        channel_id: ChannelId,
        receiver: Address,
        value: U256,
        dispute_period: u32,
    ) -> Result<(), ChainError>;

    async fn deposit(&self, channel_id: ChannelId, value: U256) -> Result<(), ChainError>;

    /// Submits a claim to settle (close) a channel on-chain.
    async fn claim(&self, claim: &ChannelClaim) -> Result<(), ChainError>;
}

/// Computes the digest a channel claim signs over: `keccak256(contractAddress
/// || channelId || spent)`, per §6's `(contractAddress, channelId, spent)`
/// binding — omitting the contract address would let a claim signed for one
/// contract validate against any other contract using the same channel id.
pub fn claim_digest(contract_address: Address, channel_id: ChannelId, spent: U256) -> H256 {
    let mut hasher = Keccak256::new();
    hasher.update(contract_address.as_bytes());
    hasher.update(channel_id.as_bytes());
    let mut spent_bytes = [0u8; 32];
    spent.to_big_endian(&mut spent_bytes);
    hasher.update(&spent_bytes);
    H256::from_slice(&hasher.finalize())
}

/// Recovers the address that produced `signature` over
/// `contract_address`/`channel_id`/`spent`.
pub fn recover_claim_signer(
    contract_address: Address,
    channel_id: ChannelId,
    spent: U256,
    signature: &FlatSignature,
) -> Result<Address, ChainError> {
    let digest = claim_digest(contract_address, channel_id, spent);
    let secp = Secp256k1::verification_only();

    let recovery_id = match signature.v() {
        27 => RecoveryId::from_i32(0),
        28 => RecoveryId::from_i32(1),
        other => {
            return Err(ChainError::SubmissionFailed(format!(
                "invalid recovery byte {}",
                other
            )))
        }
    }
    .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;

    let mut compact = [0u8; 64];
    compact[0..32].copy_from_slice(signature.r());
    compact[32..64].copy_from_slice(signature.s());

    let recoverable = RecoverableSignature::from_compact(&compact, recovery_id)
        .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;
    let message = Message::from_slice(digest.as_bytes())
        .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;
    let public_key = secp
        .recover(&message, &recoverable)
        .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;

    Ok(public_key_to_address(&public_key))
}

fn public_key_to_address(public_key: &secp256k1::PublicKey) -> Address {
    let uncompressed = public_key.serialize_uncompressed();
    // Drop the leading 0x04 prefix before hashing, per the standard
    // Ethereum address derivation.
    let hash = Keccak256::digest(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

/// Signs claims on behalf of an account. An external collaborator so the
/// engine never has direct custody of key material in the general case;
/// `LocalSigner` below is the concrete default.
#[async_trait]
pub trait ChannelSigner: Send + Sync {
    async fn sign_claim(
        &self,
        contract_address: Address,
        channel_id: ChannelId,
        spent: U256,
    ) -> Result<FlatSignature, ChainError>;

    fn address(&self) -> Address;
}

/// A signer backed directly by a secp256k1 secret key, for deployments that
/// want the engine to hold key material itself rather than delegate to an
/// external signing service.
pub struct LocalSigner {
    secret_key: SecretKey,
    address: Address,
}

impl LocalSigner {
    pub fn new(secret_key: SecretKey) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = secp256k1::PublicKey::from_secret_key(&secp, &secret_key);
        let address = public_key_to_address(&public_key);
        LocalSigner {
            secret_key,
            address,
        }
    }
}

#[async_trait]
impl ChannelSigner for LocalSigner {
    async fn sign_claim(
        &self,
        contract_address: Address,
        channel_id: ChannelId,
        spent: U256,
    ) -> Result<FlatSignature, ChainError> {
        let digest = claim_digest(contract_address, channel_id, spent);
        let secp = Secp256k1::signing_only();
        let message = Message::from_slice(digest.as_bytes())
            .map_err(|e| ChainError::SubmissionFailed(e.to_string()))?;
        let (recovery_id, compact) = secp
            .sign_recoverable(&message, &self.secret_key)
            .serialize_compact();

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&compact[0..32]);
        s.copy_from_slice(&compact[32..64]);
        let v = 27 + recovery_id.to_i32() as u8;

        Ok(FlatSignature::from_parts(r, s, v))
    }

    fn address(&self) -> Address {
        self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_then_recover_round_trips() {
        let secret_key = SecretKey::from_slice(&[0x11; 32]).unwrap();
        let signer = LocalSigner::new(secret_key);
        let contract_address = Address::from_low_u64_be(0xC0FFEE);
        let channel_id = ChannelId::repeat_byte(0x42);
        let spent = U256::from(1_000u64);

        let signature = signer
            .sign_claim(contract_address, channel_id, spent)
            .await
            .unwrap();
        let recovered =
            recover_claim_signer(contract_address, channel_id, spent, &signature).unwrap();
        assert_eq!(recovered, signer.address());
    }

    proptest::proptest! {
        /// §8: signing then recovering always yields the signer's own
        /// address, for any valid secret key / contract / channel / amount.
        #[test]
        fn sign_then_recover_round_trips_prop(
            secret_bytes in proptest::prelude::any::<[u8; 32]>()
                .prop_filter("must be a valid secp256k1 scalar", |b| SecretKey::from_slice(b).is_ok()),
            contract_bytes in proptest::prelude::any::<[u8; 20]>(),
            channel_bytes in proptest::prelude::any::<[u8; 32]>(),
            spent_value in proptest::prelude::any::<u64>(),
        ) {
            let secret_key = SecretKey::from_slice(&secret_bytes).unwrap();
            let signer = LocalSigner::new(secret_key);
            let contract_address = Address::from_slice(&contract_bytes);
            let channel_id = ChannelId::from(channel_bytes);
            let spent = U256::from(spent_value);

            let rt = tokio::runtime::Runtime::new().unwrap();
            let signature = rt
                .block_on(signer.sign_claim(contract_address, channel_id, spent))
                .unwrap();
            let recovered =
                recover_claim_signer(contract_address, channel_id, spent, &signature).unwrap();

            proptest::prop_assert_eq!(recovered, signer.address());
        }
    }
}
