//! The persistence boundary (§5): an async-trait collaborator the engine is
//! generic over, mirroring how `interledger-store-memory`'s `InMemoryStore`
//! stands in for a pluggable `AccountStore`/`HttpStore` in the connector.
//! Two responsibilities live here: the per-peer account snapshot, and the
//! channel-id uniqueness registry that makes `bind_channel` injective.

use crate::account::AccountSnapshot;
use crate::channel::ChannelId;
use crate::errors::StoreError;
use async_trait::async_trait;

/// Persists account snapshots and the global channel-id -> account-name
/// registry used to reject a channel being claimed against more than one
/// account (§4.4, uniqueness check).
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self, account_name: &str) -> Result<Option<AccountSnapshot>, StoreError>;
    async fn put_account(
        &self,
        account_name: &str,
        snapshot: AccountSnapshot,
    ) -> Result<(), StoreError>;
    async fn unload(&self, account_name: &str) -> Result<(), StoreError>;

    /// Returns the account name already bound to `channel_id`, if any.
    async fn channel_owner(&self, channel_id: ChannelId) -> Result<Option<String>, StoreError>;

    /// Atomically binds `channel_id` to `account_name` iff it is not
    /// already bound to a *different* account. Returns `true` if the bind
    /// succeeded or the channel was already bound to this same account;
    /// `false` if it is bound to someone else.
    async fn bind_channel(
        &self,
        channel_id: ChannelId,
        account_name: &str,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// In-memory fixture in the style of `interledger-store-memory`'s
    /// `InMemoryStore`: good enough to exercise the engine in tests, never
    /// meant to be a production store.
    #[derive(Clone, Default)]
    pub struct InMemoryStore {
        accounts: Arc<Mutex<HashMap<String, AccountSnapshot>>>,
        channels: Arc<Mutex<HashMap<ChannelId, String>>>,
    }

    impl InMemoryStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl Store for InMemoryStore {
        async fn load(&self, account_name: &str) -> Result<Option<AccountSnapshot>, StoreError> {
            Ok(self.accounts.lock().get(account_name).cloned())
        }

        async fn put_account(
            &self,
            account_name: &str,
            snapshot: AccountSnapshot,
        ) -> Result<(), StoreError> {
            self.accounts
                .lock()
                .insert(account_name.to_string(), snapshot);
            Ok(())
        }

        async fn unload(&self, account_name: &str) -> Result<(), StoreError> {
            self.accounts.lock().remove(account_name);
            Ok(())
        }

        async fn channel_owner(
            &self,
            channel_id: ChannelId,
        ) -> Result<Option<String>, StoreError> {
            Ok(self.channels.lock().get(&channel_id).cloned())
        }

        async fn bind_channel(
            &self,
            channel_id: ChannelId,
            account_name: &str,
        ) -> Result<bool, StoreError> {
            let mut channels = self.channels.lock();
            match channels.get(&channel_id) {
                Some(existing) => Ok(existing == account_name),
                None => {
                    channels.insert(channel_id, account_name.to_string());
                    Ok(true)
                }
            }
        }
    }

    #[tokio::test]
    async fn bind_channel_is_injective() {
        let store = InMemoryStore::new();
        let id = ChannelId::repeat_byte(7);
        assert!(store.bind_channel(id, "alice").await.unwrap());
        assert!(store.bind_channel(id, "alice").await.unwrap());
        assert!(!store.bind_channel(id, "bob").await.unwrap());
        assert_eq!(
            store.channel_owner(id).await.unwrap(),
            Some("alice".to_string())
        );
    }

    proptest::proptest! {
        /// §8: the channel-id -> account-name registry is injective for any
        /// channel id and any two distinct account names, not just the
        /// fixture values above.
        #[test]
        fn bind_channel_is_injective_prop(
            id_bytes in proptest::prelude::any::<[u8; 32]>(),
            account_a in "[a-z]{1,8}",
            account_b in "[a-z]{1,8}",
        ) {
            proptest::prop_assume!(account_a != account_b);
            let store = InMemoryStore::new();
            let id = ChannelId::from(id_bytes);
            let rt = tokio::runtime::Runtime::new().unwrap();

            let first = rt.block_on(store.bind_channel(id, &account_a)).unwrap();
            let second = rt.block_on(store.bind_channel(id, &account_b)).unwrap();

            proptest::prop_assert!(first);
            proptest::prop_assert!(!second);
            proptest::prop_assert_eq!(
                rt.block_on(store.channel_owner(id)).unwrap(),
                Some(account_a)
            );
        }
    }
}
