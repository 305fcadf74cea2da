//! A bilateral settlement engine pairing packet-level credit accounting
//! with unidirectional on-chain payment channels as the settlement rail.
//! One [`PeerEngine`] instance manages one peer account end to end: it
//! tracks net debt as packets flow through [`forwarding`], settles what it
//! owes via [`outgoing`], validates what the peer pays via [`incoming`],
//! and keeps the underlying channels alive via [`watcher`].
//!
//! The store, on-chain client, transport and signer are external
//! collaborators (`St`/`Ch`/`Tr`/`Si` below); this crate only depends on
//! their trait boundaries (`store::Store`, `chain::OnChainClient`,
//! `transport::Transport`, `chain::ChannelSigner`), the same way
//! `interledger-service` depends on `Account`/`*Store` traits rather than
//! concrete implementations.

pub mod account;
pub mod chain;
pub mod channel;
pub mod config;
pub mod errors;
pub mod forwarding;
pub mod incoming;
pub mod messaging;
pub mod outgoing;
pub mod queue;
pub mod refresh;
pub mod store;
pub mod transport;
pub mod units;
pub mod watcher;

#[cfg(test)]
mod tests;

use crate::account::AccountSnapshot;
use crate::chain::{ChannelSigner, OnChainClient};
use crate::channel::{IncomingChannel, OutgoingChannel};
use crate::config::EngineConfig;
use crate::errors::StoreError;
use crate::queue::ReducerQueue;
use crate::store::Store;
use crate::transport::Transport;
use ethereum_types::Address;
use parking_lot::Mutex;
use std::sync::Arc;

/// The three account-level counters that live outside the channel reducer
/// queues (§4.5): they're mutated directly by the forwarding hot path as
/// well as by `createClaim`/`validateClaim`, so they get their own lock
/// rather than routing every packet through a queue meant for channel
/// mutation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Balances {
    pub receivable: i64,
    pub payable: i64,
    pub payout_amount: i64,
}

/// Shared engine state for one peer account. Cloning a [`PeerEngine`] is
/// cheap (an `Arc` bump); every clone refers to the same queues and
/// balances.
pub struct Inner<St, Ch, Tr, Si> {
    pub(crate) config: EngineConfig,
    pub(crate) store: St,
    pub(crate) chain: Ch,
    pub(crate) transport: Tr,
    pub(crate) signer: Si,
    pub(crate) account_name: String,

    pub(crate) balances: Mutex<Balances>,
    pub(crate) peer_address: Mutex<Option<Address>>,

    pub(crate) outgoing: ReducerQueue<Option<OutgoingChannel>>,
    /// The transient deposit side-queue (§4.2, §5). `Some` only while a
    /// deposit is in flight; new `sendMoney` calls route here instead of
    /// to `outgoing` whenever it's present.
    pub(crate) deposit_side_queue: Mutex<Option<Arc<ReducerQueue<Option<OutgoingChannel>>>>>,

    pub(crate) incoming: ReducerQueue<Option<IncomingChannel>>,
    pub(crate) watcher_running: Mutex<bool>,
}

#[derive(Clone)]
pub struct PeerEngine<St, Ch, Tr, Si> {
    pub(crate) inner: Arc<Inner<St, Ch, Tr, Si>>,
}

impl<St, Ch, Tr, Si> PeerEngine<St, Ch, Tr, Si>
where
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    /// Hydrates an account from the store (or starts it fresh if unknown)
    /// and returns a ready-to-use engine. Mirrors the account's creation
    /// moment (§3, "Account created by the surrounding plugin on first
    /// peer contact").
    pub async fn load(
        config: EngineConfig,
        store: St,
        chain: Ch,
        transport: Tr,
        signer: Si,
        account_name: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let account_name = account_name.into();
        let snapshot = store
            .load(&account_name)
            .await?
            .unwrap_or_else(|| AccountSnapshot::new(account_name.clone()));

        let inner = Inner {
            config,
            store,
            chain,
            transport,
            signer,
            account_name,
            balances: Mutex::new(Balances {
                receivable: snapshot.receivable,
                payable: snapshot.payable,
                payout_amount: 0,
            }),
            peer_address: Mutex::new(snapshot.peer_address),
            outgoing: ReducerQueue::new(snapshot.outgoing_channel),
            deposit_side_queue: Mutex::new(None),
            incoming: ReducerQueue::new(snapshot.incoming_channel),
            watcher_running: Mutex::new(false),
        };

        let engine = PeerEngine {
            inner: Arc::new(inner),
        };
        if engine.inner.incoming.state().is_some() {
            watcher::ensure_running(&engine);
        }
        Ok(engine)
    }

    pub fn account_name(&self) -> &str {
        &self.inner.account_name
    }

    pub fn balances(&self) -> Balances {
        *self.inner.balances.lock()
    }

    pub fn peer_address(&self) -> Option<Address> {
        *self.inner.peer_address.lock()
    }

    /// Writes the account snapshot through to the store. Called after
    /// every successful reducer commit (§9, "proxied mutation-triggers-
    /// persistence becomes an explicit commit").
    pub(crate) async fn persist(&self) -> Result<(), StoreError> {
        let (receivable, payable) = {
            let b = self.inner.balances.lock();
            (b.receivable, b.payable)
        };
        let snapshot = AccountSnapshot {
            account_name: self.inner.account_name.clone(),
            peer_address: *self.inner.peer_address.lock(),
            receivable,
            payable,
            outgoing_channel: self.inner.outgoing.state(),
            incoming_channel: self.inner.incoming.state(),
        };
        self.inner
            .store
            .put_account(&self.inner.account_name, snapshot)
            .await
    }

    pub async fn unload(&self) -> Result<(), StoreError> {
        self.persist().await?;
        self.inner.store.unload(&self.inner.account_name).await
    }

    /// Persists with an explicit outgoing-channel value rather than reading
    /// it back off the queue. A reducer calls this with the value it is
    /// about to return, since the queue's own `state()` mirror is only
    /// updated once the reducer has fully resolved (§9, explicit commit).
    pub(crate) async fn persist_with_outgoing(
        &self,
        outgoing: Option<OutgoingChannel>,
    ) -> Result<(), StoreError> {
        let (receivable, payable) = {
            let b = self.inner.balances.lock();
            (b.receivable, b.payable)
        };
        let snapshot = AccountSnapshot {
            account_name: self.inner.account_name.clone(),
            peer_address: *self.inner.peer_address.lock(),
            receivable,
            payable,
            outgoing_channel: outgoing,
            incoming_channel: self.inner.incoming.state(),
        };
        self.inner
            .store
            .put_account(&self.inner.account_name, snapshot)
            .await
    }

    pub(crate) async fn persist_with_incoming(
        &self,
        incoming: Option<IncomingChannel>,
    ) -> Result<(), StoreError> {
        let (receivable, payable) = {
            let b = self.inner.balances.lock();
            (b.receivable, b.payable)
        };
        let snapshot = AccountSnapshot {
            account_name: self.inner.account_name.clone(),
            peer_address: *self.inner.peer_address.lock(),
            receivable,
            payable,
            outgoing_channel: self.inner.outgoing.state(),
            incoming_channel: incoming,
        };
        self.inner
            .store
            .put_account(&self.inner.account_name, snapshot)
            .await
    }
}
