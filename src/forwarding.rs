//! Forwarding hooks (§4.5): inbound PREPARE admission and outbound
//! response handling, wired into an ILP connector's service chain the same
//! way `interledger-service-util`'s `MaxPacketAmountService`/
//! `BalanceService` wrap a `next` service and rewrite the reject/response.

use crate::chain::{ChannelSigner, OnChainClient};
use crate::store::Store;
use crate::transport::Transport;
use crate::PeerEngine;
use async_trait::async_trait;
use interledger_packet::{ErrorCode, RejectBuilder};
use interledger_service::{Account, IlpResult, IncomingRequest, IncomingService, OutgoingRequest, OutgoingService};

/// Inbound PREPARE admission: enforces the per-packet size cap and the
/// receivable ceiling before letting a packet continue down the chain,
/// then rolls the receivable credit back on a REJECT (§4.5).
#[derive(Clone)]
pub struct InboundAdmission<I, St, Ch, Tr, Si> {
    engine: PeerEngine<St, Ch, Tr, Si>,
    next: I,
}

impl<I, St, Ch, Tr, Si> InboundAdmission<I, St, Ch, Tr, Si> {
    pub fn new(engine: PeerEngine<St, Ch, Tr, Si>, next: I) -> Self {
        InboundAdmission { engine, next }
    }
}

#[async_trait]
impl<I, A, St, Ch, Tr, Si> IncomingService<A> for InboundAdmission<I, St, Ch, Tr, Si>
where
    I: IncomingService<A> + Clone + Send + Sync + 'static,
    A: Account + Send + Sync + 'static,
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    async fn handle_request(&mut self, request: IncomingRequest<A>) -> IlpResult {
        let amount = request.prepare.amount() as i64;
        let max_packet_amount = self.engine.inner.config.max_packet_amount as i64;

        if amount > max_packet_amount {
            tracing::debug!(amount, max_packet_amount, "rejecting packet over the size cap");
            return Err(RejectBuilder {
                code: ErrorCode::F08_AMOUNT_TOO_LARGE,
                message: b"packet amount exceeds the configured maximum",
                data: &[],
                triggered_by: None,
            }
            .build());
        }

        let new_receivable = {
            let balances = self.engine.inner.balances.lock();
            balances.receivable + amount
        };
        if new_receivable > self.engine.inner.config.max_balance {
            tracing::debug!(new_receivable, "rejecting packet that would exceed the receivable cap");
            return Err(RejectBuilder {
                code: ErrorCode::T04_INSUFFICIENT_LIQUIDITY,
                message: b"receivable balance would exceed the configured maximum",
                data: &[],
                triggered_by: None,
            }
            .build());
        }

        {
            let mut balances = self.engine.inner.balances.lock();
            balances.receivable = new_receivable;
        }

        let result = self.next.handle_request(request).await;
        if result.is_err() {
            let mut balances = self.engine.inner.balances.lock();
            balances.receivable -= amount;
        }
        result
    }
}

/// Outbound response handling: credits the payable balance and reactively
/// settles on FULFILL; re-transmits the latest claim on a liquidity
/// REJECT, since the peer may simply have missed it (§4.5).
#[derive(Clone)]
pub struct OutboundSettlement<O, St, Ch, Tr, Si> {
    engine: PeerEngine<St, Ch, Tr, Si>,
    next: O,
}

impl<O, St, Ch, Tr, Si> OutboundSettlement<O, St, Ch, Tr, Si> {
    pub fn new(engine: PeerEngine<St, Ch, Tr, Si>, next: O) -> Self {
        OutboundSettlement { engine, next }
    }
}

#[async_trait]
impl<O, A, St, Ch, Tr, Si> OutgoingService<A> for OutboundSettlement<O, St, Ch, Tr, Si>
where
    O: OutgoingService<A> + Clone + Send + Sync + 'static,
    A: Account + Send + Sync + 'static,
    St: Store + 'static,
    Ch: OnChainClient + 'static,
    Tr: Transport + 'static,
    Si: ChannelSigner + 'static,
{
    async fn send_request(&mut self, request: OutgoingRequest<A>) -> IlpResult {
        let amount = request.prepare.amount() as i64;
        let result = self.next.send_request(request).await;

        match &result {
            Ok(_fulfill) => {
                {
                    let mut balances = self.engine.inner.balances.lock();
                    balances.payable += amount;
                }
                let engine = self.engine.clone();
                tokio::spawn(async move { engine.send_money(None).await });
            }
            Err(reject) if reject.code() == ErrorCode::T04_INSUFFICIENT_LIQUIDITY => {
                if let Some(claim) = self.engine.inner.outgoing.state() {
                    let engine = self.engine.clone();
                    tokio::spawn(async move { engine.transmit_claim(&claim).await });
                }
            }
            Err(_) => {}
        }

        result
    }
}
