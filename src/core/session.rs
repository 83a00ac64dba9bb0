//! Settlement session state machine.
//!
//! One session runs per outer hold invoice, detached from the request
//! that created it. It consumes the invoice's state subscription, pays
//! the inner invoice once the outer one is accepted, and settles or
//! cancels the outer invoice depending on the payment outcome. The outer
//! invoice is settled only here, and only after the forwarded payment
//! revealed its preimage.

use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use log::{debug, error, info, warn};

use crate::core::gateway::{InnerInvoice, InvoiceState, LightningGateway, PaymentUpdate};
use crate::core::policy;

/// Timeout handed to the node for the forwarded payment.
pub const FORWARD_TIMEOUT_SECS: i32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    WaitingForAcceptance,
    Forwarding,
    Settled,
    Canceled,
    /// The subscription stream ended without a resolving event.
    Abandoned,
}

impl SessionPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionPhase::Settled | SessionPhase::Canceled | SessionPhase::Abandoned
        )
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionPhase::WaitingForAcceptance => write!(f, "waiting_for_acceptance"),
            SessionPhase::Forwarding => write!(f, "forwarding"),
            SessionPhase::Settled => write!(f, "settled"),
            SessionPhase::Canceled => write!(f, "canceled"),
            SessionPhase::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Per-invoice settlement watcher. Owns everything it needs to complete
/// the swap: the decoded inner invoice, the original payment request to
/// forward, and the fee budget fixed at wrap time.
pub struct SettlementSession {
    inner: InnerInvoice,
    payment_request: String,
    fee_budget_msat: u64,
    phase: SessionPhase,
}

impl SettlementSession {
    pub fn new(inner: InnerInvoice, payment_request: String, fee_budget_msat: u64) -> Self {
        Self {
            inner,
            payment_request,
            fee_budget_msat,
            phase: SessionPhase::WaitingForAcceptance,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Consumes the invoice state subscription until a terminal outcome
    /// is issued or the stream closes. Errors on individual events are
    /// logged and skipped; the loop only ends with the stream.
    pub async fn run<G: LightningGateway>(mut self, gateway: Arc<G>) -> SessionPhase {
        let payment_hash = self.inner.payment_hash;
        let mut states = match gateway.subscribe_invoice_state(&payment_hash).await {
            Ok(states) => states,
            Err(e) => {
                error!("invoice {}: subscription failed: {:#}", payment_hash, e);
                self.phase = SessionPhase::Abandoned;
                return self.phase;
            }
        };

        while let Some(event) = states.next().await {
            match event {
                Ok(state) => {
                    if let Err(e) = self.on_invoice_state(gateway.as_ref(), state).await {
                        error!(
                            "invoice {}: error handling {} event: {:#}",
                            payment_hash, state, e
                        );
                    }
                }
                Err(e) => warn!("invoice {}: subscription error: {:#}", payment_hash, e),
            }
            if self.phase.is_terminal() {
                break;
            }
        }

        if !self.phase.is_terminal() {
            self.phase = SessionPhase::Abandoned;
        }
        info!("invoice {}: session ended {}", payment_hash, self.phase);
        self.phase
    }

    async fn on_invoice_state<G: LightningGateway>(
        &mut self,
        gateway: &G,
        state: InvoiceState,
    ) -> Result<()> {
        match state {
            // Only the first acceptance triggers forwarding.
            InvoiceState::Accepted if self.phase == SessionPhase::WaitingForAcceptance => {
                info!(
                    "invoice {}: accepted, forwarding {} msat to {}",
                    self.inner.payment_hash, self.inner.amount_msat, self.inner.destination
                );
                self.phase = SessionPhase::Forwarding;
                self.forward_and_resolve(gateway).await
            }
            other => {
                info!("invoice {}: {}", self.inner.payment_hash, other.label());
                Ok(())
            }
        }
    }

    /// Pays the inner invoice and settles or cancels the outer hold
    /// invoice on the payment's terminal outcome. The fee limit is the
    /// wrap-time budget; the cltv limit comes from a fresh estimate,
    /// since routing conditions may have shifted since wrap time.
    async fn forward_and_resolve<G: LightningGateway>(&mut self, gateway: &G) -> Result<()> {
        let estimate = gateway
            .estimate_route_fee(&self.inner.destination, self.inner.amount_msat)
            .await?;
        let cltv_limit = policy::cltv_expiry(&estimate)?;

        let mut updates = gateway
            .send_payment(
                &self.payment_request,
                self.fee_budget_msat,
                cltv_limit,
                FORWARD_TIMEOUT_SECS,
            )
            .await?;

        while let Some(update) = updates.next().await {
            match update {
                Ok(PaymentUpdate::Succeeded { preimage }) => {
                    info!(
                        "invoice {}: inner payment succeeded, settling",
                        self.inner.payment_hash
                    );
                    if let Err(e) = gateway.settle_invoice(&preimage).await {
                        // Not retried; a second settle attempt could race
                        // the node's own bookkeeping.
                        error!("invoice {}: settle failed: {:#}", self.inner.payment_hash, e);
                    }
                    self.phase = SessionPhase::Settled;
                }
                Ok(PaymentUpdate::Failed { reason }) => {
                    warn!(
                        "invoice {}: inner payment failed ({}), canceling hold invoice",
                        self.inner.payment_hash, reason
                    );
                    if let Err(e) = gateway.cancel_invoice(&self.inner.payment_hash).await {
                        // Best effort; the invoice stays visible as stuck.
                        error!("invoice {}: cancel failed: {:#}", self.inner.payment_hash, e);
                    }
                    self.phase = SessionPhase::Canceled;
                }
                Ok(PaymentUpdate::InFlight) => {
                    debug!("invoice {}: inner payment in flight", self.inner.payment_hash);
                }
                Err(e) => warn!(
                    "invoice {}: payment stream error: {:#}",
                    self.inner.payment_hash, e
                ),
            }
            if self.phase.is_terminal() {
                break;
            }
        }
        Ok(())
    }
}
