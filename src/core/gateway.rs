//! Capability interface to the Lightning node.
//!
//! The wrap engine and the settlement session only ever talk to the node
//! through [`LightningGateway`]. The concrete gRPC adapter lives in
//! `crate::lnd`; tests script the trait directly.

use std::collections::BTreeSet;

use anyhow::Result;
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use futures_util::stream::BoxStream;

use crate::core::codec::{PaymentHash, Preimage};

/// A decoded BOLT11 payment request, as reported by the node.
#[derive(Debug, Clone)]
pub struct InnerInvoice {
    pub payment_hash: PaymentHash,
    pub destination: PublicKey,
    /// Invoice amount in millisatoshi. Zero means "any amount", which the
    /// wrap validation rejects.
    pub amount_msat: u64,
    /// Issue time, unix seconds.
    pub timestamp: i64,
    /// Declared lifetime in seconds from `timestamp`.
    pub expiry: i64,
    pub description: String,
    /// Hex-encoded description hash, empty when the invoice carries a
    /// plain description instead.
    pub description_hash: String,
    pub min_final_cltv_expiry: u64,
    /// Feature bits advertised by the invoice.
    pub features: BTreeSet<u32>,
}

impl InnerInvoice {
    pub fn has_feature(&self, bit: u32) -> bool {
        self.features.contains(&bit)
    }

    /// Absolute expiration time, unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.timestamp + self.expiry
    }
}

/// The node's estimate of what reaching a destination costs.
#[derive(Debug, Clone, Copy)]
pub struct RouteFeeEstimate {
    pub routing_fee_msat: u64,
    /// Time-lock delay in blocks.
    pub time_lock_delay: u64,
}

/// The outer hold invoice the engine asks the node to create. Its
/// payment hash is copied from the inner invoice; that identity is what
/// lets the forwarded payment's preimage settle it.
#[derive(Debug, Clone)]
pub struct HoldInvoice {
    pub memo: String,
    pub description_hash: Vec<u8>,
    pub payment_hash: PaymentHash,
    pub value_msat: u64,
    /// Required time-lock in blocks.
    pub cltv_expiry: u64,
    /// Invoice lifetime in seconds.
    pub expiry: i64,
}

/// Hold-invoice lifecycle states as reported by the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvoiceState {
    Open,
    Accepted,
    Settled,
    Canceled,
}

impl InvoiceState {
    /// Fixed display label, used only for logging.
    pub fn label(&self) -> &'static str {
        match self {
            InvoiceState::Open => "OPEN",
            InvoiceState::Accepted => "ACCEPTED",
            InvoiceState::Settled => "SETTLED",
            InvoiceState::Canceled => "CANCELED",
        }
    }
}

impl std::fmt::Display for InvoiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One update from an outgoing payment's event stream.
#[derive(Debug, Clone)]
pub enum PaymentUpdate {
    InFlight,
    Succeeded { preimage: Preimage },
    Failed { reason: String },
}

/// Lazy stream of invoice state changes, ending when the node closes the
/// subscription. Not restartable.
pub type InvoiceStateStream = BoxStream<'static, Result<InvoiceState>>;

/// Lazy stream of payment updates for a single outgoing payment.
pub type PaymentUpdateStream = BoxStream<'static, Result<PaymentUpdate>>;

#[async_trait]
pub trait LightningGateway: Send + Sync {
    /// Decodes a BOLT11 payment request.
    async fn decode_payment_request(&self, payment_request: &str) -> Result<InnerInvoice>;

    /// Asks the node what routing a payment of `amount_msat` to
    /// `destination` is expected to cost.
    async fn estimate_route_fee(
        &self,
        destination: &PublicKey,
        amount_msat: u64,
    ) -> Result<RouteFeeEstimate>;

    /// Creates a hold invoice and returns its BOLT11 payment request.
    async fn create_hold_invoice(&self, invoice: &HoldInvoice) -> Result<String>;

    /// Subscribes to state changes of the hold invoice with the given
    /// payment hash.
    async fn subscribe_invoice_state(&self, payment_hash: &PaymentHash)
        -> Result<InvoiceStateStream>;

    /// Pays a payment request, streaming updates until the payment
    /// resolves or the timeout passes.
    async fn send_payment(
        &self,
        payment_request: &str,
        fee_limit_msat: u64,
        cltv_limit: u64,
        timeout_seconds: i32,
    ) -> Result<PaymentUpdateStream>;

    /// Settles an accepted hold invoice with the preimage of its payment
    /// hash.
    async fn settle_invoice(&self, preimage: &Preimage) -> Result<()>;

    /// Cancels a hold invoice, returning any held payment to its sender.
    async fn cancel_invoice(&self, payment_hash: &PaymentHash) -> Result<()>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_state_labels() {
        assert_eq!(InvoiceState::Open.label(), "OPEN");
        assert_eq!(InvoiceState::Accepted.label(), "ACCEPTED");
        assert_eq!(InvoiceState::Settled.label(), "SETTLED");
        assert_eq!(InvoiceState::Canceled.label(), "CANCELED");
        assert_eq!(format!("{}", InvoiceState::Accepted), "ACCEPTED");
    }

    #[test]
    fn test_inner_invoice_features_and_expiry() {
        let mut invoice = testing::test_inner_invoice(1000, 1_700_000_000, 3600);
        assert!(!invoice.has_feature(30));
        invoice.features.insert(30);
        assert!(invoice.has_feature(30));
        assert_eq!(invoice.expires_at(), 1_700_003_600);
    }
}
