//! Invoice wrap engine.
//!
//! Turns a caller-supplied payment request into a hold invoice on the
//! local node: decode, validate, compute the fee and time-lock budgets,
//! create the invoice, then hand the rest to a detached settlement
//! session. The caller gets the outer payment request as soon as the
//! invoice exists; forwarding happens only once a payer commits to it.

use std::sync::Arc;

use chrono::Utc;
use log::info;

use crate::core::codec;
use crate::core::error::WrapError;
use crate::core::gateway::{HoldInvoice, InnerInvoice, LightningGateway};
use crate::core::policy;
use crate::core::session::SettlementSession;

/// Feature bit advertising AMP support in a BOLT11 invoice.
pub const AMP_FEATURE_BIT: u32 = 30;

/// Caller input for one wrap operation.
#[derive(Debug, Clone, Default)]
pub struct WrapRequest {
    /// The inner BOLT11 payment request to wrap.
    pub payment_request: String,
    /// Optional memo override for the outer invoice.
    pub description: Option<String>,
    /// Optional description-hash override (hex), mutually exclusive with
    /// the memo override.
    pub description_hash: Option<String>,
    /// Optional total routing budget in millisatoshi, as a decimal
    /// string.
    pub routing_msat: Option<String>,
}

pub struct WrapEngine<G> {
    gateway: Arc<G>,
}

impl<G: LightningGateway + 'static> WrapEngine<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Wraps `request.payment_request` in a hold invoice and returns the
    /// outer payment request.
    ///
    /// The settlement session watching the new invoice runs detached;
    /// once the invoice exists, nothing on that path can unwind it.
    pub async fn create_wrapped_invoice(&self, request: &WrapRequest) -> Result<String, WrapError> {
        let inner = self
            .gateway
            .decode_payment_request(&request.payment_request)
            .await
            .map_err(|e| WrapError::DecodeFailed(format!("{e:#}")))?;

        let description = non_blank(&request.description);
        let description_hash = non_blank(&request.description_hash);
        validate_inner(&inner, description, description_hash)?;

        let routing_fee_msat = policy::routing_fee_msat(inner.amount_msat);
        let estimate = self
            .gateway
            .estimate_route_fee(&inner.destination, inner.amount_msat)
            .await
            .map_err(|e| WrapError::RouteEstimateFailed(format!("{e:#}")))?;
        let cltv_expiry = policy::cltv_expiry(&estimate)?;
        let fee_budget_msat = policy::fee_budget_msat(&estimate);
        let value_msat = policy::value_msat(
            &inner,
            fee_budget_msat,
            routing_fee_msat,
            non_blank(&request.routing_msat),
        )?;
        let expiry = policy::invoice_expiry(&inner, Utc::now().timestamp())?;

        let hold = HoldInvoice {
            memo: description.unwrap_or(&inner.description).to_string(),
            description_hash: codec::decode_hex(
                description_hash.unwrap_or(&inner.description_hash),
            )
            .map_err(|e| WrapError::InvoiceCreationFailed(format!("invalid description hash: {e}")))?,
            payment_hash: inner.payment_hash,
            value_msat,
            cltv_expiry,
            expiry,
        };
        // The estimate round trip took time; check the assembled invoice
        // against the same rules before committing it to the node.
        validate_assembled(&inner, &hold, Utc::now().timestamp())?;

        let outer_request = self
            .gateway
            .create_hold_invoice(&hold)
            .await
            .map_err(|e| WrapError::InvoiceCreationFailed(format!("{e:#}")))?;
        info!(
            "created hold invoice {}: {} msat, cltv {}, expires in {}s",
            inner.payment_hash, value_msat, cltv_expiry, expiry
        );

        let session = SettlementSession::new(
            inner,
            request.payment_request.clone(),
            fee_budget_msat,
        );
        tokio::spawn(session.run(Arc::clone(&self.gateway)));

        Ok(outer_request)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn validate_inner(
    inner: &InnerInvoice,
    description: Option<&str>,
    description_hash: Option<&str>,
) -> Result<(), WrapError> {
    if inner.has_feature(AMP_FEATURE_BIT) {
        return Err(WrapError::AmpNotSupported);
    }
    if description.is_some() && description_hash.is_some() {
        return Err(WrapError::ConflictingDescription);
    }
    if inner.amount_msat == 0 {
        return Err(WrapError::MissingAmount);
    }
    Ok(())
}

fn validate_assembled(
    inner: &InnerInvoice,
    hold: &HoldInvoice,
    now: i64,
) -> Result<(), WrapError> {
    policy::check_expiration(inner, now)?;
    if !hold.memo.trim().is_empty() && !hold.description_hash.is_empty() {
        return Err(WrapError::ConflictingDescription);
    }
    if inner.has_feature(AMP_FEATURE_BIT) {
        return Err(WrapError::AmpNotSupported);
    }
    if inner.amount_msat == 0 {
        return Err(WrapError::MissingAmount);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::testing::{test_inner_invoice, ScriptedGateway};
    use crate::core::gateway::RouteFeeEstimate;
    use chrono::Utc;

    fn fresh_inner(amount_msat: u64) -> crate::core::gateway::InnerInvoice {
        test_inner_invoice(amount_msat, Utc::now().timestamp(), 3_600)
    }

    fn engine(gateway: ScriptedGateway) -> (WrapEngine<ScriptedGateway>, Arc<ScriptedGateway>) {
        let gateway = Arc::new(gateway);
        (WrapEngine::new(Arc::clone(&gateway)), gateway)
    }

    fn request() -> WrapRequest {
        WrapRequest {
            payment_request: "lnbc1innerinvoice".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_wrap_returns_outer_payment_request() {
        let inner = fresh_inner(100_000);
        let (engine, gateway) = engine(ScriptedGateway::new(Some(inner.clone())));

        let outer = engine.create_wrapped_invoice(&request()).await.unwrap();

        assert_eq!(outer, "lnbc1outerinvoice");
        let created = gateway.created.lock().unwrap();
        assert_eq!(created.len(), 1);
        // The payment hash is the identity tying both invoices together.
        assert_eq!(created[0].payment_hash, inner.payment_hash);
        // estimate (50 msat, 100 blocks): routing fee 1100, budget 1125
        assert_eq!(created[0].value_msat, 102_225);
        assert_eq!(created[0].cltv_expiry, 200);
        assert_eq!(created[0].memo, "coffee");
        assert!(created[0].description_hash.is_empty());
        // 3600s lifetime minus the 300s buffer, give or take scheduling
        assert!(created[0].expiry > 3_200 && created[0].expiry <= 3_300);
    }

    #[tokio::test]
    async fn test_wrap_applies_description_override() {
        let (engine, gateway) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let request = WrapRequest {
            description: Some("  proxied  ".to_string()),
            ..request()
        };

        engine.create_wrapped_invoice(&request).await.unwrap();

        assert_eq!(gateway.created.lock().unwrap()[0].memo, "proxied");
    }

    #[tokio::test]
    async fn test_wrap_applies_description_hash_override() {
        let mut inner = fresh_inner(100_000);
        inner.description = String::new();
        let (engine, gateway) = engine(ScriptedGateway::new(Some(inner)));
        let request = WrapRequest {
            description_hash: Some("ab".repeat(32)),
            ..request()
        };

        engine.create_wrapped_invoice(&request).await.unwrap();

        let created = gateway.created.lock().unwrap();
        assert_eq!(created[0].description_hash, vec![0xab; 32]);
        assert!(created[0].memo.is_empty());
    }

    #[tokio::test]
    async fn test_wrap_rejects_amp_invoice() {
        let mut inner = fresh_inner(100_000);
        inner.features.insert(AMP_FEATURE_BIT);
        let (engine, gateway) = engine(ScriptedGateway::new(Some(inner)));

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert_eq!(err, WrapError::AmpNotSupported);
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_rejects_conflicting_overrides() {
        let (engine, gateway) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let request = WrapRequest {
            description: Some("memo".to_string()),
            description_hash: Some("ab".repeat(32)),
            ..request()
        };

        let err = engine.create_wrapped_invoice(&request).await.unwrap_err();

        assert_eq!(err, WrapError::ConflictingDescription);
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_treats_blank_overrides_as_absent() {
        let (engine, _) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let request = WrapRequest {
            description: Some("   ".to_string()),
            description_hash: Some(String::new()),
            routing_msat: Some("".to_string()),
            ..request()
        };

        assert!(engine.create_wrapped_invoice(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_wrap_rejects_zero_amount() {
        let (engine, _) = engine(ScriptedGateway::new(Some(fresh_inner(0))));

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert_eq!(err, WrapError::MissingAmount);
    }

    #[tokio::test]
    async fn test_wrap_maps_decode_failure() {
        let (engine, _) = engine(ScriptedGateway::new(None));

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert!(matches!(err, WrapError::DecodeFailed(_)));
    }

    #[tokio::test]
    async fn test_wrap_maps_estimate_failure() {
        let mut gateway = ScriptedGateway::new(Some(fresh_inner(100_000)));
        gateway.estimate = None;
        let (engine, gateway) = engine(gateway);

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert!(matches!(err, WrapError::RouteEstimateFailed(_)));
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_rejects_excessive_time_lock() {
        let mut gateway = ScriptedGateway::new(Some(fresh_inner(100_000)));
        gateway.estimate = Some(RouteFeeEstimate {
            routing_fee_msat: 50,
            time_lock_delay: 2_000,
        });
        let (engine, _) = engine(gateway);

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert_eq!(err, WrapError::CltvTooHigh(2_084));
    }

    #[tokio::test]
    async fn test_wrap_rejects_low_routing_budget() {
        let (engine, gateway) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let request = WrapRequest {
            routing_msat: Some("100".to_string()),
            ..request()
        };

        let err = engine.create_wrapped_invoice(&request).await.unwrap_err();

        assert_eq!(err, WrapError::RoutingBudgetTooLow(100));
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_honors_routing_budget_override() {
        let (engine, gateway) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let request = WrapRequest {
            // routing fee for 100_000 msat is 1100; budget replaces the
            // computed margins: 100_000 - 1100 + 5000
            routing_msat: Some("5000".to_string()),
            ..request()
        };

        engine.create_wrapped_invoice(&request).await.unwrap();

        assert_eq!(gateway.created.lock().unwrap()[0].value_msat, 103_900);
    }

    #[tokio::test]
    async fn test_wrap_rejects_nearly_expired_invoice() {
        let inner = test_inner_invoice(100_000, Utc::now().timestamp(), 60);
        let (engine, gateway) = engine(ScriptedGateway::new(Some(inner)));

        let err = engine.create_wrapped_invoice(&request()).await.unwrap_err();

        assert_eq!(err, WrapError::ExpirationTooClose);
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_rejects_bad_description_hash_override() {
        let (engine, gateway) = engine(ScriptedGateway::new(Some(fresh_inner(100_000))));
        let mut bad = request();
        bad.description_hash = Some("zz".to_string());
        // the memo override must be absent for the conflict check to pass
        let err = engine.create_wrapped_invoice(&bad).await.unwrap_err();

        assert!(matches!(err, WrapError::InvoiceCreationFailed(_)));
        assert!(gateway.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrap_detects_conflict_with_inner_description_hash() {
        // Inner invoice carries a description hash; a memo override then
        // produces an invoice with both fields set.
        let mut inner = fresh_inner(100_000);
        inner.description = String::new();
        inner.description_hash = "cd".repeat(32);
        let (engine, gateway) = engine(ScriptedGateway::new(Some(inner)));
        let request = WrapRequest {
            description: Some("memo".to_string()),
            ..request()
        };

        let err = engine.create_wrapped_invoice(&request).await.unwrap_err();

        assert_eq!(err, WrapError::ConflictingDescription);
        assert!(gateway.created.lock().unwrap().is_empty());
    }
}
