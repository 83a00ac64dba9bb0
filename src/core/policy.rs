//! Fee and expiry budget policy.
//!
//! Pure arithmetic over the decoded inner invoice, the node's route fee
//! estimate and the caller's optional routing budget. All policy
//! parameters are fixed constants; millisatoshi math runs in `u64` with
//! ppm products widened to `u128`, and additions that model money are
//! checked.

use crate::core::error::WrapError;
use crate::core::gateway::{InnerInvoice, RouteFeeEstimate};

/// Base routing fee charged by the proxy, 1 sat.
pub const ROUTING_FEE_BASE_MSAT: u64 = 1_000;
/// Proportional routing fee charged by the proxy.
pub const ROUTING_FEE_PPM: u64 = 1_000;
/// Minimum margin a caller-supplied routing budget must leave on top of
/// the proxy's routing fee.
pub const MIN_FEE_BUDGET_MSAT: u64 = 1_000;
/// Slack subtracted from the inner invoice's remaining lifetime, 5 min.
pub const EXPIRY_BUFFER_SECS: i64 = 300;
/// Blocks added to the estimated time-lock delay for the outer invoice.
pub const CLTV_DELTA_ALPHA: u64 = 42;
/// Blocks added on top of the alpha delta for the forward leg.
pub const CLTV_DELTA_BETA: u64 = 42;
/// Upper bound on the outer invoice's time-lock requirement.
pub const MAX_CLTV_EXPIRY: u64 = 1_800;
/// Lower bound the time-lock requirement is raised to.
pub const MIN_CLTV_EXPIRY: u64 = 200;
/// Flat margin added to the node's fee estimate, 1 sat.
pub const ROUTING_BUDGET_ALPHA: u64 = 1_000;
/// Proportional margin added to the node's fee estimate.
pub const ROUTING_BUDGET_BETA_PPM: u64 = 1_500_000;
/// Cap on the declared inner expiry, 7 days.
pub const MAX_EXPIRY_SECS: i64 = 604_800;

fn apply_ppm(base_msat: u64, ppm: u64) -> u64 {
    (base_msat as u128 * ppm as u128 / 1_000_000) as u64
}

/// The proxy's own routing fee for an inner amount: base plus ppm share,
/// truncating.
pub fn routing_fee_msat(amount_msat: u64) -> u64 {
    ROUTING_FEE_BASE_MSAT + apply_ppm(amount_msat, ROUTING_FEE_PPM)
}

/// Time-lock requirement for the outer invoice. Fails above
/// [`MAX_CLTV_EXPIRY`]; values below [`MIN_CLTV_EXPIRY`] are raised, never
/// rejected.
pub fn cltv_expiry(estimate: &RouteFeeEstimate) -> Result<u64, WrapError> {
    let cltv = estimate.time_lock_delay + CLTV_DELTA_ALPHA + CLTV_DELTA_BETA;
    if cltv > MAX_CLTV_EXPIRY {
        return Err(WrapError::CltvTooHigh(cltv));
    }
    Ok(cltv.max(MIN_CLTV_EXPIRY))
}

/// Fee budget reserved for paying the inner invoice: the node's estimate
/// plus flat and proportional margins.
pub fn fee_budget_msat(estimate: &RouteFeeEstimate) -> u64 {
    estimate.routing_fee_msat
        + ROUTING_BUDGET_ALPHA
        + apply_ppm(estimate.routing_fee_msat, ROUTING_BUDGET_BETA_PPM)
}

/// Value of the outer invoice.
///
/// Without a caller override this is the inner amount plus the fee budget
/// plus the proxy's routing fee. A caller override names the *total*
/// budget the payer accepts on top of the inner amount; it must cover the
/// routing fee plus [`MIN_FEE_BUDGET_MSAT`], and replaces the computed
/// margins. An override that does not parse as a non-negative integer is
/// rejected the same way as one that is too small.
pub fn value_msat(
    inner: &InnerInvoice,
    fee_budget_msat: u64,
    routing_fee_msat: u64,
    caller_routing_msat: Option<&str>,
) -> Result<u64, WrapError> {
    let Some(raw) = caller_routing_msat else {
        return inner
            .amount_msat
            .checked_add(fee_budget_msat)
            .and_then(|v| v.checked_add(routing_fee_msat))
            .ok_or(WrapError::ValueOverflow);
    };

    let caller_msat: u64 = raw
        .trim()
        .parse()
        .map_err(|_| WrapError::RoutingBudgetTooLow(0))?;
    if caller_msat < MIN_FEE_BUDGET_MSAT + routing_fee_msat {
        return Err(WrapError::RoutingBudgetTooLow(caller_msat));
    }
    // caller_msat covers routing_fee_msat, so the margin is non-negative.
    inner
        .amount_msat
        .checked_add(caller_msat - routing_fee_msat)
        .ok_or(WrapError::ValueOverflow)
}

/// Fails when less than [`EXPIRY_BUFFER_SECS`] of the inner invoice's
/// lifetime remains at `now`.
pub fn check_expiration(inner: &InnerInvoice, now: i64) -> Result<(), WrapError> {
    if inner.expires_at() < now + EXPIRY_BUFFER_SECS {
        return Err(WrapError::ExpirationTooClose);
    }
    Ok(())
}

/// Lifetime of the outer invoice in seconds: the inner invoice's
/// remaining life (its declared expiry capped at [`MAX_EXPIRY_SECS`])
/// minus the safety buffer. The outer invoice never outlives the inner
/// one.
pub fn invoice_expiry(inner: &InnerInvoice, now: i64) -> Result<i64, WrapError> {
    check_expiration(inner, now)?;
    let expiry = inner.expiry.min(MAX_EXPIRY_SECS);
    Ok(inner.timestamp + expiry - now - EXPIRY_BUFFER_SECS)
}
