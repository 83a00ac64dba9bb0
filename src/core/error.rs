/// Failure kinds of the synchronous wrap operation. Every variant aborts
/// the wrap; none is retried. The `Display` messages are stable and are
/// surfaced to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WrapError {
    /// The node could not decode the caller's payment request.
    DecodeFailed(String),
    /// The inner invoice advertises AMP; a multi-part invoice cannot be
    /// tied to a single hold invoice.
    AmpNotSupported,
    /// Both a description and a description hash were supplied.
    ConflictingDescription,
    /// The inner invoice has no amount.
    MissingAmount,
    /// The node could not produce a route fee estimate.
    RouteEstimateFailed(String),
    /// The estimated time-lock budget exceeds the policy maximum.
    CltvTooHigh(u64),
    /// The outer invoice value wrapped around.
    ValueOverflow,
    /// The caller's routing budget does not cover the fee plus the
    /// minimum margin.
    RoutingBudgetTooLow(u64),
    /// Too little of the inner invoice's lifetime remains.
    ExpirationTooClose,
    /// The node refused to create the hold invoice.
    InvoiceCreationFailed(String),
}

impl std::fmt::Display for WrapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DecodeFailed(e) => write!(f, "failed to decode payment request: {}", e),
            Self::AmpNotSupported => write!(f, "cannot wrap AMP invoice"),
            Self::ConflictingDescription => {
                write!(f, "cannot set both description and description hash")
            }
            Self::MissingAmount => write!(f, "invoice must have a value"),
            Self::RouteEstimateFailed(e) => write!(f, "failed to estimate route fee: {}", e),
            Self::CltvTooHigh(cltv) => {
                write!(f, "cltv expiry too high from estimate of routing fees: {}", cltv)
            }
            Self::ValueOverflow => write!(f, "value too low from estimate of routing fees"),
            Self::RoutingBudgetTooLow(msat) => write!(f, "routing fee budget too low: {}", msat),
            Self::ExpirationTooClose => write!(f, "payment request expiration is too close"),
            Self::InvoiceCreationFailed(e) => write!(f, "failed to create hold invoice: {}", e),
        }
    }
}

impl std::error::Error for WrapError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_messages() {
        assert_eq!(format!("{}", WrapError::AmpNotSupported), "cannot wrap AMP invoice");
        assert_eq!(format!("{}", WrapError::MissingAmount), "invoice must have a value");
        assert_eq!(
            format!("{}", WrapError::ExpirationTooClose),
            "payment request expiration is too close"
        );
        assert_eq!(
            format!("{}", WrapError::RoutingBudgetTooLow(100)),
            "routing fee budget too low: 100"
        );
        assert_eq!(
            format!("{}", WrapError::CltvTooHigh(2084)),
            "cltv expiry too high from estimate of routing fees: 2084"
        );
    }
}
