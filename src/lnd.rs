//! LND-backed implementation of the gateway interface.
//!
//! Thin glue between the core value objects and LND's gRPC services.
//! Each call dials its own authenticated channel, so concurrent sessions
//! never contend on a shared handle.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bitcoin::secp256k1::PublicKey;
use fedimint_tonic_lnd::invoicesrpc::{
    AddHoldInvoiceRequest, CancelInvoiceMsg, SettleInvoiceMsg, SubscribeSingleInvoiceRequest,
};
use fedimint_tonic_lnd::lnrpc::{self, PayReqString};
use fedimint_tonic_lnd::routerrpc::{RouteFeeRequest, SendPaymentRequest};
use fedimint_tonic_lnd::Client;
use futures_util::StreamExt;

use crate::config::AppConfig;
use crate::core::codec::{PaymentHash, Preimage};
use crate::core::gateway::{
    HoldInvoice, InnerInvoice, InvoiceState, InvoiceStateStream, LightningGateway, PaymentUpdate,
    PaymentUpdateStream, RouteFeeEstimate,
};

#[derive(Clone)]
pub struct LndGateway {
    grpc_address: String,
    tls_cert_path: String,
    macaroon_path: String,
}

impl LndGateway {
    /// Dials the configured LND node once to validate the endpoint and
    /// credentials, then keeps only the connection parameters. Every RPC
    /// call opens its own channel.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let gateway = Self {
            grpc_address: config.lnd_grpc_address.clone(),
            tls_cert_path: config.lnd_tls_cert_path.clone(),
            macaroon_path: config.lnd_macaroon_path.clone(),
        };
        gateway.create_client().await?;
        Ok(gateway)
    }

    async fn create_client(&self) -> Result<Client> {
        fedimint_tonic_lnd::connect(
            self.grpc_address.clone(),
            self.tls_cert_path.clone(),
            self.macaroon_path.clone(),
        )
        .await
        .with_context(|| format!("connecting to lnd at {}", self.grpc_address))
    }
}

#[async_trait]
impl LightningGateway for LndGateway {
    async fn decode_payment_request(&self, payment_request: &str) -> Result<InnerInvoice> {
        let mut client = self.create_client().await?;
        let response = client
            .lightning()
            .decode_pay_req(PayReqString {
                pay_req: payment_request.to_string(),
            })
            .await
            .with_context(|| "calling DecodePayReq")?;
        invoice_from_pay_req(response.into_inner())
    }

    async fn estimate_route_fee(
        &self,
        destination: &PublicKey,
        amount_msat: u64,
    ) -> Result<RouteFeeEstimate> {
        let mut client = self.create_client().await?;
        let response = client
            .router()
            .estimate_route_fee(RouteFeeRequest {
                dest: destination.serialize().to_vec(),
                amt_sat: (amount_msat / 1_000) as i64,
                ..Default::default()
            })
            .await
            .with_context(|| "calling EstimateRouteFee")?;
        let estimate = response.into_inner();
        Ok(RouteFeeEstimate {
            routing_fee_msat: u64::try_from(estimate.routing_fee_msat)
                .context("negative routing fee estimate")?,
            time_lock_delay: u64::try_from(estimate.time_lock_delay)
                .context("negative time lock delay")?,
        })
    }

    async fn create_hold_invoice(&self, invoice: &HoldInvoice) -> Result<String> {
        let mut client = self.create_client().await?;
        let response = client
            .invoices()
            .add_hold_invoice(AddHoldInvoiceRequest {
                memo: invoice.memo.clone(),
                hash: invoice.payment_hash.to_vec(),
                value_msat: i64::try_from(invoice.value_msat)
                    .context("invoice value exceeds i64 range")?,
                description_hash: invoice.description_hash.clone(),
                expiry: invoice.expiry,
                cltv_expiry: invoice.cltv_expiry,
                ..Default::default()
            })
            .await
            .with_context(|| "calling AddHoldInvoice")?;
        Ok(response.into_inner().payment_request)
    }

    async fn subscribe_invoice_state(
        &self,
        payment_hash: &PaymentHash,
    ) -> Result<InvoiceStateStream> {
        let mut client = self.create_client().await?;
        let stream = client
            .invoices()
            .subscribe_single_invoice(SubscribeSingleInvoiceRequest {
                r_hash: payment_hash.to_vec(),
            })
            .await
            .with_context(|| "calling SubscribeSingleInvoice")?
            .into_inner();
        Ok(stream
            .map(|item| {
                item.context("invoice subscription transport error")
                    .and_then(|invoice| invoice_state_from_proto(invoice.state))
            })
            .boxed())
    }

    async fn send_payment(
        &self,
        payment_request: &str,
        fee_limit_msat: u64,
        cltv_limit: u64,
        timeout_seconds: i32,
    ) -> Result<PaymentUpdateStream> {
        let mut client = self.create_client().await?;
        let stream = client
            .router()
            .send_payment_v2(SendPaymentRequest {
                payment_request: payment_request.to_string(),
                fee_limit_msat: i64::try_from(fee_limit_msat)
                    .context("fee limit exceeds i64 range")?,
                cltv_limit: i32::try_from(cltv_limit).context("cltv limit exceeds i32 range")?,
                timeout_seconds,
                ..Default::default()
            })
            .await
            .with_context(|| "calling SendPaymentV2")?
            .into_inner();
        Ok(stream
            .map(|item| {
                item.context("payment stream transport error")
                    .and_then(payment_update_from_proto)
            })
            .boxed())
    }

    async fn settle_invoice(&self, preimage: &Preimage) -> Result<()> {
        let mut client = self.create_client().await?;
        client
            .invoices()
            .settle_invoice(SettleInvoiceMsg {
                preimage: preimage.to_vec(),
            })
            .await
            .with_context(|| "calling SettleInvoice")?;
        Ok(())
    }

    async fn cancel_invoice(&self, payment_hash: &PaymentHash) -> Result<()> {
        let mut client = self.create_client().await?;
        client
            .invoices()
            .cancel_invoice(CancelInvoiceMsg {
                payment_hash: payment_hash.to_vec(),
            })
            .await
            .with_context(|| "calling CancelInvoice")?;
        Ok(())
    }
}

fn invoice_from_pay_req(pay_req: lnrpc::PayReq) -> Result<InnerInvoice> {
    let payment_hash =
        PaymentHash::from_hex(&pay_req.payment_hash).context("decoding payment hash")?;
    let destination = pay_req
        .destination
        .parse::<PublicKey>()
        .with_context(|| format!("decoding destination key {}", pay_req.destination))?;
    Ok(InnerInvoice {
        payment_hash,
        destination,
        amount_msat: u64::try_from(pay_req.num_msat).context("negative invoice amount")?,
        timestamp: pay_req.timestamp,
        expiry: pay_req.expiry,
        description: pay_req.description,
        description_hash: pay_req.description_hash,
        min_final_cltv_expiry: u64::try_from(pay_req.cltv_expiry)
            .context("negative final cltv delta")?,
        features: pay_req.features.keys().copied().collect(),
    })
}

fn invoice_state_from_proto(state: i32) -> Result<InvoiceState> {
    use lnrpc::invoice::InvoiceState as Proto;
    match Proto::try_from(state) {
        Ok(Proto::Open) => Ok(InvoiceState::Open),
        Ok(Proto::Settled) => Ok(InvoiceState::Settled),
        Ok(Proto::Canceled) => Ok(InvoiceState::Canceled),
        Ok(Proto::Accepted) => Ok(InvoiceState::Accepted),
        Err(_) => bail!("unknown invoice state {state}"),
    }
}

fn payment_update_from_proto(payment: lnrpc::Payment) -> Result<PaymentUpdate> {
    use lnrpc::payment::PaymentStatus;
    match PaymentStatus::try_from(payment.status) {
        Ok(PaymentStatus::Succeeded) => {
            let preimage = Preimage::from_hex(&payment.payment_preimage)
                .context("decoding payment preimage")?;
            Ok(PaymentUpdate::Succeeded { preimage })
        }
        Ok(PaymentStatus::Failed) => {
            let reason = lnrpc::PaymentFailureReason::try_from(payment.failure_reason)
                .map(|r| format!("{r:?}"))
                .unwrap_or_else(|_| format!("failure reason {}", payment.failure_reason));
            Ok(PaymentUpdate::Failed { reason })
        }
        _ => Ok(PaymentUpdate::InFlight),
    }
}
