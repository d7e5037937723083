//! The bank-reference and instant-payment provider.
//!
//! Bank-reference payments hand the payer a reference to quote on a transfer. Instant payments go through the
//! provider's payment gateway. Both report back by signed webhook and can also be polled.
use chrono::{DateTime, Utc};
use log::*;
use meg_common::Amount;
use reqwest::{
    header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE},
    Method,
    RequestBuilder,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    config::ReferenceConfig,
    data_objects::{
        ConfirmPaymentParams,
        CreatePaymentParams,
        CreatedPayment,
        PaymentMethod,
        ProviderKind,
        ProviderPaymentStatus,
        ProviderRefund,
        RawWebhook,
        RefundParams,
        WebhookEvent,
        WebhookEventKind,
    },
    helpers::map_reference_status,
    http::ApiClient,
    signature::verify_hex,
    PaymentProvider,
    ProviderError,
};

pub const REFERENCE_SIGNATURE_HEADER: &str = "reference-signature";

#[derive(Clone)]
pub struct ReferenceProvider {
    config: ReferenceConfig,
    api: ApiClient,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentResponse {
    id: String,
    #[serde(default)]
    reference: Option<String>,
    #[serde(default, alias = "checkoutUrl")]
    payment_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

/// The webhook body sent by the reference provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceWebhook {
    pub event_id: String,
    pub payment_id: String,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ReferenceProvider {
    pub fn new(config: ReferenceConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::with_capacity(2);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let api = ApiClient::new(&config.api_url, headers, config.timeout)?;
        Ok(Self { config, api })
    }

    fn authed(&self, method: Method, path: &str) -> RequestBuilder {
        self.api.request(method, path).basic_auth(self.config.api_key.reveal(), None::<&str>)
    }

    fn payment_path(method: PaymentMethod, provider_payment_id: Option<&str>) -> String {
        let base = match method {
            PaymentMethod::Instant => "/opg/v1/payments",
            _ => "/references",
        };
        match provider_payment_id {
            Some(id) => format!("{base}/{id}"),
            None => base.to_string(),
        }
    }
}

impl PaymentProvider for ReferenceProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Reference
    }

    async fn create_payment(&self, params: CreatePaymentParams) -> Result<CreatedPayment, ProviderError> {
        if params.method == PaymentMethod::HostedCheckout {
            return Err(ProviderError::Unsupported("Hosted checkout"));
        }
        let body = json!({
            "amount": params.amount.value(),
            "currency": params.currency,
            "merchantReference": params.payment_id,
            "description": params.description,
            "customerId": params.payer_id,
            "callbackUrl": self.config.callback_url,
            "metadata": {
                "bookingId": params.booking_id,
                "escrowId": params.escrow_id,
                "paymentId": params.payment_id,
            },
        });
        let path = Self::payment_path(params.method, None);
        debug!("💳️ Creating {} payment {} for {}", params.method, params.payment_id, params.amount);
        let raw: Value = self.api.execute(self.authed(Method::POST, &path).json(&body)).await?;
        let response: PaymentResponse =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderError::JsonError(e.to_string()))?;
        info!("💳️ Reference provider created payment {} for {}", response.id, params.payment_id);
        Ok(CreatedPayment {
            provider_payment_id: response.id,
            checkout_url: response.payment_url,
            reference: response.reference,
            provider_data: raw,
        })
    }

    async fn confirm_payment(
        &self,
        params: ConfirmPaymentParams,
    ) -> Result<Option<ProviderPaymentStatus>, ProviderError> {
        let path = Self::payment_path(params.method, Some(&params.provider_payment_id));
        let response: StatusResponse = self.api.execute(self.authed(Method::GET, &path)).await?;
        let status = map_reference_status(&response.status);
        debug!("💳️ Payment {} is '{}' at the provider ({status:?})", params.provider_payment_id, response.status);
        Ok(Some(ProviderPaymentStatus { status, amount: response.amount.map(Amount::from) }))
    }

    async fn refund_payment(&self, params: RefundParams) -> Result<ProviderRefund, ProviderError> {
        let path = format!("/opg/v1/payments/{}/refunds", params.provider_payment_id);
        let body = json!({
            "amount": params.amount.value(),
            "currency": params.currency,
            "reason": params.reason,
        });
        let mut req = self.authed(Method::POST, &path).json(&body);
        if let Some(key) = &params.idempotency_key {
            req = req.header("Idempotency-Key", key);
        }
        let response: RefundResponse = self.api.execute(req).await?;
        info!("💳️ Refund {} requested for payment {}", response.id, params.provider_payment_id);
        Ok(ProviderRefund {
            provider_refund_id: response.id,
            status: response.status.unwrap_or_else(|| "pending".to_string()),
            amount: response.amount.map(Amount::from).unwrap_or(params.amount),
        })
    }

    fn verify_webhook_signature(&self, webhook: &RawWebhook) -> bool {
        if webhook.body.is_empty() {
            return false;
        }
        let Some(signature) = webhook.header(REFERENCE_SIGNATURE_HEADER) else {
            debug!("💳️ Reference webhook has no {REFERENCE_SIGNATURE_HEADER} header");
            return false;
        };
        verify_hex(self.config.webhook_secret.reveal(), &webhook.body, signature)
    }

    fn parse_webhook(&self, webhook: &RawWebhook) -> Result<WebhookEvent, ProviderError> {
        let payload: ReferenceWebhook =
            serde_json::from_slice(&webhook.body).map_err(|e| ProviderError::MalformedWebhook(e.to_string()))?;
        if payload.payment_id.is_empty() {
            return Err(ProviderError::MalformedWebhook("paymentId is empty".into()));
        }
        let kind = WebhookEventKind::from(map_reference_status(&payload.status));
        Ok(WebhookEvent {
            kind,
            event_id: payload.event_id,
            provider_payment_id: payload.payment_id,
            payment_intent: None,
            reference: payload.reference,
            amount: payload.amount.map(Amount::from),
            currency: payload.currency,
            timestamp: payload.timestamp,
        })
    }
}
