//! The hosted-checkout provider. The payer is redirected to a checkout page and the result arrives by webhook.
use chrono::{DateTime, Utc};
use log::*;
use meg_common::Amount;
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Method,
    RequestBuilder,
};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    config::CheckoutConfig,
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
    http::ApiClient,
    signature::{verify_timestamped, DEFAULT_SIGNATURE_TOLERANCE_SECS},
    PaymentProvider,
    ProviderError,
};

pub const CHECKOUT_SIGNATURE_HEADER: &str = "hosted-checkout-signature";

#[derive(Clone)]
pub struct HostedCheckoutProvider {
    config: CheckoutConfig,
    api: ApiClient,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutSession {
    id: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    payment_intent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RefundResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    amount: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    created: Option<i64>,
    data: CheckoutEventData,
}

#[derive(Debug, Clone, Deserialize)]
struct CheckoutEventData {
    object: Value,
}

impl HostedCheckoutProvider {
    pub fn new(config: CheckoutConfig) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::with_capacity(1);
        let auth = format!("Bearer {}", config.secret_key.reveal());
        let mut auth =
            HeaderValue::from_str(&auth).map_err(|e| ProviderError::Initialization(format!("Invalid secret key. {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        let api = ApiClient::new(&config.api_url, headers, config.timeout)?;
        Ok(Self { config, api })
    }

    fn session_form(&self, params: &CreatePaymentParams) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), self.config.success_url.clone()),
            ("cancel_url".to_string(), self.config.cancel_url.clone()),
            ("client_reference_id".to_string(), params.payment_id.clone()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("line_items[0][price_data][currency]".to_string(), params.currency.to_ascii_lowercase()),
            ("line_items[0][price_data][unit_amount]".to_string(), params.amount.value().to_string()),
            ("line_items[0][price_data][product_data][name]".to_string(), params.description.clone()),
            ("metadata[paymentId]".to_string(), params.payment_id.clone()),
            ("metadata[bookingId]".to_string(), params.booking_id.clone()),
            ("metadata[payerId]".to_string(), params.payer_id.clone()),
            ("payment_intent_data[metadata][paymentId]".to_string(), params.payment_id.clone()),
        ];
        if let Some(escrow_id) = &params.escrow_id {
            form.push(("metadata[escrowId]".to_string(), escrow_id.clone()));
        }
        form
    }

    fn post_form(&self, path: &str, form: &[(String, String)], idempotency_key: Option<&str>) -> RequestBuilder {
        let req = self.api.request(Method::POST, path).form(form);
        match idempotency_key {
            Some(key) => req.header("Idempotency-Key", key),
            None => req,
        }
    }
}

impl PaymentProvider for HostedCheckoutProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::HostedCheckout
    }

    async fn create_payment(&self, params: CreatePaymentParams) -> Result<CreatedPayment, ProviderError> {
        if params.method != PaymentMethod::HostedCheckout {
            return Err(ProviderError::Unsupported("Bank reference and instant payments"));
        }
        let form = self.session_form(&params);
        let req = self.post_form("/v1/checkout/sessions", &form, params.idempotency_key.as_deref());
        let raw: Value = self.api.execute(req).await?;
        let session: CheckoutSession =
            serde_json::from_value(raw.clone()).map_err(|e| ProviderError::JsonError(e.to_string()))?;
        info!("💳️ Checkout session {} created for payment {}", session.id, params.payment_id);
        Ok(CreatedPayment { provider_payment_id: session.id, checkout_url: session.url, reference: None, provider_data: raw })
    }

    /// Checkout sessions report their outcome by webhook only.
    async fn confirm_payment(
        &self,
        params: ConfirmPaymentParams,
    ) -> Result<Option<ProviderPaymentStatus>, ProviderError> {
        trace!("💳️ Checkout session {} can only be confirmed by webhook", params.provider_payment_id);
        Ok(None)
    }

    async fn refund_payment(&self, params: RefundParams) -> Result<ProviderRefund, ProviderError> {
        let path = format!("/v1/checkout/sessions/{}", params.provider_payment_id);
        let session: CheckoutSession = self.api.execute(self.api.request(Method::GET, &path)).await?;
        let Some(payment_intent) = session.payment_intent else {
            return Err(ProviderError::Unsupported("Refunding a checkout session that was never paid"));
        };
        let mut form = vec![
            ("payment_intent".to_string(), payment_intent.clone()),
            ("amount".to_string(), params.amount.value().to_string()),
            ("reason".to_string(), "requested_by_customer".to_string()),
        ];
        if let Some(reason) = &params.reason {
            form.push(("metadata[reason]".to_string(), reason.clone()));
        }
        let req = self.post_form("/v1/refunds", &form, params.idempotency_key.as_deref());
        let refund: RefundResponse = self.api.execute(req).await?;
        info!("💳️ Refund {} requested for checkout session {} ({payment_intent})", refund.id, session.id);
        Ok(ProviderRefund {
            provider_refund_id: refund.id,
            status: refund.status.unwrap_or_else(|| "pending".to_string()),
            amount: refund.amount.map(Amount::from).unwrap_or(params.amount),
        })
    }

    fn verify_webhook_signature(&self, webhook: &RawWebhook) -> bool {
        if webhook.body.is_empty() {
            return false;
        }
        let Some(header) = webhook.header(CHECKOUT_SIGNATURE_HEADER) else {
            debug!("💳️ Checkout webhook has no {CHECKOUT_SIGNATURE_HEADER} header");
            return false;
        };
        verify_timestamped(
            self.config.webhook_secret.reveal(),
            &webhook.body,
            header,
            Utc::now(),
            DEFAULT_SIGNATURE_TOLERANCE_SECS,
        )
    }

    fn parse_webhook(&self, webhook: &RawWebhook) -> Result<WebhookEvent, ProviderError> {
        let event: CheckoutEvent =
            serde_json::from_slice(&webhook.body).map_err(|e| ProviderError::MalformedWebhook(e.to_string()))?;
        let object = &event.data.object;
        let kind = checkout_event_kind(&event.event_type, object);
        let payment_intent = str_field(object, "payment_intent");
        let provider_payment_id = match kind {
            // Refunds are reported against the charge. The charge only knows its payment intent, not the session.
            WebhookEventKind::Refunded => payment_intent.clone(),
            _ => str_field(object, "id"),
        }
        .ok_or_else(|| ProviderError::MalformedWebhook(format!("{} event has no payment id", event.event_type)))?;
        let amount = object
            .get("amount_total")
            .or_else(|| object.get("amount_refunded"))
            .and_then(Value::as_i64)
            .map(Amount::from);
        Ok(WebhookEvent {
            kind,
            event_id: event.id,
            provider_payment_id,
            payment_intent,
            reference: str_field(object, "client_reference_id"),
            amount,
            currency: str_field(object, "currency").map(|c| c.to_ascii_uppercase()),
            timestamp: event.created.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        })
    }
}

fn str_field(object: &Value, name: &str) -> Option<String> {
    object.get(name).and_then(Value::as_str).map(String::from)
}

/// Maps a checkout event type onto the events we act on.
pub fn checkout_event_kind(event_type: &str, object: &Value) -> WebhookEventKind {
    match event_type {
        "checkout.session.completed" => match object.get("payment_status").and_then(Value::as_str) {
            Some("paid") | Some("no_payment_required") => WebhookEventKind::Completed,
            // Delayed payment methods complete later with an async_payment_succeeded event
            _ => WebhookEventKind::Pending,
        },
        "checkout.session.async_payment_succeeded" => WebhookEventKind::Completed,
        "checkout.session.async_payment_failed" => WebhookEventKind::Failed,
        "checkout.session.expired" => WebhookEventKind::Expired,
        "charge.refunded" => WebhookEventKind::Refunded,
        other => WebhookEventKind::Other(other.to_string()),
    }
}
