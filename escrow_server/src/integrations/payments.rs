//! Glue between the settlement engine and the payment providers.
//!
//! The engine never talks to a provider, and the providers never touch local state. These functions make the provider
//! call at the right point of each flow and hand the result to the engine. A failed provider call leaves local state
//! as it was.
use std::str::FromStr;

use escrow_engine::{
    db_types::{BookingId, NewPayment, Payment, PaymentId, PaymentRecordStatus, Refund, SettlementStatus},
    traits::{BookingLedger, EscrowManagement, PaymentManagement},
    Caller,
    EngineError,
    EscrowApi,
    PaymentFlowApi,
    PaymentIntent,
    PaymentOutcome,
};
use log::*;
use payment_providers::{
    ConfirmPaymentParams,
    CreatePaymentParams,
    PaymentMethod,
    PaymentProvider,
    PaymentProviders,
    ProviderError,
    ProviderKind,
    ProviderStatus,
    RawWebhook,
    RefundParams,
    WebhookEvent,
};
use serde_json::{json, Value};

use crate::{
    data_objects::{PaymentIntentRequest, PaymentIntentResponse, WebhookAck},
    errors::ServerError,
};

pub fn record_status(status: ProviderStatus) -> PaymentRecordStatus {
    match status {
        ProviderStatus::Pending => PaymentRecordStatus::Pending,
        ProviderStatus::Completed => PaymentRecordStatus::Completed,
        ProviderStatus::Failed => PaymentRecordStatus::Failed,
        ProviderStatus::Cancelled => PaymentRecordStatus::Cancelled,
        ProviderStatus::Expired => PaymentRecordStatus::Expired,
        ProviderStatus::Refunded => PaymentRecordStatus::Refunded,
    }
}

/// The method a stored payment was created with. Older records without one fall back to the provider's default.
fn payment_method(provider: &str, metadata: &Value) -> Result<PaymentMethod, ProviderError> {
    let recorded = metadata.get("method").and_then(Value::as_str).and_then(|m| m.parse::<PaymentMethod>().ok());
    match recorded {
        Some(method) => Ok(method),
        None => Ok(ProviderKind::from_str(provider)?.default_method()),
    }
}

/// Opens a payment with the provider for whatever the booking still owes.
///
/// A repeated idempotency key returns the payment it produced the first time, without calling the provider again.
pub async fn create_payment_intent<B>(
    caller: &Caller,
    request: PaymentIntentRequest,
    api: &PaymentFlowApi<B>,
    providers: &PaymentProviders,
) -> Result<PaymentIntentResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let provider = providers.select(request.method)?;
    let booking_id = BookingId::from(request.booking_id.as_str());
    let plan = match api.prepare_payment_intent(caller, &booking_id, request.idempotency_key).await? {
        PaymentIntent::Existing(payment) => return Ok(PaymentIntentResponse::new(payment, true)),
        PaymentIntent::New(plan) => plan,
    };
    let payment_id = PaymentId::random();
    let params = CreatePaymentParams {
        payment_id: payment_id.to_string(),
        method: request.method,
        amount: plan.amount,
        currency: plan.escrow.currency.clone(),
        description: format!("Payment for booking {booking_id}"),
        booking_id: booking_id.to_string(),
        payer_id: caller.user_id.clone(),
        escrow_id: Some(plan.escrow.id.to_string()),
        idempotency_key: plan.idempotency_key.clone(),
    };
    let created = provider.create_payment(params).await.map_err(|e| {
        warn!("💳️ Could not create {} payment for booking {booking_id}. {e}", request.method);
        e
    })?;
    let mut payment = NewPayment::new(provider.kind().as_str(), booking_id.clone(), caller.user_id.as_str(), plan.amount)
        .with_escrow(&plan.escrow.id)
        .with_provider_payment_id(created.provider_payment_id.clone())
        .with_currency(plan.escrow.currency.clone());
    payment.id = payment_id;
    payment.checkout_url = created.checkout_url;
    payment.idempotency_key = plan.idempotency_key;
    if let Value::Object(map) = &mut payment.metadata {
        map.insert("method".into(), json!(request.method));
        if let Some(reference) = created.reference {
            map.insert("reference".into(), Value::String(reference));
        }
        map.insert("providerData".into(), created.provider_data);
    }
    let payment = api.record_payment(payment).await?;
    debug!("💳️ Payment {} opened with {} as {}", payment.id, payment.provider, created.provider_payment_id);
    Ok(PaymentIntentResponse::new(payment, false))
}

/// Asks the provider where a payment stands and applies the answer.
///
/// A completed payment re-runs its settlement effects. Other terminal payments are returned as they are.
pub async fn confirm_payment<B>(
    caller: &Caller,
    id: &PaymentId,
    api: &PaymentFlowApi<B>,
    providers: &PaymentProviders,
) -> Result<PaymentOutcome, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let payment = api.payment_for_confirmation(caller, id).await?;
    match payment.status {
        PaymentRecordStatus::Completed => {
            return Ok(api.apply_provider_status(id, PaymentRecordStatus::Completed, None, None).await?);
        },
        status if status.is_terminal() => {
            debug!("💳️ Payment {id} is already {status}. Nothing to confirm");
            return Ok(PaymentOutcome { payment, changed: false, booking: None, escrow: None });
        },
        _ => {},
    }
    let method = payment_method(&payment.provider, &payment.metadata.0)?;
    let provider = providers.select(method)?;
    let Some(provider_payment_id) = payment.provider_payment_id.clone() else {
        return Err(EngineError::FailedPrecondition(format!("Payment {id} has no provider reference")).into());
    };
    let report = provider.confirm_payment(ConfirmPaymentParams { provider_payment_id, method }).await?;
    match report {
        None => {
            debug!("💳️ {} only reports by webhook. Payment {id} is unchanged", provider.kind());
            Ok(PaymentOutcome { payment, changed: false, booking: None, escrow: None })
        },
        Some(report) => {
            let status = record_status(report.status);
            debug!("💳️ Provider reports payment {id} as {status}");
            Ok(api.apply_provider_status(id, status, report.amount, None).await?)
        },
    }
}

/// Verifies, parses and applies a provider webhook.
///
/// The signature is checked before anything is read or written. Events for payments we do not know about, and
/// events that carry no status, are acknowledged and ignored so that the provider stops retrying them. A capture
/// reported for a payment that was already closed locally is acknowledged too, and flagged in the audit log.
pub async fn handle_webhook<B>(
    method: &str,
    webhook: RawWebhook,
    api: &PaymentFlowApi<B>,
    providers: &PaymentProviders,
) -> Result<WebhookAck, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let method = PaymentMethod::from_str(method)?;
    let provider = providers.select(method)?;
    if !provider.verify_webhook_signature(&webhook) {
        warn!("🪝️ Rejected a {method} webhook with an invalid signature");
        return Err(ServerError::SignatureError(format!("{method} webhook signature did not verify")));
    }
    let event = provider.parse_webhook(&webhook)?;
    debug!("🪝️ {} webhook {} for {} is {:?}", provider.kind(), event.event_id, event.provider_payment_id, event.kind);
    let Some(status) = event.kind.status() else {
        trace!("🪝️ Event {} carries no payment status. Ignoring", event.event_id);
        return Ok(WebhookAck::ignored());
    };
    let kind = provider.kind();
    let Some(payment) = find_webhook_payment(kind, &event, api).await? else {
        info!("🪝️ No {kind} payment matches {}. Event {} ignored", event.provider_payment_id, event.event_id);
        return Ok(WebhookAck::ignored());
    };
    let unlinked_intent = event
        .payment_intent
        .as_deref()
        .filter(|intent| payment.provider_intent_id.is_none() && payment.provider_payment_id.as_deref() != Some(*intent));
    let payment = match unlinked_intent {
        Some(intent) => api.link_provider_intent(&payment.id, intent).await?,
        None => payment,
    };
    let status = record_status(status);
    let outcome = api.apply_provider_status(&payment.id, status, event.amount, event.timestamp).await?;
    if status == PaymentRecordStatus::Completed && outcome.payment.status.is_closed_unpaid() {
        warn!(
            "🪝️ Webhook {} reports a capture for payment {}, which is {}. Flagged for reconciliation",
            event.event_id, outcome.payment.id, outcome.payment.status
        );
        return Ok(WebhookAck::flagged(outcome.payment.id.to_string()));
    }
    info!(
        "🪝️ Webhook {} applied to payment {}. Status: {}, changed: {}",
        event.event_id, outcome.payment.id, outcome.payment.status, outcome.changed
    );
    Ok(WebhookAck::processed(outcome.payment.id.to_string()))
}

/// The payment an event refers to. Events that only quote the provider's intent id are matched on that instead.
async fn find_webhook_payment<B>(
    kind: ProviderKind,
    event: &WebhookEvent,
    api: &PaymentFlowApi<B>,
) -> Result<Option<Payment>, EngineError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    if let Some(payment) = api.fetch_payment_by_provider_id(kind.as_str(), &event.provider_payment_id).await? {
        return Ok(Some(payment));
    }
    match event.payment_intent.as_deref() {
        Some(intent) => api.fetch_payment_by_provider_intent(kind.as_str(), intent).await,
        None => Ok(None),
    }
}

/// Sends a pending refund to the provider that took the original payment.
pub async fn execute_refund<B>(
    refund_id: i64,
    escrows: &EscrowApi<B>,
    api: &PaymentFlowApi<B>,
    providers: &PaymentProviders,
) -> Result<Refund, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let refund = escrows.fetch_refund(refund_id).await?;
    if refund.status != SettlementStatus::Pending {
        return Err(EngineError::FailedPrecondition(format!(
            "Refund #{refund_id} is {} and cannot be executed again",
            refund.status
        ))
        .into());
    }
    let Some(payment_id) = refund.payment_id.as_deref() else {
        return Err(EngineError::FailedPrecondition(format!("Refund #{refund_id} has no payment to refund")).into());
    };
    let payment = api.fetch_payment(&PaymentId::from(payment_id)).await?;
    let kind = ProviderKind::from_str(&payment.provider)?;
    let provider = providers
        .for_kind(kind)
        .ok_or_else(|| ProviderError::NotConfigured(format!("The {kind} provider is not configured")))?;
    let Some(provider_payment_id) = payment.provider_payment_id.clone() else {
        return Err(EngineError::FailedPrecondition(format!("Payment {} has no provider reference", payment.id)).into());
    };
    let params = RefundParams {
        provider_payment_id,
        amount: refund.amount,
        currency: refund.currency.clone(),
        reason: refund.reason.clone(),
        idempotency_key: Some(format!("refund-{refund_id}")),
    };
    let accepted = provider.refund_payment(params).await.map_err(|e| {
        warn!("💳️ {kind} did not accept refund #{refund_id}. {e}");
        e
    })?;
    info!("💳️ {kind} accepted refund #{refund_id} of {} as {}", accepted.amount, accepted.provider_refund_id);
    Ok(escrows.refund_submitted(refund_id, &accepted.provider_refund_id).await?)
}
