use log::*;

use crate::{
    config::ProvidersConfig,
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
    },
    HostedCheckoutProvider,
    ProviderError,
    ReferenceProvider,
};

/// The operations every payment provider supports.
///
/// Nothing here touches local state. A failed call leaves the caller free to retry or to give up.
#[allow(async_fn_in_trait)]
pub trait PaymentProvider {
    fn kind(&self) -> ProviderKind;

    /// Opens a payment with the provider.
    async fn create_payment(&self, params: CreatePaymentParams) -> Result<CreatedPayment, ProviderError>;

    /// Asks the provider for the payment's current status. `None` means the provider only reports by webhook.
    async fn confirm_payment(
        &self,
        params: ConfirmPaymentParams,
    ) -> Result<Option<ProviderPaymentStatus>, ProviderError>;

    async fn refund_payment(&self, params: RefundParams) -> Result<ProviderRefund, ProviderError>;

    /// Checks the webhook's signature over its raw body. A missing header, body or secret fails verification.
    fn verify_webhook_signature(&self, webhook: &RawWebhook) -> bool;

    fn parse_webhook(&self, webhook: &RawWebhook) -> Result<WebhookEvent, ProviderError>;
}

/// One of the configured providers.
#[derive(Clone)]
pub enum Provider {
    Reference(ReferenceProvider),
    HostedCheckout(HostedCheckoutProvider),
}

impl PaymentProvider for Provider {
    fn kind(&self) -> ProviderKind {
        match self {
            Self::Reference(p) => p.kind(),
            Self::HostedCheckout(p) => p.kind(),
        }
    }

    async fn create_payment(&self, params: CreatePaymentParams) -> Result<CreatedPayment, ProviderError> {
        match self {
            Self::Reference(p) => p.create_payment(params).await,
            Self::HostedCheckout(p) => p.create_payment(params).await,
        }
    }

    async fn confirm_payment(
        &self,
        params: ConfirmPaymentParams,
    ) -> Result<Option<ProviderPaymentStatus>, ProviderError> {
        match self {
            Self::Reference(p) => p.confirm_payment(params).await,
            Self::HostedCheckout(p) => p.confirm_payment(params).await,
        }
    }

    async fn refund_payment(&self, params: RefundParams) -> Result<ProviderRefund, ProviderError> {
        match self {
            Self::Reference(p) => p.refund_payment(params).await,
            Self::HostedCheckout(p) => p.refund_payment(params).await,
        }
    }

    fn verify_webhook_signature(&self, webhook: &RawWebhook) -> bool {
        match self {
            Self::Reference(p) => p.verify_webhook_signature(webhook),
            Self::HostedCheckout(p) => p.verify_webhook_signature(webhook),
        }
    }

    fn parse_webhook(&self, webhook: &RawWebhook) -> Result<WebhookEvent, ProviderError> {
        match self {
            Self::Reference(p) => p.parse_webhook(webhook),
            Self::HostedCheckout(p) => p.parse_webhook(webhook),
        }
    }
}

/// The set of configured providers. This is the only place a [`PaymentMethod`] is turned into a provider.
#[derive(Clone, Default)]
pub struct PaymentProviders {
    reference: Option<ReferenceProvider>,
    checkout: Option<HostedCheckoutProvider>,
}

impl PaymentProviders {
    pub fn new(reference: Option<ReferenceProvider>, checkout: Option<HostedCheckoutProvider>) -> Self {
        Self { reference, checkout }
    }

    pub fn from_config(config: ProvidersConfig) -> Result<Self, ProviderError> {
        let reference = config.reference.map(ReferenceProvider::new).transpose()?;
        let checkout = config.checkout.map(HostedCheckoutProvider::new).transpose()?;
        info!(
            "💳️ Payment providers configured. Reference: {}, hosted checkout: {}",
            reference.is_some(),
            checkout.is_some()
        );
        Ok(Self { reference, checkout })
    }

    pub fn select(&self, method: PaymentMethod) -> Result<Provider, ProviderError> {
        self.for_kind(method.provider_kind())
            .ok_or_else(|| ProviderError::NotConfigured(format!("No provider is configured for {method} payments")))
    }

    pub fn for_kind(&self, kind: ProviderKind) -> Option<Provider> {
        match kind {
            ProviderKind::Reference => self.reference.clone().map(Provider::Reference),
            ProviderKind::HostedCheckout => self.checkout.clone().map(Provider::HostedCheckout),
        }
    }
}
