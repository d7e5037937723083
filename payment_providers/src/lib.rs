//! Clients for the payment providers the gateway settles through.
//!
//! Each provider implements [`PaymentProvider`]. [`PaymentProviders`] holds the configured providers and maps a
//! [`PaymentMethod`] onto one of them.
mod config;
mod data_objects;
mod error;
mod helpers;
mod hosted_checkout;
mod http;
mod provider;
mod reference;

pub mod signature;

pub use config::{CheckoutConfig, ProvidersConfig, ReferenceConfig, DEFAULT_PROVIDER_TIMEOUT};
pub use data_objects::{
    ConfirmPaymentParams,
    CreatePaymentParams,
    CreatedPayment,
    PaymentMethod,
    ProviderKind,
    ProviderPaymentStatus,
    ProviderRefund,
    ProviderStatus,
    RawWebhook,
    RefundParams,
    WebhookEvent,
    WebhookEventKind,
};
pub use error::ProviderError;
pub use helpers::map_reference_status;
pub use hosted_checkout::{checkout_event_kind, HostedCheckoutProvider, CHECKOUT_SIGNATURE_HEADER};
pub use provider::{PaymentProvider, PaymentProviders, Provider};
pub use reference::{ReferenceProvider, ReferenceWebhook, REFERENCE_SIGNATURE_HEADER};
