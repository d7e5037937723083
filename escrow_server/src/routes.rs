//! Request handler definitions
//!
//! Define each route and it handler here.
//! Handlers that are more than a line or two MUST go into a separate module (see [`crate::integrations`]). Keep this
//! module neat and tidy 🙏
//!
//! A note about performance:
//! Since each worker thread processes its requests sequentially, handlers which block the current thread will cause the
//! current worker to stop processing new requests. Every handler here is async and all I/O (database, payment
//! providers) is awaited, so workers stay free to serve other requests.
//!
//! Every response body is JSON: `{ "success": true, ... }` on success, and the [`ServerError`] shape otherwise.
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use bytes::Bytes;
use escrow_engine::{
    db_types::{Amount, BookingId, EscrowId, NewBooking, NewSupplierProfile, PaymentId, Role},
    fees::FeeRate,
    traits::{BookingLedger, EscrowManagement, PaymentManagement},
    EscrowApi,
    LedgerApi,
    PaymentFlowApi,
};
use log::*;
use meg_common::is_valid_currency_code;
use payment_providers::{PaymentProviders, RawWebhook};
use serde_json::json;

use crate::{
    auth::JwtClaims,
    config::ServerOptions,
    data_objects::{
        AutoReleaseResult,
        BookingParams,
        CompleteServiceParams,
        DisputeParams,
        EscrowView,
        PaymentIntentRequest,
        RefundEscrowParams,
        ReleaseParams,
        Success,
        SupplierParams,
    },
    errors::ServerError,
    integrations::payments::{confirm_payment, create_payment_intent, execute_refund, handle_webhook},
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal requires [$($roles:expr),*]) => {
        paste::paste! { pub struct [<$name:camel Route>];}
        paste::paste! {
                impl [<$name:camel Route>] {
                #[allow(clippy::new_without_default)]
                pub fn new() -> Self { Self }
            }
        }
        paste::paste! {
            impl actix_web::dev::HttpServiceFactory for [<$name:camel Route>] {
                fn register(self, config: &mut actix_web::dev::AppService) {
                    let res = actix_web::Resource::new($path)
                        .name(stringify!($name))
                        .guard(actix_web::guard::$method())
                        .to($name)
                        .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                    actix_web::dev::HttpServiceFactory::register(res, config);
                }
            }
        }
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+) => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            $(A: $bounds,)+
            A: 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };

    ($name:ident => $method:ident $path:literal impl $($bounds:ty),+ where requires [$($roles:expr),*])  => {
        paste::paste! { pub struct [<$name:camel Route>]<A>(core::marker::PhantomData<fn() -> A>);}
        paste::paste! { impl<A> [<$name:camel Route>]<A> {
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(core::marker::PhantomData::<fn() -> A>)
            }
        }}
        paste::paste! { impl<A> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<A>
        where
            $(A: $bounds,)+
            A: 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<A>)
                    .wrap($crate::middleware::AclMiddlewareFactory::new(&[$($roles),+]));
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Check Token  ----------------------------------------------------
route!(check_token => Get "/check_token" requires [Role::User]);
/// Echoes the identity in the caller's access token. Useful for checking that a token is accepted.
pub async fn check_token(claims: JwtClaims) -> Result<HttpResponse, ServerError> {
    debug!("💻️ GET check_token for {}", claims.sub);
    Ok(HttpResponse::Ok().json(Success::new(json!({ "user_id": claims.sub, "roles": claims.roles, "exp": claims.exp }))))
}

//----------------------------------------------   Payments  ----------------------------------------------------
route!(payment_intent => Post "/payments/intent" impl PaymentManagement, EscrowManagement, BookingLedger where requires [Role::User]);
/// Opens a payment for a booking's outstanding balance.
///
/// The caller must be the booking's client. The idempotency key can be given in the body or in the `Idempotency-Key`
/// header; the body wins if both are present.
pub async fn payment_intent<B>(
    req: HttpRequest,
    claims: JwtClaims,
    body: web::Json<PaymentIntentRequest>,
    api: web::Data<PaymentFlowApi<B>>,
    providers: web::Data<PaymentProviders>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let mut request = body.into_inner();
    if request.idempotency_key.is_none() {
        request.idempotency_key = req
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
    }
    debug!("💻️ POST payment intent for booking {} by {} via {}", request.booking_id, claims.sub, request.method);
    let intent = create_payment_intent(&claims.caller(), request, api.as_ref(), providers.as_ref()).await?;
    Ok(HttpResponse::Ok().json(Success::new(intent)))
}

route!(confirm => Post "/payments/{id}/confirm" impl PaymentManagement, EscrowManagement, BookingLedger where requires [Role::User]);
pub async fn confirm<B>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<PaymentFlowApi<B>>,
    providers: web::Data<PaymentProviders>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let id = PaymentId::from(path.into_inner());
    debug!("💻️ POST confirm payment {id} by {}", claims.sub);
    let outcome = confirm_payment(&claims.caller(), &id, api.as_ref(), providers.as_ref()).await?;
    Ok(HttpResponse::Ok().json(Success::new(outcome)))
}

route!(cancel => Post "/payments/{id}/cancel" impl PaymentManagement, EscrowManagement, BookingLedger where requires [Role::User]);
pub async fn cancel<B>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<PaymentFlowApi<B>>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let id = PaymentId::from(path.into_inner());
    debug!("💻️ POST cancel payment {id} by {}", claims.sub);
    let payment = api.cancel_payment(&claims.caller(), &id).await?;
    Ok(HttpResponse::Ok().json(Success::new(json!({ "payment": payment }))))
}

//----------------------------------------------   Escrows  ----------------------------------------------------
route!(escrow => Get "/escrows/{id}" impl EscrowManagement where requires [Role::User]);
pub async fn escrow<B: EscrowManagement>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    debug!("💻️ GET escrow {id} for {}", claims.sub);
    let escrow = api.escrow_for(&claims.caller(), &id).await?;
    let payout = api.fetch_payout(&id).await?;
    let refund = api.fetch_refund_for_escrow(&id).await?;
    Ok(HttpResponse::Ok().json(Success::new(EscrowView { escrow, payout, refund })))
}

route!(complete_service => Post "/escrows/{id}/complete" impl EscrowManagement where requires [Role::User]);
/// Marks the service as delivered and opens the dispute window. An empty body uses the default window.
pub async fn complete_service<B: EscrowManagement>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<CompleteServiceParams>>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    let hours = body.and_then(|b| b.into_inner().hours);
    debug!("💻️ POST complete escrow {id} by {}", claims.sub);
    let transition = api.mark_service_completed(&claims.caller(), &id, hours).await?;
    Ok(HttpResponse::Ok().json(Success::new(transition)))
}

route!(release => Post "/escrows/{id}/release" impl EscrowManagement where requires [Role::User]);
pub async fn release<B: EscrowManagement>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<ReleaseParams>>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    let notes = body.and_then(|b| b.into_inner().notes);
    debug!("💻️ POST release escrow {id} by {}", claims.sub);
    let result = api.release(&claims.caller(), &id, notes).await?;
    Ok(HttpResponse::Ok().json(Success::new(result)))
}

route!(refund => Post "/escrows/{id}/refund" impl EscrowManagement where requires [Role::User]);
pub async fn refund<B: EscrowManagement>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: Option<web::Json<RefundEscrowParams>>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    let reason = body.and_then(|b| b.into_inner().reason);
    debug!("💻️ POST refund escrow {id} by {}", claims.sub);
    let result = api.refund(&claims.caller(), &id, reason).await?;
    Ok(HttpResponse::Ok().json(Success::new(result)))
}

route!(dispute => Post "/escrows/{id}/dispute" impl EscrowManagement where requires [Role::User]);
pub async fn dispute<B: EscrowManagement>(
    claims: JwtClaims,
    path: web::Path<String>,
    body: web::Json<DisputeParams>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    debug!("💻️ POST dispute escrow {id} by {}", claims.sub);
    let escrow = api.dispute(&claims.caller(), &id, &body.reason).await?;
    Ok(HttpResponse::Ok().json(Success::new(json!({ "escrow": escrow }))))
}

//----------------------------------------------   Admin  ----------------------------------------------------
route!(auto_release => Post "/admin/auto_release" impl EscrowManagement where requires [Role::Admin]);
/// Runs the auto-release sweep now, rather than waiting for the worker.
pub async fn auto_release<B: EscrowManagement>(
    claims: JwtClaims,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    info!("💻️ Auto-release sweep requested by {}", claims.sub);
    let released = api.process_auto_releases().await?;
    Ok(HttpResponse::Ok().json(Success::new(AutoReleaseResult { released })))
}

route!(recompute_balance => Post "/admin/bookings/{id}/recompute" impl BookingLedger where requires [Role::Admin]);
pub async fn recompute_balance<B: BookingLedger>(
    claims: JwtClaims,
    path: web::Path<String>,
    api: web::Data<LedgerApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = BookingId::from(path.into_inner());
    info!("💻️ Balance recompute for booking {id} requested by {}", claims.sub);
    let booking = api.recompute_balance(&id).await?;
    let status = booking.effective_payment_status();
    Ok(HttpResponse::Ok().json(Success::new(json!({ "booking": booking, "effective_status": status }))))
}

route!(upsert_booking => Post "/admin/bookings" impl BookingLedger where requires [Role::Admin]);
/// Creates or refreshes the booking record that payments are credited against.
pub async fn upsert_booking<B: BookingLedger>(
    body: web::Json<BookingParams>,
    api: web::Data<LedgerApi<B>>,
    options: web::Data<ServerOptions>,
) -> Result<HttpResponse, ServerError> {
    let params = body.into_inner();
    let currency = params.currency.unwrap_or_else(|| options.default_currency.clone()).to_uppercase();
    if !is_valid_currency_code(&currency) {
        return Err(ServerError::InvalidRequestBody(format!("{currency} is not a valid currency code")));
    }
    debug!("💻️ POST upsert booking {}", params.id);
    let booking = NewBooking::new(
        BookingId::from(params.id),
        params.client_id,
        params.supplier_id,
        Amount::from(params.total_amount),
    )
    .with_currency(currency);
    let booking = api.upsert_booking(booking).await?;
    Ok(HttpResponse::Ok().json(Success::new(json!({ "booking": booking }))))
}

route!(upsert_supplier => Post "/admin/suppliers" impl EscrowManagement where requires [Role::Admin]);
/// Sets a supplier's payout account and tier, and optionally a fee that overrides the tier rate.
pub async fn upsert_supplier<B: EscrowManagement>(
    body: web::Json<SupplierParams>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let params = body.into_inner();
    debug!("💻️ POST upsert supplier {} ({})", params.supplier_id, params.tier);
    let profile = NewSupplierProfile {
        supplier_id: params.supplier_id.clone(),
        user_id: params.user_id,
        tier: params.tier,
    };
    let profile = api.upsert_supplier_profile(profile).await?;
    let fee_override = match params.fee_percent {
        Some(percent) => {
            Some(api.set_fee_override(&params.supplier_id, FeeRate::from_percent(percent), params.fee_reason).await?)
        },
        None => None,
    };
    Ok(HttpResponse::Ok().json(Success::new(json!({ "supplier": profile, "fee_override": fee_override }))))
}

route!(audit_log => Get "/admin/escrows/{id}/audit" impl EscrowManagement where requires [Role::Admin]);
pub async fn audit_log<B: EscrowManagement>(
    path: web::Path<String>,
    api: web::Data<EscrowApi<B>>,
) -> Result<HttpResponse, ServerError> {
    let id = EscrowId::from(path.into_inner());
    debug!("💻️ GET audit log for escrow {id}");
    let entries = api.audit_log(&id).await?;
    Ok(HttpResponse::Ok().json(Success::new(json!({ "entries": entries }))))
}

route!(refund_execute => Post "/admin/refunds/{id}/execute" impl PaymentManagement, EscrowManagement, BookingLedger where requires [Role::Admin]);
/// Sends a pending refund to the payment provider. The refund moves to `processing` once the provider accepts it.
pub async fn refund_execute<B>(
    claims: JwtClaims,
    path: web::Path<i64>,
    escrows: web::Data<EscrowApi<B>>,
    api: web::Data<PaymentFlowApi<B>>,
    providers: web::Data<PaymentProviders>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let id = path.into_inner();
    info!("💻️ Execution of refund #{id} requested by {}", claims.sub);
    let refund = execute_refund(id, escrows.as_ref(), api.as_ref(), providers.as_ref()).await?;
    Ok(HttpResponse::Ok().json(Success::new(json!({ "refund": refund }))))
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(webhook => Post "/webhooks/{method}" impl PaymentManagement, EscrowManagement, BookingLedger);
/// Receives payment notifications from the providers.
///
/// The body is taken as raw bytes: signatures are computed over exactly what the provider sent.
pub async fn webhook<B>(
    req: HttpRequest,
    path: web::Path<String>,
    body: Bytes,
    api: web::Data<PaymentFlowApi<B>>,
    providers: web::Data<PaymentProviders>,
) -> Result<HttpResponse, ServerError>
where
    B: PaymentManagement + EscrowManagement + BookingLedger,
{
    let method = path.into_inner();
    trace!("🪝️ Received {method} webhook of {} bytes", body.len());
    let webhook = req.headers().iter().fold(RawWebhook::new(body.to_vec()), |hook, (name, value)| match value.to_str() {
        Ok(v) => hook.with_header(name.as_str(), v),
        Err(_) => hook,
    });
    let ack = handle_webhook(&method, webhook, api.as_ref(), providers.as_ref()).await?;
    Ok(HttpResponse::Ok().json(Success::new(ack)))
}
