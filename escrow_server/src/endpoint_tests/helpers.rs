use std::time::Duration;

use actix_web::{
    body::{to_bytes, MessageBody},
    http::StatusCode,
    test,
    test::TestRequest,
    web,
    web::ServiceConfig,
    App,
    HttpResponse,
};
use escrow_engine::db_types::Role;
use log::debug;
use meg_common::Secret;
use payment_providers::{CheckoutConfig, HostedCheckoutProvider, PaymentProviders, ReferenceConfig, ReferenceProvider};
use serde_json::Value;

use crate::{
    auth::{TokenIssuer, TokenValidator, ACCESS_TOKEN_HEADER},
    config::AuthConfig,
    middleware::JwtMiddlewareFactory,
    server::{json_config, path_config},
};

pub const REFERENCE_API_KEY: &str = "reference_api_key";
pub const REFERENCE_WEBHOOK_SECRET: &str = "reference_webhook_secret";
pub const CHECKOUT_WEBHOOK_SECRET: &str = "whsec_endpoint_tests";

// Creates a test `AuthConfig` for issuing tokens. DO NOT re-use this secret anywhere.
pub fn get_auth_config() -> AuthConfig {
    AuthConfig { jwt_secret: Secret::new("endpoint-tests-only-secret-1f0c9a77d2e4b8".to_string()) }
}

pub fn issue_token(user_id: &str, roles: Vec<Role>) -> String {
    TokenIssuer::new(&get_auth_config()).issue_token(user_id, roles, None).expect("Failed to sign token")
}

pub fn user_token(user_id: &str) -> String {
    issue_token(user_id, vec![Role::User])
}

pub fn admin_token(user_id: &str) -> String {
    issue_token(user_id, vec![Role::User, Role::Admin])
}

fn reference_provider(api_url: &str) -> ReferenceProvider {
    let config = ReferenceConfig {
        api_url: api_url.to_string(),
        api_key: Secret::new(REFERENCE_API_KEY.to_string()),
        webhook_secret: Secret::new(REFERENCE_WEBHOOK_SECRET.to_string()),
        callback_url: None,
        timeout: Duration::from_secs(5),
    };
    ReferenceProvider::new(config).expect("Could not create reference provider")
}

/// Providers where the reference provider talks to `api_url` (usually a wiremock server).
pub fn reference_providers(api_url: &str) -> PaymentProviders {
    PaymentProviders::new(Some(reference_provider(api_url)), None)
}

/// Both providers configured, talking to `api_url`.
pub fn all_providers(api_url: &str) -> PaymentProviders {
    let config = CheckoutConfig {
        api_url: api_url.to_string(),
        secret_key: Secret::new("sk_endpoint_tests".to_string()),
        webhook_secret: Secret::new(CHECKOUT_WEBHOOK_SECRET.to_string()),
        success_url: "https://app.example.com/paid".to_string(),
        cancel_url: "https://app.example.com/cancelled".to_string(),
        timeout: Duration::from_secs(5),
    };
    let checkout = HostedCheckoutProvider::new(config).expect("Could not create checkout provider");
    PaymentProviders::new(Some(reference_provider(api_url)), Some(checkout))
}

pub fn get(path: &str) -> TestRequest {
    TestRequest::get().uri(path)
}

pub fn post(path: &str) -> TestRequest {
    TestRequest::post().uri(path)
}

pub fn with_token(req: TestRequest, token: &str) -> TestRequest {
    if token.is_empty() {
        req
    } else {
        req.insert_header((ACCESS_TOKEN_HEADER, token))
    }
}

/// Sends `req` to the routes in `configure`, mounted under an authenticated `/api` scope.
///
/// Errors raised by middleware are rendered the same way the server renders them, so every call yields a status and
/// a JSON body.
pub async fn api_request<F>(req: TestRequest, configure: F) -> (StatusCode, Value)
where F: FnOnce(&mut ServiceConfig) {
    let validator = TokenValidator::new(&get_auth_config());
    let app = App::new()
        .app_data(json_config())
        .app_data(path_config())
        .service(web::scope("/api").wrap(JwtMiddlewareFactory::new(validator)).configure(configure));
    let service = test::init_service(app).await;
    debug!("Making request");
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => read_response(res.into_parts().1).await,
        Err(e) => read_response(e.error_response()).await,
    }
}

/// Sends `req` to the routes in `configure` with no authentication layer, as the webhook route is served.
pub async fn open_request<F>(req: TestRequest, configure: F) -> (StatusCode, Value)
where F: FnOnce(&mut ServiceConfig) {
    let app = App::new().app_data(json_config()).app_data(path_config()).configure(configure);
    let service = test::init_service(app).await;
    match test::try_call_service(&service, req.to_request()).await {
        Ok(res) => read_response(res.into_parts().1).await,
        Err(e) => read_response(e.error_response()).await,
    }
}

async fn read_response<B: MessageBody>(res: HttpResponse<B>) -> (StatusCode, Value) {
    let status = res.status();
    let bytes = to_bytes(res.into_body()).await.ok().expect("Could not read response body");
    let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()));
    (status, body)
}
