use std::time::Duration;

use actix_web::{
    dev::Server,
    error::{JsonPayloadError, PathError},
    http::KeepAlive,
    middleware::Logger,
    web,
    App,
    HttpRequest,
    HttpServer,
};
use escrow_engine::{EscrowApi, LedgerApi, PaymentFlowApi, SqliteDatabase};
use log::*;
use payment_providers::PaymentProviders;

use crate::{
    auth::TokenValidator,
    auto_release_worker::start_auto_release_worker,
    config::{ServerConfig, ServerOptions},
    errors::ServerError,
    integrations::notifications::create_notification_handlers,
    middleware::JwtMiddlewareFactory,
    routes::{
        health,
        AuditLogRoute,
        AutoReleaseRoute,
        CancelRoute,
        CheckTokenRoute,
        CompleteServiceRoute,
        ConfirmRoute,
        DisputeRoute,
        EscrowRoute,
        PaymentIntentRoute,
        RecomputeBalanceRoute,
        RefundExecuteRoute,
        RefundRoute,
        ReleaseRoute,
        UpsertBookingRoute,
        UpsertSupplierRoute,
        WebhookRoute,
    },
};

const DB_MAX_CONNECTIONS: u32 = 25;

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, DB_MAX_CONNECTIONS)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    db.migrate().await.map_err(|e| ServerError::InitializeError(format!("Could not migrate the database. {e}")))?;
    let handlers = create_notification_handlers(config.notification_url.clone())?;
    let producers = handlers.producers();
    handlers.start_handlers().await;
    let escrow_api = EscrowApi::new(db.clone(), config.fees.clone(), producers)
        .with_auto_release_hours(config.auto_release_hours);
    let providers = PaymentProviders::from_config(config.providers.clone())?;
    // The worker runs for the life of the process
    let _worker = start_auto_release_worker(escrow_api.clone(), config.auto_release_interval);
    let srv = create_server_instance(config, escrow_api, providers)?;
    srv.await.map_err(|e| ServerError::BackendError(e.to_string()))
}

pub fn create_server_instance(
    config: ServerConfig,
    escrow_api: EscrowApi<SqliteDatabase>,
    providers: PaymentProviders,
) -> Result<Server, ServerError> {
    let options = ServerOptions::from_config(&config);
    let srv = HttpServer::new(move || {
        let ledger_api = LedgerApi::new(escrow_api.db().clone());
        let payments_api = PaymentFlowApi::new(escrow_api.clone());
        let app = App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("meg::access_log"))
            .app_data(json_config())
            .app_data(path_config())
            .app_data(web::Data::new(escrow_api.clone()))
            .app_data(web::Data::new(ledger_api))
            .app_data(web::Data::new(payments_api))
            .app_data(web::Data::new(providers.clone()))
            .app_data(web::Data::new(options.clone()));
        // Routes that require authentication
        let auth_scope = web::scope("/api")
            .wrap(JwtMiddlewareFactory::new(TokenValidator::new(&config.auth)))
            .service(CheckTokenRoute::new())
            .service(PaymentIntentRoute::<SqliteDatabase>::new())
            .service(ConfirmRoute::<SqliteDatabase>::new())
            .service(CancelRoute::<SqliteDatabase>::new())
            .service(EscrowRoute::<SqliteDatabase>::new())
            .service(CompleteServiceRoute::<SqliteDatabase>::new())
            .service(ReleaseRoute::<SqliteDatabase>::new())
            .service(RefundRoute::<SqliteDatabase>::new())
            .service(DisputeRoute::<SqliteDatabase>::new())
            .service(AutoReleaseRoute::<SqliteDatabase>::new())
            .service(RecomputeBalanceRoute::<SqliteDatabase>::new())
            .service(UpsertBookingRoute::<SqliteDatabase>::new())
            .service(UpsertSupplierRoute::<SqliteDatabase>::new())
            .service(AuditLogRoute::<SqliteDatabase>::new())
            .service(RefundExecuteRoute::<SqliteDatabase>::new());
        app.service(health).service(auth_scope).service(WebhookRoute::<SqliteDatabase>::new())
    })
    .keep_alive(KeepAlive::Timeout(Duration::from_secs(600)))
    .bind((config.host.as_str(), config.port))?
    .run();
    Ok(srv)
}

/// Request bodies that fail to deserialize get the same JSON error shape as every other failure.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        debug!("💻️ Rejected request body. {err}");
        ServerError::InvalidRequestBody(err.to_string()).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err: PathError, _req: &HttpRequest| {
        debug!("💻️ Rejected request path. {err}");
        ServerError::InvalidRequestPath(err.to_string()).into()
    })
}
