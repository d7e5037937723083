use std::collections::HashMap;

use cucumber::World;
use escrow_engine::{
    db_types::{EscrowId, PaymentId},
    events::EventProducers,
    fees::FeeSchedule,
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    Caller,
    EngineError,
    EscrowApi,
    LedgerApi,
    PaymentFlowApi,
    SqliteDatabase,
};
use log::*;

#[derive(Default, Debug, World)]
pub struct EscrowWorld {
    pub system: Option<EscrowSystem>,
    /// Scenario aliases for generated escrow ids
    pub escrows: HashMap<String, EscrowId>,
    pub payments: HashMap<String, PaymentId>,
    pub last_error: Option<EngineError>,
    pub last_sweep: Option<usize>,
}

#[derive(Debug)]
pub struct EscrowSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub escrows: EscrowApi<SqliteDatabase>,
    pub ledger: LedgerApi<SqliteDatabase>,
    pub payments: PaymentFlowApi<SqliteDatabase>,
}

impl EscrowSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        debug!("Created database: {url}");
        let escrows = EscrowApi::new(db.clone(), FeeSchedule::default(), EventProducers::default());
        let ledger = LedgerApi::new(db.clone());
        let payments = PaymentFlowApi::new(escrows.clone());
        Self { db_path: url, db, escrows, ledger, payments }
    }
}

impl EscrowWorld {
    pub fn system(&self) -> &EscrowSystem {
        self.system.as_ref().expect("Escrow system not initialised")
    }

    pub fn escrow_id(&self, alias: &str) -> EscrowId {
        self.escrows.get(alias).cloned().unwrap_or_else(|| panic!("No escrow called {alias}"))
    }

    pub fn payment_id(&self, alias: &str) -> PaymentId {
        self.payments.get(alias).cloned().unwrap_or_else(|| panic!("No payment called {alias}"))
    }

    pub fn record<T>(&mut self, result: Result<T, EngineError>) -> Option<T> {
        match result {
            Ok(v) => {
                self.last_error = None;
                Some(v)
            },
            Err(e) => {
                info!("🚀️ Step returned an error: {e}");
                self.last_error = Some(e);
                None
            },
        }
    }
}

/// Scenario actors. `admin` and `auto` carry admin rights; everyone else is a plain user.
pub fn caller(name: &str) -> Caller {
    match name {
        "admin" => Caller::admin(name),
        "auto" => Caller::system(name),
        _ => Caller::user(name),
    }
}
