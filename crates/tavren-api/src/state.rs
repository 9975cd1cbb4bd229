use std::collections::HashMap;
use std::sync::Arc;

use sea_orm::DatabaseConnection;
use tokio::sync::{Mutex, Semaphore};
use tracing::info;

use tavren_core::agent::AgentService;
use tavren_core::consent::{
    ConsentExportService, ConsentLedgerService, ConsentValidator, LedgerJournal,
};
use tavren_core::crypto::PackageCipher;
use tavren_core::dsr::DsrService;
use tavren_core::insight::InsightProcessor;
use tavren_core::packaging::DataPackagingService;
use tavren_core::rate_limit::RateLimiter;
use tavren_core::store::memory::{MemoryAgentLogStore, MemoryPreferenceStore};
use tavren_core::store::mock_data::MockDataSource;
use tavren_core::trust::TrustService;
use tavren_db::repositories::{
    ConsentEventRepository, PackageAuditRepository, PackageRepository, PayoutRepository,
    RewardRepository, UserRepository,
};

use crate::config::ApiConfig;

/// Application state shared across all request handlers.
///
/// Keys and service wiring are fixed at startup; rotation requires a
/// restart.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<ApiConfig>,
    pub ledger: Arc<ConsentLedgerService>,
    pub validator: Arc<ConsentValidator>,
    pub export: Arc<ConsentExportService>,
    pub dsr: Arc<DsrService>,
    pub packaging: Arc<DataPackagingService>,
    pub insight: Arc<InsightProcessor>,
    pub trust: Arc<TrustService>,
    pub agent: Arc<AgentService>,
    pub preferences: Arc<MemoryPreferenceStore>,
    pub agent_log: Arc<MemoryAgentLogStore>,
    pub limiter: Arc<RateLimiter>,
    insight_slots: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

#[derive(Debug, thiserror::Error)]
pub enum AppStateError {
    #[error("Failed to establish database connection: {0}")]
    DatabaseConnection(#[from] tavren_db::DatabaseError),
}

impl AppState {
    pub async fn new(config: ApiConfig) -> Result<Self, AppStateError> {
        let db = Arc::new(
            tavren_db::connect(&config.database.url, config.database.max_connections).await?,
        );
        if !config.is_production() {
            tavren_db::schema::create_tables(&db).await?;
        }

        let consents = Arc::new(ConsentEventRepository::new(db.clone()));
        let users = Arc::new(UserRepository::new(db.clone()));
        let rewards = Arc::new(RewardRepository::new(db.clone()));
        let payouts = Arc::new(PayoutRepository::new(db.clone()));
        let packages = Arc::new(PackageRepository::new(db.clone()));
        let audits = Arc::new(PackageAuditRepository::new(db.clone()));

        let ledger = Arc::new(ConsentLedgerService::new(
            consents.clone(),
            LedgerJournal::new(&config.ledger_log_path),
        ));
        let validator = Arc::new(ConsentValidator::new(ledger.clone()));
        let export = Arc::new(ConsentExportService::new(
            ledger.clone(),
            users.clone(),
            config.secrets.export_hmac_key.as_bytes().to_vec(),
        ));
        let dsr = Arc::new(DsrService::new(
            ledger.clone(),
            export.clone(),
            users.clone(),
            rewards.clone(),
            payouts.clone(),
        ));

        let cipher = config
            .encrypt_data_packages
            .then(|| PackageCipher::from_secret(&config.secrets.data_encryption_key));
        let packaging = Arc::new(DataPackagingService::new(
            consents.clone(),
            validator.clone(),
            Arc::new(MockDataSource::new()),
            packages,
            audits,
            config.secrets.data_encryption_key.as_bytes().to_vec(),
            cipher,
        ));

        let insight = Arc::new(InsightProcessor::new(
            Some(validator.clone()),
            Some(ledger.clone()),
        ));
        let trust = Arc::new(TrustService::new(
            consents,
            config.trust.low_threshold,
            config.trust.high_threshold,
        ));

        let preferences = Arc::new(MemoryPreferenceStore::new());
        if !config.is_production() {
            // Development seed so the agent flow is exercisable out of the
            // box; production wires the real preference profile store
            preferences.set_accepted("user1", "app_usage", vec!["anonymous_short_term".into()]);
            preferences.set_accepted("user1", "location", vec!["anonymous_short_term".into()]);
        }
        let agent_log = Arc::new(MemoryAgentLogStore::new());
        let agent = Arc::new(AgentService::new(
            ledger.clone(),
            validator.clone(),
            preferences.clone(),
            agent_log.clone(),
        ));

        let limiter =
            Arc::new(RateLimiter::connect(config.redis_url.as_deref(), "rate_limit").await);
        info!(backend = limiter.backend(), "Rate limiter ready");

        Ok(Self {
            db,
            config: Arc::new(config),
            ledger,
            validator,
            export,
            dsr,
            packaging,
            insight,
            trust,
            agent,
            preferences,
            agent_log,
            limiter,
            insight_slots: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Per-user concurrency gate for heavy insight computations
    pub async fn insight_slot(&self, user_id: &str) -> Arc<Semaphore> {
        let mut slots = self.insight_slots.lock().await;
        slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.limits.insight_concurrency)))
            .clone()
    }

    /// Database liveness probe
    pub async fn database_healthy(&self) -> bool {
        use sea_orm::{ConnectionTrait, Statement};
        self.db
            .execute(Statement::from_string(
                self.db.get_database_backend(),
                "SELECT 1".to_string(),
            ))
            .await
            .is_ok()
    }
}
