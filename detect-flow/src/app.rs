use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::{
    client::DetectionClient,
    config::DetectConfig,
    error::Result,
    gateway::{HttpGateway, ReqwestGateway},
    profile::UserClient,
    runner::{DetectionRunner, RunnerConfig},
    storage::KeyValueStore,
    store::AppStore,
};

/// Everything a client session needs, wired once by the entry point and passed around.
#[derive(Clone)]
pub struct DetectApp {
    store: Arc<AppStore>,
    runner: DetectionRunner,
    users: UserClient,
}

impl DetectApp {
    /// Load the persisted identity from `storage` and talk to the backend over HTTP.
    pub async fn open(config: &DetectConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let gateway: Arc<dyn HttpGateway> =
            Arc::new(ReqwestGateway::new(config.base_url.clone(), config.timeout)?);
        let store = Arc::new(AppStore::load(storage).await?);
        Ok(Self::with_gateway(gateway, store, config.runner_config()))
    }

    pub fn with_gateway(
        gateway: Arc<dyn HttpGateway>,
        store: Arc<AppStore>,
        config: RunnerConfig,
    ) -> Self {
        let runner = DetectionRunner::new(DetectionClient::new(gateway.clone()), store.clone(), config);
        Self {
            store,
            runner,
            users: UserClient::new(gateway),
        }
    }

    pub fn store(&self) -> &Arc<AppStore> {
        &self.store
    }

    pub fn runner(&self) -> &DetectionRunner {
        &self.runner
    }

    pub fn users(&self) -> &UserClient {
        &self.users
    }

    /// The persisted user id, generating and persisting a fresh one on first use.
    pub async fn ensure_user_id(&self) -> Result<String> {
        let current = self.store.user_id();
        if !current.is_empty() {
            return Ok(current);
        }

        let user_id = new_user_id();
        self.store.set_user_id(user_id.clone()).await?;
        info!(user_id = %user_id, "Generated new user id");
        Ok(user_id)
    }

    /// Fetch the record list and replace the stored one. Returns how many records arrived.
    pub async fn refresh_medical_records(&self) -> Result<usize> {
        let records = self.users.medical_records(&self.store.user_id()).await?;
        let count = records.len();
        self.store.set_medical_records(records);
        Ok(count)
    }

    /// Fetch the server profile and make it the persisted `userInfo`.
    pub async fn refresh_profile(&self) -> Result<()> {
        let profile = self.users.profile(&self.store.user_id()).await?;
        self.store.set_user_info(profile).await
    }

    /// Stop any detection and wipe user data, in memory and on the device.
    pub async fn logout(&self) -> Result<()> {
        self.runner.reset();
        self.store.clear_user_data().await?;
        info!("User logged out");
        Ok(())
    }
}

/// `user_<unix millis>_<9 random chars>`.
pub fn new_user_id() -> String {
    let random = Uuid::new_v4().simple().to_string();
    format!("user_{}_{}", Utc::now().timestamp_millis(), &random[..9])
}
