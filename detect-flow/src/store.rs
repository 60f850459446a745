//! Application store: the one owner of user identity, records, report and detection status.
//!
//! State lives inside a `tokio::sync::watch` channel. Every mutation replaces or edits the
//! snapshot under the channel's write lock, so readers always see a whole snapshot and
//! subscribers are woken once per mutation.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::Result;
use crate::storage::{KeyValueStore, USER_ID_KEY, USER_INFO_KEY};
use crate::types::{DetectionStatus, MedicalRecord, Report, UserInfo};

/// Point-in-time view of everything the store owns.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    pub user_id: String,
    pub user_info: UserInfo,
    pub medical_records: Vec<MedicalRecord>,
    pub current_report: Option<Report>,
    pub detect_status: DetectionStatus,
}

pub struct AppStore {
    state: watch::Sender<StoreState>,
    storage: Arc<dyn KeyValueStore>,
}

impl AppStore {
    /// Empty store over `storage`, ignoring anything already persisted there.
    pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self { state, storage }
    }

    /// Store whose durable fields are reloaded from `storage`.
    pub async fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let user_id = match storage.get(USER_ID_KEY).await? {
            Some(Value::String(id)) => id,
            Some(other) => {
                warn!(value = %other, "Ignoring persisted userId that is not a string");
                String::new()
            }
            None => String::new(),
        };

        let user_info = match storage.get(USER_INFO_KEY).await? {
            Some(Value::Object(info)) => info,
            Some(other) => {
                warn!(value = %other, "Ignoring persisted userInfo that is not an object");
                UserInfo::new()
            }
            None => UserInfo::new(),
        };

        debug!(user_id = %user_id, "Loaded persisted user identity");
        let store = Self::new(storage);
        store.state.send_modify(|state| {
            state.user_id = user_id;
            state.user_info = user_info;
        });
        Ok(store)
    }

    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Receiver that is notified after every mutation.
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }

    pub fn detect_status(&self) -> DetectionStatus {
        self.state.borrow().detect_status
    }

    pub fn user_id(&self) -> String {
        self.state.borrow().user_id.clone()
    }

    pub fn user_info(&self) -> UserInfo {
        self.state.borrow().user_info.clone()
    }

    pub fn medical_records(&self) -> Vec<MedicalRecord> {
        self.state.borrow().medical_records.clone()
    }

    pub fn current_report(&self) -> Option<Report> {
        self.state.borrow().current_report.clone()
    }

    pub fn set_detect_status(&self, status: DetectionStatus) {
        self.state.send_if_modified(|state| {
            let changed = state.detect_status != status;
            state.detect_status = status;
            changed
        });
    }

    pub fn set_current_report(&self, report: Option<Report>) {
        self.state.send_modify(|state| state.current_report = report);
    }

    /// Replace the record list wholesale.
    pub fn set_medical_records(&self, records: Vec<MedicalRecord>) {
        self.state.send_modify(|state| state.medical_records = records);
    }

    /// Persist, then publish. A storage failure leaves the in-memory value untouched.
    pub async fn set_user_id(&self, user_id: impl Into<String>) -> Result<()> {
        let user_id = user_id.into();
        self.storage
            .set(USER_ID_KEY, Value::String(user_id.clone()))
            .await?;
        self.state.send_modify(|state| state.user_id = user_id);
        Ok(())
    }

    pub async fn set_user_info(&self, user_info: UserInfo) -> Result<()> {
        self.storage
            .set(USER_INFO_KEY, Value::Object(user_info.clone()))
            .await?;
        self.state.send_modify(|state| state.user_info = user_info);
        Ok(())
    }

    /// Drop the durable keys, then reset every entity in one step.
    ///
    /// A storage failure leaves the in-memory state untouched, so it keeps matching what a
    /// restart would load.
    pub async fn clear_user_data(&self) -> Result<()> {
        self.storage.remove(USER_ID_KEY).await?;
        self.storage.remove(USER_INFO_KEY).await?;
        self.state.send_replace(StoreState::default());
        debug!("Cleared user data");
        Ok(())
    }
}
