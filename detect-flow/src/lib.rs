pub mod app;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod profile;
pub mod runner;
pub mod storage;
pub mod store;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use app::DetectApp;
pub use client::DetectionClient;
pub use config::DetectConfig;
pub use error::{DetectError, Result};
pub use gateway::{HttpGateway, ReqwestGateway};
pub use profile::UserClient;
pub use runner::{DetectionRunner, PollOutcome, RunnerConfig};
pub use storage::{FileKeyValueStore, InMemoryKeyValueStore, KeyValueStore};
pub use store::{AppStore, StoreState};
pub use types::{
    DetectPhase, DetectionStatus, ImageType, JobAck, MedicalRecord, Report, UserInfo,
};
