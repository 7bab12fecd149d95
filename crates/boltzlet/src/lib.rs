//! boltzlet: HTTP job server for the Boltz structure-prediction CLI.

pub mod archive;
pub mod config;
pub mod job;
pub mod request;
pub mod results;
pub mod runner;
pub mod serializer;
pub mod service;
pub mod store;
pub mod transport;
pub mod uploads;
mod version;

pub use config::{ConfigError, Settings};
pub use job::{JobId, JobRecord, JobStatus};
pub use request::PredictionRequest;
pub use results::ArtifactLayout;
pub use runner::{ProcessOutcome, ProcessRunner, SubprocessRunner};
pub use service::{JobService, PredictionResponse, ServiceConfig};
pub use store::JobStore;
pub use uploads::UploadStore;
pub use version::{BOLTZLET_VERSION, VersionInfo};
