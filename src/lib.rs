pub mod config;
pub mod error;
pub mod events;
pub mod handlers;
pub mod service;
pub mod telemetry;

pub use activitymq_client as client;
pub use config::Config;
pub use error::{ActivityError, Result};
pub use service::ActivityService;
