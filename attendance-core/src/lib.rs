mod client;
mod models;
pub mod timestamp;

pub use client::{ApiErrorClass, CloudClient, CloudError};
pub use models::{
    BatchWriteResponse, DayStatus, ModelError, Permission, RemoteEntry, Share, Tracker,
    TrackerType,
};
