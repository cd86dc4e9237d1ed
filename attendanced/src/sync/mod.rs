pub mod backoff;
pub mod conflict;
pub mod connectivity;
pub mod engine;
pub mod entry;
pub mod error;
pub mod permission;
pub mod queue;
pub mod remote;
pub mod store;
