pub mod config;
pub mod error;
pub mod marketplace_client;
pub mod schedule_store;
pub mod wire;
