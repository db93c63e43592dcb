pub mod config;
pub mod gateway;
pub mod models;
pub mod reconcile;
pub mod spec;
pub mod version;
