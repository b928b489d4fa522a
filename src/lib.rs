//! Bulk CSV import pipeline for land-registry style datasets.
//!
//! Uploaded files move through a staged lifecycle: upload, rule-driven
//! validation, batched asynchronous processing into a downstream sink.
//! The HTTP surface lives in [`web`], the stage logic in [`pipeline`],
//! job bookkeeping in [`registry`] and [`services`].

pub mod config;
pub mod database;
pub mod errors;
pub mod events;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod services;
pub mod storage;
pub mod web;

pub use config::Config;
pub use database::Database;
pub use errors::{AppError, AppResult};
