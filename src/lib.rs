//! Scan Processing Pipeline
//!
//! Watches a synchronized record store for newly uploaded scans, runs text
//! recognition, classification and face detection on each image
//! concurrently, and writes formatted results and a client-visible status
//! back into the record.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod routes;
pub mod services;
pub mod store;
