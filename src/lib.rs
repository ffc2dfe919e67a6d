//! Product detail fetch service
//!
//! Accepts product links, resolves each to a short code on the upstream site,
//! waits for the detail page to be prepared, and extracts the product payload.
//! Work runs through a bounded FIFO queue with deduplication and a freshness
//! cache so the upstream is hit at most once per product per window.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
