//! Pitwall Library
//!
//! Cached access to the OpenF1 API, session navigation, and JSON/CSV export.
//! The binary in `main.rs` is a thin command layer over these modules.

pub mod cache;
pub mod cli;
pub mod data;
pub mod export;
pub mod logging;
pub mod navigation;
