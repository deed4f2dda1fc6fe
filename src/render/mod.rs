//! Output rendering: presentation payloads, markdown tables, and JSON.

pub mod json;
pub mod markdown;
pub mod payload;
