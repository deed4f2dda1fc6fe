//! Internal helpers for report dates, query syntax, and serde shapes.

pub(crate) mod date;
pub(crate) mod query;
pub(crate) mod serde;
