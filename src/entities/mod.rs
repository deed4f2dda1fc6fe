//! Request filters, query plans, and the analytical entry points built on them.

pub mod adverse_event;
pub mod filter;
pub mod query;
