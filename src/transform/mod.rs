//! Pure transforms: name normalization and aggregation of backend counts.

pub mod aggregate;
pub mod drug_name;
