//! Core data model types: addresses and stored email records.

pub mod address;
pub mod record;
