//! `pstingest` turns PST/OST mailbox archives into queryable SQLite stores.
//!
//! Containers are converted to MBOX by an external tool, the MBOX files are
//! streamed message by message, attachments are written to disk, and one
//! row per message (or per message attachment) lands in a record store.

pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod store;
