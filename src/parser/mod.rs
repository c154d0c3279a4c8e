//! Mailbox parsing: streaming MBOX framing, header decoding, and the MIME
//! capabilities the extractor works against.

pub mod header;
pub mod mbox;
pub mod mime;
