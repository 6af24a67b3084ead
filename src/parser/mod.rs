//! Email parsing: header decoding, MIME body/attachment extraction, filename patterns.

pub mod header;
pub mod mime;
pub mod pattern;
