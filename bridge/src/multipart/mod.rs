//! Multipart content transfer to and from the backends.
//!
//! Receiving exposes the parts of a response lazily and in delivery order.
//! Sending uploads named form fields plus one binary part whose declared
//! length is passed through unchanged.

mod receive;
mod send;
mod spool;

pub use receive::{MultipartBody, MultipartResponse, Part, PartStream, accept_header};
pub use send::{BinaryPart, FormField};
pub use spool::SpooledContent;

pub const DEFAULT_PART_CONTENT_TYPE: &str = "application/octet-stream";
