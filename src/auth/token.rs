//! Access tokens, request options, and persisted token records.

pub mod access;
pub mod family;
pub mod options;
pub mod record;
pub mod secret;
