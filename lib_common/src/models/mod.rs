//! # Data Models
//!
//! Records that flow between the ambassador, the stores and the dispatcher.

/// The alert record and its payload decoding.
pub mod alert;

pub use alert::{Alert, AlertPayload, StoredAlert};
