//! courier-interchange: shared wire types for the request dispatch subsystem.
//!
//! Everything that crosses a process boundary lives here: the
//! [`StoreUpdate`] instructions that are forwarded to the reactive store,
//! the [`Request`] envelope that is sent to the server (and persisted to the
//! write log), and the [`Response`] shape the server answers with.
//!
//! The JSON shapes are wire-compatible with the existing API
//! (`{"jsonCode": 200, "onyxData": [...], ...}`), so field names are
//! camelCase even though the Rust names are not.

pub mod error;
pub mod request;
pub mod response;
pub mod update;

pub use error::EnvelopeError;
pub use request::{Request, RequestType, StoreData};
pub use response::{json_code, Response};
pub use update::StoreUpdate;
