//! Inspection review protocol: envelopes and dispatch.
//!
//! # Message Flow
//!
//! ```text
//! Inspector          Hub                          Review Client
//!    |                 |                                |
//!    |-- GET /tasks -->|                                |
//!    |                 |==== 1: {host,target,...} ====>|  broadcast
//!    |                 |                                |-- fetch report.xml
//!    |                 |                                |-- transduce + assets
//!    |                 |<=== 2: {host,target,...} =====|  review result
//!    |                 |==== 2: (re-broadcast) =======>|
//! ```
//!
//! ## Known Protocol Ids
//!
//! | Id | Name             | `data`                                        |
//! |----|------------------|-----------------------------------------------|
//! | 1  | Inspection ready | `{host, target, model, version}` or a string  |
//! | 2  | Review result    | object (result or echo `{msg}`) or a string   |
//!
//! Any other id is accepted on the wire and reported as unhandled by the
//! [`ProtocolRouter`], so unknown extensions never tear a connection down.

mod message;
mod router;

pub use message::{Envelope, InspectionReport, ECHO_SUFFIX};
pub use router::{DispatchOutcome, Inbound, Outbox, ProtocolRouter};

/// Inspection-ready notification
pub const INSPECTION_READY: i64 = 1;

/// Review result / echo reply
pub const REVIEW_RESULT: i64 = 2;
