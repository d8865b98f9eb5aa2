//! `mailqueue-core` — the email task model and its wire contract.
//!
//! This crate has no IO. It defines what a queued email looks like, how it is
//! validated, and how it is encoded into (and decoded from) a queue entry.

pub mod data;
pub mod error;
pub mod id;
pub mod task;

pub use data::{TemplateData, TemplateValue, sanitize_template_data};
pub use error::{DecodeError, ValidationError};
pub use id::RequestId;
pub use task::{EmailTask, MAX_SUBJECT_LEN, MAX_TEMPLATE_NAME_LEN};
