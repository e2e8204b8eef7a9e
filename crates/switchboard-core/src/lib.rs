//! Switchboard Core - data model, runtime events, errors, retry/timeout

pub mod error;
pub mod event;
pub mod retry;
pub mod types;

pub use error::{Error, ErrorCode, Result};
pub use event::RuntimeEvent;
pub use types::*;
