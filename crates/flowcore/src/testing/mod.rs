//! In-process doubles for the gateway and the language model.
//!
//! Used by this crate's tests and by downstream crates that drive the
//! engine without a live messaging platform.

mod recorder;
mod scripted;

pub use recorder::{RecordingGateway, Sent};
pub use scripted::{LlmCall, ScriptedLlm};
