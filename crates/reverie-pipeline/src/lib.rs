//! # reverie-pipeline
//!
//! The multi-agent analysis orchestrator:
//!
//! - **[`Pipeline`]**: the state machine — conditional generalist entry,
//!   parallel specialist fan-out, judge rating, synthesis — in batch and
//!   streaming form
//! - **[`FanIn`]**: the multiplexer merging concurrently-streaming
//!   specialists into one arrival-ordered event channel
//! - **Quality retry**: the bounded, at-most-once-per-role re-analysis hook
//!   with model escalation
//!
//! The generation capability and the persistence gateway are both passed in
//! as handles ([`Pipeline::new`]); this crate owns neither lifecycle.
//!
//! [`Pipeline`]: pipeline::Pipeline
//! [`FanIn`]: fanin::FanIn

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod fanin;
pub mod pipeline;
pub mod state;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use fanin::FanIn;
pub use pipeline::Pipeline;
pub use state::{AnalysisRequest, PipelineState};
