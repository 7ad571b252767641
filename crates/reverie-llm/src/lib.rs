//! # reverie-llm
//!
//! The opaque text-generation capability the pipeline runs against, and its
//! concrete backends:
//!
//! - **Trait**: [`generator::TextGenerator`] — single-shot [`generate`] and
//!   lazy [`generate_stream`], both taking a [`generator::GenerateRequest`]
//! - **Errors**: [`generator::GenerateError`] — transport, API, payload,
//!   and timeout failures
//! - **Catalog**: [`models`] — the known-model table ordered weakest to
//!   strongest, which doubles as the quality-retry escalation ladder
//! - **Backend**: [`ollama::OllamaClient`] — reqwest against a local Ollama
//!   instance, NDJSON token streaming
//! - **Test support**: [`testutil::StubGenerator`] — scriptable replies and
//!   a recorded call log
//!
//! The capability handle is passed explicitly into the orchestrator; there
//! is no lazily-constructed process-wide client.
//!
//! [`generate`]: generator::TextGenerator::generate
//! [`generate_stream`]: generator::TextGenerator::generate_stream

#![deny(unsafe_code)]

pub mod generator;
pub mod models;
pub mod ollama;
pub mod testutil;
