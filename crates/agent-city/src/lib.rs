//! Agent City: a developer and the residents negotiate where a new housing
//! block goes on a generated city map.
//!
//! This crate plugs concrete collaborators into `negotiation-kernel`:
//! - LLM-backed oracle and city builder over an OpenAI-compatible API
//! - Offline heuristic oracle and seeded procedural city builder
//! - Console rendering and JSON run records

pub mod chat_client;
pub mod city;
pub mod heuristic;
pub mod llm_oracle;
pub mod render;
pub mod results;
