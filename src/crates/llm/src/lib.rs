//! Chat-completion adapter for the deepcurrent research engine.
//!
//! The agents talk to a language model through exactly one operation: a
//! single-shot system+user chat call, optionally JSON-forced
//! ([`ChatClient::chat`]). This crate provides that trait, an
//! implementation for OpenAI-compatible endpoints
//! ([`OpenAiCompatClient`]), and the salvage pipeline that turns messy
//! model replies into usable JSON ([`extract::parse_json_response`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatClient, ChatOptions, LlmConfig, OpenAiCompatClient};
//!
//! let config = LlmConfig::from_env(
//!     "LLM_API_KEY",
//!     "https://dashscope.aliyuncs.com/compatible-mode/v1",
//!     "qwen-max",
//! )?;
//! let client = OpenAiCompatClient::new(config)?;
//!
//! let reply = client
//!     .chat("You are a research planner.", "Plan a study of EV markets.", &ChatOptions::default())
//!     .await?;
//! let parsed = llm::extract::parse_json_response(&reply);
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod extract;

pub use client::{ChatClient, ChatOptions, OpenAiCompatClient};
pub use config::LlmConfig;
pub use error::{LlmError, Result};
