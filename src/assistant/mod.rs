//! Assistant service integration.
//!
//! - `client`: REST calls (files, conversations, responses, downloads)
//! - `wire`: request types and the tagged response decoder
//! - `budget`: context-window estimate and message clipping
//! - `profile`: assistant profile documents
//! - `gateway`: the end-to-end submission workflow

pub mod budget;
pub mod client;
pub mod gateway;
pub mod profile;
pub mod wire;

pub use client::ServiceClient;
pub use gateway::{
    AssistantApi, Conversation, DownloadedFile, Gateway, GatewaySettings, SubmitOutcome,
    SubmitRequest,
};
pub use profile::{AssistantProfile, BuiltinTool, Sampling, ToolSpec};
