//! JSON-RPC tool server over line-delimited stdio.
//!
//! - **rpc**: request/response envelopes
//! - **schema**: the generic input/output schema validator
//! - **tools**: the fixed tool catalogue
//! - **handler**: typed tool implementations
//! - **dispatch**: the read-line/write-line loop and `tools/call` contract
//! - **workers**: batch processor, health monitor, TTL scheduler
//! - **federation**: allowlisted `ext.` tool relay

mod dispatch;
mod federation;
mod handler;
mod rpc;
mod schema;
mod tools;
mod workers;

pub use dispatch::MembriaServer;
pub use federation::{ExternalTool, ExternalToolRegistry};
pub use handler::ToolHandler;
pub use rpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use schema::validate;
pub use tools::{tool_definitions, ToolDef};
pub use workers::{
    run_ttl_sweep, BackgroundWorkers, ExtractedDecision, KeywordExtractor, SignalExtractor,
    WorkerIntervals,
};
