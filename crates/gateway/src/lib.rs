//! Gateway: OpenAI-compatible HTTP front over a pool of WebSocket clients.
//!
//! Lifecycle:
//! 1. Load config, construct [`state::GatewayState`]
//! 2. Spawn the heartbeat loop
//! 3. Bind the HTTP server (chat completions, stats, logs)
//! 4. Attach the WebSocket upgrade handler for clients
//! 5. On shutdown, cancel + join the heartbeat, detach remaining clients
//!
//! The registry/correlator pair is constructed once at startup and injected
//! into handlers through the router state; nothing here is ambient.

pub mod completions;
pub mod correlate;
pub mod decode;
pub mod dispatch;
pub mod error;
pub mod heartbeat;
pub mod logs;
pub mod rewrite;
pub mod server;
pub mod state;
pub mod ws;
