//! Client for the Gemini BidiGenerateContent realtime API.
//!
//! The central type is the session driver behind [`LiveSession`]: a duplex
//! connection with a managed lifecycle, automatic reconnection, gapless audio
//! playback scheduling, mid-stream interruption, and tool-call dispatch.
//!
//! ```no_run
//! use std::sync::Arc;
//! use gemini_live::{SessionCallbacks, SessionConfig, ToolRegistry};
//!
//! # struct NullSink;
//! # impl gemini_live::AudioSink for NullSink {
//! #     fn play(&mut self, _: Vec<f32>, _: u32, done: tokio::sync::oneshot::Sender<()>) {
//! #         let _ = done.send(());
//! #     }
//! #     fn stop(&mut self) {}
//! # }
//! # async fn run() {
//! let config = SessionConfig::new(std::env::var("GEMINI_API_KEY").unwrap())
//!     .with_instruction(vec!["You are a helpful interviewer.".into()]);
//! let callbacks = SessionCallbacks::new().on_message(|text| println!("{text}"));
//! let session = gemini_live::connect(
//!     config,
//!     Arc::new(ToolRegistry::new()),
//!     callbacks,
//!     Box::new(NullSink),
//! )
//! .await;
//! session.send_text_turn("Let's begin.").await;
//! # }
//! ```

pub mod audio;
pub mod client;
pub mod playback;
pub mod tools;
pub mod types;
pub mod ws;

pub use client::config::{DEFAULT_HOST, DEFAULT_MODEL, ResponseModality, SessionConfig};
pub use client::{
    Connect, LiveSession, SessionCallbacks, SessionState, TransportCmd, TransportEvent,
    TransportHandle, connect, spawn,
};
pub use playback::{AudioSegment, AudioSink, PlaybackScheduler};
pub use tools::{ToolHandler, ToolRegistry};
pub use types::{FunctionCall, FunctionDeclaration, FunctionResponse};
pub use ws::WsConnector;
