//! Tune Core - internet radio playback
//!
//! This crate provides the AudioAddict API client, the playback session
//! actor that coordinates a media engine, the streaming engine itself,
//! the drift clock and slash command parsing.

pub mod api;
pub mod clock;
pub mod command;
pub mod decoder;
pub mod engine;
pub mod icy;
pub mod output;
pub mod session;
pub mod stream;

pub use api::{ Account, ApiClient, ApiError, Channel, Network, NetworkTable, StreamResolver, Streamlist, Track };
pub use clock::DriftClock;
pub use command::{ Command, CommandError };
pub use engine::{ EngineError, EngineEvent, EventSink, MediaEngine, MediaHandle };
pub use session::{ Session, SessionError, SessionLock, SessionState, Step };
pub use stream::StreamEngine;
