//! AudioAddict HTTP API client
//!
//! Authentication, channel listings, stream URL resolution, track history
//! and server time. Network presets live in an immutable [`NetworkTable`]
//! that is handed to the [`ApiClient`] once at start-up.

mod account;
mod channel;
mod client;
mod network;
mod track;

use thiserror::Error;

pub use account::Account;
pub use channel::{ Channel, ChannelSource, StreamResolver };
pub use client::{ ApiClient, PingInfo, DEFAULT_API_BASE_URL };
pub use network::{ Encoding, Network, NetworkTable, Streamlist };
pub use track::{ Track, Tracklist };


/// Errors returned by the API client.
#[derive( Debug, Error )]
pub enum ApiError {
    #[error( "HTTP request failed: {0}" )]
    Http( #[from] reqwest::Error ),

    #[error( "invalid credentials" )]
    InvalidCredentials,

    #[error( "can't authenticate to server (status {0})" )]
    CantAuthenticate( u16 ),

    #[error( "channel requires a premium account" )]
    ChannelRequiresPremium,

    #[error( "not found: {0}" )]
    NotFound( String ),

    #[error( "unexpected response status {status} from {url}" )]
    Status { status: u16, url: String },

    #[error( "no tracklist found" )]
    NoTracklist,

    #[error( "streamlist not available: {0}" )]
    StreamlistNotAvailable( String ),

    #[error( "unknown network: {0}" )]
    UnknownNetwork( String ),

    #[error( "invalid server time: {0}" )]
    InvalidTime( #[from] chrono::ParseError ),
}
