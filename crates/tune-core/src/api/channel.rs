//! Channel descriptors and stream URL resolution

use serde::{ Deserialize, Serialize };

use super::{ Account, ApiError };


/// The network and quality tier a channel was listed under.
#[derive( Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize )]
pub struct ChannelSource {
    /// Network key, e.g. `di`.
    pub network: String,

    /// Streamlist key, e.g. `premium_high`.
    pub streamlist: String,

    /// The streamlist is reserved for premium accounts.
    pub premium: bool,
}


/// An AudioAddict channel. Immutable once listed.
#[derive( Debug, Clone, PartialEq, Eq, Serialize, Deserialize )]
pub struct Channel {
    /// Numeric id, shared by the same channel across streamlists.
    pub id: u32,

    /// Lowercase identifier, e.g. `dub`.
    pub key: String,

    /// Human readable name.
    pub name: String,

    /// Playlist URL usable by external media players.
    #[serde( default )]
    pub playlist: String,

    #[serde( skip )]
    pub source: ChannelSource,
}


impl Channel {
    /// Creates a channel descriptor.
    pub fn new( id: u32, key: &str, name: &str, source: ChannelSource ) -> Self {
        Self {
            id,
            key: key.to_string(),
            name: name.to_string(),
            playlist: String::new(),
            source,
        }
    }
}


/// Resolves a channel to its playable stream URLs.
///
/// Implementations must return candidates in preference order and fail
/// with [`ApiError::ChannelRequiresPremium`] when the account is not
/// entitled to the channel's streamlist.
pub trait StreamResolver {
    fn stream_urls( &self, channel: &Channel, account: &Account ) -> Result<Vec<String>, ApiError>;
}
