//! Network presets
//!
//! A network (di.fm, RadioTunes) is a provider endpoint plus the set of
//! streamlists (quality tiers) it offers.

use std::fmt;

use super::ApiError;


/// Audio encoding used by a streamlist.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Encoding {
    Aac,
    Mp3,
    Wma,
}


impl fmt::Display for Encoding {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            Encoding::Aac => "AAC",
            Encoding::Mp3 => "MP3",
            Encoding::Wma => "WMA",
        };
        f.write_str( name )
    }
}


/// A quality tier grouping the channels of a network.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Streamlist {
    /// Identifier used in listen URLs, e.g. `premium_high`.
    pub key: String,

    /// Only usable by premium accounts.
    pub premium: bool,

    /// Stream bitrate in kbit/s.
    pub bitrate: u32,

    pub encoding: Encoding,
}


impl Streamlist {
    pub fn new( key: &str, premium: bool, bitrate: u32, encoding: Encoding ) -> Self {
        Self {
            key: key.to_string(),
            premium,
            bitrate,
            encoding,
        }
    }


    /// Human readable name, e.g. "Premium 256kbit/s MP3".
    pub fn name( &self ) -> String {
        let premium = if self.premium { "Premium " } else { "" };
        format!( "{}{}kbit/s {}", premium, self.bitrate, self.encoding )
    }
}


/// A provider network and its streamlists.
#[derive( Debug, Clone )]
pub struct Network {
    /// Human readable name, e.g. "RadioTunes".
    pub name: String,

    /// Key used in API paths, e.g. `di`.
    pub key: String,

    /// Base URL for channel listings and stream URL lookups.
    pub listen_url_base: String,

    streamlists: Vec<Streamlist>,
}


impl Network {
    /// Creates a network without streamlists.
    pub fn new( name: &str, key: &str, listen_url_base: &str ) -> Self {
        Self {
            name: name.to_string(),
            key: key.to_string(),
            listen_url_base: listen_url_base.trim_end_matches( '/' ).to_string(),
            streamlists: Vec::new(),
        }
    }


    /// Adds a streamlist, builder style.
    pub fn with_streamlist( mut self, streamlist: Streamlist ) -> Self {
        self.streamlists.push( streamlist );
        self
    }


    /// All streamlists in declaration order.
    pub fn streamlists( &self ) -> &[Streamlist] {
        &self.streamlists
    }


    /// Returns the highest bitrate streamlist of the requested tier.
    ///
    /// A premium account gets the best premium streamlist, a free account
    /// the best public one. Ties keep the first declared streamlist.
    pub fn best_streamlist( &self, premium: bool ) -> Option<&Streamlist> {
        self.streamlists
            .iter()
            .filter( |s| s.premium == premium )
            .fold( None, |best: Option<&Streamlist>, s| match best {
                Some( b ) if b.bitrate >= s.bitrate => Some( b ),
                _ => Some( s ),
            })
    }


    /// Looks up a streamlist by key.
    pub fn streamlist_by_key( &self, key: &str ) -> Result<&Streamlist, ApiError> {
        self.streamlists
            .iter()
            .find( |s| s.key == key )
            .ok_or_else( || ApiError::StreamlistNotAvailable( key.to_string() ) )
    }
}


/// Immutable table of known networks, built once at start-up.
#[derive( Debug, Clone )]
pub struct NetworkTable {
    networks: Vec<Network>,
}


impl NetworkTable {
    /// Builds a table from the given networks.
    pub fn new( networks: Vec<Network> ) -> Self {
        Self { networks }
    }


    /// All networks in declaration order.
    pub fn networks( &self ) -> &[Network] {
        &self.networks
    }


    /// Looks up a network by key.
    pub fn get( &self, key: &str ) -> Result<&Network, ApiError> {
        self.networks
            .iter()
            .find( |n| n.key == key )
            .ok_or_else( || ApiError::UnknownNetwork( key.to_string() ) )
    }
}


impl Default for NetworkTable {
    fn default() -> Self {
        use Encoding::*;

        let di = Network::new( "di.fm", "di", "http://listen.di.fm" )
            .with_streamlist( Streamlist::new( "public1", false, 64, Aac ) )
            .with_streamlist( Streamlist::new( "public2", false, 40, Aac ) )
            .with_streamlist( Streamlist::new( "public3", false, 96, Mp3 ) )
            .with_streamlist( Streamlist::new( "premium_low", true, 40, Aac ) )
            .with_streamlist( Streamlist::new( "premium_medium", true, 64, Aac ) )
            .with_streamlist( Streamlist::new( "premium", true, 128, Aac ) )
            .with_streamlist( Streamlist::new( "premium_high", true, 256, Mp3 ) );

        let radiotunes = Network::new( "RadioTunes", "radiotunes", "http://listen.radiotunes.com" )
            .with_streamlist( Streamlist::new( "public1", false, 40, Aac ) )
            .with_streamlist( Streamlist::new( "public5", false, 40, Wma ) )
            .with_streamlist( Streamlist::new( "public3", false, 96, Mp3 ) )
            .with_streamlist( Streamlist::new( "premium_low", true, 40, Aac ) )
            .with_streamlist( Streamlist::new( "premium_medium", true, 64, Aac ) )
            .with_streamlist( Streamlist::new( "premium", true, 128, Aac ) )
            .with_streamlist( Streamlist::new( "premium_high", true, 256, Mp3 ) );

        Self::new( vec![ di, radiotunes ] )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_best_streamlist_per_tier() {
        let table = NetworkTable::default();
        let di = table.get( "di" ).unwrap();

        assert_eq!( di.best_streamlist( false ).unwrap().key, "public3" );
        assert_eq!( di.best_streamlist( true ).unwrap().key, "premium_high" );
    }


    #[test]
    fn test_best_streamlist_keeps_first_on_tie() {
        let table = NetworkTable::default();
        let radiotunes = table.get( "radiotunes" ).unwrap();
        let network = Network::new( "t", "t", "http://x" )
            .with_streamlist( Streamlist::new( "a", false, 40, Encoding::Aac ) )
            .with_streamlist( Streamlist::new( "b", false, 40, Encoding::Wma ) );

        assert_eq!( network.best_streamlist( false ).unwrap().key, "a" );
        assert_eq!( radiotunes.best_streamlist( false ).unwrap().key, "public3" );
        assert!( network.best_streamlist( true ).is_none() );
    }


    #[test]
    fn test_streamlist_by_key() {
        let table = NetworkTable::default();
        let di = table.get( "di" ).unwrap();

        assert_eq!( di.streamlist_by_key( "premium" ).unwrap().bitrate, 128 );
        assert!( matches!(
            di.streamlist_by_key( "lossless" ),
            Err( ApiError::StreamlistNotAvailable( _ ) )
        ));
    }


    #[test]
    fn test_unknown_network() {
        let table = NetworkTable::default();
        assert!( matches!( table.get( "sky" ), Err( ApiError::UnknownNetwork( _ ) ) ) );
    }


    #[test]
    fn test_streamlist_name() {
        assert_eq!(
            Streamlist::new( "premium_high", true, 256, Encoding::Mp3 ).name(),
            "Premium 256kbit/s MP3"
        );
        assert_eq!( Streamlist::new( "public1", false, 64, Encoding::Aac ).name(), "64kbit/s AAC" );
    }


    #[test]
    fn test_listen_url_base_trailing_slash() {
        let network = Network::new( "t", "t", "http://listen.example.com/" );
        assert_eq!( network.listen_url_base, "http://listen.example.com" );
    }
}
