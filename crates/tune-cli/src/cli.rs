//! Command-line argument parsing for tune.

use clap::Parser;


/// tune - A terminal internet radio player for AudioAddict networks.
#[derive( Parser, Debug )]
#[command( name = "tune" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Network to listen to (di, radiotunes).
    #[arg( short, long )]
    pub network: Option<String>,

    /// Streamlist key, e.g. premium_high or public3.
    #[arg( short, long )]
    pub quality: Option<String>,

    /// Channel key to tune to on startup.
    #[arg( short, long )]
    pub channel: Option<String>,

    /// API key to log in with instead of the saved one.
    #[arg( long )]
    pub api_key: Option<String>,

    /// Log at debug level.
    #[arg( short, long )]
    pub verbose: bool,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_defaults() {
        let args = Args::try_parse_from( [ "tune" ] ).unwrap();
        assert!( args.network.is_none() );
        assert!( args.channel.is_none() );
        assert!( !args.verbose );
    }


    #[test]
    fn test_parse_all() {
        let args = Args::try_parse_from( [
            "tune", "-n", "radiotunes", "-q", "premium", "-c", "jazzclassics", "--api-key", "abc", "-v",
        ]).unwrap();

        assert_eq!( args.network.as_deref(), Some( "radiotunes" ) );
        assert_eq!( args.quality.as_deref(), Some( "premium" ) );
        assert_eq!( args.channel.as_deref(), Some( "jazzclassics" ) );
        assert_eq!( args.api_key.as_deref(), Some( "abc" ) );
        assert!( args.verbose );
    }
}
