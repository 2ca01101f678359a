//! Slash command parsing.
//!
//! Commands typed after `/` in the TUI. Parsing is separate from execution,
//! which lives in the front end.

use thiserror::Error;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed slash command.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum Command {
    // Tuning
    Channel { key: String },
    Quality { key: Option<String> },

    // Playback
    Play,
    Stop,
    Volume { level: Option<i32> },

    // Channel list
    Search { term: Option<String> },
    Favorites,

    Help,
    Quit,
}


impl Command {
    /// Parses a command string (without the leading `/`).
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "channel" | "ch" | "tune" => {
                let key = args
                    .ok_or_else( || CommandError::MissingArgument( "channel key".into() ) )?;
                Ok( Command::Channel { key: key.to_lowercase() } )
            }
            "quality" | "ql" => Ok( Command::Quality { key: args.map( str::to_string ) } ),

            "play" | "p" => Ok( Command::Play ),
            "stop" | "st" => Ok( Command::Stop ),
            "vol" | "volume" => {
                let level = args.map( parse_volume ).transpose()?;
                Ok( Command::Volume { level } )
            }

            "search" | "find" | "s" => Ok( Command::Search { term: args.map( str::to_string ) } ),
            "favorites" | "favs" | "fav" => Ok( Command::Favorites ),

            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Channel { .. } => "Tune to a channel",
            Command::Quality { .. } => "Show or switch stream quality",
            Command::Play => "Resume playback",
            Command::Stop => "Stop playback",
            Command::Volume { .. } => "Show or set volume (0-100)",
            Command::Search { .. } => "Filter channels",
            Command::Favorites => "Toggle favorites-only list",
            Command::Help => "Show help",
            Command::Quit => "Quit application",
        }
    }
}


fn parse_volume( s: &str ) -> Result<i32, CommandError> {
    let level: i32 = s.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid volume: {}", s ) ) )?;

    if ( 0..=100 ).contains( &level ) {
        Ok( level )
    } else {
        Err( CommandError::InvalidArgument( format!( "Volume must be 0-100, got {}", level ) ) )
    }
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Tuning Commands:
  /channel <key>  Tune to a channel      [Enter] (e.g. /ch dub)
  /quality [key]  Show or switch streamlist

Playback Commands:
  /play           Resume playback        [Space]
  /stop           Stop playback          [Space]
  /vol [0-100]    Show or set volume     [+/-]

Channel List:
  /search [term]  Filter channels, no term clears
  /favorites      Toggle favorites only  [f]

Other Commands:
  /help           Show this help         [?]
  /quit           Exit tune              [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_channel() {
        let cmd = Command::parse( "channel Dub" ).unwrap();
        assert_eq!( cmd, Command::Channel { key: "dub".into() } );
    }


    #[test]
    fn test_parse_channel_alias() {
        let cmd = Command::parse( "ch   vocaltrance " ).unwrap();
        assert_eq!( cmd, Command::Channel { key: "vocaltrance".into() } );
    }


    #[test]
    fn test_parse_quality_alias() {
        assert_eq!( Command::parse( "ql" ).unwrap(), Command::Quality { key: None } );
        assert_eq!(
            Command::parse( "quality premium_high" ).unwrap(),
            Command::Quality { key: Some( "premium_high".into() ) }
        );
    }


    #[test]
    fn test_parse_volume() {
        assert_eq!( Command::parse( "vol 35" ).unwrap(), Command::Volume { level: Some( 35 ) } );
        assert_eq!( Command::parse( "volume" ).unwrap(), Command::Volume { level: None } );
    }


    #[test]
    fn test_parse_volume_out_of_range() {
        let result = Command::parse( "vol 120" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );

        let result = Command::parse( "vol loud" );
        assert!( matches!( result, Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_search_clears_without_term() {
        assert_eq!( Command::parse( "search" ).unwrap(), Command::Search { term: None } );
        assert_eq!(
            Command::parse( "find deep house" ).unwrap(),
            Command::Search { term: Some( "deep house".into() ) }
        );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "channel" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
