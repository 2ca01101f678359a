//! Track history entries

use std::time::Duration;

use chrono::{ DateTime, TimeZone, Utc };
use serde::Deserialize;


/// A track (or advertisement) as reported by the track history endpoints.
#[derive( Debug, Clone, Default, PartialEq, Deserialize )]
#[serde( default )]
pub struct Track {
    /// Display name, usually "Artist - Title".
    #[serde( rename = "track" )]
    pub name: String,

    /// `track` for music; anything else (e.g. `advertisement`) is filler.
    #[serde( rename = "type" )]
    pub kind: String,

    /// Duration in seconds.
    pub duration: u64,

    /// Unix timestamp of the start of the track.
    pub started: i64,

    pub art_url: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub display_artist: Option<String>,
    pub display_title: Option<String>,
    pub release: Option<String>,
    pub channel_id: u32,
    pub network_id: u32,
    pub track_id: Option<u64>,
    pub length: Option<u64>,
}


/// Recently played entries of one channel, newest first.
pub type Tracklist = Vec<Track>;


impl Track {
    /// Returns true for music entries.
    pub fn is_track( &self ) -> bool {
        self.kind == "track"
    }


    /// Track duration.
    pub fn duration( &self ) -> Duration {
        Duration::from_secs( self.duration )
    }


    /// Server time at which the track started.
    pub fn started_at( &self ) -> DateTime<Utc> {
        Utc.timestamp_opt( self.started, 0 ).single().unwrap_or_default()
    }


    /// Time spent in the track at `now`, zero if `now` is before the start.
    pub fn elapsed_at( &self, now: DateTime<Utc> ) -> Duration {
        ( now - self.started_at() ).to_std().unwrap_or( Duration::ZERO )
    }


    /// Time until the track ends at `now`, zero once it is over.
    pub fn remaining_at( &self, now: DateTime<Utc> ) -> Duration {
        self.duration().saturating_sub( self.elapsed_at( now ) )
    }


    /// Art URL with an explicit https scheme (the API returns `//host/...`).
    pub fn art_url_https( &self ) -> Option<String> {
        self.art_url.as_ref().map( |url| {
            if url.starts_with( "//" ) {
                format!( "https:{}", url )
            } else {
                url.clone()
            }
        })
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_deserialize_track_with_nulls() {
        let json = r#"{
            "track": "King Tubby - Dub Fi Gwan",
            "type": "track",
            "duration": 240,
            "started": 1500000000,
            "art_url": "//cdn.example.com/a.jpg",
            "artist": "King Tubby",
            "channel_id": 7,
            "display_artist": null,
            "images": {},
            "network_id": 1,
            "release": null,
            "title": "Dub Fi Gwan",
            "track_id": 12
        }"#;

        let track: Track = serde_json::from_str( json ).unwrap();
        assert!( track.is_track() );
        assert_eq!( track.name, "King Tubby - Dub Fi Gwan" );
        assert_eq!( track.channel_id, 7 );
        assert_eq!( track.display_artist, None );
        assert_eq!( track.art_url_https().as_deref(), Some( "https://cdn.example.com/a.jpg" ) );
    }


    #[test]
    fn test_elapsed_and_remaining() {
        let track = Track { duration: 100, started: 1_000, ..Default::default() };
        let now = Utc.timestamp_opt( 1_030, 0 ).unwrap();

        assert_eq!( track.elapsed_at( now ), Duration::from_secs( 30 ) );
        assert_eq!( track.remaining_at( now ), Duration::from_secs( 70 ) );

        let before = Utc.timestamp_opt( 900, 0 ).unwrap();
        assert_eq!( track.elapsed_at( before ), Duration::ZERO );

        let after = Utc.timestamp_opt( 2_000, 0 ).unwrap();
        assert_eq!( track.remaining_at( after ), Duration::ZERO );
    }
}
