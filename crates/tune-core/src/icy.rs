//! ICY (Shoutcast/Icecast) metadata handling
//!
//! Streams requested with `Icy-MetaData: 1` interleave a metadata block
//! after every `icy-metaint` bytes of audio. The block starts with a length
//! byte (in units of 16 bytes) followed by `key='value';` pairs padded with
//! NULs. [`IcyReader`] strips those blocks and reports `StreamTitle` changes.

use std::io::{ self, Read };


/// Request header asking the server to interleave metadata.
pub const ICY_METADATA_HEADER: &str = "Icy-MetaData";

/// Response header carrying the metadata interval.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";


type TitleCallback = Box<dyn FnMut( Option<&str> ) + Send>;


/// Reader that passes audio through and strips interleaved metadata.
pub struct IcyReader<R> {
    inner: R,
    /// Audio bytes between metadata blocks; zero disables stripping.
    metaint: usize,
    until_meta: usize,
    last_title: Option<Option<String>>,
    on_title: TitleCallback,
}


impl<R: Read> IcyReader<R> {
    /// Wraps `inner`. `on_title` is called with each new stream title, or
    /// `None` when the server clears it.
    pub fn new( inner: R, metaint: usize, on_title: impl FnMut( Option<&str> ) + Send + 'static ) -> Self {
        Self {
            inner,
            metaint,
            until_meta: metaint,
            last_title: None,
            on_title: Box::new( on_title ),
        }
    }


    /// Consumes one metadata block. Returns false at end of stream.
    fn read_metadata( &mut self ) -> io::Result<bool> {
        let mut len = [ 0u8; 1 ];
        if self.inner.read( &mut len )? == 0 {
            return Ok( false );
        }

        let block_len = len[ 0 ] as usize * 16;
        if block_len > 0 {
            let mut block = vec![ 0u8; block_len ];
            self.inner.read_exact( &mut block )?;

            if let Some( title ) = parse_stream_title( &block ) {
                let title = Some( title ).filter( |t| !t.is_empty() );
                if self.last_title.as_ref() != Some( &title ) {
                    tracing::debug!( "Stream title: {:?}", title );
                    ( self.on_title )( title.as_deref() );
                    self.last_title = Some( title );
                }
            }
        }

        self.until_meta = self.metaint;
        Ok( true )
    }
}


impl<R: Read> Read for IcyReader<R> {
    fn read( &mut self, buf: &mut [u8] ) -> io::Result<usize> {
        if self.metaint == 0 || buf.is_empty() {
            return self.inner.read( buf );
        }

        if self.until_meta == 0 && !self.read_metadata()? {
            return Ok( 0 );
        }

        let len = buf.len().min( self.until_meta );
        let n = self.inner.read( &mut buf[ ..len ] )?;
        self.until_meta -= n;
        Ok( n )
    }
}


/// Extracts the `StreamTitle` value from a metadata block.
///
/// Returns `None` if the block has no title field; an empty title is
/// returned as an empty string.
pub fn parse_stream_title( block: &[u8] ) -> Option<String> {
    let text = String::from_utf8_lossy( block );
    let text = text.trim_end_matches( '\0' );

    let start = text.find( "StreamTitle='" )? + "StreamTitle='".len();
    let rest = &text[ start.. ];
    // Titles may contain quotes, so look for the field terminator first.
    let end = rest.find( "';" ).or_else( || rest.rfind( '\'' ) )?;

    Some( rest[ ..end ].trim().to_string() )
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::io::Cursor;
    use std::sync::{ Arc, Mutex };


    fn block( meta: &str ) -> Vec<u8> {
        let padded = meta.len().div_ceil( 16 ) * 16;
        let mut out = vec![ ( padded / 16 ) as u8 ];
        out.extend_from_slice( meta.as_bytes() );
        out.resize( 1 + padded, 0 );
        out
    }


    #[test]
    fn test_parse_stream_title() {
        let title = parse_stream_title( b"StreamTitle='Artist - Track';StreamUrl='';\0\0\0" );
        assert_eq!( title.as_deref(), Some( "Artist - Track" ) );

        let quoted = parse_stream_title( b"StreamTitle='Rock 'n' Roll';" );
        assert_eq!( quoted.as_deref(), Some( "Rock 'n' Roll" ) );

        assert_eq!( parse_stream_title( b"StreamTitle='';" ).as_deref(), Some( "" ) );
        assert_eq!( parse_stream_title( b"StreamUrl='http://x';" ), None );
    }


    #[test]
    fn test_reader_strips_metadata() {
        let mut stream = b"abcd".to_vec();
        stream.extend( block( "StreamTitle='One';" ) );
        stream.extend_from_slice( b"efgh" );
        stream.push( 0 );
        stream.extend_from_slice( b"ij" );

        let titles = Arc::new( Mutex::new( Vec::new() ) );
        let seen = Arc::clone( &titles );
        let mut reader = IcyReader::new( Cursor::new( stream ), 4, move |t| {
            seen.lock().unwrap().push( t.map( str::to_string ) );
        });

        let mut audio = Vec::new();
        reader.read_to_end( &mut audio ).unwrap();

        assert_eq!( audio, b"abcdefghij" );
        assert_eq!( *titles.lock().unwrap(), vec![ Some( "One".to_string() ) ] );
    }


    #[test]
    fn test_reader_reports_changes_only() {
        let mut stream = b"aa".to_vec();
        stream.extend( block( "StreamTitle='One';" ) );
        stream.extend_from_slice( b"bb" );
        stream.extend( block( "StreamTitle='One';" ) );
        stream.extend_from_slice( b"cc" );
        stream.extend( block( "StreamTitle='';" ) );
        stream.extend_from_slice( b"dd" );

        let titles = Arc::new( Mutex::new( Vec::new() ) );
        let seen = Arc::clone( &titles );
        let mut reader = IcyReader::new( Cursor::new( stream ), 2, move |t| {
            seen.lock().unwrap().push( t.map( str::to_string ) );
        });

        let mut audio = Vec::new();
        reader.read_to_end( &mut audio ).unwrap();

        assert_eq!( audio, b"aabbccdd" );
        assert_eq!( *titles.lock().unwrap(), vec![ Some( "One".to_string() ), None ] );
    }


    #[test]
    fn test_reader_without_metaint_passes_through() {
        let mut reader = IcyReader::new( Cursor::new( b"plain audio".to_vec() ), 0, |_| {
            panic!( "no metadata expected" );
        });

        let mut audio = Vec::new();
        reader.read_to_end( &mut audio ).unwrap();
        assert_eq!( audio, b"plain audio" );
    }
}
