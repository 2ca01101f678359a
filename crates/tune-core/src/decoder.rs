//! Stream decoding via Symphonia
//!
//! Wraps a live byte stream (already stripped of ICY metadata) and decodes
//! it into interleaved f32 samples.

use std::io::{ self, Read, Seek, SeekFrom };
use std::sync::{ Mutex, PoisonError };

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader };
use symphonia::core::io::{ MediaSource, MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;


/// Read-ahead buffer for network streams.
const STREAM_BUFFER_LEN: usize = 256 * 1024;


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Unsupported stream format: {0}" )]
    UnsupportedFormat( String ),

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),
}


/// Adapts a forward-only reader to Symphonia's `MediaSource`.
///
/// Symphonia requires `Sync`; the mutex provides it without ever being
/// contended, since only the decoding thread touches the reader.
pub struct StreamSource<R> {
    inner: Mutex<R>,
}


impl<R: Read> StreamSource<R> {
    pub fn new( inner: R ) -> Self {
        Self { inner: Mutex::new( inner ) }
    }
}


impl<R: Read> Read for StreamSource<R> {
    fn read( &mut self, buf: &mut [u8] ) -> io::Result<usize> {
        self.inner
            .get_mut()
            .unwrap_or_else( PoisonError::into_inner )
            .read( buf )
    }
}


impl<R: Read> Seek for StreamSource<R> {
    fn seek( &mut self, _pos: SeekFrom ) -> io::Result<u64> {
        Err( io::Error::new( io::ErrorKind::Unsupported, "live streams cannot seek" ) )
    }
}


impl<R: Read + Send> MediaSource for StreamSource<R> {
    fn is_seekable( &self ) -> bool {
        false
    }


    fn byte_len( &self ) -> Option<u64> {
        None
    }
}


/// Maps an HTTP content type to the extension Symphonia probes with.
pub fn extension_for_content_type( content_type: &str ) -> Option<&'static str> {
    let mime = content_type.split( ';' ).next().unwrap_or( "" ).trim().to_ascii_lowercase();

    match mime.as_str() {
        "audio/mpeg" | "audio/mp3" => Some( "mp3" ),
        "audio/aac" | "audio/aacp" | "audio/x-aac" => Some( "aac" ),
        "audio/mp4" | "audio/x-m4a" => Some( "m4a" ),
        "audio/ogg" | "application/ogg" => Some( "ogg" ),
        "audio/flac" | "audio/x-flac" => Some( "flac" ),
        "audio/wav" | "audio/x-wav" => Some( "wav" ),
        _ => None,
    }
}


/// Audio decoder over a live stream.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
}


impl Decoder {
    /// Probes the stream and sets up a decoder for its first audio track.
    pub fn open<R>( reader: R, content_type: Option<&str> ) -> Result<Self, DecoderError>
    where
        R: Read + Send + 'static,
    {
        let source = StreamSource::new( reader );
        let mss_opts = MediaSourceStreamOptions { buffer_len: STREAM_BUFFER_LEN };
        let mss = MediaSourceStream::new( Box::new( source ), mss_opts );

        let mut hint = Hint::new();
        if let Some( mime ) = content_type {
            hint.mime_type( mime );
            if let Some( ext ) = extension_for_content_type( mime ) {
                hint.with_extension( ext );
            }
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |e| DecoderError::UnsupportedFormat( e.to_string() ) )?;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );

        tracing::info!( "Opened stream: {} Hz, {} channels", sample_rate, channels );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Decodes the next packet into interleaved f32 samples.
    ///
    /// Returns `None` once the stream ends.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) ) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok( None );
                }
                Err( SymphoniaError::ResetRequired ) => {
                    self.decoder.reset();
                    continue;
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // Corrupt frames are common after reconnects; skip them.
                Err( SymphoniaError::DecodeError( e ) ) => {
                    tracing::debug!( "Skipping undecodable packet: {}", e );
                    continue;
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let needed = decoded.frames() * spec.channels.count();

            if self.sample_buf.as_ref().is_some_and( |b| b.capacity() < needed ) {
                self.sample_buf = None;
            }
            let sample_buf = self.sample_buf
                .get_or_insert_with( || SampleBuffer::new( decoded.capacity() as u64, spec ) );
            sample_buf.copy_interleaved_ref( decoded );

            return Ok( Some( sample_buf.samples().to_vec() ) );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::io::Cursor;


    #[test]
    fn test_extension_for_content_type() {
        assert_eq!( extension_for_content_type( "audio/mpeg" ), Some( "mp3" ) );
        assert_eq!( extension_for_content_type( "audio/aacp" ), Some( "aac" ) );
        assert_eq!( extension_for_content_type( "Audio/AAC; charset=binary" ), Some( "aac" ) );
        assert_eq!( extension_for_content_type( "text/html" ), None );
    }


    #[test]
    fn test_stream_source_is_forward_only() {
        let mut source = StreamSource::new( Cursor::new( vec![ 1u8, 2, 3 ] ) );

        let mut buf = [ 0u8; 2 ];
        assert_eq!( source.read( &mut buf ).unwrap(), 2 );
        assert_eq!( buf, [ 1, 2 ] );
        assert!( source.seek( SeekFrom::Start( 0 ) ).is_err() );
        assert!( !source.is_seekable() );
        assert_eq!( source.byte_len(), None );
    }


    #[test]
    fn test_open_rejects_garbage() {
        let garbage = Cursor::new( b"<html>not audio</html>".to_vec() );
        let result = Decoder::open( garbage, Some( "text/html" ) );

        assert!( matches!( result, Err( DecoderError::UnsupportedFormat( _ ) ) ) );
    }
}
