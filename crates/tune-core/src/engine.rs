//! Media engine abstraction
//!
//! The session drives playback through these traits and never touches a
//! concrete backend. An engine opens media by URL and reports lifecycle
//! events through the [`EventSink`] it was handed at open time. Releasing a
//! handle is dropping it.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;


/// Errors reported by a media engine.
#[derive( Debug, Clone, Error, PartialEq, Eq )]
pub enum EngineError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Engine initialization failed: {0}" )]
    Init( String ),

    #[error( "Invalid media url: {0}" )]
    InvalidUrl( String ),

    #[error( "Failed to open media: {0}" )]
    Open( String ),

    #[error( "Stream error: {0}" )]
    Stream( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "Volume out of range: {0} (expected 0-100)" )]
    VolumeOutOfRange( i32 ),
}


/// Lifecycle events emitted by an engine handle.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum EngineEvent {
    /// Audio is flowing.
    Playing,

    /// Playback stopped, by request or because the stream ended.
    Stopped,

    /// The stream announced a new title, if it carries one.
    TitleChanged( Option<String> ),

    /// An asynchronous failure while streaming.
    Error( EngineError ),
}


/// Callback through which a handle reports its events.
///
/// Cheap to clone and safe to move onto engine worker threads.
#[derive( Clone )]
pub struct EventSink {
    emit: Arc<dyn Fn( EngineEvent ) + Send + Sync>,
}


impl EventSink {
    /// Wraps a callback.
    pub fn new( emit: impl Fn( EngineEvent ) + Send + Sync + 'static ) -> Self {
        Self { emit: Arc::new( emit ) }
    }


    /// Reports an event.
    pub fn emit( &self, event: EngineEvent ) {
        ( self.emit )( event );
    }
}


impl fmt::Debug for EventSink {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "EventSink" ).finish_non_exhaustive()
    }
}


/// A media playback backend.
///
/// Engines are created and used on the session's actor thread only, so
/// neither the engine nor its handles need to be `Send`.
pub trait MediaEngine {
    type Handle: MediaHandle;

    /// Opens a media resource. Playback does not start until
    /// [`MediaHandle::play`] is called.
    fn open( &mut self, url: &str, events: EventSink ) -> Result<Self::Handle, EngineError>;
}


/// An opened media resource. Dropping the handle releases it.
pub trait MediaHandle {
    /// Starts (or restarts) playback.
    fn play( &mut self ) -> Result<(), EngineError>;

    /// Stops playback. Streams have no pause.
    fn stop( &mut self ) -> Result<(), EngineError>;

    /// Whether playback is currently running.
    fn is_playing( &self ) -> bool;

    /// Sets the volume as a percentage; values outside 0-100 are rejected.
    fn set_volume( &mut self, volume: i32 ) -> Result<(), EngineError>;

    /// The volume currently applied by the engine.
    fn volume( &self ) -> Result<i32, EngineError>;
}


/// Validates a volume percentage.
pub fn check_volume( volume: i32 ) -> Result<i32, EngineError> {
    if ( 0..=100 ).contains( &volume ) {
        Ok( volume )
    } else {
        Err( EngineError::VolumeOutOfRange( volume ) )
    }
}
