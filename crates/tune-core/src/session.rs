//! Playback session actor
//!
//! A [`Session`] owns the current channel, the target volume and the one live
//! engine handle. All of that state lives on a single actor thread; the
//! public handle only sends messages to it. Engine lifecycle events are fed
//! back into the same mailbox, tagged with the generation of the handle that
//! produced them, so events from a superseded handle are dropped.
//!
//! Handler callbacks run on a separate dispatcher thread, in the order the
//! actor relayed them. A handler may therefore call back into the session.

use std::fmt;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{ bounded, unbounded, Receiver, Sender };
use thiserror::Error;

use crate::api::{ Account, ApiError, Channel, StreamResolver };
use crate::engine::{ EngineError, EngineEvent, EventSink, MediaEngine, MediaHandle };


/// Volume applied until the consumer sets one.
pub const DEFAULT_VOLUME: i32 = 50;


/// The session step that failed.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Step {
    OpenMedia,
    SetVolume,
    GetVolume,
    Play,
    Stop,
    Stream,
}


impl fmt::Display for Step {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            Step::OpenMedia => "open media",
            Step::SetVolume => "set volume",
            Step::GetVolume => "get volume",
            Step::Play => "play",
            Step::Stop => "stop",
            Step::Stream => "stream",
        };
        f.write_str( name )
    }
}


/// Errors surfaced by a session.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "Failed to start playback engine: {0}" )]
    EngineStartup( #[source] EngineError ),

    #[error( "Channel requires a premium account" )]
    ChannelRequiresPremium,

    #[error( "Resolving stream urls failed: {0}" )]
    Resolve( #[source] ApiError ),

    #[error( "No stream urls for channel {0}" )]
    NoStreamUrls( String ),

    #[error( "{step} failed: {source}" )]
    Engine {
        step: Step,
        #[source]
        source: EngineError,
    },
}


/// Position of the session in its playback state machine.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum SessionState {
    /// No channel and no engine handle.
    #[default]
    Idle,

    /// Looking up stream urls.
    Resolving,

    /// The engine has been asked to start; waiting for it to confirm.
    Opening,

    Playing,

    Stopped,
}


/// Events relayed to registered handlers.
#[derive( Debug )]
pub enum PlaybackEvent {
    Stopped,
    Playing( Channel ),
    TitleChanged { channel: Channel, title: Option<String> },
    Error( SessionError ),
}


type StoppedHandler = Box<dyn FnMut() + Send>;
type PlayingHandler = Box<dyn FnMut( &Channel ) + Send>;
type TitleHandler = Box<dyn FnMut( &Channel, Option<&str> ) + Send>;
type ErrorHandler = Box<dyn FnMut( &SessionError ) + Send>;


enum Handler {
    Stopped( StoppedHandler ),
    Playing( PlayingHandler ),
    TitleChanged( TitleHandler ),
    Error( ErrorHandler ),
}


enum Dispatch {
    Register( Handler ),
    Event( PlaybackEvent ),
    /// Sent by the actor on close; handlers are dropped.
    Shutdown,
}


enum Message {
    SetChannel( Channel ),
    GetChannel( Sender<Option<Channel>> ),
    SetVolume( i32 ),
    GetVolume( Sender<Option<i32>> ),
    PlayStop( Sender<bool> ),
    GetState( Sender<SessionState> ),
    Lock { acquired: Sender<()>, release: Receiver<()> },
    Close( Option<Sender<()>> ),
    Engine { generation: u64, event: EngineEvent },
}


struct Shared {
    requests: Sender<Message>,
    dispatch: Sender<Dispatch>,
    closed: AtomicBool,
}


impl Drop for Shared {
    fn drop( &mut self ) {
        // Last handle gone without close(): release the engine anyway.
        if !self.closed.load( Ordering::SeqCst ) {
            let _ = self.requests.send( Message::Close( None ) );
        }
    }
}


/// Handle to a playback session.
///
/// Clones share the same session. After [`Session::close`] every
/// operation on any clone panics.
#[derive( Clone )]
pub struct Session {
    shared: Arc<Shared>,
}


/// Pauses request processing while held. See [`Session::lock`].
#[must_use = "the session resumes as soon as the lock is dropped"]
pub struct SessionLock {
    _release: Sender<()>,
}


impl Session {
    /// Starts a session.
    ///
    /// `engine` runs on the actor thread and builds the playback engine
    /// there; if it fails the error is returned and no session exists.
    pub fn new<E, R, F>( account: Account, resolver: R, engine: F ) -> Result<Self, SessionError>
    where
        E: MediaEngine + 'static,
        R: StreamResolver + Send + 'static,
        F: FnOnce() -> Result<E, EngineError> + Send + 'static,
    {
        let ( requests_tx, requests_rx ) = unbounded();
        let ( dispatch_tx, dispatch_rx ) = unbounded();
        let ( ready_tx, ready_rx ) = bounded( 1 );

        thread::spawn( move || dispatch_loop( dispatch_rx ) );

        let mailbox = requests_tx.clone();
        let actor_dispatch = dispatch_tx.clone();
        thread::spawn( move || {
            let engine = match engine() {
                Ok( engine ) => engine,
                Err( e ) => {
                    let _ = ready_tx.send( Err( e ) );
                    return;
                }
            };
            let _ = ready_tx.send( Ok(()) );

            let actor = Actor {
                engine,
                resolver,
                account,
                mailbox,
                dispatch: actor_dispatch,
                channel: None,
                volume: DEFAULT_VOLUME,
                handle: None,
                generation: 0,
                state: SessionState::Idle,
            };
            actor.run( requests_rx );
        });

        let shared = Arc::new( Shared {
            requests: requests_tx,
            dispatch: dispatch_tx,
            closed: AtomicBool::new( false ),
        });

        match ready_rx.recv() {
            Ok( Ok(()) ) => {
                tracing::debug!( "Session started" );
                Ok( Self { shared } )
            }
            Ok( Err( e ) ) => {
                shared.closed.store( true, Ordering::SeqCst );
                Err( SessionError::EngineStartup( e ) )
            }
            Err( _ ) => {
                shared.closed.store( true, Ordering::SeqCst );
                Err( SessionError::EngineStartup( EngineError::Init( "engine thread exited".into() ) ) )
            }
        }
    }


    /// Switches to a channel.
    ///
    /// Returns immediately; the switch is applied in order with other
    /// requests and failures are reported to the error handler.
    pub fn set_channel( &self, channel: Channel ) {
        self.send( Message::SetChannel( channel ) );
    }


    /// The current channel, if one is active.
    pub fn channel( &self ) -> Option<Channel> {
        self.request( Message::GetChannel )
    }


    /// Sets the target volume (0-100). Clamping is up to the caller.
    ///
    /// While idle the value is stored unchecked and pushed to the next
    /// handle. With a live handle the engine validates it first: a rejected
    /// value is reported and the previous target is kept. The same goes
    /// for a stored value the next handle rejects.
    pub fn set_volume( &self, volume: i32 ) {
        self.send( Message::SetVolume( volume ) );
    }


    /// The engine-reported volume, or `None` when no media is loaded.
    pub fn volume( &self ) -> Option<i32> {
        self.request( Message::GetVolume )
    }


    /// Toggles between playing and stopped.
    ///
    /// Returns whether the session is playing afterwards; `false` without
    /// any effect when no media is loaded.
    pub fn play_stop( &self ) -> bool {
        self.request( Message::PlayStop )
    }


    /// The current state machine position.
    pub fn state( &self ) -> SessionState {
        self.request( Message::GetState )
    }


    /// Holds back requests from other threads until the guard is dropped.
    ///
    /// Engine events keep queueing meanwhile. Calling into the session from
    /// the thread holding the guard deadlocks.
    pub fn lock( &self ) -> SessionLock {
        let ( acquired_tx, acquired_rx ) = bounded( 1 );
        let ( release_tx, release_rx ) = bounded( 1 );
        self.send( Message::Lock { acquired: acquired_tx, release: release_rx } );
        acquired_rx.recv().expect( "session actor exited" );
        SessionLock { _release: release_tx }
    }


    /// Stops playback, releases the engine and ends the session once all
    /// earlier requests are served.
    pub fn close( self ) {
        let ( done_tx, done_rx ) = bounded( 1 );
        self.send( Message::Close( Some( done_tx ) ) );
        self.shared.closed.store( true, Ordering::SeqCst );
        let _ = done_rx.recv();
        tracing::debug!( "Session closed" );
    }


    /// Called when playback stops.
    pub fn on_stopped( &self, handler: impl FnMut() + Send + 'static ) {
        self.register( Handler::Stopped( Box::new( handler ) ) );
    }


    /// Called once the engine confirms playback of a channel.
    pub fn on_playing( &self, handler: impl FnMut( &Channel ) + Send + 'static ) {
        self.register( Handler::Playing( Box::new( handler ) ) );
    }


    /// Called when the stream announces a new title.
    pub fn on_title_changed( &self, handler: impl FnMut( &Channel, Option<&str> ) + Send + 'static ) {
        self.register( Handler::TitleChanged( Box::new( handler ) ) );
    }


    /// Called for every failure. Without a handler errors are only logged.
    pub fn on_error( &self, handler: impl FnMut( &SessionError ) + Send + 'static ) {
        self.register( Handler::Error( Box::new( handler ) ) );
    }


    fn register( &self, handler: Handler ) {
        self.assert_open();
        self.shared.dispatch
            .send( Dispatch::Register( handler ) )
            .expect( "session dispatcher exited" );
    }


    fn send( &self, message: Message ) {
        self.assert_open();
        self.shared.requests.send( message ).expect( "session actor exited" );
    }


    fn request<T>( &self, message: impl FnOnce( Sender<T> ) -> Message ) -> T {
        let ( reply_tx, reply_rx ) = bounded( 1 );
        self.send( message( reply_tx ) );
        reply_rx.recv().expect( "session actor exited" )
    }


    fn assert_open( &self ) {
        assert!( !self.shared.closed.load( Ordering::SeqCst ), "session used after close" );
    }
}


/// Runs handlers for relayed events until the actor shuts down.
fn dispatch_loop( dispatch: Receiver<Dispatch> ) {
    let mut on_stopped: Option<StoppedHandler> = None;
    let mut on_playing: Option<PlayingHandler> = None;
    let mut on_title: Option<TitleHandler> = None;
    let mut on_error: Option<ErrorHandler> = None;

    for message in dispatch.iter() {
        match message {
            Dispatch::Register( Handler::Stopped( h ) ) => on_stopped = Some( h ),
            Dispatch::Register( Handler::Playing( h ) ) => on_playing = Some( h ),
            Dispatch::Register( Handler::TitleChanged( h ) ) => on_title = Some( h ),
            Dispatch::Register( Handler::Error( h ) ) => on_error = Some( h ),

            Dispatch::Event( PlaybackEvent::Stopped ) => {
                if let Some( h ) = on_stopped.as_mut() {
                    h();
                }
            }
            Dispatch::Event( PlaybackEvent::Playing( channel ) ) => {
                if let Some( h ) = on_playing.as_mut() {
                    h( &channel );
                }
            }
            Dispatch::Event( PlaybackEvent::TitleChanged { channel, title } ) => {
                if let Some( h ) = on_title.as_mut() {
                    h( &channel, title.as_deref() );
                }
            }
            Dispatch::Event( PlaybackEvent::Error( error ) ) => match on_error.as_mut() {
                Some( h ) => h( &error ),
                None => tracing::debug!( "Unhandled session error: {}", error ),
            },

            // Handlers may hold session clones, which keep senders alive.
            Dispatch::Shutdown => break,
        }
    }

    tracing::debug!( "Session dispatcher exiting" );
}


/// State owned by the actor thread.
struct Actor<E: MediaEngine, R> {
    engine: E,
    resolver: R,
    account: Account,
    /// Our own mailbox, handed to engine handles through their event sinks.
    mailbox: Sender<Message>,
    dispatch: Sender<Dispatch>,
    channel: Option<Channel>,
    /// Target volume, applied to every new handle.
    volume: i32,
    handle: Option<E::Handle>,
    /// Bumped whenever a handle is torn down.
    generation: u64,
    state: SessionState,
}


impl<E: MediaEngine, R: StreamResolver> Actor<E, R> {
    fn run( mut self, requests: Receiver<Message> ) {
        while let Ok( message ) = requests.recv() {
            match message {
                Message::SetChannel( channel ) => self.set_channel( channel ),
                Message::GetChannel( reply ) => {
                    let _ = reply.send( self.channel.clone() );
                }
                Message::SetVolume( volume ) => self.set_volume( volume ),
                Message::GetVolume( reply ) => {
                    let volume = self.engine_volume();
                    let _ = reply.send( volume );
                }
                Message::PlayStop( reply ) => {
                    let playing = self.play_stop();
                    let _ = reply.send( playing );
                }
                Message::GetState( reply ) => {
                    let _ = reply.send( self.state );
                }
                Message::Lock { acquired, release } => {
                    let _ = acquired.send( () );
                    // Returns once the guard's sender is dropped.
                    let _ = release.recv();
                }
                Message::Engine { generation, event } => self.engine_event( generation, event ),
                Message::Close( done ) => {
                    self.teardown();
                    if let Some( done ) = done {
                        let _ = done.send( () );
                    }
                    break;
                }
            }
        }

        let _ = self.dispatch.send( Dispatch::Shutdown );
        tracing::debug!( "Session actor exiting" );
    }


    fn set_channel( &mut self, channel: Channel ) {
        if !self.account.can_stream( &channel ) {
            tracing::warn!( "Channel {} requires a premium account", channel.key );
            self.report( SessionError::ChannelRequiresPremium );
            return;
        }

        tracing::info!( "Switching to channel {}", channel.key );

        // The current channel keeps playing until the new one resolves.
        let previous = self.state;
        self.state = SessionState::Resolving;
        let resolved = self.resolver.stream_urls( &channel, &self.account );

        if let Err( ApiError::ChannelRequiresPremium ) = resolved {
            tracing::warn!( "Resolver refused {}: premium required", channel.key );
            self.state = previous;
            self.report( SessionError::ChannelRequiresPremium );
            return;
        }

        self.teardown();
        let urls = match resolved {
            Ok( urls ) if urls.is_empty() => {
                self.fail( SessionError::NoStreamUrls( channel.key ) );
                return;
            }
            Ok( urls ) => urls,
            Err( e ) => {
                self.fail( SessionError::Resolve( e ) );
                return;
            }
        };

        self.state = SessionState::Opening;
        let mut handle = match self.open_first( &urls ) {
            Ok( handle ) => handle,
            Err( e ) => {
                self.fail( SessionError::Engine { step: Step::OpenMedia, source: e } );
                return;
            }
        };

        // A rejected volume is reported but does not abort the switch; the
        // engine's volume becomes the target.
        if let Err( e ) = handle.set_volume( self.volume ) {
            self.report( SessionError::Engine { step: Step::SetVolume, source: e } );
            if let Ok( volume ) = handle.volume() {
                self.volume = volume;
            }
        }

        if let Err( e ) = handle.play() {
            drop( handle );
            self.generation += 1;
            self.fail( SessionError::Engine { step: Step::Play, source: e } );
            return;
        }

        self.handle = Some( handle );
        self.channel = Some( channel );
    }


    /// Opens the first url the engine accepts.
    fn open_first( &mut self, urls: &[String] ) -> Result<E::Handle, EngineError> {
        let mut last_error = EngineError::Open( "no stream urls".into() );

        for url in urls {
            let sink = self.event_sink();
            match self.engine.open( url, sink ) {
                Ok( handle ) => {
                    tracing::debug!( "Opened {}", url );
                    return Ok( handle );
                }
                Err( e ) => {
                    tracing::warn!( "Failed to open {}: {}", url, e );
                    last_error = e;
                }
            }
        }

        Err( last_error )
    }


    /// Builds the event sink for a handle of the current generation.
    fn event_sink( &self ) -> EventSink {
        let mailbox = self.mailbox.clone();
        let generation = self.generation;
        EventSink::new( move |event| {
            let _ = mailbox.send( Message::Engine { generation, event } );
        })
    }


    fn set_volume( &mut self, volume: i32 ) {
        let result = self.handle.as_mut().map( |h| h.set_volume( volume ) );

        match result {
            None | Some( Ok(()) ) => {
                tracing::debug!( "Volume set to {}", volume );
                self.volume = volume;
            }
            Some( Err( e ) ) => self.report( SessionError::Engine { step: Step::SetVolume, source: e } ),
        }
    }


    fn engine_volume( &mut self ) -> Option<i32> {
        let result = self.handle.as_ref()?.volume();

        match result {
            Ok( volume ) => Some( volume ),
            Err( e ) => {
                self.report( SessionError::Engine { step: Step::GetVolume, source: e } );
                None
            }
        }
    }


    fn play_stop( &mut self ) -> bool {
        let Some( handle ) = self.handle.as_mut() else {
            return false;
        };

        if handle.is_playing() {
            match handle.stop() {
                Ok(()) => {
                    self.state = SessionState::Stopped;
                    false
                }
                Err( e ) => {
                    let playing = handle.is_playing();
                    self.report( SessionError::Engine { step: Step::Stop, source: e } );
                    playing
                }
            }
        } else {
            match handle.play() {
                Ok(()) => {
                    self.state = SessionState::Opening;
                    true
                }
                Err( e ) => {
                    self.state = SessionState::Stopped;
                    self.report( SessionError::Engine { step: Step::Play, source: e } );
                    false
                }
            }
        }
    }


    fn engine_event( &mut self, generation: u64, event: EngineEvent ) {
        if generation != self.generation || self.handle.is_none() {
            tracing::debug!( "Dropping stale engine event {:?} from generation {}", event, generation );
            return;
        }

        match event {
            EngineEvent::Playing => {
                self.state = SessionState::Playing;
                self.reconcile_volume();
                if let Some( channel ) = self.channel.clone() {
                    tracing::info!( "Playing {}", channel.key );
                    self.relay( PlaybackEvent::Playing( channel ) );
                }
            }
            EngineEvent::Stopped => {
                self.state = SessionState::Stopped;
                self.relay( PlaybackEvent::Stopped );
            }
            EngineEvent::TitleChanged( title ) => {
                if self.state != SessionState::Playing {
                    tracing::debug!( "Ignoring title change while {:?}", self.state );
                    return;
                }
                if let Some( channel ) = self.channel.clone() {
                    self.relay( PlaybackEvent::TitleChanged { channel, title } );
                }
            }
            EngineEvent::Error( e ) => {
                if self.state == SessionState::Playing {
                    // Keep the handle; play_stop() reconnects.
                    self.state = SessionState::Stopped;
                    self.report( SessionError::Engine { step: Step::Stream, source: e } );
                } else {
                    self.teardown();
                    self.report( SessionError::Engine { step: Step::OpenMedia, source: e } );
                }
            }
        }
    }


    /// Pushes the target volume to the engine if they disagree.
    fn reconcile_volume( &mut self ) {
        let target = self.volume;
        let Some( handle ) = self.handle.as_mut() else {
            return;
        };

        let result = match handle.volume() {
            Ok( current ) if current == target => Ok(()),
            _ => handle.set_volume( target ),
        };

        if let Err( e ) = result {
            self.report( SessionError::Engine { step: Step::SetVolume, source: e } );
        }
    }


    /// Stops and releases the current handle, leaving no active channel.
    fn teardown( &mut self ) {
        // Events still in flight from the old handle become stale.
        self.generation += 1;
        self.channel = None;
        self.state = SessionState::Idle;

        if let Some( mut handle ) = self.handle.take() {
            if handle.is_playing() {
                if let Err( e ) = handle.stop() {
                    self.report( SessionError::Engine { step: Step::Stop, source: e } );
                }
            }
            tracing::debug!( "Released engine handle" );
        }
    }


    fn fail( &mut self, error: SessionError ) {
        self.state = SessionState::Idle;
        self.channel = None;
        self.report( error );
    }


    fn report( &self, error: SessionError ) {
        tracing::warn!( "Session error: {}", error );
        self.relay( PlaybackEvent::Error( error ) );
    }


    fn relay( &self, event: PlaybackEvent ) {
        let _ = self.dispatch.send( Dispatch::Event( event ) );
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;

    use crossbeam_channel::RecvTimeoutError;

    use crate::api::ChannelSource;
    use crate::engine::check_volume;


    const WAIT: Duration = Duration::from_secs( 2 );
    const QUIET: Duration = Duration::from_millis( 200 );


    /// Shared view into the mock engine.
    #[derive( Default )]
    struct Probe {
        live: AtomicUsize,
        max_live: AtomicUsize,
        opened: Mutex<Vec<String>>,
        sinks: Mutex<Vec<EventSink>>,
    }


    struct MockEngine {
        probe: Arc<Probe>,
        /// Emit Playing/Stopped straight from play()/stop().
        auto_events: bool,
    }


    struct MockHandle {
        probe: Arc<Probe>,
        events: EventSink,
        auto_events: bool,
        playing: bool,
        volume: i32,
        plays: u32,
        /// Urls containing `noplay` never start, `once` starts only once
        /// and `nostop` cannot be stopped.
        fail_play: bool,
        fail_replay: bool,
        fail_stop: bool,
    }


    impl MediaEngine for MockEngine {
        type Handle = MockHandle;


        fn open( &mut self, url: &str, events: EventSink ) -> Result<MockHandle, EngineError> {
            if url.contains( "broken" ) {
                return Err( EngineError::Open( url.to_string() ) );
            }

            let live = self.probe.live.fetch_add( 1, Ordering::SeqCst ) + 1;
            self.probe.max_live.fetch_max( live, Ordering::SeqCst );
            self.probe.opened.lock().unwrap().push( url.to_string() );
            self.probe.sinks.lock().unwrap().push( events.clone() );

            Ok( MockHandle {
                probe: Arc::clone( &self.probe ),
                events,
                auto_events: self.auto_events,
                playing: false,
                volume: 100,
                plays: 0,
                fail_play: url.contains( "noplay" ),
                fail_replay: url.contains( "once" ),
                fail_stop: url.contains( "nostop" ),
            })
        }
    }


    impl MediaHandle for MockHandle {
        fn play( &mut self ) -> Result<(), EngineError> {
            if self.fail_play || ( self.fail_replay && self.plays > 0 ) {
                return Err( EngineError::Stream( "refused".into() ) );
            }
            self.plays += 1;
            self.playing = true;
            if self.auto_events {
                self.events.emit( EngineEvent::Playing );
            }
            Ok(())
        }


        fn stop( &mut self ) -> Result<(), EngineError> {
            if self.fail_stop {
                return Err( EngineError::Output( "stuck".into() ) );
            }
            self.playing = false;
            if self.auto_events {
                self.events.emit( EngineEvent::Stopped );
            }
            Ok(())
        }


        fn is_playing( &self ) -> bool {
            self.playing
        }


        fn set_volume( &mut self, volume: i32 ) -> Result<(), EngineError> {
            self.volume = check_volume( volume )?;
            Ok(())
        }


        fn volume( &self ) -> Result<i32, EngineError> {
            Ok( self.volume )
        }
    }


    impl Drop for MockHandle {
        fn drop( &mut self ) {
            self.probe.live.fetch_sub( 1, Ordering::SeqCst );
        }
    }


    /// Resolves `key` to `mock://key`; a few keys have special behaviour.
    struct MockResolver;


    impl StreamResolver for MockResolver {
        fn stream_urls( &self, channel: &Channel, _account: &Account ) -> Result<Vec<String>, ApiError> {
            match channel.key.as_str() {
                "missing" => Err( ApiError::NotFound( "mock://missing".into() ) ),
                "locked" => Err( ApiError::ChannelRequiresPremium ),
                "silent" => Ok( Vec::new() ),
                "fallback" => Ok( vec![ "mock://broken".into(), "mock://fallback-2".into() ] ),
                key => Ok( vec![ format!( "mock://{}", key ) ] ),
            }
        }
    }


    /// What the handlers observed.
    #[derive( Debug, Clone, PartialEq )]
    enum Seen {
        Stopped,
        Playing( String ),
        Title( String, Option<String> ),
        Error( String ),
    }


    fn channel( id: u32, key: &str, premium: bool ) -> Channel {
        let source = ChannelSource {
            network: "di".into(),
            streamlist: if premium { "premium_high".into() } else { "public3".into() },
            premium,
        };
        Channel::new( id, key, key, source )
    }


    fn start( auto_events: bool, premium: bool ) -> ( Session, Arc<Probe>, Receiver<Seen> ) {
        let probe = Arc::new( Probe::default() );
        let engine_probe = Arc::clone( &probe );
        let account = Account { premium, ..Default::default() };

        let session = Session::new( account, MockResolver, move || {
            Ok( MockEngine { probe: engine_probe, auto_events } )
        }).unwrap();

        let ( tx, rx ) = unbounded();
        let stopped = tx.clone();
        session.on_stopped( move || { let _ = stopped.send( Seen::Stopped ); } );
        let playing = tx.clone();
        session.on_playing( move |ch| { let _ = playing.send( Seen::Playing( ch.key.clone() ) ); } );
        let title = tx.clone();
        session.on_title_changed( move |ch, t| {
            let _ = title.send( Seen::Title( ch.key.clone(), t.map( str::to_string ) ) );
        });
        session.on_error( move |e| { let _ = tx.send( Seen::Error( format!( "{:?}", e ) ) ); } );

        ( session, probe, rx )
    }


    fn next( rx: &Receiver<Seen> ) -> Seen {
        rx.recv_timeout( WAIT ).expect( "expected a session event" )
    }


    fn assert_quiet( rx: &Receiver<Seen> ) {
        match rx.recv_timeout( QUIET ) {
            Err( RecvTimeoutError::Timeout ) => {}
            other => panic!( "unexpected event: {:?}", other ),
        }
    }


    #[test]
    fn test_set_channel_plays_once() {
        let ( session, _probe, rx ) = start( true, false );

        session.set_channel( channel( 7, "dub", false ) );

        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );
        assert_quiet( &rx );
        assert_eq!( session.channel().map( |c| c.key ), Some( "dub".to_string() ) );
        assert_eq!( session.state(), SessionState::Playing );
    }


    #[test]
    fn test_single_live_handle_across_switches() {
        let ( session, probe, _rx ) = start( true, false );

        for ( id, key ) in [ ( 1, "a" ), ( 2, "b" ), ( 3, "c" ), ( 4, "d" ) ] {
            session.set_channel( channel( id, key, false ) );
        }
        assert_eq!( session.channel().map( |c| c.key ), Some( "d".to_string() ) );

        assert_eq!( probe.live.load( Ordering::SeqCst ), 1 );
        assert_eq!( probe.max_live.load( Ordering::SeqCst ), 1 );
        assert_eq!( probe.opened.lock().unwrap().len(), 4 );

        session.close();
        assert_eq!( probe.live.load( Ordering::SeqCst ), 0 );
    }


    #[test]
    fn test_volume_round_trip_while_playing() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_volume( 35 );
        assert_eq!( session.volume(), Some( 35 ) );
    }


    #[test]
    fn test_volume_while_idle_applies_on_next_channel() {
        let ( session, _probe, rx ) = start( true, false );

        assert_eq!( session.volume(), None );
        session.set_volume( 20 );
        assert_eq!( session.volume(), None );
        assert_quiet( &rx );

        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );
        assert_eq!( session.volume(), Some( 20 ) );
    }


    #[test]
    fn test_rejected_volume_keeps_previous() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_volume( 150 );
        match next( &rx ) {
            Seen::Error( e ) => assert!( e.contains( "VolumeOutOfRange(150)" ), "{}", e ),
            other => panic!( "expected error, got {:?}", other ),
        }
        assert_eq!( session.volume(), Some( DEFAULT_VOLUME ) );
    }


    #[test]
    fn test_play_stop_idle_does_nothing() {
        let ( session, _probe, rx ) = start( true, false );

        assert!( !session.play_stop() );
        assert_eq!( session.state(), SessionState::Idle );
        assert_quiet( &rx );
    }


    #[test]
    fn test_play_stop_toggles() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        assert!( !session.play_stop() );
        assert_eq!( next( &rx ), Seen::Stopped );
        assert_eq!( session.state(), SessionState::Stopped );

        assert!( session.play_stop() );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );
        assert_eq!( session.state(), SessionState::Playing );
    }


    #[test]
    fn test_premium_channel_keeps_current() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_channel( channel( 9, "vocal", true ) );
        assert_eq!( next( &rx ), Seen::Error( "ChannelRequiresPremium".into() ) );

        assert_eq!( session.channel().map( |c| c.key ), Some( "dub".to_string() ) );
        assert_eq!( session.state(), SessionState::Playing );
        assert_eq!( probe.opened.lock().unwrap().len(), 1 );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_premium_account_plays_premium_channel() {
        let ( session, _probe, rx ) = start( true, true );
        session.set_channel( channel( 9, "vocal", true ) );
        assert_eq!( next( &rx ), Seen::Playing( "vocal".into() ) );
    }


    #[test]
    fn test_stale_events_are_dropped() {
        let ( session, probe, rx ) = start( false, false );

        session.set_channel( channel( 1, "a", false ) );
        session.set_channel( channel( 2, "b", false ) );
        assert_eq!( session.state(), SessionState::Opening );

        let sinks = probe.sinks.lock().unwrap().clone();
        assert_eq!( sinks.len(), 2 );

        // Late events from the superseded handle.
        sinks[ 0 ].emit( EngineEvent::Playing );
        sinks[ 0 ].emit( EngineEvent::TitleChanged( Some( "old".into() ) ) );
        sinks[ 1 ].emit( EngineEvent::Playing );
        sinks[ 1 ].emit( EngineEvent::TitleChanged( Some( "new".into() ) ) );

        assert_eq!( next( &rx ), Seen::Playing( "b".into() ) );
        assert_eq!( next( &rx ), Seen::Title( "b".into(), Some( "new".into() ) ) );
        assert_quiet( &rx );
        assert_eq!( session.channel().map( |c| c.key ), Some( "b".to_string() ) );
    }


    #[test]
    fn test_title_ignored_until_playing() {
        let ( session, probe, rx ) = start( false, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( session.state(), SessionState::Opening );

        let sink = probe.sinks.lock().unwrap()[ 0 ].clone();
        sink.emit( EngineEvent::TitleChanged( Some( "early".into() ) ) );
        sink.emit( EngineEvent::Playing );
        sink.emit( EngineEvent::TitleChanged( None ) );

        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );
        assert_eq!( next( &rx ), Seen::Title( "dub".into(), None ) );
        assert_quiet( &rx );
    }


    #[test]
    fn test_resolve_failure_leaves_no_active_channel() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_channel( channel( 8, "missing", false ) );
        match next( &rx ) {
            Seen::Error( e ) => assert!( e.starts_with( "Resolve(NotFound" ), "{}", e ),
            other => panic!( "expected error, got {:?}", other ),
        }

        assert_eq!( session.channel(), None );
        assert_eq!( session.state(), SessionState::Idle );
        assert_eq!( session.volume(), None );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 0 );
        assert!( !session.play_stop() );
    }


    #[test]
    fn test_empty_url_list_is_an_error() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 3, "silent", false ) );

        assert_eq!( next( &rx ), Seen::Error( "NoStreamUrls(\"silent\")".into() ) );
        assert_eq!( session.channel(), None );
    }


    #[test]
    fn test_open_falls_back_to_next_url() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 5, "fallback", false ) );

        assert_eq!( next( &rx ), Seen::Playing( "fallback".into() ) );
        assert_eq!( *probe.opened.lock().unwrap(), vec![ "mock://fallback-2".to_string() ] );
    }


    #[test]
    fn test_stream_error_while_playing_stops() {
        let ( session, probe, rx ) = start( false, false );
        session.set_channel( channel( 7, "dub", false ) );

        let sink = probe.sinks.lock().unwrap()[ 0 ].clone();
        sink.emit( EngineEvent::Playing );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        sink.emit( EngineEvent::Error( EngineError::Stream( "reset".into() ) ) );
        match next( &rx ) {
            Seen::Error( e ) => assert!( e.contains( "Stream" ), "{}", e ),
            other => panic!( "expected error, got {:?}", other ),
        }

        assert_eq!( session.state(), SessionState::Stopped );
        assert_eq!( session.channel().map( |c| c.key ), Some( "dub".to_string() ) );
    }


    #[test]
    fn test_stream_error_while_opening_releases_handle() {
        let ( session, probe, rx ) = start( false, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( session.state(), SessionState::Opening );

        let sink = probe.sinks.lock().unwrap()[ 0 ].clone();
        sink.emit( EngineEvent::Error( EngineError::Open( "http 404".into() ) ) );
        sink.emit( EngineEvent::Stopped );

        match next( &rx ) {
            Seen::Error( e ) => assert!( e.contains( "OpenMedia" ), "{}", e ),
            other => panic!( "expected error, got {:?}", other ),
        }
        assert_quiet( &rx );
        assert_eq!( session.channel(), None );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 0 );
    }


    #[test]
    fn test_engine_startup_failure() {
        let result = Session::new( Account::default(), MockResolver, || {
            Err::<MockEngine, _>( EngineError::NoDevice )
        });

        assert!( matches!( result, Err( SessionError::EngineStartup( EngineError::NoDevice ) ) ) );
    }


    #[test]
    #[should_panic( expected = "session used after close" )]
    fn test_use_after_close_panics() {
        let ( session, _probe, _rx ) = start( true, false );
        let other = session.clone();
        session.close();
        other.channel();
    }


    #[test]
    fn test_lock_holds_back_requests() {
        let ( session, _probe, _rx ) = start( true, false );
        let guard = session.lock();

        let ( done_tx, done_rx ) = bounded( 1 );
        let worker = session.clone();
        thread::spawn( move || {
            worker.set_channel( channel( 7, "dub", false ) );
            let _ = done_tx.send( worker.channel().map( |c| c.key ) );
        });

        assert!( done_rx.recv_timeout( QUIET ).is_err() );
        drop( guard );
        assert_eq!( done_rx.recv_timeout( WAIT ).unwrap(), Some( "dub".to_string() ) );
    }


    #[test]
    fn test_handler_may_call_back_into_session() {
        let ( session, _probe, _rx ) = start( true, false );
        let ( tx, rx ) = unbounded();

        let inner = session.clone();
        session.on_playing( move |_| {
            let _ = tx.send( inner.volume() );
        });
        session.set_volume( 42 );
        session.set_channel( channel( 7, "dub", false ) );

        assert_eq!( rx.recv_timeout( WAIT ).unwrap(), Some( 42 ) );
    }


    #[test]
    fn test_new_handler_replaces_previous() {
        let ( session, _probe, rx ) = start( true, false );
        let ( tx, replaced ) = unbounded();
        session.on_playing( move |ch| { let _ = tx.send( ch.key.clone() ); } );

        session.set_channel( channel( 7, "dub", false ) );

        assert_eq!( replaced.recv_timeout( WAIT ).unwrap(), "dub" );
        assert_quiet( &rx );
    }


    fn expect_error( rx: &Receiver<Seen>, prefix: &str ) {
        match next( rx ) {
            Seen::Error( e ) => assert!( e.starts_with( prefix ), "{}", e ),
            other => panic!( "expected error, got {:?}", other ),
        }
    }


    #[test]
    fn test_play_failure_leaves_no_active_channel() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_channel( channel( 8, "noplay", false ) );
        expect_error( &rx, "Engine { step: Play" );
        assert_quiet( &rx );

        assert_eq!( session.channel(), None );
        assert_eq!( session.volume(), None );
        assert_eq!( session.state(), SessionState::Idle );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 0 );
    }


    #[test]
    fn test_stop_failure_during_switch_is_reported() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "nostop", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "nostop".into() ) );

        session.set_channel( channel( 8, "dub", false ) );
        expect_error( &rx, "Engine { step: Stop" );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        assert_eq!( session.channel().map( |c| c.key ), Some( "dub".to_string() ) );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_play_stop_reports_stop_failure() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "nostop", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "nostop".into() ) );

        assert!( session.play_stop() );
        expect_error( &rx, "Engine { step: Stop" );
        assert_eq!( session.state(), SessionState::Playing );
    }


    #[test]
    fn test_play_stop_reports_play_failure() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "once", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "once".into() ) );

        assert!( !session.play_stop() );
        assert_eq!( next( &rx ), Seen::Stopped );

        assert!( !session.play_stop() );
        expect_error( &rx, "Engine { step: Play" );
        assert_eq!( session.state(), SessionState::Stopped );
        assert_eq!( session.channel().map( |c| c.key ), Some( "once".to_string() ) );
    }


    #[test]
    fn test_resolver_premium_refusal_keeps_current() {
        let ( session, probe, rx ) = start( true, false );
        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );

        session.set_channel( channel( 9, "locked", false ) );
        assert_eq!( next( &rx ), Seen::Error( "ChannelRequiresPremium".into() ) );
        assert_quiet( &rx );

        assert_eq!( session.channel().map( |c| c.key ), Some( "dub".to_string() ) );
        assert_eq!( session.state(), SessionState::Playing );
        assert_eq!( probe.live.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_idle_volume_rejected_by_new_handle_is_reported_once() {
        let ( session, _probe, rx ) = start( true, false );
        session.set_volume( 150 );
        assert_quiet( &rx );

        session.set_channel( channel( 7, "dub", false ) );
        expect_error( &rx, "Engine { step: SetVolume" );
        assert_eq!( next( &rx ), Seen::Playing( "dub".into() ) );
        assert_quiet( &rx );
        assert_eq!( session.volume(), Some( 100 ) );
    }


    /// Signals when dropped.
    struct DropFlag( Sender<()> );


    impl Drop for DropFlag {
        fn drop( &mut self ) {
            let _ = self.0.send( () );
        }
    }


    #[test]
    fn test_close_releases_handlers_holding_the_session() {
        let ( session, _probe, _rx ) = start( true, false );
        let ( dropped_tx, dropped_rx ) = unbounded();
        let ( called_tx, called_rx ) = unbounded();

        let flag = DropFlag( dropped_tx );
        let inner = session.clone();
        session.on_playing( move |_| {
            let _flag = &flag;
            let _ = called_tx.send( inner.volume() );
        });

        session.set_channel( channel( 7, "dub", false ) );
        assert_eq!( called_rx.recv_timeout( WAIT ).unwrap(), Some( DEFAULT_VOLUME ) );

        session.close();
        assert!( dropped_rx.recv_timeout( WAIT ).is_ok(), "handler outlived the session" );
    }
}
