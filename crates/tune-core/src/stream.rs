//! HTTP stream playback engine
//!
//! [`StreamEngine`] is the production [`MediaEngine`]. Each playing handle
//! owns one worker thread that connects to the stream, strips ICY metadata,
//! decodes, resamples to the device rate and feeds the cpal output.

use std::sync::atomic::{ AtomicBool, AtomicI32, Ordering };
use std::sync::{ Arc, Mutex, PoisonError };
use std::thread::{ self, JoinHandle };
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::decoder::Decoder;
use crate::engine::{ check_volume, EngineError, EngineEvent, EventSink, MediaEngine, MediaHandle };
use crate::icy::{ IcyReader, ICY_METADATA_HEADER, ICY_METAINT_HEADER };
use crate::output::{ AudioOutput, SampleQueue };


const USER_AGENT: &str = concat!( "tune/", env!( "CARGO_PKG_VERSION" ) );

const CONNECT_TIMEOUT: Duration = Duration::from_secs( 10 );

/// Resampler output chunk, in frames.
const RESAMPLE_CHUNK: usize = 1024;


/// Plays HTTP audio streams on the default output device.
pub struct StreamEngine {
    http: Client,
}


impl StreamEngine {
    /// Checks for an output device and prepares the HTTP client.
    pub fn new() -> Result<Self, EngineError> {
        use cpal::traits::HostTrait;

        if cpal::default_host().default_output_device().is_none() {
            return Err( EngineError::NoDevice );
        }

        let http = Client::builder()
            .user_agent( USER_AGENT )
            .connect_timeout( CONNECT_TIMEOUT )
            // Streams never finish; only the connect phase is bounded.
            .timeout( None::<Duration> )
            .build()
            .map_err( |e| EngineError::Init( e.to_string() ) )?;

        Ok( Self { http } )
    }
}


impl MediaEngine for StreamEngine {
    type Handle = StreamHandle;


    fn open( &mut self, url: &str, events: EventSink ) -> Result<StreamHandle, EngineError> {
        let parsed = Url::parse( url ).map_err( |e| EngineError::InvalidUrl( format!( "{}: {}", url, e ) ) )?;
        if !matches!( parsed.scheme(), "http" | "https" ) {
            return Err( EngineError::InvalidUrl( url.to_string() ) );
        }

        Ok( StreamHandle {
            http: self.http.clone(),
            url: url.to_string(),
            events,
            volume: Arc::new( AtomicI32::new( 100 ) ),
            worker: None,
        })
    }
}


/// Coordination between a handle and its worker thread.
#[derive( Default )]
struct Control {
    /// Set under the lock so no event escapes after `stop()` returns.
    stopped: Mutex<bool>,
    /// Audio is flowing.
    live: AtomicBool,
    /// Last title seen, held back until audio flows.
    title: Mutex<Option<Option<String>>>,
}


impl Control {
    fn is_stopped( &self ) -> bool {
        *self.stopped.lock().unwrap_or_else( PoisonError::into_inner )
    }


    fn stop( &self ) {
        *self.stopped.lock().unwrap_or_else( PoisonError::into_inner ) = true;
    }


    fn emit( &self, events: &EventSink, event: EngineEvent ) {
        let stopped = self.stopped.lock().unwrap_or_else( PoisonError::into_inner );
        if !*stopped {
            events.emit( event );
        }
    }


    fn title_changed( &self, events: &EventSink, title: Option<&str> ) {
        let title = title.map( str::to_string );
        *self.title.lock().unwrap_or_else( PoisonError::into_inner ) = Some( title.clone() );
        if self.live.load( Ordering::SeqCst ) {
            self.emit( events, EngineEvent::TitleChanged( title ) );
        }
    }


    fn go_live( &self, events: &EventSink ) {
        self.live.store( true, Ordering::SeqCst );
        self.emit( events, EngineEvent::Playing );

        let pending = self.title.lock().unwrap_or_else( PoisonError::into_inner ).clone();
        if let Some( title ) = pending {
            self.emit( events, EngineEvent::TitleChanged( title ) );
        }
    }
}


struct Worker {
    control: Arc<Control>,
    thread: JoinHandle<()>,
}


/// One opened stream URL.
pub struct StreamHandle {
    http: Client,
    url: String,
    events: EventSink,
    /// Percentage read by the audio callback.
    volume: Arc<AtomicI32>,
    worker: Option<Worker>,
}


impl StreamHandle {
    /// Signals the worker to stop. It is detached, not joined, since it
    /// may be blocked on the network.
    fn halt( &mut self ) -> bool {
        match self.worker.take() {
            Some( worker ) => {
                worker.control.stop();
                true
            }
            None => false,
        }
    }
}


impl MediaHandle for StreamHandle {
    fn play( &mut self ) -> Result<(), EngineError> {
        if self.is_playing() {
            return Ok(());
        }
        self.halt();

        let control = Arc::new( Control::default() );
        let worker_control = Arc::clone( &control );
        let http = self.http.clone();
        let url = self.url.clone();
        let volume = Arc::clone( &self.volume );
        let events = self.events.clone();

        let thread = thread::Builder::new()
            .name( "tune-stream".into() )
            .spawn( move || run_stream( http, url, volume, worker_control, events ) )
            .map_err( |e| EngineError::Init( e.to_string() ) )?;

        tracing::debug!( "Started stream worker for {}", self.url );
        self.worker = Some( Worker { control, thread } );
        Ok(())
    }


    fn stop( &mut self ) -> Result<(), EngineError> {
        if self.halt() {
            tracing::debug!( "Stopped stream {}", self.url );
            self.events.emit( EngineEvent::Stopped );
        }
        Ok(())
    }


    fn is_playing( &self ) -> bool {
        self.worker
            .as_ref()
            .is_some_and( |w| !w.thread.is_finished() && !w.control.is_stopped() )
    }


    fn set_volume( &mut self, volume: i32 ) -> Result<(), EngineError> {
        self.volume.store( check_volume( volume )?, Ordering::Relaxed );
        Ok(())
    }


    fn volume( &self ) -> Result<i32, EngineError> {
        Ok( self.volume.load( Ordering::Relaxed ) )
    }
}


impl Drop for StreamHandle {
    fn drop( &mut self ) {
        self.halt();
    }
}


/// Worker thread body. Reports how the stream ended unless stopped.
fn run_stream( http: Client, url: String, volume: Arc<AtomicI32>, control: Arc<Control>, events: EventSink ) {
    match stream( &http, &url, volume, &control, &events ) {
        Ok(()) => tracing::info!( "Stream {} ended", url ),
        Err( e ) => {
            tracing::warn!( "Stream {} failed: {}", url, e );
            control.emit( &events, EngineEvent::Error( e ) );
        }
    }
    control.emit( &events, EngineEvent::Stopped );
}


fn stream(
    http: &Client,
    url: &str,
    volume: Arc<AtomicI32>,
    control: &Arc<Control>,
    events: &EventSink,
) -> Result<(), EngineError> {
    let response = http
        .get( url )
        .header( ICY_METADATA_HEADER, "1" )
        .send()
        .map_err( |e| EngineError::Open( e.to_string() ) )?;

    let status = response.status();
    if !status.is_success() {
        return Err( EngineError::Open( format!( "HTTP {} from {}", status, url ) ) );
    }

    let header = |name: &str| response.headers().get( name ).and_then( |v| v.to_str().ok() ).map( str::to_string );
    let content_type = header( CONTENT_TYPE.as_str() );
    let metaint = header( ICY_METAINT_HEADER ).and_then( |v| v.parse().ok() ).unwrap_or( 0 );
    tracing::debug!( "Connected to {} ({:?}, metaint {})", url, content_type, metaint );

    let title_control = Arc::clone( control );
    let title_events = events.clone();
    let reader = IcyReader::new( response, metaint, move |title| {
        title_control.title_changed( &title_events, title );
    });

    let mut decoder = Decoder::open( reader, content_type.as_deref() )
        .map_err( |e| EngineError::Open( e.to_string() ) )?;
    let channels = decoder.channels();

    let ( output, queue ) = AudioOutput::new( decoder.sample_rate(), channels as u16, volume )?;
    let mut resampler = if decoder.sample_rate() != output.sample_rate() {
        tracing::info!( "Resampling: {} Hz → {} Hz", decoder.sample_rate(), output.sample_rate() );
        Some( Resample::new( decoder.sample_rate(), output.sample_rate(), channels )? )
    } else {
        None
    };
    output.play()?;

    // Keep about 100ms decoded ahead.
    let target = ( output.sample_rate() as usize * channels ) / 10;

    loop {
        if control.is_stopped() {
            return Ok(());
        }

        if queue.len() > target {
            thread::sleep( Duration::from_millis( 5 ) );
            continue;
        }

        let Some( samples ) = decoder.decode_next().map_err( |e| EngineError::Stream( e.to_string() ) )? else {
            return Ok(());
        };

        let samples = match resampler.as_mut() {
            Some( resampler ) => resampler.process( &samples )?,
            None => samples,
        };
        push_all( &queue, &samples, control );

        if !control.live.load( Ordering::SeqCst ) && !queue.is_empty() {
            control.go_live( events );
        }
    }
}


/// Pushes every sample, waiting for room in the queue.
fn push_all( queue: &SampleQueue, samples: &[f32], control: &Control ) {
    let mut offset = 0;
    while offset < samples.len() && !control.is_stopped() {
        let pushed = queue.push( &samples[ offset.. ] );
        offset += pushed;
        if pushed == 0 {
            thread::sleep( Duration::from_millis( 5 ) );
        }
    }
}


/// Sample rate converter fed with arbitrary sized interleaved chunks.
struct Resample {
    resampler: FastFixedOut<f32>,
    /// Planar input waiting for a full resampler chunk.
    pending: Vec<Vec<f32>>,
}


impl Resample {
    fn new( from: u32, to: u32, channels: usize ) -> Result<Self, EngineError> {
        let resampler = FastFixedOut::<f32>::new(
            to as f64 / from as f64,
            2.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        ).map_err( |e| EngineError::Output( format!( "Failed to create resampler: {}", e ) ) )?;

        Ok( Self {
            resampler,
            pending: vec![ Vec::new(); channels ],
        })
    }


    fn process( &mut self, samples: &[f32] ) -> Result<Vec<f32>, EngineError> {
        let channels = self.pending.len();
        for frame in samples.chunks_exact( channels ) {
            for ( pending, sample ) in self.pending.iter_mut().zip( frame ) {
                pending.push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.resampler.input_frames_next() {
            let needed = self.resampler.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending
                .iter_mut()
                .map( |ch| ch.drain( ..needed ).collect() )
                .collect();

            let resampled = self.resampler
                .process( &chunk, None )
                .map_err( |e| EngineError::Stream( format!( "Resample error: {}", e ) ) )?;
            out.extend( interleave( &resampled ) );
        }

        Ok( out )
    }
}


/// [[L0, L1, ...], [R0, R1, ...]] → [L0, R0, L1, R1, ...]
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map_or( 0, Vec::len );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        out.extend( channels.iter().map( |ch| ch[ f ] ) );
    }
    out
}


#[cfg( test )]
mod tests {
    use super::*;


    fn handle() -> StreamHandle {
        StreamHandle {
            http: Client::new(),
            url: "http://127.0.0.1:9/none".into(),
            events: EventSink::new( |_| {} ),
            volume: Arc::new( AtomicI32::new( 100 ) ),
            worker: None,
        }
    }


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ 10.0, 20.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, 10.0, 2.0, 20.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_resample_changes_length_by_ratio() {
        let mut resample = Resample::new( 22050, 44100, 2 ).unwrap();

        let input = vec![ 0.0f32; 2 * 22050 ];
        let out = resample.process( &input ).unwrap();

        assert_eq!( out.len() % 2, 0 );
        // Whole output chunks only; the rest stays pending.
        assert!( out.len() / 2 >= 44100 - 2 * RESAMPLE_CHUNK, "got {} frames", out.len() / 2 );
        assert!( out.len() / 2 <= 44100 );
    }


    #[test]
    fn test_handle_volume_is_validated() {
        let mut handle = handle();

        handle.set_volume( 30 ).unwrap();
        assert_eq!( handle.volume(), Ok( 30 ) );
        assert_eq!( handle.set_volume( 101 ), Err( EngineError::VolumeOutOfRange( 101 ) ) );
        assert_eq!( handle.set_volume( -1 ), Err( EngineError::VolumeOutOfRange( -1 ) ) );
        assert_eq!( handle.volume(), Ok( 30 ) );
    }


    #[test]
    fn test_stop_without_play_is_silent() {
        let ( tx, rx ) = crossbeam_channel::unbounded();
        let mut handle = handle();
        handle.events = EventSink::new( move |e| { let _ = tx.send( e ); } );

        assert!( !handle.is_playing() );
        handle.stop().unwrap();
        assert!( rx.try_recv().is_err() );
    }


    #[test]
    fn test_control_holds_title_until_live() {
        let ( tx, rx ) = crossbeam_channel::unbounded();
        let events = EventSink::new( move |e| { let _ = tx.send( e ); } );
        let control = Control::default();

        control.title_changed( &events, Some( "Early" ) );
        assert!( rx.try_recv().is_err() );

        control.go_live( &events );
        assert_eq!( rx.try_recv(), Ok( EngineEvent::Playing ) );
        assert_eq!( rx.try_recv(), Ok( EngineEvent::TitleChanged( Some( "Early".into() ) ) ) );

        control.stop();
        control.title_changed( &events, Some( "Late" ) );
        assert!( rx.try_recv().is_err() );
    }
}
