//! Audio output via cpal
//!
//! Sends decoded PCM samples to the system audio device.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicI32, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };

use crate::engine::EngineError;


/// Queue between the decoding thread and the audio callback.
///
/// Converts the source channel layout to the device layout on the way out
/// and applies the shared volume percentage.
pub struct SampleQueue {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    volume: Arc<AtomicI32>,
    source_channels: usize,
    output_channels: usize,
}


impl SampleQueue {
    /// Creates a queue holding at most `capacity` source samples.
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16, volume: Arc<AtomicI32> ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            volume,
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    fn buffer( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( PoisonError::into_inner )
    }


    /// Queues as many samples as fit. Returns the number queued.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut buf = self.buffer();
        let to_push = samples.len().min( self.capacity.saturating_sub( buf.len() ) );
        buf.extend( &samples[ ..to_push ] );
        to_push
    }


    /// Fills `output` with whole frames, padding with silence.
    /// Returns the number of output samples carrying audio.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        let gain = self.volume.load( Ordering::Relaxed ).clamp( 0, 100 ) as f32 / 100.0;
        let src_ch = self.source_channels;
        let out_ch = self.output_channels;

        let mut buf = self.buffer();
        let frames = ( output.len() / out_ch ).min( buf.len() / src_ch );
        let mut frame = vec![ 0.0f32; src_ch ];

        for out_frame in output.chunks_exact_mut( out_ch ).take( frames ) {
            for ( slot, sample ) in frame.iter_mut().zip( buf.drain( ..src_ch ) ) {
                *slot = sample;
            }

            if out_ch == 1 && src_ch > 1 {
                out_frame[ 0 ] = frame.iter().sum::<f32>() / src_ch as f32 * gain;
            } else {
                // Extra output channels repeat the last source channel.
                for ( ch, slot ) in out_frame.iter_mut().enumerate() {
                    *slot = frame[ ch.min( src_ch - 1 ) ] * gain;
                }
            }
        }
        drop( buf );

        let written = frames * out_ch;
        output[ written.. ].fill( 0.0 );
        written
    }


    /// Number of queued source samples.
    pub fn len( &self ) -> usize {
        self.buffer().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.buffer().is_empty()
    }
}


/// An open output stream on the default device.
///
/// Not `Send` (cpal streams are tied to their thread); keep it on the
/// thread that created it.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}


impl AudioOutput {
    /// Opens the default device, preferring a config that matches the source.
    ///
    /// Returns the output and the queue the caller should feed. When the
    /// device runs at a different rate the caller must resample to
    /// [`AudioOutput::sample_rate`].
    pub fn new(
        source_sample_rate: u32,
        source_channels: u16,
        volume: Arc<AtomicI32>,
    ) -> Result<( Self, Arc<SampleQueue> ), EngineError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or( EngineError::NoDevice )?;

        tracing::info!( "Using output device: {:?}", device.name() );

        let supported: Vec<_> = device
            .supported_output_configs()
            .map_err( |e| EngineError::Output( e.to_string() ) )?
            .collect();

        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate().0 <= source_sample_rate && c.max_sample_rate().0 >= source_sample_rate
        };

        let config = match supported
            .iter()
            .find( |c| c.channels() == source_channels && supports_rate( c ) )
            .or_else( || supported.iter().find( |c| supports_rate( c ) ) )
        {
            Some( range ) => range.clone().with_sample_rate( cpal::SampleRate( source_sample_rate ) ).config(),
            None => {
                let default = device
                    .default_output_config()
                    .map_err( |e| EngineError::Output( e.to_string() ) )?;
                tracing::info!(
                    "Device does not support {} Hz, using {} Hz",
                    source_sample_rate,
                    default.sample_rate().0
                );
                default.config()
            }
        };

        tracing::info!( "Audio output config: {} Hz, {} channels", config.sample_rate.0, config.channels );

        // About half a second of audio.
        let capacity = config.sample_rate.0 as usize * source_channels as usize / 2;
        let queue = Arc::new( SampleQueue::new( capacity, source_channels, config.channels, volume ) );
        let callback_queue = Arc::clone( &queue );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_queue.pop( data );
                },
                |err| tracing::error!( "Audio output error: {}", err ),
                None,
            )
            .map_err( |e| EngineError::Output( e.to_string() ) )?;

        Ok((
            Self {
                stream,
                sample_rate: config.sample_rate.0,
                channels: config.channels,
            },
            queue,
        ))
    }


    pub fn play( &self ) -> Result<(), EngineError> {
        self.stream.play().map_err( |e| EngineError::Output( e.to_string() ) )
    }


    /// The rate the device runs at.
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn queue( src: u16, out: u16, volume: i32 ) -> SampleQueue {
        SampleQueue::new( 8, src, out, Arc::new( AtomicI32::new( volume ) ) )
    }


    #[test]
    fn test_push_respects_capacity() {
        let q = queue( 2, 2, 100 );

        assert_eq!( q.push( &[ 0.1; 6 ] ), 6 );
        assert_eq!( q.push( &[ 0.1; 6 ] ), 2 );
        assert_eq!( q.len(), 8 );
    }


    #[test]
    fn test_pop_pads_with_silence() {
        let q = queue( 2, 2, 100 );
        q.push( &[ 0.5, -0.5 ] );

        let mut out = [ 1.0f32; 4 ];
        assert_eq!( q.pop( &mut out ), 2 );
        assert_eq!( out, [ 0.5, -0.5, 0.0, 0.0 ] );
        assert!( q.is_empty() );
    }


    #[test]
    fn test_pop_mono_to_stereo() {
        let q = queue( 1, 2, 100 );
        q.push( &[ 0.25, 0.75 ] );

        let mut out = [ 0.0f32; 4 ];
        assert_eq!( q.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.25, 0.25, 0.75, 0.75 ] );
    }


    #[test]
    fn test_pop_stereo_to_mono() {
        let q = queue( 2, 1, 100 );
        q.push( &[ 0.2, 0.4, 1.0, 0.0 ] );

        let mut out = [ 0.0f32; 2 ];
        assert_eq!( q.pop( &mut out ), 2 );
        assert!( ( out[ 0 ] - 0.3 ).abs() < 1e-6 );
        assert!( ( out[ 1 ] - 0.5 ).abs() < 1e-6 );
    }


    #[test]
    fn test_pop_applies_volume() {
        let volume = Arc::new( AtomicI32::new( 50 ) );
        let q = SampleQueue::new( 8, 1, 1, Arc::clone( &volume ) );
        q.push( &[ 0.8, 0.8 ] );

        let mut out = [ 0.0f32; 1 ];
        q.pop( &mut out );
        assert!( ( out[ 0 ] - 0.4 ).abs() < 1e-6 );

        volume.store( 0, Ordering::Relaxed );
        q.pop( &mut out );
        assert_eq!( out[ 0 ], 0.0 );
    }
}
