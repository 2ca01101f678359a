//! Drift clock
//!
//! Estimates server time without querying the server again: seeded once
//! from the API's ping response, then advanced by one second on every tick
//! of a local one-second ticker. The value lives on its own thread and is
//! read through request/reply like the session.
//!
//! Ticks the thread cannot take in time are dropped rather than coalesced,
//! so the estimate can fall behind under heavy load. It never resyncs.

use std::thread;
use std::time::Duration;

use chrono::{ DateTime, TimeDelta, Utc };
use crossbeam_channel::{ bounded, select, tick, unbounded, Receiver, Sender };


const TICK: Duration = Duration::from_secs( 1 );


/// Handle to a running drift clock. Clones share the same clock; the
/// thread exits once every handle is dropped.
#[derive( Debug, Clone )]
pub struct DriftClock {
    requests: Sender<Sender<DateTime<Utc>>>,
}


impl DriftClock {
    /// Starts a clock at `initial`.
    pub fn new( initial: DateTime<Utc> ) -> Self {
        let ( requests, inbox ) = unbounded();
        thread::spawn( move || run( initial, inbox ) );

        tracing::debug!( "Drift clock seeded at {}", initial );
        Self { requests }
    }


    /// The current time estimate.
    pub fn now( &self ) -> DateTime<Utc> {
        let ( reply_tx, reply_rx ) = bounded( 1 );
        self.requests.send( reply_tx ).expect( "clock thread exited" );
        reply_rx.recv().expect( "clock thread exited" )
    }
}


fn run( mut now: DateTime<Utc>, inbox: Receiver<Sender<DateTime<Utc>>> ) {
    let ticker = tick( TICK );
    let step = TimeDelta::seconds( 1 );

    loop {
        select! {
            recv( ticker ) -> _ => now += step,
            recv( inbox ) -> request => match request {
                Ok( reply ) => {
                    let _ = reply.send( now );
                }
                Err( _ ) => break,
            },
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use chrono::TimeZone;


    fn seed() -> DateTime<Utc> {
        Utc.with_ymd_and_hms( 2024, 5, 1, 12, 0, 0 ).unwrap()
    }


    #[test]
    fn test_starts_at_seed() {
        let clock = DriftClock::new( seed() );
        assert_eq!( clock.now(), seed() );
    }


    #[test]
    fn test_advances_after_a_second() {
        let clock = DriftClock::new( seed() );

        thread::sleep( Duration::from_millis( 1_300 ) );

        let now = clock.now();
        assert!( now > seed() );
        assert_eq!( ( now - seed() ).num_milliseconds() % 1_000, 0 );
    }


    #[test]
    fn test_never_goes_backwards() {
        let clock = DriftClock::new( seed() );
        let other = clock.clone();

        let reader = thread::spawn( move || {
            let mut last = other.now();
            for _ in 0..200 {
                let now = other.now();
                assert!( now >= last );
                last = now;
                thread::sleep( Duration::from_millis( 6 ) );
            }
        });

        let mut last = clock.now();
        for _ in 0..200 {
            let now = clock.now();
            assert!( now >= last );
            last = now;
            thread::sleep( Duration::from_millis( 6 ) );
        }

        reader.join().unwrap();
    }
}
