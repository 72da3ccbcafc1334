//! MS/TP timing parameters and the silence timer
//!
//! Every timeout in the protocol is measured against a single quantity: the
//! silence timer, the time since the last octet (or receive error) seen on the
//! wire or since this station last transmitted. The port samples the host
//! clock once per drive cycle and all state machines compare that one sample
//! against the limits in [`MstpTiming`].

use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Baud rates permitted on an MS/TP segment.
pub const SUPPORTED_BAUD_RATES: [u32; 6] = [9600, 19200, 38400, 57600, 76800, 115200];

/// Number of tokens between maintenance Poll For Master frames.
pub const NPOLL: u8 = 50;

/// Number of retries on sending the token.
pub const NRETRY_TOKEN: u8 = 1;

/// Octets that must be seen before a station counts as having used the token.
pub const NMIN_OCTETS: u8 = 4;

/// Default Tframe_abort. Silence inside a frame may not exceed 100 ms.
pub const DEFAULT_FRAME_ABORT: Duration = Duration::from_millis(95);

/// Largest Tframe_abort a port accepts.
pub const MAX_FRAME_ABORT: Duration = Duration::from_millis(100);

/// Protocol timing limits for one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MstpTiming {
    /// Maximum silence inside a frame before it is abandoned (Tframe_abort).
    pub frame_abort: Duration,
    /// Silence after which the token is considered lost (Tno_token).
    pub no_token: Duration,
    /// Wait for a reply to a Data Expecting Reply frame (Treply_timeout).
    pub reply_timeout: Duration,
    /// Time allowed to produce a reply before postponing it (Treply_delay).
    pub reply_delay: Duration,
    /// Width of the token generation slot per station address (Tslot).
    pub slot: Duration,
    /// Wait for a station to start using a passed token, or to answer a
    /// Poll For Master (Tusage_timeout).
    pub usage_timeout: Duration,
}

impl MstpTiming {
    /// Timing for a segment running at `baud_rate` bits per second.
    ///
    /// Only the frame abort time depends on the bit rate: it never drops below
    /// [`min_frame_abort`](Self::min_frame_abort). The rest are fixed by the
    /// protocol.
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        Self {
            frame_abort: DEFAULT_FRAME_ABORT.max(Self::min_frame_abort(baud_rate)),
            ..Self::default()
        }
    }

    /// Shortest usable Tframe_abort at `baud_rate`: 60 bit times, rounded up
    /// to whole milliseconds.
    pub fn min_frame_abort(baud_rate: u32) -> Duration {
        bits_to_time(baud_rate, 60)
    }

    /// Silence after which a master at `station` may generate a token.
    ///
    /// Lower addresses get earlier slots, so after a ring collapse the lowest
    /// surviving master regenerates the token first.
    pub fn token_slot(&self, station: u8) -> Duration {
        self.no_token + self.slot * station as u32
    }
}

impl Default for MstpTiming {
    fn default() -> Self {
        Self {
            frame_abort: DEFAULT_FRAME_ABORT,
            no_token: Duration::from_millis(500),
            reply_timeout: Duration::from_millis(255),
            reply_delay: Duration::from_millis(250),
            slot: Duration::from_millis(10),
            usage_timeout: Duration::from_millis(50),
        }
    }
}

/// Duration of `bits` bit times, rounded up to the next millisecond.
fn bits_to_time(baud_rate: u32, bits: u32) -> Duration {
    let baud_rate = baud_rate.max(1) as u64;
    let millis = (bits as u64 * 1000).div_ceil(baud_rate);
    Duration::from_millis(millis.max(1))
}

/// Time since the last activity on the wire.
#[derive(Debug, Clone, Copy)]
pub struct SilenceTimer {
    last_activity: Instant,
}

impl SilenceTimer {
    pub fn new(now: Instant) -> Self {
        Self { last_activity: now }
    }

    /// Restart the timer at `now`.
    pub fn reset(&mut self, now: Instant) {
        self.last_activity = now;
    }

    /// Silence elapsed at `now`.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether at least `limit` of silence has elapsed at `now`.
    pub fn expired(&self, limit: Duration, now: Instant) -> bool {
        self.elapsed(now) >= limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_abort_defaults_above_bit_time_floor() {
        assert_eq!(MstpTiming::min_frame_abort(9600), Duration::from_millis(7));
        assert_eq!(MstpTiming::min_frame_abort(38400), Duration::from_millis(2));
        assert_eq!(MstpTiming::min_frame_abort(115200), Duration::from_millis(1));

        for baud_rate in SUPPORTED_BAUD_RATES {
            assert_eq!(MstpTiming::for_baud_rate(baud_rate).frame_abort, DEFAULT_FRAME_ABORT);
        }
        assert_eq!(MstpTiming::default().frame_abort, DEFAULT_FRAME_ABORT);

        // Very slow lines keep the 60 bit floor
        assert_eq!(MstpTiming::for_baud_rate(300).frame_abort, Duration::from_millis(200));
    }

    #[test]
    fn test_token_slot() {
        let timing = MstpTiming::default();
        assert_eq!(timing.token_slot(0), Duration::from_millis(500));
        assert_eq!(timing.token_slot(3), Duration::from_millis(530));
    }

    #[test]
    fn test_silence_timer() {
        let t0 = Instant::now();
        let mut timer = SilenceTimer::new(t0);
        let limit = Duration::from_millis(20);

        let t1 = t0 + Duration::from_millis(15);
        assert_eq!(timer.elapsed(t1), Duration::from_millis(15));
        assert!(!timer.expired(limit, t1));

        let t2 = t0 + Duration::from_millis(20);
        assert!(timer.expired(limit, t2));

        timer.reset(t2);
        assert_eq!(timer.elapsed(t2), Duration::ZERO);
        // A stale sample never underflows
        assert_eq!(timer.elapsed(t1), Duration::ZERO);
    }
}
