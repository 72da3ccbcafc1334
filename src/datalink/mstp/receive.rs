//! MS/TP Receive Frame State Machine
//!
//! Reassembles one frame at a time from individual octets. The machine is
//! driven by the port once per received octet, once per receive error reported
//! by the UART, and once per drive cycle with no input so that the frame abort
//! timeout can fire. It never blocks and never fails: corrupted, truncated or
//! oversized frames end in an [`ReceiveEvent::InvalidFrame`] and a return to
//! [`ReceiveState::Idle`]. An oversized frame first passes through
//! [`ReceiveState::SkipData`] so its payload is never searched for a preamble.
//!
//! ```text
//!            0x55            0xFF              5 header octets + CRC
//!   Idle ----------> Preamble -----> Header ---------------------------> Idle (length 0)
//!    ^                  |              |                                   |
//!    |  other octet     |              +--> Data --- payload + 2 CRC ---> Idle
//!    +------------------+              |
//!                                      +--> SkipData --- length + 2 ----> Idle (too long)
//!
//!   silence > Tframe_abort, or a receive error, in any state but Idle -> Idle (invalid frame)
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::crc::{self, DATA_CRC_INIT, DATA_CRC_RESIDUE, HEADER_CRC_INIT, HEADER_CRC_RESIDUE};
use super::frame::{FrameType, MstpFrame, MSTP_MAX_DATA_LENGTH, MSTP_PREAMBLE_55, MSTP_PREAMBLE_FF};
use super::timing::SilenceTimer;
use super::MSTP_BROADCAST_ADDRESS;
use crate::datalink::{DataLinkError, Result};
use crate::util::hex_preview;

/// Receive state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveState {
    /// Waiting for the first preamble octet
    Idle,
    /// First preamble octet seen
    Preamble,
    /// Collecting the header and header CRC
    Header,
    /// Collecting the payload and data CRC
    Data,
    /// Discarding the payload and data CRC of a frame too long for the buffer
    SkipData,
}

/// One input signal from the UART.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxInput {
    /// A received octet
    Data(u8),
    /// Framing, parity or overrun error
    Error,
}

/// Why a frame was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFrameReason {
    HeaderCrc,
    DataCrc,
    /// Declared length exceeds the input buffer
    FrameTooLong,
    /// Silence exceeded Tframe_abort inside a frame
    Aborted,
    /// The UART reported an error inside a frame
    ReceiveError,
}

/// Outcome of a completed reception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveEvent {
    /// A valid frame addressed to this station or broadcast.
    ValidFrame,
    /// A valid frame addressed to some other station.
    ValidFrameNotForUs,
    /// The frame in progress was discarded.
    InvalidFrame(InvalidFrameReason),
}

/// Counters kept by the receive state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReceiveStats {
    pub octets: u64,
    pub valid_frames: u64,
    pub frames_not_for_us: u64,
    pub header_crc_errors: u64,
    pub data_crc_errors: u64,
    pub frames_too_long: u64,
    pub frame_aborts: u64,
    /// Frames cut short by a UART error.
    pub frames_receive_error: u64,
    /// UART errors in any state, including between frames.
    pub receive_errors: u64,
}

impl ReceiveStats {
    /// Frames discarded for any reason.
    pub fn invalid_frames(&self) -> u64 {
        self.header_crc_errors
            + self.data_crc_errors
            + self.frames_too_long
            + self.frame_aborts
            + self.frames_receive_error
    }
}

/// Header fields and running CRCs of the frame being received.
#[derive(Debug, Clone, Copy)]
struct FrameInProgress {
    frame_type: u8,
    destination: u8,
    source: u8,
    data_length: u16,
    header_crc: u8,
    data_crc: u16,
    index: usize,
}

impl FrameInProgress {
    fn new() -> Self {
        Self {
            frame_type: 0,
            destination: 0,
            source: 0,
            data_length: 0,
            header_crc: HEADER_CRC_INIT,
            data_crc: DATA_CRC_INIT,
            index: 0,
        }
    }
}

/// Receive frame state machine for one port.
#[derive(Debug)]
pub struct ReceiveFsm {
    state: ReceiveState,
    this_station: u8,
    frame_abort: Duration,
    silence: SilenceTimer,
    scratch: FrameInProgress,
    input: Vec<u8>,
    capacity: usize,
    frame: Option<MstpFrame>,
    event: Option<ReceiveEvent>,
    event_count: u8,
    stats: ReceiveStats,
}

impl ReceiveFsm {
    /// Create a receiver for `this_station` whose input buffer holds
    /// `capacity` payload octets.
    pub fn new(this_station: u8, capacity: usize, frame_abort: Duration, now: Instant) -> Self {
        Self {
            state: ReceiveState::Idle,
            this_station,
            frame_abort,
            silence: SilenceTimer::new(now),
            scratch: FrameInProgress::new(),
            input: Vec::with_capacity(capacity),
            capacity,
            frame: None,
            event: None,
            event_count: 0,
            stats: ReceiveStats::default(),
        }
    }

    /// Advance the machine by one input (or by elapsed time only, when
    /// `input` is `None`).
    ///
    /// Returns the event completed by this step, which is also latched until
    /// [`take_event`](Self::take_event) is called.
    pub fn step(&mut self, input: Option<RxInput>, now: Instant) -> Option<ReceiveEvent> {
        let mut event = None;

        if self.state != ReceiveState::Idle && self.silence.elapsed(now) > self.frame_abort {
            debug!(
                "Receive: frame abort after {:?} of silence in {:?}",
                self.silence.elapsed(now),
                self.state
            );
            event = self.abandon(InvalidFrameReason::Aborted);
        }

        match input {
            Some(RxInput::Error) => {
                self.silence.reset(now);
                self.count_event();
                self.stats.receive_errors += 1;
                if self.state != ReceiveState::Idle {
                    event = self.abandon(InvalidFrameReason::ReceiveError);
                }
            }
            Some(RxInput::Data(byte)) => {
                self.silence.reset(now);
                self.count_event();
                self.stats.octets += 1;
                if let Some(completed) = self.on_octet(byte) {
                    event = Some(completed);
                }
            }
            None => {}
        }

        if event.is_some() {
            self.event = event;
        }
        event
    }

    fn on_octet(&mut self, byte: u8) -> Option<ReceiveEvent> {
        match self.state {
            ReceiveState::Idle => {
                if byte == MSTP_PREAMBLE_55 {
                    self.state = ReceiveState::Preamble;
                }
                None
            }
            ReceiveState::Preamble => {
                match byte {
                    MSTP_PREAMBLE_FF => {
                        self.scratch = FrameInProgress::new();
                        self.state = ReceiveState::Header;
                    }
                    // Repeated first preamble octet
                    MSTP_PREAMBLE_55 => {}
                    _ => self.state = ReceiveState::Idle,
                }
                None
            }
            ReceiveState::Header => self.on_header_octet(byte),
            ReceiveState::Data => self.on_data_octet(byte),
            ReceiveState::SkipData => {
                self.scratch.index += 1;
                if self.scratch.index >= self.scratch.data_length as usize + 2 {
                    self.state = ReceiveState::Idle;
                }
                None
            }
        }
    }

    fn on_header_octet(&mut self, byte: u8) -> Option<ReceiveEvent> {
        self.scratch.header_crc = crc::header_crc(byte, self.scratch.header_crc);

        match self.scratch.index {
            0 => self.scratch.frame_type = byte,
            1 => self.scratch.destination = byte,
            2 => self.scratch.source = byte,
            3 => self.scratch.data_length = (byte as u16) << 8,
            4 => self.scratch.data_length |= byte as u16,
            _ => return self.on_header_crc(),
        }
        self.scratch.index += 1;
        None
    }

    fn on_header_crc(&mut self) -> Option<ReceiveEvent> {
        if self.scratch.header_crc != HEADER_CRC_RESIDUE {
            return Some(self.invalidate(InvalidFrameReason::HeaderCrc));
        }

        let length = self.scratch.data_length as usize;
        if length == 0 {
            self.state = ReceiveState::Idle;
            return Some(self.complete());
        }
        if length > self.capacity {
            debug!(
                "Receive: frame from {} declares {} octets, buffer holds {}",
                self.scratch.source, length, self.capacity
            );
            let event = self.invalidate(InvalidFrameReason::FrameTooLong);
            self.scratch.index = 0;
            self.state = ReceiveState::SkipData;
            return Some(event);
        }

        self.scratch.index = 0;
        self.scratch.data_crc = DATA_CRC_INIT;
        self.input.clear();
        self.state = ReceiveState::Data;
        None
    }

    fn on_data_octet(&mut self, byte: u8) -> Option<ReceiveEvent> {
        let length = self.scratch.data_length as usize;
        self.scratch.data_crc = crc::data_crc(byte, self.scratch.data_crc);

        if self.scratch.index < length {
            self.input.push(byte);
        }
        self.scratch.index += 1;
        if self.scratch.index < length + 2 {
            return None;
        }

        if self.scratch.data_crc == DATA_CRC_RESIDUE {
            self.state = ReceiveState::Idle;
            Some(self.complete())
        } else {
            Some(self.invalidate(InvalidFrameReason::DataCrc))
        }
    }

    fn complete(&mut self) -> ReceiveEvent {
        let data = if self.scratch.data_length > 0 {
            Bytes::copy_from_slice(&self.input)
        } else {
            Bytes::new()
        };
        let frame = MstpFrame {
            frame_type: FrameType::from(self.scratch.frame_type),
            destination: self.scratch.destination,
            source: self.scratch.source,
            data,
        };
        trace!(
            "Receive: {} {} -> {} [{}]",
            frame.frame_type,
            frame.source,
            frame.destination,
            hex_preview(&frame.data, 16)
        );
        self.frame = Some(frame);
        self.stats.valid_frames += 1;

        if self.scratch.destination == self.this_station
            || self.scratch.destination == MSTP_BROADCAST_ADDRESS
        {
            ReceiveEvent::ValidFrame
        } else {
            self.stats.frames_not_for_us += 1;
            ReceiveEvent::ValidFrameNotForUs
        }
    }

    fn invalidate(&mut self, reason: InvalidFrameReason) -> ReceiveEvent {
        match reason {
            InvalidFrameReason::HeaderCrc => self.stats.header_crc_errors += 1,
            InvalidFrameReason::DataCrc => self.stats.data_crc_errors += 1,
            InvalidFrameReason::FrameTooLong => self.stats.frames_too_long += 1,
            InvalidFrameReason::Aborted => self.stats.frame_aborts += 1,
            InvalidFrameReason::ReceiveError => self.stats.frames_receive_error += 1,
        }
        trace!("Receive: invalid frame ({:?}) in {:?}", reason, self.state);
        self.state = ReceiveState::Idle;
        ReceiveEvent::InvalidFrame(reason)
    }

    /// Drop the frame in progress after a timeout or UART error. An oversized
    /// frame was already reported when its header arrived.
    fn abandon(&mut self, reason: InvalidFrameReason) -> Option<ReceiveEvent> {
        if self.state == ReceiveState::SkipData {
            self.state = ReceiveState::Idle;
            return None;
        }
        Some(self.invalidate(reason))
    }

    fn count_event(&mut self) {
        self.event_count = self.event_count.saturating_add(1);
    }

    /// Current state.
    pub fn state(&self) -> ReceiveState {
        self.state
    }

    /// Station whose frames are reported as [`ReceiveEvent::ValidFrame`].
    pub fn this_station(&self) -> u8 {
        self.this_station
    }

    pub fn set_this_station(&mut self, station: u8) {
        self.this_station = station;
    }

    /// Payload capacity of the input buffer.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Octets and receive errors seen since the last reset (saturates at 255).
    pub fn event_count(&self) -> u8 {
        self.event_count
    }

    pub fn reset_event_count(&mut self) {
        self.event_count = 0;
    }

    /// Silence observed at `now`.
    pub fn silence(&self, now: Instant) -> Duration {
        self.silence.elapsed(now)
    }

    /// The silence timer, for comparisons against protocol limits.
    pub fn silence_timer(&self) -> &SilenceTimer {
        &self.silence
    }

    /// Restart the silence timer; called when this station transmits.
    pub fn reset_silence(&mut self, now: Instant) {
        self.silence.reset(now);
    }

    /// Running header CRC register of the frame in progress.
    pub fn header_crc(&self) -> u8 {
        self.scratch.header_crc
    }

    /// Running data CRC register of the frame in progress.
    pub fn data_crc(&self) -> u16 {
        self.scratch.data_crc
    }

    /// Octet index within the header or data of the frame in progress.
    pub fn index(&self) -> usize {
        self.scratch.index
    }

    /// Declared data length of the frame in progress.
    pub fn data_length(&self) -> u16 {
        self.scratch.data_length
    }

    /// The last valid frame received, until another one replaces it.
    pub fn frame(&self) -> Option<&MstpFrame> {
        self.frame.as_ref()
    }

    /// Whether the latched event is a valid frame (for us or not).
    pub fn received_valid_frame(&self) -> bool {
        matches!(
            self.event,
            Some(ReceiveEvent::ValidFrame) | Some(ReceiveEvent::ValidFrameNotForUs)
        )
    }

    /// Whether the latched event is an invalid frame.
    pub fn received_invalid_frame(&self) -> bool {
        matches!(self.event, Some(ReceiveEvent::InvalidFrame(_)))
    }

    /// The latched event, without clearing it.
    pub fn event(&self) -> Option<ReceiveEvent> {
        self.event
    }

    /// Consume the latched event.
    pub fn take_event(&mut self) -> Option<ReceiveEvent> {
        self.event.take()
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }
}

/// Decode a single frame from a buffer.
///
/// The buffer is fed through a receive state machine exactly as if it arrived
/// on the wire, so noise before the preamble is skipped. The frame must end
/// at the end of the buffer.
///
/// # Errors
///
/// - [`DataLinkError::CrcError`] for a header or data CRC mismatch
/// - [`DataLinkError::InvalidFrame`] for an oversized, truncated or padded frame
pub fn decode_frame(data: &[u8]) -> Result<MstpFrame> {
    let now = Instant::now();
    let mut fsm = ReceiveFsm::new(MSTP_BROADCAST_ADDRESS, MSTP_MAX_DATA_LENGTH, Duration::MAX, now);

    for (position, &byte) in data.iter().enumerate() {
        match fsm.step(Some(RxInput::Data(byte)), now) {
            Some(ReceiveEvent::ValidFrame) | Some(ReceiveEvent::ValidFrameNotForUs) => {
                if position + 1 != data.len() {
                    return Err(DataLinkError::InvalidFrame);
                }
                return fsm.frame.take().ok_or(DataLinkError::InvalidFrame);
            }
            Some(ReceiveEvent::InvalidFrame(
                InvalidFrameReason::HeaderCrc | InvalidFrameReason::DataCrc,
            )) => return Err(DataLinkError::CrcError),
            Some(ReceiveEvent::InvalidFrame(_)) => return Err(DataLinkError::InvalidFrame),
            None => {}
        }
    }

    Err(DataLinkError::InvalidFrame)
}
