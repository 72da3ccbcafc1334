//! MS/TP Master Node State Machine
//!
//! A master holds the token for a bounded number of frames, then hands it to
//! its successor (the next master address that answered a Poll For Master).
//! Every Npoll token passes it polls one address in the gap before its
//! successor so that new masters can join. If the successor stops using the
//! token, it is dropped and a new one is searched for. If the wire stays silent
//! for Tno_token, the token is considered lost and the master with the lowest
//! address regenerates it after its slot.
//!
//! ```text
//!  Initialize -> Idle --token--> UseToken --expects reply--> WaitForReply
//!                 |  ^              |                             |
//!                 |  |              v                             v
//!                 |  +-------- PassToken <----- DoneWithToken <---+
//!                 |                 |             |      ^
//!        no token |                 v             v      |
//!                 +--> NoToken   PollForMaster ---+------+
//!
//!  Idle --data expecting reply--> AnswerDataRequest --> Idle
//! ```

use log::{debug, info, trace, warn};

use super::config::MstpConfig;
use super::frame::{FrameType, MstpFrame};
use super::port::NodeIo;
use super::receive::ReceiveEvent;
use super::timing::{MstpTiming, NMIN_OCTETS};

/// Master node states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Initialize,
    Idle,
    UseToken,
    WaitForReply,
    DoneWithToken,
    PassToken,
    NoToken,
    PollForMaster,
    AnswerDataRequest,
}

/// Master node state machine and the ring state it maintains.
#[derive(Debug)]
pub struct MasterFsm {
    state: MasterState,
    this_station: u8,
    next_station: u8,
    poll_station: u8,
    token_source: Option<u8>,
    token_count: u8,
    frame_count: u8,
    retry_count: u8,
    sole_master: bool,
    max_master: u8,
    max_info_frames: u8,
    npoll: u8,
    nretry_token: u8,
    timing: MstpTiming,
    request: Option<MstpFrame>,
}

impl MasterFsm {
    pub fn new(config: &MstpConfig) -> Self {
        Self {
            state: MasterState::Initialize,
            this_station: config.station_address,
            next_station: config.station_address,
            poll_station: config.station_address,
            token_source: None,
            token_count: 0,
            frame_count: 0,
            retry_count: 0,
            sole_master: false,
            max_master: config.max_master,
            max_info_frames: config.max_info_frames,
            npoll: config.npoll,
            nretry_token: config.nretry_token,
            timing: config.timing,
            request: None,
        }
    }

    /// Take `station` as this station's address and act as token holder.
    pub(crate) fn start_with_token(&mut self, station: u8) {
        self.this_station = station;
        self.next_station = station;
        self.poll_station = station;
        self.token_source = None;
        self.token_count = 0;
        self.frame_count = 0;
        self.retry_count = 0;
        self.sole_master = false;
        self.set_state(MasterState::UseToken);
    }

    /// Run one transition. Returns `true` when the next state should run
    /// immediately, without waiting for input or time.
    pub(crate) fn step(&mut self, io: &mut NodeIo<'_>) -> bool {
        match self.state {
            MasterState::Initialize => {
                self.next_station = self.this_station;
                self.poll_station = self.this_station;
                self.token_source = None;
                self.token_count = self.npoll;
                self.sole_master = false;
                io.receiver.reset_event_count();
                self.set_state(MasterState::Idle);
                true
            }
            MasterState::Idle => self.idle(io),
            MasterState::UseToken => self.use_token(io),
            MasterState::WaitForReply => self.wait_for_reply(io),
            MasterState::DoneWithToken => self.done_with_token(io),
            MasterState::PassToken => self.pass_token(io),
            MasterState::NoToken => self.no_token(io),
            MasterState::PollForMaster => self.poll_for_master(io),
            MasterState::AnswerDataRequest => self.answer_data_request(io),
        }
    }

    fn idle(&mut self, io: &mut NodeIo<'_>) -> bool {
        match io.take_event() {
            Some((ReceiveEvent::ValidFrame, Some(frame))) => self.idle_frame(frame, io),
            Some(_) => false,
            None => {
                if io.expired(self.timing.no_token) {
                    warn!(
                        "MS/TP {}: no token seen for {:?}",
                        self.this_station,
                        io.silence()
                    );
                    io.stats.lost_tokens += 1;
                    io.receiver.reset_event_count();
                    self.set_state(MasterState::NoToken);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn idle_frame(&mut self, frame: MstpFrame, io: &mut NodeIo<'_>) -> bool {
        let for_us = frame.destination == self.this_station;

        match frame.frame_type {
            FrameType::Token if for_us => {
                trace!("MS/TP {}: token from {}", self.this_station, frame.source);
                self.token_source = Some(frame.source);
                io.stats.tokens_received += 1;
                self.frame_count = 0;
                self.sole_master = false;
                self.set_state(MasterState::UseToken);
                true
            }
            FrameType::PollForMaster if for_us => {
                io.send(
                    FrameType::ReplyToPollForMaster,
                    frame.source,
                    self.this_station,
                    &[],
                );
                false
            }
            FrameType::TestRequest if for_us => {
                io.answer_test_request(&frame, self.this_station);
                false
            }
            FrameType::BacnetDataExpectingReply if for_us => {
                io.app.deliver(&frame);
                self.request = Some(frame);
                self.set_state(MasterState::AnswerDataRequest);
                true
            }
            FrameType::BacnetDataExpectingReply
            | FrameType::BacnetDataNotExpectingReply
            | FrameType::TestResponse
            | FrameType::Custom(_) => {
                io.app.deliver(&frame);
                false
            }
            _ => false,
        }
    }

    fn use_token(&mut self, io: &mut NodeIo<'_>) -> bool {
        if self.frame_count >= self.max_info_frames {
            self.set_state(MasterState::DoneWithToken);
            return true;
        }

        match io.app.next_frame() {
            None => {
                self.frame_count = self.max_info_frames;
                self.set_state(MasterState::DoneWithToken);
                true
            }
            Some(frame) => {
                io.send_outgoing(&frame, self.this_station);
                self.frame_count += 1;
                if frame.expects_reply() {
                    self.set_state(MasterState::WaitForReply);
                    false
                } else {
                    self.set_state(MasterState::DoneWithToken);
                    true
                }
            }
        }
    }

    fn wait_for_reply(&mut self, io: &mut NodeIo<'_>) -> bool {
        match io.take_event() {
            Some((ReceiveEvent::InvalidFrame(_), _)) => {
                self.set_state(MasterState::DoneWithToken);
                true
            }
            Some((ReceiveEvent::ValidFrame, Some(frame))) if frame.destination == self.this_station => {
                match frame.frame_type {
                    FrameType::ReplyPostponed => {}
                    FrameType::TestResponse
                    | FrameType::BacnetDataNotExpectingReply
                    | FrameType::Custom(_) => io.app.deliver(&frame),
                    _ => {
                        debug!(
                            "MS/TP {}: unexpected {} from {} while waiting for reply",
                            self.this_station, frame.frame_type, frame.source
                        );
                        self.set_state(MasterState::Idle);
                        return true;
                    }
                }
                self.set_state(MasterState::DoneWithToken);
                true
            }
            Some(_) => {
                // Another station is talking: synchronise with the ring
                self.set_state(MasterState::Idle);
                true
            }
            None => {
                if io.expired(self.timing.reply_timeout) {
                    warn!("MS/TP {}: reply timeout", self.this_station);
                    io.stats.reply_timeouts += 1;
                    self.frame_count = self.max_info_frames;
                    self.set_state(MasterState::DoneWithToken);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn done_with_token(&mut self, io: &mut NodeIo<'_>) -> bool {
        if self.frame_count < self.max_info_frames {
            self.set_state(MasterState::UseToken);
            return true;
        }

        if !self.sole_master && self.next_station == self.this_station {
            // Successor unknown
            self.poll_station = self.next_after(self.this_station);
            if self.poll_station == self.this_station {
                self.become_sole_master();
                return false;
            }
            self.send_poll_for_master(io);
            return false;
        }

        if self.token_count < self.npoll.saturating_sub(1) {
            self.token_count += 1;
            if self.sole_master {
                self.frame_count = 0;
                self.set_state(MasterState::UseToken);
            } else {
                self.send_token(io);
            }
            return false;
        }

        let next_poll = self.next_after(self.poll_station);
        if next_poll != self.next_station {
            // Maintenance poll of the next address in the gap
            self.poll_station = next_poll;
            self.send_poll_for_master(io);
        } else if !self.sole_master {
            self.poll_station = self.this_station;
            self.token_count = 1;
            self.send_token(io);
        } else {
            self.poll_station = self.next_after(self.next_station);
            self.next_station = self.this_station;
            self.token_count = 1;
            self.send_poll_for_master(io);
        }
        false
    }

    fn pass_token(&mut self, io: &mut NodeIo<'_>) -> bool {
        if !io.expired(self.timing.usage_timeout) {
            if io.receiver.event_count() > NMIN_OCTETS {
                trace!(
                    "MS/TP {}: station {} is using the token",
                    self.this_station,
                    self.next_station
                );
                self.set_state(MasterState::Idle);
                return true;
            }
            return false;
        }

        if self.retry_count < self.nretry_token {
            self.retry_count += 1;
            io.stats.token_retries += 1;
            debug!(
                "MS/TP {}: station {} did not use the token, retry {}",
                self.this_station, self.next_station, self.retry_count
            );
            io.receiver.reset_event_count();
            io.send(FrameType::Token, self.next_station, self.this_station, &[]);
            return false;
        }

        warn!(
            "MS/TP {}: dropping station {} from the ring",
            self.this_station, self.next_station
        );
        io.stats.stations_dropped += 1;
        self.poll_station = self.next_after(self.next_station);
        self.next_station = self.this_station;
        self.token_count = 0;
        self.send_poll_for_master(io);
        false
    }

    fn no_token(&mut self, io: &mut NodeIo<'_>) -> bool {
        let slot = self.timing.token_slot(self.this_station);
        if !io.expired(slot) {
            if io.receiver.event_count() > NMIN_OCTETS {
                debug!("MS/TP {}: activity while waiting to generate the token", self.this_station);
                self.set_state(MasterState::Idle);
                return true;
            }
            return false;
        }

        info!(
            "MS/TP {}: generating token after {:?} of silence",
            self.this_station,
            io.silence()
        );
        io.stats.tokens_generated += 1;
        io.receiver.reset_event_count();
        self.next_station = self.this_station;
        self.poll_station = self.this_station;
        self.token_count = 0;
        self.frame_count = 0;
        self.retry_count = 0;
        self.sole_master = false;
        self.set_state(MasterState::UseToken);
        true
    }

    fn poll_for_master(&mut self, io: &mut NodeIo<'_>) -> bool {
        match io.take_event() {
            Some((ReceiveEvent::ValidFrame, Some(frame))) => {
                if frame.destination == self.this_station
                    && frame.frame_type == FrameType::ReplyToPollForMaster
                {
                    info!(
                        "MS/TP {}: station {} is the new successor",
                        self.this_station, frame.source
                    );
                    self.sole_master = false;
                    self.next_station = frame.source;
                    self.poll_station = self.this_station;
                    self.token_count = 0;
                    self.send_token(io);
                    false
                } else {
                    debug!(
                        "MS/TP {}: unexpected {} from {} while polling",
                        self.this_station, frame.frame_type, frame.source
                    );
                    self.set_state(MasterState::Idle);
                    true
                }
            }
            Some((ReceiveEvent::InvalidFrame(_), _)) => self.poll_unanswered(io),
            Some(_) => false,
            None => {
                if io.expired(self.timing.usage_timeout) {
                    self.poll_unanswered(io)
                } else {
                    false
                }
            }
        }
    }

    fn poll_unanswered(&mut self, io: &mut NodeIo<'_>) -> bool {
        if self.sole_master {
            self.frame_count = 0;
            self.set_state(MasterState::UseToken);
            return true;
        }
        if self.next_station != self.this_station {
            self.send_token(io);
            return false;
        }

        let next_poll = self.next_after(self.poll_station);
        if next_poll != self.this_station {
            self.poll_station = next_poll;
            self.send_poll_for_master(io);
            false
        } else {
            self.become_sole_master();
            true
        }
    }

    fn answer_data_request(&mut self, io: &mut NodeIo<'_>) -> bool {
        let Some(request) = self.request.as_ref() else {
            self.set_state(MasterState::Idle);
            return true;
        };

        if let Some(reply) = io.app.reply(request) {
            io.send_outgoing(&reply, self.this_station);
            self.request = None;
            self.set_state(MasterState::Idle);
            return false;
        }

        if io.expired(self.timing.reply_delay) {
            let source = request.source;
            debug!("MS/TP {}: postponing reply to {}", self.this_station, source);
            io.send(FrameType::ReplyPostponed, source, self.this_station, &[]);
            io.stats.replies_postponed += 1;
            self.request = None;
            self.set_state(MasterState::Idle);
        }
        false
    }

    fn become_sole_master(&mut self) {
        if !self.sole_master {
            info!("MS/TP {}: no other master found, sole master", self.this_station);
        }
        self.sole_master = true;
        self.frame_count = 0;
        self.set_state(MasterState::UseToken);
    }

    fn send_token(&mut self, io: &mut NodeIo<'_>) {
        io.stats.tokens_passed += 1;
        io.receiver.reset_event_count();
        io.send(FrameType::Token, self.next_station, self.this_station, &[]);
        self.retry_count = 0;
        self.set_state(MasterState::PassToken);
    }

    fn send_poll_for_master(&mut self, io: &mut NodeIo<'_>) {
        io.stats.poll_for_master_sent += 1;
        io.send(FrameType::PollForMaster, self.poll_station, self.this_station, &[]);
        self.retry_count = 0;
        self.set_state(MasterState::PollForMaster);
    }

    fn next_after(&self, station: u8) -> u8 {
        ((station as u16 + 1) % (self.max_master as u16 + 1)) as u8
    }

    fn set_state(&mut self, state: MasterState) {
        if self.state != state {
            debug!("MS/TP {}: {:?} -> {:?}", self.this_station, self.state, state);
            self.state = state;
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    /// This station's address (255 until a negotiated address is claimed).
    pub fn this_station(&self) -> u8 {
        self.this_station
    }

    /// Successor in the ring; equals [`this_station`](Self::this_station)
    /// when unknown.
    pub fn next_station(&self) -> u8 {
        self.next_station
    }

    /// Last address polled.
    pub fn poll_station(&self) -> u8 {
        self.poll_station
    }

    /// Station that last passed the token to this one.
    pub fn token_source(&self) -> Option<u8> {
        self.token_source
    }

    pub fn token_count(&self) -> u8 {
        self.token_count
    }

    pub fn frame_count(&self) -> u8 {
        self.frame_count
    }

    pub fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Whether this station found no other master and keeps the token.
    pub fn is_sole_master(&self) -> bool {
        self.sole_master
    }

    /// Whether the master currently owns the token.
    pub fn holds_token(&self) -> bool {
        matches!(
            self.state,
            MasterState::UseToken
                | MasterState::WaitForReply
                | MasterState::DoneWithToken
                | MasterState::PollForMaster
        )
    }
}
