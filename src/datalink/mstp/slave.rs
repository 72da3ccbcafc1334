//! MS/TP Slave Node State Machine
//!
//! A slave never holds the token. It answers requests addressed to it and
//! otherwise only listens, so there is no token-loss handling here.

use std::time::Duration;

use log::{debug, trace};

use super::config::MstpConfig;
use super::frame::{FrameType, MstpFrame};
use super::port::NodeIo;
use super::receive::ReceiveEvent;

/// Slave node states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Idle,
    AnswerDataRequest,
}

#[derive(Debug)]
pub struct SlaveFsm {
    state: SlaveState,
    this_station: u8,
    reply_delay: Duration,
    request: Option<MstpFrame>,
}

impl SlaveFsm {
    pub fn new(config: &MstpConfig) -> Self {
        Self {
            state: SlaveState::Idle,
            this_station: config.station_address,
            reply_delay: config.timing.reply_delay,
            request: None,
        }
    }

    pub(crate) fn step(&mut self, io: &mut NodeIo<'_>) {
        match self.state {
            SlaveState::Idle => {
                if let Some((ReceiveEvent::ValidFrame, Some(frame))) = io.take_event() {
                    self.idle_frame(frame, io);
                }
                // An immediate reply is sent in the same cycle
                if self.state == SlaveState::AnswerDataRequest {
                    self.answer_data_request(io);
                }
            }
            SlaveState::AnswerDataRequest => self.answer_data_request(io),
        }
    }

    fn idle_frame(&mut self, frame: MstpFrame, io: &mut NodeIo<'_>) {
        let for_us = frame.destination == self.this_station;

        match frame.frame_type {
            FrameType::BacnetDataExpectingReply if for_us => {
                io.app.deliver(&frame);
                self.request = Some(frame);
                self.state = SlaveState::AnswerDataRequest;
            }
            FrameType::TestRequest if for_us => {
                io.answer_test_request(&frame, self.this_station);
            }
            FrameType::PollForMaster if for_us => {
                io.send(
                    FrameType::ReplyToPollForMaster,
                    frame.source,
                    self.this_station,
                    &[],
                );
            }
            FrameType::BacnetDataExpectingReply
            | FrameType::BacnetDataNotExpectingReply
            | FrameType::TestResponse
            | FrameType::Custom(_) => io.app.deliver(&frame),
            _ => trace!(
                "MS/TP {}: ignoring {} from {}",
                self.this_station,
                frame.frame_type,
                frame.source
            ),
        }
    }

    fn answer_data_request(&mut self, io: &mut NodeIo<'_>) {
        let Some(request) = self.request.as_ref() else {
            self.state = SlaveState::Idle;
            return;
        };

        if let Some(reply) = io.app.reply(request) {
            io.send_outgoing(&reply, self.this_station);
        } else if io.expired(self.reply_delay) {
            debug!(
                "MS/TP {}: no reply for {} within {:?}, dropping request",
                self.this_station, request.source, self.reply_delay
            );
        } else {
            return;
        }
        self.request = None;
        self.state = SlaveState::Idle;
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    pub fn this_station(&self) -> u8 {
        self.this_station
    }
}
