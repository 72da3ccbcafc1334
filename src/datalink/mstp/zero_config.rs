//! Zero-configuration station address negotiation
//!
//! A master configured with station address 255 picks its own address before
//! joining the ring. It listens to the ring under a candidate address, skips
//! candidates other stations already use as a source, and answers a Poll For
//! Master sent to the candidate. Once the token arrives at the candidate it
//! checks the address with a Test Request carrying its UUID: any answer from
//! the candidate address means the address is taken, silence means it is free.
//!
//! The UUID also spreads simultaneous joiners over different polls: a node
//! answers only the Nth poll of its candidate, with N derived from the UUID.
//! Two joiners with the same candidate and the same N are not separated.

use log::{debug, info};

use super::config::{MstpConfig, ZERO_CONFIG_STATION_MIN};
use super::frame::{FrameType, MstpFrame};
use super::port::NodeIo;
use super::timing::MstpTiming;

/// Number of distinct poll slots a UUID can map to.
pub const ZERO_CONFIG_POLL_SLOTS: u8 = 8;

/// Address negotiation states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroConfigState {
    Init,
    /// Waiting for the first frame on the line
    Idle,
    /// Watching the ring for the candidate address
    Lurk,
    /// Answered a poll for the candidate; waiting for the token
    Claim,
    /// Probing the candidate address
    Confirm,
    /// Address claimed
    Use,
}

#[derive(Debug)]
pub struct ZeroConfig {
    state: ZeroConfigState,
    uuid: [u8; 16],
    preferred: u8,
    last_station: u8,
    candidate: u8,
    poll_slot: u8,
    poll_count: u8,
    timing: MstpTiming,
}

impl ZeroConfig {
    pub fn new(config: &MstpConfig) -> Self {
        let preferred = config.zero_config.preferred_station;
        Self {
            state: ZeroConfigState::Init,
            uuid: config.zero_config.uuid,
            preferred,
            last_station: config.max_master,
            candidate: preferred,
            poll_slot: poll_slot(&config.zero_config.uuid),
            poll_count: 0,
            timing: config.timing,
        }
    }

    /// Run one step. Returns the claimed address once negotiation completes.
    pub(crate) fn step(&mut self, io: &mut NodeIo<'_>) -> Option<u8> {
        match self.state {
            ZeroConfigState::Init => {
                self.candidate = self.preferred;
                self.poll_count = 0;
                debug!(
                    "MS/TP zero-config: starting at {}, poll slot {}",
                    self.candidate, self.poll_slot
                );
                self.state = ZeroConfigState::Idle;
                None
            }
            ZeroConfigState::Idle | ZeroConfigState::Lurk => match io.take_event() {
                Some((_, Some(frame))) => {
                    self.state = ZeroConfigState::Lurk;
                    self.lurk(&frame, io);
                    None
                }
                Some(_) => None,
                None => self.quiet_line(io),
            },
            ZeroConfigState::Claim => {
                match io.take_event() {
                    Some((_, Some(frame))) => self.claim(&frame, io),
                    Some(_) => {}
                    None => {
                        if io.expired(self.timing.no_token) {
                            debug!("MS/TP zero-config: token never arrived at {}", self.candidate);
                            self.poll_count = 0;
                            self.state = ZeroConfigState::Lurk;
                        }
                    }
                }
                None
            }
            ZeroConfigState::Confirm => match io.take_event() {
                Some((_, Some(frame))) if frame.source == self.candidate => {
                    self.next_candidate(io);
                    None
                }
                Some(_) => None,
                None => {
                    if io.expired(self.timing.reply_timeout) {
                        self.claimed()
                    } else {
                        None
                    }
                }
            },
            ZeroConfigState::Use => None,
        }
    }

    fn lurk(&mut self, frame: &MstpFrame, io: &mut NodeIo<'_>) {
        if frame.source == self.candidate {
            self.next_candidate(io);
            return;
        }

        if frame.frame_type == FrameType::PollForMaster && frame.destination == self.candidate {
            self.poll_count = self.poll_count.saturating_add(1);
            if self.poll_count >= self.poll_slot {
                debug!(
                    "MS/TP zero-config: answering poll for {} from {}",
                    self.candidate, frame.source
                );
                io.send(
                    FrameType::ReplyToPollForMaster,
                    frame.source,
                    self.candidate,
                    &[],
                );
                self.state = ZeroConfigState::Claim;
            }
        }
    }

    fn claim(&mut self, frame: &MstpFrame, io: &mut NodeIo<'_>) {
        match frame.frame_type {
            FrameType::Token if frame.destination == self.candidate => {
                io.send(
                    FrameType::TestRequest,
                    self.candidate,
                    self.candidate,
                    &self.uuid,
                );
                self.state = ZeroConfigState::Confirm;
            }
            FrameType::PollForMaster if frame.destination == self.candidate => {
                io.send(
                    FrameType::ReplyToPollForMaster,
                    frame.source,
                    self.candidate,
                    &[],
                );
            }
            _ if frame.source == self.candidate => self.next_candidate(io),
            _ => {
                self.poll_count = 0;
                self.state = ZeroConfigState::Lurk;
            }
        }
    }

    /// Claim the candidate when the line has been silent for the candidate's
    /// token slot: there is no ring to join.
    fn quiet_line(&mut self, io: &mut NodeIo<'_>) -> Option<u8> {
        if io.expired(self.timing.token_slot(self.candidate)) {
            debug!("MS/TP zero-config: no traffic on the line");
            self.claimed()
        } else {
            None
        }
    }

    fn next_candidate(&mut self, io: &mut NodeIo<'_>) {
        io.stats.address_conflicts += 1;
        let in_use = self.candidate;
        self.candidate = if self.candidate >= self.last_station {
            ZERO_CONFIG_STATION_MIN
        } else {
            self.candidate + 1
        };
        self.poll_count = 0;
        self.state = ZeroConfigState::Lurk;
        debug!(
            "MS/TP zero-config: station {} in use, trying {}",
            in_use, self.candidate
        );
    }

    fn claimed(&mut self) -> Option<u8> {
        info!("MS/TP zero-config: using station address {}", self.candidate);
        self.state = ZeroConfigState::Use;
        Some(self.candidate)
    }

    pub fn state(&self) -> ZeroConfigState {
        self.state
    }

    /// Address currently being tried (or claimed).
    pub fn candidate(&self) -> u8 {
        self.candidate
    }

    /// Which poll of the candidate this node answers.
    pub fn poll_slot(&self) -> u8 {
        self.poll_slot
    }

    pub fn is_complete(&self) -> bool {
        self.state == ZeroConfigState::Use
    }
}

/// Poll slot (1 to [`ZERO_CONFIG_POLL_SLOTS`]) for a UUID.
pub fn poll_slot(uuid: &[u8; 16]) -> u8 {
    let sum = uuid.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    1 + sum % ZERO_CONFIG_POLL_SLOTS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalink::mstp::master::MasterState;
    use crate::datalink::mstp::port::testing::Harness;
    use crate::datalink::mstp::port::NodeState;

    fn joiner(uuid: [u8; 16]) -> Harness {
        let mut config = MstpConfig::master(255);
        config.zero_config.enabled = true;
        config.zero_config.uuid = uuid;
        let mut h = Harness::new(config);
        h.poll();
        h
    }

    fn zc_state(h: &Harness) -> ZeroConfigState {
        match h.port.state() {
            NodeState::ZeroConfig(state) => state,
            other => panic!("negotiation finished: {:?}", other),
        }
    }

    fn candidate(h: &Harness) -> u8 {
        h.port.zero_config().unwrap().candidate()
    }

    #[test]
    fn test_poll_slot_from_uuid() {
        assert_eq!(poll_slot(&[0; 16]), 1);
        let mut uuid = [0u8; 16];
        uuid[3] = 2;
        assert_eq!(poll_slot(&uuid), 3);
        uuid[0] = 6;
        assert_eq!(poll_slot(&uuid), 1);
    }

    #[test]
    fn test_starts_lurking_on_traffic() {
        let mut h = joiner([0; 16]);
        assert_eq!(zc_state(&h), ZeroConfigState::Idle);
        assert_eq!(h.port.this_station(), 255);

        h.receive(&MstpFrame::token(3, 1));
        assert_eq!(zc_state(&h), ZeroConfigState::Lurk);
        assert_eq!(candidate(&h), 64);
        assert!(h.serial.take_sent().is_empty());
    }

    #[test]
    fn test_skips_address_in_use() {
        let mut h = joiner([0; 16]);
        h.receive(&MstpFrame::token(10, 64));
        assert_eq!(candidate(&h), 65);
        assert_eq!(h.port.stats().address_conflicts, 1);

        // Polls for the old candidate are not answered
        h.receive(&MstpFrame::poll_for_master(64, 10));
        assert!(h.serial.take_sent().is_empty());
    }

    #[test]
    fn test_candidate_wraps_to_lowest() {
        let mut config = MstpConfig::master(255);
        config.zero_config.enabled = true;
        config.zero_config.preferred_station = 127;
        let mut h = Harness::new(config);
        h.poll();
        h.receive(&MstpFrame::token(0, 127));
        assert_eq!(candidate(&h), 64);
    }

    #[test]
    fn test_answers_nth_poll() {
        let mut uuid = [0u8; 16];
        uuid[15] = 2;
        let mut h = joiner(uuid);
        assert_eq!(h.port.zero_config().unwrap().poll_slot(), 3);

        h.receive(&MstpFrame::poll_for_master(64, 10));
        h.receive(&MstpFrame::poll_for_master(64, 10));
        assert!(h.serial.take_sent().is_empty());

        h.receive(&MstpFrame::poll_for_master(64, 10));
        assert_eq!(
            h.serial.take_sent(),
            vec![MstpFrame::reply_to_poll_for_master(10, 64)]
        );
        assert_eq!(zc_state(&h), ZeroConfigState::Claim);
    }

    #[test]
    fn test_claim_and_confirm() {
        let uuid = [7u8; 16];
        let mut h = joiner(uuid);
        for _ in 0..poll_slot(&uuid) {
            h.receive(&MstpFrame::poll_for_master(64, 10));
        }
        assert_eq!(zc_state(&h), ZeroConfigState::Claim);
        h.serial.take_sent();

        h.receive(&MstpFrame::token(64, 10));
        assert_eq!(
            h.serial.take_sent(),
            vec![MstpFrame::new(FrameType::TestRequest, 64, 64, uuid.to_vec()).unwrap()]
        );
        assert_eq!(zc_state(&h), ZeroConfigState::Confirm);

        h.advance(254);
        assert_eq!(zc_state(&h), ZeroConfigState::Confirm);

        // Nobody answered: the address is ours and so is the token
        h.advance(1);
        assert_eq!(h.port.this_station(), 64);
        assert_eq!(h.port.receiver().this_station(), 64);
        assert_eq!(h.master_state(), MasterState::PollForMaster);
        assert_eq!(
            h.serial.take_sent(),
            vec![MstpFrame::poll_for_master(65, 64)]
        );
    }

    #[test]
    fn test_answered_claim_means_conflict() {
        let uuid = [0u8; 16];
        let mut h = joiner(uuid);
        h.receive(&MstpFrame::poll_for_master(64, 10));
        h.receive(&MstpFrame::token(64, 10));
        assert_eq!(zc_state(&h), ZeroConfigState::Confirm);

        h.receive(&MstpFrame::new(FrameType::TestResponse, 64, 64, uuid.to_vec()).unwrap());
        assert_eq!(zc_state(&h), ZeroConfigState::Lurk);
        assert_eq!(candidate(&h), 65);
        assert_eq!(h.port.this_station(), 255);
    }

    #[test]
    fn test_claim_abandoned_when_token_goes_elsewhere() {
        let mut h = joiner([0; 16]);
        h.receive(&MstpFrame::poll_for_master(64, 10));
        assert_eq!(zc_state(&h), ZeroConfigState::Claim);

        h.receive(&MstpFrame::token(11, 10));
        assert_eq!(zc_state(&h), ZeroConfigState::Lurk);
        assert_eq!(candidate(&h), 64);
    }

    #[test]
    fn test_quiet_line_claims_preferred_address() {
        let mut h = joiner([0; 16]);
        // Slot for 64 is Tno_token + 64 * Tslot
        h.advance(1139);
        assert_eq!(zc_state(&h), ZeroConfigState::Idle);

        h.advance(1);
        assert_eq!(h.port.this_station(), 64);
        assert_eq!(
            h.serial.take_sent(),
            vec![MstpFrame::poll_for_master(65, 64)]
        );
    }
}
