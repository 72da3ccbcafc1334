//! MS/TP port: the state machines of one link and the loop that drives them
//!
//! An [`MstpPort`] owns everything a link needs: the receive state machine,
//! the master or slave node state machine, optional address negotiation,
//! counters and the transmit buffer. The host calls [`MstpPort::poll`] as often
//! as it can (at least once per millisecond on a real line), passing the UART
//! and the upper layer. Each call drains the received octets and runs the node
//! state machine whenever the receiver is between frames.

use std::io;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use log::{debug, info, trace, warn};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::config::{MstpConfig, NodeRole};
use super::frame::{encode_frame_into, FrameType, MstpFrame, MSTP_MAX_FRAME_SIZE};
use super::master::{MasterFsm, MasterState};
use super::receive::{ReceiveEvent, ReceiveFsm, ReceiveState, ReceiveStats, RxInput};
use super::slave::{SlaveFsm, SlaveState};
use super::zero_config::{ZeroConfig, ZeroConfigState};
use crate::datalink::Result;
use crate::util::hex_preview;

/// The UART side of a port.
pub trait SerialPort {
    /// Next received octet or receive error, if one is waiting.
    fn read_byte(&mut self) -> Option<RxInput>;

    /// Transmit a complete frame.
    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()>;
}

/// The upper layer of a port.
pub trait MstpApplication {
    /// A valid data, test response or proprietary frame for this station (or
    /// broadcast) was received.
    fn deliver(&mut self, frame: &MstpFrame);

    /// Next frame to send while this station holds the token.
    fn next_frame(&mut self) -> Option<OutgoingFrame>;

    /// Reply to `request`, if one is ready. Polled until it returns a frame or
    /// the reply delay expires.
    fn reply(&mut self, request: &MstpFrame) -> Option<OutgoingFrame>;
}

/// A frame queued by the upper layer. The source address is filled in when
/// the frame is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFrame {
    pub frame_type: FrameType,
    pub destination: u8,
    pub data: Bytes,
}

impl OutgoingFrame {
    pub fn new(frame_type: FrameType, destination: u8, data: impl Into<Bytes>) -> Self {
        Self {
            frame_type,
            destination,
            data: data.into(),
        }
    }

    /// Whether the sender must wait for a reply after sending this frame.
    pub fn expects_reply(&self) -> bool {
        self.frame_type.expects_reply() && self.destination != super::MSTP_BROADCAST_ADDRESS
    }
}

/// Port counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MstpStats {
    pub receive: ReceiveStats,
    pub tx_frames: u64,
    pub tx_errors: u64,
    pub tokens_received: u64,
    pub tokens_passed: u64,
    pub token_retries: u64,
    pub reply_timeouts: u64,
    pub replies_postponed: u64,
    /// Times the token was declared lost.
    pub lost_tokens: u64,
    pub tokens_generated: u64,
    pub poll_for_master_sent: u64,
    /// Successors dropped after failing to use the token.
    pub stations_dropped: u64,
    /// Zero-configuration candidates found in use.
    pub address_conflicts: u64,
}

/// What a node state machine sees of its port during one step.
pub(crate) struct NodeIo<'a> {
    pub(crate) receiver: &'a mut ReceiveFsm,
    pub(crate) serial: &'a mut dyn SerialPort,
    pub(crate) app: &'a mut dyn MstpApplication,
    pub(crate) stats: &'a mut MstpStats,
    pub(crate) tx: &'a mut BytesMut,
    pub(crate) now: Instant,
}

impl NodeIo<'_> {
    /// Encode and transmit a frame. Transmission restarts the silence timer.
    pub(crate) fn send(&mut self, frame_type: FrameType, destination: u8, source: u8, data: &[u8]) {
        self.tx.clear();
        if let Err(e) = encode_frame_into(self.tx, frame_type, destination, source, data) {
            warn!("MS/TP: dropping {} to {}: {}", frame_type, destination, e);
            self.stats.tx_errors += 1;
            return;
        }

        trace!(
            "MS/TP: send {} {} -> {} [{}]",
            frame_type,
            source,
            destination,
            hex_preview(data, 16)
        );
        match self.serial.send_frame(&self.tx[..]) {
            Ok(()) => self.stats.tx_frames += 1,
            Err(e) => {
                warn!("MS/TP: transmit of {} failed: {}", frame_type, e);
                self.stats.tx_errors += 1;
            }
        }
        self.receiver.reset_silence(self.now);
    }

    pub(crate) fn send_outgoing(&mut self, frame: &OutgoingFrame, source: u8) {
        self.send(frame.frame_type, frame.destination, source, &frame.data);
    }

    pub(crate) fn silence(&self) -> Duration {
        self.receiver.silence(self.now)
    }

    /// Whether the line has been silent for at least `limit` at this cycle's
    /// clock sample.
    pub(crate) fn expired(&self, limit: Duration) -> bool {
        self.receiver.silence_timer().expired(limit, self.now)
    }

    /// Consume the latched event along with the frame it completed.
    pub(crate) fn take_event(&mut self) -> Option<(ReceiveEvent, Option<MstpFrame>)> {
        let event = self.receiver.take_event()?;
        let frame = match event {
            ReceiveEvent::ValidFrame | ReceiveEvent::ValidFrameNotForUs => {
                self.receiver.frame().cloned()
            }
            ReceiveEvent::InvalidFrame(_) => None,
        };
        Some((event, frame))
    }

    /// Answer a Test Request by echoing its payload.
    pub(crate) fn answer_test_request(&mut self, request: &MstpFrame, this_station: u8) {
        self.send(FrameType::TestResponse, request.source, this_station, &request.data);
    }
}

/// Node state machine selected by the configured role.
#[derive(Debug)]
enum Node {
    Master(MasterFsm),
    Slave(SlaveFsm),
}

/// Externally visible node state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Master(MasterState),
    Slave(SlaveState),
    /// Negotiating an address; the master has not started.
    ZeroConfig(ZeroConfigState),
}

/// One MS/TP link.
#[derive(Debug)]
pub struct MstpPort {
    config: MstpConfig,
    receiver: ReceiveFsm,
    node: Node,
    zero_config: Option<ZeroConfig>,
    stats: MstpStats,
    tx: BytesMut,
}

impl MstpPort {
    /// Build a port from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns the error reported by [`MstpConfig::validate`].
    pub fn new(config: MstpConfig, now: Instant) -> Result<Self> {
        config.validate()?;

        let receiver = ReceiveFsm::new(
            config.station_address,
            config.input_buffer_size,
            config.timing.frame_abort,
            now,
        );
        let node = match config.role {
            NodeRole::Master => Node::Master(MasterFsm::new(&config)),
            NodeRole::Slave => Node::Slave(SlaveFsm::new(&config)),
        };
        let zero_config = config
            .uses_zero_config()
            .then(|| ZeroConfig::new(&config));

        debug!(
            "MS/TP: port for station {} ({:?}), max master {}, {} baud",
            config.station_address, config.role, config.max_master, config.baud_rate
        );

        Ok(Self {
            config,
            receiver,
            node,
            zero_config,
            stats: MstpStats::default(),
            tx: BytesMut::with_capacity(MSTP_MAX_FRAME_SIZE),
        })
    }

    /// Run one drive cycle at `now`.
    ///
    /// Every octet waiting in `serial` is fed to the receiver. The node state
    /// machine runs whenever the receiver is idle, including once with no
    /// input so that timeouts fire.
    pub fn poll(&mut self, serial: &mut dyn SerialPort, app: &mut dyn MstpApplication, now: Instant) {
        loop {
            let input = serial.read_byte();
            let drained = input.is_none();

            self.receiver.step(input, now);
            if self.receiver.state() == ReceiveState::Idle {
                self.run_node(serial, app, now);
            }

            if drained {
                break;
            }
        }
    }

    fn run_node(&mut self, serial: &mut dyn SerialPort, app: &mut dyn MstpApplication, now: Instant) {
        let mut io = NodeIo {
            receiver: &mut self.receiver,
            serial,
            app,
            stats: &mut self.stats,
            tx: &mut self.tx,
            now,
        };

        match &mut self.node {
            Node::Slave(slave) => slave.step(&mut io),
            Node::Master(master) => {
                if let Some(zero_config) = self.zero_config.as_mut() {
                    if !zero_config.is_complete() {
                        match zero_config.step(&mut io) {
                            Some(station) => {
                                info!("MS/TP: claimed station address {}", station);
                                io.receiver.set_this_station(station);
                                master.start_with_token(station);
                            }
                            None => return,
                        }
                    }
                }
                while master.step(&mut io) {}
            }
        }
    }

    /// This station's address (255 while an address is being negotiated).
    pub fn this_station(&self) -> u8 {
        match &self.node {
            Node::Master(master) => master.this_station(),
            Node::Slave(slave) => slave.this_station(),
        }
    }

    pub fn state(&self) -> NodeState {
        if let Some(zero_config) = &self.zero_config {
            if !zero_config.is_complete() {
                return NodeState::ZeroConfig(zero_config.state());
            }
        }
        match &self.node {
            Node::Master(master) => NodeState::Master(master.state()),
            Node::Slave(slave) => NodeState::Slave(slave.state()),
        }
    }

    /// The master state machine, for a master port.
    pub fn master(&self) -> Option<&MasterFsm> {
        match &self.node {
            Node::Master(master) => Some(master),
            Node::Slave(_) => None,
        }
    }

    pub fn receiver(&self) -> &ReceiveFsm {
        &self.receiver
    }

    pub fn zero_config(&self) -> Option<&ZeroConfig> {
        self.zero_config.as_ref()
    }

    pub fn config(&self) -> &MstpConfig {
        &self.config
    }

    /// Snapshot of the port counters.
    pub fn stats(&self) -> MstpStats {
        MstpStats {
            receive: *self.receiver.stats(),
            ..self.stats
        }
    }
}
