//! Multi-station MS/TP segments on a simulated RS-485 bus.
//!
//! Every station is polled once per virtual millisecond. A frame sent during a
//! poll reaches every other online station before its next poll.

use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};

use bacnet_mstp::datalink::mstp::{
    decode_frame, FrameType, MasterFsm, MasterState, MstpApplication, MstpConfig, MstpFrame,
    MstpPort, NodeState, OutgoingFrame, RxInput, SerialPort,
};

#[derive(Default)]
struct Wire {
    rx: VecDeque<RxInput>,
    tx: Vec<Vec<u8>>,
}

impl SerialPort for Wire {
    fn read_byte(&mut self) -> Option<RxInput> {
        self.rx.pop_front()
    }

    fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.tx.push(frame.to_vec());
        Ok(())
    }
}

#[derive(Default)]
struct App {
    delivered: Vec<MstpFrame>,
    outgoing: VecDeque<OutgoingFrame>,
    replies: VecDeque<OutgoingFrame>,
}

impl MstpApplication for App {
    fn deliver(&mut self, frame: &MstpFrame) {
        self.delivered.push(frame.clone());
    }

    fn next_frame(&mut self) -> Option<OutgoingFrame> {
        self.outgoing.pop_front()
    }

    fn reply(&mut self, _request: &MstpFrame) -> Option<OutgoingFrame> {
        self.replies.pop_front()
    }
}

struct Station {
    port: MstpPort,
    wire: Wire,
    app: App,
    online: bool,
}

struct Bus {
    stations: Vec<Station>,
    now: Instant,
    log: Vec<MstpFrame>,
}

impl Bus {
    fn new(configs: Vec<MstpConfig>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let now = Instant::now();
        let stations = configs
            .into_iter()
            .map(|config| Station {
                port: MstpPort::new(config, now).unwrap(),
                wire: Wire::default(),
                app: App::default(),
                online: true,
            })
            .collect();
        Self {
            stations,
            now,
            log: Vec::new(),
        }
    }

    fn tick(&mut self) {
        self.now += Duration::from_millis(1);

        for i in 0..self.stations.len() {
            if !self.stations[i].online {
                continue;
            }
            let station = &mut self.stations[i];
            station
                .port
                .poll(&mut station.wire, &mut station.app, self.now);
            let sent = std::mem::take(&mut station.wire.tx);

            for bytes in sent {
                self.log.push(decode_frame(&bytes).unwrap());
                for (j, other) in self.stations.iter_mut().enumerate() {
                    if j != i && other.online {
                        other.wire.rx.extend(bytes.iter().map(|&b| RxInput::Data(b)));
                    }
                }
            }
        }
    }

    fn run(&mut self, ms: u64) {
        for _ in 0..ms {
            self.tick();
        }
    }

    /// Run until `done` holds, for at most `limit_ms`.
    fn run_until(&mut self, limit_ms: u64, done: impl Fn(&Bus) -> bool) -> bool {
        for _ in 0..limit_ms {
            if done(self) {
                return true;
            }
            self.tick();
        }
        done(self)
    }

    fn master(&self, index: usize) -> &MasterFsm {
        self.stations[index].port.master().unwrap()
    }

    fn successor(&self, index: usize) -> u8 {
        self.master(index).next_station()
    }
}

fn master(station: u8, max_master: u8) -> MstpConfig {
    MstpConfig {
        max_master,
        ..MstpConfig::master(station)
    }
}

fn joiner(max_master: u8, uuid: [u8; 16]) -> MstpConfig {
    let mut config = master(255, max_master);
    config.zero_config.enabled = true;
    config.zero_config.uuid = uuid;
    config
}

/// Masters 1, 3 and 7 with the ring closed.
fn three_master_ring() -> Bus {
    let mut bus = Bus::new(vec![master(1, 10), master(3, 10), master(7, 10)]);
    let formed = bus.run_until(5000, |bus| {
        bus.successor(0) == 3 && bus.successor(1) == 7 && bus.successor(2) == 1
    });
    assert!(formed, "ring did not form");
    bus
}

#[test]
fn test_three_masters_form_ring() {
    let mut bus = three_master_ring();

    let generated: u64 = bus
        .stations
        .iter()
        .map(|s| s.port.stats().tokens_generated)
        .sum();
    assert_eq!(generated, 1);
    assert_eq!(bus.stations[0].port.stats().tokens_generated, 1);

    bus.stations[1].app.outgoing.push_back(OutgoingFrame::new(
        FrameType::BacnetDataNotExpectingReply,
        7,
        vec![0x01u8, 0x00, 0x42],
    ));
    bus.run(500);

    let delivered = &bus.stations[2].app.delivered;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].source, 3);
    assert_eq!(&delivered[0].data[..], &[0x01, 0x00, 0x42]);

    for station in &bus.stations {
        assert!(station.port.stats().tokens_received > 0);
        assert_eq!(station.port.stats().lost_tokens, 1);
    }
    assert_eq!(bus.master(0).token_source(), Some(7));
    assert_eq!(bus.master(1).token_source(), Some(1));
    assert_eq!(bus.master(2).token_source(), Some(3));
}

#[test]
fn test_lone_master_becomes_sole_master() {
    let mut bus = Bus::new(vec![master(5, 10)]);
    assert!(bus.run_until(3000, |bus| bus.master(0).is_sole_master()));

    bus.stations[0].app.outgoing.push_back(OutgoingFrame::new(
        FrameType::BacnetDataNotExpectingReply,
        255,
        vec![0x01u8, 0x00],
    ));
    bus.run(100);

    assert!(bus
        .log
        .iter()
        .any(|frame| frame.is_data() && frame.source == 5 && frame.destination == 255));
    assert!(bus.master(0).is_sole_master());
    assert_eq!(bus.stations[0].port.stats().tokens_generated, 1);
}

#[test]
fn test_silent_station_is_dropped() {
    let mut bus = three_master_ring();
    assert!(bus.run_until(5000, |bus| bus.master(0).holds_token()));

    bus.stations[1].online = false;
    assert!(bus.run_until(3000, |bus| bus.successor(0) == 7));

    let stats = bus.stations[0].port.stats();
    assert_eq!(stats.stations_dropped, 1);
    assert!(stats.token_retries >= 1);
    assert_eq!(bus.successor(2), 1);
}

#[test]
fn test_lost_token_is_regenerated() {
    let mut bus = three_master_ring();

    // Station 3 dies while waiting for a reply from an absent station
    bus.stations[1].app.outgoing.push_back(OutgoingFrame::new(
        FrameType::BacnetDataExpectingReply,
        9,
        vec![0x01u8, 0x04],
    ));
    assert!(bus.run_until(5000, |bus| {
        bus.master(1).state() == MasterState::WaitForReply
    }));
    bus.stations[1].online = false;

    assert!(bus.run_until(5000, |bus| bus.successor(0) == 7));
    assert_eq!(bus.stations[0].port.stats().tokens_generated, 2);
    assert_eq!(bus.stations[2].port.stats().tokens_generated, 0);
}

#[test]
fn test_zero_config_joiner_claims_free_address() {
    let mut lone = master(60, 70);
    lone.npoll = 2;
    let mut bus = Bus::new(vec![lone, joiner(70, [0; 16])]);

    assert!(bus.run_until(10_000, |bus| {
        bus.stations[1].port.this_station() == 64 && bus.successor(0) == 64 && bus.successor(1) == 60
    }));
    assert!(matches!(bus.stations[1].port.state(), NodeState::Master(_)));

    // The claim went out under the candidate address
    assert!(bus.log.iter().any(|frame| {
        frame.frame_type == FrameType::TestRequest
            && frame.source == 64
            && frame.destination == 64
            && frame.data.len() == 16
    }));
    assert_eq!(bus.stations[1].port.stats().address_conflicts, 0);
}

#[test]
fn test_zero_config_joiner_skips_used_address() {
    let mut first = master(60, 70);
    first.npoll = 2;
    let mut second = master(64, 70);
    second.npoll = 2;
    let mut uuid = [0u8; 16];
    uuid[0] = 1;
    let mut bus = Bus::new(vec![first, second, joiner(70, uuid)]);

    assert!(bus.run_until(30_000, |bus| {
        bus.stations[2].port.this_station() == 65 && bus.successor(1) == 65
    }));
    assert!(bus.stations[2].port.stats().address_conflicts >= 1);
    assert_eq!(bus.successor(0), 64);
}

#[test]
fn test_master_and_slave() {
    let mut bus = Bus::new(vec![master(1, 2), MstpConfig::slave(200)]);
    bus.stations[0].app.outgoing.push_back(OutgoingFrame::new(
        FrameType::BacnetDataExpectingReply,
        200,
        vec![0x01u8, 0x04, 0x0C],
    ));
    bus.stations[1].app.replies.push_back(OutgoingFrame::new(
        FrameType::BacnetDataNotExpectingReply,
        1,
        vec![0x01u8, 0x00, 0x30],
    ));

    assert!(bus.run_until(3000, |bus| !bus.stations[0].app.delivered.is_empty()));

    let reply = &bus.stations[0].app.delivered[0];
    assert_eq!(reply.source, 200);
    assert_eq!(&reply.data[..], &[0x01, 0x00, 0x30]);
    assert_eq!(bus.stations[1].app.delivered.len(), 1);
    assert_eq!(bus.stations[0].port.stats().reply_timeouts, 0);

    bus.run(2000);
    assert!(bus
        .log
        .iter()
        .filter(|frame| frame.source == 200)
        .all(|frame| frame.frame_type == FrameType::BacnetDataNotExpectingReply));
    assert!(bus.master(0).is_sole_master());
}
