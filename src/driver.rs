//! Async driver for an MS/TP data link
//!
//! [`PortDriver`] owns an [`MstpDataLink`] and polls it on a fixed tick from a
//! tokio task. Other tasks exchange NPDUs with it through a [`PortHandle`]:
//!
//! ```no_run
//! # use std::time::Duration;
//! # use bacnet_mstp::datalink::{DataLinkAddress, mstp::{MstpConfig, MstpDataLink, SerialPort, RxInput}};
//! # use bacnet_mstp::driver::PortDriver;
//! # struct Uart;
//! # impl SerialPort for Uart {
//! #     fn read_byte(&mut self) -> Option<RxInput> { None }
//! #     fn send_frame(&mut self, _frame: &[u8]) -> std::io::Result<()> { Ok(()) }
//! # }
//! # async fn run() -> bacnet_mstp::datalink::Result<()> {
//! let link = MstpDataLink::new(MstpConfig::master(3), Uart)?;
//! let (driver, mut handle) = PortDriver::new(link, Duration::from_millis(1));
//! let task = driver.spawn();
//!
//! handle.send(vec![0x01, 0x00], DataLinkAddress::Broadcast).await?;
//! if let Some((npdu, source)) = handle.recv().await {
//!     println!("{} bytes from {:?}", npdu.len(), source);
//! }
//!
//! handle.shutdown();
//! let _link = task.await;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::datalink::mstp::{MstpDataLink, MstpStats, SerialPort, MSTP_QUEUE_CAPACITY};
use crate::datalink::{DataLink, DataLinkAddress, DataLinkError, Result};

type Npdu = (Vec<u8>, DataLinkAddress);

/// The task side of a running [`PortDriver`].
pub struct PortHandle {
    outgoing: mpsc::Sender<Npdu>,
    incoming: mpsc::Receiver<Npdu>,
    shutdown: watch::Sender<bool>,
    stats: watch::Receiver<MstpStats>,
}

impl PortHandle {
    /// Queue an NPDU for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::Io`] if the driver has stopped.
    pub async fn send(&self, npdu: Vec<u8>, dest: DataLinkAddress) -> Result<()> {
        self.outgoing.send((npdu, dest)).await.map_err(|_| {
            DataLinkError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "MS/TP driver stopped",
            ))
        })
    }

    /// Next received NPDU, or `None` once the driver has stopped.
    pub async fn recv(&mut self) -> Option<Npdu> {
        self.incoming.recv().await
    }

    /// Counters as of the last drive cycle.
    pub fn stats(&self) -> MstpStats {
        *self.stats.borrow()
    }

    /// Ask the driver to stop after its current cycle.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Drives an [`MstpDataLink`] from a tokio task.
pub struct PortDriver<S> {
    link: MstpDataLink<S>,
    tick: Duration,
    outgoing: mpsc::Receiver<Npdu>,
    incoming: mpsc::Sender<Npdu>,
    shutdown: watch::Receiver<bool>,
    stats: watch::Sender<MstpStats>,
    backlog: Option<Npdu>,
}

impl<S: SerialPort + Send + Sync + 'static> PortDriver<S> {
    /// Wrap `link`, polling it every `tick`.
    pub fn new(link: MstpDataLink<S>, tick: Duration) -> (Self, PortHandle) {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(MSTP_QUEUE_CAPACITY);
        let (incoming_tx, incoming_rx) = mpsc::channel(MSTP_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (stats_tx, stats_rx) = watch::channel(link.stats());

        let driver = Self {
            link,
            tick,
            outgoing: outgoing_rx,
            incoming: incoming_tx,
            shutdown: shutdown_rx,
            stats: stats_tx,
            backlog: None,
        };
        let handle = PortHandle {
            outgoing: outgoing_tx,
            incoming: incoming_rx,
            shutdown: shutdown_tx,
            stats: stats_rx,
        };
        (driver, handle)
    }

    /// Run the driver on a new task. The task returns the link when it stops.
    pub fn spawn(self) -> JoinHandle<MstpDataLink<S>> {
        tokio::spawn(self.run())
    }

    /// Poll the link until shutdown is requested or the handle is dropped.
    pub async fn run(mut self) -> MstpDataLink<S> {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.cycle(),
                _ = self.shutdown.changed() => {
                    debug!("MS/TP driver: shutting down");
                    break;
                }
            }
        }

        self.link
    }

    fn cycle(&mut self) {
        self.queue_outgoing();
        self.link.poll(std::time::Instant::now());

        while let Ok(received) = self.link.receive_frame() {
            if let Err(e) = self.incoming.try_send(received) {
                warn!("MS/TP driver: dropping received NPDU: {}", e);
            }
        }
        self.stats.send_replace(self.link.stats());
    }

    /// Move NPDUs from the handle into the link until its queue is full.
    fn queue_outgoing(&mut self) {
        loop {
            let npdu = match self.backlog.take() {
                Some(npdu) => npdu,
                None => match self.outgoing.try_recv() {
                    Ok(npdu) => npdu,
                    Err(_) => break,
                },
            };

            match self.link.send_frame(&npdu.0, &npdu.1) {
                Ok(()) => {}
                Err(DataLinkError::QueueFull) => {
                    self.backlog = Some(npdu);
                    break;
                }
                Err(e) => warn!("MS/TP driver: dropping NPDU for {:?}: {}", npdu.1, e),
            }
        }
    }
}
