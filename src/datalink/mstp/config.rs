//! MS/TP port configuration

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::frame::MSTP_MAX_DATA_LENGTH;
use super::timing::{MstpTiming, MAX_FRAME_ABORT, NPOLL, NRETRY_TOKEN, SUPPORTED_BAUD_RATES};
use super::{is_master_node, validate_mstp_address, MSTP_BROADCAST_ADDRESS};
use crate::datalink::{DataLinkError, Result};

/// Lowest address a zero-configuration node will claim. Candidates wrap
/// from `max_master` back to this address.
pub const ZERO_CONFIG_STATION_MIN: u8 = 64;

/// Whether the node takes part in token passing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NodeRole {
    #[default]
    Master,
    Slave,
}

/// Automatic address selection for a master that starts without an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ZeroConfigSettings {
    /// Only used when the station address is 255.
    pub enabled: bool,
    /// First address tried.
    pub preferred_station: u8,
    /// Identifier sent in the claim Test Request; must be unique on the segment.
    pub uuid: [u8; 16],
}

impl Default for ZeroConfigSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            preferred_station: ZERO_CONFIG_STATION_MIN,
            uuid: [0; 16],
        }
    }
}

/// MS/TP node configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MstpConfig {
    /// Local station address (0-127 master, 128-254 slave, 255 unassigned)
    pub station_address: u8,
    /// Maximum master address (highest master on network)
    pub max_master: u8,
    /// Maximum info frames (number of frames to send when holding token)
    pub max_info_frames: u8,
    /// Line speed in bits per second
    pub baud_rate: u32,
    pub role: NodeRole,
    pub zero_config: ZeroConfigSettings,
    /// Protocol timeouts
    pub timing: MstpTiming,
    /// Largest payload accepted by the receiver
    pub input_buffer_size: usize,
    /// Tokens between maintenance polls
    pub npoll: u8,
    /// Token retries before a successor is dropped
    pub nretry_token: u8,
}

impl Default for MstpConfig {
    fn default() -> Self {
        Self {
            station_address: 127,
            max_master: 127,
            max_info_frames: 1,
            baud_rate: 38400,
            role: NodeRole::Master,
            zero_config: ZeroConfigSettings::default(),
            timing: MstpTiming::for_baud_rate(38400),
            input_buffer_size: MSTP_MAX_DATA_LENGTH,
            npoll: NPOLL,
            nretry_token: NRETRY_TOKEN,
        }
    }
}

impl MstpConfig {
    /// Master configuration for `station_address` with default limits.
    pub fn master(station_address: u8) -> Self {
        Self {
            station_address,
            ..Default::default()
        }
    }

    /// Slave configuration for `station_address`.
    pub fn slave(station_address: u8) -> Self {
        Self {
            station_address,
            role: NodeRole::Slave,
            ..Default::default()
        }
    }

    /// Set the line speed and the timing derived from it.
    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self.timing = MstpTiming {
            frame_abort: MstpTiming::for_baud_rate(baud_rate).frame_abort,
            ..self.timing
        };
        self
    }

    /// Whether the node will negotiate its own address at start-up.
    pub fn uses_zero_config(&self) -> bool {
        self.role == NodeRole::Master
            && self.zero_config.enabled
            && self.station_address == MSTP_BROADCAST_ADDRESS
    }

    /// Check the configuration before a port is built from it.
    ///
    /// # Errors
    ///
    /// Returns [`DataLinkError::InvalidConfig`] describing the first problem
    /// found, or [`DataLinkError::AddressError`] for a station address the
    /// role cannot use.
    pub fn validate(&self) -> Result<()> {
        if !is_master_node(self.max_master) {
            return Err(DataLinkError::InvalidConfig(format!(
                "max_master {} is above 127",
                self.max_master
            )));
        }
        if self.max_info_frames == 0 {
            return Err(DataLinkError::InvalidConfig(
                "max_info_frames must be at least 1".into(),
            ));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            return Err(DataLinkError::InvalidConfig(format!(
                "unsupported baud rate {}",
                self.baud_rate
            )));
        }
        if self.npoll == 0 {
            return Err(DataLinkError::InvalidConfig("npoll must be at least 1".into()));
        }
        let min_frame_abort = MstpTiming::min_frame_abort(self.baud_rate);
        if self.timing.frame_abort < min_frame_abort || self.timing.frame_abort > MAX_FRAME_ABORT {
            return Err(DataLinkError::InvalidConfig(format!(
                "frame abort {:?} outside {:?}..={:?}",
                self.timing.frame_abort, min_frame_abort, MAX_FRAME_ABORT
            )));
        }
        if self.input_buffer_size == 0 || self.input_buffer_size > MSTP_MAX_DATA_LENGTH {
            return Err(DataLinkError::InvalidConfig(format!(
                "input buffer size {} outside 1..={}",
                self.input_buffer_size, MSTP_MAX_DATA_LENGTH
            )));
        }

        if self.uses_zero_config() {
            // Candidates run from the preferred address up to max_master
            let preferred = self.zero_config.preferred_station;
            if !(ZERO_CONFIG_STATION_MIN..=self.max_master).contains(&preferred) {
                return Err(DataLinkError::InvalidConfig(format!(
                    "preferred station {} outside {}..={}",
                    preferred, ZERO_CONFIG_STATION_MIN, self.max_master
                )));
            }
            return Ok(());
        }

        validate_mstp_address(self.station_address, self.role)?;
        if self.role == NodeRole::Master && self.station_address > self.max_master {
            return Err(DataLinkError::InvalidConfig(format!(
                "station address {} is above max_master {}",
                self.station_address, self.max_master
            )));
        }

        Ok(())
    }
}
