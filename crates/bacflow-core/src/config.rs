use std::{default::Default, time::Duration};

use crate::{
    constants::{DEFAULT_WINDOW_SIZE, MAX_APDU_LENGTH, MAX_WINDOW_SIZE, MIN_APDU_LENGTH},
    error::{ErrorKind, Result},
};

#[derive(Clone, Debug)]
/// Configuration options to tune transaction timing, segmentation and the UDP collaborator.
pub struct Config {
    /// How long a sender waits for a SegmentACK before resending the window.
    pub segment_timeout: Duration,
    /// How long a receiver waits for the next segment before abandoning a
    /// reassembly. Must be at least `segment_timeout`.
    pub reassembly_timeout: Duration,
    /// How long an initiator waits for the reply to a confirmed request.
    pub reply_timeout: Duration,
    /// Retransmissions attempted before a transaction is aborted.
    pub max_retries: u8,
    /// Window size proposed for segmented transfers (1-127).
    pub proposed_window_size: u8,
    /// Largest APDU this node accepts; also bounds outgoing segment size.
    pub max_apdu_length_accepted: u16,
    /// Max segments this node accepts per message. None means unspecified.
    pub max_segments_accepted: Option<u8>,
    /// Whether outgoing requests announce that segmented replies are accepted.
    pub segmented_response_accepted: bool,
    /// Whether incoming segmented requests are reassembled (otherwise aborted).
    pub segmentation_supported: bool,
    /// Upper bound for a single reassembled message, in bytes.
    pub max_reassembly_bytes: usize,
    /// Sleep bound for the timeout driver when no transaction is open.
    pub driver_idle_interval: Duration,
    /// Size of the UDP receive buffer handed to `recv_from`.
    pub receive_buffer_size: usize,
    /// Enable SO_BROADCAST on the UDP socket.
    pub socket_broadcast: bool,
    /// Socket receive buffer size in bytes (None = system default).
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = system default).
    pub socket_send_buffer_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            segment_timeout: Duration::from_millis(2000),
            reassembly_timeout: Duration::from_millis(8000),
            reply_timeout: Duration::from_millis(3000),
            max_retries: 3,
            proposed_window_size: DEFAULT_WINDOW_SIZE,
            max_apdu_length_accepted: MAX_APDU_LENGTH,
            max_segments_accepted: Some(64),
            segmented_response_accepted: true,
            segmentation_supported: true,
            max_reassembly_bytes: 64 * 1024,
            driver_idle_interval: Duration::from_millis(500),
            receive_buffer_size: MAX_APDU_LENGTH as usize + 64, // room for link/network headers
            socket_broadcast: true,
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
        }
    }
}

impl Config {
    /// Checks the values the engine relies on. Called by the endpoint on construction.
    pub fn validate(&self) -> Result<()> {
        if self.proposed_window_size == 0 || self.proposed_window_size > MAX_WINDOW_SIZE {
            return Err(ErrorKind::InvalidConfig("proposed_window_size must be within 1..=127"));
        }
        if self.max_apdu_length_accepted < MIN_APDU_LENGTH {
            return Err(ErrorKind::InvalidConfig("max_apdu_length_accepted must be at least 50"));
        }
        if self.segment_timeout.is_zero() || self.reply_timeout.is_zero() {
            return Err(ErrorKind::InvalidConfig("timeouts must be non-zero"));
        }
        if self.reassembly_timeout < self.segment_timeout {
            return Err(ErrorKind::InvalidConfig("reassembly_timeout must not be below segment_timeout"));
        }
        if self.max_reassembly_bytes == 0 {
            return Err(ErrorKind::InvalidConfig("max_reassembly_bytes must be non-zero"));
        }
        Ok(())
    }

    /// Largest payload slice carried by one segment of a message whose
    /// segmented header is `header_size` bytes long.
    pub fn segment_payload_size(&self, header_size: usize) -> usize {
        (self.max_apdu_length_accepted as usize).saturating_sub(header_size).max(1)
    }
}
