//! Node-level station and the reliable-delivery state machine
//!
//! A [`Station`] is one addressable endpoint of the point-to-point protocol.
//! It owns the protocol state, the per-station sequence counter, the
//! duplicate history, and the four user notification slots, and it drives a
//! [`RadioTransport`] through repeated [`process`] ticks.
//!
//! ## Reliable delivery
//!
//! [`send_reliable_packet`] runs an internal send cycle advanced one step per
//! tick rather than blocking the caller:
//!
//! ```text
//!          ┌────────────────────────────────────────────────┐
//!          ▼                                                │
//!    ┌──────────┐ tx done ┌──────────┐  ack rx   done       │ ack-wait
//!    │  jitter  │────────►│ sending  │─────────► (notify)   │ misses
//!    │ 0-500 ms │◄────────│          │──────────┐           │ exhausted
//!    └──────────┘ tx t/o  └──────────┘ tx done  ▼           │
//!                          (ACK payload: done)  wait-ack ───┘
//! ```
//!
//! While a cycle runs the station is in internal-callback mode and ordinary
//! user operations return [`LinkError::Busy`]. Inbound data packets trigger a
//! deferred acknowledgement cycle: the `ACK` reply is transmitted back to the
//! origin first, and only then does the user receive notification fire.
//!
//! [`process`]: Station::process
//! [`send_reliable_packet`]: Station::send_reliable_packet

use crate::config::LinkConfig;
use crate::dedup::DuplicateDetector;
use crate::error::{LinkError, LinkResult};
use crate::header::{PacketHeader, BROADCAST, HEADER_SIZE, MAX_ADDRESS, MAX_SEQUENCE};
use crate::transport::{Clock, RadioEvent, RadioTransport};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Reserved payload recognized as an acknowledgement
pub const ACK_PAYLOAD: &[u8] = b"ACK";

/// Protocol state; exactly one is active per station at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing in flight
    Idle,
    /// A transmission was handed to the radio
    Sending,
    /// The radio gave up on a transmission (internal cycles only)
    SendTimeout,
    /// Listening for a frame
    Receiving,
    /// The listen window elapsed (internal cycles only)
    ReceiveTimeout,
}

/// A received application payload with its signal metrics
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPacket {
    /// Application data with any header stripped
    pub data: Vec<u8>,
    /// Received signal strength in dBm
    pub rssi: i16,
    /// Signal-to-noise ratio in dB
    pub snr: i8,
}

/// Counters for link activity
#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    /// Frames handed to the radio
    pub packets_tx: u64,
    /// Data packets received (delivered or cached)
    pub packets_rx: u64,
    /// Acknowledgements transmitted
    pub acks_tx: u64,
    /// Acknowledgements received
    pub acks_rx: u64,
    /// Duplicate receptions suppressed
    pub duplicates: u64,
    /// Full send cycles restarted after an exhausted ACK wait
    pub retries: u64,
}

type ReceiveCallback = Box<dyn FnMut(&ReceivedPacket)>;
type NotifyCallback = Box<dyn FnMut()>;

/// Phase of an in-flight internal send cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendPhase {
    /// Waiting out the random pre-transmit delay
    Jitter { resume_at: u64 },
    /// Frame handed to the radio, waiting for TX completion
    Sending,
    /// Listening for the acknowledgement
    WaitAck,
}

/// An in-flight reliable send
#[derive(Debug)]
struct ReliableSend {
    data: Vec<u8>,
    destination: u16,
    /// ACK payloads are complete after one transmit; they are never ACKed
    is_ack: bool,
    phase: SendPhase,
    /// Consecutive ACK-wait misses in the current cycle
    ack_misses: u8,
    /// Completed send cycles
    attempts: u32,
}

/// One addressable endpoint of the reliable point-to-point protocol
pub struct Station<T: RadioTransport, C: Clock> {
    transport: T,
    clock: C,
    config: LinkConfig,
    rng: SmallRng,
    address: u16,
    state: LinkState,
    /// Last sequence id used; 0 = none sent yet
    sequence: u8,
    dedup: DuplicateDetector,
    stats: LinkStats,

    /// Internal-callback mode: ACK/retry cycles run, user operations are Busy
    internal: bool,
    reliable: Option<ReliableSend>,
    /// Origin owed an acknowledgement
    ack_pending: Option<u16>,
    /// When the deferred ACK transmit may start
    ack_due_at: Option<u64>,
    /// Duplicate arrival: suppress the user delivery for this cycle
    ignore_packet: bool,
    /// An ACK addressed to this station arrived
    ack_seen: bool,
    /// Last addressed data packet, delivered after its ACK goes out
    last_packet: Option<ReceivedPacket>,
    /// Software receive deadline, absolute clock ms
    receive_deadline: Option<u64>,

    on_receive: Option<ReceiveCallback>,
    on_receive_timeout: Option<NotifyCallback>,
    on_send_done: Option<NotifyCallback>,
    on_send_timeout: Option<NotifyCallback>,
}

impl<T: RadioTransport, C: Clock> Station<T, C> {
    /// Create a station with the default configuration
    pub fn new(transport: T, clock: C) -> Self {
        Self::with_config(transport, clock, LinkConfig::default())
    }

    /// Create a station with an explicit configuration
    pub fn with_config(transport: T, clock: C, config: LinkConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };
        Self {
            transport,
            clock,
            config,
            rng,
            address: BROADCAST,
            state: LinkState::Idle,
            sequence: 0,
            dedup: DuplicateDetector::new(),
            stats: LinkStats::default(),
            internal: false,
            reliable: None,
            ack_pending: None,
            ack_due_at: None,
            ignore_packet: false,
            ack_seen: false,
            last_packet: None,
            receive_deadline: None,
            on_receive: None,
            on_receive_timeout: None,
            on_send_done: None,
            on_send_timeout: None,
        }
    }

    /// Assign the station address and reset protocol state.
    ///
    /// Address 0 keeps the station anonymous: it can broadcast and receive
    /// broadcasts but cannot take part in reliable exchanges.
    pub fn begin(&mut self, address: u16) -> LinkResult<()> {
        if address > MAX_ADDRESS {
            return Err(LinkError::InvalidAddress(address));
        }
        self.address = address;
        self.state = LinkState::Idle;
        self.sequence = 0;
        self.internal = false;
        self.reliable = None;
        self.ack_pending = None;
        self.ack_due_at = None;
        self.ignore_packet = false;
        self.ack_seen = false;
        self.receive_deadline = None;
        debug!(address, "station started");
        Ok(())
    }

    /// Idle the radio and return to [`LinkState::Idle`]
    pub fn stop(&mut self) {
        self.transport.sleep();
        self.state = LinkState::Idle;
    }

    /// Current protocol state
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Whether a user operation would currently return [`LinkError::Busy`].
    ///
    /// True while anything is in flight, including the internal ACK and
    /// retry cycles that run between idle protocol states.
    pub fn is_busy(&self) -> bool {
        self.internal || self.state != LinkState::Idle
    }

    /// This station's address (0 = anonymous)
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Activity counters
    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Last addressed data packet received, if any
    pub fn last_packet(&self) -> Option<&ReceivedPacket> {
        self.last_packet.as_ref()
    }

    /// Register the receive notification; last registration wins
    pub fn set_on_receive(&mut self, callback: impl FnMut(&ReceivedPacket) + 'static) {
        self.on_receive = Some(Box::new(callback));
    }

    /// Register the listen-timeout notification; last registration wins
    pub fn set_on_receive_timeout(&mut self, callback: impl FnMut() + 'static) {
        self.on_receive_timeout = Some(Box::new(callback));
    }

    /// Register the send-done notification; last registration wins
    pub fn set_on_send_done(&mut self, callback: impl FnMut() + 'static) {
        self.on_send_done = Some(Box::new(callback));
    }

    /// Register the send-timeout notification; last registration wins
    pub fn set_on_send_timeout(&mut self, callback: impl FnMut() + 'static) {
        self.on_send_timeout = Some(Box::new(callback));
    }

    /// Fire-and-forget send (destination 0 = broadcast)
    pub fn send_packet(&mut self, data: &[u8], destination: u16) -> LinkResult<()> {
        if destination > MAX_ADDRESS {
            return Err(LinkError::InvalidAddress(destination));
        }
        if self.internal {
            return Err(LinkError::Busy);
        }
        self.transmit_frame(data, destination)
    }

    /// Acknowledged send with retry; broadcast is not allowed.
    ///
    /// Returns as soon as the cycle is accepted; progress happens across
    /// [`process`] ticks and the outcome surfaces through the send-done or
    /// send-timeout notification.
    ///
    /// [`process`]: Station::process
    pub fn send_reliable_packet(&mut self, data: &[u8], destination: u16) -> LinkResult<()> {
        if destination == BROADCAST {
            return Err(LinkError::BroadcastNotAllowed);
        }
        if destination > MAX_ADDRESS {
            return Err(LinkError::InvalidAddress(destination));
        }
        if self.address == BROADCAST {
            return Err(LinkError::AddressRequired);
        }
        if self.internal || self.state != LinkState::Idle {
            return Err(LinkError::Busy);
        }
        self.internal = true;
        self.start_reliable(data.to_vec(), destination, false);
        Ok(())
    }

    /// Start listening for a packet (timeout 0 = continuous)
    pub fn listen_to_packet(&mut self, timeout_ms: u32) -> LinkResult<()> {
        if self.internal {
            return Err(LinkError::Busy);
        }
        if self.state != LinkState::Idle {
            return Err(LinkError::Busy);
        }
        self.start_listen(timeout_ms)
    }

    /// Pump transport events and advance timers and internal cycles.
    ///
    /// Must be invoked periodically; all protocol work happens here.
    pub fn process(&mut self) {
        while let Some(event) = self.transport.poll_event() {
            self.handle_event(event);
        }
        self.check_receive_deadline();
        self.drive_internal();
    }

    // ------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------

    /// Frame and transmit, advancing the sequence counter (wrap 99 -> 1)
    fn transmit_frame(&mut self, data: &[u8], destination: u16) -> LinkResult<()> {
        if self.state != LinkState::Idle {
            return Err(LinkError::Busy);
        }
        self.sequence = if self.sequence >= MAX_SEQUENCE {
            1
        } else {
            self.sequence + 1
        };
        let header = PacketHeader::new(self.address, destination, self.sequence)?;
        let frame = header.frame(data);
        trace!(header = %header, bytes = frame.len(), "transmitting");
        self.transport.send(&frame)?;
        self.stats.packets_tx += 1;
        self.state = LinkState::Sending;
        Ok(())
    }

    fn start_reliable(&mut self, data: Vec<u8>, destination: u16, is_ack: bool) {
        let resume_at = self.clock.now_millis() + self.jitter();
        self.ack_seen = false;
        self.reliable = Some(ReliableSend {
            data,
            destination,
            is_ack,
            phase: SendPhase::Jitter { resume_at },
            ack_misses: 0,
            attempts: 0,
        });
    }

    fn jitter(&mut self) -> u64 {
        if self.config.jitter_max_ms == 0 {
            0
        } else {
            self.rng.gen_range(0..=self.config.jitter_max_ms) as u64
        }
    }

    fn start_listen(&mut self, timeout_ms: u32) -> LinkResult<()> {
        self.receive_deadline = if timeout_ms > 0 {
            Some(self.clock.now_millis() + timeout_ms as u64)
        } else {
            None
        };
        self.state = LinkState::Receiving;
        if let Err(err) = self.transport.receive() {
            self.state = LinkState::Idle;
            self.receive_deadline = None;
            return Err(err);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Event handling
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: RadioEvent) {
        match event {
            RadioEvent::TxDone => self.on_tx_done(),
            RadioEvent::TxTimeout => self.on_tx_timeout(),
            RadioEvent::RxDone { payload, rssi, snr } => self.on_rx_done(payload, rssi, snr),
            RadioEvent::RxTimeout => self.on_rx_timeout(),
        }
    }

    fn on_tx_done(&mut self) {
        self.state = LinkState::Idle;
        if !self.internal {
            if let Some(callback) = self.on_send_done.as_mut() {
                callback();
            }
        }
    }

    fn on_tx_timeout(&mut self) {
        self.transport.sleep();
        self.state = if self.internal {
            LinkState::SendTimeout
        } else {
            LinkState::Idle
        };
        if !self.internal {
            if let Some(callback) = self.on_send_timeout.as_mut() {
                callback();
            }
        }
    }

    fn on_rx_timeout(&mut self) {
        self.receive_deadline = None;
        self.state = if self.internal {
            LinkState::ReceiveTimeout
        } else {
            LinkState::Idle
        };
        if !self.internal {
            if let Some(callback) = self.on_receive_timeout.as_mut() {
                callback();
            }
        }
    }

    /// The receive path: header check, duplicate suppression, ACK
    /// recognition, deferred acknowledgement arming, and delivery.
    fn on_rx_done(&mut self, payload: Vec<u8>, rssi: i16, snr: i8) {
        let header = PacketHeader::parse(&payload);

        // Addressed to someone else: not for this node
        if let Some(h) = header {
            if !h.is_broadcast() && h.destination() != self.address {
                trace!(header = %h, "ignoring packet for another station");
                self.transport.sleep();
                self.state = LinkState::Idle;
                return;
            }
        }

        let duplicate = match header {
            Some(h) => self.dedup.is_duplicate(h.origin(), h.sequence()),
            None => false,
        };
        if duplicate {
            self.ignore_packet = true;
            self.stats.duplicates += 1;
            if let Some(h) = header {
                debug!(header = %h, "duplicate reception");
            }
        } else {
            self.receive_deadline = None;
        }

        let offset = if header.is_some() { HEADER_SIZE } else { 0 };
        let data = payload[offset..].to_vec();
        let is_ack = data == ACK_PAYLOAD;

        // An ACK reply can only go back to a concrete origin; anonymous
        // senders are treated like broadcasters.
        let wants_ack = header
            .map_or(false, |h| !h.is_broadcast() && h.origin() != BROADCAST);

        if is_ack {
            if header.map_or(false, |h| !h.is_broadcast()) {
                self.ack_seen = true;
                self.stats.acks_rx += 1;
            }
        } else if wants_ack {
            self.internal = true;
            self.ack_pending = header.map(|h| h.origin());
            self.last_packet = Some(ReceivedPacket {
                data: data.clone(),
                rssi,
                snr,
            });
            self.stats.packets_rx += 1;
            if let Some(h) = header {
                if !duplicate {
                    self.dedup.record(h.origin(), h.sequence());
                }
            }
        }

        // Radio idled before any user callback fires
        self.transport.sleep();

        if !is_ack && !wants_ack && !self.internal {
            // Headerless or broadcast data: direct delivery, no ACK cycle
            self.stats.packets_rx += 1;
            let packet = ReceivedPacket { data, rssi, snr };
            if let Some(callback) = self.on_receive.as_mut() {
                callback(&packet);
            }
        }

        self.state = LinkState::Idle;
    }

    // ------------------------------------------------------------------
    // Internal cycles
    // ------------------------------------------------------------------

    fn check_receive_deadline(&mut self) {
        if self.state != LinkState::Receiving {
            return;
        }
        if let Some(deadline) = self.receive_deadline {
            if self.clock.now_millis() >= deadline {
                self.on_rx_timeout();
            }
        }
    }

    fn drive_internal(&mut self) {
        if !self.internal {
            return;
        }

        // Deferred acknowledgement: once idle with no send in flight, wait
        // for the peer to enter its listen window, then reply.
        if self.reliable.is_none() {
            if let Some(origin) = self.ack_pending {
                if self.state == LinkState::Idle {
                    let now = self.clock.now_millis();
                    match self.ack_due_at {
                        None => {
                            self.ack_due_at = Some(now + self.config.ack_delay_ms as u64);
                        }
                        Some(due) if now >= due => {
                            self.ack_due_at = None;
                            debug!(to = origin, "acknowledging");
                            self.start_reliable(ACK_PAYLOAD.to_vec(), origin, true);
                        }
                        Some(_) => {}
                    }
                }
            }
        }

        self.drive_reliable();
    }

    fn drive_reliable(&mut self) {
        let Some(mut send) = self.reliable.take() else {
            return;
        };
        let now = self.clock.now_millis();

        match send.phase {
            SendPhase::Jitter { resume_at } => {
                if self.state == LinkState::Idle && now >= resume_at {
                    match self.transmit_frame(&send.data, send.destination) {
                        Ok(()) => send.phase = SendPhase::Sending,
                        Err(err) => {
                            warn!(%err, "transmit failed, backing off");
                            send.phase = SendPhase::Jitter {
                                resume_at: now + self.jitter(),
                            };
                        }
                    }
                }
                self.reliable = Some(send);
            }

            SendPhase::Sending => match self.state {
                LinkState::Idle => {
                    // TX completed
                    if send.is_ack {
                        self.finish_ack_cycle();
                    } else {
                        send.phase = SendPhase::WaitAck;
                        if self.start_listen(self.config.ack_timeout_ms).is_err() {
                            // Receive refused: surfaces as a miss below
                        }
                        self.reliable = Some(send);
                    }
                }
                LinkState::SendTimeout => {
                    debug!("transmit timed out, retrying");
                    self.state = LinkState::Idle;
                    send.phase = SendPhase::Jitter {
                        resume_at: now + self.jitter(),
                    };
                    self.reliable = Some(send);
                }
                _ => self.reliable = Some(send),
            },

            SendPhase::WaitAck => {
                if self.ack_seen {
                    self.ack_seen = false;
                    self.complete_reliable();
                    return;
                }
                match self.state {
                    // ReceiveTimeout: the ACK window elapsed. Idle: the
                    // listen was consumed by a non-ACK packet; either way
                    // this wait missed.
                    LinkState::ReceiveTimeout | LinkState::Idle => {
                        self.state = LinkState::Idle;
                        send.ack_misses += 1;
                        if send.ack_misses < self.config.max_ack_tries {
                            let _ = self.start_listen(self.config.ack_timeout_ms);
                            self.reliable = Some(send);
                        } else {
                            send.attempts += 1;
                            if let Some(max) = self.config.max_send_attempts {
                                if send.attempts >= max {
                                    warn!(
                                        attempts = send.attempts,
                                        "reliable send exhausted its retry budget"
                                    );
                                    self.abort_reliable();
                                    return;
                                }
                            }
                            debug!(attempt = send.attempts + 1, "no acknowledgement, resending");
                            self.stats.retries += 1;
                            send.ack_misses = 0;
                            send.phase = SendPhase::Jitter {
                                resume_at: now + self.jitter(),
                            };
                            self.reliable = Some(send);
                        }
                    }
                    _ => self.reliable = Some(send),
                }
            }
        }
    }

    /// Acknowledgement transmitted: deliver the cached packet unless the
    /// duplicate flag suppressed it.
    fn finish_ack_cycle(&mut self) {
        self.reliable = None;
        self.ack_pending = None;
        self.internal = false;
        self.stats.acks_tx += 1;
        if self.ignore_packet {
            self.ignore_packet = false;
            debug!("duplicate packet suppressed after re-acknowledging");
        } else if let Some(packet) = self.last_packet.as_ref() {
            if let Some(callback) = self.on_receive.as_mut() {
                callback(packet);
            }
        }
    }

    /// Reliable send acknowledged by the peer
    fn complete_reliable(&mut self) {
        self.reliable = None;
        // Stay internal if a data packet consumed one of our ACK waits and
        // still needs its own acknowledgement.
        self.internal = self.ack_pending.is_some();
        debug!("reliable send acknowledged");
        if let Some(callback) = self.on_send_done.as_mut() {
            callback();
        }
    }

    /// Retry budget exhausted
    fn abort_reliable(&mut self) {
        self.reliable = None;
        self.internal = self.ack_pending.is_some();
        if let Some(callback) = self.on_send_timeout.as_mut() {
            callback();
        }
    }
}
