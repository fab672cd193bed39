//! Hop-by-hop store-and-forward relay
//!
//! Builds a chain of stations on top of the reliable link: each node
//! accumulates records (its own and any received from upstream), batches
//! them into a JSON envelope, and reliably forwards the batch to its
//! configured downstream neighbor. A node with downstream address 0 is the
//! terminal collector where records come to rest.
//!
//! The control loop alternates between forwarding and listening:
//!
//! ```text
//!      ┌────────┐ records queued  ┌────────┐
//! ┌───►│ check  │────────────────►│  send  │──┐
//! │    └────────┘                 └────────┘  │
//! │         │ queue empty                     │
//! │         ▼                                 │
//! │    ┌─────────┐                ┌────────┐  │
//! │    │ receive │───────────────►│  wait  │◄─┘
//! │    └─────────┘                └────────┘
//! │                                    │ station idle
//! └────────────────────────────────────┘
//! ```

use crate::error::LinkError;
use crate::station::Station;
use crate::transport::{Clock, RadioTransport};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, trace, warn};

/// One unit of relayed data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayRecord {
    /// Station that produced the record
    pub origin: u16,
    /// Per-origin record index
    pub index: u32,
    /// Application payload
    pub body: String,
}

/// Wire envelope: one hop's worth of accumulated records
#[derive(Debug, Serialize, Deserialize)]
struct RelayBatch {
    from: u16,
    records: Vec<RelayRecord>,
}

/// Relay node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Next hop address; 0 makes this node the terminal collector
    pub downstream: u16,
    /// Listen window between forwarding rounds (ms)
    pub listen_timeout_ms: u32,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            downstream: 0,
            listen_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayPhase {
    /// Decide whether to forward or listen
    Check,
    /// An operation is in flight; resume once the station is idle
    Wait,
}

#[derive(Debug, Default)]
struct RelayQueues {
    /// Records waiting to move downstream
    inbox: VecDeque<RelayRecord>,
    /// Records that reached their terminal node
    delivered: Vec<RelayRecord>,
}

/// A store-and-forward node in a relay chain
pub struct Relay<T: RadioTransport, C: Clock> {
    station: Station<T, C>,
    config: RelayConfig,
    queues: Rc<RefCell<RelayQueues>>,
    phase: RelayPhase,
    next_index: u32,
}

impl<T: RadioTransport, C: Clock> Relay<T, C> {
    /// Wrap a started station in relay behavior.
    ///
    /// Replaces the station's receive and receive-timeout registrations:
    /// incoming batches are parsed and queued (or collected, on a terminal
    /// node) and other traffic is ignored.
    pub fn new(mut station: Station<T, C>, config: RelayConfig) -> Self {
        let queues = Rc::new(RefCell::new(RelayQueues::default()));
        let terminal = config.downstream == 0;

        let sink = queues.clone();
        station.set_on_receive(move |packet| {
            let batch: RelayBatch = match serde_json::from_slice(&packet.data) {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(%err, "discarding non-batch payload");
                    return;
                }
            };
            debug!(
                from = batch.from,
                records = batch.records.len(),
                rssi = packet.rssi,
                "batch received"
            );
            let mut queues = sink.borrow_mut();
            if terminal {
                queues.delivered.extend(batch.records);
            } else {
                queues.inbox.extend(batch.records);
            }
        });
        station.set_on_receive_timeout(|| trace!("listen window elapsed"));

        Self {
            station,
            config,
            queues,
            phase: RelayPhase::Check,
            next_index: 0,
        }
    }

    /// Queue a locally produced record
    pub fn produce(&mut self, body: impl Into<String>) {
        let record = RelayRecord {
            origin: self.station.address(),
            index: self.next_index,
            body: body.into(),
        };
        self.next_index += 1;
        self.queues.borrow_mut().inbox.push_back(record);
    }

    /// Records waiting to move downstream
    pub fn pending(&self) -> usize {
        self.queues.borrow().inbox.len()
    }

    /// Drain the records collected at this terminal node
    pub fn take_delivered(&mut self) -> Vec<RelayRecord> {
        std::mem::take(&mut self.queues.borrow_mut().delivered)
    }

    /// The underlying station
    pub fn station(&self) -> &Station<T, C> {
        &self.station
    }

    /// Advance the relay: pumps the station and runs the control phases.
    /// Call periodically, like [`Station::process`].
    pub fn tick(&mut self) {
        self.station.process();

        match self.phase {
            RelayPhase::Check => self.check(),
            RelayPhase::Wait => {
                if !self.station.is_busy() {
                    self.phase = RelayPhase::Check;
                }
            }
        }
    }

    fn check(&mut self) {
        let has_records = !self.queues.borrow().inbox.is_empty();

        if has_records && self.config.downstream == 0 {
            // Terminal node: locally produced records are already home
            let mut queues = self.queues.borrow_mut();
            let records: Vec<RelayRecord> = queues.inbox.drain(..).collect();
            queues.delivered.extend(records);
            return;
        }

        if has_records {
            let batch = RelayBatch {
                from: self.station.address(),
                records: self.queues.borrow().inbox.iter().cloned().collect(),
            };
            let payload = match serde_json::to_vec(&batch) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(%err, "dropping unencodable batch");
                    self.queues.borrow_mut().inbox.clear();
                    return;
                }
            };
            match self
                .station
                .send_reliable_packet(&payload, self.config.downstream)
            {
                Ok(()) => {
                    debug!(
                        to = self.config.downstream,
                        records = batch.records.len(),
                        "forwarding batch"
                    );
                    self.queues.borrow_mut().inbox.clear();
                    self.phase = RelayPhase::Wait;
                }
                Err(LinkError::Busy) => {
                    // Try again next tick
                }
                Err(err) => {
                    warn!(%err, "cannot forward batch");
                    self.phase = RelayPhase::Wait;
                }
            }
        } else if self
            .station
            .listen_to_packet(self.config.listen_timeout_ms)
            .is_ok()
        {
            self.phase = RelayPhase::Wait;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkConfig;
    use crate::simulation::{SimChannel, SimClock, SimRadio};

    fn relay_node(
        channel: &SimChannel,
        clock: &SimClock,
        address: u16,
        downstream: u16,
        seed: u64,
    ) -> Relay<SimRadio, SimClock> {
        let config = LinkConfig {
            seed: Some(seed),
            jitter_max_ms: 50,
            ..Default::default()
        };
        let mut station = Station::with_config(channel.endpoint(), clock.clone(), config);
        station.begin(address).unwrap();
        Relay::new(
            station,
            RelayConfig {
                downstream,
                listen_timeout_ms: 500,
            },
        )
    }

    #[test]
    fn test_terminal_collects_own_records() {
        let channel = SimChannel::new();
        let clock = SimClock::new();
        let mut terminal = relay_node(&channel, &clock, 1, 0, 1);

        terminal.produce("local");
        terminal.tick();

        let delivered = terminal.take_delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].body, "local");
        assert_eq!(delivered[0].origin, 1);
    }

    #[test]
    fn test_two_hop_forwarding() {
        let channel = SimChannel::new();
        let clock = SimClock::new();
        let mut upstream = relay_node(&channel, &clock, 2, 1, 7);
        let mut terminal = relay_node(&channel, &clock, 1, 0, 8);

        upstream.produce("reading-a");
        upstream.produce("reading-b");

        let mut delivered = Vec::new();
        for _ in 0..2_000 {
            clock.advance(10);
            upstream.tick();
            terminal.tick();
            delivered.extend(terminal.take_delivered());
            if delivered.len() == 2 {
                break;
            }
        }

        assert_eq!(delivered.len(), 2, "records not relayed: {:?}", delivered);
        assert_eq!(delivered[0].origin, 2);
        assert_eq!(delivered[0].body, "reading-a");
        assert_eq!(delivered[1].body, "reading-b");
        assert_eq!(upstream.pending(), 0);
    }

    #[test]
    fn test_three_hop_chain() {
        let channel = SimChannel::new();
        let clock = SimClock::new();
        let mut far = relay_node(&channel, &clock, 3, 2, 11);
        let mut middle = relay_node(&channel, &clock, 2, 1, 12);
        let mut terminal = relay_node(&channel, &clock, 1, 0, 13);

        far.produce("sensor");

        let mut delivered = Vec::new();
        for _ in 0..5_000 {
            clock.advance(10);
            far.tick();
            middle.tick();
            terminal.tick();
            delivered.extend(terminal.take_delivered());
            if !delivered.is_empty() {
                break;
            }
        }

        assert_eq!(delivered.len(), 1, "record did not traverse the chain");
        assert_eq!(delivered[0].origin, 3);
        assert_eq!(delivered[0].body, "sensor");
    }
}
