//! In-process channel simulation
//!
//! Test and demo support for running stations without hardware: a shared
//! [`SimChannel`] connects any number of [`SimRadio`] endpoints, delivering
//! each transmission instantly to every endpoint currently in receive mode.
//! Time is a manually advanced [`SimClock`], so retry and timeout behavior
//! runs deterministically with no wall-clock sleeps.
//!
//! ## Example
//!
//! ```rust
//! use loralink_core::simulation::{SimChannel, SimClock};
//! use loralink_core::{LinkConfig, Station};
//!
//! let clock = SimClock::new();
//! let channel = SimChannel::new();
//! let config = LinkConfig { seed: Some(1), ..Default::default() };
//!
//! let mut a = Station::with_config(channel.endpoint(), clock.clone(), config.clone());
//! let mut b = Station::with_config(channel.endpoint(), clock.clone(), config);
//! a.begin(5).unwrap();
//! b.begin(7).unwrap();
//!
//! b.listen_to_packet(0).unwrap();
//! a.send_reliable_packet(b"hello", 7).unwrap();
//! for _ in 0..500 {
//!     clock.advance(10);
//!     a.process();
//!     b.process();
//! }
//! ```

use crate::error::LinkResult;
use crate::transport::{Clock, RadioEvent, RadioTransport};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

/// Manually advanced millisecond clock, shareable across stations
#[derive(Debug, Clone, Default)]
pub struct SimClock(Rc<Cell<u64>>);

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, ms: u64) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for SimClock {
    fn now_millis(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Default)]
struct Endpoint {
    events: VecDeque<RadioEvent>,
    listening: bool,
    /// Upcoming transmissions to lose silently (TxDone still reported)
    drop_tx: u32,
    /// Upcoming transmissions to fail with a hardware timeout
    fail_tx: u32,
}

#[derive(Debug)]
struct ChannelState {
    endpoints: Vec<Endpoint>,
    rssi: i16,
    snr: i8,
}

/// A shared radio channel connecting simulated endpoints
#[derive(Debug, Clone)]
pub struct SimChannel {
    inner: Rc<RefCell<ChannelState>>,
}

impl SimChannel {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ChannelState {
                endpoints: Vec::new(),
                rssi: -80,
                snr: 10,
            })),
        }
    }

    /// Attach a new radio endpoint to this channel
    pub fn endpoint(&self) -> SimRadio {
        let mut state = self.inner.borrow_mut();
        state.endpoints.push(Endpoint::default());
        SimRadio {
            inner: self.inner.clone(),
            id: state.endpoints.len() - 1,
        }
    }

    /// Signal metrics stamped on delivered frames
    pub fn set_signal(&self, rssi: i16, snr: i8) {
        let mut state = self.inner.borrow_mut();
        state.rssi = rssi;
        state.snr = snr;
    }

    /// Lose the next `count` transmissions from an endpoint: the sender
    /// still sees TxDone but no one receives the frame
    pub fn drop_from(&self, endpoint: usize, count: u32) {
        self.inner.borrow_mut().endpoints[endpoint].drop_tx += count;
    }

    /// Fail the next `count` transmissions from an endpoint with a
    /// hardware TX timeout
    pub fn fail_tx_from(&self, endpoint: usize, count: u32) {
        self.inner.borrow_mut().endpoints[endpoint].fail_tx += count;
    }
}

impl Default for SimChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One endpoint's radio, implementing [`RadioTransport`]
#[derive(Debug)]
pub struct SimRadio {
    inner: Rc<RefCell<ChannelState>>,
    id: usize,
}

impl SimRadio {
    /// Endpoint id for [`SimChannel::drop_from`] / [`SimChannel::fail_tx_from`]
    pub fn id(&self) -> usize {
        self.id
    }
}

impl RadioTransport for SimRadio {
    fn send(&mut self, frame: &[u8]) -> LinkResult<()> {
        let mut state = self.inner.borrow_mut();
        let (rssi, snr) = (state.rssi, state.snr);

        if state.endpoints[self.id].fail_tx > 0 {
            state.endpoints[self.id].fail_tx -= 1;
            state.endpoints[self.id]
                .events
                .push_back(RadioEvent::TxTimeout);
            return Ok(());
        }

        let dropped = if state.endpoints[self.id].drop_tx > 0 {
            state.endpoints[self.id].drop_tx -= 1;
            true
        } else {
            false
        };

        if !dropped {
            let sender = self.id;
            for (i, endpoint) in state.endpoints.iter_mut().enumerate() {
                if i != sender && endpoint.listening {
                    endpoint.events.push_back(RadioEvent::RxDone {
                        payload: frame.to_vec(),
                        rssi,
                        snr,
                    });
                }
            }
        }

        state.endpoints[self.id].events.push_back(RadioEvent::TxDone);
        Ok(())
    }

    fn receive(&mut self) -> LinkResult<()> {
        self.inner.borrow_mut().endpoints[self.id].listening = true;
        Ok(())
    }

    fn sleep(&mut self) {
        self.inner.borrow_mut().endpoints[self.id].listening = false;
    }

    fn poll_event(&mut self) -> Option<RadioEvent> {
        self.inner.borrow_mut().endpoints[self.id].events.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_to_listening_endpoint() {
        let channel = SimChannel::new();
        let mut a = channel.endpoint();
        let mut b = channel.endpoint();

        b.receive().unwrap();
        a.send(b"frame").unwrap();

        assert_eq!(a.poll_event(), Some(RadioEvent::TxDone));
        match b.poll_event() {
            Some(RadioEvent::RxDone { payload, .. }) => assert_eq!(payload, b"frame"),
            other => panic!("expected RxDone, got {:?}", other),
        }
    }

    #[test]
    fn test_no_delivery_when_not_listening() {
        let channel = SimChannel::new();
        let mut a = channel.endpoint();
        let mut b = channel.endpoint();

        a.send(b"frame").unwrap();

        assert_eq!(a.poll_event(), Some(RadioEvent::TxDone));
        assert_eq!(b.poll_event(), None);
    }

    #[test]
    fn test_sender_does_not_hear_itself() {
        let channel = SimChannel::new();
        let mut a = channel.endpoint();

        a.receive().unwrap();
        a.send(b"frame").unwrap();

        assert_eq!(a.poll_event(), Some(RadioEvent::TxDone));
        assert_eq!(a.poll_event(), None);
    }

    #[test]
    fn test_drop_from_loses_frame() {
        let channel = SimChannel::new();
        let mut a = channel.endpoint();
        let mut b = channel.endpoint();

        channel.drop_from(a.id(), 1);
        b.receive().unwrap();

        a.send(b"lost").unwrap();
        assert_eq!(a.poll_event(), Some(RadioEvent::TxDone));
        assert_eq!(b.poll_event(), None);

        a.send(b"heard").unwrap();
        assert!(matches!(b.poll_event(), Some(RadioEvent::RxDone { .. })));
    }

    #[test]
    fn test_fail_tx_times_out() {
        let channel = SimChannel::new();
        let mut a = channel.endpoint();
        let mut b = channel.endpoint();

        channel.fail_tx_from(a.id(), 1);
        b.receive().unwrap();

        a.send(b"frame").unwrap();
        assert_eq!(a.poll_event(), Some(RadioEvent::TxTimeout));
        assert_eq!(b.poll_event(), None);
    }

    #[test]
    fn test_clock_advances() {
        let clock = SimClock::new();
        assert_eq!(clock.now_millis(), 0);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 250);
    }
}
