/*!
Scripted probe transport

Replaces the network in scheduler tests: every address answers from a script,
with an optional artificial delay, while the stub counts calls and records the
highest number of probes in flight at once.
*/

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uptime_kernel::transport::{ProbeReply, ProbeTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scripted {
    Up(f64),
    Down,
    /// The transport returns an error instead of a reply.
    Error,
    /// Never answers; only the caller's timeout ends the probe.
    Hang,
}

#[derive(Default)]
pub struct ScriptedTransport {
    sticky: Mutex<HashMap<String, Scripted>>,
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer used for `address` until changed. Unscripted addresses are down.
    pub fn set(&self, address: &str, reply: Scripted) -> &Self {
        self.sticky.lock().insert(address.to_string(), reply);
        self
    }

    /// One-shot answer consumed before the sticky one.
    pub fn push(&self, address: &str, reply: Scripted) -> &Self {
        self.queued.lock().entry(address.to_string()).or_default().push_back(reply);
        self
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, address: &str) -> Scripted {
        if let Some(reply) = self.queued.lock().get_mut(address).and_then(VecDeque::pop_front) {
            return reply;
        }
        self.sticky.lock().get(address).copied().unwrap_or(Scripted::Down)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ProbeTransport for ScriptedTransport {
    fn probe<'a>(&'a self, address: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<ProbeReply, TransportError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            // released on completion and on cancellation by a timeout
            let _guard = InFlight(&self.in_flight);

            let reply = self.next_reply(address);
            let delay = *self.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match reply {
                Scripted::Up(latency) => Ok(ProbeReply::up(latency)),
                Scripted::Down => Ok(ProbeReply::down()),
                Scripted::Error => Err(TransportError::Other(format!("scripted failure for {address}"))),
                Scripted::Hang => std::future::pending().await,
            }
        })
    }
}
