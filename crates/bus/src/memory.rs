//! In-memory broker for tests/dev.
//!
//! Mirrors the semantics of a stream with one consumer group:
//!
//! - `publish` appends to the ready queue
//! - `fetch` moves the oldest ready message to the pending set
//! - `settle` removes it from pending (and, for `Requeue`, appends a fresh copy)
//! - `recover` lists everything still pending
//!
//! Pending messages survive across sessions, so a job consumed on one
//! connection can be acknowledged on another. [`MemoryBroker::sever`] and
//! [`MemoryBroker::set_reachable`] simulate connection loss for tests.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};

use crate::transport::{Broker, Delivery, DeliveryTag, Session, Settlement, TransportError};

const DEFAULT_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct State {
    ready: VecDeque<(u64, Vec<u8>)>,
    pending: BTreeMap<u64, Vec<u8>>,
    dead_letters: Vec<(Vec<u8>, String)>,
    next_id: u64,
    generation: u64,
    unreachable: bool,
    opens: usize,
}

impl State {
    fn push(&mut self, body: Vec<u8>) {
        self.next_id += 1;
        self.ready.push_back((self.next_id, body));
    }
}

#[derive(Debug)]
struct Inner {
    state: Mutex<State>,
    arrivals: Notify,
    poll: Duration,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cloneable handle; clones share one queue.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_poll_interval(DEFAULT_POLL)
    }

    /// How long `fetch` waits for a message before returning `Ok(None)`.
    pub fn with_poll_interval(poll: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                arrivals: Notify::new(),
                poll,
            }),
        }
    }

    /// Break every open session. New sessions can be opened while reachable.
    pub fn sever(&self) {
        self.inner.state().generation += 1;
        self.inner.arrivals.notify_waiters();
    }

    /// While unreachable, `open` fails with a connection error.
    pub fn set_reachable(&self, reachable: bool) {
        self.inner.state().unreachable = !reachable;
    }

    /// Enqueue a raw payload, bypassing any session.
    pub fn inject(&self, body: impl Into<Vec<u8>>) {
        self.inner.state().push(body.into());
        self.inner.arrivals.notify_waiters();
    }

    pub fn ready_len(&self) -> usize {
        self.inner.state().ready.len()
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state().pending.len()
    }

    /// Payloads and reasons of dead-lettered messages, oldest first.
    pub fn dead_letters(&self) -> Vec<(Vec<u8>, String)> {
        self.inner.state().dead_letters.clone()
    }

    /// Number of successful `open` calls so far.
    pub fn opens(&self) -> usize {
        self.inner.state().opens
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Session = MemorySession;

    async fn open(&self) -> Result<MemorySession, TransportError> {
        let mut state = self.inner.state();
        if state.unreachable {
            return Err(TransportError::Connection("broker unreachable".to_string()));
        }
        state.opens += 1;
        Ok(MemorySession {
            inner: self.inner.clone(),
            generation: state.generation,
            closed: AtomicBool::new(false),
        })
    }
}

#[derive(Debug)]
pub struct MemorySession {
    inner: Arc<Inner>,
    generation: u64,
    closed: AtomicBool,
}

impl MemorySession {
    fn live_state(&self) -> Result<MutexGuard<'_, State>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let state = self.inner.state();
        if state.generation != self.generation {
            return Err(TransportError::Connection("connection reset".to_string()));
        }
        Ok(state)
    }
}

fn tag_of(id: u64) -> DeliveryTag {
    DeliveryTag(id.to_string())
}

fn parse_tag(tag: &DeliveryTag) -> Result<u64, TransportError> {
    tag.0
        .parse()
        .map_err(|_| TransportError::UnknownDelivery(tag.clone()))
}

#[async_trait]
impl Session for MemorySession {
    fn is_open(&self) -> bool {
        self.live_state().is_ok()
    }

    async fn publish(&self, body: &[u8]) -> Result<(), TransportError> {
        self.live_state()?.push(body.to_vec());
        self.inner.arrivals.notify_waiters();
        Ok(())
    }

    async fn fetch(&self) -> Result<Option<Delivery>, TransportError> {
        let deadline = Instant::now() + self.inner.poll;
        loop {
            let arrival = self.inner.arrivals.notified();
            tokio::pin!(arrival);
            arrival.as_mut().enable();

            {
                let mut state = self.live_state()?;
                if let Some((id, body)) = state.ready.pop_front() {
                    state.pending.insert(id, body.clone());
                    return Ok(Some(Delivery {
                        tag: tag_of(id),
                        body,
                    }));
                }
            }

            tokio::select! {
                _ = &mut arrival => continue,
                _ = sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn recover(&self) -> Result<Vec<Delivery>, TransportError> {
        let state = self.live_state()?;
        Ok(state
            .pending
            .iter()
            .map(|(id, body)| Delivery {
                tag: tag_of(*id),
                body: body.clone(),
            })
            .collect())
    }

    async fn settle(
        &self,
        tag: &DeliveryTag,
        settlement: Settlement,
    ) -> Result<(), TransportError> {
        let id = parse_tag(tag)?;
        let mut state = self.live_state()?;
        if state.pending.remove(&id).is_none() {
            return Err(TransportError::UnknownDelivery(tag.clone()));
        }
        match settlement {
            Settlement::Ack | Settlement::Discard => {}
            Settlement::Requeue { body } => {
                state.push(body);
                drop(state);
                self.inner.arrivals.notify_waiters();
            }
            Settlement::DeadLetter { body, reason } => state.dead_letters.push((body, reason)),
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
