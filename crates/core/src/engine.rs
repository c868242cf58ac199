//! Command queue and response correlation shared by every device channel.
//!
//! The engine is a plain state machine: it never performs I/O and never
//! sleeps. Its owner feeds it submissions, inbound data and timer expiries,
//! and acts on what it returns (write these bytes, arm a timer, nothing to do).
//! What differs between devices is supplied by two policy objects: a
//! [`Pacing`] deciding when the queue head may be sent, and a [`Protocol`]
//! that encodes commands and classifies inbound data.

use crate::completion::Notifier;
use crate::pacing::{Gate, Pacing};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;
use tokio::time::Instant;

/// Sequence number assigned to each submission, starting at 1.
pub type RequestId = u64;

/// Device-specific half of a channel.
pub trait Protocol {
    /// A queued command.
    type Command: fmt::Debug;
    /// One unit of inbound data (a text line, a binary frame).
    type Inbound: ?Sized + fmt::Debug;
    /// What notifications are registered against.
    type Key: PartialEq + Clone + fmt::Debug;
    /// Value handed to notifications.
    type Reply: Clone;

    /// Key under which a notification for `command` waits.
    fn correlation_key(&self, id: RequestId, command: &Self::Command) -> Self::Key;

    /// Bytes to write for `command`.
    fn encode(&self, command: &Self::Command) -> Vec<u8>;

    /// Interpret inbound data, updating device state as a side effect.
    ///
    /// `in_flight` is the command awaiting a response, if the pacing policy
    /// tracks one.
    fn classify(
        &mut self,
        inbound: &Self::Inbound,
        in_flight: Option<&Self::Command>,
    ) -> Classified<Self::Key, Self::Reply>;
}

/// Semantic meaning of one unit of inbound data.
#[derive(Clone, Debug, PartialEq)]
pub enum Classified<K, R> {
    /// Not meaningful for this channel. Nothing changes.
    Ignored,
    /// Recognised but malformed. Nothing changes and any in-flight request stays in flight.
    Malformed,
    /// A state report. Resolves every notification waiting on `key`.
    Report { key: K, reply: R, changed: bool },
    /// Settles the request in flight. With no reply, its notification is abandoned.
    Complete { reply: Option<R>, changed: bool },
}

/// A command waiting in the queue.
#[derive(Debug)]
pub struct PendingRequest<C> {
    pub id: RequestId,
    pub command: C,
}

#[derive(Debug)]
struct InFlight<K, C> {
    id: RequestId,
    key: K,
    command: C,
}

struct Waiter<K, R> {
    key: K,
    notify: Notifier<R>,
}

/// What the owner should do after [`Engine::poll`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Next {
    /// Nothing can be dispatched right now.
    Idle,
    /// The queue head may be dispatched.
    Ready,
    /// Arm the deferred-dispatch timer for this long, then call
    /// [`Engine::timer_fired`] and poll again.
    ArmTimer(Duration),
}

/// A command taken off the queue, ready to be written.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatch {
    pub id: RequestId,
    pub bytes: Vec<u8>,
}

/// Effect of feeding inbound data to the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Device state was updated and observers should be told.
    pub changed: bool,
    /// The in-flight request that this data settled.
    pub settled: Option<RequestId>,
    /// Number of notifications invoked.
    pub notified: usize,
}

/// Queue, dispatch gate and notification registry for one device channel.
pub struct Engine<P, K: Protocol> {
    pacing: P,
    protocol: K,
    queue: VecDeque<PendingRequest<K::Command>>,
    waiters: Vec<Waiter<K::Key, K::Reply>>,
    in_flight: Option<InFlight<K::Key, K::Command>>,
    timer_armed: bool,
    next_id: RequestId,
}

impl<P: Pacing, K: Protocol> Engine<P, K> {
    pub fn new(pacing: P, protocol: K) -> Self {
        Self {
            pacing,
            protocol,
            queue: VecDeque::new(),
            waiters: Vec::new(),
            in_flight: None,
            timer_armed: false,
            next_id: 1,
        }
    }

    pub fn protocol(&self) -> &K {
        &self.protocol
    }

    /// Append a command to the queue. Never fails.
    pub fn submit(&mut self, command: K::Command, notify: Option<Notifier<K::Reply>>) -> RequestId {
        let id = self.next_id;
        self.next_id += 1;

        if let Some(notify) = notify {
            let key = self.protocol.correlation_key(id, &command);
            self.waiters.push(Waiter { key, notify });
        }

        tracing::trace!("Queued request #{}: {:?}", id, command);
        self.queue.push_back(PendingRequest { id, command });
        id
    }

    /// Decide whether the queue head can go out now.
    ///
    /// Returns [`Next::ArmTimer`] only when no timer is already armed, so at
    /// most one deferred dispatch is ever pending.
    pub fn poll(&mut self, now: Instant) -> Next {
        if self.queue.is_empty() {
            return Next::Idle;
        }

        match self.pacing.gate(now, self.in_flight.is_some()) {
            Gate::Open => Next::Ready,
            Gate::Blocked => Next::Idle,
            Gate::Wait(_) if self.timer_armed => Next::Idle,
            Gate::Wait(delay) => {
                self.timer_armed = true;
                Next::ArmTimer(delay)
            }
        }
    }

    /// The deferred-dispatch timer expired.
    pub fn timer_fired(&mut self) {
        self.timer_armed = false;
    }

    pub fn timer_armed(&self) -> bool {
        self.timer_armed
    }

    /// Take the queue head, mark it dispatched and return its encoded bytes.
    ///
    /// Callers are expected to have seen [`Next::Ready`] first.
    pub fn dispatch(&mut self, now: Instant) -> Option<Dispatch> {
        let request = self.queue.pop_front()?;
        let bytes = self.protocol.encode(&request.command);
        self.pacing.record_dispatch(now);

        tracing::debug!("Dispatching request #{}: {:?}", request.id, request.command);

        if self.pacing.awaits_response() {
            let key = self.protocol.correlation_key(request.id, &request.command);
            self.in_flight = Some(InFlight {
                id: request.id,
                key,
                command: request.command,
            });
        }

        Some(Dispatch {
            id: request.id,
            bytes,
        })
    }

    /// Classify inbound data and resolve whatever notifications it answers.
    pub fn on_inbound(&mut self, inbound: &K::Inbound) -> Outcome {
        let in_flight = self.in_flight.as_ref().map(|f| &f.command);

        match self.protocol.classify(inbound, in_flight) {
            Classified::Ignored | Classified::Malformed => Outcome::default(),
            Classified::Report { key, reply, changed } => Outcome {
                changed,
                settled: None,
                notified: self.resolve(&key, reply),
            },
            Classified::Complete { reply, changed } => {
                let Some(flight) = self.in_flight.take() else {
                    tracing::warn!("Response with no request in flight: {:?}", inbound);
                    return Outcome {
                        changed,
                        ..Outcome::default()
                    };
                };

                let notified = match reply {
                    Some(reply) => self.resolve(&flight.key, reply),
                    None => {
                        self.drop_waiters(&flight.key);
                        0
                    }
                };

                Outcome {
                    changed,
                    settled: Some(flight.id),
                    notified,
                }
            }
        }
    }

    /// Give up on the request in flight, abandoning its notification.
    pub fn abandon_in_flight(&mut self) -> Option<RequestId> {
        let flight = self.in_flight.take()?;
        self.drop_waiters(&flight.key);
        tracing::warn!("Abandoned request #{}: {:?}", flight.id, flight.command);
        Some(flight.id)
    }

    pub fn in_flight(&self) -> Option<RequestId> {
        self.in_flight.as_ref().map(|f| f.id)
    }

    /// Number of commands queued but not yet dispatched.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Number of registered notifications not yet resolved.
    pub fn waiting(&self) -> usize {
        self.waiters.len()
    }

    fn resolve(&mut self, key: &K::Key, reply: K::Reply) -> usize {
        let (matched, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.key == *key);
        self.waiters = rest;

        let count = matched.len();
        for waiter in matched {
            let reply = reply.clone();
            if catch_unwind(AssertUnwindSafe(move || (waiter.notify)(reply))).is_err() {
                tracing::warn!("Notification for {:?} panicked", key);
            }
        }
        count
    }

    fn drop_waiters(&mut self, key: &K::Key) {
        self.waiters.retain(|w| w.key != *key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::Completion;
    use crate::pacing::{RateLimit, SingleFlight};

    /// Commands are letters; inbound "X=v" reports key X, "ok"/"err" settle.
    #[derive(Default)]
    struct Letters {
        value: String,
    }

    impl Protocol for Letters {
        type Command = char;
        type Inbound = str;
        type Key = char;
        type Reply = String;

        fn correlation_key(&self, _id: RequestId, command: &char) -> char {
            *command
        }

        fn encode(&self, command: &char) -> Vec<u8> {
            vec![*command as u8]
        }

        fn classify(&mut self, inbound: &str, in_flight: Option<&char>) -> Classified<char, String> {
            match inbound {
                "ok" if in_flight.is_some() => Classified::Complete {
                    reply: Some("ok".to_string()),
                    changed: false,
                },
                "err" => Classified::Complete {
                    reply: None,
                    changed: false,
                },
                "bad" => Classified::Malformed,
                _ => match inbound.split_once('=') {
                    Some((k, v)) => {
                        self.value = v.to_string();
                        Classified::Report {
                            key: k.chars().next().unwrap_or('?'),
                            reply: v.to_string(),
                            changed: true,
                        }
                    }
                    None => Classified::Ignored,
                },
            }
        }
    }

    fn rate_limited() -> Engine<RateLimit, Letters> {
        Engine::new(RateLimit::new(Duration::from_millis(200)), Letters::default())
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut engine = rate_limited();
        assert_eq!(engine.submit('a', None), 1);
        assert_eq!(engine.submit('b', None), 2);
        assert_eq!(engine.queued(), 2);
    }

    #[test]
    fn test_rate_limited_dispatch_arms_one_timer() {
        let mut engine = rate_limited();
        let start = Instant::now();

        engine.submit('a', None);
        assert_eq!(engine.poll(start), Next::Ready);
        assert_eq!(engine.dispatch(start).unwrap().bytes, b"a");

        engine.submit('b', None);
        engine.submit('c', None);
        let later = start + Duration::from_millis(50);
        assert_eq!(engine.poll(later), Next::ArmTimer(Duration::from_millis(150)));
        assert!(engine.timer_armed());

        // Further polls while armed never arm a second timer.
        assert_eq!(engine.poll(later), Next::Idle);
        engine.submit('d', None);
        assert_eq!(engine.poll(later), Next::Idle);

        let fire = start + Duration::from_millis(200);
        engine.timer_fired();
        assert_eq!(engine.poll(fire), Next::Ready);
        assert_eq!(engine.dispatch(fire).unwrap().bytes, b"b");
        assert_eq!(engine.poll(fire), Next::ArmTimer(Duration::from_millis(200)));
    }

    #[test]
    fn test_rate_limited_never_tracks_flight() {
        let mut engine = rate_limited();
        engine.submit('a', None);
        engine.dispatch(Instant::now());
        assert_eq!(engine.in_flight(), None);
    }

    #[test]
    fn test_report_resolves_all_waiters_for_key_in_order() {
        let mut engine = rate_limited();
        let order = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

        for tag in 0..2 {
            let order = order.clone();
            engine.submit('v', Some(Box::new(move |r: String| order.lock().unwrap().push((tag, r)))));
        }
        let (notify, mut other) = Completion::pair();
        engine.submit('m', Some(notify));

        let outcome = engine.on_inbound("v=10");
        assert!(outcome.changed);
        assert_eq!(outcome.notified, 2);
        assert_eq!(
            *order.lock().unwrap(),
            vec![(0, "10".to_string()), (1, "10".to_string())]
        );
        assert!(other.try_take().is_none());
        assert_eq!(engine.waiting(), 1);

        // Already removed: a second report resolves nothing.
        assert_eq!(engine.on_inbound("v=10").notified, 0);
    }

    #[test]
    fn test_single_flight_blocks_until_complete() {
        let mut engine = Engine::new(SingleFlight, Letters::default());
        let now = Instant::now();
        let (notify, mut first) = Completion::pair();
        engine.submit('a', Some(notify));
        engine.submit('b', None);

        assert_eq!(engine.poll(now), Next::Ready);
        let sent = engine.dispatch(now).unwrap();
        assert_eq!(engine.in_flight(), Some(sent.id));
        assert_eq!(engine.poll(now), Next::Idle);

        let outcome = engine.on_inbound("ok");
        assert_eq!(outcome.settled, Some(1));
        assert_eq!(first.try_take().unwrap().unwrap(), "ok");
        assert_eq!(engine.poll(now), Next::Ready);
    }

    #[test]
    fn test_malformed_keeps_request_in_flight() {
        let mut engine = Engine::new(SingleFlight, Letters::default());
        let now = Instant::now();
        let (notify, mut completion) = Completion::pair();
        engine.submit('a', Some(notify));
        engine.dispatch(now);

        assert_eq!(engine.on_inbound("bad"), Outcome::default());
        assert_eq!(engine.in_flight(), Some(1));
        assert!(completion.try_take().is_none());
    }

    #[test]
    fn test_complete_without_reply_abandons_notification() {
        let mut engine = Engine::new(SingleFlight, Letters::default());
        let (notify, mut completion) = Completion::pair();
        engine.submit('a', Some(notify));
        engine.dispatch(Instant::now());

        let outcome = engine.on_inbound("err");
        assert_eq!(outcome.settled, Some(1));
        assert_eq!(engine.in_flight(), None);
        assert!(matches!(completion.try_take(), Some(Err(_))));
    }

    #[test]
    fn test_abandon_in_flight() {
        let mut engine = Engine::new(SingleFlight, Letters::default());
        let (notify, mut completion) = Completion::pair();
        engine.submit('a', Some(notify));
        assert_eq!(engine.abandon_in_flight(), None);

        engine.dispatch(Instant::now());
        assert_eq!(engine.abandon_in_flight(), Some(1));
        assert!(matches!(completion.try_take(), Some(Err(_))));
        assert_eq!(engine.waiting(), 0);
    }

    #[test]
    fn test_panicking_notification_is_contained() {
        let mut engine = rate_limited();
        engine.submit('v', Some(Box::new(|_| panic!("boom"))));
        let (notify, mut completion) = Completion::pair();
        engine.submit('v', Some(notify));

        assert_eq!(engine.on_inbound("v=1").notified, 2);
        assert_eq!(completion.try_take().unwrap().unwrap(), "1");
    }
}
