use std::{
    collections::VecDeque,
    fmt,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{Future, Stream};
use itertools::Itertools;
use pin_project::pin_project;
use tokio::time::{sleep, Duration, Instant, Sleep};

use crate::NodeEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Why a reconcile was requested.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    Resync,
    Events(VecDeque<NodeEvent>),
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Resync => f.write_str("periodic resync"),
            Trigger::Events(events) => write!(f, "{}", events.iter().join(", ")),
        }
    }
}

/// Turns node events into reconcile triggers.
///
/// The first event after a quiet spell is yielded at once and opens a
/// `debounce` window. Events arriving inside the window are queued (up to
/// the capacity) and yielded as one [`Trigger::Events`] once none has
/// arrived for `debounce`. When nothing has been yielded for `period`, a
/// [`Trigger::Resync`] is yielded. Every trigger restarts the resync timer.
/// The stream is meant to have a single consumer, which is what keeps
/// reconciles from overlapping.
#[pin_project]
pub struct Schedule<S: Stream<Item = NodeEvent>> {
    #[pin]
    inner: S,
    #[pin]
    state: State,
    #[pin]
    resync: Sleep,
    queue: VecDeque<NodeEvent>,
    period: Duration,
    debounce: Duration,
    capacity: usize,
}

#[pin_project(project = StateProj)]
#[allow(clippy::large_enum_variant)]
enum State {
    Debouncing(#[pin] Sleep),
    WaitingForInner,
}

impl<S: Stream<Item = NodeEvent>> Schedule<S> {
    pub fn new(inner: S, period: Duration, debounce: Duration) -> Self {
        Self {
            inner,
            state: State::WaitingForInner,
            resync: sleep(period),
            queue: VecDeque::new(),
            period,
            debounce,
            capacity: DEFAULT_CAPACITY,
        }
    }

    pub fn with_capacity(self, capacity: usize) -> Self {
        Self { capacity, ..self }
    }

    fn poll_timers(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Trigger>> {
        let mut this = self.project();

        if let StateProj::Debouncing(debounce_sleep) = this.state.as_mut().project() {
            if debounce_sleep.poll(cx).is_ready() {
                if this.queue.is_empty() {
                    this.state.set(State::WaitingForInner);
                } else {
                    // the flush opens a new window of its own
                    this.state.set(State::Debouncing(sleep(*this.debounce)));
                    this.resync.as_mut().reset(Instant::now() + *this.period);
                    return Poll::Ready(Some(Trigger::Events(this.queue.drain(..).collect())));
                }
            }
        }

        match this.resync.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.resync.as_mut().reset(Instant::now() + *this.period);
                Poll::Ready(Some(Trigger::Resync))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: Stream<Item = NodeEvent>> Stream for Schedule<S> {
    type Item = Trigger;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.as_mut().project();

        while this.queue.len() < *this.capacity {
            match this.inner.as_mut().poll_next(cx) {
                // event source gone => flush what is queued, then hang up
                Poll::Ready(None) => {
                    return if this.queue.is_empty() {
                        Poll::Ready(None)
                    } else {
                        self.poll_timers(cx)
                    };
                }
                // first event after a quiet spell => yield it right away;
                // otherwise queue it and push the debounce deadline out
                Poll::Ready(Some(event)) => {
                    let quiet = matches!(this.state.as_mut().project(), StateProj::WaitingForInner);
                    this.state.set(State::Debouncing(sleep(*this.debounce)));
                    if quiet {
                        this.resync.as_mut().reset(Instant::now() + *this.period);
                        return Poll::Ready(Some(Trigger::Events(VecDeque::from([event]))));
                    }
                    this.queue.push_back(event);
                }
                Poll::Pending => break,
            }
        }
        self.poll_timers(cx)
    }
}
