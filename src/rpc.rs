use crate::error::{Error, Result};
use amq_protocol::protocol::AMQPClass;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// `(class_id, method_id)` pair identifying an `AMQPClass` variant.
///
/// `amq-protocol`'s generated method enums carry no string name, unlike the
/// `frame_in.name` string pamqp exposes, so requests are matched on this
/// discriminant pair instead.
pub(crate) type MethodId = (u16, u16);

pub(crate) fn method_id(class: &AMQPClass) -> MethodId {
    (class.get_amqp_class_id(), class.get_amqp_method_id())
}

struct State {
    generation: u64,
    fire_and_forget: bool,
    expected: Vec<MethodId>,
    response: Option<AMQPClass>,
    aborted: bool,
}

/// Correlates one outstanding synchronous method with its response, per
/// channel. Callers are expected to serialize `register_request` + write +
/// `get_request` behind their own per-channel lock; this registry only
/// enforces that a stale token (superseded by a later `register_request`)
/// can't be resolved by `get_request`.
pub(crate) struct RpcRegistry {
    state: Mutex<State>,
    condvar: Condvar,
}

/// Correlation token returned by [`RpcRegistry::register_request`].
pub(crate) struct RpcToken(u64);

impl RpcRegistry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                generation: 0,
                fire_and_forget: true,
                expected: Vec::new(),
                response: None,
                aborted: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Allocate a slot expecting a response whose `(class_id, method_id)` is
    /// one of `expected`. An empty `expected` set means fire-and-forget:
    /// `get_request` returns `Ok(None)` immediately without waiting.
    pub(crate) fn register_request(&self, expected: Vec<MethodId>) -> RpcToken {
        let mut state = self.state.lock();
        state.generation += 1;
        state.fire_and_forget = expected.is_empty();
        state.expected = expected;
        state.response = None;
        state.aborted = false;
        RpcToken(state.generation)
    }

    /// Wakes any waiter on the currently active slot without a response, so
    /// a broker-initiated close doesn't leave `get_request` blocked until its
    /// timeout. The caller is expected to surface the real error separately
    /// (e.g. the channel's latched error).
    pub(crate) fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.expected.clear();
        self.condvar.notify_all();
    }

    /// If `frame`'s discriminant is in the active slot's expected set, store
    /// it and wake the waiter. Returns whether the frame was consumed.
    pub(crate) fn on_frame(&self, frame: &AMQPClass) -> bool {
        let mut state = self.state.lock();
        if state.expected.contains(&method_id(frame)) {
            state.response = Some(frame.clone());
            state.expected.clear();
            self.condvar.notify_all();
            true
        } else {
            false
        }
    }

    /// Block until the slot registered under `token` is filled or `timeout`
    /// elapses. Returns `Ok(None)` for a fire-and-forget request.
    pub(crate) fn get_request(&self, token: RpcToken, timeout: Duration) -> Result<Option<AMQPClass>> {
        let mut state = self.state.lock();
        if state.generation != token.0 {
            return Err(Error::ChannelError("RPC token superseded before it could be awaited".into()));
        }
        if state.fire_and_forget {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(response) = state.response.take() {
                return Ok(Some(response));
            }
            if state.aborted {
                return Err(Error::ChannelError("RPC request aborted: channel closed".into()));
            }
            let now = Instant::now();
            if now >= deadline {
                state.expected.clear();
                return Err(Error::ChannelError("RPC request timed out".into()));
            }
            self.condvar.wait_for(&mut state, deadline - now);
        }
    }
}
