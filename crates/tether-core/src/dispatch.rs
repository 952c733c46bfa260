//! Typed dispatch table.
//!
//! Maps a discriminator string to an ordered list of handler closures.
//! Both the server (inbound envelopes) and the client (inbound envelopes
//! plus auto-responses) are built on it.
//!
//! Handlers are snapshotted under the lock and invoked after it is
//! released, so a handler may call `on`/`off`/`once` on the same table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Identifies one subscription; pass it to [`Dispatcher::off`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler_{}", self.0)
    }
}

type Handler<A, R> = Arc<dyn Fn(&A) -> R + Send + Sync>;

struct Subscription<A, R> {
    id: HandlerId,
    once: bool,
    handler: Handler<A, R>,
}

/// Discriminator → handlers table.
///
/// `A` is the argument every handler receives by reference; `R` is what
/// each handler returns. [`emit`](Self::emit) collects one `R` per
/// invoked handler, in subscription order.
pub struct Dispatcher<A, R = ()> {
    handlers: RwLock<HashMap<String, Vec<Subscription<A, R>>>>,
    next_id: AtomicU64,
}

impl<A, R> Dispatcher<A, R> {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `handler` to `kind` until removed with [`off`](Self::off).
    pub fn on<F>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.subscribe(kind.into(), Arc::new(handler), false)
    }

    /// Subscribe `handler` to `kind` for a single invocation.
    pub fn once<F>(&self, kind: impl Into<String>, handler: F) -> HandlerId
    where
        F: Fn(&A) -> R + Send + Sync + 'static,
    {
        self.subscribe(kind.into(), Arc::new(handler), true)
    }

    fn subscribe(&self, kind: String, handler: Handler<A, R>, once: bool) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Subscription { id, once, handler });
        id
    }

    /// Remove one subscription. Returns `false` if it was not registered
    /// under `kind` (already removed, or a `once` handler that already ran).
    pub fn off(&self, kind: &str, id: HandlerId) -> bool {
        let mut table = self.handlers.write();
        let Some(subs) = table.get_mut(kind) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            let _ = table.remove(kind);
        }
        removed
    }

    /// Remove every subscription.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Number of handlers currently subscribed to `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    /// Whether no handler is subscribed to anything.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Invoke every handler subscribed to `kind` with `arg`.
    ///
    /// `once` handlers are unsubscribed before they run, so a re-entrant
    /// emit from inside the handler cannot invoke them twice.
    pub fn emit(&self, kind: &str, arg: &A) -> Vec<R> {
        let snapshot: Vec<Handler<A, R>> = {
            let mut table = self.handlers.write();
            let Some(subs) = table.get_mut(kind) else {
                return Vec::new();
            };
            let snapshot = subs.iter().map(|s| Arc::clone(&s.handler)).collect();
            subs.retain(|s| !s.once);
            if subs.is_empty() {
                let _ = table.remove(kind);
            }
            snapshot
        };
        snapshot.iter().map(|handler| handler(arg)).collect()
    }
}

impl<A, R> Default for Dispatcher<A, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A, R> fmt::Debug for Dispatcher<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.handlers.read();
        let mut counts: Vec<(&str, usize)> =
            table.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        counts.sort_unstable();
        f.debug_struct("Dispatcher").field("handlers", &counts).finish()
    }
}
