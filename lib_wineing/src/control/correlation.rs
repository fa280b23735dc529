//! # Request/Response Correlation
//!
//! Turns a fire-and-forget send into an addressable asynchronous call. Before a
//! request is queued, its callback is parked in the [`CorrelationTable`] under
//! the request id. When the inbound worker decodes a response, the
//! [`ResponseRouter`] takes the callback out of the table and runs it.
//!
//! ## Guarantees
//!
//! 1.  **At-most-once**: the callback is removed from the table *before* it is
//!     invoked, so a duplicate or late response for the same id can never
//!     trigger it a second time. It falls through to the default callback.
//! 2.  **Concurrent access**: registration happens on the caller's context while
//!     removal happens on the inbound worker's task. Both go through one mutex;
//!     callbacks always run outside of it.
//! 3.  **Isolation**: a callback that panics is logged and swallowed. It does
//!     not take the listener down with it.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::oneshot;

use super::message::{RequestId, Response};

/// A single-invocation response handler.
pub type ResponseCallback = Box<dyn FnOnce(Response) + Send + 'static>;

/// The fallback handler for responses with no registered callback. Runs any
/// number of times.
pub type DefaultResponseCallback = Arc<dyn Fn(Response) + Send + Sync + 'static>;

/// Boxes a closure as a [`ResponseCallback`].
pub fn callback<F>(f: F) -> ResponseCallback
where
    F: FnOnce(Response) + Send + 'static,
{
    Box::new(f)
}

/// Wraps a closure as a [`DefaultResponseCallback`].
pub fn default_callback<F>(f: F) -> DefaultResponseCallback
where
    F: Fn(Response) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A callback that forwards its response to the returned receiver.
///
/// The receiver resolves once the response arrives, or errors if the callback
/// is dropped without being invoked (e.g. its registration was withdrawn).
pub fn response_channel() -> (ResponseCallback, oneshot::Receiver<Response>) {
    let (tx, rx) = oneshot::channel();
    let cb = callback(move |response| {
        // The caller may have stopped waiting.
        let _ = tx.send(response);
    });
    (cb, rx)
}

/// Mapping from request id to the callback awaiting that request's response.
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<RequestId, ResponseCallback>>,
}

impl fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationTable")
            .field("pending", &self.len())
            .finish()
    }
}

impl CorrelationTable {
    /// Registers `cb` for `id`. A previous registration for the same id is replaced.
    pub fn put(&self, id: RequestId, cb: ResponseCallback) {
        let replaced = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, cb)
            .is_some();
        if replaced {
            tracing::warn!(request_id = id, "Replaced a pending response callback");
        }
    }

    /// Atomically removes and returns the callback for `id`.
    pub fn take_if_present(&self, id: RequestId) -> Option<ResponseCallback> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Whether a callback is registered for `id`.
    pub fn contains_key(&self, id: RequestId) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of outstanding registrations.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether no registration is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What [`ResponseRouter::dispatch`] did with a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The registered callback for the response id was invoked.
    Correlated,
    /// No registration matched; the default callback was invoked.
    Default,
    /// No registration matched and no default callback is set.
    Dropped,
}

/// Routes decoded responses to the callback waiting for them.
#[derive(Default)]
pub struct ResponseRouter {
    table: CorrelationTable,
    default: RwLock<Option<DefaultResponseCallback>>,
}

impl fmt::Debug for ResponseRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseRouter")
            .field("table", &self.table)
            .field("has_default", &self.has_default_response_processor())
            .finish()
    }
}

impl ResponseRouter {
    /// An empty router with no default callback.
    pub fn new() -> Self {
        Self::default()
    }

    /// The underlying correlation table.
    pub fn table(&self) -> &CorrelationTable {
        &self.table
    }

    /// Registers a one-shot callback for `id`, overwriting any previous one.
    pub fn set_response_processor(&self, id: RequestId, cb: ResponseCallback) {
        self.table.put(id, cb);
    }

    /// Replaces the default callback. `None` clears it.
    pub fn set_default_response_processor(&self, cb: Option<DefaultResponseCallback>) {
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = cb;
    }

    /// Whether a default callback is currently set.
    pub fn has_default_response_processor(&self) -> bool {
        self.default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Delivers `response` to its registered callback, else to the default
    /// callback, else drops it.
    pub fn dispatch(&self, response: Response) -> DispatchOutcome {
        let id = response.id;

        if let Some(cb) = id.and_then(|id| self.table.take_if_present(id)) {
            invoke(id, move || cb(response));
            return DispatchOutcome::Correlated;
        }

        let fallback = self
            .default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match fallback {
            Some(cb) => {
                invoke(id, move || cb(response));
                DispatchOutcome::Default
            }
            None => {
                tracing::debug!(request_id = ?id, "No processor for response, dropping it");
                DispatchOutcome::Dropped
            }
        }
    }
}

fn invoke(id: Option<RequestId>, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(request_id = ?id, "Response callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::message::Status;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn counting_callback(hits: &Arc<AtomicUsize>, seen: &Arc<Mutex<Vec<Response>>>) -> ResponseCallback {
        let hits = Arc::clone(hits);
        let seen = Arc::clone(seen);
        callback(move |response| {
            hits.fetch_add(1, Ordering::SeqCst);
            seen.lock().unwrap().push(response);
        })
    }

    #[test]
    fn table_take_removes_entry() {
        let table = CorrelationTable::default();
        table.put(7, callback(|_| {}));
        assert!(table.contains_key(7));
        assert_eq!(table.len(), 1);

        assert!(table.take_if_present(7).is_some());
        assert!(!table.contains_key(7));
        assert!(table.take_if_present(7).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn reregistering_an_id_overwrites_the_callback() {
        let router = ResponseRouter::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        let s = Arc::clone(&second);
        router.set_response_processor(3, callback(move |_| { f.fetch_add(1, Ordering::SeqCst); }));
        router.set_response_processor(3, callback(move |_| { s.fetch_add(1, Ordering::SeqCst); }));

        assert_eq!(router.dispatch(Response::ok(3)), DispatchOutcome::Correlated);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn matching_response_invokes_callback_once_then_falls_through() {
        let router = ResponseRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        router.set_response_processor(1, counting_callback(&hits, &seen));

        let defaults = Arc::new(AtomicUsize::new(0));
        let d = Arc::clone(&defaults);
        router.set_default_response_processor(Some(default_callback(move |_| {
            d.fetch_add(1, Ordering::SeqCst);
        })));

        assert_eq!(router.dispatch(Response::ok(1)), DispatchOutcome::Correlated);
        assert!(!router.table().contains_key(1));
        assert_eq!(router.dispatch(Response::ok(1)), DispatchOutcome::Default);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(defaults.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap()[0], Response::ok(1));
    }

    #[test]
    fn unmatched_response_without_default_is_dropped() {
        let router = ResponseRouter::new();
        assert_eq!(router.dispatch(Response::ok(42)), DispatchOutcome::Dropped);

        router.set_default_response_processor(Some(default_callback(|_| {})));
        router.set_default_response_processor(None);
        assert!(!router.has_default_response_processor());
        assert_eq!(router.dispatch(Response::ok(42)), DispatchOutcome::Dropped);
    }

    #[test]
    fn response_without_id_goes_to_default() {
        let router = ResponseRouter::new();
        router.set_response_processor(5, callback(|_| panic!("must not be called")));
        let seen = Arc::new(Mutex::new(None));
        let s = Arc::clone(&seen);
        router.set_default_response_processor(Some(default_callback(move |r| {
            *s.lock().unwrap() = Some(r);
        })));

        let unsolicited = Response {
            id: None,
            status: Status::Error,
            text: Some("engine restarting".into()),
        };
        assert_eq!(router.dispatch(unsolicited.clone()), DispatchOutcome::Default);
        assert_eq!(seen.lock().unwrap().as_ref(), Some(&unsolicited));
        assert!(router.table().contains_key(5));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let router = ResponseRouter::new();
        router.set_response_processor(9, callback(|_| panic!("boom")));
        assert_eq!(router.dispatch(Response::ok(9)), DispatchOutcome::Correlated);
        assert!(router.table().is_empty());

        let (cb, mut rx) = response_channel();
        router.set_response_processor(10, cb);
        router.dispatch(Response::ok(10));
        assert_eq!(rx.try_recv().unwrap(), Response::ok(10));
    }

    #[test]
    fn concurrent_registration_and_dispatch() {
        let router = Arc::new(ResponseRouter::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let writers: Vec<_> = (0..4u64)
            .map(|w| {
                let router = Arc::clone(&router);
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        let hits = Arc::clone(&hits);
                        router.set_response_processor(
                            w * 1000 + i,
                            callback(move |_| {
                                hits.fetch_add(1, Ordering::SeqCst);
                            }),
                        );
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let readers: Vec<_> = (0..4u64)
            .map(|w| {
                let router = Arc::clone(&router);
                thread::spawn(move || {
                    for i in 0..250u64 {
                        // Each response is delivered twice; only the first may hit.
                        router.dispatch(Response::ok(w * 1000 + i));
                        router.dispatch(Response::ok(w * 1000 + i));
                    }
                })
            })
            .collect();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 1000);
        assert!(router.table().is_empty());
    }
}
