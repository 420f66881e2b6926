//! Routes inbound messages to registered handlers.
//!
//! Two handler tables:
//!
//! - **once**: keyed by correlation id, removed when invoked
//! - **typed**: keyed by [`MessageKind`], persistent, last registration wins
//!
//! All routing happens on a single queue task, so handlers never run
//! concurrently with each other. Handlers may register further handlers;
//! the table lock is released before a handler is invoked.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use htsp_sync_core::{Message, MessageKind};

use crate::error::DispatchError;

/// Handler for a single correlated reply.
pub type OnceHandler = Box<dyn FnOnce(Message) + Send>;

/// Handler for every message of a kind.
pub type TypeHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// What routing did with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    Correlated(u64),
    Typed(MessageKind),
    Dropped,
}

enum Envelope {
    Message(Message),
    Barrier(oneshot::Sender<()>),
}

#[derive(Default)]
struct Routes {
    once: HashMap<u64, OnceHandler>,
    typed: HashMap<MessageKind, TypeHandler>,
}

enum Target {
    Once(u64, OnceHandler),
    Typed(MessageKind, TypeHandler),
}

/// Message dispatcher. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<Mutex<Routes>>,
    queue: mpsc::UnboundedSender<Envelope>,
}

impl Dispatcher {
    /// Create a dispatcher whose queue task runs on `handle`.
    ///
    /// The task exits once every clone of the dispatcher is dropped.
    pub fn new(handle: &Handle) -> Self {
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (queue, rx) = mpsc::unbounded_channel();

        handle.spawn(run_queue(Arc::clone(&routes), rx));

        Self { routes, queue }
    }

    /// Register a handler for the reply correlated with `seq`.
    pub fn register_once<F>(&self, seq: u64, handler: F) -> Result<(), DispatchError>
    where
        F: FnOnce(Message) + Send + 'static,
    {
        let mut routes = self.lock();
        if routes.once.contains_key(&seq) {
            return Err(DispatchError::DuplicateCorrelation(seq));
        }
        routes.once.insert(seq, Box::new(handler));
        Ok(())
    }

    /// Register the handler for every message of `kind`, replacing any
    /// previous one.
    pub fn register_type<F>(&self, kind: MessageKind, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        if self.lock().typed.insert(kind.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(%kind, "replaced type handler");
        }
    }

    /// Remove the handler for `kind`. Returns whether one was registered.
    pub fn unregister_type(&self, kind: &MessageKind) -> bool {
        self.lock().typed.remove(kind).is_some()
    }

    /// Withdraw an outstanding one-shot handler. Returns whether one was
    /// registered.
    pub fn cancel_once(&self, seq: u64) -> bool {
        self.lock().once.remove(&seq).is_some()
    }

    /// Enqueue an inbound message for routing.
    pub fn dispatch(&self, message: Message) -> Result<(), DispatchError> {
        self.queue
            .send(Envelope::Message(message))
            .map_err(|_| DispatchError::QueueClosed)
    }

    /// Wait until every message enqueued before this call has been routed.
    pub async fn flush(&self) -> Result<(), DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.queue
            .send(Envelope::Barrier(tx))
            .map_err(|_| DispatchError::QueueClosed)?;
        rx.await.map_err(|_| DispatchError::QueueClosed)
    }

    /// Number of outstanding one-shot handlers.
    pub fn pending_replies(&self) -> usize {
        self.lock().once.len()
    }

    fn lock(&self) -> MutexGuard<'_, Routes> {
        lock_routes(&self.routes)
    }
}

// A panicking handler cannot leave the tables half-updated.
fn lock_routes(routes: &Mutex<Routes>) -> MutexGuard<'_, Routes> {
    routes.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_queue(routes: Arc<Mutex<Routes>>, mut rx: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Message(message) => {
                route(&routes, message);
            }
            Envelope::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::trace!("dispatcher queue stopped");
}

/// Route one message synchronously on the calling task.
fn route(routes: &Mutex<Routes>, message: Message) -> Delivery {
    let target = select_target(&mut lock_routes(routes), &message);

    let Some(target) = target else {
        match message.seq() {
            Some(seq) => tracing::debug!(seq, %message, "dropping uncorrelated reply"),
            None => tracing::debug!(%message, "no subscriber"),
        }
        return Delivery::Dropped;
    };

    let (delivery, result) = match target {
        Target::Once(seq, handler) => (
            Delivery::Correlated(seq),
            panic::catch_unwind(AssertUnwindSafe(move || handler(message))),
        ),
        Target::Typed(kind, handler) => (
            Delivery::Typed(kind),
            panic::catch_unwind(AssertUnwindSafe(move || handler(message))),
        ),
    };

    if result.is_err() {
        tracing::error!(?delivery, "message handler panicked");
    }
    delivery
}

fn select_target(routes: &mut Routes, message: &Message) -> Option<Target> {
    if let Some(seq) = message.seq() {
        if let Some(handler) = routes.once.remove(&seq) {
            return Some(Target::Once(seq, handler));
        }
    }

    let kind = message.kind()?;
    let handler = routes.typed.get(&kind)?;
    Some(Target::Typed(kind, Arc::clone(handler)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn routes() -> Mutex<Routes> {
        Mutex::new(Routes::default())
    }

    fn reply(seq: u64) -> Message {
        Message::from(htsp_sync_core::FieldMap::new().with("seq", seq as i64))
    }

    fn push(kind: MessageKind) -> Message {
        Message::from(htsp_sync_core::FieldMap::new().with("method", kind.as_method()))
    }

    #[test]
    fn test_once_handler_fires_exactly_once() {
        let routes = routes();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        lock_routes(&routes).once.insert(
            5,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(route(&routes, reply(5)), Delivery::Correlated(5));
        assert_eq!(route(&routes, reply(5)), Delivery::Dropped);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_correlation_beats_type() {
        let routes = routes();
        lock_routes(&routes).once.insert(1, Box::new(|_| {}));
        lock_routes(&routes)
            .typed
            .insert(MessageKind::Hello, Arc::new(|_| {}));

        let msg = Message::request(MessageKind::Hello, 1);
        assert_eq!(route(&routes, msg.clone()), Delivery::Correlated(1));
        assert_eq!(route(&routes, msg), Delivery::Typed(MessageKind::Hello));
    }

    #[test]
    fn test_unknown_kind_dropped() {
        let routes = routes();
        assert_eq!(
            route(&routes, push(MessageKind::Other("subscriptionStart".into()))),
            Delivery::Dropped
        );
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let routes = routes();
        lock_routes(&routes)
            .typed
            .insert(MessageKind::TagAdd, Arc::new(|_| panic!("boom")));

        assert_eq!(
            route(&routes, push(MessageKind::TagAdd)),
            Delivery::Typed(MessageKind::TagAdd)
        );
        assert_eq!(
            route(&routes, push(MessageKind::TagAdd)),
            Delivery::Typed(MessageKind::TagAdd)
        );
    }

    #[tokio::test]
    async fn test_duplicate_correlation_rejected() {
        let dispatcher = Dispatcher::new(&Handle::current());
        dispatcher.register_once(3, |_| {}).unwrap();

        assert_eq!(
            dispatcher.register_once(3, |_| {}),
            Err(DispatchError::DuplicateCorrelation(3))
        );
        assert!(dispatcher.cancel_once(3));
        assert!(dispatcher.register_once(3, |_| {}).is_ok());
    }

    #[tokio::test]
    async fn test_last_type_registration_wins() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            dispatcher.register_type(MessageKind::ChannelAdd, move |_| {
                seen.lock().unwrap().push(tag);
            });
        }

        dispatcher.dispatch(push(MessageKind::ChannelAdd)).unwrap();
        dispatcher.dispatch(push(MessageKind::ChannelAdd)).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["second", "second"]);
    }

    #[tokio::test]
    async fn test_pushes_routed_in_order() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        dispatcher.register_type(MessageKind::EventAdd, move |msg| {
            let id = msg.fields().opt_i64("eventId").ok().flatten();
            sink.lock().unwrap().push(id);
        });

        for id in [10i64, 11, 12] {
            let msg = push(MessageKind::EventAdd).with("eventId", id);
            dispatcher.dispatch(msg).unwrap();
        }
        dispatcher.flush().await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![Some(10), Some(11), Some(12)]);
    }

    #[tokio::test]
    async fn test_handler_may_register_handlers() {
        let dispatcher = Dispatcher::new(&Handle::current());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = dispatcher.clone();
        let counter = Arc::clone(&hits);
        dispatcher
            .register_once(1, move |_| {
                let counter = Arc::clone(&counter);
                inner.register_type(MessageKind::InitialSyncCompleted, move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                });
            })
            .unwrap();

        dispatcher.dispatch(reply(1)).unwrap();
        dispatcher
            .dispatch(push(MessageKind::InitialSyncCompleted))
            .unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending_replies(), 0);
    }

    #[tokio::test]
    async fn test_unregister_type() {
        let dispatcher = Dispatcher::new(&Handle::current());
        dispatcher.register_type(MessageKind::TagAdd, |_| {});

        assert!(dispatcher.unregister_type(&MessageKind::TagAdd));
        assert!(!dispatcher.unregister_type(&MessageKind::TagAdd));
    }
}
