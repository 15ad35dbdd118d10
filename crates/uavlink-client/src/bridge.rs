//! Turns one-shot handler registrations into futures with deadlines.

use futures_util::future::{try_join_all, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use uavlink_core::{Callback, HandlerId, HandlerManager};

use crate::ClientError;

/// Detaches the one-shot registration when the waiting future goes away.
struct Registration<T> {
    handlers: Arc<HandlerManager<T>>,
    name: String,
    id: HandlerId,
}

impl<T> Drop for Registration<T> {
    fn drop(&mut self) {
        self.handlers.detach_id(&self.name, self.id);
    }
}

/// Wait for the next payload dispatched under `name`.
///
/// The handler is registered before this function returns and before
/// `trigger` runs, so a reply produced by the trigger itself is not missed.
/// The deadline is measured from the call, not from the first poll.
///
/// Yields [`ClientError::Timeout`] when the deadline passes and
/// [`ClientError::Closed`] when the handler is removed without firing.
pub fn await_once<T, F>(
    handlers: &Arc<HandlerManager<T>>,
    name: &str,
    timeout: Option<Duration>,
    trigger: F,
) -> BoxFuture<'static, Result<T, ClientError>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<(), ClientError>,
{
    wait_once(handlers, name, timeout, None, trigger)
}

/// [`await_once`] that also yields [`ClientError::Closed`] as soon as
/// `closed` changes. Changes published before the call are ignored; the
/// sender going away counts as a change.
pub fn await_once_until_closed<T, F>(
    handlers: &Arc<HandlerManager<T>>,
    name: &str,
    timeout: Option<Duration>,
    closed: watch::Receiver<u64>,
    trigger: F,
) -> BoxFuture<'static, Result<T, ClientError>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<(), ClientError>,
{
    wait_once(handlers, name, timeout, Some(closed), trigger)
}

fn wait_once<T, F>(
    handlers: &Arc<HandlerManager<T>>,
    name: &str,
    timeout: Option<Duration>,
    closed: Option<watch::Receiver<u64>>,
    trigger: F,
) -> BoxFuture<'static, Result<T, ClientError>>
where
    T: Clone + Send + Sync + 'static,
    F: FnOnce() -> Result<(), ClientError>,
{
    let deadline = timeout.map(|timeout| Instant::now() + timeout);
    let closed = closed.map(|mut closed| {
        closed.mark_unchanged();
        closed
    });
    let (tx, rx) = oneshot::channel();
    let slot = Mutex::new(Some(tx));
    let callback: Callback<T> = Arc::new(move |payload: &T| {
        let tx = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(tx) = tx {
            let _ = tx.send(payload.clone());
        }
    });
    let registration = Registration {
        handlers: Arc::clone(handlers),
        name: name.to_owned(),
        id: handlers.attach_once(name, callback),
    };
    let triggered = trigger();

    async move {
        if let Err(err) = triggered {
            return Err(err);
        }
        let name = registration.name.as_str();
        let received = async {
            match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, rx).await.map_err(|_| {
                    tracing::debug!(%name, "wait timed out");
                    ClientError::Timeout(name.to_owned())
                }),
                None => Ok(rx.await),
            }
        };
        let received = match closed {
            Some(mut closed) => tokio::select! {
                received = received => received,
                _ = closed.changed() => {
                    tracing::debug!(%name, "connection closed while waiting");
                    Err(ClientError::Closed)
                }
            },
            None => received.await,
        };
        drop(registration);
        received?.map_err(|_| ClientError::Closed)
    }
    .boxed()
}

/// Wait for one payload under each of `names`, failing on the first error.
pub async fn require_all<T, I>(
    handlers: &Arc<HandlerManager<T>>,
    names: I,
    timeout: Option<Duration>,
) -> Result<Vec<T>, ClientError>
where
    T: Clone + Send + Sync + 'static,
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let waits: Vec<_> = names
        .into_iter()
        .map(|name| await_once(handlers, name.as_ref(), timeout, || Ok(())))
        .collect();
    try_join_all(waits).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn resolves_with_dispatched_payload() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let wait = await_once(&handlers, "Beta", Some(Duration::from_secs(1)), || Ok(()));
        assert_eq!(handlers.handler_count("Beta"), 1);

        handlers.dispatch("Beta", &7);
        handlers.dispatch("Beta", &8);
        assert_eq!(wait.await.unwrap(), 7);
        assert_eq!(handlers.handler_count("Beta"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_detaches() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let start = Instant::now();
        let wait = await_once(&handlers, "Beta", Some(Duration::from_millis(250)), || Ok(()));

        let err = wait.await.unwrap_err();
        assert!(matches!(err, ClientError::Timeout(ref name) if name == "Beta"));
        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(handlers.handler_count("Beta"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_fixed_at_call_time() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let start = Instant::now();
        let wait = await_once(&handlers, "Beta", Some(Duration::from_millis(100)), || Ok(()));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(wait.await.is_err());
        assert!(start.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn trigger_runs_after_registration() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let inner = Arc::clone(&handlers);
        let wait = await_once(&handlers, "Beta", None, move || {
            inner.dispatch("Beta", &3);
            Ok(())
        });
        assert_eq!(wait.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn failed_trigger_detaches() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let wait = await_once(&handlers, "Beta", None, || Err(ClientError::NotConnected));
        assert!(matches!(wait.await, Err(ClientError::NotConnected)));
        assert_eq!(handlers.handler_count("Beta"), 0);
    }

    #[tokio::test]
    async fn detach_all_closes_waiters() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let wait = await_once(&handlers, "Beta", None, || Ok(()));
        handlers.detach_all();
        assert!(matches!(wait.await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn close_signal_releases_waiters() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let (closes, closed) = watch::channel(0u64);
        closes.send_replace(1);

        let wait = await_once_until_closed(&handlers, "Beta", None, closed, || Ok(()));
        closes.send_replace(2);
        assert!(matches!(wait.await, Err(ClientError::Closed)));
        assert!(!handlers.has_handlers("Beta"));

        let wait = await_once_until_closed(&handlers, "Beta", None, closes.subscribe(), || Ok(()));
        handlers.dispatch("Beta", &5);
        assert_eq!(wait.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn dropping_the_future_detaches() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        drop(await_once(&handlers, "Beta", None, || Ok(())));
        assert!(!handlers.has_handlers("Beta"));
    }

    #[tokio::test(start_paused = true)]
    async fn require_all_fails_fast() {
        let handlers = Arc::new(HandlerManager::<u32>::new());
        let inner = Arc::clone(&handlers);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner.dispatch("a", &1);
            inner.dispatch("b", &2);
        });
        let values = require_all(&handlers, ["a", "b"], Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(values, [1, 2]);

        let err = require_all(&handlers, ["a", "c"], Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Timeout(_)));
    }
}
