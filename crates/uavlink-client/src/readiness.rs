//! One-shot readiness signal with an error side channel.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uavlink_core::HandshakeError;

use crate::ClientError;

type ReadyCallback = Box<dyn FnOnce() + Send>;
type ErrorCallback = Arc<dyn Fn(&HandshakeError) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Signal {
    Pending,
    Ready,
    Failed(HandshakeError),
}

#[derive(Default)]
struct Waiters {
    ready: bool,
    on_ready: Vec<ReadyCallback>,
    on_error: Vec<ErrorCallback>,
}

/// Fans the first "ready" transition out to every registered callback,
/// in registration order, exactly once.
pub(crate) struct Readiness {
    waiters: Mutex<Waiters>,
    signal: watch::Sender<Signal>,
}

impl Readiness {
    pub(crate) fn new() -> Self {
        Self {
            waiters: Mutex::new(Waiters::default()),
            signal: watch::Sender::new(Signal::Pending),
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.lock().ready
    }

    /// Run `callback` once readiness is reached, or now if it already was.
    pub(crate) fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        let mut waiters = self.lock();
        if waiters.ready {
            drop(waiters);
            callback();
        } else {
            waiters.on_ready.push(Box::new(callback));
        }
    }

    pub(crate) fn on_error(&self, callback: impl Fn(&HandshakeError) + Send + Sync + 'static) {
        self.lock().on_error.push(Arc::new(callback));
    }

    /// Flip to ready. Returns `false` if readiness had already been reached.
    pub(crate) fn mark_ready(&self) -> bool {
        let callbacks = {
            let mut waiters = self.lock();
            if waiters.ready {
                return false;
            }
            waiters.ready = true;
            std::mem::take(&mut waiters.on_ready)
        };
        self.signal.send_replace(Signal::Ready);
        tracing::debug!(callbacks = callbacks.len(), "session ready");
        for callback in callbacks {
            callback();
        }
        true
    }

    /// Report a handshake failure to error callbacks and pending waiters.
    pub(crate) fn fail(&self, error: &HandshakeError) {
        let (ready, callbacks) = {
            let waiters = self.lock();
            (waiters.ready, waiters.on_error.clone())
        };
        if !ready {
            self.signal.send_replace(Signal::Failed(error.clone()));
        }
        for callback in callbacks {
            callback(error);
        }
    }

    /// Wait until ready, or until the handshake fails first.
    pub(crate) async fn wait(&self) -> Result<(), ClientError> {
        let mut rx = self.signal.subscribe();
        let signal = rx
            .wait_for(|s| *s != Signal::Pending)
            .await
            .map_err(|_| ClientError::Closed)?
            .clone();
        match signal {
            Signal::Failed(err) => Err(err.into()),
            Signal::Ready | Signal::Pending => Ok(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
