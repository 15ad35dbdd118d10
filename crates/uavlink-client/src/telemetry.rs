//! Drives the [`Handshake`] machine from status object updates.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uavlink_core::{
    Definition, HandlerId, HandlerManager, Handshake, HandshakeError, HandshakeState, ObjectData,
    Step, TelemetryStatus,
};

use crate::config::TelemetryConfig;
use crate::session::Session;
use crate::ClientError;

pub(crate) struct Telemetry {
    config: TelemetryConfig,
    machine: Mutex<Handshake>,
    /// One-shot `definitions` handler that restarts a deferred handshake.
    retry: Mutex<Option<HandlerId>>,
}

impl Telemetry {
    pub(crate) fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            machine: Mutex::new(Handshake::new()),
            retry: Mutex::new(None),
        }
    }

    /// Listen for the peer's status object for the lifetime of the session.
    pub(crate) fn install(&self, session: &Arc<Session>) {
        let weak = Arc::downgrade(session);
        session.updates.attach(
            &self.config.remote_status,
            Arc::new(move |update: &ObjectData| {
                if let Some(session) = weak.upgrade() {
                    if let Some(telemetry) = &session.telemetry {
                        telemetry.observe(&session, update);
                    }
                }
            }),
        );
    }

    pub(crate) fn state(&self) -> HandshakeState {
        self.machine().state()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.machine().is_ready()
    }

    pub(crate) fn start(&self, session: &Arc<Session>) {
        let step = self.machine().start();
        let Some(status) = step.send else {
            return;
        };
        match self.publish(session, status) {
            Ok(()) => {}
            Err(ClientError::UnknownDefinition(name)) => {
                tracing::debug!(%name, "status object not defined yet; handshake deferred");
                self.retry_on_definition(session);
            }
            Err(err) => tracing::warn!(%err, "failed to start telemetry handshake"),
        }
    }

    pub(crate) fn transport_closed(&self, definitions: &HandlerManager<Definition>) {
        self.machine().transport_closed();
        if let Some(id) = self.retry().take() {
            definitions.detach_id(&self.config.local_status, id);
        }
    }

    fn observe(&self, session: &Arc<Session>, update: &ObjectData) {
        let status = update
            .data
            .get(&self.config.status_field)
            .and_then(Value::as_str);
        let result = match status {
            Some(status) => self.machine().observe(status),
            None => {
                let mut machine = self.machine();
                if machine.is_halted() {
                    return;
                }
                machine.halt();
                Err(HandshakeError::MissingStatus(self.config.status_field.clone()))
            }
        };

        match result {
            Ok(step) => self.apply(session, step),
            Err(HandshakeError::Halted(status)) => {
                tracing::debug!(%status, "ignoring status after handshake halted");
            }
            Err(err) => {
                tracing::error!(%err, object = %update.name, "telemetry handshake halted");
                session.readiness.fail(&err);
            }
        }
    }

    fn apply(&self, session: &Arc<Session>, step: Step) {
        if let Some(status) = step.send {
            if let Err(err) = self.publish(session, status) {
                tracing::warn!(%status, %err, "failed to publish telemetry status");
            }
        }
        if step.became_ready {
            tracing::info!("telemetry connected");
            session.readiness.mark_ready();
        }
    }

    fn publish(&self, session: &Session, status: TelemetryStatus) -> Result<(), ClientError> {
        tracing::debug!(%status, object = %self.config.local_status, "publishing link status");
        session.send_update(
            &self.config.local_status,
            json!({
                (self.config.status_field.as_str()): status.as_str(),
                "TxDataRate": 0,
                "RxDataRate": 0,
                "TxFailures": 0,
                "RxFailures": 0,
                "TxRetries": 0,
            }),
        )
    }

    fn retry_on_definition(&self, session: &Arc<Session>) {
        let mut retry = self.retry();
        if retry.is_some() {
            return;
        }
        let weak = Arc::downgrade(session);
        let id = session.definitions.attach_once(
            &self.config.local_status,
            Arc::new(move |_: &Definition| {
                if let Some(session) = weak.upgrade() {
                    if let Some(telemetry) = &session.telemetry {
                        telemetry.retry().take();
                        telemetry.start(&session);
                    }
                }
            }),
        );
        *retry = Some(id);
    }

    fn machine(&self) -> MutexGuard<'_, Handshake> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn retry(&self) -> MutexGuard<'_, Option<HandlerId>> {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
