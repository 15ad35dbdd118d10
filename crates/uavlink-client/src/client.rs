//! The public [`Client`] facade.
//!
//! Wraps a [`Session`] with connection management, readiness, the handler
//! sets and the awaitable request helpers.

use futures_util::future::{self, try_join_all, Either};
use serde_json::{Map, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use uavlink_core::{
    Callback, Definition, DefinitionKind, HandlerId, HandlerManager, HandshakeError,
    HandshakeState, ObjectData,
};

use crate::bridge;
use crate::config::ClientConfig;
use crate::session::Session;
use crate::transport;
use crate::ClientError;

/// Handle to one protocol session.
///
/// Cloning is cheap; every clone drives the same session. Waits that take an
/// `Option<Duration>` fall back to [`ClientConfig::request_timeout`] when
/// given `None`.
#[derive(Clone)]
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            session: Session::new(config),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.session.config
    }

    /// Open a WebSocket to the configured URL. An existing connection is
    /// closed first.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.disconnect();
        transport::connect(&self.session).await
    }

    pub fn disconnect(&self) {
        if self.session.is_connected() {
            self.session.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Attach a caller-provided transport. Frames to send arrive on `outbox`.
    pub fn bind(&self, outbox: UnboundedSender<String>) {
        self.session.open(outbox);
    }

    /// Feed one inbound text frame.
    pub fn receive(&self, text: &str) {
        self.session.receive(text);
    }

    /// Detach the transport attached with [`bind`](Self::bind).
    pub fn unbind(&self) {
        self.session.close();
    }

    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.session.readiness.on_ready(callback);
    }

    pub fn on_error(&self, callback: impl Fn(&HandshakeError) + Send + Sync + 'static) {
        self.session.readiness.on_error(callback);
    }

    /// Resolves once the session is ready, or with the handshake error that
    /// prevented it.
    pub async fn ready(&self) -> Result<(), ClientError> {
        self.session.readiness.wait().await
    }

    pub fn is_ready(&self) -> bool {
        self.session.readiness.is_ready()
    }

    /// Whether the telemetry handshake has ever completed.
    pub fn telemetry_ready(&self) -> bool {
        self.session.telemetry.as_ref().is_some_and(|t| t.is_ready())
    }

    /// `None` when the handshake is not configured.
    pub fn handshake_state(&self) -> Option<HandshakeState> {
        self.session.telemetry.as_ref().map(|t| t.state())
    }

    /// Object updates (telemetry) and events (pub/sub).
    pub fn updates(&self) -> &Arc<HandlerManager<ObjectData>> {
        &self.session.updates
    }

    /// Object requests (telemetry) and actions (pub/sub).
    pub fn requests(&self) -> &Arc<HandlerManager<ObjectData>> {
        &self.session.requests
    }

    pub fn definitions(&self) -> &Arc<HandlerManager<Definition>> {
        &self.session.definitions
    }

    pub fn undefinitions(&self) -> &Arc<HandlerManager<Definition>> {
        &self.session.undefinitions
    }

    /// Watch updates of `name`. The first watcher subscribes.
    pub fn attach(
        &self,
        name: &str,
        callback: impl Fn(&ObjectData) + Send + Sync + 'static,
    ) -> HandlerId {
        self.session.updates.attach(name, Arc::new(callback))
    }

    /// Watch the next `calls` updates of `name`, then detach.
    pub fn attach_limited(
        &self,
        name: &str,
        callback: impl Fn(&ObjectData) + Send + Sync + 'static,
        calls: NonZeroU32,
    ) -> HandlerId {
        self.session.updates.attach_limited(name, Arc::new(callback), calls)
    }

    /// Stop watching. The last watcher unsubscribes.
    pub fn detach(&self, name: &str, id: HandlerId) -> bool {
        self.session.updates.detach_id(name, id)
    }

    /// Remove every registration of `callback` under `name`, returning how
    /// many were removed.
    pub fn detach_callback(&self, name: &str, callback: &Callback<ObjectData>) -> usize {
        self.session.updates.detach(name, callback)
    }

    /// Request the current value of `name` and hand it to `callback` once.
    pub fn read_once(
        &self,
        name: &str,
        callback: impl Fn(&ObjectData) + Send + Sync + 'static,
    ) -> Result<HandlerId, ClientError> {
        let id = self.session.updates.attach_once(name, Arc::new(callback));
        if let Err(err) = self.session.send_request(name, 0) {
            self.session.updates.detach_id(name, id);
            return Err(err);
        }
        Ok(id)
    }

    /// Request the current value of `name` and wait for it.
    pub async fn read(&self, name: &str, timeout: Option<Duration>) -> Result<ObjectData, ClientError> {
        bridge::await_once_until_closed(
            &self.session.updates,
            name,
            self.timeout(timeout),
            self.session.closed(),
            || self.session.send_request(name, 0),
        )
        .await
    }

    /// Publish `data` as an update of object `name` (telemetry) or as event
    /// `name` (pub/sub).
    pub fn send_update(&self, name: &str, data: Value) -> Result<(), ClientError> {
        self.session.send_update(name, data)
    }

    /// Invoke action `name` on the peer. Pub/sub only.
    pub fn send_action(&self, name: &str, data: Value) -> Result<(), ClientError> {
        self.session.send_action(name, data)
    }

    /// Ask the peer for instance `instance_id` of object `name`. Telemetry only.
    pub fn send_request(&self, name: &str, instance_id: u32) -> Result<(), ClientError> {
        self.session.send_request(name, instance_id)
    }

    /// Publish a definition owned by this client. It is re-sent on every
    /// (re)connect.
    pub fn add_local_definition(&self, definition: Definition) -> Result<Definition, ClientError> {
        self.session.add_local_definition(definition)
    }

    pub fn remove_local_definition(
        &self,
        kind: Option<DefinitionKind>,
        identifier: &str,
    ) -> Result<Option<Definition>, ClientError> {
        self.session.remove_local_definition(kind, identifier)
    }

    pub fn remote_definition(&self, name: &str) -> Option<Definition> {
        self.session.remote_definition(name)
    }

    pub fn local_definition(&self, name: &str) -> Option<Definition> {
        self.session.local_definition(name)
    }

    /// An instance of `name` with every field at its default value.
    pub fn default_instance(&self, name: &str) -> Result<Map<String, Value>, ClientError> {
        self.session.default_instance(name)
    }

    /// Wait until the peer has defined every one of `names`.
    pub async fn require_definitions<I>(
        &self,
        names: I,
        timeout: Option<Duration>,
    ) -> Result<Vec<Definition>, ClientError>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let timeout = self.timeout(timeout);
        let waits: Vec<_> = names
            .into_iter()
            .map(|name| {
                let name = name.as_ref();
                let wait = bridge::await_once_until_closed(
                    &self.session.definitions,
                    name,
                    timeout,
                    self.session.closed(),
                    || Ok(()),
                );
                match self.session.remote_definition(name) {
                    Some(definition) => Either::Left(future::ready(Ok(definition))),
                    None => Either::Right(wait),
                }
            })
            .collect();
        try_join_all(waits).await
    }

    /// Wait for the definitions involved, send each action once and return
    /// the first payload of every event, in the order given.
    pub async fn bootstrap(
        &self,
        actions: &[(String, Value)],
        events: &[String],
        definitions: &[String],
        timeout: Option<Duration>,
    ) -> Result<Vec<ObjectData>, ClientError> {
        let timeout = self.timeout(timeout);
        let deadline = timeout.map(|t| Instant::now() + t);

        let required = actions
            .iter()
            .map(|(name, _)| name)
            .chain(events)
            .chain(definitions);
        self.require_definitions(required, timeout).await?;

        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let waits: Vec<_> = events
            .iter()
            .map(|name| {
                bridge::await_once_until_closed(
                    &self.session.updates,
                    name,
                    remaining,
                    self.session.closed(),
                    || Ok(()),
                )
            })
            .collect();
        for (name, data) in actions {
            self.session.send_action(name, data.clone())?;
        }
        try_join_all(waits).await
    }

    fn timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or_else(|| self.session.config.request_timeout())
    }
}
