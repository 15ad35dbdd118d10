//! Connection adapter.
//!
//! A [`Session`] owns everything one connection needs: the remote and local
//! definition catalogs, the handler sets, the outbound queue and the framing
//! state. It frames outbound operations into the configured dialect's packets
//! and routes inbound packets to the catalogs and handler sets.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use uavlink_core::{
    Catalog, Definition, DefinitionError, DefinitionKind, Dialect, HandlerManager,
    IdentifierKey, Namespace, ObjectData, ObjectKey, ObjectRef, ObjectUpdate, Packet,
    PubSubPacket, Publication, TelemetryPacket,
};

use crate::config::ClientConfig;
use crate::readiness::Readiness;
use crate::telemetry::Telemetry;
use crate::ClientError;

/// How the next inbound frame is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Framing {
    /// The peer opens with a bare array of every definition.
    AwaitingBulk,
    /// Every frame is a typed envelope.
    Streaming,
}

struct Link {
    outbox: Option<UnboundedSender<String>>,
    framing: Framing,
    reader: Option<AbortHandle>,
    /// Bumped by every `open`; identifies the current connection.
    generation: u64,
}

pub(crate) struct Session {
    pub(crate) config: ClientConfig,
    remote: Mutex<Catalog>,
    local: Mutex<Catalog>,
    pub(crate) updates: Arc<HandlerManager<ObjectData>>,
    pub(crate) requests: Arc<HandlerManager<ObjectData>>,
    pub(crate) definitions: Arc<HandlerManager<Definition>>,
    pub(crate) undefinitions: Arc<HandlerManager<Definition>>,
    link: Mutex<Link>,
    /// Counts closed connections.
    closes: watch::Sender<u64>,
    pub(crate) readiness: Readiness,
    pub(crate) telemetry: Option<Telemetry>,
}

impl Session {
    pub(crate) fn new(config: ClientConfig) -> Arc<Self> {
        let session = Arc::new_cyclic(|weak: &Weak<Self>| {
            let (on_first, on_last) = (weak.clone(), weak.clone());
            let updates = HandlerManager::with_hooks(
                move |name| {
                    if let Some(session) = on_first.upgrade() {
                        session.subscription_changed(name, true);
                    }
                },
                move |name| {
                    if let Some(session) = on_last.upgrade() {
                        session.subscription_changed(name, false);
                    }
                },
            );
            Self {
                telemetry: config.telemetry.clone().map(Telemetry::new),
                config,
                remote: Mutex::new(Catalog::new()),
                local: Mutex::new(Catalog::new()),
                updates: Arc::new(updates),
                requests: Arc::new(HandlerManager::new()),
                definitions: Arc::new(HandlerManager::new()),
                undefinitions: Arc::new(HandlerManager::new()),
                link: Mutex::new(Link {
                    outbox: None,
                    framing: Framing::Streaming,
                    reader: None,
                    generation: 0,
                }),
                closes: watch::Sender::new(0),
                readiness: Readiness::new(),
            }
        });
        if let Some(telemetry) = &session.telemetry {
            telemetry.install(&session);
        }
        session
    }

    pub(crate) fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.link().outbox.is_some()
    }

    pub(crate) fn set_reader(&self, reader: AbortHandle) {
        if let Some(previous) = self.link().reader.replace(reader) {
            previous.abort();
        }
    }

    /// Changes whenever an open connection closes.
    pub(crate) fn closed(&self) -> watch::Receiver<u64> {
        self.closes.subscribe()
    }

    /// The transport opened; `outbox` is its send half.
    ///
    /// Returns the generation that identifies this connection to
    /// [`connection_lost`](Self::connection_lost).
    pub(crate) fn open(self: &Arc<Self>, outbox: UnboundedSender<String>) -> u64 {
        let framing = if self.config.bulk_definitions && self.remote().is_empty() {
            Framing::AwaitingBulk
        } else {
            Framing::Streaming
        };
        let generation = {
            let mut link = self.link();
            link.outbox = Some(outbox);
            link.framing = framing;
            link.generation += 1;
            link.generation
        };
        tracing::info!(url = %self.config.url, dialect = %self.dialect(), ?framing, generation, "connection open");

        for name in self.updates.registered_names() {
            if let Err(err) = self.send_subscribe(&name) {
                tracing::debug!(%name, %err, "deferring subscription");
            }
        }

        let local: Vec<Definition> = self.local().iter().cloned().collect();
        for definition in &local {
            if let Err(err) = self.send_definition(definition) {
                tracing::warn!(identifier = %definition.identifier, %err, "failed to publish local definition");
            }
        }

        if framing == Framing::Streaming {
            self.definitions_available();
        }
        generation
    }

    /// Close the current connection, whichever it is.
    pub(crate) fn close(&self) {
        self.shut(None);
    }

    /// The transport of connection `generation` ended. Ignored when that
    /// connection was already closed or replaced.
    pub(crate) fn connection_lost(&self, generation: u64) {
        self.shut(Some(generation));
    }

    fn shut(&self, generation: Option<u64>) {
        let (was_open, reader) = {
            let mut link = self.link();
            if let Some(generation) = generation {
                if generation != link.generation || link.outbox.is_none() {
                    tracing::debug!(generation, current = link.generation, "ignoring close of a stale connection");
                    return;
                }
            }
            link.framing = Framing::Streaming;
            (link.outbox.take().is_some(), link.reader.take())
        };
        if let Some(reader) = reader {
            reader.abort();
        }
        if let Some(telemetry) = &self.telemetry {
            telemetry.transport_closed(&self.definitions);
        }
        if was_open {
            self.closes.send_modify(|closes| *closes += 1);
        }
        tracing::info!(url = %self.config.url, "connection closed");
    }

    /// Process one inbound text frame.
    pub(crate) fn receive(self: &Arc<Self>, text: &str) {
        let awaiting_bulk = {
            let mut link = self.link();
            let awaiting = link.framing == Framing::AwaitingBulk;
            link.framing = Framing::Streaming;
            awaiting
        };
        if !awaiting_bulk {
            self.route(text);
            return;
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(entries)) => self.load_bulk(entries),
            _ => {
                tracing::warn!("first frame is not a definition list; decoding it as a packet");
                self.route(text);
            }
        }
        self.definitions_available();
    }

    fn route(self: &Arc<Self>, text: &str) {
        match self.dialect().decode(text) {
            Ok(Packet::Telemetry(packet)) => self.route_telemetry(packet),
            Ok(Packet::PubSub(packet)) => self.route_pub_sub(packet),
            Err(err) => tracing::warn!(%err, "dropping undecodable frame"),
        }
    }

    fn route_telemetry(self: &Arc<Self>, packet: TelemetryPacket) {
        match packet {
            TelemetryPacket::Update(update) => {
                let Some(name) = self.object_name(update.object_id) else {
                    tracing::debug!(object_id = update.object_id, "dropping update for unknown object");
                    return;
                };
                let payload = ObjectData {
                    name,
                    instance_id: Some(update.instance_id),
                    data: update.data,
                };
                self.updates.dispatch(&payload.name, &payload);
            }
            TelemetryPacket::Request(object) => {
                let Some(name) = self.object_name(object.object_id) else {
                    tracing::debug!(object_id = object.object_id, "dropping request for unknown object");
                    return;
                };
                let payload = ObjectData {
                    name,
                    instance_id: Some(object.instance_id),
                    data: Value::Null,
                };
                self.requests.dispatch(&payload.name, &payload);
            }
            TelemetryPacket::ObjectAck(object) | TelemetryPacket::Ack(object) => {
                tracing::trace!(object_id = object.object_id, "acknowledged");
            }
            TelemetryPacket::Nack(object) => {
                tracing::warn!(object_id = object.object_id, "peer rejected object");
            }
            TelemetryPacket::Definition(definition) => self.accept_definition(definition),
            TelemetryPacket::Subscribe(key) | TelemetryPacket::Unsubscribe(key) => {
                tracing::debug!(object_id = key.object_id, "ignoring subscription request from peer");
            }
        }
    }

    fn route_pub_sub(self: &Arc<Self>, packet: PubSubPacket) {
        match packet {
            PubSubPacket::Event(publication) => {
                let payload = ObjectData::new(publication.identifier, publication.data);
                self.updates.dispatch(&payload.name, &payload);
            }
            PubSubPacket::Action(publication) => {
                let payload = ObjectData::new(publication.identifier, publication.data);
                self.requests.dispatch(&payload.name, &payload);
            }
            PubSubPacket::Definition(definition) => self.accept_definition(definition),
            PubSubPacket::Undefinition(definition) => {
                let removed = self
                    .remote()
                    .store_mut(Namespace::of(&definition))
                    .remove(&definition.identifier);
                if removed.is_none() {
                    tracing::debug!(identifier = %definition.identifier, "undefinition of unknown definition");
                }
                self.undefinitions.dispatch(&definition.identifier, &definition);
            }
            PubSubPacket::Subscribe(key) | PubSubPacket::Unsubscribe(key) => {
                tracing::debug!(identifier = %key.identifier, "ignoring subscription request from peer");
            }
        }
    }

    fn accept_definition(self: &Arc<Self>, definition: Definition) {
        let stored = match self.remote().add(definition) {
            Ok(stored) => stored.clone(),
            Err(err) => {
                tracing::warn!(%err, "rejecting definition");
                return;
            }
        };
        tracing::debug!(identifier = %stored.identifier, kind = ?stored.kind, "definition received");
        self.definition_arrived(&stored);
    }

    fn load_bulk(self: &Arc<Self>, entries: Vec<Value>) {
        let mut loaded = Vec::with_capacity(entries.len());
        {
            let mut remote = self.remote();
            for entry in entries {
                let added = serde_json::from_value::<Definition>(entry)
                    .map_err(|err| err.to_string())
                    .and_then(|def| remote.add(def).map(Definition::clone).map_err(|err| err.to_string()));
                match added {
                    Ok(definition) => loaded.push(definition),
                    Err(err) => tracing::warn!(%err, "skipping definition in initial list"),
                }
            }
        }
        tracing::info!(count = loaded.len(), "definitions loaded");
        for definition in &loaded {
            self.definition_arrived(definition);
        }
    }

    fn definition_arrived(&self, definition: &Definition) {
        self.definitions.dispatch(&definition.identifier, definition);

        let subscribable = match self.dialect() {
            Dialect::Telemetry => true,
            Dialect::PubSub => definition.kind == Some(DefinitionKind::Event),
        };
        if subscribable && self.updates.has_handlers(&definition.identifier) && self.is_connected() {
            if let Err(err) = self.send_subscribe(&definition.identifier) {
                tracing::warn!(identifier = %definition.identifier, %err, "failed to subscribe");
            }
        }
    }

    /// Schema is in place: start the handshake, or declare readiness.
    fn definitions_available(self: &Arc<Self>) {
        match &self.telemetry {
            Some(telemetry) => telemetry.start(self),
            None => {
                self.readiness.mark_ready();
            }
        }
    }

    fn subscription_changed(&self, name: &str, subscribed: bool) {
        if !self.is_connected() {
            return;
        }
        let result = if subscribed {
            self.send_subscribe(name)
        } else {
            self.send_unsubscribe(name)
        };
        if let Err(err) = result {
            tracing::debug!(%name, subscribed, %err, "subscription change not sent");
        }
    }

    pub(crate) fn send_update(&self, name: &str, data: Value) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => {
                let object_id = self.object_id(name)?;
                self.send_telemetry(&TelemetryPacket::Update(ObjectUpdate {
                    object_id,
                    instance_id: 0,
                    data,
                }))
            }
            Dialect::PubSub => {
                self.require_pub_sub(name, Namespace::Events)?;
                self.send_pub_sub(&PubSubPacket::Event(Publication {
                    identifier: name.to_owned(),
                    data,
                }))
            }
        }
    }

    pub(crate) fn send_action(&self, name: &str, data: Value) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => Err(self.unsupported("send_action")),
            Dialect::PubSub => {
                self.require_pub_sub(name, Namespace::Actions)?;
                self.send_pub_sub(&PubSubPacket::Action(Publication {
                    identifier: name.to_owned(),
                    data,
                }))
            }
        }
    }

    pub(crate) fn send_request(&self, name: &str, instance_id: u32) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => {
                let object_id = self.object_id(name)?;
                self.send_telemetry(&TelemetryPacket::Request(ObjectRef {
                    object_id,
                    instance_id,
                }))
            }
            Dialect::PubSub => Err(self.unsupported("send_request")),
        }
    }

    pub(crate) fn send_definition(&self, definition: &Definition) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => self.send_telemetry(&TelemetryPacket::Definition(definition.clone())),
            Dialect::PubSub => self.send_pub_sub(&PubSubPacket::Definition(definition.clone())),
        }
    }

    pub(crate) fn send_undefinition(&self, definition: &Definition) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => Err(self.unsupported("send_undefinition")),
            Dialect::PubSub => self.send_pub_sub(&PubSubPacket::Undefinition(definition.clone())),
        }
    }

    pub(crate) fn send_subscribe(&self, name: &str) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => {
                let object_id = self.object_id(name)?;
                self.send_telemetry(&TelemetryPacket::Subscribe(ObjectKey { object_id }))
            }
            Dialect::PubSub => {
                self.require_remote(name, Namespace::Events)?;
                self.send_pub_sub(&PubSubPacket::Subscribe(IdentifierKey {
                    identifier: name.to_owned(),
                }))
            }
        }
    }

    pub(crate) fn send_unsubscribe(&self, name: &str) -> Result<(), ClientError> {
        match self.dialect() {
            Dialect::Telemetry => {
                let object_id = self.object_id(name)?;
                self.send_telemetry(&TelemetryPacket::Unsubscribe(ObjectKey { object_id }))
            }
            Dialect::PubSub => {
                self.require_remote(name, Namespace::Events)?;
                self.send_pub_sub(&PubSubPacket::Unsubscribe(IdentifierKey {
                    identifier: name.to_owned(),
                }))
            }
        }
    }

    fn send_telemetry(&self, packet: &TelemetryPacket) -> Result<(), ClientError> {
        self.send_frame(packet.encode()?)
    }

    fn send_pub_sub(&self, packet: &PubSubPacket) -> Result<(), ClientError> {
        self.send_frame(packet.encode()?)
    }

    fn send_frame(&self, frame: String) -> Result<(), ClientError> {
        let link = self.link();
        let outbox = link.outbox.as_ref().ok_or(ClientError::NotConnected)?;
        outbox.send(frame).map_err(|_| ClientError::Closed)
    }

    fn unsupported(&self, operation: &'static str) -> ClientError {
        ClientError::Unsupported {
            operation,
            dialect: self.dialect(),
        }
    }

    fn object_id(&self, name: &str) -> Result<u32, ClientError> {
        let remote = self.remote();
        let definition = remote.store(Namespace::Objects).require(name)?;
        definition.id.ok_or_else(|| {
            ClientError::Definition(DefinitionError::Malformed {
                identifier: name.to_owned(),
                reason: "no numeric id".to_owned(),
            })
        })
    }

    fn object_name(&self, object_id: u32) -> Option<String> {
        self.remote()
            .store(Namespace::Objects)
            .get_by_id(object_id)
            .map(|d| d.identifier.clone())
    }

    fn require_remote(&self, name: &str, namespace: Namespace) -> Result<(), ClientError> {
        self.remote().store(namespace).require(name)?;
        Ok(())
    }

    /// Names published on a pub/sub link may be defined by either side.
    fn require_pub_sub(&self, name: &str, namespace: Namespace) -> Result<(), ClientError> {
        if self.remote().store(namespace).get_by_name(name).is_some()
            || self.local().store(namespace).get_by_name(name).is_some()
        {
            return Ok(());
        }
        Err(ClientError::UnknownDefinition(name.to_owned()))
    }

    pub(crate) fn remote_definition(&self, name: &str) -> Option<Definition> {
        self.remote().find(name).cloned()
    }

    pub(crate) fn local_definition(&self, name: &str) -> Option<Definition> {
        self.local().find(name).cloned()
    }

    pub(crate) fn default_instance(&self, name: &str) -> Result<Map<String, Value>, ClientError> {
        for catalog in [self.remote(), self.local()] {
            if let Some(namespace) = catalog.locate(name) {
                return Ok(catalog.store(namespace).compute_default_instance(name)?);
            }
        }
        Err(ClientError::UnknownDefinition(name.to_owned()))
    }

    pub(crate) fn add_local_definition(&self, definition: Definition) -> Result<Definition, ClientError> {
        let stored = self.local().add(definition)?.clone();
        if self.is_connected() {
            self.send_definition(&stored)?;
        }
        Ok(stored)
    }

    pub(crate) fn remove_local_definition(
        &self,
        kind: Option<DefinitionKind>,
        identifier: &str,
    ) -> Result<Option<Definition>, ClientError> {
        let removed = self
            .local()
            .store_mut(Namespace::for_kind(kind))
            .remove(identifier);
        if let Some(definition) = &removed {
            if self.is_connected() && self.dialect() == Dialect::PubSub {
                self.send_undefinition(definition)?;
            }
        }
        Ok(removed)
    }

    fn remote(&self) -> MutexGuard<'_, Catalog> {
        self.remote.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local(&self) -> MutexGuard<'_, Catalog> {
        self.local.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn stale_connection_cannot_close_its_successor() {
        let session = Session::new(ClientConfig::pub_sub("ws://127.0.0.1:1"));
        let mut closed = session.closed();

        let (first, _first_rx) = mpsc::unbounded_channel();
        let old = session.open(first);
        session.close();
        assert!(closed.has_changed().unwrap());
        closed.mark_unchanged();

        let (second, _second_rx) = mpsc::unbounded_channel();
        let current = session.open(second);
        assert_ne!(old, current);

        session.connection_lost(old);
        assert!(session.is_connected());
        assert!(!closed.has_changed().unwrap());

        session.connection_lost(current);
        assert!(!session.is_connected());
        assert!(closed.has_changed().unwrap());

        session.connection_lost(current);
        assert_eq!(*closed.borrow_and_update(), 2);
    }
}
