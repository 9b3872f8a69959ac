// Message endpoint: a minimal send/receive surface over the wire protocol,
// thin wrapper over the transport abstraction (C4). Pure glue — it does not
// buffer, retry, or persist.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::{NodeError, Result};
use crate::events::{Event, EventBus, EventType};
use crate::identity::PeerId;
use crate::net::transport::TransportManager;
use crate::protocol;
use crate::reputation::{ActivityKind, ReputationManager};

pub enum SendOutcome {
    Ok,
    NotConnected,
    SendFailed(String),
}

pub struct MessageEndpoint {
    transports: Arc<TransportManager>,
    events: Arc<EventBus>,
    reputation: Arc<ReputationManager>,
    self_did: String,
}

impl MessageEndpoint {
    pub fn new(
        transports: Arc<TransportManager>,
        events: Arc<EventBus>,
        reputation: Arc<ReputationManager>,
        self_did: String,
    ) -> Self {
        Self {
            transports,
            events,
            reputation,
            self_did,
        }
    }

    pub async fn send(&self, peer_id: PeerId, addresses: &[SocketAddr], bytes: &[u8], message_type: &str) -> SendOutcome {
        let (allowed, reason) = self.reputation.can_send(&self.self_did);
        if !allowed {
            let reason = reason.unwrap_or("policy_denied");
            let err = NodeError::PolicyDenied(reason.to_string());
            self.emit_failed(peer_id, message_type, &err.to_string());
            return SendOutcome::SendFailed(err.to_string());
        }

        let connection = match self.transports.connect(peer_id, addresses).await {
            Ok(conn) => conn,
            Err(NodeError::NotConnected) => return SendOutcome::NotConnected,
            Err(e) => {
                self.emit_failed(peer_id, message_type, &e.to_string());
                return SendOutcome::SendFailed(e.to_string());
            }
        };

        let mut stream = match connection.open_stream(protocol::PROTOCOL_ID).await {
            Ok(s) => s,
            Err(e) => {
                self.emit_failed(peer_id, message_type, &e.to_string());
                return SendOutcome::SendFailed(e.to_string());
            }
        };

        if let Err(e) = protocol::write_message(stream.as_mut(), bytes).await {
            self.emit_failed(peer_id, message_type, &e.to_string());
            return SendOutcome::SendFailed(e.to_string());
        }

        if self.reputation.record_activity(&self.self_did, ActivityKind::MessageSent) {
            let _ = self.events.publish(
                Event::new(EventType::ReputationPromoted, "reputation").with("did", self.self_did.clone()),
            );
        }

        let _ = self.events.publish(
            Event::new(EventType::MessageSent, "endpoint")
                .with("peer_id", peer_id.to_string())
                .with("type", message_type),
        );
        SendOutcome::Ok
    }

    /// Handle one inbound stream on `/xelvra/1.0.0`: read the framed
    /// message, surface it as `message_received`, then acknowledge. The
    /// sender's DID form is gated the same way `send` gates our own DID, so
    /// a peer can't exceed its rate limit or daily cap against us either.
    pub async fn handle_inbound(&self, peer_id: PeerId, stream: &mut dyn crate::net::transport::Stream) -> Result<()> {
        let remote_did = peer_id.to_string();
        let (allowed, reason) = self.reputation.can_send(&remote_did);
        if !allowed {
            let reason = reason.unwrap_or("policy_denied");
            self.emit_failed(peer_id, "inbound", reason);
            return Err(NodeError::PolicyDenied(reason.to_string()));
        }

        let payload = protocol::read_message(stream).await?;

        if self.reputation.record_activity(&remote_did, ActivityKind::MessageSent) {
            let _ = self
                .events
                .publish(Event::new(EventType::ReputationPromoted, "reputation").with("did", remote_did.clone()));
        }

        let _ = self.events.publish(
            Event::new(EventType::MessageReceived, "endpoint")
                .with("peer_id", peer_id.to_string())
                .with("bytes", payload.len().to_string()),
        );
        protocol::send_ack(stream).await
    }

    fn emit_failed(&self, peer_id: PeerId, message_type: &str, reason: &str) {
        let _ = self.events.publish(
            Event::new(EventType::MessageFailed, "endpoint")
                .with("peer_id", peer_id.to_string())
                .with("type", message_type)
                .with("reason", reason),
        );
    }
}
