//! Replication receiver channel
//!
//! TigerStyle: A replication channel never opens; it stays `Idle` while it
//! applies a peer's writes and goes straight to `Closed`.
//!
//! The peer opens with `ReplicationHello`. A hello carrying this node's own
//! name means the peer list loops back to us: the reply declines the
//! snapshot and the channel closes. Every later `Register`/`Unregister` is
//! applied under `REPLICATION(peer)` and acknowledged. Closing releases
//! everything that peer registered.

use crate::driver::{spawn_channel, ChannelHandle, ChannelHandler, ChannelLink, Flow};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use eddy_core::{ChannelConfig, IoContext, Source};
use eddy_registry::Registry;
use eddy_transport::{
    Message, MessageConnection, MessageKind, ReplicationHelloReply, Unregister,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receiving end of a peer's replication stream
pub struct ReplicationChannel<R: Registry + ?Sized + 'static> {
    name: String,
    local: Source,
    registry: Arc<R>,
    peer: Option<Source>,
}

impl<R: Registry + ?Sized + 'static> ReplicationChannel<R> {
    /// Start a replication channel; `local` identifies this node
    pub fn spawn(
        name: impl Into<String>,
        local: Source,
        registry: Arc<R>,
        connection: Arc<MessageConnection>,
        config: &ChannelConfig,
        io: IoContext,
    ) -> ChannelHandle {
        let channel = Self {
            name: name.into(),
            local,
            registry,
            peer: None,
        };
        spawn_channel::<Self>(channel, None, connection, config, io)
    }

    fn peer(&self, kind: MessageKind) -> ChannelResult<Source> {
        self.peer.clone().ok_or_else(|| {
            ChannelError::unexpected(&self.name, kind, "ReplicationHello must come first")
        })
    }
}

#[async_trait]
impl<R: Registry + ?Sized + 'static> ChannelHandler for ReplicationChannel<R> {
    type Event = ();

    fn name(&self) -> &str {
        &self.name
    }

    fn opens(&self) -> bool {
        false
    }

    async fn handle(&mut self, link: &ChannelLink, message: Message) -> ChannelResult<Flow> {
        match message {
            Message::ReplicationHello(hello) => {
                if self.peer.is_some() {
                    return Err(ChannelError::unexpected(
                        &self.name,
                        MessageKind::ReplicationHello,
                        "duplicate hello",
                    ));
                }
                if hello.source.name == self.local.name {
                    warn!(channel = %self.name, source = %hello.source, "replication loop detected");
                    link.send(Message::ReplicationHelloReply(ReplicationHelloReply {
                        source: self.local.clone(),
                        send_snapshot: false,
                    }))
                    .await?;
                    return Ok(Flow::Close);
                }

                let peer = Source::replication(hello.source.name);
                info!(
                    channel = %self.name,
                    peer = %peer,
                    registry_size = hello.registry_size,
                    "replication peer connected"
                );
                self.peer = Some(peer);
                link.send(Message::ReplicationHelloReply(ReplicationHelloReply {
                    source: self.local.clone(),
                    send_snapshot: true,
                }))
                .await?;
                Ok(Flow::Continue)
            }
            Message::Register(instance) => {
                let peer = self.peer(MessageKind::Register)?;
                debug!(channel = %self.name, peer = %peer, instance_id = %instance.id, "replicated register");
                self.registry.register(*instance, &peer).await?;
                link.acknowledge().await?;
                Ok(Flow::Continue)
            }
            Message::Unregister(Unregister { id: Some(id) }) => {
                let peer = self.peer(MessageKind::Unregister)?;
                let outcome = self.registry.unregister(&id, &peer).await?;
                debug!(channel = %self.name, peer = %peer, instance_id = %id, outcome = ?outcome, "replicated unregister");
                link.acknowledge().await?;
                Ok(Flow::Continue)
            }
            other => Err(ChannelError::unexpected(
                &self.name,
                other.kind(),
                "not part of the replication protocol",
            )),
        }
    }

    async fn on_close(&mut self) {
        let Some(peer) = &self.peer else {
            return;
        };
        match self.registry.release_source(peer).await {
            Ok(released) => info!(channel = %self.name, peer = %peer, released, "released peer holds"),
            Err(e) => warn!(channel = %self.name, peer = %peer, error = %e, "failed to release peer holds"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CloseReason;
    use crate::state::ChannelState;
    use eddy_core::{InstanceFields, InstanceId, InstanceInfo, RegistryConfig};
    use eddy_dst::SimClock;
    use eddy_registry::MemoryRegistry;
    use eddy_transport::{Link, ProtocolType, ReplicationHello};

    fn setup() -> (Arc<MemoryRegistry>, ChannelHandle, Link) {
        let io = IoContext::new(Arc::new(SimClock::from_millis(0)));
        let registry = Arc::new(MemoryRegistry::new(
            &RegistryConfig::for_testing(),
            io.clone(),
        ));
        let (server, client) = Link::memory_pair(ProtocolType::Replication);
        let connection = Arc::new(MessageConnection::new(server, 100, io.clone()));
        let handle = ReplicationChannel::spawn(
            "replication-1",
            Source::local("node-a"),
            registry.clone(),
            connection,
            &ChannelConfig::for_testing(),
            io,
        );
        (registry, handle, client)
    }

    fn hello(name: &str) -> Message {
        Message::ReplicationHello(ReplicationHello {
            source: Source::local(name),
            registry_size: 1,
        })
    }

    fn instance(id: &str) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: "X".into(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_replicated_writes_apply_under_peer_source() {
        let (registry, handle, mut client) = setup();

        client.send(hello("node-b")).await.unwrap();
        let Message::ReplicationHelloReply(reply) = client.recv().await.unwrap().unwrap() else {
            panic!("expected hello reply");
        };
        assert!(reply.send_snapshot);
        assert_eq!(reply.source, Source::local("node-a"));
        assert_eq!(handle.state(), ChannelState::Idle);

        client.send(Message::register(instance("i-1"))).await.unwrap();
        client.send(Message::register(instance("i-2"))).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(registry.size().await, 2);

        client
            .send(Message::unregister(Some(InstanceId::new("i-1").unwrap())))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(registry.size().await, 1);

        // Disconnect releases the rest
        drop(client);
        assert_eq!(handle.join().await, CloseReason::TransportEnded);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_self_replication_declined() {
        let (registry, handle, mut client) = setup();
        client.send(hello("node-a")).await.unwrap();

        let Message::ReplicationHelloReply(reply) = client.recv().await.unwrap().unwrap() else {
            panic!("expected hello reply");
        };
        assert!(!reply.send_snapshot);
        assert_eq!(handle.join().await, CloseReason::Completed);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_register_before_hello_rejected() {
        let (_registry, handle, mut client) = setup();
        client.send(Message::register(instance("i-1"))).await.unwrap();
        assert!(matches!(
            client.recv().await.unwrap().unwrap(),
            Message::ErrorMessage(_)
        ));
        assert!(matches!(handle.join().await, CloseReason::Failed { .. }));
    }
}
