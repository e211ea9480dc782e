//! Registration channel
//!
//! TigerStyle: One channel holds at most one instance, under the source
//! `LOCAL(instance id)`.
//!
//! The first protocol message must be `Register` (a `ClientHello` may come
//! before it). Later `Register` messages update the record. `Unregister`
//! removes it and ends the channel; a channel that closes any other way
//! releases its hold so the record does not outlive the client.

use crate::driver::{spawn_channel, ChannelHandle, ChannelHandler, ChannelLink, Flow};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use eddy_core::{ChannelConfig, InstanceId, InstanceInfo, IoContext, Source};
use eddy_registry::{Outcome, Registry};
use eddy_transport::{Message, MessageConnection, ServerHello};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct Held {
    app: String,
    id: InstanceId,
    source: Source,
}

/// Server side of a client registration
pub struct RegistrationChannel<R: Registry + ?Sized + 'static> {
    name: String,
    server_id: String,
    registry: Arc<R>,
    held: Option<Held>,
    unregistered: bool,
}

impl<R: Registry + ?Sized + 'static> RegistrationChannel<R> {
    /// Start a registration channel over `connection`
    pub fn spawn(
        name: impl Into<String>,
        server_id: impl Into<String>,
        registry: Arc<R>,
        connection: Arc<MessageConnection>,
        config: &ChannelConfig,
        io: IoContext,
    ) -> ChannelHandle {
        let channel = Self {
            name: name.into(),
            server_id: server_id.into(),
            registry,
            held: None,
            unregistered: false,
        };
        spawn_channel::<Self>(channel, None, connection, config, io)
    }

    async fn register(&mut self, instance: InstanceInfo) -> ChannelResult<()> {
        let held = match self.held.take() {
            None => {
                let source = Source::local(instance.id.as_str());
                let held = Held {
                    app: instance.app.clone(),
                    id: instance.id.clone(),
                    source,
                };
                self.registry.register(instance, &held.source).await?;
                info!(channel = %self.name, instance_id = %held.id, app = %held.app, "registered");
                held
            }
            Some(held) if held.id != instance.id => {
                let kind = Message::register(instance.clone()).kind();
                let reason = format!(
                    "channel holds {}, cannot register {}",
                    held.id, instance.id
                );
                self.held = Some(held);
                return Err(ChannelError::unexpected(&self.name, kind, reason));
            }
            Some(mut held) => {
                held.app = instance.app.clone();
                let outcome = self.registry.update(instance.clone(), &held.source).await?;
                if outcome == Outcome::NotFound {
                    // Evicted or released since the first registration
                    debug!(channel = %self.name, instance_id = %held.id, "update found nothing, registering again");
                    self.registry.register(instance, &held.source).await?;
                }
                held
            }
        };
        self.held = Some(held);
        Ok(())
    }
}

#[async_trait]
impl<R: Registry + ?Sized + 'static> ChannelHandler for RegistrationChannel<R> {
    type Event = ();

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&mut self, link: &ChannelLink, message: Message) -> ChannelResult<Flow> {
        match message {
            Message::ClientHello(hello) if self.held.is_none() => {
                debug!(channel = %self.name, client_id = %hello.client_id, "client hello");
                link.send(Message::ServerHello(ServerHello {
                    server_id: self.server_id.clone(),
                }))
                .await?;
                Ok(Flow::Continue)
            }
            Message::Register(instance) => {
                self.register(*instance).await?;
                link.acknowledge().await?;
                Ok(Flow::Continue)
            }
            Message::Unregister(_) => {
                let Some(held) = &self.held else {
                    return Err(ChannelError::unexpected(
                        &self.name,
                        eddy_transport::MessageKind::Unregister,
                        "nothing registered",
                    ));
                };
                self.registry.unregister(&held.id, &held.source).await?;
                self.unregistered = true;
                info!(channel = %self.name, instance_id = %held.id, "unregistered");
                link.acknowledge().await?;
                Ok(Flow::Close)
            }
            other if self.held.is_none() => Err(ChannelError::unexpected(
                &self.name,
                other.kind(),
                "first message must be Register",
            )),
            other => Err(ChannelError::unexpected(
                &self.name,
                other.kind(),
                "not part of the registration protocol",
            )),
        }
    }

    async fn on_heartbeat(&mut self, _link: &ChannelLink) -> ChannelResult<()> {
        if let Some(held) = &self.held {
            if self.registry.renew(&held.app, &held.id).await? == Outcome::NotFound {
                debug!(channel = %self.name, instance_id = %held.id, "heartbeat renew found nothing");
            }
        }
        Ok(())
    }

    async fn on_close(&mut self) {
        let Some(held) = &self.held else {
            return;
        };
        if self.unregistered {
            return;
        }
        match self.registry.release_source(&held.source).await {
            Ok(released) => {
                info!(channel = %self.name, instance_id = %held.id, released, "released hold on close")
            }
            Err(e) => {
                warn!(channel = %self.name, instance_id = %held.id, error = %e, "failed to release hold")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::CloseReason;
    use eddy_core::{InstanceFields, InstanceStatus, RegistryConfig};
    use eddy_dst::SimClock;
    use eddy_registry::MemoryRegistry;
    use eddy_transport::{Link, ProtocolType};

    fn instance(id: &str, status: InstanceStatus) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: "X".into(),
            status,
            ..Default::default()
        })
        .unwrap()
    }

    fn setup() -> (Arc<MemoryRegistry>, ChannelHandle, Link) {
        let io = IoContext::new(Arc::new(SimClock::from_millis(1_000)));
        let registry = Arc::new(MemoryRegistry::new(
            &RegistryConfig::for_testing(),
            io.clone(),
        ));
        let (server, client) = Link::memory_pair(ProtocolType::Registration);
        let connection = Arc::new(MessageConnection::new(server, 100, io.clone()));
        let handle = RegistrationChannel::spawn(
            "registration-1",
            "node-a",
            registry.clone(),
            connection,
            &ChannelConfig::for_testing(),
            io,
        );
        (registry, handle, client)
    }

    fn i1() -> InstanceId {
        InstanceId::new("i-1").unwrap()
    }

    #[tokio::test]
    async fn test_register_update_unregister() {
        let (registry, handle, mut client) = setup();

        client
            .send(Message::register(instance("i-1", InstanceStatus::Starting)))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(
            registry.get("X", &i1()).await.unwrap().status,
            InstanceStatus::Starting
        );

        client
            .send(Message::register(instance("i-1", InstanceStatus::Up)))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(
            registry.get("X", &i1()).await.unwrap().status,
            InstanceStatus::Up
        );

        client.send(Message::unregister(None)).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(handle.join().await, CloseReason::Completed);
        assert!(registry.get("X", &i1()).await.is_none());
    }

    #[tokio::test]
    async fn test_first_message_must_be_register() {
        let (registry, handle, mut client) = setup();
        client.send(Message::unregister(None)).await.unwrap();

        assert!(matches!(
            client.recv().await.unwrap().unwrap(),
            Message::ErrorMessage(_)
        ));
        assert!(matches!(handle.join().await, CloseReason::Failed { .. }));
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_releases_hold() {
        let (registry, handle, mut client) = setup();
        client
            .send(Message::register(instance("i-1", InstanceStatus::Up)))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(registry.size().await, 1);

        drop(client);
        assert_eq!(handle.join().await, CloseReason::TransportEnded);
        assert_eq!(registry.size().await, 0);
    }

    #[tokio::test]
    async fn test_second_instance_rejected() {
        let (registry, handle, mut client) = setup();
        client
            .send(Message::register(instance("i-1", InstanceStatus::Up)))
            .await
            .unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);

        client
            .send(Message::register(instance("i-2", InstanceStatus::Up)))
            .await
            .unwrap();
        assert!(matches!(
            client.recv().await.unwrap().unwrap(),
            Message::ErrorMessage(_)
        ));
        assert!(matches!(handle.join().await, CloseReason::Failed { .. }));
        // The failed channel still releases what it held
        assert!(registry.get("X", &i1()).await.is_none());
        assert!(registry
            .get("X", &InstanceId::new("i-2").unwrap())
            .await
            .is_none());
    }
}
