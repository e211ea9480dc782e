//! Interest channel
//!
//! TigerStyle: The client's interest drives one multiplexer; every
//! notification becomes exactly one wire message per change.
//!
//! | Notification        | Wire message                         |
//! |---------------------|--------------------------------------|
//! | `Add`               | `AddInstance`, acknowledged          |
//! | `Modify`            | one `UpdateInstanceInfo` per delta   |
//! | `Delete`            | `DeleteInstance`                     |
//! | stream marker       | `StreamStateUpdate`                  |

use crate::driver::{spawn_channel, ChannelHandle, ChannelHandler, ChannelLink, Flow};
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use eddy_core::{ChangeNotification, ChannelConfig, Interest, IoContext};
use eddy_registry::{InterestMultiplexer, MultiplexedItem, Registry};
use eddy_transport::{Message, MessageConnection, ServerHello};
use std::sync::Arc;
use tracing::{debug, info};

/// Server side of an interest subscription
pub struct InterestChannel<R: Registry + ?Sized + 'static> {
    name: String,
    server_id: String,
    multiplexer: InterestMultiplexer<R>,
}

impl<R: Registry + ?Sized + 'static> InterestChannel<R> {
    /// Start an interest channel over `connection`
    pub fn spawn(
        name: impl Into<String>,
        server_id: impl Into<String>,
        registry: Arc<R>,
        connection: Arc<MessageConnection>,
        config: &ChannelConfig,
        io: IoContext,
    ) -> ChannelHandle {
        let (multiplexer, notifications) = InterestMultiplexer::new(registry);
        let channel = Self {
            name: name.into(),
            server_id: server_id.into(),
            multiplexer,
        };
        spawn_channel(channel, Some(notifications), connection, config, io)
    }

    async fn subscribe(&mut self, link: &ChannelLink, interest: &Interest) -> ChannelResult<()> {
        self.multiplexer.update(interest).await?;
        info!(
            channel = %self.name,
            atoms = self.multiplexer.interests().count(),
            "interest updated"
        );
        link.acknowledge().await
    }
}

#[async_trait]
impl<R: Registry + ?Sized + 'static> ChannelHandler for InterestChannel<R> {
    type Event = MultiplexedItem;

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&mut self, link: &ChannelLink, message: Message) -> ChannelResult<Flow> {
        match message {
            Message::ClientHello(hello) => {
                debug!(channel = %self.name, client_id = %hello.client_id, "client hello");
                link.send(Message::ServerHello(ServerHello {
                    server_id: self.server_id.clone(),
                }))
                .await?;
            }
            Message::InterestRegistration(interest) => self.subscribe(link, &interest).await?,
            Message::UnregisterInterestSet => self.subscribe(link, &Interest::None).await?,
            other => {
                return Err(ChannelError::unexpected(
                    &self.name,
                    other.kind(),
                    "not part of the interest protocol",
                ))
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_event(&mut self, link: &ChannelLink, item: MultiplexedItem) -> ChannelResult<Flow> {
        match item? {
            ChangeNotification::Add(instance) => {
                link.send_with_ack(Message::AddInstance(Box::new((*instance).clone())))
                    .await?
            }
            ChangeNotification::Modify { deltas, .. } => {
                for delta in deltas {
                    link.send(Message::UpdateInstanceInfo(delta)).await?;
                }
            }
            ChangeNotification::Delete(instance) => {
                link.send(Message::DeleteInstance(instance.id.clone()))
                    .await?
            }
            ChangeNotification::StreamState(state) => {
                link.send(Message::StreamStateUpdate(state)).await?
            }
        }
        Ok(Flow::Continue)
    }

    async fn on_close(&mut self) {
        self.multiplexer.unregister();
    }
}
