//! Channel listener
//!
//! TigerStyle: One accept loop, one task per connection, the protocol taken
//! from the client's first frame.
//!
//! ```text
//!   accept ──► identify ──► Registration ──► RegistrationChannel(registry)
//!                       ├─► Interest     ──► InterestChannel(registry)
//!                       └─► Replication  ──► ReplicationChannel(store)
//! ```
//!
//! Client channels write through the replicating registry; peer channels
//! write to the plain store so replicated writes are not sent back out.

use eddy_channel::{
    ChannelHandle, ChannelState, InterestChannel, RegistrationChannel, ReplicationChannel,
};
use eddy_core::{ChannelConfig, IoContext, Source};
use eddy_registry::Registry;
use eddy_transport::{Link, LinkListener, MessageConnection, ProtocolType, TransportResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registries and settings every accepted channel is built from
#[derive(Clone)]
pub struct ChannelServices {
    /// This node's id, sent in server hellos
    pub node_id: String,
    /// Replicating registry for client channels
    pub registry: Arc<dyn Registry>,
    /// Plain store for peer replication channels
    pub store: Arc<dyn Registry>,
    /// Channel timers
    pub config: ChannelConfig,
    /// Time source
    pub io: IoContext,
}

impl ChannelServices {
    /// Time a new connection gets to send its first frame
    pub fn identify_timeout_ms(&self) -> u64 {
        let missed = u64::try_from(self.config.heartbeat_missed_count_max.max(1)).unwrap_or(1);
        self.config.heartbeat_interval_ms.saturating_mul(missed)
    }
}

/// Accepts channel connections until stopped
pub struct ChannelListener {
    local_addr: SocketAddr,
    task: RwLock<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
}

impl ChannelListener {
    /// Start accepting on `listener`
    pub fn start(listener: LinkListener, services: ChannelServices) -> TransportResult<Self> {
        let local_addr = listener.local_addr()?;
        let (shutdown, stop) = watch::channel(false);
        info!(address = %local_addr, "channel listener started");
        let task = tokio::spawn(accept_loop(listener, services, stop));
        Ok(Self {
            local_addr,
            task: RwLock::new(Some(task)),
            shutdown,
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, close every open channel and wait for the accept loop
    pub async fn stop(&self) {
        let Some(task) = self.task.write().await.take() else {
            return;
        };
        let _ = self.shutdown.send(true);
        let _ = task.await;
        info!(address = %self.local_addr, "channel listener stopped");
    }
}

impl Drop for ChannelListener {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: LinkListener,
    services: ChannelServices,
    mut stop: watch::Receiver<bool>,
) {
    let sequence = AtomicU64::new(0);
    let mut connections = tokio::task::JoinSet::new();

    loop {
        tokio::select! {
            _ = stop.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((link, peer)) => {
                    let id = sequence.fetch_add(1, Ordering::Relaxed);
                    debug!(peer = %peer, id, "accepted connection");
                    connections.spawn(serve(link, id, services.clone(), stop.clone()));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Channels see the same stop signal and close themselves
    while connections.join_next().await.is_some() {}
}

async fn serve(mut link: Link, id: u64, services: ChannelServices, mut stop: watch::Receiver<bool>) {
    let peer = link.name().to_string();
    let protocol = tokio::select! {
        protocol = link.identify() => protocol,
        _ = services.io.sleep_ms(services.identify_timeout_ms()) => {
            warn!(peer = %peer, "no first frame in time, dropping connection");
            return;
        }
        _ = stop.changed() => return,
    };
    let Some(protocol) = protocol else {
        debug!(peer = %peer, "connection closed before identifying");
        return;
    };

    let connection = Arc::new(MessageConnection::new(
        link,
        services.config.ack_check_interval_ms,
        services.io.clone(),
    ));
    let handle = open_channel(protocol, id, connection, &services);
    info!(peer = %peer, channel = %handle.name(), protocol = %protocol, "channel opened");

    let mut state = handle.subscribe();
    tokio::select! {
        _ = state.wait_for(|s| *s == ChannelState::Closed) => {}
        _ = stop.changed() => handle.close(),
    }
    let reason = handle.join().await;
    info!(peer = %peer, protocol = %protocol, reason = ?reason, "channel closed");
}

fn open_channel(
    protocol: ProtocolType,
    id: u64,
    connection: Arc<MessageConnection>,
    services: &ChannelServices,
) -> ChannelHandle {
    let name = format!("{}-{}", protocol.to_string().to_lowercase(), id);
    let config = &services.config;
    let io = services.io.clone();
    match protocol {
        ProtocolType::Registration => RegistrationChannel::spawn(
            name,
            services.node_id.clone(),
            services.registry.clone(),
            connection,
            config,
            io,
        ),
        ProtocolType::Interest => InterestChannel::spawn(
            name,
            services.node_id.clone(),
            services.registry.clone(),
            connection,
            config,
            io,
        ),
        ProtocolType::Replication => ReplicationChannel::spawn(
            name,
            Source::local(services.node_id.clone()),
            services.store.clone(),
            connection,
            config,
            io,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{InstanceFields, InstanceId, InstanceInfo, InstanceStatus, RegistryConfig};
    use eddy_dst::SimClock;
    use eddy_registry::MemoryRegistry;
    use eddy_transport::{connect_tcp, Message, ReplicationHello};

    struct Fixture {
        store: Arc<MemoryRegistry>,
        listener: ChannelListener,
    }

    async fn fixture() -> Fixture {
        let io = IoContext::new(Arc::new(SimClock::from_millis(1_000)));
        let store = Arc::new(MemoryRegistry::new(&RegistryConfig::for_testing(), io.clone()));
        let services = ChannelServices {
            node_id: "node-a".into(),
            registry: store.clone(),
            store: store.clone(),
            config: ChannelConfig::for_testing(),
            io,
        };
        let bound = LinkListener::bind("127.0.0.1:0").await.unwrap();
        let listener = ChannelListener::start(bound, services).unwrap();
        Fixture { store, listener }
    }

    fn instance(id: &str) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: "X".into(),
            status: InstanceStatus::Up,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_registration_connection() {
        let f = fixture().await;
        let mut client = connect_tcp(f.listener.local_addr(), ProtocolType::Registration)
            .await
            .unwrap();

        client.send(Message::register(instance("i-1"))).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);

        let id = InstanceId::new("i-1").unwrap();
        let copy = f.store.get("X", &id).await.unwrap();
        assert_eq!(copy.status, InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_replication_connection() {
        let f = fixture().await;
        let mut client = connect_tcp(f.listener.local_addr(), ProtocolType::Replication)
            .await
            .unwrap();

        client
            .send(Message::ReplicationHello(ReplicationHello {
                source: Source::local("node-b"),
                registry_size: 1,
            }))
            .await
            .unwrap();
        let Message::ReplicationHelloReply(reply) = client.recv().await.unwrap().unwrap() else {
            panic!("expected hello reply");
        };
        assert_eq!(reply.source.name, "node-a");
        assert!(reply.send_snapshot);

        client.send(Message::register(instance("i-1"))).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(f.store.size().await, 1);
    }

    #[tokio::test]
    async fn test_connections_are_independent() {
        let f = fixture().await;
        let mut first = connect_tcp(f.listener.local_addr(), ProtocolType::Registration)
            .await
            .unwrap();
        let mut second = connect_tcp(f.listener.local_addr(), ProtocolType::Registration)
            .await
            .unwrap();

        first.send(Message::register(instance("i-1"))).await.unwrap();
        second.send(Message::register(instance("i-2"))).await.unwrap();
        assert_eq!(first.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(second.recv().await.unwrap().unwrap(), Message::Acknowledgement);
        assert_eq!(f.store.size().await, 2);
    }

    #[tokio::test]
    async fn test_stop_closes_channels() {
        let f = fixture().await;
        let mut client = connect_tcp(f.listener.local_addr(), ProtocolType::Registration)
            .await
            .unwrap();
        client.send(Message::register(instance("i-1"))).await.unwrap();
        assert_eq!(client.recv().await.unwrap().unwrap(), Message::Acknowledgement);

        f.listener.stop().await;

        // The channel released its hold and the stream ended
        assert_eq!(f.store.size().await, 0);
        loop {
            match client.recv().await {
                None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    }
}
