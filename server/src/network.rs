//! Server network layer handling UDP communications and the tick loop.

use crate::session::{ClientCommand, ConnectionManager};
use crate::world::{World, AUTHORITY_ID};
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{CallChannel, CallTarget, ConnectionId, Packet, ReplicationError, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;

/// Messages sent from network tasks to the main server loop.
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    ConnectionTimeout {
        connection_id: ConnectionId,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Messages sent from the tick loop to the network sender task.
#[derive(Debug)]
pub enum NetMessage {
    Send {
        packet: Packet,
        addr: SocketAddr,
    },
    Broadcast {
        packet: Packet,
        exclude: Option<ConnectionId>,
    },
}

/// Main server coordinating networking and the authoritative simulation.
pub struct Server {
    socket: Arc<UdpSocket>,
    sessions: Arc<RwLock<ConnectionManager>>,
    world: World,
    channel: CallChannel<World>,
    tick_duration: Duration,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    net_tx: mpsc::UnboundedSender<NetMessage>,
    net_rx: mpsc::UnboundedReceiver<NetMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        tick_duration: Duration,
        max_connections: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (net_tx, net_rx) = mpsc::unbounded_channel();

        let mut channel = CallChannel::new();
        World::register_handlers(&mut channel);

        Ok(Server {
            socket,
            sessions: Arc::new(RwLock::new(ConnectionManager::new(max_connections))),
            world: World::new(),
            channel,
            tick_duration,
            server_tx,
            server_rx,
            net_tx,
            net_rx,
        })
    }

    /// Spawns the task that continuously listens for incoming packets.
    async fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 2048];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns the task that processes the outgoing packet queue.
    async fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);
        let mut net_rx = std::mem::replace(&mut self.net_rx, mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = net_rx.recv().await {
                match message {
                    NetMessage::Send { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    NetMessage::Broadcast { packet, exclude } => {
                        let addrs = {
                            let sessions_guard = sessions.read().await;
                            sessions_guard.addrs()
                        };

                        for (connection_id, addr) in addrs {
                            if Some(connection_id) == exclude {
                                continue;
                            }
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to connection {}: {}", connection_id, e);
                            }
                        }
                    }
                }
            }
        });
    }

    /// Spawns the task that monitors connection timeouts.
    async fn spawn_timeout_checker(&self) {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts()
                };

                for connection_id in timed_out {
                    if let Err(e) =
                        server_tx.send(ServerMessage::ConnectionTimeout { connection_id })
                    {
                        error!("Failed to send timeout message: {}", e);
                        break;
                    }
                }
            }
        });
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn send_packet(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.net_tx.send(NetMessage::Send { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    fn broadcast_packet(&self, packet: Packet, exclude: Option<ConnectionId>) {
        if let Err(e) = self.net_tx.send(NetMessage::Broadcast { packet, exclude }) {
            error!("Failed to queue broadcast packet: {}", e);
        }
    }

    /// Processes one incoming packet against the session roster and the
    /// world. All spoofable fields are replaced by what the transport knows:
    /// the sender of a call is the connection the packet arrived on.
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Connection attempt from {} (version {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.send_packet(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove an existing session from the same address first.
                let existing = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };
                if let Some(existing_id) = existing {
                    info!("Replacing existing connection {} from {}", existing_id, addr);
                    self.close_connection(existing_id).await;
                }

                let connection_id = {
                    let mut sessions = self.sessions.write().await;
                    sessions.add_connection(addr)
                };

                match connection_id {
                    Some(connection_id) => {
                        self.send_packet(Packet::Connected { connection_id }, addr);

                        // Spawn the tank; everyone else learns via the spawn
                        // broadcast, the joiner via the snapshot below.
                        self.world.on_join(connection_id);
                        for event in self.world.drain_events() {
                            let packet = match event {
                                crate::world::WorldEvent::Spawn(record) => Packet::Spawn(record),
                                crate::world::WorldEvent::Despawn { object_id } => {
                                    Packet::Despawn { object_id }
                                }
                            };
                            self.broadcast_packet(packet, Some(connection_id));
                        }
                        self.send_packet(
                            Packet::Snapshot {
                                spawns: self.world.snapshot(),
                            },
                            addr,
                        );
                    }
                    None => {
                        self.send_packet(
                            Packet::Disconnected {
                                reason: "Server full".to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Heartbeat { .. } => {
                let mut sessions = self.sessions.write().await;
                if let Some(connection_id) = sessions.find_by_addr(addr) {
                    sessions.touch(connection_id);
                }
            }

            Packet::FieldWrite {
                object_id,
                field_id,
                value,
            } => {
                let mut sessions = self.sessions.write().await;
                if let Some(connection_id) = sessions.find_by_addr(addr) {
                    sessions.push_command(
                        connection_id,
                        ClientCommand::FieldWrite {
                            object_id,
                            field_id,
                            value,
                        },
                    );
                }
            }

            Packet::Call { name, args, .. } => {
                let mut sessions = self.sessions.write().await;
                if let Some(connection_id) = sessions.find_by_addr(addr) {
                    sessions.push_command(connection_id, ClientCommand::Call { name, args });
                }
            }

            Packet::Disconnect => {
                let connection_id = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };
                if let Some(connection_id) = connection_id {
                    self.close_connection(connection_id).await;
                }
            }

            _ => {
                warn!("Unexpected packet type from {}", addr);
            }
        }
    }

    /// Lifecycle cleanup shared by explicit disconnects, timeouts and
    /// address reuse: frees the identity slot, despawns exclusively-owned
    /// objects and tells the survivors.
    async fn close_connection(&mut self, connection_id: ConnectionId) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.remove_connection(connection_id);
        }
        self.world.on_leave(connection_id);
        self.flush_world_output().await;
    }

    /// One authoritative tick: drains queued commands in per-sender arrival
    /// order, steps the simulation, then flushes accepted state to
    /// observers.
    async fn step(&mut self, dt: f32) {
        let commands = {
            let mut sessions = self.sessions.write().await;
            sessions.drain_commands()
        };

        for (sender, command) in commands {
            match command {
                ClientCommand::Call { name, args } => {
                    // Unknown calls are logged in the channel and dropped.
                    let _ = self.channel.dispatch(&mut self.world, &name, &args, sender);
                }
                ClientCommand::FieldWrite {
                    object_id,
                    field_id,
                    value,
                } => {
                    self.world.handle_field_write(sender, object_id, field_id, value);
                }
            }
        }

        self.world.tick(dt, &mut self.channel.outbox);
        self.flush_world_output().await;
    }

    /// Delivers queued spawn/despawn events, accepted field changes and
    /// broadcast calls. Fire-and-forget, at most once per accepted
    /// transition; the transport is assumed reliable and ordered.
    async fn flush_world_output(&mut self) {
        for event in self.world.drain_events() {
            let packet = match event {
                crate::world::WorldEvent::Spawn(record) => Packet::Spawn(record),
                crate::world::WorldEvent::Despawn { object_id } => Packet::Despawn { object_id },
            };
            self.broadcast_packet(packet, None);
        }

        for change in self.world.store.drain_outbound() {
            self.broadcast_packet(Packet::FieldChange(change), None);
        }

        for call in self.channel.outbox.drain() {
            match call.target {
                CallTarget::Broadcast { exclude } => {
                    self.broadcast_packet(
                        Packet::Call {
                            name: call.name,
                            args: call.args,
                            sender: AUTHORITY_ID,
                        },
                        exclude,
                    );
                }
                CallTarget::Authority => {
                    debug!("Dropping authority-directed call '{}' on the authority", call.name);
                }
            }
        }
    }

    /// Main server loop coordinating all operations.
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver().await;
        self.spawn_network_sender().await;
        self.spawn_timeout_checker().await;

        let mut tick_interval = interval(self.tick_duration);
        let mut last_tick = Instant::now();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr).await;
                        },
                        Some(ServerMessage::ConnectionTimeout { connection_id }) => {
                            warn!("{}", ReplicationError::ConnectionLost(connection_id));
                            self.world.on_leave(connection_id);
                            self.flush_world_output().await;
                        },
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Server shutting down");
                            break;
                        }
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    self.step(dt).await;
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{
        Value, Vec2, CALL_DUMMY_PROJECTILE, CALL_PRIMARY_FIRE, FIELD_POSITION, MAX_HEALTH,
    };

    async fn test_server() -> Server {
        Server::new("127.0.0.1:0", Duration::from_millis(16), 8)
            .await
            .expect("failed to bind test server")
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new("127.0.0.1".parse().unwrap(), port)
    }

    async fn connect(server: &mut Server, port: u16) -> ConnectionId {
        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(port),
            )
            .await;

        match server.net_rx.try_recv().unwrap() {
            NetMessage::Send {
                packet: Packet::Connected { connection_id },
                ..
            } => connection_id,
            other => panic!("expected Connected, got {:?}", other),
        }
    }

    fn drain_net(server: &mut Server) -> Vec<NetMessage> {
        let mut drained = Vec::new();
        while let Ok(message) = server.net_rx.try_recv() {
            drained.push(message);
        }
        drained
    }

    #[tokio::test]
    async fn test_connect_sends_snapshot() {
        let mut server = test_server().await;
        let connection_id = connect(&mut server, 40001).await;
        assert_eq!(connection_id, 1);

        let messages = drain_net(&mut server);
        let snapshot = messages.iter().find_map(|message| match message {
            NetMessage::Send {
                packet: Packet::Snapshot { spawns },
                addr,
            } => Some((spawns.clone(), *addr)),
            _ => None,
        });
        let (spawns, target) = snapshot.expect("no snapshot sent to joiner");
        assert_eq!(target, addr(40001));
        // Four coins plus the joiner's own tank.
        assert_eq!(spawns.len(), 5);

        // The tank spawn broadcast excludes the joiner.
        let spawn_broadcast = messages.iter().any(|message| {
            matches!(message, NetMessage::Broadcast {
                packet: Packet::Spawn(_),
                exclude: Some(id),
            } if *id == connection_id)
        });
        assert!(spawn_broadcast);
    }

    #[tokio::test]
    async fn test_version_mismatch_rejected() {
        let mut server = test_server().await;
        server
            .handle_packet(Packet::Connect { client_version: 999 }, addr(40002))
            .await;

        match server.net_rx.try_recv().unwrap() {
            NetMessage::Send {
                packet: Packet::Disconnected { reason },
                ..
            } => assert!(reason.contains("version")),
            other => panic!("expected Disconnected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_full() {
        let mut server = Server::new("127.0.0.1:0", Duration::from_millis(16), 1)
            .await
            .unwrap();
        connect(&mut server, 40003).await;
        drain_net(&mut server);

        server
            .handle_packet(
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                },
                addr(40004),
            )
            .await;

        let rejected = drain_net(&mut server).into_iter().any(|message| {
            matches!(message, NetMessage::Send {
                packet: Packet::Disconnected { reason },
                ..
            } if reason == "Server full")
        });
        assert!(rejected);
    }

    #[tokio::test]
    async fn test_owner_write_flows_to_observers() {
        let mut server = test_server().await;
        let connection_id = connect(&mut server, 40005).await;
        drain_net(&mut server);

        let tank = server.world.tank_object(connection_id).unwrap();
        server
            .handle_packet(
                Packet::FieldWrite {
                    object_id: tank,
                    field_id: FIELD_POSITION,
                    value: Value::Vector(Vec2::new(200.0, 200.0)),
                },
                addr(40005),
            )
            .await;
        server.step(1.0 / 60.0).await;

        let change = drain_net(&mut server).into_iter().find_map(|message| match message {
            NetMessage::Broadcast {
                packet: Packet::FieldChange(change),
                ..
            } if change.object_id == tank && change.field_id == FIELD_POSITION => Some(change),
            _ => None,
        });
        let change = change.expect("accepted write was not broadcast");
        assert_eq!(change.value, Value::Vector(Vec2::new(200.0, 200.0)));
        assert_eq!(change.version, 1);
    }

    #[tokio::test]
    async fn test_fire_call_broadcasts_dummy_excluding_shooter() {
        let mut server = test_server().await;
        let connection_id = connect(&mut server, 40006).await;
        drain_net(&mut server);

        let tank = server.world.tank_object(connection_id).unwrap();
        let position = server
            .world
            .store
            .read(tank, FIELD_POSITION)
            .unwrap()
            .as_vector()
            .unwrap();

        server
            .handle_packet(
                Packet::Call {
                    name: CALL_PRIMARY_FIRE.to_string(),
                    args: vec![
                        Value::Int(tank as i32),
                        Value::Vector(position),
                        Value::Vector(Vec2::new(0.0, 1.0)),
                    ],
                    // The server must ignore a spoofed sender field.
                    sender: 999,
                },
                addr(40006),
            )
            .await;
        server.step(1.0 / 60.0).await;

        assert_eq!(server.world.projectile_count(), 1);
        let dummy = drain_net(&mut server).into_iter().find_map(|message| match message {
            NetMessage::Broadcast {
                packet: Packet::Call { name, sender, .. },
                exclude,
            } if name == CALL_DUMMY_PROJECTILE => Some((sender, exclude)),
            _ => None,
        });
        let (sender, exclude) = dummy.expect("no dummy projectile broadcast");
        assert_eq!(sender, AUTHORITY_ID);
        assert_eq!(exclude, Some(connection_id));
    }

    #[tokio::test]
    async fn test_disconnect_despawns_and_frees_slot() {
        let mut server = test_server().await;
        let connection_id = connect(&mut server, 40007).await;
        drain_net(&mut server);
        let tank = server.world.tank_object(connection_id).unwrap();

        server.handle_packet(Packet::Disconnect, addr(40007)).await;

        assert_eq!(server.world.tank_object(connection_id), None);
        assert_eq!(server.world.store.read(tank, shared::FIELD_HEALTH), None);
        assert!(server.sessions.read().await.is_empty());

        let despawned = drain_net(&mut server).into_iter().any(|message| {
            matches!(message, NetMessage::Broadcast {
                packet: Packet::Despawn { object_id },
                ..
            } if object_id == tank)
        });
        assert!(despawned);

        // The tank is fully gone; a fresh join gets full health again.
        let rejoined = connect(&mut server, 40007).await;
        let new_tank = server.world.tank_object(rejoined).unwrap();
        assert_eq!(
            server.world.store.read(new_tank, shared::FIELD_HEALTH),
            Some(Value::Int(MAX_HEALTH))
        );
    }
}
