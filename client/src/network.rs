//! Client network layer: connect handshake, heartbeats and the local tick.

use crate::game::PlayerController;
use crate::input::InputSource;
use crate::replica::Replica;
use bincode::{deserialize, serialize};
use log::{debug, error, info, warn};
use shared::{
    timestamp_millis, CallChannel, CallTarget, Packet, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::interval;

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    connected: bool,

    replica: Replica,
    channel: CallChannel<Replica>,
    controller: PlayerController,
    input: Box<dyn InputSource>,
}

impl Client {
    pub async fn new(
        server_addr: &str,
        input: Box<dyn InputSource>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = server_addr.parse()?;

        let mut channel = CallChannel::new();
        Replica::register_observer_handlers(&mut channel);

        Ok(Client {
            socket,
            server_addr,
            connected: false,
            replica: Replica::new(),
            channel,
            controller: PlayerController::new(),
            input,
        })
    }

    async fn connect(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        info!("Connecting to {}...", self.server_addr);
        self.send_packet(&Packet::Connect {
            client_version: PROTOCOL_VERSION,
        })
        .await?;
        Ok(())
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), Box<dyn std::error::Error>> {
        let data = serialize(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    async fn handle_packet(&mut self, packet: Packet) {
        match packet {
            Packet::Connected { connection_id } => {
                info!("Connected with id {}", connection_id);
                self.replica.set_connection_id(connection_id);
                self.connected = true;
            }

            Packet::Snapshot { spawns } => {
                info!("Received snapshot of {} objects", spawns.len());
                self.replica.apply_snapshot(spawns);
            }

            Packet::Spawn(record) => {
                debug!("Object {} spawned", record.object_id);
                self.replica.apply_spawn(record);
            }

            Packet::Despawn { object_id } => {
                debug!("Object {} despawned", object_id);
                self.replica.apply_despawn(object_id);
            }

            Packet::FieldChange(change) => {
                self.replica.apply_change(&change);
            }

            Packet::Call { name, args, sender } => {
                // Unknown broadcasts are logged in the channel and dropped.
                let _ = self
                    .channel
                    .dispatch(&mut self.replica, &name, &args, sender);
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected by server: {}", reason);
                self.connected = false;
            }

            _ => {
                warn!("Unexpected packet type from server");
            }
        }
    }

    async fn local_tick(&mut self, dt: f32) {
        for event in self.input.poll(dt) {
            self.controller.handle_event(event);
        }

        let packets = self
            .controller
            .tick(dt, &mut self.replica, &mut self.channel.outbox);
        for packet in packets {
            if let Err(e) = self.send_packet(&packet).await {
                error!("Error sending field write: {}", e);
            }
        }

        let sender = self.replica.connection_id().unwrap_or(0);
        for call in self.channel.outbox.drain() {
            match call.target {
                CallTarget::Authority => {
                    let packet = Packet::Call {
                        name: call.name,
                        args: call.args,
                        sender,
                    };
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending call: {}", e);
                    }
                }
                CallTarget::Broadcast { .. } => {
                    debug!("Observers cannot broadcast; dropping '{}'", call.name);
                }
            }
        }
    }

    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.connect().await?;

        let mut tick_interval = interval(Duration::from_millis(16));
        let mut heartbeat_interval = interval(Duration::from_secs(1));
        let mut last_tick = Instant::now();
        let mut buffer = [0u8; 2048];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if let Ok(packet) = deserialize::<Packet>(&buffer[0..len]) {
                                self.handle_packet(packet).await;
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = tick_interval.tick() => {
                    let now = Instant::now();
                    let dt = now.duration_since(last_tick).as_secs_f32();
                    last_tick = now;

                    if self.connected {
                        self.local_tick(dt).await;
                    }
                },

                _ = heartbeat_interval.tick() => {
                    if self.connected {
                        let packet = Packet::Heartbeat { timestamp: timestamp_millis() };
                        if let Err(e) = self.send_packet(&packet).await {
                            error!("Error sending heartbeat: {}", e);
                        }
                    }
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    break;
                },
            }
        }

        if self.connected {
            let _ = self.send_packet(&Packet::Disconnect).await;
        }

        Ok(())
    }
}
