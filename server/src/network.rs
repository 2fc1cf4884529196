//! Server network layer: UDP session handshake with admission control

use crate::admission::AdmissionController;
use crate::client_manager::{ClientManager, CLIENT_TIMEOUT};
use crate::config::ConfigHandle;
use crate::context::{GatekeeperContext, HostInfo};
use async_trait::async_trait;
use bincode::{deserialize, serialize};
use gatekeeper_shared::{AdmissionDecision, ConnectionAttempt, Packet, PROTOCOL_VERSION};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, RwLock};

/// Messages sent from network and admission tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived {
        packet: Packet,
        addr: SocketAddr,
    },
    AdmissionDecided {
        addr: SocketAddr,
        attempt: ConnectionAttempt,
        decision: AdmissionDecision,
    },
    ClientTimeout {
        client_id: u32,
    },
}

/// Messages sent from the main loop to the network sender task
#[derive(Debug)]
pub enum GameMessage {
    SendPacket { packet: Packet, addr: SocketAddr },
}

/// What the gatekeeper sees of the running server
pub struct ServerInfo {
    name: String,
    clients: Arc<RwLock<ClientManager>>,
}

#[async_trait]
impl HostInfo for ServerInfo {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn version(&self) -> String {
        concat!("gatekeeper ", env!("CARGO_PKG_VERSION")).to_string()
    }

    async fn online_players(&self) -> u32 {
        self.clients.read().await.len() as u32
    }

    async fn max_players(&self) -> u32 {
        self.clients.read().await.max_clients() as u32
    }

    async fn player_address(&self, name: &str) -> Option<IpAddr> {
        self.clients
            .read()
            .await
            .find_addr_by_name(name)
            .map(|addr| addr.ip().to_canonical())
    }
}

/// Game-session server that admits clients through the gatekeeper
pub struct Server {
    socket: Arc<UdpSocket>,
    clients: Arc<RwLock<ClientManager>>,
    /// Addresses whose admission decision is still in flight
    pending: HashSet<SocketAddr>,

    // Communication channels
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    game_tx: mpsc::UnboundedSender<GameMessage>,
    game_rx: Option<mpsc::UnboundedReceiver<GameMessage>>,
}

impl Server {
    pub async fn bind(addr: &str, max_clients: usize) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (game_tx, game_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            clients: Arc::new(RwLock::new(ClientManager::new(max_clients))),
            pending: HashSet::new(),
            server_tx,
            server_rx,
            game_tx,
            game_rx: Some(game_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn host_info(&self, name: impl Into<String>) -> Arc<ServerInfo> {
        Arc::new(ServerInfo {
            name: name.into(),
            clients: Arc::clone(&self.clients),
        })
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) {
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

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) {
        let Some(mut game_rx) = self.game_rx.take() else {
            return;
        };
        let socket = Arc::clone(&self.socket);

        tokio::spawn(async move {
            while let Some(GameMessage::SendPacket { packet, addr }) = game_rx.recv().await {
                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                    error!("Failed to send packet to {}: {}", addr, e);
                }
            }
        });
    }

    /// Spawns task that monitors client timeouts
    fn spawn_timeout_checker(&self) {
        let clients = Arc::clone(&self.clients);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut clients_guard = clients.write().await;
                    clients_guard.check_timeouts(CLIENT_TIMEOUT)
                };

                for client_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::ClientTimeout { client_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
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
        if let Err(e) = self.game_tx.send(GameMessage::SendPacket { packet, addr }) {
            error!("Failed to queue packet for sending: {}", e);
        }
    }

    /// Runs admission for one connection attempt off the main loop and
    /// reports the decision back to it.
    fn spawn_admission(
        &self,
        admission: &AdmissionController,
        config: &ConfigHandle,
        attempt: ConnectionAttempt,
        addr: SocketAddr,
    ) {
        let admission = admission.clone();
        let config = config.clone();
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let snapshot = config.snapshot().await;
            let decision = admission.decide(&attempt, &snapshot).await;
            if let Err(e) = server_tx.send(ServerMessage::AdmissionDecided {
                addr,
                attempt,
                decision,
            }) {
                error!("Failed to report admission decision: {}", e);
            }
        });
    }

    /// Processes incoming packets
    async fn handle_packet(
        &mut self,
        packet: Packet,
        addr: SocketAddr,
        admission: &AdmissionController,
        config: &ConfigHandle,
    ) {
        match packet {
            Packet::Connect {
                client_version,
                name,
            } => {
                info!(
                    "Client {} connecting from {} (version: {})",
                    name, addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    let reason = "Protocol version mismatch".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                }

                let name = name.trim().to_string();
                if name.is_empty() {
                    let reason = "Invalid player name".to_string();
                    self.send_packet(Packet::Disconnected { reason }, addr);
                    return;
                }

                if !self.pending.insert(addr) {
                    debug!("Admission already in flight for {}, dropping repeat", addr);
                    return;
                }

                // Remove existing connection if present
                {
                    let mut clients = self.clients.write().await;
                    if let Some(existing_id) = clients.find_client_by_addr(addr) {
                        info!("Removing existing client {} from {}", existing_id, addr);
                        clients.remove_client(&existing_id);
                    }
                }

                // Dual-stack sockets report IPv4 peers as ::ffff:a.b.c.d
                let attempt = ConnectionAttempt::new(name, Some(addr.ip().to_canonical()));
                self.spawn_admission(admission, config, attempt, addr);
            }

            Packet::KeepAlive => {
                self.clients.write().await.touch(addr);
            }

            Packet::Disconnect => {
                let mut clients = self.clients.write().await;
                if let Some(client_id) = clients.find_client_by_addr(addr) {
                    clients.remove_client(&client_id);
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Applies a finished admission decision
    async fn handle_decision(
        &mut self,
        addr: SocketAddr,
        attempt: ConnectionAttempt,
        decision: AdmissionDecision,
    ) {
        self.pending.remove(&addr);

        match decision {
            AdmissionDecision::Allow => {
                let client_id = {
                    let mut clients = self.clients.write().await;
                    clients.add_client(addr, attempt.name)
                };

                let response = match client_id {
                    Some(client_id) => Packet::Connected { client_id },
                    None => Packet::Disconnected {
                        reason: "Server full".to_string(),
                    },
                };
                self.send_packet(response, addr);
            }
            AdmissionDecision::Reject { message } => {
                info!("Rejected {} from {}", attempt.name, addr);
                self.send_packet(Packet::Disconnected { reason: message }, addr);
            }
        }
    }

    /// Tells every connected client the server is going away
    async fn disconnect_all(&self, reason: &str) {
        let client_addrs = self.clients.read().await.get_client_addrs();
        let packet = Packet::Disconnected {
            reason: reason.to_string(),
        };

        for (client_id, addr) in client_addrs {
            if let Err(e) = Self::send_packet_impl(&self.socket, &packet, addr).await {
                error!("Failed to send to client {}: {}", client_id, e);
            }
        }
    }

    /// Main server loop. Returns once `shutdown` flips to true.
    pub async fn run(
        &mut self,
        ctx: &GatekeeperContext,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let admission = AdmissionController::new(ctx);
        let config = ctx.config.clone();

        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Server started successfully");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::PacketReceived { packet, addr }) => {
                            self.handle_packet(packet, addr, &admission, &config).await;
                        }
                        Some(ServerMessage::AdmissionDecided { addr, attempt, decision }) => {
                            self.handle_decision(addr, attempt, decision).await;
                        }
                        Some(ServerMessage::ClientTimeout { client_id }) => {
                            debug!("Client {} timed out", client_id);
                        }
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Server shutting down");
        self.disconnect_all("Server closed").await;
        Ok(())
    }
}
