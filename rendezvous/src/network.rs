//! Rendezvous network layer handling UDP naming traffic

use crate::registry::{Registry, RegistryError};
use log::{debug, error, info, warn};
use shared::{Frame, MAX_DATAGRAM_SIZE};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    FrameReceived {
        frame: Frame,
        addr: SocketAddr,
    },
    RegistrationsExpired {
        names: Vec<String>,
    },
    #[allow(dead_code)]
    Shutdown,
}

/// Outgoing frame queued for the sender task
#[derive(Debug)]
pub struct Outgoing {
    pub frame: Frame,
    pub addr: SocketAddr,
}

/// Rendezvous server owning the endpoint namespace
pub struct Server {
    socket: Arc<UdpSocket>,
    registry: Arc<RwLock<Registry>>,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    out_rx: Option<mpsc::UnboundedReceiver<Outgoing>>,
}

impl Server {
    pub async fn new(
        addr: &str,
        max_registrations: usize,
        registration_ttl: Duration,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!("Rendezvous listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            registry: Arc::new(RwLock::new(Registry::new(
                max_registrations,
                registration_ttl,
            ))),
            server_tx,
            server_rx,
            out_tx,
            out_rx: Some(out_rx),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawns task that continuously listens for incoming frames
    fn spawn_network_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => match Frame::decode(&buffer[..len]) {
                        Ok(frame) => {
                            if let Err(e) = server_tx.send(ServerMessage::FrameReceived { frame, addr }) {
                                error!("Failed to send frame to main loop: {}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Failed to decode frame from {}: {}", addr, e),
                    },
                    Err(e) => {
                        error!("Error receiving frame: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Spawns task that drains the outgoing frame queue
    fn spawn_network_sender(&mut self) {
        let socket = Arc::clone(&self.socket);
        let Some(mut out_rx) = self.out_rx.take() else {
            return;
        };

        tokio::spawn(async move {
            while let Some(Outgoing { frame, addr }) = out_rx.recv().await {
                match frame.encode() {
                    Ok(data) => {
                        if let Err(e) = socket.send_to(&data, addr).await {
                            error!("Failed to send frame to {}: {}", addr, e);
                        }
                    }
                    Err(e) => error!("Failed to encode frame for {}: {}", addr, e),
                }
            }
        });
    }

    /// Spawns task that expires silent registrations
    fn spawn_timeout_checker(&self) {
        let registry = Arc::clone(&self.registry);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let names = {
                    let mut registry = registry.write().await;
                    registry.check_timeouts()
                };

                if names.is_empty() {
                    continue;
                }
                if let Err(e) = server_tx.send(ServerMessage::RegistrationsExpired { names }) {
                    error!("Failed to send expiry message: {}", e);
                    break;
                }
            }
        });
    }

    fn send_frame(&self, frame: Frame, addr: SocketAddr) {
        if let Err(e) = self.out_tx.send(Outgoing { frame, addr }) {
            error!("Failed to queue frame for sending: {}", e);
        }
    }

    /// Answers a single naming request
    async fn handle_frame(&mut self, frame: Frame, addr: SocketAddr) {
        match frame {
            Frame::Register { name } => {
                let result = {
                    let mut registry = self.registry.write().await;
                    registry.register(&name, addr)
                };

                match result {
                    Ok(()) => self.send_frame(Frame::Registered { name }, addr),
                    Err(RegistryError::NameTaken(_)) => {
                        debug!("Name '{}' requested by {} is taken", name, addr);
                        self.send_frame(Frame::NameTaken { name }, addr);
                    }
                    Err(RegistryError::RegistryFull) => {
                        // Peers treat a full namespace like a collision and retry elsewhere
                        warn!("Registry full, refusing '{}' from {}", name, addr);
                        self.send_frame(Frame::NameTaken { name }, addr);
                    }
                }
            }

            Frame::Refresh { name } => {
                let mut registry = self.registry.write().await;
                if !registry.touch(&name, addr) {
                    debug!("Refresh for unknown name '{}' from {}", name, addr);
                }
            }

            Frame::Unregister { name } => {
                let mut registry = self.registry.write().await;
                registry.unregister(&name, addr);
            }

            Frame::Lookup { name } => {
                let found = {
                    let registry = self.registry.read().await;
                    registry.lookup(&name)
                };

                match found {
                    Some(host_addr) => {
                        info!("Lookup '{}' from {} -> {}", name, addr, host_addr);
                        self.send_frame(
                            Frame::Found {
                                name,
                                addr: host_addr,
                            },
                            addr,
                        );
                    }
                    None => self.send_frame(Frame::NotFound { name }, addr),
                }
            }

            other => {
                warn!("Unexpected frame from {}: {:?}", addr, other);
            }
        }
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_network_receiver();
        self.spawn_network_sender();
        self.spawn_timeout_checker();

        info!("Rendezvous started successfully");

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::FrameReceived { frame, addr }) => {
                    self.handle_frame(frame, addr).await;
                }
                Some(ServerMessage::RegistrationsExpired { names }) => {
                    debug!("{} registrations expired", names.len());
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Rendezvous shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
