//! The node core: one dispatch task, timers, and the public handle.
//!
//! `NodeHandle::start` binds the socket, resolves the advertised address
//! (STUN, interface probe, or loopback under `force_localhost`), inserts
//! the local entry into the peer table, and spawns the dispatch task. The
//! task is the single writer of the peer table and routing table; every
//! public operation travels over the command channel and long-running
//! work (lookups, joins) runs in spawned tasks that report back the same
//! way. `stop` fails all pending completions and tears the task down;
//! no partial state is observable afterwards.

use crate::auth::{self, AuthManager};
use crate::config::NodeConfig;
use crate::content::ContentStore;
use crate::dht_service::{self, resolve_response, PendingRpcs, RpcClient};
use crate::error::NodeError;
use crate::events::{self, PeerEvent};
use crate::gossip;
use crate::metrics::{MetricsSnapshot, NodeMetrics};
use crate::peer_table::{Peer, PeerSnapshot, PeerTable};
use crate::reliability::{PendingMessage, ReliabilityTracker, SeenCache};
use crate::RETRANSMIT_TICK_MS;
use chrono::Utc;
use mesh_crypto::{NodeIdentity, SessionCipher};
use mesh_dht::{iterative_find_node, NodeId, RoutingTable, RpcTransport, K};
use mesh_transport::{stun, UdpTransport};
use mesh_wire::{AppPayload, Envelope, EnvelopeKind, GossipSnapshot, RpcMessage, SignedPeerInfo};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Command channel depth.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Delivery channel depth before inbound application messages are shed.
const DELIVERY_CHANNEL_CAPACITY: usize = 1024;

/// An application message delivered by the overlay.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Sender device id
    pub from: String,
    /// Message bytes, decrypted if they arrived encrypted
    pub payload: Vec<u8>,
}

enum Command {
    Send {
        to: String,
        payload: Vec<u8>,
        require_ack: bool,
        encrypt: bool,
        resp: oneshot::Sender<Result<(), NodeError>>,
    },
    AddDonor {
        addr: SocketAddr,
    },
    PublishContent {
        content_id: String,
        bytes: Vec<u8>,
        resp: oneshot::Sender<()>,
    },
    FindNode {
        target: NodeId,
        resp: oneshot::Sender<Vec<SignedPeerInfo>>,
    },
    Join {
        addr: SocketAddr,
        resp: oneshot::Sender<Result<(), NodeError>>,
    },
    MergeRecords(Vec<SignedPeerInfo>),
    GetPeers {
        resp: oneshot::Sender<Vec<PeerSnapshot>>,
    },
    PendingCount {
        resp: oneshot::Sender<usize>,
    },
    Stop {
        resp: oneshot::Sender<()>,
    },
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Owned handle to a running overlay node.
///
/// Dropping the handle without `stop` leaves the task running until the
/// runtime shuts down; call `stop` for a clean teardown.
pub struct NodeHandle {
    device_id: String,
    public_addr: SocketAddr,
    cmd_tx: mpsc::Sender<Command>,
    events: broadcast::Sender<PeerEvent>,
    messages: Mutex<Option<mpsc::Receiver<ReceivedMessage>>>,
    metrics: Arc<NodeMetrics>,
    core: Mutex<Option<JoinHandle<()>>>,
}

impl NodeHandle {
    /// Initialize crypto, bind the socket, resolve the advertised
    /// address, and start the dispatch task. Fails atomically; on error
    /// nothing is left running.
    pub async fn start(config: NodeConfig) -> Result<Self, NodeError> {
        let identity = Arc::new(NodeIdentity::new(&config.username));
        let (transport, inbound) = UdpTransport::bind(config.udp_port).await?;
        let local_port = transport.local_addr()?.port();

        let public_addr = if config.force_localhost {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_port)
        } else if config.stun_enabled() {
            match stun::discover_public_address(&transport, &config.stun_server).await {
                Ok(mapped) => mapped,
                Err(e) => {
                    warn!(error = %e, "STUN failed, falling back to interface address");
                    SocketAddr::new(stun::local_interface_ip(), local_port)
                }
            }
        } else {
            SocketAddr::new(stun::local_interface_ip(), local_port)
        };

        info!(
            device = %config.username,
            %public_addr,
            "overlay node starting"
        );

        let sequence = Arc::new(AtomicU32::new(0));
        let pending_rpcs: PendingRpcs = Arc::new(Mutex::new(HashMap::new()));
        let rpc_client = Arc::new(RpcClient::new(
            Arc::clone(&identity),
            transport.clone(),
            Arc::clone(&sequence),
            Arc::clone(&pending_rpcs),
            public_addr,
            config.force_localhost,
        ));

        let mut peer_table = PeerTable::new(&config.username, config.force_localhost);
        peer_table.insert_self(public_addr.ip(), public_addr.port(), now_ms());

        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CHANNEL_CAPACITY);
        let events_tx = events::channel();
        let metrics = Arc::new(NodeMetrics::default());

        let timeout_ms = config.message_timeout_ms() as i64;
        let core = NodeCore {
            routing_table: RoutingTable::new(NodeId::from_device_id(&config.username)),
            reliability: ReliabilityTracker::new(timeout_ms),
            seen: SeenCache::new(2 * timeout_ms),
            auth: AuthManager::new(),
            content: ContentStore::new(),
            config,
            identity,
            transport,
            peer_table,
            sequence,
            pending_rpcs,
            rpc_client,
            events: events_tx.clone(),
            delivery: delivery_tx,
            cmd_tx: cmd_tx.clone(),
            metrics: Arc::clone(&metrics),
        };
        let device_id = core.config.username.clone();
        let core_handle = tokio::spawn(core.run(inbound, cmd_rx));

        Ok(Self {
            device_id,
            public_addr,
            cmd_tx,
            events: events_tx,
            messages: Mutex::new(Some(delivery_rx)),
            metrics,
            core: Mutex::new(Some(core_handle)),
        })
    }

    /// The local device id.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The address this node advertises to the overlay.
    pub fn public_addr(&self) -> SocketAddr {
        self.public_addr
    }

    /// Take the delivered-message stream. Yields once; later calls
    /// return None.
    pub fn messages(&self) -> Option<mpsc::Receiver<ReceivedMessage>> {
        self.messages.lock().take()
    }

    /// Subscribe to peer events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    /// Current drop counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Send a payload to a peer. With `require_ack`, resolves only after
    /// the ACK arrives or the retry budget is gone; with `encrypt`, fails
    /// immediately when no session key is installed.
    pub async fn send(
        &self,
        to: impl Into<String>,
        payload: Vec<u8>,
        require_ack: bool,
        encrypt: bool,
    ) -> Result<(), NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                to: to.into(),
                payload,
                require_ack,
                encrypt,
                resp,
            })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)?
    }

    /// Insert a donor endpoint (device id unknown) and trigger a
    /// handshake toward it.
    pub async fn add_donor(&self, ip: IpAddr, port: u16) -> Result<(), NodeError> {
        self.cmd_tx
            .send(Command::AddDonor {
                addr: SocketAddr::new(ip, port),
            })
            .await
            .map_err(|_| NodeError::TransportClosed)
    }

    /// Store content locally and announce it to every authenticated peer.
    pub async fn publish_content(
        &self,
        content_id: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Result<(), NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PublishContent {
                content_id: content_id.into(),
                bytes,
                resp,
            })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)
    }

    /// Run the iterative Kademlia lookup for a target id.
    pub async fn find_node(&self, target: NodeId) -> Result<Vec<SignedPeerInfo>, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::FindNode { target, resp })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)
    }

    /// Join the DHT through a donor: PING, self-lookup, publish.
    pub async fn join(&self, ip: IpAddr, port: u16) -> Result<(), NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Join {
                addr: SocketAddr::new(ip, port),
                resp,
            })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)?
    }

    /// Defensive copy of the peer table.
    pub async fn peers(&self) -> Result<Vec<PeerSnapshot>, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::GetPeers { resp })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)
    }

    /// Number of sends still awaiting their ACK.
    pub async fn pending_messages(&self) -> Result<usize, NodeError> {
        let (resp, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::PendingCount { resp })
            .await
            .map_err(|_| NodeError::TransportClosed)?;
        rx.await.map_err(|_| NodeError::TransportClosed)
    }

    /// Stop the node: cancel timers, fail every pending completion,
    /// close the socket.
    pub async fn stop(&self) {
        let (resp, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Stop { resp })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
        let core = self.core.lock().take();
        if let Some(handle) = core {
            let _ = handle.await;
        }
    }
}

struct NodeCore {
    config: NodeConfig,
    identity: Arc<NodeIdentity>,
    transport: UdpTransport,
    peer_table: PeerTable,
    routing_table: RoutingTable,
    reliability: ReliabilityTracker,
    seen: SeenCache,
    auth: AuthManager,
    content: ContentStore,
    sequence: Arc<AtomicU32>,
    pending_rpcs: PendingRpcs,
    rpc_client: Arc<RpcClient>,
    events: broadcast::Sender<PeerEvent>,
    delivery: mpsc::Sender<ReceivedMessage>,
    cmd_tx: mpsc::Sender<Command>,
    metrics: Arc<NodeMetrics>,
}

impl NodeCore {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
        mut cmd_rx: mpsc::Receiver<Command>,
    ) {
        let mut tick = tokio::time::interval(Duration::from_millis(RETRANSMIT_TICK_MS));
        let mut gossip_timer =
            tokio::time::interval(Duration::from_secs(self.config.gossip_interval.max(1)));
        let mut cleanup_timer =
            tokio::time::interval(Duration::from_secs(self.config.peer_cleanup_interval.max(1)));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        gossip_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        cleanup_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some((src, bytes)) = inbound.recv() => {
                    self.on_datagram(src, bytes).await;
                }
                Some(command) = cmd_rx.recv() => {
                    if self.on_command(command).await {
                        break;
                    }
                }
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                _ = gossip_timer.tick() => {
                    self.gossip_round().await;
                }
                _ = cleanup_timer.tick() => {
                    self.on_sweep();
                }
            }
        }
        debug!(device = %self.config.username, "dispatch task exited");
    }

    fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    fn new_envelope(&self, kind: EnvelopeKind, to: Option<String>, payload: Vec<u8>) -> Envelope {
        Envelope::new(
            kind,
            self.identity.device_id(),
            to,
            payload,
            self.next_sequence(),
        )
    }

    fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Returns true when the node must stop.
    async fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Send {
                to,
                payload,
                require_ack,
                encrypt,
                resp,
            } => {
                self.handle_send(to, payload, require_ack, encrypt, resp).await;
            }
            Command::AddDonor { addr } => {
                let now = now_ms();
                self.peer_table.add_placeholder(addr.ip(), addr.port(), now);
                let addr = self.normalize(addr);
                self.start_handshake(addr).await;
            }
            Command::PublishContent {
                content_id,
                bytes,
                resp,
            } => {
                self.content.insert(content_id.clone(), bytes);
                let targets = self.peer_table.authenticated_peers();
                for peer in targets {
                    let envelope = self.new_envelope(
                        EnvelopeKind::Data,
                        Some(peer.device_id.clone()),
                        AppPayload::ContentAnnouncement {
                            content_id: content_id.clone(),
                        }
                        .encode(),
                    );
                    let _ = self.transport.send(peer.addr(), &envelope.encode()).await;
                }
                let _ = resp.send(());
            }
            Command::FindNode { target, resp } => {
                let seed = self.routing_table.find_closest(&target, K);
                let client: Arc<dyn RpcTransport> = self.rpc_client.clone();
                let cmd_tx = self.cmd_tx.clone();
                tokio::spawn(async move {
                    let records = iterative_find_node(seed, target, client, K).await;
                    let _ = cmd_tx.send(Command::MergeRecords(records.clone())).await;
                    let _ = resp.send(records);
                });
            }
            Command::Join { addr, resp } => {
                let client = Arc::clone(&self.rpc_client);
                let local_id = NodeId::from_device_id(self.identity.device_id());
                let cmd_tx = self.cmd_tx.clone();
                let addr = self.normalize(addr);
                tokio::spawn(async move {
                    match dht_service::join(client, addr, local_id).await {
                        Ok(records) => {
                            let _ = cmd_tx.send(Command::MergeRecords(records)).await;
                            let _ = resp.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = resp.send(Err(e.into()));
                        }
                    }
                });
            }
            Command::MergeRecords(records) => {
                for record in records {
                    self.admit_record(record);
                }
            }
            Command::GetPeers { resp } => {
                let _ = resp.send(self.peer_table.snapshot());
            }
            Command::PendingCount { resp } => {
                let _ = resp.send(self.reliability.len());
            }
            Command::Stop { resp } => {
                for mut message in self.reliability.drain_all() {
                    if let Some(responder) = message.responder.take() {
                        let _ = responder.send(Err(NodeError::TransportClosed));
                    }
                }
                self.pending_rpcs.lock().clear();
                self.transport.shutdown();
                let _ = resp.send(());
                return true;
            }
        }
        false
    }

    async fn handle_send(
        &mut self,
        to: String,
        payload: Vec<u8>,
        require_ack: bool,
        encrypt: bool,
        resp: oneshot::Sender<Result<(), NodeError>>,
    ) {
        let Some(peer) = self.peer_table.get(&to) else {
            let _ = resp.send(Err(NodeError::PeerUnknown(to)));
            return;
        };
        let dest_addr = peer.addr();

        let wire_payload = if encrypt {
            let Some(cipher) = peer.session.clone() else {
                let _ = resp.send(Err(NodeError::NoSession(to)));
                return;
            };
            match cipher.encrypt(&payload) {
                Ok((ciphertext, nonce)) => AppPayload::Encrypted { nonce, ciphertext }.encode(),
                Err(e) => {
                    let _ = resp.send(Err(NodeError::Internal(e.to_string())));
                    return;
                }
            }
        } else {
            payload
        };

        let sequence = self.next_sequence();
        let envelope = Envelope::new(
            EnvelopeKind::Data,
            self.identity.device_id(),
            Some(to.clone()),
            wire_payload,
            sequence,
        );
        let bytes = envelope.encode();

        if let Err(e) = self.transport.send(dest_addr, &bytes).await {
            let _ = resp.send(Err(e.into()));
            return;
        }

        if require_ack {
            let now = now_ms();
            self.reliability.register(PendingMessage {
                destination: to,
                dest_addr,
                sequence,
                bytes,
                first_send_ms: now,
                last_send_ms: now,
                retries: 0,
                responder: Some(resp),
            });
        } else {
            let _ = resp.send(Ok(()));
        }
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    async fn on_datagram(&mut self, src: SocketAddr, bytes: Vec<u8>) {
        let envelope = match Envelope::decode(&bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                NodeMetrics::bump(&self.metrics.malformed);
                trace!(%src, error = %e, "malformed datagram dropped");
                return;
            }
        };

        if !envelope.checksum_valid() {
            NodeMetrics::bump(&self.metrics.checksum_mismatch);
            let nack = Envelope::nack(
                self.identity.device_id(),
                envelope.from_peer_id.clone(),
                envelope.sequence_number,
                "checksum mismatch",
                self.next_sequence(),
            );
            let _ = self.transport.send(src, &nack.encode()).await;
            return;
        }

        let from = envelope.from_peer_id.clone();
        if from == self.identity.device_id() {
            return;
        }

        if self.peer_table.observe(&from, src, now_ms()) {
            self.emit(PeerEvent::PeerAdded {
                device_id: from.clone(),
            });
        }

        match envelope.kind {
            EnvelopeKind::Ack => {
                if let Some(byte) = envelope.ack_sequence_byte() {
                    if let Some(mut message) = self.reliability.on_ack(&from, byte) {
                        if let Some(responder) = message.responder.take() {
                            let _ = responder.send(Ok(()));
                        }
                    }
                }
            }
            EnvelopeKind::Nack => {
                if let Some((byte, reason)) = envelope.nack_contents() {
                    warn!(peer = %from, sequence_byte = byte, %reason, "peer NACKed an envelope");
                }
            }
            EnvelopeKind::Heartbeat => {
                // observe() above already refreshed last-seen
            }
            EnvelopeKind::RoutingTable => {
                match AppPayload::decode(&envelope.payload) {
                    Ok(AppPayload::Gossip(snapshot)) => self.merge_gossip(snapshot).await,
                    Ok(_) | Err(_) => {
                        NodeMetrics::bump(&self.metrics.malformed);
                    }
                }
            }
            EnvelopeKind::Performance | EnvelopeKind::File => {
                self.deliver(from, envelope.payload);
            }
            EnvelopeKind::Data => {
                self.handle_data(envelope, src).await;
            }
        }
    }

    async fn handle_data(&mut self, envelope: Envelope, src: SocketAddr) {
        let from = envelope.from_peer_id.clone();

        let payload = match AppPayload::decode(&envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                NodeMetrics::bump(&self.metrics.malformed);
                debug!(peer = %from, error = %e, "bad payload in DATA envelope");
                return;
            }
        };
        // DHT frames correlate by rpc id, not by the ACK loop
        let wants_ack = !matches!(payload, AppPayload::Dht(_));

        if !self
            .seen
            .insert_if_new(&from, envelope.sequence_number, now_ms())
        {
            NodeMetrics::bump(&self.metrics.duplicates);
            if wants_ack {
                self.send_ack(&from, src, envelope.sequence_number).await;
            }
            return;
        }

        if wants_ack {
            self.send_ack(&from, src, envelope.sequence_number).await;
        }

        let payload = match payload {
            AppPayload::Encrypted { nonce, ciphertext } => {
                let Some(cipher) = self.peer_table.get(&from).and_then(|p| p.session.clone())
                else {
                    NodeMetrics::bump(&self.metrics.no_session);
                    debug!(peer = %from, "encrypted payload without a session, dropped");
                    return;
                };
                let plaintext = match cipher.decrypt(&ciphertext, &nonce) {
                    Ok(plaintext) => plaintext,
                    Err(e) => {
                        NodeMetrics::bump(&self.metrics.signature_failure);
                        debug!(peer = %from, error = %e, "AEAD open failed, dropped");
                        return;
                    }
                };
                match AppPayload::decode(&plaintext) {
                    Ok(AppPayload::Encrypted { .. }) | Err(_) => {
                        NodeMetrics::bump(&self.metrics.malformed);
                        return;
                    }
                    Ok(inner) => inner,
                }
            }
            other => other,
        };

        self.process_payload(from, src, payload).await;
    }

    async fn process_payload(&mut self, from: String, src: SocketAddr, payload: AppPayload) {
        match payload {
            AppPayload::Gossip(snapshot) => self.merge_gossip(snapshot).await,
            AppPayload::AuthChallenge(challenge) => {
                self.on_auth_challenge(&from, src, challenge).await;
            }
            AppPayload::AuthResponse(response) => {
                self.on_auth_response(&from, src, response).await;
            }
            AppPayload::ContentAnnouncement { content_id } => {
                if !self.content.contains(&content_id) {
                    let request = self.new_envelope(
                        EnvelopeKind::Data,
                        Some(from),
                        AppPayload::ContentRequest { content_id }.encode(),
                    );
                    let _ = self.transport.send(src, &request.encode()).await;
                }
            }
            AppPayload::ContentRequest { content_id } => {
                if let Some(bytes) = self.content.get(&content_id) {
                    let reply = self.new_envelope(
                        EnvelopeKind::Data,
                        Some(from),
                        AppPayload::ContentData {
                            content_id,
                            bytes: bytes.to_vec(),
                        }
                        .encode(),
                    );
                    let _ = self.transport.send(src, &reply.encode()).await;
                }
            }
            AppPayload::ContentData { content_id, bytes } => {
                self.content.insert(content_id.clone(), bytes);
                self.emit(PeerEvent::ContentReceived { content_id });
            }
            AppPayload::Dht(frame) => self.on_rpc(src, &frame).await,
            AppPayload::Opaque(bytes) => self.deliver(from, bytes),
            AppPayload::Encrypted { .. } => {
                // handled before dispatch; nested encryption is malformed
                NodeMetrics::bump(&self.metrics.malformed);
            }
        }
    }

    fn deliver(&self, from: String, payload: Vec<u8>) {
        if self
            .delivery
            .try_send(ReceivedMessage { from, payload })
            .is_err()
        {
            debug!("application consumer lagging, message dropped");
        }
    }

    async fn send_ack(&self, to: &str, src: SocketAddr, acked_sequence: u32) {
        let ack = Envelope::ack(
            self.identity.device_id(),
            to,
            acked_sequence,
            self.next_sequence(),
        );
        let _ = self.transport.send(src, &ack.encode()).await;
    }

    fn normalize(&self, addr: SocketAddr) -> SocketAddr {
        if self.config.force_localhost {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        } else {
            addr
        }
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    async fn start_handshake(&mut self, addr: SocketAddr) {
        if self.auth.in_flight(&addr) {
            return;
        }
        let (payload, challenge) = auth::build_challenge(&self.identity);
        self.auth.record(addr, challenge, now_ms());

        let envelope = self.new_envelope(
            EnvelopeKind::Data,
            None,
            AppPayload::AuthChallenge(payload).encode(),
        );
        debug!(%addr, "sending auth challenge");
        let _ = self.transport.send(addr, &envelope.encode()).await;
    }

    async fn on_auth_challenge(
        &mut self,
        from: &str,
        src: SocketAddr,
        payload: mesh_wire::AuthChallenge,
    ) {
        let (challenge, their_agreement, their_signing) = match auth::verify_challenge(&payload) {
            Ok(parts) => parts,
            Err(_) => {
                NodeMetrics::bump(&self.metrics.signature_failure);
                debug!(peer = %from, "auth challenge failed verification");
                return;
            }
        };

        let session = self.identity.derive_session_key(&their_agreement);
        let cipher = Arc::new(SessionCipher::new(&session));

        self.peer_table.remove_placeholder_for(src);
        let newly = !self
            .peer_table
            .get(from)
            .map(|p| p.authenticated)
            .unwrap_or(false);
        self.peer_table
            .install_session(from, src, their_signing, cipher, now_ms());
        if newly {
            info!(peer = %from, "peer authenticated (responder side)");
            self.emit(PeerEvent::PeerAuthenticated {
                device_id: from.to_string(),
            });
        }

        let response = auth::build_response(&self.identity, &challenge);
        let envelope = self.new_envelope(
            EnvelopeKind::Data,
            Some(from.to_string()),
            AppPayload::AuthResponse(response).encode(),
        );
        let _ = self.transport.send(src, &envelope.encode()).await;
    }

    async fn on_auth_response(
        &mut self,
        from: &str,
        src: SocketAddr,
        payload: mesh_wire::AuthResponse,
    ) {
        let Some(challenge) = self.auth.take(&src) else {
            debug!(peer = %from, %src, "auth response without outstanding challenge");
            return;
        };
        let (their_signing, their_agreement) = match auth::verify_response(&payload, &challenge) {
            Ok(parts) => parts,
            Err(_) => {
                NodeMetrics::bump(&self.metrics.signature_failure);
                debug!(peer = %from, "auth response failed verification");
                return;
            }
        };

        let session = self.identity.derive_session_key(&their_agreement);
        let cipher = Arc::new(SessionCipher::new(&session));

        self.peer_table.remove_placeholder_for(src);
        let newly = !self
            .peer_table
            .get(from)
            .map(|p| p.authenticated)
            .unwrap_or(false);
        self.peer_table
            .install_session(from, src, their_signing, cipher, now_ms());
        if newly {
            info!(peer = %from, "peer authenticated (initiator side)");
            self.emit(PeerEvent::PeerAuthenticated {
                device_id: from.to_string(),
            });
        }

        // Share what we know right away, then run an extra fan-out round.
        if let Some(peer) = self.peer_table.get(from).cloned() {
            let snapshot = GossipSnapshot {
                peers: self.peer_table.gossip_entries(),
                timestamp: Utc::now(),
            };
            self.send_snapshot(&peer, &snapshot).await;
        }
        self.gossip_round().await;
    }

    // ------------------------------------------------------------------
    // Gossip
    // ------------------------------------------------------------------

    async fn gossip_round(&mut self) {
        let Some(round) = gossip::plan_round(&self.peer_table, self.config.gossip_peer_count)
        else {
            return;
        };
        for target in &round.targets {
            self.send_snapshot(target, &round.snapshot).await;
        }
        for peer in &round.heartbeats {
            let heartbeat =
                self.new_envelope(EnvelopeKind::Heartbeat, Some(peer.device_id.clone()), vec![]);
            let _ = self.transport.send(peer.addr(), &heartbeat.encode()).await;
        }
    }

    async fn send_snapshot(&self, peer: &Peer, snapshot: &GossipSnapshot) {
        let envelope = self.new_envelope(
            EnvelopeKind::RoutingTable,
            Some(peer.device_id.clone()),
            AppPayload::Gossip(snapshot.clone()).encode(),
        );
        let _ = self.transport.send(peer.addr(), &envelope.encode()).await;
    }

    async fn merge_gossip(&mut self, snapshot: GossipSnapshot) {
        let merge_events = self.peer_table.merge_gossip(&snapshot);
        for event in merge_events {
            if let PeerEvent::PeerAdded { device_id } = &event {
                // Newly learned peers get challenged for a direct session.
                if let Some(addr) = self.peer_table.get(device_id).map(Peer::addr) {
                    self.start_handshake(addr).await;
                }
            }
            self.emit(event);
        }
    }

    // ------------------------------------------------------------------
    // DHT RPC handling
    // ------------------------------------------------------------------

    async fn on_rpc(&mut self, src: SocketAddr, frame: &[u8]) {
        let message = match RpcMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                NodeMetrics::bump(&self.metrics.malformed);
                debug!(%src, error = %e, "bad DHT frame");
                return;
            }
        };

        match message {
            RpcMessage::Ping { rpc_id, sender } => {
                if sender.verify().is_err() {
                    NodeMetrics::bump(&self.metrics.signature_failure);
                    return;
                }
                self.admit_record(sender);
                let pong = RpcMessage::Pong {
                    rpc_id,
                    sender: self.rpc_client.self_record(),
                };
                let _ = self.rpc_client.send_frame(src, &pong).await;
            }
            RpcMessage::FindNode { rpc_id, target } => {
                let peers = self
                    .routing_table
                    .find_closest(&NodeId::new(target), K);
                let reply = RpcMessage::FoundNode { rpc_id, peers };
                let _ = self.rpc_client.send_frame(src, &reply).await;
            }
            RpcMessage::Store { record, .. } => {
                if record.verify().is_err() {
                    NodeMetrics::bump(&self.metrics.signature_failure);
                    return;
                }
                self.admit_record(record);
            }
            response @ (RpcMessage::Pong { .. } | RpcMessage::FoundNode { .. }) => {
                resolve_response(&self.pending_rpcs, response);
            }
        }
    }

    /// Fold a verified record into the routing table and, when the device
    /// is new, the peer table.
    fn admit_record(&mut self, record: SignedPeerInfo) {
        if record.device_id != self.identity.device_id()
            && self.peer_table.get(&record.device_id).is_none()
        {
            let added = self
                .peer_table
                .observe(&record.device_id, record.socket_addr(), record.timestamp_ms);
            if added {
                self.emit(PeerEvent::PeerAdded {
                    device_id: record.device_id.clone(),
                });
            }
        }

        match self.routing_table.insert(record) {
            Ok(_) => {}
            Err(e) => trace!(error = %e, "record not admitted to routing table"),
        }
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    async fn on_tick(&mut self) {
        let outcome = self.reliability.on_tick(now_ms());
        for (addr, bytes) in outcome.resends {
            let _ = self.transport.send(addr, &bytes).await;
        }
        for (mut message, error) in outcome.failures {
            NodeMetrics::bump(&self.metrics.send_failures);
            warn!(
                peer = %message.destination,
                sequence = message.sequence,
                error = %error,
                "reliable send failed"
            );
            self.emit(PeerEvent::MessageFailed {
                device_id: message.destination.clone(),
                sequence: message.sequence,
            });
            if let Some(responder) = message.responder.take() {
                let _ = responder.send(Err(error));
            }
        }
    }

    fn on_sweep(&mut self) {
        let now = now_ms();
        let max_idle = 2 * self.config.message_timeout_ms() as i64;
        for device_id in self.peer_table.sweep(now, max_idle) {
            self.routing_table.remove(&device_id);
            self.emit(PeerEvent::PeerExpired { device_id });
        }
        self.seen.gc(now);
        self.auth.gc(now);
    }
}
