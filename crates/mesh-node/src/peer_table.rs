//! The peer table: every remote this node has seen or been told about.
//!
//! Single-writer: only the dispatch task touches it. Readers get
//! [`PeerSnapshot`] copies. All addresses pass through the localhost
//! normalization on write and on read, so a `force_localhost` node can
//! never leak or store a foreign address.

use crate::events::PeerEvent;
use mesh_crypto::{PublicSigningKey, SessionCipher};
use mesh_wire::{GossipPeer, GossipSnapshot};
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tracing::debug;

/// Placeholder device ids (donor endpoints whose real id is unknown yet)
/// start with this marker and never appear in gossip or DHT traffic.
const PLACEHOLDER_MARK: char = '?';

/// A known remote peer.
#[derive(Clone)]
pub struct Peer {
    /// Device id (placeholder ids start with `?`)
    pub device_id: String,
    /// Advertised or observed IP
    pub ip: IpAddr,
    /// Advertised or observed UDP port
    pub port: u16,
    /// Signing key, empty until first authenticated contact
    pub signing_public: Option<PublicSigningKey>,
    /// True once a handshake has completed
    pub authenticated: bool,
    /// Last inbound activity, epoch milliseconds
    pub last_seen_ms: i64,
    /// AEAD cipher over the installed session key
    pub session: Option<Arc<SessionCipher>>,
}

impl Peer {
    /// True for donor placeholders awaiting their first handshake.
    pub fn is_placeholder(&self) -> bool {
        self.device_id.starts_with(PLACEHOLDER_MARK)
    }

    /// The peer's endpoint.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

/// Defensive copy handed to external readers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSnapshot {
    /// Device id
    pub device_id: String,
    /// Peer IP
    pub ip: IpAddr,
    /// Peer port
    pub port: u16,
    /// Authentication state
    pub authenticated: bool,
    /// Last inbound activity, epoch milliseconds
    pub last_seen_ms: i64,
}

/// Mapping from device id to peer state.
pub struct PeerTable {
    peers: HashMap<String, Peer>,
    self_id: String,
    force_localhost: bool,
}

impl PeerTable {
    /// Create an empty table for the local device id.
    pub fn new(self_id: impl Into<String>, force_localhost: bool) -> Self {
        Self {
            peers: HashMap::new(),
            self_id: self_id.into(),
            force_localhost,
        }
    }

    fn normalize(&self, ip: IpAddr) -> IpAddr {
        if self.force_localhost {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            ip
        }
    }

    /// Insert the local node as an authenticated entry.
    pub fn insert_self(&mut self, ip: IpAddr, port: u16, now_ms: i64) {
        let ip = self.normalize(ip);
        self.peers.insert(
            self.self_id.clone(),
            Peer {
                device_id: self.self_id.clone(),
                ip,
                port,
                signing_public: None,
                authenticated: true,
                last_seen_ms: now_ms,
                session: None,
            },
        );
    }

    /// Record inbound activity from a device at an observed endpoint.
    /// Creates an unauthenticated entry for unknown senders. Returns true
    /// when the peer is new to the table.
    pub fn observe(&mut self, device_id: &str, addr: SocketAddr, now_ms: i64) -> bool {
        if device_id == self.self_id {
            return false;
        }
        let ip = self.normalize(addr.ip());

        if let Some(peer) = self.peers.get_mut(device_id) {
            peer.ip = ip;
            peer.port = addr.port();
            peer.last_seen_ms = now_ms;
            return false;
        }

        self.peers.insert(
            device_id.to_string(),
            Peer {
                device_id: device_id.to_string(),
                ip,
                port: addr.port(),
                signing_public: None,
                authenticated: false,
                last_seen_ms: now_ms,
                session: None,
            },
        );
        true
    }

    /// Insert a donor placeholder for an endpoint whose device id is not
    /// known yet. Returns the synthetic id.
    pub fn add_placeholder(&mut self, ip: IpAddr, port: u16, now_ms: i64) -> String {
        let ip = self.normalize(ip);
        let device_id = format!("{PLACEHOLDER_MARK}{ip}:{port}");
        self.peers.entry(device_id.clone()).or_insert(Peer {
            device_id: device_id.clone(),
            ip,
            port,
            signing_public: None,
            authenticated: false,
            last_seen_ms: now_ms,
            session: None,
        });
        device_id
    }

    /// Drop the placeholder matching an endpoint, if any. Called when the
    /// real device id behind a donor address authenticates.
    pub fn remove_placeholder_for(&mut self, addr: SocketAddr) -> Option<String> {
        let ip = self.normalize(addr.ip());
        let id = self
            .peers
            .values()
            .find(|p| p.is_placeholder() && p.ip == ip && p.port == addr.port())
            .map(|p| p.device_id.clone())?;
        self.peers.remove(&id);
        Some(id)
    }

    /// Mark a peer authenticated, storing its signing key and session
    /// cipher. Upserts if the peer is unknown.
    pub fn install_session(
        &mut self,
        device_id: &str,
        addr: SocketAddr,
        signing_public: PublicSigningKey,
        session: Arc<SessionCipher>,
        now_ms: i64,
    ) {
        let ip = self.normalize(addr.ip());
        let peer = self.peers.entry(device_id.to_string()).or_insert(Peer {
            device_id: device_id.to_string(),
            ip,
            port: addr.port(),
            signing_public: None,
            authenticated: false,
            last_seen_ms: now_ms,
            session: None,
        });
        peer.ip = ip;
        peer.port = addr.port();
        peer.signing_public = Some(signing_public);
        peer.authenticated = true;
        peer.last_seen_ms = now_ms;
        peer.session = Some(session);
    }

    /// Look up a peer.
    pub fn get(&self, device_id: &str) -> Option<&Peer> {
        self.peers.get(device_id)
    }

    /// The local device id.
    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Evict authenticated peers idle beyond `max_idle_ms`. The local
    /// entry and unauthenticated peers are exempt (the latter fall to
    /// k-bucket pressure instead). Returns evicted device ids.
    pub fn sweep(&mut self, now_ms: i64, max_idle_ms: i64) -> Vec<String> {
        let evicted: Vec<String> = self
            .peers
            .values()
            .filter(|p| {
                p.device_id != self.self_id
                    && p.authenticated
                    && now_ms.saturating_sub(p.last_seen_ms) > max_idle_ms
            })
            .map(|p| p.device_id.clone())
            .collect();

        for id in &evicted {
            debug!(peer = %id, "inactivity sweep evicted peer");
            self.peers.remove(id);
        }
        evicted
    }

    /// Up to `count` random authenticated remote peers (gossip targets).
    pub fn random_authenticated(&self, count: usize) -> Vec<Peer> {
        let candidates: Vec<&Peer> = self
            .peers
            .values()
            .filter(|p| p.authenticated && p.device_id != self.self_id)
            .collect();
        candidates
            .choose_multiple(&mut rand::thread_rng(), count)
            .map(|p| (*p).clone())
            .collect()
    }

    /// Every authenticated remote peer.
    pub fn authenticated_peers(&self) -> Vec<Peer> {
        self.peers
            .values()
            .filter(|p| p.authenticated && p.device_id != self.self_id)
            .cloned()
            .collect()
    }

    /// Defensive copies of every entry.
    pub fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .values()
            .map(|p| PeerSnapshot {
                device_id: p.device_id.clone(),
                ip: p.ip,
                port: p.port,
                authenticated: p.authenticated,
                last_seen_ms: p.last_seen_ms,
            })
            .collect()
    }

    /// The table as a gossip snapshot. Placeholders stay private.
    pub fn gossip_entries(&self) -> Vec<GossipPeer> {
        use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

        self.peers
            .values()
            .filter(|p| !p.is_placeholder())
            .map(|p| GossipPeer {
                device_id: p.device_id.clone(),
                ip: p.ip.to_string(),
                port: p.port,
                signing_public: p
                    .signing_public
                    .as_ref()
                    .map(|k| BASE64.encode(k.as_bytes())),
                last_seen_ms: p.last_seen_ms,
            })
            .collect()
    }

    /// Merge a received gossip snapshot. Unknown peers are added
    /// unauthenticated; known entries are only refreshed when the gossiped
    /// last-seen is strictly newer, and never gain authentication from
    /// gossip alone. Returns events for the additions.
    pub fn merge_gossip(&mut self, snapshot: &GossipSnapshot) -> Vec<PeerEvent> {
        let mut events = Vec::new();

        for entry in &snapshot.peers {
            if entry.device_id == self.self_id || entry.device_id.starts_with(PLACEHOLDER_MARK) {
                continue;
            }
            let Ok(parsed_ip) = entry.ip.parse::<IpAddr>() else {
                debug!(peer = %entry.device_id, ip = %entry.ip, "gossip entry with bad ip, skipped");
                continue;
            };
            let ip = self.normalize(parsed_ip);

            match self.peers.get_mut(&entry.device_id) {
                Some(existing) => {
                    if entry.last_seen_ms > existing.last_seen_ms {
                        existing.ip = ip;
                        existing.port = entry.port;
                        existing.last_seen_ms = entry.last_seen_ms;
                    }
                }
                None => {
                    self.peers.insert(
                        entry.device_id.clone(),
                        Peer {
                            device_id: entry.device_id.clone(),
                            ip,
                            port: entry.port,
                            signing_public: None,
                            authenticated: false,
                            last_seen_ms: entry.last_seen_ms,
                            session: None,
                        },
                    );
                    events.push(PeerEvent::PeerAdded {
                        device_id: entry.device_id.clone(),
                    });
                }
            }
        }
        events
    }
}
