//! The node's UDP socket and inbound pump.

use crate::errors::TransportError;
use crate::rate_limit::TokenBucketLimiter;
use crate::stun::STUN_MAGIC_COOKIE;
use crate::{INBOUND_CHANNEL_CAPACITY, RATE_LIMIT_PACKETS, RATE_LIMIT_WINDOW_SECS};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Largest datagram the reader will accept.
const MAX_DATAGRAM: usize = 65_507;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Counters for datagrams shed before dispatch.
#[derive(Debug, Default)]
pub struct TransportCounters {
    /// Datagrams dropped by the per-source rate gate
    pub rate_limited: AtomicU64,
    /// Datagrams dropped because the inbound channel was full
    pub backpressure_dropped: AtomicU64,
}

/// Handle to the node's bound UDP socket.
///
/// Cloneable; all clones share the socket and the reader task. Inbound
/// overlay datagrams arrive on the receiver returned by `bind`. STUN
/// responses never reach that stream; the reader routes them to the
/// waiter registered for their transaction id.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    stun_waiters: Arc<Mutex<HashMap<[u8; 12], oneshot::Sender<Vec<u8>>>>>,
    counters: Arc<TransportCounters>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Clone for UdpTransport {
    fn clone(&self) -> Self {
        Self {
            socket: Arc::clone(&self.socket),
            stun_waiters: Arc::clone(&self.stun_waiters),
            counters: Arc::clone(&self.counters),
            reader: Arc::clone(&self.reader),
        }
    }
}

impl UdpTransport {
    /// Bind to `0.0.0.0:port` (0 = OS-assigned) and start the reader.
    /// Returns the transport and the inbound datagram stream.
    pub async fn bind(
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<(SocketAddr, Vec<u8>)>), TransportError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(TransportError::Bind)?;
        let socket = Arc::new(socket);

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let stun_waiters: Arc<Mutex<HashMap<[u8; 12], oneshot::Sender<Vec<u8>>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let counters = Arc::new(TransportCounters::default());

        let reader = tokio::spawn(Self::read_loop(
            Arc::clone(&socket),
            inbound_tx,
            Arc::clone(&stun_waiters),
            Arc::clone(&counters),
        ));

        Ok((
            Self {
                socket,
                stun_waiters,
                counters,
                reader: Arc::new(Mutex::new(Some(reader))),
            },
            inbound_rx,
        ))
    }

    async fn read_loop(
        socket: Arc<UdpSocket>,
        inbound_tx: mpsc::Sender<(SocketAddr, Vec<u8>)>,
        stun_waiters: Arc<Mutex<HashMap<[u8; 12], oneshot::Sender<Vec<u8>>>>>,
        counters: Arc<TransportCounters>,
    ) {
        let mut limiter =
            TokenBucketLimiter::new(RATE_LIMIT_PACKETS, RATE_LIMIT_WINDOW_SECS);
        let mut last_gc = now_ms();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let (len, src) = match socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!(error = %e, "udp receive failed, reader exiting");
                    return;
                }
            };
            let bytes = buf[..len].to_vec();

            // STUN responses share the socket; peel them off by cookie.
            if let Some(transaction_id) = stun_transaction_id(&bytes) {
                if let Some(waiter) = stun_waiters.lock().remove(&transaction_id) {
                    let _ = waiter.send(bytes);
                } else {
                    trace!(%src, "stun response with no waiter, dropped");
                }
                continue;
            }

            // Loopback is exempt: same-host topologies share one source
            // IP, and the operator owns that traffic anyway.
            let now = now_ms();
            if !src.ip().is_loopback() && !limiter.allow(src.ip(), now) {
                counters.rate_limited.fetch_add(1, Ordering::Relaxed);
                trace!(%src, "rate limited datagram dropped");
                continue;
            }
            if now.saturating_sub(last_gc) > RATE_LIMIT_WINDOW_SECS * 1000 {
                limiter.gc(now);
                last_gc = now;
            }

            if inbound_tx.try_send((src, bytes)).is_err() {
                counters.backpressure_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(%src, "inbound channel full, datagram dropped");
            }
        }
    }

    /// Send a datagram.
    pub async fn send(&self, dest: SocketAddr, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(bytes, dest).await?;
        Ok(())
    }

    /// The locally bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    /// Register a waiter for a STUN transaction id. The reader completes
    /// it with the raw response bytes.
    pub(crate) fn register_stun_waiter(
        &self,
        transaction_id: [u8; 12],
    ) -> oneshot::Receiver<Vec<u8>> {
        let (tx, rx) = oneshot::channel();
        self.stun_waiters.lock().insert(transaction_id, tx);
        rx
    }

    /// Forget a STUN waiter (timeout path).
    pub(crate) fn remove_stun_waiter(&self, transaction_id: &[u8; 12]) {
        self.stun_waiters.lock().remove(transaction_id);
    }

    /// Drop counters.
    pub fn counters(&self) -> &TransportCounters {
        &self.counters
    }

    /// Stop the reader task and release the socket.
    pub fn shutdown(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

/// Extract the transaction id when bytes look like a STUN message.
fn stun_transaction_id(bytes: &[u8]) -> Option<[u8; 12]> {
    if bytes.len() < 20 {
        return None;
    }
    let cookie = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if cookie != STUN_MAGIC_COOKIE {
        return None;
    }
    bytes[8..20].try_into().ok()
}
