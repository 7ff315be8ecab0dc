//! STUN binding over the node's own socket (RFC 5389, binding only).
//!
//! The request is a bare 20-byte header with a random 96-bit transaction
//! id; the response's XOR-MAPPED-ADDRESS attribute yields our public
//! endpoint. Responses are matched by transaction id, never by source.

use crate::errors::TransportError;
use crate::udp::UdpTransport;
use rand::RngCore;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// STUN magic cookie (RFC 5389).
pub const STUN_MAGIC_COOKIE: u32 = 0x2112_A442;

/// Binding request message type.
const BINDING_REQUEST: u16 = 0x0001;

/// Binding success response message type.
const BINDING_RESPONSE: u16 = 0x0101;

/// XOR-MAPPED-ADDRESS attribute type.
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// How long to wait for the binding response.
const STUN_TIMEOUT: Duration = Duration::from_secs(5);

/// Issue a binding request through `transport` and return the mapped
/// address the server observed.
///
/// # Errors
///
/// `TransportError::StunFailed` on DNS failure, timeout, or a response
/// without a parsable XOR-MAPPED-ADDRESS.
pub async fn discover_public_address(
    transport: &UdpTransport,
    server: &str,
) -> Result<SocketAddr, TransportError> {
    let server_addr = resolve_server(server)?;

    let mut transaction_id = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut transaction_id);

    let waiter = transport.register_stun_waiter(transaction_id);
    let request = build_binding_request(&transaction_id);

    if let Err(e) = transport.send(server_addr, &request).await {
        transport.remove_stun_waiter(&transaction_id);
        return Err(e);
    }

    let response = match tokio::time::timeout(STUN_TIMEOUT, waiter).await {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(_)) => {
            return Err(TransportError::StunFailed("transport closed".into()));
        }
        Err(_) => {
            transport.remove_stun_waiter(&transaction_id);
            return Err(TransportError::StunFailed(format!(
                "no response from {server} within {STUN_TIMEOUT:?}"
            )));
        }
    };

    let mapped = parse_binding_response(&response, &transaction_id)
        .ok_or_else(|| TransportError::StunFailed("no XOR-MAPPED-ADDRESS in response".into()))?;
    info!(%mapped, server, "discovered public address via STUN");
    Ok(mapped)
}

/// Best-effort local interface address, the fallback when STUN fails or
/// is disabled. Routes a throwaway socket toward a public address to ask
/// the OS which interface it would use; nothing is actually sent.
pub fn local_interface_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("8.8.8.8:80")?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or_else(|e| {
        debug!(error = %e, "interface probe failed, using loopback");
        IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
    })
}

fn resolve_server(server: &str) -> Result<SocketAddr, TransportError> {
    server
        .to_socket_addrs()
        .map_err(|e| TransportError::StunFailed(format!("cannot resolve {server}: {e}")))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| TransportError::StunFailed(format!("no IPv4 address for {server}")))
}

fn build_binding_request(transaction_id: &[u8; 12]) -> Vec<u8> {
    let mut msg = Vec::with_capacity(20);
    msg.extend_from_slice(&BINDING_REQUEST.to_be_bytes());
    msg.extend_from_slice(&0u16.to_be_bytes());
    msg.extend_from_slice(&STUN_MAGIC_COOKIE.to_be_bytes());
    msg.extend_from_slice(transaction_id);
    msg
}

fn parse_binding_response(data: &[u8], expected_transaction_id: &[u8; 12]) -> Option<SocketAddr> {
    if data.len() < 20 {
        return None;
    }
    if u16::from_be_bytes([data[0], data[1]]) != BINDING_RESPONSE {
        return None;
    }
    if u32::from_be_bytes([data[4], data[5], data[6], data[7]]) != STUN_MAGIC_COOKIE {
        return None;
    }
    if &data[8..20] != expected_transaction_id {
        return None;
    }

    let msg_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = (20 + msg_len).min(data.len());

    let mut pos = 20;
    while pos + 4 <= end {
        let attr_type = u16::from_be_bytes([data[pos], data[pos + 1]]);
        let attr_len = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;
        if pos + 4 + attr_len > data.len() {
            break;
        }

        if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            if let Some(addr) = parse_xor_mapped(&data[pos + 4..pos + 4 + attr_len]) {
                return Some(addr);
            }
        }

        // Attributes are padded to 4-byte boundaries
        pos += 4 + ((attr_len + 3) & !3);
    }
    None
}

fn parse_xor_mapped(data: &[u8]) -> Option<SocketAddr> {
    if data.len() < 8 || data[1] != 0x01 {
        // IPv4 only
        return None;
    }
    let port = u16::from_be_bytes([data[2], data[3]]) ^ (STUN_MAGIC_COOKIE >> 16) as u16;
    let cookie = STUN_MAGIC_COOKIE.to_be_bytes();
    let ip = std::net::Ipv4Addr::new(
        data[4] ^ cookie[0],
        data[5] ^ cookie[1],
        data[6] ^ cookie[2],
        data[7] ^ cookie[3],
    );
    Some(SocketAddr::new(IpAddr::V4(ip), port))
}
