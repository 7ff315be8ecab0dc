//! Binary DHT RPC frames.
//!
//! Frame layout: `op(1) | rpcId(u32 BE) | body`. These travel inside the
//! payload of a DATA envelope behind the `dht:` prefix.

use crate::errors::WireError;
use crate::peer_record::{Cursor, SignedPeerInfo};

/// Width of a node id on the wire (160 bits).
pub const NODE_ID_LEN: usize = 20;

const OP_PING: u8 = 0x01;
const OP_PONG: u8 = 0x02;
const OP_FIND_NODE: u8 = 0x03;
const OP_FOUND_NODE: u8 = 0x04;
const OP_STORE: u8 = 0x05;

/// A Kademlia RPC, request or response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RpcMessage {
    /// Liveness probe carrying the sender's record
    Ping {
        /// Correlation id
        rpc_id: u32,
        /// Sender's signed record
        sender: SignedPeerInfo,
    },
    /// Reply to PING carrying the responder's record
    Pong {
        /// Correlation id of the PING
        rpc_id: u32,
        /// Responder's signed record
        sender: SignedPeerInfo,
    },
    /// Ask for the k closest known nodes to a target id
    FindNode {
        /// Correlation id
        rpc_id: u32,
        /// Target node id
        target: [u8; NODE_ID_LEN],
    },
    /// Reply to FIND_NODE
    FoundNode {
        /// Correlation id of the FIND_NODE
        rpc_id: u32,
        /// Up to k closest records known to the responder
        peers: Vec<SignedPeerInfo>,
    },
    /// Push a record to the responder; never answered
    Store {
        /// Correlation id (unused in replies, kept for the frame shape)
        rpc_id: u32,
        /// The record to store
        record: SignedPeerInfo,
    },
}

impl RpcMessage {
    /// The correlation id of any frame.
    pub fn rpc_id(&self) -> u32 {
        match self {
            Self::Ping { rpc_id, .. }
            | Self::Pong { rpc_id, .. }
            | Self::FindNode { rpc_id, .. }
            | Self::FoundNode { rpc_id, .. }
            | Self::Store { rpc_id, .. } => *rpc_id,
        }
    }

    /// Encode to frame bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        match self {
            Self::Ping { rpc_id, sender } => {
                bytes.push(OP_PING);
                bytes.extend_from_slice(&rpc_id.to_be_bytes());
                bytes.extend_from_slice(&sender.encode());
            }
            Self::Pong { rpc_id, sender } => {
                bytes.push(OP_PONG);
                bytes.extend_from_slice(&rpc_id.to_be_bytes());
                bytes.extend_from_slice(&sender.encode());
            }
            Self::FindNode { rpc_id, target } => {
                bytes.push(OP_FIND_NODE);
                bytes.extend_from_slice(&rpc_id.to_be_bytes());
                bytes.extend_from_slice(target);
            }
            Self::FoundNode { rpc_id, peers } => {
                bytes.push(OP_FOUND_NODE);
                bytes.extend_from_slice(&rpc_id.to_be_bytes());
                bytes.push(peers.len() as u8);
                for peer in peers {
                    let encoded = peer.encode();
                    bytes.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
                    bytes.extend_from_slice(&encoded);
                }
            }
            Self::Store { rpc_id, record } => {
                bytes.push(OP_STORE);
                bytes.extend_from_slice(&rpc_id.to_be_bytes());
                bytes.extend_from_slice(&record.encode());
            }
        }
        bytes
    }

    /// Decode a frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut cursor = Cursor::new(bytes);
        let op = cursor.take_u8()?;
        let rpc_id = cursor.take_u32()?;

        match op {
            OP_PING => {
                let (sender, _) = SignedPeerInfo::decode(cursor.remaining())?;
                Ok(Self::Ping { rpc_id, sender })
            }
            OP_PONG => {
                let (sender, _) = SignedPeerInfo::decode(cursor.remaining())?;
                Ok(Self::Pong { rpc_id, sender })
            }
            OP_FIND_NODE => {
                let target: [u8; NODE_ID_LEN] = cursor
                    .take(NODE_ID_LEN)?
                    .try_into()
                    .expect("slice length checked");
                Ok(Self::FindNode { rpc_id, target })
            }
            OP_FOUND_NODE => {
                let count = cursor.take_u8()? as usize;
                let mut peers = Vec::with_capacity(count);
                for _ in 0..count {
                    let len = cursor.take_u16()? as usize;
                    let (peer, consumed) = SignedPeerInfo::decode(cursor.take(len)?)?;
                    if consumed != len {
                        return Err(WireError::MalformedFrame(
                            "peer record length mismatch".into(),
                        ));
                    }
                    peers.push(peer);
                }
                Ok(Self::FoundNode { rpc_id, peers })
            }
            OP_STORE => {
                let (record, _) = SignedPeerInfo::decode(cursor.remaining())?;
                Ok(Self::Store { rpc_id, record })
            }
            other => Err(WireError::MalformedFrame(format!("unknown rpc op {other:#04x}"))),
        }
    }
}
