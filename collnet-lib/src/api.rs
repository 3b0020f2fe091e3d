//! Types used in public API

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::utils::hex::fmt_hex;

/// Largest provider endpoint address we can carry in a connect message.
pub const MAX_EP_ADDR: usize = 56;

/// An opaque provider endpoint address, as returned by the provider for
/// a local endpoint and inserted into peer address vectors.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress(pub Bytes);

impl std::fmt::Debug for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_hex(f, &self.0)
    }
}

impl std::fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_hex(f, &self.0)
    }
}

/// A fixed-capacity copy of an endpoint address, the form carried in
/// wire structs.
#[derive(Clone, Copy)]
pub struct EpName {
    pub addr: [u8; MAX_EP_ADDR],
    pub addr_len: usize,
}

impl EpName {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MAX_EP_ADDR {
            return None;
        }
        let mut addr = [0u8; MAX_EP_ADDR];
        addr[..bytes.len()].copy_from_slice(bytes);
        Some(EpName { addr, addr_len: bytes.len() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.addr[..self.addr_len]
    }
}

impl std::fmt::Debug for EpName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt_hex(f, self.as_bytes())
    }
}

/// Kind of memory behind a registration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MrType {
    Host,
    Device,
}

/// Signal update applied at the target of an iput_signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalOp {
    None,
    Inc,
    Add,
}
