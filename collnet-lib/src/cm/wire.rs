//! Connect-message wire format.
//!
//! A fixed prefix (discriminator, originator id, target id, originator
//! endpoint address) followed immediately by the transport's opaque
//! payload of the size both peers configured at construction. Fields
//! are laid out at their natural C offsets in declaration order.

use crate::{
    api::{EpName, MAX_EP_ADDR},
    error::{CollNetError, Result},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ConnMsgType {
    Connect = 0,
    ConnectResp = 1,
}

#[derive(Clone, Debug)]
pub(crate) struct ConnMsg {
    pub msg_type: ConnMsgType,
    /// Connector id of the message originator.
    pub local_id: u32,
    /// Connector id of the target; routes the message on arrival.
    pub remote_id: u32,
    /// The originator's connection-establishment endpoint address.
    pub conn_ep_name: EpName,
    pub payload: Vec<u8>,
}

const OFF_TYPE: usize = 0;
const OFF_LOCAL_ID: usize = 4;
const OFF_REMOTE_ID: usize = 8;
const OFF_ADDR: usize = 12;
// addr ends at 12 + 56 = 68, addr_len aligns up to 72.
const OFF_ADDR_LEN: usize = 72;

pub(crate) const CONN_MSG_HDR_SIZE: usize = 80;

pub(crate) fn conn_msg_size(data_size: usize) -> usize {
    CONN_MSG_HDR_SIZE + data_size
}

impl ConnMsg {
    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= CONN_MSG_HDR_SIZE + self.payload.len());
        buf[OFF_TYPE..OFF_TYPE + 4]
            .copy_from_slice(&(self.msg_type as u32).to_ne_bytes());
        buf[OFF_LOCAL_ID..OFF_LOCAL_ID + 4]
            .copy_from_slice(&self.local_id.to_ne_bytes());
        buf[OFF_REMOTE_ID..OFF_REMOTE_ID + 4]
            .copy_from_slice(&self.remote_id.to_ne_bytes());
        buf[OFF_ADDR..OFF_ADDR + MAX_EP_ADDR].copy_from_slice(&self.conn_ep_name.addr);
        buf[OFF_ADDR_LEN..OFF_ADDR_LEN + 8]
            .copy_from_slice(&(self.conn_ep_name.addr_len as u64).to_ne_bytes());
        buf[CONN_MSG_HDR_SIZE..CONN_MSG_HDR_SIZE + self.payload.len()]
            .copy_from_slice(&self.payload);
    }

    pub fn decode(buf: &[u8], data_size: usize) -> Result<ConnMsg> {
        if buf.len() < CONN_MSG_HDR_SIZE + data_size {
            return Err(CollNetError::Protocol("short connect message"));
        }
        let read_u32 = |off: usize| {
            u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
        };
        let msg_type = match read_u32(OFF_TYPE) {
            0 => ConnMsgType::Connect,
            1 => ConnMsgType::ConnectResp,
            _ => {
                return Err(CollNetError::Protocol("bad connect message type"));
            }
        };
        let addr_len =
            u64::from_ne_bytes(buf[OFF_ADDR_LEN..OFF_ADDR_LEN + 8].try_into().unwrap())
                as usize;
        if addr_len > MAX_EP_ADDR {
            return Err(CollNetError::Protocol("bad endpoint address length"));
        }
        let mut addr = [0u8; MAX_EP_ADDR];
        addr.copy_from_slice(&buf[OFF_ADDR..OFF_ADDR + MAX_EP_ADDR]);
        Ok(ConnMsg {
            msg_type,
            local_id: read_u32(OFF_LOCAL_ID),
            remote_id: read_u32(OFF_REMOTE_ID),
            conn_ep_name: EpName { addr, addr_len },
            payload: buf[CONN_MSG_HDR_SIZE..CONN_MSG_HDR_SIZE + data_size].to_vec(),
        })
    }
}
