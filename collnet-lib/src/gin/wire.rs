//! Signal-metadata message carried on the control rail, one per
//! signaled put. Natural C field offsets, native byte order.

use crate::error::{CollNetError, Result};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SignalMetadataMsg {
    /// Only the low 10 bits are meaningful.
    pub msg_seq_num: u32,
    /// Comm id at the receiver; only the low 20 bits are meaningful.
    pub remote_comm_id: u32,
    pub num_segments: u32,
    pub signal_base_address: u64,
    pub signal_offset: u64,
    pub signal_value: u64,
}

const OFF_SEQ: usize = 0;
const OFF_COMM: usize = 4;
const OFF_NSEG: usize = 8;
// 12..16 is padding for the u64 fields.
const OFF_BASE: usize = 16;
const OFF_OFFSET: usize = 24;
const OFF_VALUE: usize = 32;

pub(crate) const METADATA_MSG_SIZE: usize = 40;

impl SignalMetadataMsg {
    pub fn encode(&self, buf: &mut [u8]) {
        assert!(buf.len() >= METADATA_MSG_SIZE);
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.msg_seq_num.to_ne_bytes());
        buf[OFF_COMM..OFF_COMM + 4]
            .copy_from_slice(&self.remote_comm_id.to_ne_bytes());
        buf[OFF_NSEG..OFF_NSEG + 4]
            .copy_from_slice(&self.num_segments.to_ne_bytes());
        buf[OFF_BASE..OFF_BASE + 8]
            .copy_from_slice(&self.signal_base_address.to_ne_bytes());
        buf[OFF_OFFSET..OFF_OFFSET + 8]
            .copy_from_slice(&self.signal_offset.to_ne_bytes());
        buf[OFF_VALUE..OFF_VALUE + 8]
            .copy_from_slice(&self.signal_value.to_ne_bytes());
    }

    pub fn decode(buf: &[u8]) -> Result<SignalMetadataMsg> {
        if buf.len() < METADATA_MSG_SIZE {
            return Err(CollNetError::Protocol("short signal metadata message"));
        }
        let u32_at = |off: usize| {
            u32::from_ne_bytes(buf[off..off + 4].try_into().unwrap())
        };
        let u64_at = |off: usize| {
            u64::from_ne_bytes(buf[off..off + 8].try_into().unwrap())
        };
        Ok(SignalMetadataMsg {
            msg_seq_num: u32_at(OFF_SEQ),
            remote_comm_id: u32_at(OFF_COMM),
            num_segments: u32_at(OFF_NSEG),
            signal_base_address: u64_at(OFF_BASE),
            signal_offset: u64_at(OFF_OFFSET),
            signal_value: u64_at(OFF_VALUE),
        })
    }
}
