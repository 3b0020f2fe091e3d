//! Receiver-side reassembly of signaled puts.
//!
//! Each in-flight put is keyed by `(peer << 16) | seq` and collects one
//! event per segment: the payload write completion and, when a signal
//! was requested, the metadata message. An entry whose event count has
//! reached its segment total is complete; completes are handed out
//! strictly in per-peer sequence order, so a complete entry behind a
//! gap waits.

use std::collections::HashMap;

use crate::{
    error::{CollNetError, Result},
    gin::{imm, wire::SignalMetadataMsg},
};

#[derive(Debug, Default, Clone)]
pub(crate) struct ReassemblyEntry {
    pub total_segments: u32,
    pub num_seg_completions: u32,
    pub metadata_received: bool,
    pub metadata: SignalMetadataMsg,
}

impl ReassemblyEntry {
    pub fn is_complete(&self) -> bool {
        self.num_seg_completions == self.total_segments
    }
}

fn entry_key(peer: u32, seq: u16) -> u64 {
    ((peer as u64) << 16) | seq as u64
}

#[derive(Default)]
pub(crate) struct ReassemblyTable {
    entries: HashMap<u64, ReassemblyEntry>,
}

impl ReassemblyTable {
    /// Record the arrival of a payload write with the given immediate
    /// segment total.
    pub fn note_write_segment(
        &mut self,
        peer: u32,
        seq: u16,
        total_segments: u32,
    ) -> Result<()> {
        let entry = self.entries.entry(entry_key(peer, seq)).or_default();
        if entry.num_seg_completions == 0 {
            entry.total_segments = total_segments;
        } else if entry.total_segments != total_segments {
            return Err(CollNetError::Protocol(
                "segment count mismatch between write and metadata",
            ));
        }
        entry.num_seg_completions += 1;
        Ok(())
    }

    /// Record the arrival of the signal metadata message.
    pub fn note_metadata(
        &mut self,
        peer: u32,
        msg: &SignalMetadataMsg,
    ) -> Result<()> {
        let seq = (msg.msg_seq_num & imm::SEQ_MASK) as u16;
        let entry = self.entries.entry(entry_key(peer, seq)).or_default();
        if entry.num_seg_completions == 0 {
            entry.total_segments = msg.num_segments;
        } else if entry.total_segments != msg.num_segments {
            return Err(CollNetError::Protocol(
                "segment count mismatch between write and metadata",
            ));
        }
        if entry.metadata_received {
            return Err(CollNetError::Protocol("duplicate signal metadata"));
        }
        entry.metadata = *msg;
        entry.metadata_received = true;
        entry.num_seg_completions += 1;
        Ok(())
    }

    /// Remove and return the entry at `*next_seq` if it is complete,
    /// advancing the counter. Returns `None` at the first gap.
    pub fn pop_deliverable(
        &mut self,
        peer: u32,
        next_seq: &mut u16,
    ) -> Option<(u16, ReassemblyEntry)> {
        let key = entry_key(peer, *next_seq);
        if !self.entries.get(&key).is_some_and(ReassemblyEntry::is_complete) {
            return None;
        }
        let seq = *next_seq;
        *next_seq = imm::next_seq(*next_seq);
        let entry = self.entries.remove(&key);
        entry.map(|e| (seq, e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
