use crate::gin::{
    imm::SEQ_MASK,
    reassembly::ReassemblyTable,
    wire::SignalMetadataMsg,
};

fn metadata(seq: u16, nseg: u32) -> SignalMetadataMsg {
    SignalMetadataMsg {
        msg_seq_num: seq as u32,
        remote_comm_id: 1,
        num_segments: nseg,
        signal_base_address: 0x1000,
        signal_offset: 0,
        signal_value: 1,
    }
}

#[test]
fn write_then_metadata_completes() {
    let mut table = ReassemblyTable::default();
    let mut next = 0u16;

    table.note_write_segment(0, 0, 2).unwrap();
    assert!(table.pop_deliverable(0, &mut next).is_none());

    table.note_metadata(0, &metadata(0, 2)).unwrap();
    let (seq, entry) = table.pop_deliverable(0, &mut next).unwrap();
    assert_eq!(seq, 0);
    assert!(entry.metadata_received);
    assert_eq!(entry.num_seg_completions, 2);
    assert_eq!(next, 1);
    assert_eq!(table.len(), 0);
}

#[test]
fn metadata_first_counts_one_event() {
    let mut table = ReassemblyTable::default();
    let mut next = 0u16;

    table.note_metadata(0, &metadata(0, 2)).unwrap();
    // Metadata alone is one completed segment of two; not deliverable.
    assert!(table.pop_deliverable(0, &mut next).is_none());

    table.note_write_segment(0, 0, 2).unwrap();
    assert!(table.pop_deliverable(0, &mut next).is_some());
}

#[test]
fn pure_signal_completes_on_metadata_alone() {
    let mut table = ReassemblyTable::default();
    let mut next = 0u16;
    table.note_metadata(0, &metadata(0, 1)).unwrap();
    let (_, entry) = table.pop_deliverable(0, &mut next).unwrap();
    assert!(entry.metadata_received);
}

#[test]
fn delivery_stops_at_gap_and_resumes_in_order() {
    let mut table = ReassemblyTable::default();
    let mut next = 0u16;

    // Three writes land before any metadata.
    for seq in 0..3u16 {
        table.note_write_segment(7, seq, 2).unwrap();
    }
    assert!(table.pop_deliverable(7, &mut next).is_none());

    // Metadata for seq 1 first: still nothing, head is seq 0.
    table.note_metadata(7, &metadata(1, 2)).unwrap();
    assert!(table.pop_deliverable(7, &mut next).is_none());
    assert_eq!(next, 0);

    // Metadata for seq 0 unblocks 0 and then 1; 2 still waits.
    table.note_metadata(7, &metadata(0, 2)).unwrap();
    assert_eq!(table.pop_deliverable(7, &mut next).unwrap().0, 0);
    assert_eq!(table.pop_deliverable(7, &mut next).unwrap().0, 1);
    assert!(table.pop_deliverable(7, &mut next).is_none());
    assert_eq!(next, 2);

    table.note_metadata(7, &metadata(2, 2)).unwrap();
    assert_eq!(table.pop_deliverable(7, &mut next).unwrap().0, 2);
    assert_eq!(table.len(), 0);
}

#[test]
fn peers_are_independent() {
    let mut table = ReassemblyTable::default();
    let mut next_a = 0u16;
    let mut next_b = 0u16;

    table.note_metadata(1, &metadata(0, 1)).unwrap();
    assert!(table.pop_deliverable(2, &mut next_b).is_none());
    assert!(table.pop_deliverable(1, &mut next_a).is_some());
}

#[test]
fn sequence_counter_wraps() {
    let mut table = ReassemblyTable::default();
    let mut next = SEQ_MASK as u16;

    table.note_metadata(0, &metadata(SEQ_MASK as u16, 1)).unwrap();
    assert_eq!(
        table.pop_deliverable(0, &mut next).unwrap().0,
        SEQ_MASK as u16
    );
    assert_eq!(next, 0);

    table.note_metadata(0, &metadata(0, 1)).unwrap();
    assert_eq!(table.pop_deliverable(0, &mut next).unwrap().0, 0);
}

#[test]
fn segment_count_mismatch_is_rejected() {
    let mut table = ReassemblyTable::default();
    table.note_write_segment(0, 0, 2).unwrap();
    assert!(table.note_metadata(0, &metadata(0, 1)).is_err());
}
