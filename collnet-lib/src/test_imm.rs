use crate::gin::imm::{
    ACK_SEG_COUNT, COMM_ID_MASK, SEQ_MASK, next_seq, pack, unpack,
};

#[test]
fn pack_unpack_round_trip() {
    for comm_id in [0u32, 1, 7, 1 << 10, COMM_ID_MASK] {
        for seq in [0u16, 1, 511, SEQ_MASK as u16] {
            for nseg in [1u32, 2, 3] {
                let imm = pack(comm_id, seq, nseg);
                assert_eq!(unpack(imm), (comm_id, seq, nseg));
            }
        }
    }
}

#[test]
fn ack_marker_is_reserved() {
    // Data writes carry one or two segments; three marks an ack.
    assert_eq!(ACK_SEG_COUNT, 3);
    let imm = pack(42, 9, ACK_SEG_COUNT);
    let (comm_id, seq, nseg) = unpack(imm);
    assert_eq!((comm_id, seq), (42, 9));
    assert_eq!(nseg, ACK_SEG_COUNT);
}

#[test]
fn field_packing_layout() {
    let imm = pack(0xABCDE, 0x321, 2);
    assert_eq!(imm, (2 << 30) | (0xABCDE << 10) | 0x321);
}

#[test]
fn sequence_wraps_at_ten_bits() {
    assert_eq!(next_seq(0), 1);
    assert_eq!(next_seq(SEQ_MASK as u16), 0);
}
