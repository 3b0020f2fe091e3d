use crate::{
    api::EpName,
    cm::wire::{CONN_MSG_HDR_SIZE, ConnMsg, ConnMsgType, conn_msg_size},
    error::CollNetError,
    gin::wire::{METADATA_MSG_SIZE, SignalMetadataMsg},
};

fn sample_ep_name() -> EpName {
    EpName::from_bytes(&[0xAA, 0xBB, 0xCC, 0x01, 0x02]).unwrap()
}

#[test]
fn conn_msg_encode_decode() {
    let payload = vec![0x11u8; 64];
    let msg = ConnMsg {
        msg_type: ConnMsgType::Connect,
        local_id: 7,
        remote_id: 42,
        conn_ep_name: sample_ep_name(),
        payload: payload.clone(),
    };
    let mut buf = vec![0u8; conn_msg_size(64)];
    msg.encode(&mut buf);

    let decoded = ConnMsg::decode(&buf, 64).unwrap();
    assert_eq!(decoded.msg_type, ConnMsgType::Connect);
    assert_eq!(decoded.local_id, 7);
    assert_eq!(decoded.remote_id, 42);
    assert_eq!(decoded.conn_ep_name.as_bytes(), sample_ep_name().as_bytes());
    assert_eq!(decoded.payload, payload);
}

#[test]
fn conn_resp_keeps_payload_bytes() {
    let msg = ConnMsg {
        msg_type: ConnMsgType::ConnectResp,
        local_id: 0,
        remote_id: 3,
        conn_ep_name: sample_ep_name(),
        payload: vec![0x22; 64],
    };
    let mut buf = vec![0u8; conn_msg_size(64)];
    msg.encode(&mut buf);
    let decoded = ConnMsg::decode(&buf, 64).unwrap();
    assert_eq!(decoded.msg_type, ConnMsgType::ConnectResp);
    assert_eq!(decoded.payload, vec![0x22; 64]);
}

#[test]
fn conn_msg_rejects_bad_discriminator() {
    let mut buf = vec![0u8; conn_msg_size(0)];
    buf[0..4].copy_from_slice(&9u32.to_ne_bytes());
    match ConnMsg::decode(&buf, 0) {
        Err(CollNetError::Protocol(_)) => {}
        _ => panic!("expected protocol error"),
    }
}

#[test]
fn conn_msg_rejects_short_buffer() {
    let buf = vec![0u8; CONN_MSG_HDR_SIZE - 1];
    assert!(ConnMsg::decode(&buf, 0).is_err());
}

#[test]
fn metadata_msg_encode_decode() {
    let msg = SignalMetadataMsg {
        msg_seq_num: 0x3FF,
        remote_comm_id: 0xFFFFF,
        num_segments: 2,
        signal_base_address: 0xDEAD_BEEF_0000,
        signal_offset: 0x40,
        signal_value: u64::MAX - 1,
    };
    let mut buf = [0u8; METADATA_MSG_SIZE];
    msg.encode(&mut buf);
    assert_eq!(SignalMetadataMsg::decode(&buf).unwrap(), msg);
}

#[test]
fn metadata_msg_rejects_short_buffer() {
    let buf = [0u8; METADATA_MSG_SIZE - 1];
    assert!(SignalMetadataMsg::decode(&buf).is_err());
}
