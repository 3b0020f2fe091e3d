use std::sync::mpsc;

use crate::{
    error::{CollNetError, Result},
    gin::{MockRingChannel, RingChannel, ring_allgather},
};

/// In-process ring rank: sends to the next rank's queue, receives from
/// its own.
struct ChannelRing {
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl RingChannel for ChannelRing {
    fn send_next(&mut self, buf: &[u8]) -> Result<()> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| CollNetError::Custom("ring peer gone"))
    }

    fn recv_prev(&mut self, buf: &mut [u8]) -> Result<()> {
        let msg = self
            .rx
            .recv()
            .map_err(|_| CollNetError::Custom("ring peer gone"))?;
        if msg.len() != buf.len() {
            return Err(CollNetError::Protocol("ring message size mismatch"));
        }
        buf.copy_from_slice(&msg);
        Ok(())
    }
}

fn make_ring(nranks: usize) -> Vec<ChannelRing> {
    let mut txs = Vec::new();
    let mut rxs = Vec::new();
    for _ in 0..nranks {
        let (tx, rx) = mpsc::channel();
        txs.push(tx);
        rxs.push(rx);
    }
    // Rank i sends into rank (i+1)'s receive queue.
    txs.rotate_left(1);
    txs.into_iter()
        .zip(rxs)
        .map(|(tx, rx)| ChannelRing { tx, rx })
        .collect()
}

#[test]
fn allgather_populates_every_block() {
    const NRANKS: u32 = 5;
    const BLOCK: usize = 16;

    let rings = make_ring(NRANKS as usize);
    let mut handles = Vec::new();
    for (rank, mut ring) in rings.into_iter().enumerate() {
        handles.push(std::thread::spawn(move || {
            let mut data = vec![0u8; BLOCK * NRANKS as usize];
            data[rank * BLOCK..][..BLOCK].fill(rank as u8 + 1);
            ring_allgather(&mut ring, rank as u32, NRANKS, BLOCK, &mut data)
                .unwrap();
            data
        }));
    }
    for handle in handles {
        let data = handle.join().unwrap();
        for rank in 0..NRANKS as usize {
            assert!(
                data[rank * BLOCK..][..BLOCK].iter().all(|&b| b == rank as u8 + 1),
                "rank {} block corrupt",
                rank
            );
        }
    }
}

#[test]
fn allgather_single_rank_is_noop() {
    let mut ring = MockRingChannel::new();
    ring.expect_send_next().never();
    ring.expect_recv_prev().never();

    let mut data = vec![9u8; 8];
    ring_allgather(&mut ring, 0, 1, 8, &mut data).unwrap();
    assert!(data.iter().all(|&b| b == 9));
}

#[test]
fn allgather_surfaces_ring_errors() {
    let mut ring = MockRingChannel::new();
    ring.expect_send_next()
        .returning(|_| Err(CollNetError::Custom("ring peer gone")));

    let mut data = vec![0u8; 32];
    assert!(ring_allgather(&mut ring, 0, 2, 16, &mut data).is_err());
}

#[test]
fn allgather_validates_buffer_size() {
    let mut ring = MockRingChannel::new();
    let mut data = vec![0u8; 31];
    match ring_allgather(&mut ring, 0, 2, 16, &mut data) {
        Err(CollNetError::InvalidArgument(_)) => {}
        _ => panic!("expected invalid argument"),
    }
}
