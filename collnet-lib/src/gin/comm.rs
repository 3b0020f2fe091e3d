//! The GIN communicator: per-collective peer table, sender-side
//! sequence accounting, receiver-side in-order signal delivery, and the
//! ack path that releases the initiator's sequence slots.

use std::{
    collections::HashMap,
    ffi::c_void,
    ptr::{NonNull, null, null_mut},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering::Relaxed},
    },
};

use cuda_lib::gdr::GdrPinnedRegion;
use libfabric_sys::{FI_RECV, FI_REMOTE_WRITE, FI_SEND, FI_WRITE, fi_addr_t};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    api::{MrType, SignalOp},
    error::{CollNetError, Result},
    fabric::{self, MemIface, RegisteredMr},
    freelist::{FlElem, Freelist},
    gin::{
        GinConnectHandle, GinInner, GinResources, RingChannel, imm,
        imm::ACK_SEG_COUNT,
        rails::{GinChunkRegistrar, MAX_NUM_RAILS},
        reassembly::ReassemblyTable,
        reqs::{
            GinMetaSendReq, GinReqKind, GinRequest, GinWriteAckReq, GinWriteReq,
            IputSignalRequest, IputState, SendPost, WritePost,
        },
        ring_allgather,
        wire::{METADATA_MSG_SIZE, SignalMetadataMsg},
    },
    idpool::PoolKey,
    utils::pending::PostOutcome,
};

/// The host runtime's per-peer cap on in-flight signaled puts. Sequence
/// slots are tracked modulo this.
pub(crate) const MAX_INFLIGHT_PUT_SIGNAL: usize = 128;

pub(crate) struct PeerState {
    pub comm_id: u32,
    pub data_addr: Vec<fi_addr_t>,
    pub ctrl_addr: Vec<fi_addr_t>,
    pub write_ack_buff_addr: u64,
    pub write_ack_buff_keys: Vec<u64>,
    /// Next sequence to assign to a put aimed at this peer.
    pub next_seq: u16,
    /// Next sequence whose signal must be applied, for puts from this
    /// peer.
    pub next_deliver: u16,
    pub active_put_signal: [bool; MAX_INFLIGHT_PUT_SIGNAL],
}

/// How to apply a signal update landing in a registered region.
pub(crate) enum SignalTarget {
    Host,
    Device(Arc<GdrPinnedRegion>),
}

pub(crate) struct GinCommState {
    pub local_comm_id: u32,
    pub rank: u32,
    pub nranks: u32,
    pub num_rails: u16,
    pub peers: Vec<PeerState>,
    /// Per-rail reverse maps from inserted address to peer rank.
    pub data_addr_to_rank: Vec<HashMap<fi_addr_t, u32>>,
    pub ctrl_addr_to_rank: Vec<HashMap<fi_addr_t, u32>>,
    pub reassembly: ReassemblyTable,
    /// Ack writes posted but not yet completed. The communicator will
    /// not close until this is zero.
    pub outstanding_acks: usize,
    pub metadata_fl: Freelist<GinChunkRegistrar>,
    /// Registered base address -> how to bump a signal there.
    pub signal_targets: HashMap<u64, SignalTarget>,
    pub next_rail: u16,
}

impl GinCommState {
    pub fn slot_active(&self, peer: u32, seq: u16) -> bool {
        self.peers[peer as usize].active_put_signal
            [seq as usize % MAX_INFLIGHT_PUT_SIGNAL]
    }

    pub fn free_metadata(&mut self, elem: FlElem) {
        self.metadata_fl.free_entry(elem);
    }

    fn peer_by_addr(
        map: &[HashMap<fi_addr_t, u32>],
        rail_id: u16,
        addr: fi_addr_t,
    ) -> Result<u32> {
        map.get(rail_id as usize)
            .and_then(|m| m.get(&addr))
            .copied()
            .ok_or(CollNetError::Protocol("unknown source address"))
    }
}

/// Ack for `seq` arrived back at the initiator: release the slot. Acks
/// are posted from the peer's control endpoint, so the peer resolves
/// through the control-rail map.
pub(crate) fn handle_ack(
    comm: &Arc<Mutex<GinCommState>>,
    src: fi_addr_t,
    rail_id: u16,
    seq: u16,
) -> Result<()> {
    let mut st = comm.lock();
    let peer = GinCommState::peer_by_addr(&st.ctrl_addr_to_rank, rail_id, src)?;
    let slot = seq as usize % MAX_INFLIGHT_PUT_SIGNAL;
    let active = &mut st.peers[peer as usize].active_put_signal[slot];
    if !*active {
        return Err(CollNetError::Protocol("ack for inactive sequence slot"));
    }
    *active = false;
    Ok(())
}

/// A payload write for `(peer, seq)` completed at the receiver.
pub(crate) fn handle_write_segment(
    inner: &mut GinInner,
    comm: &Arc<Mutex<GinCommState>>,
    src: fi_addr_t,
    rail_id: u16,
    seq: u16,
    total_segments: u32,
) -> Result<()> {
    let peer = {
        let mut st = comm.lock();
        let peer =
            GinCommState::peer_by_addr(&st.data_addr_to_rank, rail_id, src)?;
        st.reassembly.note_write_segment(peer, seq, total_segments)?;
        peer
    };
    deliver_ready(inner, comm, peer)
}

/// The signal metadata message for `(peer, seq)` arrived on a control
/// rail.
pub(crate) fn handle_metadata(
    inner: &mut GinInner,
    comm: &Arc<Mutex<GinCommState>>,
    src: fi_addr_t,
    rail_id: u16,
    msg: &SignalMetadataMsg,
) -> Result<()> {
    let peer = {
        let mut st = comm.lock();
        let peer =
            GinCommState::peer_by_addr(&st.ctrl_addr_to_rank, rail_id, src)?;
        st.reassembly.note_metadata(peer, msg)?;
        peer
    };
    deliver_ready(inner, comm, peer)
}

/// Apply and acknowledge every complete entry at the head of the
/// peer's sequence window, stopping at the first gap.
fn deliver_ready(
    inner: &mut GinInner,
    comm: &Arc<Mutex<GinCommState>>,
    peer: u32,
) -> Result<()> {
    loop {
        let popped = {
            let mut st = comm.lock();
            let GinCommState { reassembly, peers, .. } = &mut *st;
            reassembly.pop_deliverable(peer, &mut peers[peer as usize].next_deliver)
        };
        let Some((seq, entry)) = popped else {
            return Ok(());
        };
        if entry.metadata_received {
            apply_signal(comm, &entry.metadata)?;
        }
        post_ack(inner, comm, peer, seq)?;
    }
}

/// Bump the signal cell named by the metadata. For device regions this
/// is a host-initiated read-modify-write through the GDRCopy mapping;
/// for host regions a relaxed atomic add is enough, since ordering is
/// carried by the delivery loop, not the signal itself.
fn apply_signal(
    comm: &Arc<Mutex<GinCommState>>,
    metadata: &SignalMetadataMsg,
) -> Result<()> {
    let st = comm.lock();
    let target = st
        .signal_targets
        .get(&metadata.signal_base_address)
        .ok_or(CollNetError::InvalidArgument(
            "signal base address not registered",
        ))?;
    match target {
        SignalTarget::Host => {
            let ptr = (metadata.signal_base_address + metadata.signal_offset)
                as *mut u64;
            let cell = unsafe { AtomicU64::from_ptr(ptr) };
            cell.fetch_add(metadata.signal_value, Relaxed);
        }
        SignalTarget::Device(region) => {
            let old = region.read_u64(metadata.signal_offset)?;
            region.write_u64(
                metadata.signal_offset,
                old.wrapping_add(metadata.signal_value),
            )?;
        }
    }
    Ok(())
}

/// Send the zero-byte ack write releasing `(peer, seq)` at the
/// initiator. Acks go out on control rail 0, aimed at the peer's
/// advertised landing buffer.
fn post_ack(
    inner: &mut GinInner,
    comm: &Arc<Mutex<GinCommState>>,
    peer: u32,
    seq: u16,
) -> Result<()> {
    const ACK_RAIL: u16 = 0;
    let post = {
        let st = comm.lock();
        let p = &st.peers[peer as usize];
        WritePost {
            ep: inner.ep.control_rails[ACK_RAIL as usize].ep(),
            buf: null(),
            len: 0,
            desc: null_mut(),
            imm_data: imm::pack(p.comm_id, seq, ACK_SEG_COUNT),
            dest: p.ctrl_addr[ACK_RAIL as usize],
            remote_addr: p.write_ack_buff_addr,
            remote_key: p.write_ack_buff_keys[ACK_RAIL as usize],
        }
    };
    let req =
        GinRequest::new(GinReqKind::WriteAck(GinWriteAckReq { post, comm: comm.clone() }));
    let ptr = inner.reqs.insert(req);
    match inner.post_req(ptr) {
        Ok(PostOutcome::Posted) => {}
        Ok(PostOutcome::Again) => inner.pending.push_back(ptr),
        Err(e) => {
            inner.reqs.take(ptr);
            return Err(e);
        }
    }
    comm.lock().outstanding_acks += 1;
    Ok(())
}

/// Per-peer view of one symmetric registration, exchanged at
/// registration time.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub(crate) struct RemoteMrInfo {
    pub addr: u64,
    pub num_rails: u16,
    pub keys: [u64; MAX_NUM_RAILS],
}

/// A symmetric GIN registration: one provider MR per rail locally, the
/// peers' base addresses and keys remotely, and a GDRCopy mapping when
/// the region is device memory (so signals into it can be applied from
/// the host).
pub struct GinMrHandle {
    pub(crate) base: u64,
    pub(crate) size: usize,
    pub(crate) mr_type: MrType,
    pub(crate) rails: Vec<RegisteredMr>,
    pub(crate) _pool_key: Option<PoolKey>,
    pub(crate) gdr: Option<Arc<GdrPinnedRegion>>,
    pub(crate) remote: Vec<RemoteMrInfo>,
}

unsafe impl Send for GinMrHandle {}

impl GinMrHandle {
    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn mr_type(&self) -> MrType {
        self.mr_type
    }

    fn remote(&self, rank: u32) -> Result<&RemoteMrInfo> {
        self.remote
            .get(rank as usize)
            .ok_or(CollNetError::InvalidArgument("peer rank out of range"))
    }
}

/// One GIN collective communicator.
pub struct GinComm {
    resources: Arc<GinResources>,
    state: Arc<Mutex<GinCommState>>,
    ring: Mutex<Box<dyn RingChannel>>,
    local_comm_id: u32,
    rank: u32,
    nranks: u32,
    detached: bool,
}

unsafe impl Send for GinComm {}

impl GinComm {
    /// Establish a communicator over `nranks` ranks. `ring` is the
    /// transport's connected bootstrap ring (next/previous neighbor);
    /// every rank's rail addresses and write-ack buffer info are
    /// exchanged over it, and all peers are inserted into the rail
    /// address vectors.
    pub fn connect(
        resources: Arc<GinResources>,
        rank: u32,
        nranks: u32,
        mut ring: Box<dyn RingChannel>,
    ) -> Result<GinComm> {
        if nranks == 0 || rank >= nranks {
            return Err(CollNetError::InvalidArgument("bad rank/nranks"));
        }
        debug!(rank, nranks, "gin connect");

        let (local_comm_id, my_handle, metadata_fl, num_rails) = {
            let mut inner = resources.inner.lock();
            let local_comm_id = inner.alloc_comm_id()?;
            let num_rails = inner.ep.num_rails;
            let mut rail_addrs = Vec::with_capacity(num_rails as usize);
            let mut control_rail_addrs = Vec::with_capacity(num_rails as usize);
            let mut write_ack_buff_keys = Vec::with_capacity(num_rails as usize);
            for r in 0..num_rails as usize {
                rail_addrs.push(inner.ep.rails[r].address()?);
                control_rail_addrs.push(inner.ep.control_rails[r].address()?);
                write_ack_buff_keys.push(inner.ep.ack_buffer.key(r as u16));
            }
            let handle = GinConnectHandle {
                comm_id: local_comm_id,
                num_rails,
                rail_addrs,
                control_rail_addrs,
                write_ack_buff_addr: inner.ep.ack_buffer.addr(),
                write_ack_buff_keys,
            };
            let metadata_fl = Freelist::new(
                GinChunkRegistrar::new(
                    &inner.domains,
                    inner.mr_key_pool.clone(),
                    (FI_SEND | FI_RECV) as u64,
                ),
                METADATA_MSG_SIZE,
                16,
                None,
            )?;
            (local_comm_id, handle, metadata_fl, num_rails)
        };

        // Exchange handles outside the resources lock; the ring may
        // block.
        let block = bincode::serialize(&my_handle)
            .map_err(|_| CollNetError::Custom("bootstrap handle serialization"))?;
        let block_size = block.len();
        let mut data = vec![0u8; block_size * nranks as usize];
        data[rank as usize * block_size..][..block_size].copy_from_slice(&block);
        ring_allgather(ring.as_mut(), rank, nranks, block_size, &mut data)?;

        let mut inner = resources.inner.lock();
        let mut state = GinCommState {
            local_comm_id,
            rank,
            nranks,
            num_rails,
            peers: Vec::with_capacity(nranks as usize),
            data_addr_to_rank: vec![HashMap::new(); num_rails as usize],
            ctrl_addr_to_rank: vec![HashMap::new(); num_rails as usize],
            reassembly: ReassemblyTable::default(),
            outstanding_acks: 0,
            metadata_fl,
            signal_targets: HashMap::new(),
            next_rail: 0,
        };
        for i in 0..nranks {
            let handle: GinConnectHandle = bincode::deserialize(
                &data[i as usize * block_size..][..block_size],
            )
            .map_err(|_| CollNetError::Protocol("bad bootstrap handle"))?;
            if handle.num_rails != num_rails
                || handle.rail_addrs.len() != num_rails as usize
                || handle.control_rail_addrs.len() != num_rails as usize
                || handle.write_ack_buff_keys.len() != num_rails as usize
            {
                return Err(CollNetError::Protocol("peer rail count mismatch"));
            }
            if handle.comm_id > imm::COMM_ID_MASK {
                return Err(CollNetError::Protocol("peer comm id out of range"));
            }
            let mut peer = PeerState {
                comm_id: handle.comm_id,
                data_addr: Vec::with_capacity(num_rails as usize),
                ctrl_addr: Vec::with_capacity(num_rails as usize),
                write_ack_buff_addr: handle.write_ack_buff_addr,
                write_ack_buff_keys: handle.write_ack_buff_keys.clone(),
                next_seq: 0,
                next_deliver: 0,
                active_put_signal: [false; MAX_INFLIGHT_PUT_SIGNAL],
            };
            for r in 0..num_rails as usize {
                let addr = inner.ep.rails[r].insert_address(&handle.rail_addrs[r])?;
                if state.data_addr_to_rank[r].insert(addr, i).is_some() {
                    return Err(CollNetError::Protocol("duplicate peer address"));
                }
                peer.data_addr.push(addr);

                let addr = inner.ep.control_rails[r]
                    .insert_address(&handle.control_rail_addrs[r])?;
                if state.ctrl_addr_to_rank[r].insert(addr, i).is_some() {
                    return Err(CollNetError::Protocol("duplicate peer address"));
                }
                peer.ctrl_addr.push(addr);
            }
            state.peers.push(peer);
        }

        let state = Arc::new(Mutex::new(state));
        inner.comms.insert(local_comm_id, state.clone());
        drop(inner);

        Ok(GinComm {
            resources,
            state,
            ring: Mutex::new(ring),
            local_comm_id,
            rank,
            nranks,
            detached: false,
        })
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn nranks(&self) -> u32 {
        self.nranks
    }

    /// Register a symmetric region on every rail and exchange its
    /// remote view (base address + per-rail keys) with all peers.
    pub fn reg_mr(
        &self,
        ptr: NonNull<c_void>,
        size: usize,
        mr_type: MrType,
    ) -> Result<GinMrHandle> {
        let (rails, pool_key, gdr, num_rails) = {
            let inner = self.resources.inner.lock();
            let iface = match mr_type {
                MrType::Host => MemIface::System,
                MrType::Device => {
                    let device = cuda_lib::rt::device_id_for_ptr(ptr)
                        .map_err(cuda_lib::CudaError::Cudart)?;
                    MemIface::Cuda { device }
                }
            };
            let pool_key = match &inner.mr_key_pool {
                Some(pool) => Some(PoolKey::allocate(pool).ok_or(
                    CollNetError::ResourceExhausted("registration key pool"),
                )?),
                None => None,
            };
            let mut rails = Vec::with_capacity(inner.domains.len());
            for domain in &inner.domains {
                rails.push(fabric::register_memory(
                    domain.domain(),
                    None,
                    pool_key.as_ref().map(PoolKey::key),
                    ptr.as_ptr(),
                    size,
                    (FI_WRITE | FI_REMOTE_WRITE) as u64,
                    iface,
                )?);
            }
            let gdr = match mr_type {
                MrType::Host => None,
                MrType::Device => {
                    let ctx = inner.gdr.as_ref().ok_or(CollNetError::Custom(
                        "device registration without gdrcopy support",
                    ))?;
                    // Failure here unwinds through the rail MRs, which
                    // deregister on drop.
                    Some(Arc::new(ctx.pin_and_map(ptr.as_ptr() as u64, size)?))
                }
            };
            (rails, pool_key, gdr, inner.ep.num_rails)
        };

        let mut handle = GinMrHandle {
            base: ptr.as_ptr() as u64,
            size,
            mr_type,
            rails,
            _pool_key: pool_key,
            gdr,
            remote: vec![RemoteMrInfo::default(); self.nranks as usize],
        };
        let mut my_info = RemoteMrInfo {
            addr: handle.base,
            num_rails,
            keys: [0; MAX_NUM_RAILS],
        };
        for (r, mr) in handle.rails.iter().enumerate() {
            let key = mr.key();
            if key == libfabric_sys::FI_KEY_NOTAVAIL {
                return Err(CollNetError::Custom("provider returned no MR key"));
            }
            my_info.keys[r] = key;
        }
        handle.remote[self.rank as usize] = my_info;

        // Exchange remote views over the bootstrap ring.
        let block = bincode::serialize(&my_info)
            .map_err(|_| CollNetError::Custom("remote MR serialization"))?;
        let block_size = block.len();
        let mut data = vec![0u8; block_size * self.nranks as usize];
        data[self.rank as usize * block_size..][..block_size]
            .copy_from_slice(&block);
        {
            let mut ring = self.ring.lock();
            ring_allgather(
                ring.as_mut(),
                self.rank,
                self.nranks,
                block_size,
                &mut data,
            )?;
        }
        for i in 0..self.nranks as usize {
            if i == self.rank as usize {
                continue;
            }
            handle.remote[i] = bincode::deserialize(
                &data[i * block_size..][..block_size],
            )
            .map_err(|_| CollNetError::Protocol("bad remote MR info"))?;
        }

        let target = match &handle.gdr {
            Some(region) => SignalTarget::Device(region.clone()),
            None => SignalTarget::Host,
        };
        let mut st = self.state.lock();
        if st.signal_targets.contains_key(&handle.base) {
            return Err(CollNetError::InvalidArgument("region already registered"));
        }
        st.signal_targets.insert(handle.base, target);
        Ok(handle)
    }

    /// Drop a symmetric registration. The handle's provider MRs, key,
    /// and GDRCopy mapping are released with it.
    pub fn dereg_mr(&self, handle: GinMrHandle) -> Result<()> {
        let mut st = self.state.lock();
        if st.signal_targets.remove(&handle.base).is_none() {
            warn!(base = handle.base, "deregistration of unknown region");
        }
        Ok(())
    }

    /// Put `size` bytes and/or a signal update to `peer`, returning a
    /// request whose `test()` reports completion only after the
    /// receiver has applied the signal and acked the sequence slot.
    #[allow(clippy::too_many_arguments)]
    pub fn iput_signal(
        &self,
        src_off: u64,
        src_mr: &GinMrHandle,
        size: usize,
        dst_off: u64,
        dst_mr: &GinMrHandle,
        peer: u32,
        sig_off: u64,
        sig_mr: Option<&GinMrHandle>,
        sig_val: u64,
        sig_op: SignalOp,
    ) -> Result<IputSignalRequest> {
        if peer >= self.nranks {
            return Err(CollNetError::InvalidArgument("peer rank out of range"));
        }
        if sig_op != SignalOp::None && sig_mr.is_none() {
            return Err(CollNetError::InvalidArgument(
                "signal op without signal region",
            ));
        }
        if size == 0 && sig_op == SignalOp::None {
            return Err(CollNetError::InvalidArgument(
                "empty put with no signal",
            ));
        }

        let mut inner = self.resources.inner.lock();
        let mut st = self.state.lock();

        let (seq, remote_comm_id, data_addr, ctrl_addr) = {
            let p = &st.peers[peer as usize];
            let seq = p.next_seq;
            if p.active_put_signal[seq as usize % MAX_INFLIGHT_PUT_SIGNAL] {
                // The runtime's inflight cap should make this
                // impossible.
                return Err(CollNetError::Protocol(
                    "sequence slot already in flight",
                ));
            }
            (seq, p.comm_id, p.data_addr.clone(), p.ctrl_addr.clone())
        };
        let rail = st.next_rail;
        st.next_rail = (st.next_rail + 1) % st.num_rails;

        let num_segments =
            (size > 0) as u32 + (sig_op != SignalOp::None) as u32;
        let parent = Arc::new(Mutex::new(IputState {
            write_pending: size > 0,
            metadata_pending: sig_op != SignalOp::None,
        }));

        if size > 0 {
            let post = WritePost {
                ep: inner.ep.rails[rail as usize].ep(),
                buf: (src_mr.base + src_off) as *const c_void,
                len: size,
                desc: src_mr.rails[rail as usize].desc(),
                imm_data: imm::pack(remote_comm_id, seq, num_segments),
                dest: data_addr[rail as usize],
                remote_addr: dst_mr.remote(peer)?.addr + dst_off,
                remote_key: dst_mr.remote(peer)?.keys[rail as usize],
            };
            let req = GinRequest::new(GinReqKind::Write(GinWriteReq {
                post,
                parent: parent.clone(),
            }));
            let ptr = inner.reqs.insert(req);
            match inner.post_req(ptr) {
                Ok(PostOutcome::Posted) => {}
                Ok(PostOutcome::Again) => inner.pending.push_back(ptr),
                Err(e) => {
                    inner.reqs.take(ptr);
                    return Err(e);
                }
            }
        }

        if sig_op != SignalOp::None {
            let sig = sig_mr.ok_or(CollNetError::InvalidArgument(
                "signal op without signal region",
            ))?;
            let value = match sig_op {
                SignalOp::Inc => 1,
                SignalOp::Add => sig_val,
                SignalOp::None => 0,
            };
            let msg = SignalMetadataMsg {
                msg_seq_num: seq as u32,
                remote_comm_id,
                num_segments,
                signal_base_address: sig.remote(peer)?.addr,
                signal_offset: sig_off,
                signal_value: value,
            };
            let mut elem = st.metadata_fl.alloc()?;
            msg.encode(elem.as_mut_slice());
            let desc = st.metadata_fl.desc(&elem, rail);
            let post = SendPost {
                ep: inner.ep.control_rails[rail as usize].ep(),
                buf: elem.ptr().as_ptr() as *const c_void,
                len: METADATA_MSG_SIZE,
                desc,
                dest: ctrl_addr[rail as usize],
            };
            let req = GinRequest::new(GinReqKind::MetaSend(GinMetaSendReq {
                post,
                parent: parent.clone(),
                elem: Some(elem),
                comm: self.state.clone(),
            }));
            let ptr = inner.reqs.insert(req);
            match inner.post_req(ptr) {
                Ok(PostOutcome::Posted) => {}
                Ok(PostOutcome::Again) => inner.pending.push_back(ptr),
                Err(e) => {
                    if let Some(req) = inner.reqs.take(ptr) {
                        if let GinReqKind::MetaSend(mut m) = req.kind {
                            if let Some(elem) = m.elem.take() {
                                st.free_metadata(elem);
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }

        let p = &mut st.peers[peer as usize];
        p.active_put_signal[seq as usize % MAX_INFLIGHT_PUT_SIGNAL] = true;
        p.next_seq = imm::next_seq(seq);

        Ok(IputSignalRequest {
            state: parent,
            comm: self.state.clone(),
            peer,
            seq,
        })
    }

    /// Plain put without a signal. Still sequenced and acked like a
    /// signaled put, so later signals from this rank stay ordered
    /// behind it.
    pub fn iput(
        &self,
        src_off: u64,
        src_mr: &GinMrHandle,
        size: usize,
        dst_off: u64,
        dst_mr: &GinMrHandle,
        peer: u32,
    ) -> Result<IputSignalRequest> {
        self.iput_signal(
            src_off,
            src_mr,
            size,
            dst_off,
            dst_mr,
            peer,
            0,
            None,
            0,
            SignalOp::None,
        )
    }

    /// Drive completions across all rails and retry refused posts.
    pub fn progress(&self) -> Result<()> {
        self.resources.inner.lock().progress()
    }

    /// Close the communicator, waiting for every posted ack write to
    /// complete first.
    pub fn close(mut self) -> Result<()> {
        loop {
            self.resources.inner.lock().progress()?;
            if self.state.lock().outstanding_acks == 0 {
                break;
            }
            std::hint::spin_loop();
        }
        self.detach();
        Ok(())
    }

    fn detach(&mut self) {
        if !self.detached {
            self.detached = true;
            let mut inner = self.resources.inner.lock();
            inner.comms.remove(&self.local_comm_id);
            inner.comm_ids.free(self.local_comm_id as u64);
        }
    }
}

impl Drop for GinComm {
    fn drop(&mut self) {
        if !self.detached && self.state.lock().outstanding_acks != 0 {
            warn!(
                comm_id = self.local_comm_id,
                "communicator dropped with outstanding acks"
            );
        }
        self.detach();
    }
}
