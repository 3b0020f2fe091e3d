//! GPU-initiated networking: the multi-rail put-with-signal engine.
//!
//! Senders split each signaled put into an RDMA write-with-immediate on
//! a data rail and a small metadata send on the paired control rail.
//! Receivers reassemble the two per (peer, sequence), apply signals in
//! strict per-peer sequence order, and release the sender's sequence
//! slot with a zero-byte ack write.

pub(crate) mod comm;
pub(crate) mod imm;
pub(crate) mod rails;
pub(crate) mod reassembly;
pub(crate) mod reqs;
pub(crate) mod wire;

use std::{
    collections::{HashMap, VecDeque},
    ffi::{c_int, c_void},
    mem::MaybeUninit,
    ptr::NonNull,
    sync::Arc,
};

use cuda_lib::gdr::GdrCopyContext;
use libfabric_sys::{
    FI_EAGAIN, FI_EAVAIL, FI_ECANCELED, FI_RECV, FI_REMOTE_WRITE, fi_addr_t,
    fi_cq_data_entry, fi_cq_err_entry, fi_cq_readerr, fi_cq_readfrom, fi_cq_strerror,
    fid_cq,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use comm::{GinComm, GinMrHandle};
pub use reqs::IputSignalRequest;

use crate::{
    api::EndpointAddress,
    error::{CollNetError, LibfabricError, Result},
    fabric::{FabricDomain, SharedKeyPool},
    freelist::Freelist,
    gin::{
        imm::ACK_SEG_COUNT,
        rails::{GinChunkRegistrar, GinEndpoint, rx_pool_access},
        reqs::{GinReqKind, GinRequest, GinRxReq, post_rx},
        wire::{METADATA_MSG_SIZE, SignalMetadataMsg},
    },
    idpool::IdPool,
    reqs::{ReqTable, ctx_of, from_ctx},
    utils::{env_usize, pending, pending::PostOutcome},
};

/// The connected ring the transport hands over for bootstrap exchanges.
/// `send_next` / `recv_prev` are blocking message sends to the next and
/// from the previous rank on the ring.
#[cfg_attr(test, mockall::automock)]
pub trait RingChannel: Send {
    fn send_next(&mut self, buf: &[u8]) -> Result<()>;
    fn recv_prev(&mut self, buf: &mut [u8]) -> Result<()>;
}

/// Ring all-gather of equal-size per-rank blocks. `data` holds `nranks`
/// blocks of `block_size` bytes with this rank's block filled in; after
/// `nranks - 1` forwarding steps every block is populated.
pub(crate) fn ring_allgather(
    ring: &mut dyn RingChannel,
    rank: u32,
    nranks: u32,
    block_size: usize,
    data: &mut [u8],
) -> Result<()> {
    if data.len() != block_size * nranks as usize {
        return Err(CollNetError::InvalidArgument("allgather buffer size"));
    }
    for step in 0..nranks.saturating_sub(1) {
        let send_idx = ((rank + nranks - step) % nranks) as usize;
        let recv_idx = ((rank + nranks - step - 1) % nranks) as usize;
        let send_block = data[send_idx * block_size..][..block_size].to_vec();
        ring.send_next(&send_block)?;
        ring.recv_prev(&mut data[recv_idx * block_size..][..block_size])?;
    }
    Ok(())
}

/// Per-rank bootstrap handle exchanged over the ring at connect time.
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct GinConnectHandle {
    pub comm_id: u32,
    pub num_rails: u16,
    pub rail_addrs: Vec<EndpointAddress>,
    pub control_rail_addrs: Vec<EndpointAddress>,
    pub write_ack_buff_addr: u64,
    pub write_ack_buff_keys: Vec<u64>,
}

/// Shared per-domain GIN state: the rails, the request registry, the
/// pending queue, and the communicators keyed by local comm id.
pub struct GinResources {
    pub(crate) inner: Mutex<GinInner>,
}

unsafe impl Send for GinResources {}
unsafe impl Sync for GinResources {}

impl GinResources {
    /// Build the GIN endpoint over one provider domain per rail and
    /// pre-post the receive pool.
    pub fn new(
        domains: Vec<FabricDomain>,
        gdr: Option<GdrCopyContext>,
        mr_key_pool: SharedKeyPool,
        num_comm_ids: usize,
    ) -> Result<Arc<GinResources>> {
        let ep = GinEndpoint::new(&domains, &mr_key_pool)?;
        let num_buffers = env_usize("COLLNET_GIN_RX_BUFFERS", 2048);
        let registrar =
            GinChunkRegistrar::new(&domains, mr_key_pool.clone(), rx_pool_access());
        // Data and control rails each get a share of the pool.
        let rx_fl = Freelist::new(
            registrar,
            METADATA_MSG_SIZE,
            num_buffers * 2,
            Some(num_buffers * 2),
        )?;

        let mut inner = GinInner {
            reqs: ReqTable::new(),
            pending: VecDeque::new(),
            comms: HashMap::new(),
            comm_ids: IdPool::new(num_comm_ids),
            rx_fl,
            ep,
            gdr,
            mr_key_pool,
            domains,
        };
        inner.post_rx_buffers(num_buffers)?;
        Ok(Arc::new(GinResources { inner: Mutex::new(inner) }))
    }
}

pub(crate) struct GinInner {
    // Declaration order is teardown order; rail endpoints are closed in
    // drop() before any request or registration is released.
    pub reqs: ReqTable<GinRequest>,
    pub pending: VecDeque<NonNull<GinRequest>>,
    pub comms: HashMap<u32, Arc<Mutex<comm::GinCommState>>>,
    pub comm_ids: IdPool,
    pub rx_fl: Freelist<GinChunkRegistrar>,
    pub ep: GinEndpoint,
    pub gdr: Option<GdrCopyContext>,
    pub mr_key_pool: SharedKeyPool,
    pub domains: Vec<FabricDomain>,
}

impl GinInner {
    fn post_rx_buffers(&mut self, num_buffers: usize) -> Result<()> {
        let num_rails = self.ep.num_rails as usize;
        let per_rail = (num_buffers / num_rails).max(1);
        for rail in 0..num_rails {
            for is_control in [false, true] {
                for _ in 0..per_rail {
                    let elem = self.rx_fl.alloc()?;
                    let desc = self.rx_fl.desc(&elem, rail as u16);
                    let ep = if is_control {
                        self.ep.control_rails[rail].ep()
                    } else {
                        self.ep.rails[rail].ep()
                    };
                    let req = GinRequest::new(GinReqKind::Rx(GinRxReq {
                        elem,
                        rail_id: rail as u16,
                        is_control,
                        ep,
                        desc,
                    }));
                    let ptr = self.reqs.insert(req);
                    match self.post_req(ptr)? {
                        PostOutcome::Posted => {}
                        PostOutcome::Again => self.pending.push_back(ptr),
                    }
                }
            }
        }
        Ok(())
    }

    /// Post (or re-post) the provider operation behind a request.
    pub fn post_req(&mut self, ptr: NonNull<GinRequest>) -> Result<PostOutcome> {
        let GinInner { reqs, .. } = self;
        Self::post_req_in(reqs, ptr)
    }

    fn post_req_in(
        reqs: &mut ReqTable<GinRequest>,
        ptr: NonNull<GinRequest>,
    ) -> Result<PostOutcome> {
        let ctx = ctx_of(ptr);
        let req = reqs
            .get_mut(ptr)
            .ok_or(CollNetError::Protocol("post of unknown request"))?;
        match &req.kind {
            GinReqKind::Rx(rx) => post_rx(rx, ctx),
            GinReqKind::Write(w) => w.post.post(ctx),
            GinReqKind::MetaSend(m) => m.post.post(ctx),
            GinReqKind::WriteAck(a) => a.post.post(ctx),
        }
    }

    /// Drive all rails, then retry refused posts in FIFO order.
    pub fn progress(&mut self) -> Result<()> {
        self.process_cq()?;
        let GinInner { pending, reqs, .. } = self;
        pending::drain(pending, |ptr| Self::post_req_in(reqs, ptr))
    }

    pub fn process_cq(&mut self) -> Result<()> {
        for i in 0..self.ep.rails.len() {
            let cq = self.ep.rails[i].cq();
            self.poll_rail(cq, i as u16, false)?;
        }
        for i in 0..self.ep.control_rails.len() {
            let cq = self.ep.control_rails[i].cq();
            self.poll_rail(cq, i as u16, true)?;
        }
        Ok(())
    }

    fn poll_rail(
        &mut self,
        cq: NonNull<fid_cq>,
        rail_id: u16,
        is_control: bool,
    ) -> Result<()> {
        const READ_COUNT: usize = 16;
        loop {
            let mut cqes = MaybeUninit::<[fi_cq_data_entry; READ_COUNT]>::uninit();
            let mut src_addrs = [libfabric_sys::FI_ADDR_UNSPEC; READ_COUNT];
            let ret = unsafe {
                fi_cq_readfrom(
                    cq.as_ptr(),
                    cqes.as_mut_ptr() as *mut c_void,
                    READ_COUNT,
                    src_addrs.as_mut_ptr(),
                )
            };
            if ret > 0 {
                let cqes = unsafe { cqes.assume_init() };
                for (cqe, src) in cqes.iter().zip(src_addrs).take(ret as usize) {
                    self.handle_rail_cqe(cqe, src, rail_id, is_control)?;
                }
            } else if ret == -(FI_EAVAIL as isize) {
                self.handle_cq_error(cq)?;
            } else if ret == -(FI_EAGAIN as isize) {
                return Ok(());
            } else {
                return Err(
                    LibfabricError::new(ret as c_int, "fi_cq_readfrom").into()
                );
            }
        }
    }

    fn handle_rail_cqe(
        &mut self,
        cqe: &fi_cq_data_entry,
        src: fi_addr_t,
        rail_id: u16,
        is_control: bool,
    ) -> Result<()> {
        if cqe.flags & FI_REMOTE_WRITE as u64 != 0 {
            // A peer's write landed here; the immediate word says which
            // communicator and what it was.
            let (comm_id, seq, nseg) = imm::unpack(cqe.data as u32);
            let comm = self
                .comms
                .get(&comm_id)
                .cloned()
                .ok_or(CollNetError::InvalidArgument(
                    "unknown communicator id in immediate data",
                ))?;
            if nseg == ACK_SEG_COUNT {
                if cqe.len != 0 {
                    return Err(CollNetError::Protocol("ack write with payload"));
                }
                comm::handle_ack(&comm, src, rail_id, seq)?;
            } else {
                comm::handle_write_segment(self, &comm, src, rail_id, seq, nseg)?;
            }
            // The write consumed a posted receive; put it back.
            self.repost_consumed_rx(cqe.op_context)?;
            return Ok(());
        }

        let ptr = from_ctx::<GinRequest>(cqe.op_context)
            .ok_or(CollNetError::Protocol("completion without request context"))?;
        let is_rx = cqe.flags & FI_RECV as u64 != 0;
        if is_rx {
            let msg = {
                let req = self.reqs.get_mut(ptr).ok_or(CollNetError::Protocol(
                    "rx completion for unknown request",
                ))?;
                let GinReqKind::Rx(rx) = &req.kind else {
                    return Err(CollNetError::Protocol(
                        "recv completion on non-rx request",
                    ));
                };
                debug_assert!(is_control && rx.is_control && rx.rail_id == rail_id);
                SignalMetadataMsg::decode(rx.elem.as_slice())?
            };
            let comm = self
                .comms
                .get(&(msg.remote_comm_id & imm::COMM_ID_MASK))
                .cloned()
                .ok_or(CollNetError::InvalidArgument(
                    "unknown communicator id in signal metadata",
                ))?;
            comm::handle_metadata(self, &comm, src, rail_id, &msg)?;
            match self.post_req(ptr)? {
                PostOutcome::Posted => {}
                PostOutcome::Again => self.pending.push_back(ptr),
            }
            return Ok(());
        }

        // Local send/write completions are one-shot.
        let req = self
            .reqs
            .take(ptr)
            .ok_or(CollNetError::Protocol("completion for unknown request"))?;
        match req.kind {
            GinReqKind::Rx(_) => {
                Err(CollNetError::Protocol("non-recv completion on rx request"))
            }
            GinReqKind::Write(w) => {
                w.parent.lock().write_pending = false;
                Ok(())
            }
            GinReqKind::MetaSend(mut m) => {
                m.parent.lock().metadata_pending = false;
                if let Some(elem) = m.elem.take() {
                    m.comm.lock().free_metadata(elem);
                }
                Ok(())
            }
            GinReqKind::WriteAck(a) => {
                let mut st = a.comm.lock();
                if st.outstanding_acks == 0 {
                    return Err(CollNetError::Protocol(
                        "ack completion with no outstanding acks",
                    ));
                }
                st.outstanding_acks -= 1;
                Ok(())
            }
        }
    }

    /// A remote write-with-immediate consumes one pre-posted receive on
    /// providers that deliver it through the receive path. When the
    /// completion carries the consumed request's context, re-post it.
    fn repost_consumed_rx(&mut self, op_context: *mut c_void) -> Result<()> {
        let Some(ptr) = from_ctx::<GinRequest>(op_context) else {
            return Ok(());
        };
        let is_rx = self
            .reqs
            .get_mut(ptr)
            .is_some_and(|req| matches!(req.kind, GinReqKind::Rx(_)));
        if !is_rx {
            return Ok(());
        }
        match self.post_req(ptr)? {
            PostOutcome::Posted => {}
            PostOutcome::Again => self.pending.push_back(ptr),
        }
        Ok(())
    }

    fn handle_cq_error(&mut self, cq: NonNull<fid_cq>) -> Result<()> {
        let mut err_entry = fi_cq_err_entry::default();
        let ret = unsafe { fi_cq_readerr(cq.as_ptr(), &raw mut err_entry, 0) };
        if ret < 0 {
            return Err(LibfabricError::new(ret as c_int, "fi_cq_readerr").into());
        }
        if err_entry.err == FI_ECANCELED as c_int {
            return Ok(());
        }
        let errmsg = unsafe {
            std::ffi::CStr::from_ptr(fi_cq_strerror(
                cq.as_ptr(),
                err_entry.prov_errno,
                err_entry.err_data,
                std::ptr::null_mut(),
                0,
            ))
            .to_string_lossy()
            .into_owned()
        };
        warn!(
            err = err_entry.err,
            prov_errno = err_entry.prov_errno,
            msg = %errmsg,
            "request completed with error"
        );
        Err(LibfabricError::new(-err_entry.err, "cq error entry").into())
    }

    pub fn alloc_comm_id(&mut self) -> Result<u32> {
        let id = self
            .comm_ids
            .allocate()
            .ok_or(CollNetError::ResourceExhausted("communicator id pool"))?;
        debug!(id, "allocated communicator id");
        Ok(id as u32)
    }
}

impl Drop for GinInner {
    fn drop(&mut self) {
        // Posted buffers and requests pin their registrations; close
        // the rail endpoints before anything else unwinds.
        self.ep.close_endpoints();
    }
}
