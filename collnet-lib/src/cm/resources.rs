//! Shared connection-manager state: the endpoint, the registered
//! connect-message buffer pool, the callback map routing received
//! messages by connector id, and the queue of posts the provider
//! refused.

use std::{
    collections::{HashMap, VecDeque},
    ffi::{c_int, c_void},
    mem::MaybeUninit,
    ptr::NonNull,
};

use libfabric_sys::{
    FI_EAGAIN, FI_EAVAIL, FI_ECANCELED, FI_RECV, FI_SEND, fi_close, fi_cq_data_entry,
    fi_cq_err_entry, fi_cq_read, fi_cq_readerr, fi_cq_strerror, fid_cq,
};
use tracing::{debug, warn};

use crate::{
    api::EpName,
    cm::{
        reqs::{CmReqKind, CmRequest, RxReq},
        wire::{ConnMsg, conn_msg_size},
    },
    ep::{Endpoint, EpChunkRegistrar},
    error::{CollNetError, LibfabricError, Result},
    fabric::{self, FabricDomain, SharedKeyPool},
    freelist::Freelist,
    idpool::IdPool,
    reqs::{ReqTable, ctx_of, from_ctx},
    utils::{env_usize, pending, pending::PostOutcome},
};

pub(crate) type ConnMsgCallback = Box<dyn FnMut(&ConnMsg) + Send>;

struct CqGuard(NonNull<fid_cq>);

impl Drop for CqGuard {
    fn drop(&mut self) {
        unsafe { fi_close(&raw mut self.0.as_mut().fid) };
    }
}

pub(crate) struct CmResources {
    // Declaration order doubles as teardown order: requests first, then
    // the buffer pool (registration close), then the endpoint wrapper
    // and its CQ. The provider endpoint itself is closed in drop()
    // before any of that, since posted buffers pin their registrations.
    reqs: ReqTable<CmRequest>,
    pending: VecDeque<NonNull<CmRequest>>,
    callback_map: HashMap<u32, ConnMsgCallback>,
    buf_pool: Freelist<EpChunkRegistrar>,
    connector_ids: IdPool,
    conn_msg_data_size: usize,
    conn_ep_name: EpName,
    use_inject: bool,
    ep: Endpoint,
    cq: CqGuard,
}

impl CmResources {
    pub fn new(
        domain: &FabricDomain,
        conn_msg_data_size: usize,
        num_connector_ids: usize,
        mr_key_pool: SharedKeyPool,
    ) -> Result<Self> {
        let cq = CqGuard(fabric::open_cq(domain, 256)?);
        let ep = Endpoint::new(domain, cq.0, mr_key_pool)?;
        let conn_ep_name = ep.get_own_address()?;

        let buf_pool = Freelist::new(
            ep.chunk_registrar((FI_SEND | FI_RECV) as u64),
            conn_msg_size(conn_msg_data_size),
            16,
            None,
        )?;

        let mut resources = CmResources {
            reqs: ReqTable::new(),
            pending: VecDeque::new(),
            callback_map: HashMap::new(),
            buf_pool,
            connector_ids: IdPool::new(num_connector_ids),
            conn_msg_data_size,
            conn_ep_name,
            use_inject: domain.auto_progress(),
            ep,
            cq,
        };
        resources.post_rx_buffers()?;
        Ok(resources)
    }

    fn post_rx_buffers(&mut self) -> Result<()> {
        let num_rx = env_usize("COLLNET_CM_RX_BUFFERS", 16);
        for _ in 0..num_rx {
            let elem = self.buf_pool.alloc()?;
            let req = CmRequest::new(CmReqKind::Rx(RxReq { elem }));
            let ptr = self.reqs.insert(req);
            match self.post_req(ptr)? {
                PostOutcome::Posted => {}
                PostOutcome::Again => self.pending.push_back(ptr),
            }
        }
        Ok(())
    }

    pub fn conn_ep_name(&self) -> EpName {
        self.conn_ep_name
    }

    pub fn conn_msg_data_size(&self) -> usize {
        self.conn_msg_data_size
    }

    /// True when CONNECT_RESP can take the inject fast path: the
    /// provider progresses automatically and the message fits the
    /// inject limit.
    pub fn use_inject_for(&self, msg_size: usize) -> bool {
        self.use_inject && msg_size <= self.ep.max_inject_size()
    }

    pub fn ep(&self) -> &Endpoint {
        &self.ep
    }

    pub fn alloc_connector_id(&mut self) -> Result<u32> {
        let id = self
            .connector_ids
            .allocate()
            .ok_or(CollNetError::ResourceExhausted("connector id pool"))?;
        Ok(id as u32)
    }

    pub fn free_connector_id(&mut self, id: u32) {
        self.connector_ids.free(id as u64);
    }

    pub fn register_callback(
        &mut self,
        id: u32,
        callback: ConnMsgCallback,
    ) -> Result<()> {
        if self.callback_map.insert(id, callback).is_some() {
            return Err(CollNetError::Protocol("duplicate connector id insert"));
        }
        Ok(())
    }

    pub fn remove_callback(&mut self, id: u32) {
        if self.callback_map.remove(&id).is_none() {
            warn!(id, "removal of unknown connector id");
        }
    }

    pub fn alloc_conn_msg(&mut self, msg: &ConnMsg) -> Result<crate::freelist::FlElem> {
        let mut elem = self.buf_pool.alloc()?;
        msg.encode(elem.as_mut_slice());
        Ok(elem)
    }

    pub fn insert_request(&mut self, req: Box<CmRequest>) -> NonNull<CmRequest> {
        self.reqs.insert(req)
    }

    pub fn enqueue_pending(&mut self, ptr: NonNull<CmRequest>) {
        self.pending.push_back(ptr);
    }

    /// Post (or re-post) the provider operation behind a request.
    pub fn post_req(&mut self, ptr: NonNull<CmRequest>) -> Result<PostOutcome> {
        Self::post_req_parts(&self.ep, &self.buf_pool, &mut self.reqs, ptr)
    }

    fn post_req_parts(
        ep: &Endpoint,
        buf_pool: &Freelist<EpChunkRegistrar>,
        reqs: &mut ReqTable<CmRequest>,
        ptr: NonNull<CmRequest>,
    ) -> Result<PostOutcome> {
        let ctx = ctx_of(ptr);
        let req = reqs
            .get_mut(ptr)
            .ok_or(CollNetError::Protocol("post of unknown request"))?;
        match &mut req.kind {
            CmReqKind::Rx(rx) => {
                let desc = buf_pool.desc(&rx.elem, 0);
                ep.post_recv(
                    rx.elem.ptr().as_ptr() as *mut c_void,
                    rx.elem.as_slice().len(),
                    desc,
                    ctx,
                )
            }
            CmReqKind::SendConn(send) => {
                let desc = buf_pool.desc(&send.elem, 0);
                ep.post_send(
                    send.elem.ptr().as_ptr() as *const c_void,
                    send.elem.as_slice().len(),
                    desc,
                    send.dest,
                    ctx,
                )
            }
            CmReqKind::SendConnResp(send) => {
                let desc = buf_pool.desc(&send.elem, 0);
                ep.post_send(
                    send.elem.ptr().as_ptr() as *const c_void,
                    send.elem.as_slice().len(),
                    desc,
                    send.dest,
                    ctx,
                )
            }
        }
    }

    /// Drive the CM: drain the completion queue, then retry every
    /// pending request in FIFO order.
    pub fn progress(&mut self) -> Result<()> {
        self.poll_cq()?;
        pending::drain(&mut self.pending, |ptr| {
            Self::post_req_parts(&self.ep, &self.buf_pool, &mut self.reqs, ptr)
        })
    }

    fn poll_cq(&mut self) -> Result<()> {
        const READ_COUNT: usize = 16;
        loop {
            let mut cqes = MaybeUninit::<[fi_cq_data_entry; READ_COUNT]>::uninit();
            let ret = unsafe {
                fi_cq_read(
                    self.cq.0.as_ptr(),
                    cqes.as_mut_ptr() as *mut c_void,
                    READ_COUNT,
                )
            };
            if ret > 0 {
                let cqes = unsafe { cqes.assume_init() };
                for cqe in cqes.iter().take(ret as usize) {
                    self.handle_cqe(cqe)?;
                }
            } else if ret == -(FI_EAVAIL as isize) {
                self.handle_cq_error()?;
            } else if ret == -(FI_EAGAIN as isize) {
                return Ok(());
            } else {
                return Err(
                    LibfabricError::new(ret as c_int, "fi_cq_read").into()
                );
            }
        }
    }

    fn handle_cqe(&mut self, cqe: &fi_cq_data_entry) -> Result<()> {
        let ptr = from_ctx::<CmRequest>(cqe.op_context)
            .ok_or(CollNetError::Protocol("completion without request context"))?;
        let is_rx = match self.reqs.get_mut(ptr) {
            Some(req) => matches!(req.kind, CmReqKind::Rx(_)),
            None => {
                return Err(CollNetError::Protocol("completion for unknown request"));
            }
        };
        if is_rx {
            let msg = {
                let Some(req) = self.reqs.get_mut(ptr) else {
                    return Err(CollNetError::Protocol("rx completion without request"));
                };
                let CmReqKind::Rx(rx) = &req.kind else { unreachable!() };
                ConnMsg::decode(rx.elem.as_slice(), self.conn_msg_data_size)?
            };
            self.dispatch_conn_msg(&msg);
            // Repost the same buffer.
            match self.post_req(ptr)? {
                PostOutcome::Posted => {}
                PostOutcome::Again => self.pending.push_back(ptr),
            }
            return Ok(());
        }

        // Send completions are one-shot: consume the request, flag the
        // owner, return the buffer.
        let req = self
            .reqs
            .take(ptr)
            .ok_or(CollNetError::Protocol("completion for unknown request"))?;
        match req.kind {
            CmReqKind::Rx(_) => unreachable!(),
            CmReqKind::SendConn(send) => {
                send.state.lock().delivered = true;
                self.buf_pool.free_entry(send.elem);
            }
            CmReqKind::SendConnResp(send) => {
                send.state.lock().delivered = true;
                self.buf_pool.free_entry(send.elem);
            }
        }
        Ok(())
    }

    /// Route a received connect message to its target connector. An
    /// unknown id is dropped; the peer's connector may be long gone.
    fn dispatch_conn_msg(&mut self, msg: &ConnMsg) {
        match self.callback_map.get_mut(&msg.remote_id) {
            Some(callback) => callback(msg),
            None => {
                debug!(
                    id = msg.remote_id,
                    msg_type = ?msg.msg_type,
                    "dropping connect message for unknown connector id"
                );
            }
        }
    }

    fn handle_cq_error(&mut self) -> Result<()> {
        let mut err_entry = fi_cq_err_entry::default();
        let ret = unsafe {
            fi_cq_readerr(self.cq.0.as_ptr(), &raw mut err_entry, 0)
        };
        if ret < 0 {
            return Err(LibfabricError::new(ret as c_int, "fi_cq_readerr").into());
        }
        if err_entry.err == FI_ECANCELED as c_int {
            // Endpoint teardown cancels posted receives with some
            // providers. Harmless.
            return Ok(());
        }
        let errmsg = unsafe {
            std::ffi::CStr::from_ptr(fi_cq_strerror(
                self.cq.0.as_ptr(),
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
}

impl Drop for CmResources {
    fn drop(&mut self) {
        // Outstanding posts pin buffers and registrations, so the
        // provider endpoint goes first.
        self.ep.close_endpoint();
    }
}
