//! GIN request objects. Like the CM requests, the provider context of
//! every posted operation points at a `GinRequest` (repr(C), context
//! scratch first). Each kind carries everything needed to re-post after
//! a temporary refusal.

use std::{ffi::c_void, ptr::NonNull, sync::Arc};

use libfabric_sys::{fi_addr_t, fi_context2, fi_recv, fi_send, fi_writedata, fid_ep};
use parking_lot::Mutex;

use crate::{
    ep::post_outcome,
    error::Result,
    freelist::FlElem,
    utils::pending::PostOutcome,
};

#[repr(C)]
pub(crate) struct GinRequest {
    pub ctx: fi_context2,
    pub kind: GinReqKind,
}

impl GinRequest {
    pub fn new(kind: GinReqKind) -> Box<GinRequest> {
        Box::new(GinRequest { ctx: fi_context2::default(), kind })
    }
}

pub(crate) enum GinReqKind {
    /// Pre-posted receive for one metadata record; reposted forever.
    Rx(GinRxReq),
    /// The payload write-with-immediate of an iput_signal.
    Write(GinWriteReq),
    /// The metadata send of an iput_signal.
    MetaSend(GinMetaSendReq),
    /// A zero-byte ack write back at the initiator's landing buffer.
    WriteAck(GinWriteAckReq),
}

pub(crate) struct GinRxReq {
    pub elem: FlElem,
    pub rail_id: u16,
    pub is_control: bool,
    pub ep: NonNull<fid_ep>,
    pub desc: *mut c_void,
}

/// Parameters of a write-with-immediate, kept for re-posting.
pub(crate) struct WritePost {
    pub ep: NonNull<fid_ep>,
    pub buf: *const c_void,
    pub len: usize,
    pub desc: *mut c_void,
    pub imm_data: u32,
    pub dest: fi_addr_t,
    pub remote_addr: u64,
    pub remote_key: u64,
}

impl WritePost {
    pub fn post(&self, ctx: *mut c_void) -> Result<PostOutcome> {
        let ret = unsafe {
            fi_writedata(
                self.ep.as_ptr(),
                self.buf,
                self.len,
                self.desc,
                self.imm_data as u64,
                self.dest,
                self.remote_addr,
                self.remote_key,
                ctx,
            )
        };
        post_outcome(ret, "fi_writedata")
    }
}

pub(crate) struct SendPost {
    pub ep: NonNull<fid_ep>,
    pub buf: *const c_void,
    pub len: usize,
    pub desc: *mut c_void,
    pub dest: fi_addr_t,
}

impl SendPost {
    pub fn post(&self, ctx: *mut c_void) -> Result<PostOutcome> {
        let ret = unsafe {
            fi_send(self.ep.as_ptr(), self.buf, self.len, self.desc, self.dest, ctx)
        };
        post_outcome(ret, "fi_send")
    }
}

pub(crate) struct GinWriteReq {
    pub post: WritePost,
    pub parent: Arc<Mutex<IputState>>,
}

pub(crate) struct GinMetaSendReq {
    pub post: SendPost,
    pub parent: Arc<Mutex<IputState>>,
    /// Returned to the owning communicator's metadata pool when the
    /// send completes.
    pub elem: Option<FlElem>,
    pub comm: Arc<Mutex<super::comm::GinCommState>>,
}

pub(crate) struct GinWriteAckReq {
    pub post: WritePost,
    pub comm: Arc<Mutex<super::comm::GinCommState>>,
}

pub(crate) fn post_rx(rx: &GinRxReq, ctx: *mut c_void) -> Result<PostOutcome> {
    let ret = unsafe {
        fi_recv(
            rx.ep.as_ptr(),
            rx.elem.ptr().as_ptr() as *mut c_void,
            rx.elem.as_slice().len(),
            rx.desc,
            libfabric_sys::FI_ADDR_UNSPEC,
            ctx,
        )
    };
    post_outcome(ret, "fi_recv")
}

/// Sender-side progress state of one iput_signal: which sub-requests
/// have not yet completed locally.
pub(crate) struct IputState {
    pub write_pending: bool,
    pub metadata_pending: bool,
}

/// The request handed back to the caller of `iput_signal`. Complete
/// once both sub-operations finished locally and the receiver's ack
/// released the sequence slot.
pub struct IputSignalRequest {
    pub(crate) state: Arc<Mutex<IputState>>,
    pub(crate) comm: Arc<Mutex<super::comm::GinCommState>>,
    pub(crate) peer: u32,
    pub(crate) seq: u16,
}

unsafe impl Send for IputSignalRequest {}

impl IputSignalRequest {
    /// Non-blocking completion check. Drive `GinComm::progress` while
    /// polling this.
    pub fn test(&self) -> bool {
        {
            let st = self.state.lock();
            if st.write_pending || st.metadata_pending {
                return false;
            }
        }
        !self.comm.lock().slot_active(self.peer, self.seq)
    }
}
