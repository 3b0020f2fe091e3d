//! Connection-manager request objects.
//!
//! The provider context of every posted operation points at a
//! `CmRequest`. `ctx` is first (and the struct is repr(C)) so the
//! context pointer and the request address coincide, and providers that
//! scribble into the context have room to do so.

use std::sync::Arc;

use libfabric_sys::{fi_addr_t, fi_context2};
use parking_lot::Mutex;

use crate::{
    cm::comms::{ReceiverState, SendConnectorState},
    freelist::FlElem,
};

#[repr(C)]
pub(crate) struct CmRequest {
    pub ctx: fi_context2,
    pub kind: CmReqKind,
}

impl CmRequest {
    pub fn new(kind: CmReqKind) -> Box<CmRequest> {
        Box::new(CmRequest { ctx: fi_context2::default(), kind })
    }
}

pub(crate) enum CmReqKind {
    /// A pre-posted receive buffer; reposted after every completion.
    Rx(RxReq),
    /// An outgoing CONNECT owned by a send connector.
    SendConn(SendConnReq),
    /// An outgoing CONNECT_RESP owned by a receiver.
    SendConnResp(SendConnRespReq),
}

pub(crate) struct RxReq {
    pub elem: FlElem,
}

pub(crate) struct SendConnReq {
    pub elem: FlElem,
    pub dest: fi_addr_t,
    pub state: Arc<Mutex<SendConnectorState>>,
}

pub(crate) struct SendConnRespReq {
    pub elem: FlElem,
    pub dest: fi_addr_t,
    pub state: Arc<Mutex<ReceiverState>>,
}
