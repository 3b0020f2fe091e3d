//! Connector objects: `Listener`, `Receiver`, and `SendConnector`.
//!
//! Each connector holds a shared reference to the CM resources and a
//! small interior-mutability cell for the state its callback and
//! completions flip. The resources mutex is the outer lock everywhere;
//! connector state is only ever locked inside it or on its own.

use std::{collections::VecDeque, ptr::NonNull, sync::Arc};

use libfabric_sys::fi_addr_t;
use parking_lot::Mutex;
use tracing::warn;

use crate::{
    api::EpName,
    cm::{
        CmShared,
        reqs::{CmReqKind, CmRequest, SendConnReq, SendConnRespReq},
        wire::{ConnMsg, ConnMsgType, conn_msg_size},
    },
    error::{CollNetError, Result},
    utils::pending::PostOutcome,
};

/// Out-of-band bootstrap token: the listening side's endpoint address
/// and listener id, carried between peers by the host runtime.
#[derive(Clone, Copy, Debug)]
pub struct ConnectHandle {
    pub ep_name: EpName,
    pub listener_id: u32,
}

#[derive(Default)]
pub(crate) struct ListenerState {
    pub pending_conn: VecDeque<ConnMsg>,
}

/// Accepts incoming connections advertised through its handle.
pub struct Listener {
    shared: Arc<CmShared>,
    state: Arc<Mutex<ListenerState>>,
    listener_id: u32,
    handle: ConnectHandle,
}

impl Listener {
    pub(crate) fn create(shared: Arc<CmShared>) -> Result<Listener> {
        let mut res = shared.inner.lock();
        res.progress()?;
        let listener_id = res.alloc_connector_id()?;
        let state = Arc::new(Mutex::new(ListenerState::default()));
        let cb_state = state.clone();
        if let Err(e) = res.register_callback(
            listener_id,
            Box::new(move |msg| {
                cb_state.lock().pending_conn.push_back(msg.clone());
            }),
        ) {
            res.free_connector_id(listener_id);
            return Err(e);
        }
        let handle = ConnectHandle { ep_name: res.conn_ep_name(), listener_id };
        drop(res);
        Ok(Listener { shared, state, listener_id, handle })
    }

    pub fn handle(&self) -> ConnectHandle {
        self.handle
    }

    /// Pop one received CONNECT and turn it into a `Receiver`. `None`
    /// when no connection attempt has arrived yet.
    pub fn accept(&self) -> Result<Option<Receiver>> {
        let mut res = self.shared.inner.lock();
        res.progress()?;
        let Some(msg) = self.state.lock().pending_conn.pop_front() else {
            return Ok(None);
        };
        let dest_addr = res.ep().insert_peer_address(&msg.conn_ep_name)?;
        drop(res);
        Ok(Some(Receiver {
            shared: self.shared.clone(),
            state: Arc::new(Mutex::new(ReceiverState::default())),
            dest_addr,
            peer_id: msg.local_id,
            conn_payload: msg.payload,
            resp: None,
        }))
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let mut res = self.shared.inner.lock();
        if let Err(e) = res.progress() {
            warn!(error = %e, "progress failed during listener teardown");
        }
        res.remove_callback(self.listener_id);
        res.free_connector_id(self.listener_id);
    }
}

#[derive(Default)]
pub(crate) struct ReceiverState {
    pub sent: bool,
    pub delivered: bool,
}

enum PreparedResp {
    /// Auto-progress providers: sent via inject, done synchronously.
    Inject(Vec<u8>),
    /// Normal send; readiness waits for the completion.
    Req(NonNull<CmRequest>),
}

/// One in-progress incoming connection, produced by `Listener::accept`.
pub struct Receiver {
    shared: Arc<CmShared>,
    state: Arc<Mutex<ReceiverState>>,
    dest_addr: fi_addr_t,
    peer_id: u32,
    conn_payload: Vec<u8>,
    resp: Option<PreparedResp>,
}

unsafe impl Send for Receiver {}

impl Receiver {
    /// The transport payload the connecting peer sent in its CONNECT.
    pub fn conn_payload(&self) -> &[u8] {
        &self.conn_payload
    }

    /// Stage the transport payload for the CONNECT_RESP. Must be called
    /// before the first `test_ready`.
    pub fn set_conn_resp_msg_data(&mut self, payload: &[u8]) -> Result<()> {
        let mut res = self.shared.inner.lock();
        res.progress()?;
        if payload.len() != res.conn_msg_data_size() {
            return Err(CollNetError::InvalidArgument(
                "connect response payload size mismatch",
            ));
        }
        let msg = ConnMsg {
            msg_type: ConnMsgType::ConnectResp,
            local_id: 0,
            remote_id: self.peer_id,
            conn_ep_name: res.conn_ep_name(),
            payload: payload.to_vec(),
        };
        let msg_size = conn_msg_size(res.conn_msg_data_size());
        if res.use_inject_for(msg_size) {
            let mut bytes = vec![0u8; msg_size];
            msg.encode(&mut bytes);
            self.resp = Some(PreparedResp::Inject(bytes));
        } else {
            let elem = res.alloc_conn_msg(&msg)?;
            let req = CmRequest::new(CmReqKind::SendConnResp(SendConnRespReq {
                elem,
                dest: self.dest_addr,
                state: self.state.clone(),
            }));
            self.resp = Some(PreparedResp::Req(res.insert_request(req)));
        }
        Ok(())
    }

    /// Post the CONNECT_RESP if not yet sent and report whether it has
    /// been delivered.
    pub fn test_ready(&mut self) -> Result<bool> {
        let mut res = self.shared.inner.lock();
        res.progress()?;
        let mut st = self.state.lock();
        if !st.sent {
            match &self.resp {
                None => {
                    return Err(CollNetError::InvalidArgument(
                        "connect response payload not set",
                    ));
                }
                Some(PreparedResp::Inject(bytes)) => {
                    // No completion for inject; delivery is immediate.
                    match res.ep().post_inject(bytes, self.dest_addr)? {
                        PostOutcome::Posted => {
                            st.sent = true;
                            st.delivered = true;
                        }
                        PostOutcome::Again => {}
                    }
                }
                Some(PreparedResp::Req(ptr)) => {
                    let ptr = *ptr;
                    match res.post_req(ptr)? {
                        PostOutcome::Posted => {}
                        PostOutcome::Again => res.enqueue_pending(ptr),
                    }
                    st.sent = true;
                }
            }
        }
        Ok(st.delivered)
    }
}

pub(crate) struct SendConnectorState {
    pub sent: bool,
    pub delivered: bool,
    pub resp: Option<ConnMsg>,
}

/// One outgoing connection, produced by `ConnectionManager::connect`.
pub struct SendConnector {
    shared: Arc<CmShared>,
    state: Arc<Mutex<SendConnectorState>>,
    connector_id: u32,
    req: NonNull<CmRequest>,
}

unsafe impl Send for SendConnector {}

impl SendConnector {
    pub(crate) fn create(
        shared: Arc<CmShared>,
        handle: &ConnectHandle,
        payload: &[u8],
    ) -> Result<SendConnector> {
        let mut res = shared.inner.lock();
        res.progress()?;
        if payload.len() != res.conn_msg_data_size() {
            return Err(CollNetError::InvalidArgument(
                "connect payload size mismatch",
            ));
        }
        let connector_id = res.alloc_connector_id()?;
        let state = Arc::new(Mutex::new(SendConnectorState {
            sent: false,
            delivered: false,
            resp: None,
        }));
        let cb_state = state.clone();
        if let Err(e) = res.register_callback(
            connector_id,
            Box::new(move |msg| {
                cb_state.lock().resp = Some(msg.clone());
            }),
        ) {
            res.free_connector_id(connector_id);
            return Err(e);
        }

        let release = |res: &mut crate::cm::CmResources, e| {
            res.remove_callback(connector_id);
            res.free_connector_id(connector_id);
            Err(e)
        };
        let dest = match res.ep().insert_peer_address(&handle.ep_name) {
            Ok(dest) => dest,
            Err(e) => return release(&mut res, e),
        };
        let msg = ConnMsg {
            msg_type: ConnMsgType::Connect,
            local_id: connector_id,
            remote_id: handle.listener_id,
            conn_ep_name: res.conn_ep_name(),
            payload: payload.to_vec(),
        };
        let elem = match res.alloc_conn_msg(&msg) {
            Ok(elem) => elem,
            Err(e) => return release(&mut res, e),
        };
        let req = CmRequest::new(CmReqKind::SendConn(SendConnReq {
            elem,
            dest,
            state: state.clone(),
        }));
        let req = res.insert_request(req);
        drop(res);
        Ok(SendConnector { shared, state, connector_id, req })
    }

    /// Post the CONNECT if not yet sent; ready once the send completed
    /// and the CONNECT_RESP arrived.
    pub fn test_ready(&self) -> Result<bool> {
        let mut res = self.shared.inner.lock();
        res.progress()?;
        let mut st = self.state.lock();
        if !st.sent {
            match res.post_req(self.req)? {
                PostOutcome::Posted => {}
                PostOutcome::Again => res.enqueue_pending(self.req),
            }
            st.sent = true;
        }
        Ok(st.delivered && st.resp.is_some())
    }

    /// The transport payload the accepting peer sent back, available
    /// once `test_ready` has returned true.
    pub fn conn_resp_payload(&self) -> Option<Vec<u8>> {
        self.state.lock().resp.as_ref().map(|m| m.payload.clone())
    }
}

impl Drop for SendConnector {
    fn drop(&mut self) {
        let mut res = self.shared.inner.lock();
        if let Err(e) = res.progress() {
            warn!(error = %e, "progress failed during connector teardown");
        }
        res.remove_callback(self.connector_id);
        res.free_connector_id(self.connector_id);
    }
}
