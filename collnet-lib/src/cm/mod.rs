//! Out-of-band connection manager.
//!
//! One control endpoint per domain drives a three-message handshake:
//! the connecting side posts a CONNECT carrying its connector id and
//! transport payload, the accepting side answers with a CONNECT_RESP,
//! and readiness on each side follows from the respective delivery
//! completions. Received messages are routed through a callback map
//! keyed by the target connector id.

mod comms;
mod reqs;
mod resources;
pub(crate) mod wire;

use std::sync::Arc;

use parking_lot::Mutex;

pub use comms::{ConnectHandle, Listener, Receiver, SendConnector};
pub(crate) use resources::CmResources;

use crate::{
    error::Result,
    fabric::{FabricDomain, SharedKeyPool},
};

pub(crate) struct CmShared {
    pub(crate) inner: Mutex<CmResources>,
    // Keeps the provider domain alive for as long as any connector
    // holds a reference to the resources.
    _domain: Arc<FabricDomain>,
}

unsafe impl Send for CmShared {}
unsafe impl Sync for CmShared {}

/// Top-level connection-establishment surface. One instance per domain;
/// every listener and connector created from it shares its endpoint,
/// buffer pool, and progress engine.
pub struct ConnectionManager {
    shared: Arc<CmShared>,
}

impl ConnectionManager {
    /// Create the CM endpoint and post the initial receive buffers.
    ///
    /// `conn_msg_data_size` is the transport-defined payload size of
    /// every connect and connect-response message; it must match on
    /// both peers.
    pub fn new(
        domain: Arc<FabricDomain>,
        conn_msg_data_size: usize,
        num_connector_ids: usize,
        mr_key_pool: SharedKeyPool,
    ) -> Result<ConnectionManager> {
        let inner =
            CmResources::new(&domain, conn_msg_data_size, num_connector_ids, mr_key_pool)?;
        Ok(ConnectionManager {
            shared: Arc::new(CmShared { inner: Mutex::new(inner), _domain: domain }),
        })
    }

    /// Create a listener and the handle to advertise for it.
    pub fn listen(&self) -> Result<Listener> {
        Listener::create(self.shared.clone())
    }

    /// Begin connecting to a remote listener's handle, sending `payload`
    /// in the CONNECT message.
    pub fn connect(
        &self,
        handle: &ConnectHandle,
        payload: &[u8],
    ) -> Result<SendConnector> {
        SendConnector::create(self.shared.clone(), handle, payload)
    }

    /// Drive completions and retry refused posts. Public entry points
    /// do this on their own; this hook exists for callers that poll.
    pub fn progress(&self) -> Result<()> {
        self.shared.inner.lock().progress()
    }
}
