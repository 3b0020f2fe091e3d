//! Endpoint wrapper used by the connection manager: one provider
//! endpoint plus its address vector, with non-blocking post paths that
//! report temporary refusal separately from failure.

use std::{
    ffi::{c_int, c_void},
    ptr::NonNull,
};

use libfabric_sys::{
    FI_ADDR_UNSPEC, FI_EAGAIN, fi_addr_t, fi_av_insert, fi_close, fi_inject,
    fi_recv, fi_send, fid_cq, fid_domain, fid_ep,
};
use tracing::warn;

use crate::{
    api::{EpName, MAX_EP_ADDR},
    error::{CollNetError, LibfabricError, Result},
    fabric::{self, FabricDomain, MemIface, MrHandle, SharedKeyPool},
    freelist::ChunkRegistrar,
    idpool::PoolKey,
    utils::pending::PostOutcome,
};

const EAGAIN: isize = -(FI_EAGAIN as isize);

pub(crate) struct Endpoint {
    domain: NonNull<fid_domain>,
    ep: NonNull<fid_ep>,
    av: NonNull<libfabric_sys::fid_av>,
    ep_closed: bool,
    endpoint_mr: bool,
    key_pool: SharedKeyPool,
    max_inject_size: usize,
}

impl Endpoint {
    /// Create an endpoint on `domain` bound to the shared CQ `cq`, with
    /// a map-type address vector, and enable it.
    pub fn new(
        domain: &FabricDomain,
        cq: NonNull<fid_cq>,
        key_pool: SharedKeyPool,
    ) -> Result<Self> {
        let av = fabric::open_av(domain)?;
        let ep = match fabric::open_ep(domain, domain.info().as_ptr(), cq, av) {
            Ok(ep) => ep,
            Err(e) => {
                unsafe { fi_close(&raw mut (*av.as_ptr()).fid) };
                return Err(e);
            }
        };
        Ok(Endpoint {
            domain: domain.domain(),
            ep,
            av,
            ep_closed: false,
            endpoint_mr: domain.endpoint_mr(),
            key_pool,
            max_inject_size: domain.inject_size(),
        })
    }

    pub fn get_own_address(&self) -> Result<EpName> {
        let mut buf = [0u8; MAX_EP_ADDR];
        let len = fabric::ep_address(self.ep, &mut buf)?;
        Ok(EpName { addr: buf, addr_len: len })
    }

    /// Insert a peer's raw address, failing hard unless the provider
    /// reports exactly one inserted entry.
    pub fn insert_peer_address(&self, name: &EpName) -> Result<fi_addr_t> {
        let mut fi_addr: fi_addr_t = FI_ADDR_UNSPEC;
        let ret = unsafe {
            fi_av_insert(
                self.av.as_ptr(),
                name.addr.as_ptr() as *const c_void,
                1,
                &raw mut fi_addr,
                0,
                std::ptr::null_mut(),
            )
        };
        if ret != 1 {
            warn!(ret, "fi_av_insert did not insert exactly one address");
            return Err(LibfabricError::new(ret, "fi_av_insert").into());
        }
        Ok(fi_addr)
    }

    pub fn post_send(
        &self,
        buf: *const c_void,
        len: usize,
        desc: *mut c_void,
        dest: fi_addr_t,
        ctx: *mut c_void,
    ) -> Result<PostOutcome> {
        let ret = unsafe { fi_send(self.ep.as_ptr(), buf, len, desc, dest, ctx) };
        post_outcome(ret, "fi_send")
    }

    pub fn post_recv(
        &self,
        buf: *mut c_void,
        len: usize,
        desc: *mut c_void,
        ctx: *mut c_void,
    ) -> Result<PostOutcome> {
        let ret = unsafe {
            fi_recv(self.ep.as_ptr(), buf, len, desc, FI_ADDR_UNSPEC, ctx)
        };
        post_outcome(ret, "fi_recv")
    }

    /// Post a completion-less send. The buffer may be reused as soon as
    /// this returns `Posted`.
    pub fn post_inject(
        &self,
        buf: &[u8],
        dest: fi_addr_t,
    ) -> Result<PostOutcome> {
        if buf.len() > self.max_inject_size {
            return Err(CollNetError::InvalidArgument(
                "inject larger than provider inject limit",
            ));
        }
        let ret = unsafe {
            fi_inject(self.ep.as_ptr(), buf.as_ptr() as *const c_void, buf.len(), dest)
        };
        post_outcome(ret, "fi_inject")
    }

    /// A buffer-pool registration hook bound to this endpoint: chunks
    /// register against the endpoint's domain with the shared key pool
    /// and, in endpoint-bound registration mode, are bound to the
    /// endpoint and enabled.
    pub fn chunk_registrar(&self, access: u64) -> EpChunkRegistrar {
        EpChunkRegistrar {
            domain: self.domain,
            ep_for_bind: self.endpoint_mr.then_some(self.ep),
            key_pool: self.key_pool.clone(),
            access,
        }
    }

    pub fn max_inject_size(&self) -> usize {
        self.max_inject_size
    }

    /// Close the provider endpoint while leaving the address vector
    /// open. Posted buffers and requests can only be reclaimed after
    /// this.
    pub fn close_endpoint(&mut self) {
        if !self.ep_closed {
            unsafe { fi_close(&raw mut self.ep.as_mut().fid) };
            self.ep_closed = true;
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.close_endpoint();
        unsafe { fi_close(&raw mut self.av.as_mut().fid) };
    }
}

/// Registers buffer-pool chunks of host memory for an `Endpoint`.
pub(crate) struct EpChunkRegistrar {
    domain: NonNull<fid_domain>,
    ep_for_bind: Option<NonNull<fid_ep>>,
    key_pool: SharedKeyPool,
    access: u64,
}

// Raw provider handles; the owning resources mutex serializes use.
unsafe impl Send for EpChunkRegistrar {}

impl ChunkRegistrar for EpChunkRegistrar {
    type Handle = MrHandle;

    fn register(&mut self, ptr: NonNull<u8>, len: usize) -> Result<MrHandle> {
        let pool_key = match &self.key_pool {
            Some(pool) => Some(
                PoolKey::allocate(pool)
                    .ok_or(CollNetError::ResourceExhausted("registration key pool"))?,
            ),
            None => None,
        };
        let mr = fabric::register_memory(
            self.domain,
            self.ep_for_bind,
            pool_key.as_ref().map(PoolKey::key),
            ptr.as_ptr() as *const c_void,
            len,
            self.access,
            MemIface::System,
        )?;
        Ok(MrHandle { mr, _pool_key: pool_key })
    }

    fn desc(&self, handle: &MrHandle, _rail_id: u16) -> *mut c_void {
        handle.desc()
    }
}

pub(crate) fn post_outcome(ret: isize, context: &'static str) -> Result<PostOutcome> {
    match ret {
        0 => Ok(PostOutcome::Posted),
        EAGAIN => Ok(PostOutcome::Again),
        _ => {
            warn!(ret, context, "provider post failed");
            Err(LibfabricError::new(ret as c_int, context).into())
        }
    }
}
