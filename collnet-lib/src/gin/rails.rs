//! The GIN endpoint: N data rails and N control rails over per-rail
//! provider domains, a registered receive-buffer pool shared across the
//! rails, and the write-ack landing buffer advertised to every peer.

use std::{ffi::c_void, ptr::NonNull};

use libfabric_sys::{
    FI_RECV, FI_REMOTE_WRITE, FI_SEND, FI_WRITE, fi_addr_t, fi_close, fid_av, fid_cq,
    fid_ep,
};

use crate::{
    api::{EndpointAddress, EpName, MAX_EP_ADDR},
    error::{CollNetError, Result},
    fabric::{self, FabricDomain, MemIface, SharedKeyPool},
    freelist::{ChunkRegistrar, PageAlloc},
    idpool::PoolKey,
};

use bytes::Bytes;

pub(crate) const MAX_NUM_RAILS: usize = 4;

/// One parallel network path: its own endpoint, address vector, and
/// completion queue on a dedicated provider domain.
pub(crate) struct GinRail {
    cq: NonNull<fid_cq>,
    av: NonNull<fid_av>,
    ep: NonNull<fid_ep>,
    ep_closed: bool,
}

impl GinRail {
    fn new(domain: &FabricDomain, cq_size: usize) -> Result<GinRail> {
        let cq = fabric::open_cq(domain, cq_size)?;
        let av = match fabric::open_av(domain) {
            Ok(av) => av,
            Err(e) => {
                unsafe { fi_close(&raw mut (*cq.as_ptr()).fid) };
                return Err(e);
            }
        };
        // Rails receive write-with-immediate traffic, which needs the
        // 4-byte remote CQ data flavor of the provider info.
        let ep = (|| {
            let info = domain.rx_cq_data_info()?;
            fabric::open_ep(domain, info.as_ptr(), cq, av)
        })();
        let ep = match ep {
            Ok(ep) => ep,
            Err(e) => {
                unsafe {
                    fi_close(&raw mut (*av.as_ptr()).fid);
                    fi_close(&raw mut (*cq.as_ptr()).fid);
                }
                return Err(e);
            }
        };
        Ok(GinRail { cq, av, ep, ep_closed: false })
    }

    pub fn cq(&self) -> NonNull<fid_cq> {
        self.cq
    }

    pub fn ep(&self) -> NonNull<fid_ep> {
        self.ep
    }

    pub fn address(&self) -> Result<EndpointAddress> {
        let mut buf = [0u8; MAX_EP_ADDR];
        let len = fabric::ep_address(self.ep, &mut buf)?;
        Ok(EndpointAddress(Bytes::copy_from_slice(&buf[..len])))
    }

    pub fn insert_address(&self, addr: &EndpointAddress) -> Result<fi_addr_t> {
        let name = EpName::from_bytes(&addr.0)
            .ok_or(CollNetError::Protocol("oversized peer address"))?;
        let mut fi_addr: fi_addr_t = libfabric_sys::FI_ADDR_UNSPEC;
        let ret = unsafe {
            libfabric_sys::fi_av_insert(
                self.av.as_ptr(),
                name.addr.as_ptr() as *const c_void,
                1,
                &raw mut fi_addr,
                0,
                std::ptr::null_mut(),
            )
        };
        if ret != 1 {
            return Err(crate::error::LibfabricError::new(ret, "fi_av_insert").into());
        }
        Ok(fi_addr)
    }

    fn close_endpoint(&mut self) {
        if !self.ep_closed {
            unsafe { fi_close(&raw mut self.ep.as_mut().fid) };
            self.ep_closed = true;
        }
    }
}

impl Drop for GinRail {
    fn drop(&mut self) {
        self.close_endpoint();
        unsafe {
            fi_close(&raw mut self.av.as_mut().fid);
            fi_close(&raw mut self.cq.as_mut().fid);
        }
    }
}

/// Registers chunks of host memory on every rail domain, so one pool
/// entry is postable on any rail.
pub(crate) struct GinChunkRegistrar {
    domains: Vec<NonNull<libfabric_sys::fid_domain>>,
    key_pool: SharedKeyPool,
    access: u64,
}

// Raw domain handles; guarded by the resources mutex like the rest of
// the endpoint state.
unsafe impl Send for GinChunkRegistrar {}

impl GinChunkRegistrar {
    pub fn new(domains: &[FabricDomain], key_pool: SharedKeyPool, access: u64) -> Self {
        GinChunkRegistrar {
            domains: domains.iter().map(FabricDomain::domain).collect(),
            key_pool,
            access,
        }
    }
}

pub(crate) struct GinChunkMrs {
    // One registration per rail; same requested key on each, since each
    // rail is its own domain.
    mrs: Vec<fabric::RegisteredMr>,
    _pool_key: Option<PoolKey>,
}

impl ChunkRegistrar for GinChunkRegistrar {
    type Handle = GinChunkMrs;

    fn register(&mut self, ptr: NonNull<u8>, len: usize) -> Result<GinChunkMrs> {
        let pool_key = match &self.key_pool {
            Some(pool) => Some(PoolKey::allocate(pool).ok_or(
                CollNetError::ResourceExhausted("registration key pool"),
            )?),
            None => None,
        };
        let mut mrs = Vec::with_capacity(self.domains.len());
        for domain in &self.domains {
            mrs.push(fabric::register_memory(
                *domain,
                None,
                pool_key.as_ref().map(PoolKey::key),
                ptr.as_ptr() as *const c_void,
                len,
                self.access,
                MemIface::System,
            )?);
        }
        Ok(GinChunkMrs { mrs, _pool_key: pool_key })
    }

    fn desc(&self, handle: &GinChunkMrs, rail_id: u16) -> *mut c_void {
        handle.mrs[rail_id as usize].desc()
    }
}

/// The write-ack landing buffer: one page of host memory, registered
/// for remote write on every rail. Peers write zero-byte immediates at
/// it; the content is never read.
pub(crate) struct AckBuffer {
    mrs: Vec<fabric::RegisteredMr>,
    _pool_key: Option<PoolKey>,
    mem: PageAlloc,
}

impl AckBuffer {
    fn new(domains: &[FabricDomain], key_pool: &SharedKeyPool) -> Result<AckBuffer> {
        let mem = PageAlloc::new(1)?;
        let pool_key = match key_pool {
            Some(pool) => Some(PoolKey::allocate(pool).ok_or(
                CollNetError::ResourceExhausted("registration key pool"),
            )?),
            None => None,
        };
        let mut mrs = Vec::with_capacity(domains.len());
        for domain in domains {
            mrs.push(fabric::register_memory(
                domain.domain(),
                None,
                pool_key.as_ref().map(PoolKey::key),
                mem.ptr().as_ptr() as *const c_void,
                mem.len(),
                (FI_WRITE | FI_REMOTE_WRITE) as u64,
                MemIface::System,
            )?);
        }
        Ok(AckBuffer { mrs, _pool_key: pool_key, mem })
    }

    pub fn addr(&self) -> u64 {
        self.mem.ptr().as_ptr() as u64
    }

    pub fn key(&self, rail_id: u16) -> u64 {
        self.mrs[rail_id as usize].key()
    }
}

pub(crate) struct GinEndpoint {
    pub num_rails: u16,
    pub rails: Vec<GinRail>,
    pub control_rails: Vec<GinRail>,
    pub ack_buffer: AckBuffer,
}

impl GinEndpoint {
    pub fn new(domains: &[FabricDomain], key_pool: &SharedKeyPool) -> Result<Self> {
        let num_rails = domains.len();
        if num_rails == 0 || num_rails > MAX_NUM_RAILS {
            return Err(CollNetError::InvalidArgument("bad rail count"));
        }
        let cq_size = 4096;
        let mut rails = Vec::with_capacity(num_rails);
        let mut control_rails = Vec::with_capacity(num_rails);
        for domain in domains {
            rails.push(GinRail::new(domain, cq_size)?);
            control_rails.push(GinRail::new(domain, cq_size)?);
        }
        let ack_buffer = AckBuffer::new(domains, key_pool)?;
        Ok(GinEndpoint {
            num_rails: num_rails as u16,
            rails,
            control_rails,
            ack_buffer,
        })
    }

    /// Close every rail endpoint. Posted buffers and requests can only
    /// be reclaimed after this.
    pub fn close_endpoints(&mut self) {
        for rail in self.rails.iter_mut().chain(self.control_rails.iter_mut()) {
            rail.close_endpoint();
        }
    }
}

/// Access flags for the shared receive-buffer pool.
pub(crate) fn rx_pool_access() -> u64 {
    (FI_SEND | FI_RECV) as u64
}
