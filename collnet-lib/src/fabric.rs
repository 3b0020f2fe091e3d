//! Owned provider plumbing: fabric and domain objects, and the small
//! unsafe helpers for opening CQs, AVs, and endpoints against them.

use std::{
    ffi::{CStr, CString, c_int, c_void},
    ptr::{NonNull, null, null_mut},
    sync::Arc,
};

use libfabric_sys::{
    FI_AV_MAP, FI_CQ_FORMAT_DATA, FI_EP_RDM, FI_HMEM, FI_HMEM_CUDA, FI_HMEM_SYSTEM,
    FI_MR_ALLOCATED, FI_MR_ENDPOINT, FI_MR_HMEM, FI_MR_LOCAL, FI_MR_PROV_KEY,
    FI_MR_VIRT_ADDR, FI_MSG, FI_PROGRESS_AUTO, FI_RECV, FI_RMA, FI_RX_CQ_DATA,
    FI_SEND, FI_SOURCE, fi_av_attr, fi_av_open, fi_close, fi_cq_attr, fi_cq_open,
    fi_domain_open, fi_dupinfo, fi_endpoint, fi_enable, fi_ep_bind, fi_fabric,
    fi_freeinfo, fi_getinfo, fi_getname, fi_info, fi_mr_attr, fi_mr_bind,
    fi_mr_enable, fi_mr_key, fi_mr_regattr, fi_mr_desc, fid_av, fid_cq, fid_domain,
    fid_ep, fid_fabric, fid_mr, iovec, make_fi_version,
};
use tracing::debug;

use crate::{
    error::{CollNetError, LibfabricError, Result},
    idpool::PoolKey,
    utils::defer::Defer,
};

/// An owned `fi_info` list head, freed on drop.
pub(crate) struct OwnedInfo(NonNull<fi_info>);

impl OwnedInfo {
    pub fn as_ptr(&self) -> *mut fi_info {
        self.0.as_ptr()
    }
}

impl Drop for OwnedInfo {
    fn drop(&mut self) {
        unsafe { fi_freeinfo(self.0.as_ptr()) };
    }
}

/// One provider domain: the `fi_info` it was selected with, plus the
/// fabric and domain objects opened from it. Everything opened against
/// this domain must be dropped before it.
pub struct FabricDomain {
    info: NonNull<fi_info>,
    fabric: NonNull<fid_fabric>,
    domain: NonNull<fid_domain>,
}

unsafe impl Send for FabricDomain {}
unsafe impl Sync for FabricDomain {}

impl FabricDomain {
    /// Select a provider and open a fabric + domain from its first
    /// matching `fi_info` entry.
    pub fn open(provider: Option<&str>) -> Result<Self> {
        unsafe {
            let hints = fi_dupinfo(null());
            if hints.is_null() {
                return Err(CollNetError::Custom("failed to allocate fi_info hints"));
            }
            let _defer_hints = Defer::new(|| fi_freeinfo(hints));

            (*hints).caps = FI_MSG as u64
                | FI_RMA as u64
                | FI_HMEM as u64
                | FI_SOURCE as u64;
            (*(*hints).ep_attr).type_ = FI_EP_RDM;
            (*(*hints).domain_attr).mr_mode = (FI_MR_LOCAL
                | FI_MR_VIRT_ADDR
                | FI_MR_ALLOCATED
                | FI_MR_PROV_KEY
                | FI_MR_HMEM
                | FI_MR_ENDPOINT) as c_int;
            if let Some(name) = provider {
                let name = CString::new(name)
                    .map_err(|_| CollNetError::InvalidArgument("provider name"))?;
                // fi_freeinfo frees prov_name, so it must be malloc'd.
                (*(*hints).fabric_attr).prov_name = libc::strdup(name.as_ptr());
            }

            let mut info = null_mut();
            let ret = fi_getinfo(
                make_fi_version(1, 18),
                null(),
                null(),
                0,
                hints,
                &raw mut info,
            );
            let info = NonNull::new(info)
                .ok_or(LibfabricError::new(ret, "fi_getinfo"))?;
            let mut defer_info = Defer::new(|| fi_freeinfo(info.as_ptr()));

            debug!(
                provider = ?CStr::from_ptr((*(*info.as_ptr()).fabric_attr).prov_name),
                "FabricDomain::open"
            );

            let mut fabric = null_mut();
            let ret = fi_fabric(
                (*info.as_ptr()).fabric_attr,
                &raw mut fabric,
                null_mut(),
            );
            let fabric = NonNull::new(fabric)
                .ok_or(LibfabricError::new(ret, "fi_fabric"))?;
            let mut defer_fabric =
                Defer::new(|| fi_close(&raw mut (*fabric.as_ptr()).fid));

            let mut domain = null_mut();
            let ret = fi_domain_open(
                fabric.as_ptr(),
                info.as_ptr(),
                &raw mut domain,
                null_mut(),
            );
            let domain = NonNull::new(domain)
                .ok_or(LibfabricError::new(ret, "fi_domain"))?;

            defer_info.cancel();
            defer_fabric.cancel();
            Ok(FabricDomain { info, fabric, domain })
        }
    }

    pub(crate) fn info(&self) -> NonNull<fi_info> {
        self.info
    }

    pub(crate) fn domain(&self) -> NonNull<fid_domain> {
        self.domain
    }

    pub fn provider_name(&self) -> String {
        unsafe {
            CStr::from_ptr((*(*self.info.as_ptr()).fabric_attr).prov_name)
                .to_string_lossy()
                .into_owned()
        }
    }

    /// True when the provider makes progress without explicit CQ reads.
    pub fn auto_progress(&self) -> bool {
        unsafe {
            (*(*self.info.as_ptr()).domain_attr).data_progress == FI_PROGRESS_AUTO
        }
    }

    /// True when registrations must be bound to an endpoint and enabled
    /// before use.
    pub fn endpoint_mr(&self) -> bool {
        unsafe {
            (*(*self.info.as_ptr()).domain_attr).mr_mode & FI_MR_ENDPOINT as c_int
                != 0
        }
    }

    pub fn inject_size(&self) -> usize {
        unsafe { (*(*self.info.as_ptr()).tx_attr).inject_size }
    }

    pub fn max_msg_size(&self) -> usize {
        unsafe { (*(*self.info.as_ptr()).ep_attr).max_msg_size }
    }

    /// Re-run provider selection with the flags a write-with-immediate
    /// target endpoint needs: remote CQ data delivery with a 4-byte
    /// immediate word.
    pub(crate) fn rx_cq_data_info(&self) -> Result<OwnedInfo> {
        unsafe {
            let hints = fi_dupinfo(self.info.as_ptr());
            if hints.is_null() {
                return Err(CollNetError::Custom("fi_dupinfo failed"));
            }
            let _defer_hints = Defer::new(|| fi_freeinfo(hints));
            (*hints).mode |= FI_RX_CQ_DATA as u64;
            (*(*hints).domain_attr).cq_data_size = 4;

            let mut results = null_mut();
            let ret = fi_getinfo(
                make_fi_version(1, 18),
                null(),
                null(),
                0,
                hints,
                &raw mut results,
            );
            let results = NonNull::new(results)
                .ok_or(LibfabricError::new(ret, "fi_getinfo FI_RX_CQ_DATA"))?;
            let owned = OwnedInfo(results);
            if (*results.as_ptr()).mode & FI_RX_CQ_DATA as u64 == 0
                || (*(*results.as_ptr()).domain_attr).cq_data_size < 4
            {
                return Err(CollNetError::Custom(
                    "provider does not support 4-byte remote CQ data",
                ));
            }
            Ok(owned)
        }
    }
}

impl Drop for FabricDomain {
    fn drop(&mut self) {
        debug!(provider = %self.provider_name(), "FabricDomain::drop");
        unsafe {
            fi_close(&raw mut self.domain.as_mut().fid);
            fi_close(&raw mut self.fabric.as_mut().fid);
            fi_freeinfo(self.info.as_ptr());
        }
    }
}

pub(crate) fn open_cq(domain: &FabricDomain, size: usize) -> Result<NonNull<fid_cq>> {
    unsafe {
        let mut cq = null_mut();
        let mut cq_attr =
            fi_cq_attr { format: FI_CQ_FORMAT_DATA, size, ..Default::default() };
        let ret =
            fi_cq_open(domain.domain().as_ptr(), &raw mut cq_attr, &raw mut cq, null_mut());
        NonNull::new(cq).ok_or_else(|| LibfabricError::new(ret, "fi_cq_open").into())
    }
}

pub(crate) fn open_av(domain: &FabricDomain) -> Result<NonNull<fid_av>> {
    unsafe {
        let mut av = null_mut();
        let mut av_attr = fi_av_attr { type_: FI_AV_MAP, ..Default::default() };
        let ret =
            fi_av_open(domain.domain().as_ptr(), &raw mut av_attr, &raw mut av, null_mut());
        NonNull::new(av).ok_or_else(|| LibfabricError::new(ret, "fi_av_open").into())
    }
}

/// Create an endpoint from `info`, bind it to the CQ and AV, and enable
/// it.
pub(crate) fn open_ep(
    domain: &FabricDomain,
    info: *mut fi_info,
    cq: NonNull<fid_cq>,
    av: NonNull<fid_av>,
) -> Result<NonNull<fid_ep>> {
    unsafe {
        let mut ep = null_mut();
        let ret = fi_endpoint(domain.domain().as_ptr(), info, &raw mut ep, null_mut());
        let ep = NonNull::new(ep).ok_or(LibfabricError::new(ret, "fi_endpoint"))?;
        let mut defer_ep = Defer::new(|| fi_close(&raw mut (*ep.as_ptr()).fid));

        let ret = fi_ep_bind(
            ep.as_ptr(),
            &raw mut (*cq.as_ptr()).fid,
            (FI_SEND | FI_RECV) as u64,
        );
        if ret != 0 {
            return Err(LibfabricError::new(ret, "fi_ep_bind cq").into());
        }
        let ret = fi_ep_bind(ep.as_ptr(), &raw mut (*av.as_ptr()).fid, 0);
        if ret != 0 {
            return Err(LibfabricError::new(ret, "fi_ep_bind av").into());
        }
        let ret = fi_enable(ep.as_ptr());
        if ret != 0 {
            return Err(LibfabricError::new(ret, "fi_enable").into());
        }

        defer_ep.cancel();
        Ok(ep)
    }
}

/// Read an endpoint's provider address into `buf`, returning the actual
/// length. `BufferTooSmall` when `buf` cannot hold it.
pub(crate) fn ep_address(ep: NonNull<fid_ep>, buf: &mut [u8]) -> Result<usize> {
    let mut addr_len = buf.len();
    let ret = unsafe {
        fi_getname(ep.as_ptr(), buf.as_mut_ptr() as *mut c_void, &raw mut addr_len)
    };
    if ret == -(libfabric_sys::FI_ETOOSMALL as c_int) {
        return Err(CollNetError::BufferTooSmall);
    } else if ret != 0 {
        return Err(LibfabricError::new(ret, "fi_getname").into());
    }
    Ok(addr_len)
}

/// Memory interface of a registration.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MemIface {
    System,
    Cuda { device: c_int },
}

/// An open provider registration, closed on drop. Any pool-drawn key
/// travels separately (see `PoolKey` and `MrHandle`).
pub(crate) struct RegisteredMr {
    mr: NonNull<fid_mr>,
}

unsafe impl Send for RegisteredMr {}

impl RegisteredMr {
    pub fn desc(&self) -> *mut c_void {
        unsafe { fi_mr_desc(self.mr.as_ptr()) }
    }

    pub fn key(&self) -> u64 {
        unsafe { fi_mr_key(self.mr.as_ptr()) }
    }
}

impl Drop for RegisteredMr {
    fn drop(&mut self) {
        unsafe { fi_close(&raw mut self.mr.as_mut().fid) };
    }
}

/// A single-domain registration together with its key reservation.
pub(crate) struct MrHandle {
    pub mr: RegisteredMr,
    // Returned to the pool when the handle drops, after the MR closed.
    pub _pool_key: Option<PoolKey>,
}

impl MrHandle {
    pub fn desc(&self) -> *mut c_void {
        self.mr.desc()
    }

    pub fn key(&self) -> u64 {
        self.mr.key()
    }
}

/// Register `len` bytes at `ptr` with the domain.
///
/// `requested_key` is passed through to the provider when the caller
/// draws keys from a shared pool. When `ep_for_bind` is set
/// (endpoint-bound registration mode), the new MR is bound to that
/// endpoint and enabled before it is returned.
pub(crate) fn register_memory(
    domain: NonNull<fid_domain>,
    ep_for_bind: Option<NonNull<fid_ep>>,
    requested_key: Option<u64>,
    ptr: *const c_void,
    len: usize,
    access: u64,
    iface: MemIface,
) -> Result<RegisteredMr> {
    let iov = iovec { iov_base: ptr as *mut c_void, iov_len: len };
    let mut mr_attr = fi_mr_attr { iov_count: 1, access, ..Default::default() };
    mr_attr.__bindgen_anon_1.mr_iov = &iov;
    match iface {
        MemIface::System => {
            mr_attr.iface = FI_HMEM_SYSTEM;
        }
        MemIface::Cuda { device } => {
            mr_attr.iface = FI_HMEM_CUDA;
            mr_attr.device.cuda = device;
        }
    }
    if let Some(key) = requested_key {
        mr_attr.requested_key = key;
    }

    let mut mr = null_mut();
    let ret = unsafe { fi_mr_regattr(domain.as_ptr(), &mr_attr, 0, &raw mut mr) };
    let mr = NonNull::new(mr).ok_or(LibfabricError::new(ret, "fi_mr_regattr"))?;
    let registered = RegisteredMr { mr };

    if let Some(ep) = ep_for_bind {
        let ret = unsafe {
            fi_mr_bind(registered.mr.as_ptr(), &raw mut (*ep.as_ptr()).fid, 0)
        };
        if ret != 0 {
            return Err(LibfabricError::new(ret, "fi_mr_bind").into());
        }
        let ret = unsafe { fi_mr_enable(registered.mr.as_ptr()) };
        if ret != 0 {
            return Err(LibfabricError::new(ret, "fi_mr_enable").into());
        }
    }

    Ok(registered)
}

/// Shorthand for the shared-key-pool argument threaded through
/// registration paths.
pub(crate) type SharedKeyPool = Option<Arc<parking_lot::Mutex<crate::idpool::IdPool>>>;
