#![allow(warnings)]
include!(concat!(env!("OUT_DIR"), "/libfabric-bindings.rs"));

use std::ffi::{c_char, c_int, c_void};

pub const FI_ADDR_UNSPEC: fi_addr_t = u64::MAX;
pub const FI_KEY_NOTAVAIL: u64 = u64::MAX;

pub fn make_fi_version(major: u16, minor: u16) -> u32 {
    ((major as u32) << 16) | (minor as u32)
}

// The functions below mirror the static-inline call wrappers of
// rdma/fi_*.h, which bindgen cannot emit. Each one dispatches through
// the object's ops table, exactly as the C inline does.

pub unsafe fn fi_close(fid: *mut fid) {
    (*(*fid).ops).close.unwrap_unchecked()(fid);
}

pub unsafe fn fi_domain_open(
    fabric: *mut fid_fabric,
    info: *mut fi_info,
    domain: *mut *mut fid_domain,
    context: *mut c_void,
) -> c_int {
    (*(*fabric).ops).domain.unwrap_unchecked()(fabric, info, domain, context)
}

pub unsafe fn fi_cq_open(
    domain: *mut fid_domain,
    attr: *mut fi_cq_attr,
    cq: *mut *mut fid_cq,
    context: *mut c_void,
) -> c_int {
    (*(*domain).ops).cq_open.unwrap_unchecked()(domain, attr, cq, context)
}

pub unsafe fn fi_av_open(
    domain: *mut fid_domain,
    attr: *mut fi_av_attr,
    av: *mut *mut fid_av,
    context: *mut c_void,
) -> c_int {
    (*(*domain).ops).av_open.unwrap_unchecked()(domain, attr, av, context)
}

pub unsafe fn fi_endpoint(
    domain: *mut fid_domain,
    info: *mut fi_info,
    ep: *mut *mut fid_ep,
    context: *mut c_void,
) -> c_int {
    (*(*domain).ops).endpoint.unwrap_unchecked()(domain, info, ep, context)
}

pub unsafe fn fi_ep_bind(ep: *mut fid_ep, bfid: *mut fid, flags: u64) -> c_int {
    let ep_fid = &raw mut (*ep).fid;
    (*(*ep_fid).ops).bind.unwrap_unchecked()(ep_fid, bfid, flags)
}

pub unsafe fn fi_enable(ep: *mut fid_ep) -> c_int {
    let ep_fid = &raw mut (*ep).fid;
    (*(*ep_fid).ops).control.unwrap_unchecked()(
        ep_fid,
        FI_ENABLE as c_int,
        std::ptr::null_mut(),
    )
}

pub unsafe fn fi_getname(
    ep: *mut fid_ep,
    addr: *mut c_void,
    addrlen: *mut usize,
) -> c_int {
    (*(*ep).cm).getname.unwrap_unchecked()(&raw mut (*ep).fid, addr, addrlen)
}

pub unsafe fn fi_av_insert(
    av: *mut fid_av,
    addr: *const c_void,
    count: usize,
    fi_addr: *mut fi_addr_t,
    flags: u64,
    context: *mut c_void,
) -> c_int {
    (*(*av).ops).insert.unwrap_unchecked()(av, addr, count, fi_addr, flags, context)
}

pub unsafe fn fi_send(
    ep: *mut fid_ep,
    buf: *const c_void,
    len: usize,
    desc: *mut c_void,
    dest_addr: fi_addr_t,
    context: *mut c_void,
) -> isize {
    (*(*ep).msg).send.unwrap_unchecked()(ep, buf, len, desc, dest_addr, context)
}

pub unsafe fn fi_recv(
    ep: *mut fid_ep,
    buf: *mut c_void,
    len: usize,
    desc: *mut c_void,
    src_addr: fi_addr_t,
    context: *mut c_void,
) -> isize {
    (*(*ep).msg).recv.unwrap_unchecked()(ep, buf, len, desc, src_addr, context)
}

pub unsafe fn fi_inject(
    ep: *mut fid_ep,
    buf: *const c_void,
    len: usize,
    dest_addr: fi_addr_t,
) -> isize {
    (*(*ep).msg).inject.unwrap_unchecked()(ep, buf, len, dest_addr)
}

pub unsafe fn fi_writedata(
    ep: *mut fid_ep,
    buf: *const c_void,
    len: usize,
    desc: *mut c_void,
    data: u64,
    dest_addr: fi_addr_t,
    addr: u64,
    key: u64,
    context: *mut c_void,
) -> isize {
    (*(*ep).rma).writedata.unwrap_unchecked()(
        ep, buf, len, desc, data, dest_addr, addr, key, context,
    )
}

pub unsafe fn fi_cq_read(cq: *mut fid_cq, buf: *mut c_void, count: usize) -> isize {
    (*(*cq).ops).read.unwrap_unchecked()(cq, buf, count)
}

pub unsafe fn fi_cq_readfrom(
    cq: *mut fid_cq,
    buf: *mut c_void,
    count: usize,
    src_addr: *mut fi_addr_t,
) -> isize {
    (*(*cq).ops).readfrom.unwrap_unchecked()(cq, buf, count, src_addr)
}

pub unsafe fn fi_cq_readerr(
    cq: *mut fid_cq,
    buf: *mut fi_cq_err_entry,
    flags: u64,
) -> isize {
    (*(*cq).ops).readerr.unwrap_unchecked()(cq, buf, flags)
}

pub unsafe fn fi_cq_strerror(
    cq: *mut fid_cq,
    prov_errno: c_int,
    err_data: *const c_void,
    buf: *mut c_char,
    len: usize,
) -> *const c_char {
    (*(*cq).ops).strerror.unwrap_unchecked()(cq, prov_errno, err_data, buf, len)
}

pub unsafe fn fi_mr_regattr(
    domain: *mut fid_domain,
    attr: *const fi_mr_attr,
    flags: u64,
    mr: *mut *mut fid_mr,
) -> c_int {
    (*(*domain).mr).regattr.unwrap_unchecked()(&raw mut (*domain).fid, attr, flags, mr)
}

pub unsafe fn fi_mr_bind(mr: *mut fid_mr, bfid: *mut fid, flags: u64) -> c_int {
    let mr_fid = &raw mut (*mr).fid;
    (*(*mr_fid).ops).bind.unwrap_unchecked()(mr_fid, bfid, flags)
}

pub unsafe fn fi_mr_enable(mr: *mut fid_mr) -> c_int {
    let mr_fid = &raw mut (*mr).fid;
    (*(*mr_fid).ops).control.unwrap_unchecked()(
        mr_fid,
        FI_ENABLE as c_int,
        std::ptr::null_mut(),
    )
}

pub unsafe fn fi_mr_desc(mr: *mut fid_mr) -> *mut c_void {
    (*mr).mem_desc
}

pub unsafe fn fi_mr_key(mr: *mut fid_mr) -> u64 {
    (*mr).key
}
