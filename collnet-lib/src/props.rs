//! Device properties advertised to the host runtime.

use crate::fabric::FabricDomain;

pub const PTR_SUPPORT_HOST: u32 = 1 << 0;
pub const PTR_SUPPORT_DEVICE: u32 = 1 << 1;
pub const PTR_SUPPORT_DMABUF: u32 = 1 << 2;

const DEFAULT_PLUGIN_NAME: &str = "Libfabric";
const MAX_COLL_BYTES: usize = 2 * 1024 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Properties {
    pub name: String,
    pub pci_path: Option<String>,
    pub guid: u64,
    pub ptr_support: u32,
    pub reg_is_global: bool,
    /// Link speed in Mbps.
    pub speed: u32,
    pub port: u16,
    pub latency_us: f32,
    pub max_p2p_bytes: usize,
    pub max_coll_bytes: usize,
}

impl Properties {
    pub fn for_domain(domain: &FabricDomain, guid: u64) -> Properties {
        Properties {
            name: plugin_name().to_string(),
            pci_path: None,
            guid,
            ptr_support: PTR_SUPPORT_HOST | PTR_SUPPORT_DEVICE,
            reg_is_global: false,
            speed: 100_000,
            port: 1,
            latency_us: 0.0,
            max_p2p_bytes: domain.max_msg_size(),
            max_coll_bytes: MAX_COLL_BYTES,
        }
    }
}

/// The advertised plugin name. Older runtimes select this plugin by
/// comparing it against the `NCCL_NET` environment variable, under the
/// names previous releases shipped with, so an exact (case-insensitive)
/// match rewrites the name accordingly.
pub fn plugin_name() -> &'static str {
    resolve_plugin_name(std::env::var("NCCL_NET").ok().as_deref())
}

pub(crate) fn resolve_plugin_name(env_value: Option<&str>) -> &'static str {
    match env_value {
        Some(v) if v.eq_ignore_ascii_case("AWS Libfabric") => "AWS Libfabric",
        Some(v) if v.eq_ignore_ascii_case("OFI") => "OFI",
        _ => DEFAULT_PLUGIN_NAME,
    }
}
