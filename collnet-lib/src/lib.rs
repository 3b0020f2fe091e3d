pub mod api;
mod cm;
mod ep;
mod error;
mod fabric;
mod freelist;
mod gin;
mod idpool;
mod props;
mod reqs;
mod utils;

pub use cm::{ConnectHandle, ConnectionManager, Listener, Receiver, SendConnector};
pub use error::{CollNetError, LibfabricError, Result};
pub use fabric::FabricDomain;
pub use gin::{GinComm, GinMrHandle, GinResources, IputSignalRequest, RingChannel};
pub use idpool::IdPool;
pub use props::{
    PTR_SUPPORT_DEVICE, PTR_SUPPORT_DMABUF, PTR_SUPPORT_HOST, Properties, plugin_name,
};

#[cfg(test)]
mod test_allgather;

#[cfg(test)]
mod test_freelist;

#[cfg(test)]
mod test_idpool;

#[cfg(test)]
mod test_imm;

#[cfg(test)]
mod test_pending;

#[cfg(test)]
mod test_props;

#[cfg(test)]
mod test_reassembly;

#[cfg(test)]
mod test_wire;
