//! Operator tool: open a provider domain and print what the cores
//! would see on this machine.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use collnet_lib::{ConnectionManager, FabricDomain, Properties, plugin_name};
use logging_lib::LoggingOpts;

#[derive(Debug, Parser)]
#[command(about = "Probe libfabric providers for the collnet cores")]
struct Opts {
    /// Restrict provider selection, e.g. "efa" or "tcp".
    #[clap(long)]
    provider: Option<String>,

    /// Also bring up a connection-manager endpoint on the domain.
    #[clap(long)]
    cm: bool,

    /// Transport payload size to configure the CM with.
    #[clap(long, default_value_t = 64)]
    conn_msg_data_size: usize,

    #[clap(flatten)]
    logging: LoggingOpts,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging_lib::init(&opts.logging)?;

    let domain = FabricDomain::open(opts.provider.as_deref())
        .context("failed to open a provider domain")?;

    println!("plugin name:     {}", plugin_name());
    println!("provider:        {}", domain.provider_name());
    println!("auto progress:   {}", domain.auto_progress());
    println!("endpoint-MR:     {}", domain.endpoint_mr());
    println!("inject size:     {}", domain.inject_size());
    println!("max msg size:    {}", domain.max_msg_size());

    let props = Properties::for_domain(&domain, 0);
    println!("ptr support:     {:#x}", props.ptr_support);
    println!("max p2p bytes:   {}", props.max_p2p_bytes);
    println!("max coll bytes:  {}", props.max_coll_bytes);

    if opts.cm {
        let domain = Arc::new(domain);
        let cm =
            ConnectionManager::new(domain, opts.conn_msg_data_size, 1024, None)
                .context("failed to bring up the connection manager")?;
        let listener = cm.listen()?;
        let handle = listener.handle();
        println!(
            "cm listener up:  id {} addr {:?}",
            handle.listener_id, handle.ep_name
        );
    }

    Ok(())
}
