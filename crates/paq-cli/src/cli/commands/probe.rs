use anyhow::Result;

use paq_core::config::AcquireConfig;
use paq_core::scheduler::Acquire;

/// Start the method once, read its Capabilities handshake and print the
/// negotiated record.
pub async fn run_probe(cfg: AcquireConfig, access: &str) -> Result<()> {
    let mut acquire = Acquire::new(cfg);
    let mcfg = acquire.get_config(access).await?;
    println!("Access: {}", mcfg.access);
    println!("Version: {}", mcfg.version);
    println!("Single-Instance: {}", mcfg.single_instance);
    println!("Pipeline: {}", mcfg.pipeline);
    println!("Send-Config: {}", mcfg.send_config);
    println!("Local-Only: {}", mcfg.local_only);
    println!("Removable: {}", mcfg.removable);
    println!("Needs-Cleanup: {}", mcfg.needs_cleanup);
    Ok(())
}
