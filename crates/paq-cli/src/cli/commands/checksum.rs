use anyhow::Result;
use std::path::Path;

use paq_core::hash::{hash_path, HashKind};

pub fn run_checksum(path: &Path) -> Result<()> {
    let digest = hash_path(path, HashKind::Sha256)?;
    println!("{digest}  {}", path.display());
    Ok(())
}
