use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use paq_core::config::AcquireConfig;
use paq_core::hash::{HashKind, HashList, HashString};
use paq_core::item::FetchItem;
use paq_core::scheduler::Acquire;

use crate::cli::progress::TextProgress;

/// Destination filename for a URI: its last path segment, or a safe default.
fn dest_name(uri: &str) -> String {
    uri.rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .unwrap_or("download")
        .to_string()
}

pub async fn run_fetch(
    cfg: AcquireConfig,
    uris: Vec<String>,
    dest_dir: Option<PathBuf>,
    sha256: Option<String>,
    pulse_ms: u64,
    timeout: Option<u64>,
) -> Result<()> {
    if sha256.is_some() && uris.len() > 1 {
        bail!("--sha256 only applies to a single-URI fetch");
    }
    let dest_dir = match dest_dir {
        Some(d) => d,
        None => std::env::current_dir()?,
    };

    let mut acquire = Acquire::with_progress(cfg, Box::new(TextProgress));
    for uri in &uris {
        let mut item = FetchItem::new(uri.clone(), dest_dir.join(dest_name(uri)));
        if let Some(hex) = &sha256 {
            let mut hashes = HashList::default();
            hashes.push(HashString::new(HashKind::Sha256, hex.clone()));
            item = item.with_hashes(hashes);
        }
        acquire
            .submit(item)
            .with_context(|| format!("submit {uri}"))?;
    }

    let outcome = acquire
        .run(
            Duration::from_millis(pulse_ms.max(1)),
            timeout.map(Duration::from_secs),
        )
        .await?;

    if !outcome.is_success() {
        for f in &outcome.failures {
            eprintln!("failed: {} ({})", f.uri, f.reason);
        }
        bail!("{} of {} fetches failed", outcome.failures.len(), uris.len());
    }
    Ok(())
}
