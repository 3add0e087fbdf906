//! Access-method capability records and helper-binary lookup.

use std::path::{Path, PathBuf};

use crate::error::{AcquireError, Result};
use crate::protocol::Message;

/// Pipeline depth granted to methods that negotiated `Pipeline: true`,
/// before clamping by configuration.
pub const DEFAULT_PIPELINE_DEPTH: usize = 10;

/// Capability record built from a method's 100 Capabilities handshake.
///
/// Cached once per access-method name and shared read-only by every worker
/// of that method.
#[derive(Debug, Clone)]
pub struct MethodConfig {
    /// The access-method name (http, ftp, file, ...).
    pub access: String,
    /// Implementation version advertised by the helper.
    pub version: String,
    /// Only one queue (and worker) may exist for this method.
    pub single_instance: bool,
    /// The method accepts multiple outstanding requests.
    pub pipeline: bool,
    /// The method wants the full configuration tree pushed via 601.
    pub send_config: bool,
    /// The method needs no network; all files come from local disk.
    pub local_only: bool,
    /// The method fetches from removable media and may raise 403.
    pub removable: bool,
    /// The subprocess must stay alive until final shutdown (e.g. to unmount).
    pub needs_cleanup: bool,
}

impl MethodConfig {
    pub fn from_capabilities(access: impl Into<String>, msg: &Message) -> Self {
        Self {
            access: access.into(),
            version: msg.header("Version").unwrap_or("").to_string(),
            single_instance: msg.header_bool("Single-Instance", false),
            pipeline: msg.header_bool("Pipeline", false),
            send_config: msg.header_bool("Send-Config", false),
            local_only: msg.header_bool("Local-Only", false),
            removable: msg.header_bool("Removable", false),
            needs_cleanup: msg.header_bool("Needs-Cleanup", false),
        }
    }

    /// Outstanding requests this method's worker may hold at once.
    pub fn pipeline_depth(&self, max_depth: usize) -> usize {
        if self.pipeline {
            DEFAULT_PIPELINE_DEPTH.min(max_depth.max(1))
        } else {
            1
        }
    }
}

/// Resolve the helper binary for an access method, verifying it exists.
pub fn method_path(methods_dir: &Path, access: &str) -> Result<PathBuf> {
    let path = methods_dir.join(access);
    if !path.is_file() {
        return Err(AcquireError::UnknownMethod {
            access: access.to_string(),
            dir: methods_dir.to_path_buf(),
        });
    }
    Ok(path)
}

/// Split a URI into its access method (scheme) and host, if any.
pub fn parse_uri(uri: &str) -> Result<(String, Option<String>)> {
    let parsed = url::Url::parse(uri).map_err(|e| AcquireError::InvalidUri {
        uri: uri.to_string(),
        reason: e.to_string(),
    })?;
    let access = parsed.scheme().to_string();
    if access.is_empty() {
        return Err(AcquireError::InvalidUri {
            uri: uri.to_string(),
            reason: "missing scheme".to_string(),
        });
    }
    Ok((access, parsed.host_str().map(str::to_string)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_parsing() {
        let msg = Message::new(100, "Capabilities")
            .with("Version", "1.2")
            .with("Pipeline", "true")
            .with("Send-Config", "true")
            .with("Single-Instance", "false");
        let cfg = MethodConfig::from_capabilities("http", &msg);
        assert_eq!(cfg.access, "http");
        assert_eq!(cfg.version, "1.2");
        assert!(cfg.pipeline);
        assert!(cfg.send_config);
        assert!(!cfg.single_instance);
        assert!(!cfg.local_only);
    }

    #[test]
    fn pipeline_depth_clamps() {
        let msg = Message::new(100, "Capabilities").with("Pipeline", "true");
        let cfg = MethodConfig::from_capabilities("http", &msg);
        assert_eq!(cfg.pipeline_depth(4), 4);
        assert_eq!(cfg.pipeline_depth(100), DEFAULT_PIPELINE_DEPTH);

        let serial = MethodConfig::from_capabilities("ftp", &Message::new(100, "Capabilities"));
        assert_eq!(serial.pipeline_depth(100), 1);
    }

    #[test]
    fn parse_uri_scheme_and_host() {
        let (access, host) = parse_uri("http://deb.example.org/pool/a.deb").unwrap();
        assert_eq!(access, "http");
        assert_eq!(host.as_deref(), Some("deb.example.org"));

        let (access, host) = parse_uri("file:///var/cache/a.deb").unwrap();
        assert_eq!(access, "file");
        assert_eq!(host, None);

        assert!(parse_uri("not a uri").is_err());
    }

    #[test]
    fn method_path_requires_existing_binary() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            method_path(dir.path(), "http"),
            Err(AcquireError::UnknownMethod { .. })
        ));
        std::fs::write(dir.path().join("http"), "#!/bin/sh\n").unwrap();
        assert!(method_path(dir.path(), "http").is_ok());
    }
}
