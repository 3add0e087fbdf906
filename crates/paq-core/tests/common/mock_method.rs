//! Scripted mock methods for integration tests.
//!
//! Each "method" is a small POSIX sh script installed into a temporary
//! methods directory. The scripts speak the real wire protocol on
//! stdin/stdout, which exercises the full spawn/handshake/pipeline path.

use std::path::Path;

use paq_core::config::AcquireConfig;

pub struct MethodsDir {
    dir: tempfile::TempDir,
}

impl MethodsDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Install `script` as the helper binary for access method `name`.
    pub fn install(&self, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = self.dir.path().join(name);
        std::fs::write(&path, script).expect("write method script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .expect("chmod method script");
    }
}

/// Engine config pointing at the mock methods dir, with short timeouts so a
/// broken test fails fast instead of hanging.
pub fn test_config(methods: &MethodsDir) -> AcquireConfig {
    let mut cfg = AcquireConfig::default();
    cfg.methods_dir = methods.path().to_path_buf();
    cfg.startup_timeout_secs = 5;
    cfg.stall_timeout_secs = 60;
    cfg
}

/// Serves every request in order: 200, writes `hello world`, 201.
pub const BASIC: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf '200 URI Start\nURI: %s\nSize: 11\n\n' "$uri"
      printf 'hello world' > "$file"
      printf '201 URI Done\nURI: %s\nSize: 11\n\n' "$uri"
      ;;
  esac
done
"#;

/// Advertises pipelining, then refuses to answer anything until two full
/// requests have arrived. Completes only if the engine really pipelines.
pub const PIPELINE_PAIR: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\nPipeline: true\n\n'
count=0
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      count=$((count+1))
      eval "uri_$count=\$uri"
      eval "file_$count=\$file"
      [ "$count" = 2 ] && break
      ;;
  esac
done
for i in 1 2; do
  eval "u=\$uri_$i"
  eval "f=\$file_$i"
  printf 'data-%s' "$i" > "$f"
  printf '200 URI Start\nURI: %s\nSize: 6\n\n' "$u"
  printf '201 URI Done\nURI: %s\nSize: 6\n\n' "$u"
done
cat > /dev/null
"#;

/// Sends a valid handshake and immediately exits.
pub const CRASH_AFTER_HANDSHAKE: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\nPipeline: true\n\n'
exit 0
"#;

/// Exits without producing a single byte of output.
pub const EXITS_SILENTLY: &str = r#"#!/bin/sh
exit 0
"#;

/// Takes two seconds to produce its handshake, then serves normally.
pub const SLOW_START: &str = r#"#!/bin/sh
sleep 2
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf 'hello world' > "$file"
      printf '201 URI Done\nURI: %s\nSize: 11\n\n' "$uri"
      ;;
  esac
done
"#;

/// Writes its own PID into every fetched file, so tests can tell which
/// worker process served a request.
pub const PID_STAMP: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf '%s' "$$" > "$file"
      printf '201 URI Done\nURI: %s\n\n' "$uri"
      ;;
  esac
done
"#;

/// Like [`PID_STAMP`] but declares Single-Instance.
pub const SINGLE_INSTANCE_PID: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\nSingle-Instance: true\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf '%s' "$$" > "$file"
      printf '201 URI Done\nURI: %s\n\n' "$uri"
      ;;
  esac
done
"#;

/// The first process asked for a URI on the `unstable` host dies; later
/// processes serve everything. A marker file next to the script carries the
/// crash history across worker respawns.
pub const CRASH_ONCE_ON_UNSTABLE: &str = r#"#!/bin/sh
marker="$0.crashed"
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      case "$uri" in
        *unstable*)
          if [ ! -e "$marker" ]; then
            : > "$marker"
            exit 0
          fi
          ;;
      esac
      printf 'served' > "$file"
      printf '201 URI Done\nURI: %s\n\n' "$uri"
      ;;
  esac
done
"#;

/// Answers conditional fetches with an IMS hit and never touches the
/// destination; unconditional fetches are served normally.
pub const IMS: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
lm=""
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    Last-Modified:*) lm=1 ;;
    "")
      if [ -n "$lm" ]; then
        printf '201 URI Done\nURI: %s\nIMS-Hit: true\n\n' "$uri"
      else
        printf 'fresh' > "$file"
        printf '201 URI Done\nURI: %s\nSize: 5\n\n' "$uri"
      fi
      lm=""
      ;;
  esac
done
"#;

/// First request fails with a transient error, the retry succeeds.
pub const FLAKY_ONCE: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
attempt=0
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      attempt=$((attempt+1))
      if [ "$attempt" = 1 ]; then
        printf '400 URI Failure\nURI: %s\nMessage: connection reset\nTransient: true\n\n' "$uri"
      else
        printf 'retry-ok' > "$file"
        printf '201 URI Done\nURI: %s\nSize: 8\n\n' "$uri"
      fi
      ;;
  esac
done
"#;

/// Rejects everything with a permanent failure.
pub const ALWAYS_FAILS: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    "")
      printf '400 URI Failure\nURI: %s\nMessage: unsupported uri\nTransient: false\n\n' "$uri"
      ;;
  esac
done
"#;

/// Requests the configuration tree and writes the first Config-Item it was
/// given into every fetched file.
pub const ECHO_CONFIG: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\nSend-Config: true\n\n'
cfgval=""
uri=""
while read -r line; do
  case "$line" in
    Config-Item:*) [ -z "$cfgval" ] && cfgval=${line#Config-Item: } ;;
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      if [ -n "$uri" ]; then
        printf '%s' "$cfgval" > "$file"
        printf '201 URI Done\nURI: %s\n\n' "$uri"
        uri=""
      fi
      ;;
  esac
done
"#;

/// Accepts requests and then goes silent forever.
pub const SILENT: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
cat > /dev/null
"#;

/// Demands a media change for the first request and honours the 603 answer.
pub const MEDIA: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\nRemovable: true\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf '403 Media Failure\nMedia: disc-1\nDrive: /dev/sr0\n\n'
      failed=""
      while read -r reply; do
        case "$reply" in
          Failed:*) failed=${reply#Failed: } ;;
          "") break ;;
        esac
      done
      if [ "$failed" = "true" ]; then
        printf '400 URI Failure\nURI: %s\nMessage: media unavailable\nTransient: false\n\n' "$uri"
      else
        printf 'disc data' > "$file"
        printf '201 URI Done\nURI: %s\nSize: 9\n\n' "$uri"
      fi
      ;;
  esac
done
"#;

/// Asks for credentials and records what it got in the fetched file.
pub const AUTH: &str = r#"#!/bin/sh
printf '100 Capabilities\nVersion: 1.0\n\n'
while read -r line; do
  case "$line" in
    URI:*) uri=${line#URI: } ;;
    FileName:*) file=${line#FileName: } ;;
    "")
      printf '402 Authorization Required\nSite: example.org\n\n'
      user=""
      pass=""
      while read -r reply; do
        case "$reply" in
          User:*) user=${reply#User: } ;;
          Password:*) pass=${reply#Password: } ;;
          "") break ;;
        esac
      done
      if [ -n "$user" ]; then
        printf '%s:%s' "$user" "$pass" > "$file"
        printf '201 URI Done\nURI: %s\n\n' "$uri"
      else
        printf '400 URI Failure\nURI: %s\nMessage: authorization failed\nTransient: false\n\n' "$uri"
      fi
      ;;
  esac
done
"#;
