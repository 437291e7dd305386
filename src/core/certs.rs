//! TLS certificate bootstrap.
//!
//! The API server needs a certificate and key at the configured paths.
//! If either is missing, a self-signed pair is generated so a fresh
//! install comes up serving TLS without any ceremony.

use anyhow::{Context, Result};
use std::path::Path;

/// Make sure a certificate/key pair exists, generating a self-signed
/// one if needed. Returns whether a pair was generated.
pub fn ensure_tls(cert_path: &Path, key_path: &Path, hostnames: &[String]) -> Result<bool> {
    if cert_path.exists() && key_path.exists() {
        return Ok(false);
    }

    let mut names: Vec<String> = hostnames.to_vec();
    if names.is_empty() {
        names.push("localhost".to_string());
    }
    let certified = rcgen::generate_simple_self_signed(names)
        .context("generating self-signed certificate")?;

    for parent in [cert_path.parent(), key_path.parent()].into_iter().flatten() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    std::fs::write(cert_path, certified.cert.pem())
        .with_context(|| format!("writing {}", cert_path.display()))?;
    std::fs::write(key_path, certified.key_pair.serialize_pem())
        .with_context(|| format!("writing {}", key_path.display()))?;
    Ok(true)
}
