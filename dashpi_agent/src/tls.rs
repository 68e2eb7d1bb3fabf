use anyhow::Context;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;

/// `$XDG_CONFIG_HOME/dashpi_agent/tls`, falling back to `~/.config`.
pub fn config_dir() -> PathBuf {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| Path::new(&h).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dashpi_agent")
        .join("tls")
}

pub fn cert_paths(dir: &Path) -> (PathBuf, PathBuf) {
    (dir.join("cert.pem"), dir.join("key.pem"))
}

/// Returns the stored self-signed pair, generating it on first use.
pub fn ensure_self_signed_cert() -> anyhow::Result<(PathBuf, PathBuf)> {
    ensure_self_signed_cert_in(&config_dir())
}

/// An existing pair in `dir` is returned untouched, whatever it contains.
pub fn ensure_self_signed_cert_in(dir: &Path) -> anyhow::Result<(PathBuf, PathBuf)> {
    let (cert_path, key_path) = cert_paths(dir);
    if cert_path.exists() && key_path.exists() {
        info!("using TLS certificate at {}", cert_path.display());
        return Ok((cert_path, key_path));
    }
    fs::create_dir_all(dir).with_context(|| format!("couldn't create {}", dir.display()))?;

    let certified = rcgen::generate_simple_self_signed(subject_names())
        .context("couldn't generate self-signed certificate")?;
    fs::write(&cert_path, certified.cert.pem())
        .with_context(|| format!("couldn't write {}", cert_path.display()))?;
    fs::write(&key_path, certified.key_pair.serialize_pem())
        .with_context(|| format!("couldn't write {}", key_path.display()))?;

    info!(
        "generated self-signed TLS certificate at {}",
        cert_path.display()
    );
    info!("private key at {}", key_path.display());
    Ok((cert_path, key_path))
}

// hostname first, then the loopbacks
fn subject_names() -> Vec<String> {
    let mut sans = vec![
        "localhost".to_string(),
        "127.0.0.1".to_string(),
        "::1".to_string(),
    ];
    if let Some(host) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
        if host != "localhost" && !host.is_empty() {
            sans.insert(0, host);
        }
    }
    sans
}
