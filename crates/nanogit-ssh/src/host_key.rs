//! Host key loading, with first-run generation through `ssh-keygen`.

use std::path::Path;
use std::process::Stdio;

use russh::keys::PrivateKey;
use tokio::process::Command;

use crate::config::KeygenConfig;
use crate::error::ConfigError;

/// Load the host key at `path`, generating it first if the file is missing.
pub async fn load_or_generate_host_key(
    path: &Path,
    keygen: &KeygenConfig,
) -> Result<PrivateKey, ConfigError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        generate_host_key(path, keygen).await?;
    }

    let passphrase = (!keygen.passphrase.is_empty()).then_some(keygen.passphrase.as_str());
    let key = russh::keys::load_secret_key(path, passphrase).map_err(|source| {
        ConfigError::HostKey {
            path: path.to_path_buf(),
            source,
        }
    })?;
    tracing::info!(path = %path.display(), algorithm = %key.algorithm(), "loaded host key");
    Ok(key)
}

async fn generate_host_key(path: &Path, keygen: &KeygenConfig) -> Result<(), ConfigError> {
    let failed = |reason: String| ConfigError::KeyGeneration {
        path: path.to_path_buf(),
        reason,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(format!("cannot create {}: {e}", parent.display())))?;
    }

    let output = Command::new("ssh-keygen")
        .arg("-q")
        .arg("-f")
        .arg(path)
        .arg("-t")
        .arg(&keygen.key_type)
        .arg("-N")
        .arg(&keygen.passphrase)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| failed(format!("cannot run ssh-keygen: {e}")))?;

    if !output.status.success() {
        return Err(failed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    tracing::info!(path = %path.display(), key_type = %keygen.key_type, "generated new host key");
    Ok(())
}
