//! Keyring integration for secure credential storage.
//! Falls back to a restrictive-permission file if the OS keyring is unavailable.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const SERVICE_NAME: &str = "voice-gateway";

fn fallback_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "voice-gateway", "voice-gateway")
        .context("Failed to resolve project directories")?;
    let dir = base.config_dir().join("secrets");
    fs::create_dir_all(&dir).context("Failed to create secrets directory")?;
    Ok(dir)
}

fn fallback_path(key: &str) -> Result<PathBuf> {
    Ok(fallback_dir()?.join(format!("{key}.secret")))
}

/// Store a named secret (e.g. `"stt-api-key"`, `"tts-api-key"`, `"llm-api-key"`,
/// `"telephony-auth-token"`, `"admin-bearer-token"`).
pub fn set_secret(key: &str, value: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, key) {
        if entry.set_password(value).is_ok() {
            let _ = save_to_file(key, value);
            return Ok(());
        }
    }

    save_to_file(key, value)?;
    Ok(())
}

fn save_to_file(key: &str, value: &str) -> Result<()> {
    let path = fallback_path(key)?;
    fs::write(&path, value).context("Failed to write secret file")?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
            .context("Failed to set file permissions")?;
    }

    Ok(())
}

/// Retrieve a named secret, preferring the OS keyring.
pub fn get_secret(key: &str) -> Result<String> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, key) {
        if let Ok(value) = entry.get_password() {
            return Ok(value);
        }
    }

    let path = fallback_path(key)?;
    let value = fs::read_to_string(&path)
        .with_context(|| format!("Secret '{key}' not configured. Run 'voice-gateway key set {key} <value>' first."))?;
    Ok(value.trim().to_string())
}

pub fn delete_secret(key: &str) -> Result<()> {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, key) {
        let _ = entry.delete_credential();
    }

    let path = fallback_path(key)?;
    if path.exists() {
        fs::remove_file(&path).context("Failed to delete secret file")?;
    }

    Ok(())
}

pub fn has_secret(key: &str) -> bool {
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, key) {
        if entry.get_password().is_ok() {
            return true;
        }
    }

    fallback_path(key).map(|p| p.exists()).unwrap_or(false)
}
