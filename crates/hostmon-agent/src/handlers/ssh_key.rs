//! Handler for `UPDATE_SSH_KEY` commands: installs a public or signed SSH
//! key into a local user's `authorized_keys`.

use crate::registry::CommandHandler;
use anyhow::Result;
use async_trait::async_trait;
use hostmon_common::types::CommandOutcome;
use serde_json::{Map, Value};
use std::io;
use std::path::Path;

pub struct SshKeyUpdater;

#[async_trait]
impl CommandHandler for SshKeyUpdater {
    fn kind(&self) -> &str {
        "UPDATE_SSH_KEY"
    }

    async fn handle(&self, payload: &Map<String, Value>) -> Result<CommandOutcome> {
        let Some(ssh_user) = payload
            .get("sshUser")
            .and_then(Value::as_str)
            .filter(|user| !user.is_empty())
        else {
            return Ok(CommandOutcome::error("missing sshUser in payload"));
        };

        let public_key = payload.get("publicKey").and_then(Value::as_str);
        let signed_key = payload.get("signedKey").and_then(Value::as_str);
        // A Vault-signed key takes precedence over the plain public key.
        let Some(key) = signed_key
            .or(public_key)
            .map(str::trim)
            .filter(|key| !key.is_empty())
        else {
            return Ok(CommandOutcome::error(
                "missing publicKey or signedKey in payload",
            ));
        };

        #[cfg(unix)]
        {
            match install_key(ssh_user, key) {
                Ok(path) => Ok(CommandOutcome::success_with_data(
                    format!("SSH key added for user {ssh_user}"),
                    serde_json::json!({ "path": path }),
                )),
                Err(e) => Ok(CommandOutcome::error(format!(
                    "failed to update SSH key: {e:#}"
                ))),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = key;
            Ok(CommandOutcome::error(
                "SSH key updates are only supported on unix hosts",
            ))
        }
    }
}

/// Appends `key` to `authorized_keys` unless an identical line is already
/// present. Returns whether the file changed.
fn append_key(authorized_keys: &Path, key: &str) -> io::Result<bool> {
    let existing = match std::fs::read_to_string(authorized_keys) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    if existing.lines().any(|line| line.trim() == key) {
        return Ok(false);
    }
    let mut contents = existing;
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(key);
    contents.push('\n');
    std::fs::write(authorized_keys, contents)?;
    Ok(true)
}

#[cfg(unix)]
fn install_key(ssh_user: &str, key: &str) -> Result<String> {
    use anyhow::Context;
    use std::os::unix::fs::PermissionsExt;

    let user = nix::unistd::User::from_name(ssh_user)
        .with_context(|| format!("looking up user {ssh_user}"))?
        .ok_or_else(|| anyhow::anyhow!("user {ssh_user} does not exist on this system"))?;

    let ssh_dir = user.dir.join(".ssh");
    if !ssh_dir.exists() {
        tracing::info!(user = %ssh_user, "Creating .ssh directory");
        std::fs::create_dir_all(&ssh_dir)?;
        std::fs::set_permissions(&ssh_dir, std::fs::Permissions::from_mode(0o700))?;
        std::os::unix::fs::chown(&ssh_dir, Some(user.uid.as_raw()), Some(user.gid.as_raw()))?;
    }

    let authorized_keys = ssh_dir.join("authorized_keys");
    let changed = append_key(&authorized_keys, key)?;
    std::fs::set_permissions(&authorized_keys, std::fs::Permissions::from_mode(0o600))?;
    std::os::unix::fs::chown(
        &authorized_keys,
        Some(user.uid.as_raw()),
        Some(user.gid.as_raw()),
    )?;

    if changed {
        tracing::info!(user = %ssh_user, path = %authorized_keys.display(), "SSH key installed");
    } else {
        tracing::debug!(user = %ssh_user, "SSH key already present");
    }
    Ok(authorized_keys.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(fields: Value) -> Map<String, Value> {
        match fields {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn missing_user_is_an_error_outcome() {
        let outcome = SshKeyUpdater
            .handle(&payload(json!({ "publicKey": "ssh-ed25519 AAA test" })))
            .await
            .unwrap();
        assert_eq!(outcome.message, "missing sshUser in payload");
    }

    #[tokio::test]
    async fn missing_keys_are_an_error_outcome() {
        let outcome = SshKeyUpdater
            .handle(&payload(json!({ "sshUser": "deploy" })))
            .await
            .unwrap();
        assert_eq!(outcome.message, "missing publicKey or signedKey in payload");
    }

    #[test]
    fn append_key_creates_the_file_and_dedupes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");

        assert!(append_key(&path, "ssh-ed25519 AAA deploy@host").unwrap());
        assert!(!append_key(&path, "ssh-ed25519 AAA deploy@host").unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "ssh-ed25519 AAA deploy@host\n");
    }

    #[test]
    fn append_key_starts_on_a_fresh_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, "ssh-rsa BBB ops@host").unwrap();

        assert!(append_key(&path, "ssh-ed25519 AAA deploy@host").unwrap());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "ssh-rsa BBB ops@host\nssh-ed25519 AAA deploy@host\n");
    }
}
