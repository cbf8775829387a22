use crate::dirs;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Owns one named local server instance: creation, stop, deletion and the
/// files under its directory. All instance management goes through the
/// external command configured in [`EngineConfig`](crate::config::EngineConfig)
/// (`create <name> -s`, `stop <name>`, `delete <name>`; exit code 0 = success).
pub struct InstanceController {
    name: String,
    directory: PathBuf,
    server_address: String,
    command: String,
    // Guards the one-time create call so concurrent first use never issues
    // overlapping create invocations.
    created: Mutex<bool>,
}

impl InstanceController {
    pub fn new(name: &str, directory: PathBuf, command: String) -> Result<Self> {
        dirs::validate_name(name)?;
        std::fs::create_dir_all(&directory).map_err(|source| Error::io(&directory, source))?;
        let server_address = format!(r"(LocalDb)\{name}");
        log::debug!("instance '{name}' at {server_address}, directory {directory:?}");
        Ok(Self {
            name: name.to_string(),
            directory,
            server_address,
            command,
            created: Mutex::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Idempotently create (and start) the instance. The underlying tool
    /// treats `create` for an existing instance as a no-op, but the call is
    /// still guarded so one process never runs two creates concurrently.
    pub async fn ensure_created(&self) -> Result<()> {
        let mut created = self.created.lock().await;
        if *created {
            return Ok(());
        }
        self.run(&["create", &self.name, "-s"], false).await?;
        *created = true;
        Ok(())
    }

    /// Stop the instance. An already-stopped or unregistered instance is
    /// success, not failure.
    pub async fn stop(&self) -> Result<()> {
        self.run(&["stop", &self.name], true).await
    }

    /// Stop the instance and remove its registration.
    pub async fn delete(&self) -> Result<()> {
        self.stop().await?;
        self.run(&["delete", &self.name], true).await?;
        let mut created = self.created.lock().await;
        *created = false;
        Ok(())
    }

    /// Delete every file directly inside the instance directory, except the
    /// one whose file stem equals `exclude`. Used for a files-only reset that
    /// preserves the uniqueness marker.
    pub async fn delete_files(&self, exclude: Option<&str>) -> Result<()> {
        let entries =
            std::fs::read_dir(&self.directory).map_err(|source| Error::io(&self.directory, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| Error::io(&self.directory, source))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(exclude) = exclude {
                if path.file_stem().and_then(|s| s.to_str()) == Some(exclude) {
                    continue;
                }
            }
            tokio::fs::remove_file(&path)
                .await
                .map_err(|source| Error::io(&path, source))?;
        }
        Ok(())
    }

    /// Run one management verb. When `tolerate_failure` is set (stop/delete),
    /// a non-zero exit is logged and treated as success: the instance is gone
    /// either way, and the tool reports "not running" / "does not exist"
    /// through the same exit path as real failures.
    async fn run(&self, args: &[&str], tolerate_failure: bool) -> Result<()> {
        let command_line = format!("{} {}", self.command, args.join(" "));
        log::debug!("running: {command_line}");
        let output = Command::new(&self.command)
            .args(args)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                command_line: command_line.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if tolerate_failure {
            log::warn!(
                "'{command_line}' exited with {} (tolerated): {stderr}",
                output.status
            );
            return Ok(());
        }
        Err(Error::ExternalCommand {
            instance: self.name.clone(),
            directory: self.directory.display().to_string(),
            command_line,
            status: output.status,
            stderr,
        })
    }
}
