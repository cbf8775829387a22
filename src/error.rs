use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while provisioning instances, templates and
/// cloned databases. Every variant carries enough state (paths, command text,
/// captured stderr) to diagnose the failure offline; nothing is retried
/// silently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error(
        "external command failed\n\
         instance: {instance}\n\
         directory: {directory}\n\
         command: {command_line}\n\
         exit: {status}\n\
         stderr: {stderr}"
    )]
    ExternalCommand {
        instance: String,
        directory: String,
        command_line: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("failed to spawn '{command_line}'")]
    Spawn {
        command_line: String,
        #[source]
        source: io::Error,
    },

    #[error("the database name '{name}' is reserved")]
    ReservedName { name: String },

    #[error("the database name '{name}' has already been used (data file: {})", data_file.display())]
    DuplicateName { name: String, data_file: PathBuf },

    #[error("an instance named '{name}' is already registered in this process")]
    DuplicateInstance { name: String },

    #[error(
        "failed to {operation}\n\
         instance: {instance}\n\
         database: {database}\n\
         data file: {data_file}\n\
         command text: {command_text}"
    )]
    Command {
        operation: &'static str,
        instance: String,
        database: String,
        data_file: String,
        command_text: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("template build routine failed")]
    BuildRoutine {
        #[source]
        source: anyhow::Error,
    },

    #[error("io error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
