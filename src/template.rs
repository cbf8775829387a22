use crate::dirs;
use crate::driver::{self, BuildRoutine, RebuildCheck, SqlDriver};
use crate::error::{Error, Result};
use crate::instance::InstanceController;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Reserved name of the canonical built-once database.
pub const TEMPLATE_NAME: &str = "template";

#[derive(Default)]
struct TemplateState {
    /// Set once a build decision has completed this run, together with the
    /// token it was made for.
    built_for: Option<String>,
}

/// Ensures exactly one valid template database exists for an instance.
///
/// The whole decide-and-rebuild path runs under one async mutex, so two
/// concurrent callers with a stale token collapse into a single rebuild and
/// nobody ever observes (or clones) a template mid-rebuild.
pub struct TemplateBuilder {
    controller: Arc<InstanceController>,
    driver: Arc<dyn SqlDriver>,
    state: Mutex<TemplateState>,
}

impl TemplateBuilder {
    pub fn new(controller: Arc<InstanceController>, driver: Arc<dyn SqlDriver>) -> Self {
        Self {
            controller,
            driver,
            state: Mutex::new(TemplateState::default()),
        }
    }

    /// Make the template Fresh for `uniqueness`, rebuilding only when needed:
    /// missing data file, differing persisted token, or a positive rebuild
    /// check against the existing template (consulted only when the token
    /// already matches).
    pub async fn ensure_built(
        &self,
        uniqueness: &str,
        build_routine: &dyn BuildRoutine,
        rebuild_check: Option<&dyn RebuildCheck>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.built_for.as_deref() == Some(uniqueness) {
            return Ok(());
        }

        let directory = self.controller.directory();
        let data_file = dirs::data_file(directory, TEMPLATE_NAME);

        let rebuild = if !data_file.exists() {
            log::info!("template data file missing, rebuilding");
            true
        } else if read_marker(directory)?.as_deref() != Some(uniqueness) {
            log::info!("uniqueness token changed, rebuilding template");
            true
        } else if let Some(check) = rebuild_check {
            self.consult_rebuild_check(check, &data_file).await?
        } else {
            false
        };

        if rebuild {
            self.rebuild(uniqueness, build_routine).await?;
        }
        state.built_for = Some(uniqueness.to_string());
        Ok(())
    }

    /// Token matched; attach the prior template and let the caller's check
    /// decide. Attach failure means the on-disk file and the server
    /// registration disagree, which is treated as "requires rebuild" rather
    /// than a fatal inconsistency.
    async fn consult_rebuild_check(
        &self,
        check: &dyn RebuildCheck,
        data_file: &Path,
    ) -> Result<bool> {
        let attach_text = attach_template_text(data_file);
        if let Err(error) = self.execute_on_master("attach template", &attach_text).await {
            log::warn!("could not attach prior template, rebuilding: {error}");
            return Ok(true);
        }

        let template_connection = driver::connection_string(
            self.controller.server_address(),
            TEMPLATE_NAME,
            false,
        );
        let result = async {
            let mut connection = self
                .driver
                .connect(&template_connection)
                .await
                .map_err(|source| self.command_error("connect to template", data_file, "", source))?;
            check
                .requires_rebuild(&mut *connection)
                .await
                .map_err(|source| {
                    self.command_error("evaluate rebuild check", data_file, "", source)
                })
        }
        .await;

        // The template must be detached again either way so its files stay
        // free to copy (or to delete during the rebuild).
        self.execute_on_master("detach template", detach_template_text())
            .await?;
        result
    }

    /// Replace whatever template exists with a freshly built one. The new
    /// uniqueness token is persisted only after the build routine succeeds, so
    /// a failed build leaves the marker unchanged and the next run retries.
    async fn rebuild(&self, uniqueness: &str, build_routine: &dyn BuildRoutine) -> Result<()> {
        let directory = self.controller.directory();
        let data_file = dirs::data_file(directory, TEMPLATE_NAME);

        self.execute_on_master("drop prior template", drop_template_text())
            .await?;
        remove_if_exists(&data_file).await?;
        remove_if_exists(&dirs::log_file(directory, TEMPLATE_NAME)).await?;

        let create_text = create_template_text(&data_file);
        self.execute_on_master("create template database", &create_text)
            .await?;

        let template_connection = driver::connection_string(
            self.controller.server_address(),
            TEMPLATE_NAME,
            false,
        );
        let mut connection = self
            .driver
            .connect(&template_connection)
            .await
            .map_err(|source| self.command_error("connect to template", &data_file, "", source))?;
        build_routine
            .build(&mut *connection)
            .await
            .map_err(|source| Error::BuildRoutine { source })?;
        drop(connection);

        write_marker(directory, uniqueness).await?;

        self.execute_on_master("detach template", detach_template_text())
            .await?;
        log::info!(
            "template rebuilt for instance '{}' (token {uniqueness:?})",
            self.controller.name()
        );
        Ok(())
    }

    async fn execute_on_master(&self, operation: &'static str, command_text: &str) -> Result<()> {
        let master = driver::master_connection_string(self.controller.server_address());
        let data_file = dirs::data_file(self.controller.directory(), TEMPLATE_NAME);
        let mut connection = self
            .driver
            .connect(&master)
            .await
            .map_err(|source| self.command_error(operation, &data_file, command_text, source))?;
        connection
            .execute(command_text)
            .await
            .map_err(|source| self.command_error(operation, &data_file, command_text, source))
    }

    fn command_error(
        &self,
        operation: &'static str,
        data_file: &Path,
        command_text: &str,
        source: anyhow::Error,
    ) -> Error {
        Error::Command {
            operation,
            instance: self.controller.name().to_string(),
            database: TEMPLATE_NAME.to_string(),
            data_file: data_file.display().to_string(),
            command_text: command_text.to_string(),
            source,
        }
    }
}

/// Read the persisted uniqueness token, `None` when no marker exists yet.
pub fn read_marker(directory: &Path) -> Result<Option<String>> {
    let path = dirs::marker_file(directory);
    match std::fs::read_to_string(&path) {
        Ok(token) => Ok(Some(token)),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(Error::io(path, source)),
    }
}

/// Persist the uniqueness token with atomic replace semantics: write to a
/// sibling temp file, then rename over the marker. A crash mid-write can
/// never leave a partial token that reads as valid.
pub async fn write_marker(directory: &Path, token: &str) -> Result<()> {
    let path = dirs::marker_file(directory);
    let staging = path.with_extension("txt.tmp");
    tokio::fs::write(&staging, token)
        .await
        .map_err(|source| Error::io(&staging, source))?;
    tokio::fs::rename(&staging, &path)
        .await
        .map_err(|source| Error::io(&path, source))?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(Error::io(path, source)),
    }
}

fn create_template_text(data_file: &Path) -> String {
    format!(
        "\
create database [template] on
(
    name = [template],
    filename = '{}',
    size = 10MB,
    fileGrowth = 5MB
);
",
        data_file.display()
    )
}

fn attach_template_text(data_file: &Path) -> String {
    format!(
        "\
create database [template] on
(
    name = [template],
    filename = '{}',
    size = 10MB,
    fileGrowth = 5MB
)
for attach;
",
        data_file.display()
    )
}

fn drop_template_text() -> &'static str {
    "\
if db_id('template') is not null
begin
    alter database [template] set single_user with rollback immediate;
    exec sp_detach_db 'template', 'true';
end;
"
}

fn detach_template_text() -> &'static str {
    "exec sp_detach_db 'template', 'true';"
}
