use crate::cloner::DatabaseCloner;
use crate::config::AppConfig;
use crate::dirs;
use crate::driver::{self, BuildRoutine, RebuildCheck, SqlDriver};
use crate::error::{Error, Result};
use crate::instance::InstanceController;
use crate::lifecycle::LifecycleManager;
use crate::template::TemplateBuilder;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Process-wide set of registered instance names. One `SqlInstance` per
/// logical database configuration; registering the same name twice is a
/// construction-time error rather than silently shared state.
fn registered_instances() -> &'static Mutex<HashSet<String>> {
    static REGISTERED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    REGISTERED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// A materialized, independently usable database cloned from the template.
#[derive(Debug, Clone)]
pub struct Database {
    pub name: String,
    pub connection_string: String,
    pub data_file: PathBuf,
}

/// Façade over instance lifecycle, template building and database cloning.
///
/// One `SqlInstance` owns one named server instance and its template; tests
/// share it (typically behind an `Arc`) and call [`create_database`] for a
/// private copy of the built template.
///
/// [`create_database`]: SqlInstance::create_database
pub struct SqlInstance {
    controller: Arc<InstanceController>,
    template: TemplateBuilder,
    cloner: DatabaseCloner,
    lifecycle: LifecycleManager,
    driver: Arc<dyn SqlDriver>,
    /// Database names handed out during this run; a derived-name collision is
    /// a caller error surfaced before any file or server mutation.
    used_names: Mutex<HashSet<String>>,
}

impl SqlInstance {
    pub fn new(name: &str, driver: Arc<dyn SqlDriver>, config: &AppConfig) -> Result<Self> {
        dirs::validate_name(name)?;
        {
            let mut registered = registered_instances().lock();
            if !registered.insert(name.to_string()) {
                return Err(Error::DuplicateInstance {
                    name: name.to_string(),
                });
            }
        }

        let root = dirs::resolve_root(config);
        let directory = match dirs::instance_dir(&root, name) {
            Ok(directory) => directory,
            Err(error) => {
                registered_instances().lock().remove(name);
                return Err(error);
            }
        };
        let controller = match InstanceController::new(
            name,
            directory,
            config.engine.command.clone(),
        ) {
            Ok(controller) => Arc::new(controller),
            Err(error) => {
                registered_instances().lock().remove(name);
                return Err(error);
            }
        };

        Ok(Self {
            template: TemplateBuilder::new(controller.clone(), driver.clone()),
            cloner: DatabaseCloner::new(controller.clone(), driver.clone()),
            lifecycle: LifecycleManager::new(controller.clone(), driver.clone()),
            controller,
            driver,
            used_names: Mutex::new(HashSet::new()),
        })
    }

    pub fn name(&self) -> &str {
        self.controller.name()
    }

    pub fn directory(&self) -> &Path {
        self.controller.directory()
    }

    pub fn server_address(&self) -> &str {
        self.controller.server_address()
    }

    pub fn master_connection_string(&self) -> String {
        driver::master_connection_string(self.controller.server_address())
    }

    /// Ensure the instance is running and its template is Fresh for
    /// `uniqueness`, invoking `build_routine` only when a rebuild is needed.
    pub async fn build(
        &self,
        uniqueness: &str,
        build_routine: &dyn BuildRoutine,
        rebuild_check: Option<&dyn RebuildCheck>,
    ) -> Result<()> {
        self.controller.ensure_created().await?;
        self.template
            .ensure_built(uniqueness, build_routine, rebuild_check)
            .await
    }

    /// Clone the template into a new database named `name`.
    pub async fn create_database(&self, name: &str) -> Result<Database> {
        dirs::validate_name(name)?;
        {
            let mut used = self.used_names.lock();
            if !used.insert(name.to_string()) {
                return Err(Error::DuplicateName {
                    name: name.to_string(),
                    data_file: dirs::data_file(self.controller.directory(), name),
                });
            }
        }
        match self.cloner.clone_from(name).await {
            Ok(connection_string) => Ok(Database {
                name: name.to_string(),
                connection_string,
                data_file: dirs::data_file(self.controller.directory(), name),
            }),
            Err(error) => {
                self.used_names.lock().remove(name);
                Err(error)
            }
        }
    }

    /// Clone the template under a name derived from caller context, keeping
    /// database names stable and human-traceable across runs. Typical use:
    /// `instance.create_database_for(file!(), "my_test").await`.
    pub async fn create_database_for(&self, file: &str, member: &str) -> Result<Database> {
        let name = derive_database_name(file, member);
        self.create_database(&name).await
    }

    /// Drop the database server-side (kicking out open sessions), delete its
    /// files and release its name for reuse. Absent databases are a no-op.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        self.lifecycle.delete_database(name).await?;
        self.used_names.lock().remove(name);
        Ok(())
    }

    /// Drop every user database on the instance. Manual cleanup between
    /// suites; the provisioning flow itself never needs it.
    pub async fn purge(&self) -> Result<()> {
        let master = self.master_connection_string();
        let mut connection =
            self.driver
                .connect(&master)
                .await
                .map_err(|source| Error::Command {
                    operation: "open master connection",
                    instance: self.name().to_string(),
                    database: "master".to_string(),
                    data_file: String::new(),
                    command_text: PURGE_TEXT.to_string(),
                    source,
                })?;
        connection
            .execute(PURGE_TEXT)
            .await
            .map_err(|source| Error::Command {
                operation: "purge databases",
                instance: self.name().to_string(),
                database: "master".to_string(),
                data_file: String::new(),
                command_text: PURGE_TEXT.to_string(),
                source,
            })
    }

    /// Stop the underlying instance; tolerates an already-stopped instance.
    pub async fn stop(&self) -> Result<()> {
        self.controller.stop().await
    }

    /// Stop the instance, remove its registration and delete all of its
    /// files, including the template and the uniqueness marker.
    pub async fn delete_instance(&self) -> Result<()> {
        self.controller.delete().await?;
        self.controller.delete_files(None).await?;
        self.used_names.lock().clear();
        Ok(())
    }
}

impl Drop for SqlInstance {
    fn drop(&mut self) {
        registered_instances()
            .lock()
            .remove(self.controller.name());
    }
}

/// `"<file-stem>_<member>"` with every character outside `[A-Za-z0-9_-]`
/// folded to `_`, truncated to the name length limit.
pub fn derive_database_name(file: &str, member: &str) -> String {
    let stem = Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file);
    let mut name: String = format!("{stem}_{member}")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    name.truncate(dirs::MAX_NAME_LEN);
    name
}

const PURGE_TEXT: &str = "\
declare @command nvarchar(max)
set @command = ''

select @command = @command
+ '

begin try
  alter database [' + [name] + '] set single_user with rollback immediate;
end try
begin catch
end catch;

drop database [' + [name] + '];

'
from [master].[sys].[databases]
where [name] not in ('master', 'model', 'msdb', 'tempdb');
execute sp_executesql @command";
