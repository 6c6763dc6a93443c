//! Persistence-backed lifecycle of snippet registrations.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use instacmd_script::{Capabilities, CompiledSnippet, ScriptError, SnippetCompiler};
use instacmd_storage::{SnippetStorage, StorageError};
use instacmd_types::{Collection, SnippetKind};

use crate::MISSING_PERMISSIONS_HINT;
use crate::dispatcher::CommandError;
use crate::host::BotHost;
use crate::registry::{InstallError, LiveRegistration, Registration};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{0}")]
    Compile(String),
    #[error("Nothing detected. Make sure to return something")]
    EmptyResult,
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("'{name}' not found in {collection}")]
    NotFound { collection: Collection, name: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<ScriptError> for LifecycleError {
    fn from(err: ScriptError) -> Self {
        match err {
            ScriptError::EmptyResult => LifecycleError::EmptyResult,
            other => LifecycleError::Compile(other.to_string()),
        }
    }
}

/// Where a submitted snippet goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnippetTarget {
    /// Commands and listeners, named by what the snippet declares.
    Commands,
    /// A dev value under an operator-chosen name.
    DevValue(String),
}

impl SnippetTarget {
    pub fn collection(&self) -> Collection {
        match self {
            SnippetTarget::Commands => Collection::Commands,
            SnippetTarget::DevValue(_) => Collection::DevValues,
        }
    }
}

/// Asked before an existing entry is overwritten.
#[async_trait]
pub trait ConfirmReplace: Send + Sync {
    async fn confirm_replace(&self, kind: SnippetKind, name: &str) -> bool;
}

#[derive(Debug)]
pub enum AddOutcome {
    Added {
        registration: LiveRegistration,
        /// An entry with the same name existed before.
        replaced: bool,
    },
    /// Replacement was declined; nothing changed.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub kind: SnippetKind,
    pub name: String,
}

/// Outcome of replaying stored snippets at startup.
#[derive(Debug, Default)]
pub struct ResumeReport {
    pub installed: usize,
    pub failed: Vec<(Collection, String)>,
}

/// Owns every live registration and keeps it in step with storage.
pub struct InstantCommands {
    storage: SnippetStorage,
    compiler: SnippetCompiler,
    host: Arc<dyn BotHost>,
    live: Mutex<HashMap<(Collection, String), LiveRegistration>>,
}

impl InstantCommands {
    pub fn new(storage: SnippetStorage, compiler: SnippetCompiler, host: Arc<dyn BotHost>) -> Self {
        Self {
            storage,
            compiler,
            host,
            live: Mutex::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &dyn BotHost {
        self.host.as_ref()
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.compiler.runtime().capabilities()
    }

    /// Compile on the blocking pool; top-level snippet code may run long.
    pub async fn compile(&self, source: &str) -> Result<CompiledSnippet, LifecycleError> {
        let compiler = self.compiler.clone();
        let source = source.to_string();
        let compiled = tokio::task::spawn_blocking(move || compiler.compile(&source))
            .await
            .map_err(|e| LifecycleError::Compile(format!("compile task failed: {e}")))??;
        Ok(compiled)
    }

    /// Compile and classify without installing anything.
    pub async fn check(
        &self,
        target: &SnippetTarget,
        source: &str,
    ) -> Result<Registration, LifecycleError> {
        let compiled = self.compile(source).await?;
        let registration = match target {
            SnippetTarget::Commands => Registration::classify(&compiled)?,
            SnippetTarget::DevValue(name) => Registration::classify_dev_value(name, &compiled)?,
        };
        Ok(registration)
    }

    /// Compile, classify, install and persist a snippet.
    ///
    /// If the name is already stored, `confirm` is asked first. The old
    /// registration is detached before the new one is installed and is not
    /// restored if that install fails. A snippet that cannot be stored is
    /// detached again.
    pub async fn add_snippet(
        &self,
        target: SnippetTarget,
        source: &str,
        confirm: &dyn ConfirmReplace,
    ) -> Result<AddOutcome, LifecycleError> {
        let registration = self.check(&target, source).await?;
        let kind = registration.kind();
        let collection = target.collection();
        let name = registration.name().to_string();

        let exists = self.storage.get(collection, &name).await?.is_some();
        if exists && !confirm.confirm_replace(kind, &name).await {
            debug!(%collection, name = %name, "Replacement declined");
            return Ok(AddOutcome::Cancelled);
        }

        let key = (collection, name.clone());
        let previous = self.live.lock().await.remove(&key);
        if let Some(previous) = &previous {
            previous.uninstall(self.host()).await;
            debug!(kind = %previous.kind, name = %name, "Removed due to incoming overwrite");
        }

        let live = match registration.install(self.host()).await {
            Ok(live) => live,
            Err(e) => {
                if previous.is_some() {
                    warn!(
                        %collection,
                        name = %name,
                        "Install failed after the previous registration was removed: {e}"
                    );
                }
                return Err(e.into());
            }
        };

        let stored_name = name.clone();
        let stored_source = source.to_string();
        let persisted = self
            .storage
            .transact(collection, move |map| {
                map.insert(stored_name, stored_source);
            })
            .await;
        if let Err(e) = persisted {
            live.uninstall(self.host()).await;
            error!(
                %collection,
                name = %name,
                "Failed to store snippet, detached it again: {e}"
            );
            return Err(e.into());
        }

        self.live.lock().await.insert(key, live.clone());
        info!(kind = %kind, name = %name, replaced = exists, "Snippet added");

        Ok(AddOutcome::Added {
            registration: live,
            replaced: exists,
        })
    }

    /// Forget a stored entry, then detach it. Nothing is detached if the
    /// stored record cannot be deleted.
    pub async fn remove(&self, collection: Collection, name: &str) -> Result<Removed, LifecycleError> {
        if self.storage.get(collection, name).await?.is_none() {
            return Err(LifecycleError::NotFound {
                collection,
                name: name.to_string(),
            });
        }

        let key = name.to_string();
        let deleted = self
            .storage
            .transact(collection, move |map| {
                map.remove(&key);
            })
            .await;
        if let Err(e) = deleted {
            error!(
                %collection,
                name = %name,
                "Failed to delete stored snippet, kept it live: {e}"
            );
            return Err(e.into());
        }

        let live = self
            .live
            .lock()
            .await
            .remove(&(collection, name.to_string()));
        let kind = match &live {
            Some(live) => {
                live.uninstall(self.host()).await;
                live.kind
            }
            None => match collection {
                Collection::Commands => SnippetKind::Command,
                Collection::DevValues => SnippetKind::DevValue,
            },
        };

        info!(%kind, name = %name, "Snippet removed");
        Ok(Removed {
            kind,
            name: name.to_string(),
        })
    }

    /// Install every stored snippet, dev values first.
    ///
    /// A snippet that fails is logged and skipped.
    pub async fn resume_all(&self) -> ResumeReport {
        let mut report = ResumeReport::default();

        for collection in Collection::all() {
            let stored = match self.storage.load(collection).await {
                Ok(stored) => stored,
                Err(e) => {
                    error!(%collection, "Failed to load stored snippets: {e}");
                    continue;
                }
            };

            for (name, source) in stored {
                match self.replay(collection, &name, &source).await {
                    Ok(live) => {
                        self.live.lock().await.insert((collection, name), live);
                        report.installed += 1;
                    }
                    Err(e) => {
                        error!(
                            %collection,
                            name = %name,
                            error = ?e,
                            "An exception occurred while trying to resume snippet: {e}"
                        );
                        report.failed.push((collection, name));
                    }
                }
            }
        }

        info!(
            installed = report.installed,
            failed = report.failed.len(),
            "Resumed stored snippets"
        );
        report
    }

    async fn replay(
        &self,
        collection: Collection,
        name: &str,
        source: &str,
    ) -> Result<LiveRegistration, LifecycleError> {
        let target = match collection {
            Collection::Commands => SnippetTarget::Commands,
            Collection::DevValues => SnippetTarget::DevValue(name.to_string()),
        };
        let registration = self.check(&target, source).await?;
        Ok(registration.install(self.host()).await?)
    }

    /// Detach everything; stored records are kept for the next start.
    pub async fn teardown_all(&self) -> usize {
        let live: Vec<LiveRegistration> = self
            .live
            .lock()
            .await
            .drain()
            .map(|(_, live)| live)
            .collect();
        for registration in &live {
            registration.uninstall(self.host()).await;
        }
        info!(removed = live.len(), "Removed all snippet registrations");
        live.len()
    }

    /// Stored names, sorted.
    pub async fn list(&self, collection: Collection) -> Result<Vec<String>, LifecycleError> {
        Ok(self.storage.load(collection).await?.into_keys().collect())
    }

    pub async fn source(
        &self,
        collection: Collection,
        name: &str,
    ) -> Result<Option<String>, LifecycleError> {
        Ok(self.storage.get(collection, name).await?)
    }

    pub async fn live(&self, collection: Collection, name: &str) -> Option<LiveRegistration> {
        self.live
            .lock()
            .await
            .get(&(collection, name.to_string()))
            .cloned()
    }

    /// What a stored command-collection entry is. Entries that are not live
    /// are recompiled to find out, which runs their top-level code again.
    pub async fn kind_of(&self, name: &str) -> Result<Option<SnippetKind>, LifecycleError> {
        if let Some(live) = self.live(Collection::Commands, name).await {
            return Ok(Some(live.kind));
        }
        let Some(source) = self.source(Collection::Commands, name).await? else {
            return Ok(None);
        };
        let registration = self.check(&SnippetTarget::Commands, &source).await?;
        Ok(Some(registration.kind()))
    }

    /// Log a failed command and return the hint to show the user, if any.
    ///
    /// Failures inside snippet commands are logged only.
    pub async fn report_command_error(
        &self,
        command: &str,
        error: &CommandError,
    ) -> Option<&'static str> {
        if self.live(Collection::Commands, command).await.is_some() {
            info!(command, "Error in instant command: {error}");
            return None;
        }
        match error {
            CommandError::MissingPermissions(_) => {
                warn!(command, "Missing permissions: {error}");
                Some(MISSING_PERMISSIONS_HINT)
            }
            _ => {
                error!(command, "Exception in command: {error}");
                None
            }
        }
    }
}
