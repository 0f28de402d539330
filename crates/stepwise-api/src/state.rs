//! Application state shared by every command.
//!
//! AppState pins the storage ports to the filesystem adapters and decides
//! which `ActionDispatcher` runs use.

use std::path::PathBuf;

use serde_json::{Map, Value};
use stepwise_core::repository::DefinitionStore;
use stepwise_core::workflow::{
    compile, validate, ActionDispatcher, DeployedWorkflow, DispatchError, EchoDispatcher,
    TriggerRouter,
};
use stepwise_infra::config::{resolve_workflows_dir, runs_dir};
use stepwise_infra::storage::{FsDefinitionStore, FsRunStore};
use stepwise_infra::workflow::HttpDispatcher;
use stepwise_types::config::GlobalConfig;

/// The dispatcher a command runs with, picked at runtime by `--echo`.
#[derive(Debug)]
pub enum Dispatcher {
    Http(HttpDispatcher),
    Echo(EchoDispatcher),
}

impl ActionDispatcher for Dispatcher {
    async fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        match self {
            Dispatcher::Http(d) => d.dispatch(subject, predicate, args).await,
            Dispatcher::Echo(d) => d.dispatch(subject, predicate, args).await,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: GlobalConfig,
    pub definitions: FsDefinitionStore,
    pub runs: FsRunStore,
}

impl AppState {
    /// Wire the stores for `data_dir`, creating the directory if needed.
    pub async fn init(data_dir: PathBuf, config: GlobalConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&data_dir).await?;

        let definitions = FsDefinitionStore::new(resolve_workflows_dir(&data_dir, &config));
        let runs = FsRunStore::new(runs_dir(&data_dir));

        Ok(Self {
            data_dir,
            config,
            definitions,
            runs,
        })
    }

    pub fn dispatcher(&self, echo: bool) -> Dispatcher {
        if echo {
            Dispatcher::Echo(EchoDispatcher)
        } else {
            Dispatcher::Http(HttpDispatcher::from_config(&self.config))
        }
    }

    /// Compile every stored workflow and deploy the ones that compile.
    ///
    /// Invalid documents are logged and left out.
    pub async fn router(&self) -> anyhow::Result<TriggerRouter> {
        let router = TriggerRouter::new();

        for definition in self.definitions.list_definitions().await? {
            let report = validate(&definition);
            if !report.valid() {
                tracing::warn!(
                    workflow = definition.name.as_str(),
                    errors = report.errors.len(),
                    "skipping invalid workflow"
                );
                continue;
            }
            let outcome = compile(&definition);
            let Some(graph) = outcome.graph else {
                tracing::warn!(workflow = definition.name.as_str(), "skipping workflow that failed to compile");
                continue;
            };
            router.deploy(DeployedWorkflow { definition, graph }).await?;
        }

        tracing::info!(workflows = router.workflow_count().await, "workflows deployed");
        Ok(router)
    }
}
