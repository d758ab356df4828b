use anyhow::Result;
use structopt::StructOpt;

use crate::config::Params;
use crate::output::{self, ExitStatus};
use crate::Replset;
use replset_core::{FailureReport, ReconcileError};

/// Reconcile a replica set using parameters read from the environment.
#[derive(StructOpt)]
#[structopt(name = "env")]
pub struct Env {
    /// The prefix of the env vars to read parameters from, defaults to `REPLSET_`.
    #[structopt(long)]
    prefix: Option<String>,
}

impl Env {
    pub async fn run(&self, _base: &Replset) -> Result<ExitStatus> {
        let params = match &self.prefix {
            Some(prefix) => Params::from_env_prefixed(prefix),
            None => Params::from_env(),
        };
        let params = match params {
            Ok(params) => params,
            Err(err) => {
                let err = ReconcileError::InvalidInput(format!("{:#}", err));
                tracing::error!(error = %err, "invalid parameters");
                output::emit(&FailureReport::new(None, &err))?;
                return Ok(ExitStatus::InvalidInput);
            }
        };
        super::reconcile(params).await
    }
}
