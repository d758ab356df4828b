//! CLI subcommands.

pub mod apply;
pub mod env;

use anyhow::Result;

use crate::config::Params;
use crate::driver::MongoDriver;
use crate::output::{self, ExitStatus};
use replset_core::{FailureReport, ReconcileError, Reconciler};

/// Validate the given params, reconcile the replica set & emit the result on stdout.
pub async fn reconcile(params: Params) -> Result<ExitStatus> {
    let settings = match params.validate() {
        Ok(settings) => settings,
        Err(err) => {
            tracing::error!(error = %err, "invalid parameters");
            output::emit(&FailureReport::new(None, &err))?;
            return Ok(ExitStatus::InvalidInput);
        }
    };
    let driver = match MongoDriver::new(settings.driver) {
        Ok(driver) => driver,
        Err(err) => {
            let err = ReconcileError::from(err);
            tracing::error!(error = %err, "error building cluster driver");
            output::emit(&FailureReport::new(None, &err))?;
            return Ok(ExitStatus::Failed);
        }
    };

    let config = &settings.reconcile;
    tracing::info!(
        replica_set = config.topology.replica_set(),
        seed = %config.seed,
        members = config.topology.members().len(),
        dry_run = config.options.dry_run,
        "reconciling replica set"
    );
    match Reconciler::new(driver).reconcile(config).await {
        Ok(outcome) => {
            output::emit(&outcome)?;
            Ok(ExitStatus::Success)
        }
        Err(failure) => {
            tracing::error!(error = %failure, phase = %failure.phase, "error reconciling replica set");
            output::emit(&FailureReport::from(&failure))?;
            Ok(ExitStatus::Failed)
        }
    }
}
