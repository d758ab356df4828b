use anyhow::Result;
use structopt::StructOpt;

use crate::config::Params;
use crate::output::ExitStatus;
use crate::Replset;

/// Reconcile a replica set using parameters given as flags.
#[derive(StructOpt)]
#[structopt(name = "apply")]
pub struct Apply {
    #[structopt(flatten)]
    params: Params,
}

impl Apply {
    pub async fn run(&self, _base: &Replset) -> Result<ExitStatus> {
        super::reconcile(self.params.clone()).await
    }
}
