use anyhow::Result;
use structopt::StructOpt;

use replset_cli::Replset;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Replset::from_args();
    let status = cli.run().await?;
    std::process::exit(status.code())
}
