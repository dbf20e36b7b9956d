use clap::Args;
use colored::Colorize;
use tracing::info;

use super::platform::{Platform, PlatformArgs};

#[derive(Args)]
pub struct ReconcileCommand {
    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

impl ReconcileCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let platform = Platform::connect(&self.platform).await?;

        info!("Running a forced reconciliation pass");
        let report = platform.scheduler.run_once().await?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        println!();
        println!("{}", "Reconciliation pass complete".bright_white().bold());
        println!("  {} {}", "Delegations verified:".bright_white(), report.verified);
        println!("  {} {}", "Domains activated:   ".bright_white(), report.advanced);
        println!("  {} {}", "Records repaired:    ".bright_white(), report.repaired);
        println!(
            "  {} {}",
            "Deletions flagged:   ".bright_white(),
            report.flagged.to_string().bright_yellow()
        );
        let failed = if report.failed > 0 {
            report.failed.to_string().bright_red()
        } else {
            report.failed.to_string().bright_green()
        };
        println!("  {} {}", "Failures:            ".bright_white(), failed);
        println!();

        Ok(())
    }
}
