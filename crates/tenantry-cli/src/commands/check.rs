use clap::Args;
use colored::Colorize;

use super::platform::{Platform, PlatformArgs};

#[derive(Args)]
pub struct CheckCommand {
    /// Candidate subdomain label
    pub subdomain: String,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

impl CheckCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let platform = Platform::connect(&self.platform).await?;
        let result = platform
            .orchestrator
            .check_availability(&self.subdomain)
            .await?;

        match result.reason {
            None => println!(
                "{} {}",
                "✅".bright_green(),
                format!("{} is available", result.domain).bright_white()
            ),
            Some(reason) => println!(
                "{} {} ({})",
                "❌".bright_red(),
                format!("{} is not available", result.domain).bright_white(),
                reason.as_str().bright_yellow()
            ),
        }

        Ok(())
    }
}
