use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use feeds_node::{Feeds, FeedsConfig};

mod feed;
mod read;

pub use feed::run_feed;
pub use read::run_read;

pub async fn run_command(
    config_file: PathBuf,
    data_dir: &Path,
    cmd: crate::Commands,
) -> Result<()> {
    if let crate::Commands::Config { cmd } = cmd {
        return cmd.run(config_file, data_dir);
    }

    let toml_content = std::fs::read_to_string(&config_file).with_context(|| {
        format!("failed to read {config_file:?}, run `feeds config init` first")
    })?;
    let config: FeedsConfig = toml::from_str(&toml_content)?;
    let feeds = Feeds::init(config).await?;

    let result = match cmd {
        crate::Commands::Read { url, field } => run_read(&feeds, &url, field.as_deref()).await,
        cmd => run_feed(&feeds, cmd).await,
    };
    feeds.close().await?;
    result
}
