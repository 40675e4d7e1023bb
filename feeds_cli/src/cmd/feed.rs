use anyhow::{Context, Result};
use feeds_core::FeedValue;
use feeds_node::{FeedOptions, Feeds};

use crate::Commands;

pub async fn run_feed(feeds: &Feeds, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Feed { id, private } => {
            let options = if private {
                FeedOptions::private()
            } else {
                FeedOptions::default()
            };
            let keys = feeds.feed(&id, options).await?;
            println!("{}", keys.url("/"));
        }
        Commands::Put {
            id,
            key,
            value,
            json,
        } => {
            let value = if json {
                FeedValue::Json(serde_json::from_str(&value).context("value is not valid JSON")?)
            } else {
                FeedValue::from(value)
            };
            feeds.update(&id, &key, value).await?;
        }
        Commands::Get { id, key } => match feeds.get(&id, &key).await? {
            Some(value) => print_value(&value)?,
            None => anyhow::bail!("no value at '{key}' in feed '{id}'"),
        },
        Commands::Del { id, key } => {
            if !feeds.delete(&id, &key).await? {
                tracing::warn!("no value at '{key}' in feed '{id}'");
            }
        }
        Commands::Meta { id, name, value } => {
            let value: serde_json::Value =
                serde_json::from_str(&value).context("metadata must be valid JSON")?;
            let outcome = feeds.set_metadata(&id, &name, value).await?;
            if outcome.is_noop() {
                println!("unchanged");
            } else {
                println!("updated");
            }
        }
        Commands::Destroy { id } => {
            let report = feeds.destroy(&id).await?;
            for core in report.failures() {
                if let Some(e) = &core.error {
                    eprintln!("failed to remove {}: {e:#}", core.dir);
                }
            }
            report.into_result()?;
            println!("destroyed feed '{id}'");
        }
        Commands::Config { .. } | Commands::Read { .. } => {
            anyhow::bail!("command is not a feed command")
        }
    }
    Ok(())
}

pub fn print_value(value: &FeedValue) -> Result<()> {
    match value {
        FeedValue::Json(serde_json::Value::String(s)) => println!("{s}"),
        FeedValue::Json(json) => println!("{}", serde_json::to_string_pretty(json)?),
        FeedValue::Bytes(bytes) => println!("<{} bytes>", bytes.len()),
    }
    Ok(())
}
