use anyhow::{Context, Result};
use feeds_node::{FeedUrl, Feeds};

use super::feed::print_value;

pub async fn run_read(feeds: &Feeds, url: &str, field: Option<&str>) -> Result<()> {
    let url: FeedUrl = url.parse()?;
    let reader = feeds.reader(&url).await?;

    let value = match field {
        Some(field) => reader.get_field(field).await?,
        None if url.path == "/" => reader.config().await?.map(Into::into),
        None => reader.get(&url.path).await?,
    }
    .with_context(|| format!("nothing at {url}"))?;

    print_value(&value)?;
    reader.close().await
}
