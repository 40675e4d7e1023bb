use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use toml_edit::{DocumentMut, Item, Table};
use tracing::info;

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the profile's config file if it doesn't exist, with local storage
    Init,
    /// Sets the header document every feed of this profile carries
    Header {
        /// JSON object, e.g. '{"name": "prices"}'
        json: String,
    },
}

impl CmdConfig {
    pub fn run(self, config_file: PathBuf, data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if config_file.exists() {
            fs::read_to_string(&config_file)?
        } else {
            let parent = config_file
                .parent()
                .context("config file has no parent directory")?;
            fs::create_dir_all(parent)?;
            "".to_owned()
        }
        .parse::<DocumentMut>()
        .context("could not parse config file")?;

        match self {
            Self::Init => {
                let base_path = data_dir
                    .to_str()
                    .context("data directory is not valid UTF-8")?;

                let storage = table_entry(&mut doc, "storage")?;
                if !storage.contains_key("type") {
                    storage.insert("type", "local".into());
                    storage.insert("base_path", base_path.into());
                }

                let identity = table_entry(&mut doc, "identity")?;
                if !identity.contains_key("persist") {
                    identity.insert("persist", true.into());
                }

                let announce = table_entry(&mut doc, "announce")?;
                if !announce.contains_key("server") {
                    announce.insert("server", true.into());
                    announce.insert("client", false.into());
                }
            }
            Self::Header { json } => {
                let header: serde_json::Value =
                    serde_json::from_str(&json).context("header is not valid JSON")?;
                anyhow::ensure!(header.is_object(), "header must be a JSON object");
                let header: DocumentMut = toml::to_string(&header)
                    .context("header cannot be expressed in TOML")?
                    .parse()?;
                doc.insert("header", Item::Table(header.as_table().clone()));
            }
        }

        info!("writing to config file {config_file:?}");

        let tmp_path = config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, config_file)?;
        Ok(())
    }
}

fn table_entry<'a>(doc: &'a mut DocumentMut, key: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(key)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .with_context(|| format!("`{key}` in config file is not a table"))
}
