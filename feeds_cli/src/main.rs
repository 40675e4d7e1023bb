use crate::init_config::CmdConfig;
use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use clap_verbosity_flag::InfoLevel;
use directories::ProjectDirs;

mod cmd;
mod init_config;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// which feeds profile this command should run on
    #[arg(short, long, value_name = "NAME", default_value = "local")]
    profile: String,

    #[command(flatten)]
    verbosity: clap_verbosity_flag::Verbosity<InfoLevel>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Modify the profile's config
    Config {
        #[command(subcommand)]
        cmd: CmdConfig,
    },
    /// Open a feed, reconcile its header and metadata, and print its url
    Feed {
        id: String,
        /// Do not announce the feed
        #[arg(long, action = ArgAction::SetTrue)]
        private: bool,
    },
    /// Write a value to a feed
    Put {
        id: String,
        key: String,
        value: String,
        /// Parse VALUE as JSON instead of storing it as a string
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Print a value of a feed
    Get { id: String, key: String },
    /// Delete a value of a feed
    Del { id: String, key: String },
    /// Set one metadata document of a feed
    Meta {
        id: String,
        name: String,
        /// JSON value
        value: String,
    },
    /// Close a feed and remove its cores from disk
    Destroy { id: String },
    /// Read a feed from its url
    Read {
        /// feed://<key>/<path>#encryptionKey=<key>
        url: String,
        /// Field to read instead of the url's path
        #[arg(long, value_name = "NAME")]
        field: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Configs live under ~/.config/feeds/<profile>.toml,
    // feed storage under ~/.local/share/feeds/<profile>/.
    let dirs =
        ProjectDirs::from("", "", "feeds").context("failed to determine config directory path")?;

    let config_file = dirs
        .config_dir()
        .join(&cli.profile)
        .with_extension("toml");
    let data_dir = dirs.data_dir().join(&cli.profile);

    cmd::run_command(config_file, &data_dir, cli.cmd).await
}
