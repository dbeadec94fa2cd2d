//! CLI command definitions and handlers

pub mod ask;

use crate::config::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// csvchat - ask questions about a CSV file in plain language
///
/// By default, starts the web server. Use the 'ask' subcommand for a
/// one-off question from the terminal.
#[derive(Parser, Debug)]
#[command(name = "csvchat")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (RUST_LOG takes precedence)
    #[arg(long, global = true, value_parser = ["DEBUG", "INFO", "WARN", "ERROR"])]
    pub log_level: Option<String>,

    /// Config file to load instead of the global and project files
    #[arg(long, global = true, env = "CSVCHAT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web server (default)
    Serve(ServeArgs),

    /// Ask one question about a local CSV file and print the result as JSON
    Ask(AskArgs),
}

#[derive(Parser, Debug, Default)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Hostname to bind to
    #[arg(long)]
    pub hostname: Option<String>,

    /// Directory served under /static
    #[arg(long)]
    pub static_dir: Option<PathBuf>,
}

impl ServeArgs {
    /// Flags win over every other configuration source.
    pub fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(hostname) = &self.hostname {
            config.server.hostname = hostname.clone();
        }
        if let Some(dir) = &self.static_dir {
            config.server.static_dir = dir.clone();
        }
    }
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    /// CSV file to load
    #[arg(long)]
    pub csv: PathBuf,

    /// Model name (defaults to llm.default_model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Groq API key
    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Question (can be multiple words, quoted or unquoted)
    #[arg(required = true, trailing_var_arg = true)]
    pub question: Vec<String>,
}

impl Cli {
    /// Load config from `--config` or the default sources.
    pub async fn load_config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(path).await,
            None => Config::load().await,
        }
    }
}
