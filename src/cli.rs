//! CLI interface for the voice gateway

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::GatewayConfig;
use crate::security::keyring;

#[derive(Parser)]
#[command(name = "voice-gateway")]
#[command(about = "Real-time voice-agent gateway bridging telephony with STT/LLM/TTS", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server (telephony ingress + admin surface)
    Serve {
        /// Address to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind
        #[arg(long, default_value = "8443")]
        port: u16,
        /// Serve over HTTPS (requires --cert and --key)
        #[arg(long)]
        https: bool,
        /// TLS certificate path (PEM)
        #[arg(long)]
        cert: Option<String>,
        /// TLS private key path (PEM)
        #[arg(long)]
        key: Option<String>,
    },
    /// Inspect or edit gateway configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Store or inspect provider credentials in the OS keyring
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current configuration (secrets excluded; they live in the keyring)
    Show,
    /// Write the default configuration to disk, overwriting any existing file
    Reset,
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Store a named secret (e.g. stt-api-key, tts-api-key, llm-api-key,
    /// telephony-auth-token, admin-bearer-token)
    Set {
        name: String,
        value: String,
    },
    /// Check whether a named secret is configured, without printing it
    Get {
        name: String,
    },
    /// Remove a named secret
    Delete {
        name: String,
    },
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port, https, cert, key } => {
            crate::server::start(&host, port, https, cert, key).await?;
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = GatewayConfig::load()?;
                println!("{}", toml::to_string_pretty(&config).context("failed to render config")?);
            }
            ConfigCommands::Reset => {
                let config = GatewayConfig::default();
                config.save()?;
                println!("wrote default configuration to {}", crate::config::config_path()?.display());
            }
        },
        Commands::Key { command } => match command {
            KeyCommands::Set { name, value } => {
                keyring::set_secret(&name, &value)?;
                println!("stored secret '{name}'");
            }
            KeyCommands::Get { name } => {
                if keyring::has_secret(&name) {
                    println!("'{name}' is configured");
                } else {
                    println!("'{name}' is not configured");
                }
            }
            KeyCommands::Delete { name } => {
                keyring::delete_secret(&name)?;
                println!("deleted secret '{name}'");
            }
        },
    }

    Ok(())
}
