#[allow(unused_imports)]
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "concierge")]
#[command(about = "WhatsApp personal assistant over Gmail and Google Calendar", long_about = None)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the webhook server (Twilio inbound + Google OAuth callback).
    Serve {
        #[arg(long, default_value = "0.0.0.0")]
        bind: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Public base URL used in OAuth redirects, e.g. https://assistant.example.com
        #[arg(long)]
        public_url: Option<String>,
        /// Directory for persisted state (credentials). Default: CONCIERGE_WORKSPACE or ./data
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Ask the assistant one question from the terminal and print the reply.
    Ask {
        prompt: String,
        #[arg(long)]
        public_url: Option<String>,
        #[arg(long)]
        workspace: Option<PathBuf>,
    },

    /// Print the Google authorization URL for the configured scope set.
    AuthUrl {
        #[arg(long)]
        public_url: Option<String>,
    },
}
