//! Command-line argument parsing

use clap::{Parser, Subcommand};

/// Default daemon address
pub const DEFAULT_URL: &str = "http://127.0.0.1:7870";

/// Parts assistant operator CLI
#[derive(Parser)]
#[command(name = "partsctl")]
#[command(about = "Talk to and inspect the partsd parts assistant", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Daemon base URL (overrides $PARTSD_URL)
    #[arg(long, global = true, env = "PARTSD_URL", default_value = DEFAULT_URL)]
    pub url: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send one message
    Ask {
        message: String,

        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation (empty line or "exit" quits)
    Chat,

    /// Inspect or clear a conversation
    Session {
        #[command(subcommand)]
        action: SessionCommands,
    },

    /// Show daemon health
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Show planner cache statistics
    CacheStats,
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Print carried entities and recent turns
    Show { id: String },
    /// Forget a conversation
    Clear { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_with_conversation() {
        let cli = Cli::try_parse_from([
            "partsctl",
            "ask",
            "is PS11752778 right for WDT780SAEM1?",
            "--conversation",
            "abc",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Ask {
                message,
                conversation,
                json,
            } => {
                assert!(message.starts_with("is PS11752778"));
                assert_eq!(conversation.as_deref(), Some("abc"));
                assert!(json);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_url_flag_is_global() {
        let cli =
            Cli::try_parse_from(["partsctl", "session", "show", "abc", "--url", "http://h:1"]).unwrap();
        assert_eq!(cli.url, "http://h:1");
        assert!(matches!(
            cli.command,
            Commands::Session {
                action: SessionCommands::Show { .. }
            }
        ));
    }
}
