//! partsctl - operator CLI for partsd

mod cli;
mod client;
mod display;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, SessionCommands};
use client::PartsdClient;
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = PartsdClient::new(&cli.url)?;

    match cli.command {
        Commands::Ask {
            message,
            conversation,
            json,
        } => {
            let reply = client.chat(&message, conversation.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                display::print_response(&reply.conversation_id, &reply.response);
            }
        }
        Commands::Chat => run_chat(&client).await?,
        Commands::Session { action } => match action {
            SessionCommands::Show { id } => {
                let snapshot = client.session(&id).await?;
                display::print_session(&snapshot);
            }
            SessionCommands::Clear { id } => {
                if client.clear_session(&id).await? {
                    println!("Cleared session {}", id);
                } else {
                    println!("No session {}", id);
                }
            }
        },
        Commands::Health { json } => {
            let health = client.health().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&health)?);
            } else {
                display::print_health(&health);
            }
        }
        Commands::CacheStats => {
            let stats = client.cache_stats().await?;
            display::print_cache_stats(&stats);
        }
    }

    Ok(())
}

/// Read lines until EOF, an empty line or "exit", keeping one conversation
async fn run_chat(client: &PartsdClient) -> Result<()> {
    let stdin = io::stdin();
    let mut conversation: Option<String> = None;

    println!("{}", "Ask about refrigerator or dishwasher parts. Empty line quits.".dimmed());
    loop {
        print!("{} ", "you>".bold());
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() || message == "exit" || message == "quit" {
            break;
        }

        match client.chat(message, conversation.as_deref()).await {
            Ok(reply) => {
                display::print_response(&reply.conversation_id, &reply.response);
                conversation = Some(reply.conversation_id);
            }
            Err(e) => eprintln!("{} {}", "error:".red(), e),
        }
        println!();
    }
    Ok(())
}
