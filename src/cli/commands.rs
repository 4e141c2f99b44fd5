// Subcommand implementations
// Author: kelexine (https://github.com/kelexine)

use super::session::{persistence_manager, spawn_printer, submit_cancellable, Session};
use super::Command;
use crate::config::AppConfig;
use crate::error::{ClientError, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// Run one parsed subcommand against the loaded configuration.
pub async fn run(command: Command, config: &AppConfig) -> Result<()> {
    match command {
        Command::Ask {
            prompt,
            show_thinking,
        } => ask(config, &prompt.join(" "), show_thinking).await,
        Command::Chat { show_thinking } => chat(config, show_thinking).await,
        Command::Stats => stats(config).await,
        Command::Clear => clear(config).await,
    }
}

pub async fn ask(config: &AppConfig, prompt: &str, show_thinking: bool) -> Result<()> {
    let session = Session::start(config).await?;
    let printer = spawn_printer(&session.controller, show_thinking);

    let result = submit_cancellable(&session.controller, prompt).await;
    session.finish(printer).await;

    result.map(|_| ())
}

/// Line-by-line conversation. While a reply streams, stdin lines act as
/// `/pause`, `/resume` and `/cancel` commands.
pub async fn chat(config: &AppConfig, show_thinking: bool) -> Result<()> {
    let session = Session::start(config).await?;
    let printer = spawn_printer(&session.controller, show_thinking);
    let controller = session.controller.clone();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Type a prompt. While a reply streams: /pause, /resume, /cancel. /exit quits.");

    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if matches!(prompt, "/exit" | "/quit") {
            break;
        }

        let submit = controller.submit(prompt);
        tokio::pin!(submit);
        let mut stdin_open = true;

        let result = loop {
            tokio::select! {
                result = &mut submit => break result,
                _ = signal::ctrl_c() => {
                    controller.cancel();
                }
                line = lines.next_line(), if stdin_open => {
                    match line?.as_deref().map(str::trim) {
                        Some("/pause") => {
                            controller.pause();
                        }
                        Some("/resume") => {
                            controller.resume();
                        }
                        Some("/cancel") => {
                            controller.cancel();
                        }
                        Some(_) => eprintln!("[a reply is streaming: /pause, /resume or /cancel]"),
                        None => {
                            stdin_open = false;
                            controller.cancel();
                        }
                    }
                }
            }
        };

        match result {
            Ok(_) => {}
            Err(ClientError::Cancelled) => eprintln!("[cancelled]"),
            Err(e) => eprintln!("error: {}", e),
        }
        session.request_finished();

        if !stdin_open {
            break;
        }
    }

    drop(controller);
    session.finish(printer).await;
    Ok(())
}

pub async fn stats(config: &AppConfig) -> Result<()> {
    let entries = persistence_manager(config).load().await;
    println!("Persisted entries: {}", entries.len());

    if let (Some(oldest), Some(newest)) = (entries.first(), entries.last()) {
        println!("Oldest: {}", oldest.created_at.to_rfc3339());
        println!("Newest: {}", newest.created_at.to_rfc3339());
        println!("Dimension: {}", newest.vector.len());
    }

    for entry in entries.iter().rev().take(5) {
        let preview: String = entry.response.chars().take(60).collect();
        println!(
            "  {}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M"),
            entry.id,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}

pub async fn clear(config: &AppConfig) -> Result<()> {
    persistence_manager(config).clear().await?;
    println!("Persisted cache cleared");
    Ok(())
}
