//! Thin CLI demonstrating `transcript_core`.
//!
//! The library never initializes a global `tracing` subscriber on its own
//! (§A.1) — that is a binary's job, done once here via `tracing_subscriber`
//! keyed off `RUST_LOG`.

use std::path::PathBuf;

use clap::{Parser as ClapParser, Subcommand};

use transcript_core::config::Config;
use transcript_core::{default_adapters, sessions_for_project};

#[derive(ClapParser)]
#[command(name = "transcript-core", about = "Incremental AI session transcript ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions belonging to a project root, newest first.
    Sessions {
        /// Project root to filter sessions by.
        project_root: PathBuf,
    },
    /// Print every message in one session.
    Messages {
        /// Session ID, as printed by `sessions`.
        session_id: String,
    },
    /// Watch every configured adapter and print events as they arrive.
    Watch,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load();
    let adapters = default_adapters(&config);

    match cli.command {
        Command::Sessions { project_root } => {
            for session in sessions_for_project(&adapters, &project_root) {
                println!(
                    "{}  {}  {}  {} msgs  {} tokens",
                    session.id, session.adapter_name, session.name, session.message_count, session.total_tokens
                );
            }
        }
        Command::Messages { session_id } => {
            for adapter in &adapters {
                match adapter.messages(&session_id) {
                    Ok(messages) if !messages.is_empty() => {
                        for message in messages {
                            println!("[{:?}] {}", message.role, message.content);
                        }
                        return;
                    }
                    _ => continue,
                }
            }
            eprintln!("no messages found for session {session_id}");
        }
        Command::Watch => {
            let mut handles = Vec::new();
            for adapter in adapters {
                let id = adapter.id();
                match adapter.watch(&PathBuf::from(".")) {
                    Ok((receiver, _closer)) => {
                        handles.push(std::thread::spawn(move || {
                            while let Some(event) = receiver.recv() {
                                println!("[{id}] {:?} {}", event.kind, event.session_id);
                            }
                        }));
                    }
                    Err(e) => eprintln!("{id}: failed to watch: {e}"),
                }
            }
            for handle in handles {
                let _ = handle.join();
            }
        }
    }
}
