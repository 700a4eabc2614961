//! tutor-chat: terminal client for the grammar tutor API.

mod client;
mod key_store;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{Registration, TutorClient};
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tutor-chat")]
#[command(about = "Practise English grammar with the tutor from your terminal")]
#[command(version)]
struct Cli {
    /// Base URL of the tutor API
    #[arg(long, env = "TUTOR_API_URL", default_value = "http://localhost:8000")]
    api_url: String,

    /// Where the API key is stored between runs
    #[arg(long, env = "TUTOR_KEY_FILE", default_value = ".tutor_api_key")]
    key_file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and store its API key
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "TUTOR_PASSWORD")]
        password: String,
        /// Language explanations are given in
        #[arg(long, default_value = "Malayalam")]
        native_language: String,
        /// Script code for the native language
        #[arg(long, default_value = "Mal")]
        lang_code: String,
    },

    /// Log in and store the API key
    Login {
        #[arg(short, long)]
        username: String,
        #[arg(short, long, env = "TUTOR_PASSWORD")]
        password: String,
    },

    /// Start an interactive lesson
    Chat {
        /// Wait for complete answers instead of streaming them
        #[arg(long)]
        no_stream: bool,
    },

    /// Show what the tutor remembers about you
    Memories,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = TutorClient::new(&cli.api_url);

    match cli.command {
        Commands::Register {
            username,
            password,
            native_language,
            lang_code,
        } => {
            let api_key = client
                .register(&Registration {
                    username,
                    password,
                    native_language,
                    lang_code,
                })
                .await?;
            key_store::save_key(&cli.key_file, &api_key)?;
            println!("Registered. API key saved to {}", cli.key_file.display());
        }
        Commands::Login { username, password } => {
            let api_key = client.login(&username, &password).await?;
            key_store::save_key(&cli.key_file, &api_key)?;
            println!("Logged in. API key saved to {}", cli.key_file.display());
        }
        Commands::Chat { no_stream } => {
            let client = client.with_api_key(key_store::load_key(&cli.key_file)?);
            chat_loop(&client, !no_stream).await?;
        }
        Commands::Memories => {
            let client = client.with_api_key(key_store::load_key(&cli.key_file)?);
            let memories = client.memories().await?;
            if memories.is_empty() {
                println!("The tutor doesn't remember anything about you yet.");
            }
            for memory in memories {
                println!("- {}", memory.memory);
            }
        }
    }
    Ok(())
}

async fn chat_loop(client: &TutorClient, stream: bool) -> Result<()> {
    println!("Type your message. `exit` or Ctrl+D to quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };
        let query = line.trim();
        if query.is_empty() {
            continue;
        }
        if matches!(query, "exit" | "quit") {
            break;
        }

        print!("tutor> ");
        std::io::stdout().flush()?;
        let result = if stream {
            client
                .stream(query, |chunk| {
                    print!("{}", chunk);
                    let _ = std::io::stdout().flush();
                })
                .await
                .map(|_| ())
        } else {
            client.interact(query).await.map(|answer| print!("{}", answer))
        };
        println!();
        if let Err(e) = result {
            eprintln!("error: {}", e);
        }
    }
    Ok(())
}
