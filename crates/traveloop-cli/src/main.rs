//! Traveloop CLI - exercise the session manager from the command line.
//!
//! Runs the four session operations against the configured backend
//! (local demo store by default, remote identity service when
//! `TRAVELOOP_BACKEND=remote`).

use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use traveloop_auth::{Config, SessionManager};

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn usage() {
    eprintln!("Usage: traveloop <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  register <email> <password> [name]   Create an account and sign in");
    eprintln!("  login <email> <password>             Sign in");
    eprintln!("  logout                               Sign out");
    eprintln!("  whoami                               Show the current session");
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    match run(&args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<ExitCode> {
    let config = Config::from_env()?;
    let provider = config.build_provider()?;
    let manager = SessionManager::new(provider);
    manager.ready().await;
    info!(backend = ?config.backend, "session manager ready");

    let code = match args.get(1).map(String::as_str) {
        Some("register") => match (args.get(2), args.get(3)) {
            (Some(email), Some(password)) => {
                let name = args.get(4).map(String::as_str);
                match manager.register(email, password, name).await {
                    Ok(session) => {
                        println!("Registered and signed in as {}", session.email);
                        ExitCode::SUCCESS
                    }
                    Err(e) => {
                        eprintln!("{}", e);
                        ExitCode::FAILURE
                    }
                }
            }
            _ => {
                usage();
                ExitCode::FAILURE
            }
        },
        Some("login") => match (args.get(2), args.get(3)) {
            (Some(email), Some(password)) => match manager.login(email, password).await {
                Ok(session) => {
                    println!("Signed in as {}", session.email);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("{}", e);
                    ExitCode::FAILURE
                }
            },
            _ => {
                usage();
                ExitCode::FAILURE
            }
        },
        Some("logout") => {
            manager.logout().await;
            println!("Signed out");
            ExitCode::SUCCESS
        }
        Some("whoami") => {
            match manager.current_session() {
                Some(session) => {
                    match session.name.as_deref() {
                        Some(name) => println!("{} <{}>", name, session.email),
                        None => println!("{}", session.email),
                    }
                    if let Some(role) = session.role.as_deref() {
                        println!("role: {}", role);
                    }
                }
                None => println!("Not signed in"),
            }
            ExitCode::SUCCESS
        }
        _ => {
            usage();
            ExitCode::FAILURE
        }
    };

    manager.shutdown();
    Ok(code)
}
