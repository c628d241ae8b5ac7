use std::path::PathBuf;

use clap::{Parser, Subcommand};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "proxy-cli")]
#[command(about = "Management CLI for the version proxy", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the diagnostics page
    Status,
    /// Rescan the whole watch folder
    Rescan,
    /// Upload a signed package
    Upload { package: PathBuf },
    /// Drain and dispose every loaded version
    Shutdown,
    /// Fetch the annotated swagger document of one version
    Swagger { version: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/test", base)).send().await?;
            print_text(res).await?;
        }
        Commands::Rescan => {
            let search = Method::from_bytes(b"SEARCH")?;
            let res = client.request(search, format!("{}/upload", base)).send().await?;
            print_text(res).await?;
        }
        Commands::Upload { package } => {
            let body = tokio::fs::read(&package).await?;
            let res = client.post(format!("{}/upload", base)).body(body).send().await?;
            print_text(res).await?;
        }
        Commands::Shutdown => {
            let res = client.post(format!("{}/shutdown", base)).send().await?;
            print_text(res).await?;
        }
        Commands::Swagger { version } => {
            let res = client
                .get(format!("{}/swagger/json/{}", base, version))
                .send()
                .await?;
            print_json(res).await?;
        }
    }

    Ok(())
}

async fn print_text(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    if status.is_success() {
        println!("{}", text.trim());
    } else {
        eprintln!("Error: proxy returned status {}", status);
        eprintln!("Response: {}", text.trim());
    }
    Ok(())
}

async fn print_json(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: proxy returned status {}", status);
    }
    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
