use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the adaptive gateway", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin API key
    #[arg(short, long, env = "GATEWAY_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List circuit breaker states
    Breakers,
    /// Show current backend metrics per service
    Backends,
    /// Reset one backend's circuit breaker
    Reset {
        /// Backend identity
        backend: String,
    },
    /// Reset every circuit breaker
    ResetAll,
}

impl Commands {
    fn request(&self) -> (Method, String) {
        match self {
            Commands::Status => (Method::GET, "/admin/status".to_string()),
            Commands::Breakers => (Method::GET, "/admin/breakers".to_string()),
            Commands::Backends => (Method::GET, "/admin/backends".to_string()),
            Commands::Reset { backend } => {
                (Method::POST, format!("/admin/breakers/{}/reset", backend))
            }
            Commands::ResetAll => (Method::POST, "/admin/breakers/reset".to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.request();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
