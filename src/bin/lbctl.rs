use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, RequestBuilder};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for the traffic-lb admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:8088", env = "LBCTL_URL")]
    url: String,

    #[arg(short, long, env = "LBCTL_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version and backend counts
    Status,
    /// List backends with their health
    Backends,
    /// Register a backend
    AddBackend { url: String },
    /// Remove a backend
    RemoveBackend { url: String },
    /// Change the default rate limit for new clients
    SetLimit { capacity: f64, rate: f64 },
    /// List per-client overrides
    Clients,
    /// Add a per-client override
    AddClient {
        client_id: String,
        capacity: f64,
        rate: f64,
    },
    /// Remove a per-client override
    RemoveClient { client_id: String },
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

    let request = |method: Method, path: &str| -> RequestBuilder {
        client
            .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
            .headers(headers.clone())
    };

    let builder = match cli.command {
        Commands::Status => request(Method::GET, "/admin/status"),
        Commands::Backends => request(Method::GET, "/admin/backends"),
        Commands::AddBackend { url } => {
            request(Method::POST, "/admin/backends").json(&json!({ "url": url }))
        }
        Commands::RemoveBackend { url } => {
            request(Method::DELETE, "/admin/backends").query(&[("url", url)])
        }
        Commands::SetLimit { capacity, rate } => request(Method::PATCH, "/admin/ratelimit")
            .json(&json!({ "capacity": capacity, "rate": rate })),
        Commands::Clients => request(Method::GET, "/admin/clients"),
        Commands::AddClient {
            client_id,
            capacity,
            rate,
        } => request(Method::POST, "/admin/clients").json(&json!({
            "client_id": client_id,
            "capacity": capacity,
            "rate": rate,
        })),
        Commands::RemoveClient { client_id } => {
            request(Method::DELETE, "/admin/clients").query(&[("client_id", client_id)])
        }
    };

    print_response(builder.send().await?).await
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

    if status == reqwest::StatusCode::NO_CONTENT {
        println!("OK");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
