use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use std::path::{Path, PathBuf};

use service_link::config::load_config;
use service_link::{ServiceLink, ServiceRequest, ServiceResultExt, Served};

#[derive(Parser)]
#[command(name = "link-cli")]
#[command(about = "Management CLI for service-link", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall status
    Status,
    /// Services with endpoint health and connections
    Services,
    /// Circuit breaker states
    Breakers,
    /// Force a breaker closed
    Reset { service: String, group: String },
    /// Perform one resilient call using a local config
    Call {
        service: String,
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
        #[arg(long)]
        config: PathBuf,
    },
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

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/admin/status", cli.url)),
        Commands::Services => client.get(format!("{}/admin/services", cli.url)),
        Commands::Breakers => client.get(format!("{}/admin/breakers", cli.url)),
        Commands::Reset { service, group } => {
            client.post(format!("{}/admin/breakers/{}/{}/reset", cli.url, service, group))
        }
        Commands::Call {
            service,
            method,
            path,
            body,
            config,
        } => return call(&service, &method, &path, body.as_deref(), &config).await,
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn call(
    service: &str,
    method: &str,
    path: &str,
    body: Option<&str>,
    config: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let link = ServiceLink::build(load_config(config)?)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())?;
    let mut request = ServiceRequest::new(method, path);
    if let Some(body) = body {
        request = request.with_body(serde_json::from_str::<Value>(body)?);
    }

    match link.client().call(service, request).await.recover() {
        Ok(Served::Live(response)) => {
            eprintln!(
                "status={} retries={} elapsed_ms={} correlation_id={}",
                response.status,
                response.retry_count,
                response.elapsed.as_millis(),
                response.correlation_id
            );
            println!("{}", serde_json::to_string_pretty(&response.data)?);
        }
        Ok(Served::Degraded(fallback)) => {
            eprintln!("Degraded: {} unavailable", fallback.capability());
            println!("{}", serde_json::to_string_pretty(&fallback)?);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
