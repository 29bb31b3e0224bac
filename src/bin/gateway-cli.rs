use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "gateway-cli")]
#[command(about = "Management CLI for the edge gateway admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "GATEWAY_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Gateway status and request totals
    Status,
    /// Clusters with policy and live member counts
    Clusters,
    /// Backend liveness, circuit state and connections
    Backends,
    /// Cache statistics
    Cache,
    /// Purge cached responses
    Purge {
        /// Absolute URL to purge, e.g. http://shop.test/index.html
        #[arg(long, conflicts_with = "prefix", required_unless_present = "prefix")]
        url: Option<String>,

        /// Purge every URL starting with this prefix
        #[arg(long)]
        prefix: Option<String>,
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

    let path = match &cli.command {
        Commands::Status => "status",
        Commands::Clusters => "clusters",
        Commands::Backends => "backends",
        Commands::Cache => "cache",
        Commands::Purge { url, prefix } => {
            let body = match (url, prefix) {
                (Some(url), _) => json!({ "key": url }),
                (None, prefix) => json!({ "prefix": prefix }),
            };
            let res = client
                .post(format!("{}/admin/cache/purge", cli.url))
                .headers(headers)
                .json(&body)
                .send()
                .await?;
            return print_response(res).await;
        }
    };

    let res = client
        .get(format!("{}/admin/{}", cli.url, path))
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
