//! gateway-rewrite CLI entry point.
//!
//! Validates descriptors and runs one-off URL or body rewrites against a
//! static service directory.

use anyhow::{bail, Context, Result};
use clap::Parser;
use gateway_rewrite::{
    load_descriptor, DescriptorConfig, Direction, EvaluationContext, FunctionRegistry, Principal,
    RewriteEngine, ServicesConfig, StaticServiceDirectory,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gateway-rewrite")]
#[command(
    author,
    version,
    about = "Declarative URL and content rewriting for API gateways"
)]
struct Args {
    /// Descriptor file path (YAML, or JSON with a .json extension)
    #[arg(short, long, env = "GATEWAY_REWRITE_DESCRIPTOR")]
    descriptor: Option<PathBuf>,

    /// Static service directory file (YAML)
    #[arg(long, env = "GATEWAY_REWRITE_SERVICES")]
    services: Option<PathBuf>,

    /// Cluster the request is served by
    #[arg(long, default_value = "default")]
    cluster: String,

    /// Authenticated user name
    #[arg(long)]
    user: Option<String>,

    /// Extra parameter binding (name=value), repeatable
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,

    /// Rewrite direction (inbound or outbound)
    #[arg(long, default_value = "inbound")]
    direction: Direction,

    /// URL to rewrite
    #[arg(long)]
    url: Option<String>,

    /// Body file to rewrite ("-" reads stdin)
    #[arg(long)]
    body: Option<PathBuf>,

    /// Content type of the body
    #[arg(long, default_value = "application/json")]
    content_type: String,

    /// Per-function timeout (ms); defaults to the descriptor setting
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example descriptor and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate descriptor and exit.
    #[arg(long)]
    validate: bool,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected name=value, got '{}'", s))
}

fn print_example_config() {
    let example = r#"# Rewrite Descriptor Example
version: "1"

settings:
  # Maximum body size accepted for rewriting (bytes)
  max_body_size: 10485760  # 10MB
  # Timeout for each function call when the request sets none (ms)
  timeout_ms: 1000

# Functions visible to templates (omit to expose all)
functions:
  - serviceUrl
  - serviceHost
  - name: nnAddr
    function: serviceAddr

rules:
  # Route WebHDFS calls to the cluster's NameNode
  - name: "webhdfs-inbound"
    description: "Gateway WebHDFS path to backend"
    scope: url
    pattern: "/gateway/webhdfs/v1/{path=**}"
    template: "{$serviceUrl(NAMENODE)}/webhdfs/v1/{path}"
    preserve_query: true

  # Map backend redirects back through the gateway
  - name: "webhdfs-location"
    direction: outbound
    scope: url
    pattern: "http://{host}:50075/webhdfs/v1/{path=**}"
    template: "/gateway/webhdfs/data/v1/{path}"

  # Replace $SERVICE markers in workflow configuration
  - name: "oozie-config"
    scope: xml
    selector: "/configuration/property/value"
    value: "\\$(?P<service>[A-Z]+)"
    template: "{$serviceUrl({service})}"

  # JSON job submissions
  - name: "job-namenode"
    scope: json
    selector: "$..nameNode"
    template: "{$nnAddr(NAMENODE)}"
"#;
    println!("{}", example);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let config = match &args.descriptor {
        Some(path) => load_descriptor(path)
            .with_context(|| format!("Failed to load descriptor: {}", path.display()))?,
        None => DescriptorConfig::default(),
    };

    let services: ServicesConfig = match &args.services {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read services file: {}", path.display()))?;
            serde_yaml::from_str(&content)?
        }
        None => ServicesConfig::default(),
    };
    let directory = StaticServiceDirectory::from(&services);
    info!(services = directory.len(), "Service directory loaded");

    let engine = RewriteEngine::new(&config, FunctionRegistry::standard(Arc::new(directory)))?;

    if args.validate {
        info!("Descriptor is valid");
        return Ok(());
    }

    if args.url.is_none() && args.body.is_none() {
        bail!("nothing to rewrite: pass --url and/or --body");
    }

    let mut ctx = EvaluationContext::new(&args.cluster)
        .with_correlation_id("cli")
        .bind_parameters(args.params.iter().cloned());
    if let Some(user) = &args.user {
        ctx = ctx.with_principal(Principal::new(user));
    }
    if let Some(ms) = args.timeout_ms {
        ctx = ctx.with_timeout(Duration::from_millis(ms));
    }

    let mut exchange = engine.exchange(ctx);

    if let Some(url) = &args.url {
        let outcome = match args.direction {
            Direction::Inbound => exchange.rewrite_request_url(url).await?,
            Direction::Outbound => exchange.rewrite_response_url(url).await?,
        };
        println!("{}", outcome.url());
    }

    if let Some(path) = &args.body {
        let body = if path.as_os_str() == "-" {
            let mut buf = Vec::new();
            std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)
                .context("Failed to read body from stdin")?;
            buf
        } else {
            std::fs::read(path)
                .with_context(|| format!("Failed to read body file: {}", path.display()))?
        };

        let rewritten = match args.direction {
            Direction::Inbound => {
                exchange
                    .rewrite_request_body(&body, &args.content_type)
                    .await?
            }
            Direction::Outbound => {
                exchange
                    .rewrite_response_body(&body, &args.content_type)
                    .await?
            }
        };
        std::io::stdout()
            .write_all(&rewritten)
            .context("Failed to write body")?;
    }

    Ok(())
}
