use std::{path::Path, sync::Arc, time::Duration};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use portico::{
    adapters::{GatewayServer, GatewayServerOptions, ServerCore, build_dispatcher},
    config::{
        GatewayConfigValidator,
        loader::{load_config, load_config_sync},
    },
    metrics::{self, OtelMetrics},
    ports::{MetricsSink, NoopMetrics},
    tracing_setup,
    utils::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "portico.yaml")]
    config: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "portico.yaml")]
        config: String,
    },
    /// Initialize a new configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "portico.yaml")]
        config: String,
    },
    /// Start the gateway server (default)
    Serve {
        /// Configuration file to use
        #[clap(short, long, default_value = "portico.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    match args.command {
        Some(Commands::Validate { config }) => validate_config_command(&config),
        Some(Commands::Init { config }) => init_config_command(&config).await,
        Some(Commands::Serve { config }) => serve_command(&config).await,
        None => serve_command(&args.config).await,
    }
}

async fn serve_command(config_path: &str) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    tracing_setup::init_tracing(&config.logging).context("Failed to initialize tracing")?;
    tracing::info!("Loaded configuration from {config_path}");

    let meter_provider = if config.metrics.enabled {
        Some(metrics::init_metrics(&config.metrics).context("Failed to initialize metrics")?)
    } else {
        None
    };
    let sink: Arc<dyn MetricsSink> = match &meter_provider {
        Some(provider) => Arc::new(OtelMetrics::from_provider(provider)),
        None => Arc::new(NoopMetrics),
    };

    let dispatcher =
        Arc::new(build_dispatcher(&config, sink).context("Failed to build the dispatcher")?);

    let drain_timeout = humantime::parse_duration(&config.server.shutdown_timeout)
        .unwrap_or(Duration::from_secs(30));
    let shutdown = GracefulShutdown::with_timeout(drain_timeout);

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signal_shutdown.run_signal_handler().await {
            tracing::error!("Signal handler failed: {:?}", e);
        }
    });

    let core = ServerCore::bind(&config.listen_addr, shutdown.clone()).await?;
    let server = GatewayServer::new(
        dispatcher,
        GatewayServerOptions {
            max_body_bytes: config.server.max_body_bytes,
            security_headers: config.server.security_headers,
        },
    );
    let result = server.serve(core).await;

    if let Some(provider) = &meter_provider {
        if let Err(e) = metrics::shutdown_metrics(provider) {
            tracing::warn!("{:?}", e);
        }
    }
    tracing::info!("Portico stopped ({:?})", shutdown.reason());
    result
}

/// Validate configuration file and exit
fn validate_config_command(config_path: &str) -> Result<()> {
    println!("Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        return Err(eyre!("Configuration file '{config_path}' not found"));
    }

    let config = load_config_sync(config_path).context("Configuration parsing failed")?;
    println!("Configuration parsing: OK");

    let errors = GatewayConfigValidator::collect_errors(&config);
    if !errors.is_empty() {
        eprintln!("Configuration validation failed:");
        for (i, error) in errors.iter().enumerate() {
            eprintln!("  {}. {}", i + 1, error);
        }
        return Err(eyre!("{} validation error(s) in {config_path}", errors.len()));
    }

    println!("Configuration validation: OK");
    println!();
    println!("Configuration Summary:");
    println!("   Listen Address: {}", config.listen_addr);
    println!("   Routes: {}", config.routes.len());
    println!("   Authorization: {}", config.auth.is_some());
    println!("   Metrics: {}", config.metrics.enabled);
    Ok(())
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        return Err(eyre!("Configuration file '{config_path}' already exists"));
    }

    let default_config = r#"# Portico gateway configuration

listen_addr: "127.0.0.1:8080"

server:
  max_body_bytes: 2097152
  shutdown_timeout: 30s

dispatcher:
  # Bound on gateway-level handlers such as authorization.
  # handlers_timeout: 500ms
  redirect_fixed_path: true
  request_id_header: x-request-id

logging:
  level: info
  format: pretty

# auth:
#   tokens: ["change-me"]
#   public_paths: ["/health"]

routes:
  - path: /health
    action:
      type: respond
      body: ok

  - path: /users/:id
    methods: [GET, DELETE]
    action:
      type: echo
    policy:
      time_budget: 2s
    query:
      - name: verbose
        one_of: ["true", "false"]
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("Created default configuration at: {config_path}");
    println!("   Run 'portico serve --config {config_path}' to start the server");
    Ok(())
}
