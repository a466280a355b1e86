//! flowbridge: Fake-DNS service for virtual-interface routing
//!
//! Runs the Fake-DNS engine (with its optional standalone UDP responder)
//! and persists the address bindings on shutdown. The relay handlers are
//! embedded by the process owning the virtual interface through the library.
//!
//! # Usage
//!
//! ```bash
//! # Run with custom configuration
//! ./flowbridge -c /path/to/config.json
//!
//! # Run with environment overrides
//! FLOWBRIDGE_LOG_LEVEL=debug ./flowbridge
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};

use flowbridge::config::{create_default_config, load_config_with_env, Config};
use flowbridge::dns::{IpCache, Resolver};
use flowbridge::fakedns::{FakeDnsEngine, FakeDnsUdpServer};
use flowbridge::logging::init_logging;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/flowbridge/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("flowbridge v{}", flowbridge::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"flowbridge v{}

Fake-DNS routing engine for virtual-interface flows.

USAGE:
    flowbridge [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/flowbridge/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    FLOWBRIDGE_LOG_LEVEL           Override log level (trace, debug, info, warn, error)
    FLOWBRIDGE_FAKEDNS_CACHE_DIR   Override the Fake-DNS cache directory
    FLOWBRIDGE_UDP_TIMEOUT_SECS    Override the UDP inactivity cutoff
    RUST_LOG                       Extra tracing filter directives
"#,
        flowbridge::VERSION
    );
}

fn build_resolver(config: &Config) -> Arc<Resolver> {
    Arc::new(
        Resolver::new(config.resolver.servers.clone())
            .with_cache(Arc::new(IpCache::new()))
            .with_timeout(config.resolver.timeout()),
    )
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.generate_config {
        create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", args.config_path))?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config.log);

    info!("flowbridge v{}", flowbridge::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    if !config.fakedns.enabled {
        warn!("Fake DNS is disabled, nothing to serve");
        return Ok(());
    }

    let engine = Arc::new(
        FakeDnsEngine::new(&config.fakedns).context("Failed to create Fake DNS engine")?,
    );
    // A broken cache file only costs the previous bindings
    if let Err(e) = engine.start() {
        error!("Failed to restore Fake DNS state: {}", e);
    }
    info!(
        "Fake DNS pool {}-{} ({} addresses, {} restored)",
        config.fakedns.min_ip,
        config.fakedns.max_ip,
        engine.capacity(),
        engine.bound()
    );

    let server_task = match config.fakedns.listen {
        Some(addr) => {
            let server = FakeDnsUdpServer::bind(addr, Arc::clone(&engine))
                .await
                .with_context(|| format!("Failed to bind Fake DNS responder on {addr}"))?
                .with_resolver(build_resolver(&config));
            info!("Fake DNS responder listening on {}", server.local_addr()?);
            Some(tokio::spawn(server.run()))
        }
        None => None,
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        () = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(task) = server_task {
        task.abort();
    }

    match engine.stop() {
        Ok(()) => info!("Fake DNS state saved ({} bindings)", engine.bound()),
        Err(e) => error!("Failed to save Fake DNS state: {}", e),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
