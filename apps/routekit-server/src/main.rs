use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use routekit::transport::{RouteInfo, RouteKind};
use routekit::{EventBus, HandlerRegistry, Instances, RouterBuilder, WebRouter};
use routekit_bootstrap::{AppConfig, CliArgs};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod controllers;
mod handlers;

use controllers::UsersController;
use handlers::{BearerAuth, RequestLogger};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Package scanned when the configuration names none.
const CONTROLLERS_PACKAGE: &str = concat!(module_path!(), "::controllers");

/// Environment variable holding the bearer token for `#[auth]` routes.
const TOKEN_ENV: &str = "ROUTEKIT_API_TOKEN";

/// Routekit demo server
#[derive(Parser)]
#[command(name = "routekit-server")]
#[command(about = "Serves annotation-declared controllers over axum")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port override for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print effective configuration (YAML) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Build the router and print its route table
    Check,
    /// Build the router and print what the registry recorded
    Routes,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // defaults -> YAML -> env (APP__*) -> CLI
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    routekit_bootstrap::init_logging(config.logging.as_ref(), &config.server.data_path());

    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    let token = std::env::var(TOKEN_ENV).unwrap_or_else(|_| {
        tracing::warn!("{TOKEN_ENV} not set; protected routes accept the development token");
        "dev-token".to_string()
    });

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config, token).await,
        Commands::Check => {
            let (router, _, _) = build_router(&config, &token)?;
            for route in router.routes() {
                println!("{}", describe(&route));
            }
            Ok(())
        }
        Commands::Routes => {
            let (_, registry, name) = build_router(&config, &token)?;
            let entry = registry
                .get(&name)
                .with_context(|| format!("router '{name}' missing from the registry"))?;
            println!("router {name}");
            for global in &entry.globals {
                println!("  global {global}");
            }
            for route in &entry.routes {
                println!("  {}", route.to_line());
            }
            Ok(())
        }
    }
}

fn describe(route: &RouteInfo) -> String {
    let methods = route
        .methods
        .iter()
        .map(|m| m.as_str())
        .collect::<Vec<_>>()
        .join("|");
    let kind = match route.kind {
        RouteKind::Http => "http",
        RouteKind::Socket => "socket",
        RouteKind::Failure => "failure",
        RouteKind::Consumer => "consumer",
    };
    let lock = if route.protected { " [auth]" } else { "" };
    format!("{kind:<8} {methods:<8} {} -> {}{lock}", route.path, route.handler)
}

/// Builds the router, returning it with the registry and the router name.
fn build_router(
    config: &AppConfig,
    token: &str,
) -> Result<(WebRouter, Arc<HandlerRegistry>, String)> {
    let registry = Arc::new(HandlerRegistry::new());
    let bus = EventBus::new();

    let mut builder =
        RouterBuilder::with_router(registry.clone(), WebRouter::with_event_bus(bus.clone()))
            .apply_config(&config.router)?;
    if config.router.route_packages.is_empty() && !config.router.scan_classpath {
        builder = builder.add_route_package(CONTROLLERS_PACKAGE);
    }

    let token = token.to_string();
    let mut builder = builder
        .add_handler(RequestLogger::default())
        .instantiator(Instances::new().provide(Arc::new(UsersController::new(bus))))
        .default_auth_handler(move || Arc::new(BearerAuth::new(token.clone())))
        .route(|r| r.get("/").handler(|_ctx| async { "routekit demo server" }));

    let name = builder.router_name().to_string();
    let router = builder.build()?;
    Ok((router, registry, name))
}

async fn run_server(config: AppConfig, token: String) -> Result<()> {
    let (router, _, name) = build_router(&config, &token)?;
    let addr = config.server.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, router = %name, routes = router.routes().len(), "listening");

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, router.into_axum()).with_graceful_shutdown(async move {
        let _ = stop_rx.await;
    });
    let mut server = tokio::spawn(async move { server.await });

    tokio::select! {
        joined = &mut server => {
            joined??;
            return Ok(());
        }
        signal = routekit_bootstrap::wait_for_shutdown() => signal?,
    }
    let _ = stop_tx.send(());

    let grace = config.server.shutdown_timeout_sec;
    if grace == 0 {
        server.await??;
    } else if let Ok(joined) = tokio::time::timeout(Duration::from_secs(grace), server).await {
        joined??;
    } else {
        tracing::warn!(grace, "in-flight requests abandoned after shutdown timeout");
    }
    tracing::info!("server stopped");
    Ok(())
}
