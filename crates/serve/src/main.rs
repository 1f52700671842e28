use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

/// Development HTTP facade over a local Kronoa content store.
#[derive(Debug, Parser)]
#[command(name = "kronoa-serve")]
struct Args {
    /// Root directory of the filesystem-backed store.
    #[arg(long)]
    root: std::path::PathBuf,

    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Log verbosity: trace|debug|info|warn|error.
    #[arg(long = "log.level", default_value = "info")]
    log_level: String,

    /// Skip bootstrapping an empty store.
    #[arg(long)]
    no_bootstrap: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(args.log_level.as_str())
        .init();

    let store: storage::Store = Arc::new(
        storage::FilesystemBackend::open(&args.root)
            .with_context(|| format!("opening store at {:?}", args.root))?,
    );
    if !args.no_bootstrap {
        kronoa::bootstrap(&store).await.context("bootstrapping store")?;
    }

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, root = ?args.root, "serving");

    axum::serve(listener, serve::App::new(store).router())
        .await
        .context("server exited")?;
    Ok(())
}
