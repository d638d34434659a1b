use answerpipe::config::{self, PipelineArgs, RateLimitArgs, DEFAULT_BIND};
use answerpipe::http;
use answerpipe::local::render_playwright::playwright_resolvable;
use answerpipe::local::AnswerRequest;
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "answerpipe=info,answerpipe_local=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "answerpipe")]
#[command(about = "Answer questions grounded in the content of given web pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve `POST /api/chat` over HTTP.
    Serve(ServeCmd),
    /// Answer one question from the command line (json on stdout).
    Ask(AskCmd),
    /// Diagnose configuration/launch issues (json; no secrets).
    Doctor(DoctorCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[derive(clap::Args, Debug)]
struct ServeCmd {
    /// Listen address.
    #[arg(long, env = "ANSWERPIPE_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,
    #[command(flatten)]
    pipeline: PipelineArgs,
    #[command(flatten)]
    rate: RateLimitArgs,
}

#[derive(clap::Args, Debug)]
struct AskCmd {
    /// Question to answer.
    #[arg(long)]
    question: String,
    /// Source URL (repeatable; order is preserved in `sources`).
    #[arg(long = "url", required = true)]
    urls: Vec<String>,
    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(clap::Args, Debug)]
struct DoctorCmd {
    /// Node.js binary to probe.
    #[arg(long, env = "ANSWERPIPE_NODE", default_value = "node")]
    node_bin: String,
    /// Timeout for each Node probe (ms).
    #[arg(long, default_value_t = 3000)]
    timeout_ms: u64,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn serve(args: ServeCmd) -> Result<()> {
    let engine = args.pipeline.build_engine()?;
    let limiter = Arc::new(args.rate.limiter());
    let janitor = limiter.spawn_janitor(args.rate.window());
    let app = http::router(engine, limiter);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(
        addr = %listener.local_addr()?,
        backend = %args.pipeline.fetch_backend,
        model = %args.pipeline.llm_model,
        "listening"
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    janitor.abort();
    Ok(())
}

async fn ask(args: AskCmd) -> Result<()> {
    let engine = args.pipeline.build_engine()?;
    match engine
        .answer(AnswerRequest::new(args.question, args.urls))
        .await
    {
        Ok(out) => {
            println!("{}", serde_json::to_string(&out)?);
            Ok(())
        }
        Err(e) => {
            let (status, body) = http::error_body(&e);
            tracing::error!(status = status.as_u16(), error = %e, "ask failed");
            println!("{body}");
            std::process::exit(1);
        }
    }
}

async fn node_version(node_bin: &str, timeout_ms: u64) -> Result<String> {
    let out = tokio::time::timeout(
        std::time::Duration::from_millis(timeout_ms.max(1)),
        tokio::process::Command::new(node_bin)
            .arg("--version")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| anyhow::anyhow!("timed out after {timeout_ms}ms"))??;
    if !out.status.success() {
        anyhow::bail!("exited with {}", out.status);
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

async fn doctor(args: DoctorCmd) -> Result<()> {
    fn has_env(k: &str) -> bool {
        std::env::var(k).ok().is_some_and(|v| !v.trim().is_empty())
    }

    let t0 = std::time::Instant::now();
    let mut checks: Vec<serde_json::Value> = Vec::new();

    let node = node_version(&args.node_bin, args.timeout_ms).await;
    let node_ok = node.is_ok();
    checks.push(serde_json::json!({
        "name": "node_available",
        "ok": node_ok,
        "version": node.as_ref().ok(),
        "error": node.as_ref().err().map(|e| e.to_string()),
        "hint": if node_ok { "" } else { "Install Node.js or set ANSWERPIPE_NODE, or use --fetch-backend http." },
    }));

    let playwright_ok = playwright_resolvable(
        &args.node_bin,
        std::time::Duration::from_millis(args.timeout_ms.max(1)),
    )
    .await;
    checks.push(serde_json::json!({
        "name": "playwright_resolvable",
        "ok": playwright_ok,
        "hint": if playwright_ok { "" } else { "Run `npm i -g playwright && npx playwright install chromium`, or set ANSWERPIPE_NODE_PATH." },
    }));

    let ok = checks.iter().all(|c| c["ok"].as_bool().unwrap_or(false));
    let payload = serde_json::json!({
        "schema_version": 1,
        "kind": "doctor",
        "ok": ok,
        "name": "answerpipe",
        "version": env!("CARGO_PKG_VERSION"),
        "platform": {
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        },
        "elapsed_ms": t0.elapsed().as_millis(),
        "configured": {
            "llm_api_key": has_env("ANSWERPIPE_LLM_API_KEY") || has_env("GROQ_API_KEY"),
            "render_disabled": has_env("ANSWERPIPE_RENDER_DISABLE"),
        },
        "checks": checks,
    });
    println!("{payload}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = config::load_dotenv();
    init_tracing();
    if let Some(p) = dotenv {
        tracing::debug!(path = %p.display(), "loaded env file");
    }

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve(args) => serve(args).await?,
        Commands::Ask(args) => ask(args).await?,
        Commands::Doctor(args) => doctor(args).await?,
        Commands::Version(args) => match args.output.to_ascii_lowercase().as_str() {
            "text" => println!("answerpipe {}", env!("CARGO_PKG_VERSION")),
            _ => println!(
                "{}",
                serde_json::json!({
                    "schema_version": 1,
                    "kind": "version",
                    "ok": true,
                    "name": "answerpipe",
                    "version": env!("CARGO_PKG_VERSION"),
                })
            ),
        },
    }
    Ok(())
}
