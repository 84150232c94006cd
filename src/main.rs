use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;

use sitescript::harness::{wrap_script, EntryPoint};
use sitescript::session::{sse_connected, sse_frame, ExecutionSession, SessionConfig};
use sitescript::types::EngineKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EngineArg {
    Auto,
    Lua,
    Js,
}

/// Run a site script and stream its output.
#[derive(Parser)]
#[command(name = "sitescript", version, about)]
struct Cli {
    /// Path to the script file.
    script: PathBuf,

    /// Script engine; `auto` picks by file extension.
    #[arg(long, value_enum, default_value_t = EngineArg::Auto)]
    engine: EngineArg,

    /// Entry point to call instead of running the script top-level
    /// (search_video, get_video_detail, get_play_video_detail).
    #[arg(long)]
    entry: Option<String>,

    /// Argument passed to the entry point.
    #[arg(long, default_value = "")]
    arg: String,

    /// Emit server-sent-events frames instead of plain lines.
    #[arg(long)]
    sse: bool,

    /// Log verbosity.
    #[arg(long, default_value = "warn")]
    log_level: tracing::Level,
}

fn engine_kind(cli: &Cli) -> anyhow::Result<EngineKind> {
    match cli.engine {
        EngineArg::Lua => Ok(EngineKind::Lua),
        EngineArg::Js => Ok(EngineKind::JavaScript),
        EngineArg::Auto => match cli.script.extension().and_then(|e| e.to_str()) {
            Some("lua") => Ok(EngineKind::Lua),
            Some("js") | Some("mjs") => Ok(EngineKind::JavaScript),
            _ => anyhow::bail!(
                "cannot infer engine from {}; pass --engine",
                cli.script.display()
            ),
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    let kind = engine_kind(&cli)?;
    let mut script = std::fs::read_to_string(&cli.script)?;

    if let Some(entry) = &cli.entry {
        let entry = EntryPoint::parse(entry)?;
        script = wrap_script(kind, &script, entry, &cli.arg);
        info!(%entry, "calling entry point");
    }

    let session = ExecutionSession::new(SessionConfig::default());
    let mut rx = session.start(kind, script);

    if cli.sse {
        print!("{}", sse_connected(session.id()));
    }
    while let Some(line) = rx.recv().await {
        if cli.sse {
            print!("{}", sse_frame(&line));
        } else {
            println!("{line}");
        }
    }

    Ok(())
}
