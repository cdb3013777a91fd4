use anyhow::{bail, Context, Result};
use ccstream::config::Config;
use ccstream::filter::FilterConfig;
use ccstream::format::OutputFormat;
use ccstream::stream::{process_stream, Pipeline};
use ccstream::transcript::{
    claude_root, find_latest_session, find_session_by_id, projects_dir, resolve_watch_path,
    MessageKind, WatchOptions, WatchSource, WatchedLine, Watcher,
};
use ccstream::Error;
use clap::Parser;
use crossterm::tty::IsTty;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ccstream", version)]
#[command(about = "Render Claude Code JSONL transcripts as terminal, Markdown, or plain text")]
#[command(after_help = "\
Examples:
  ccstream session.jsonl                 Render a whole transcript
  ccstream session.jsonl -n 20           Only the last 20 lines
  ccstream --latest -F markdown > out.md Most recent session as Markdown
  ccstream --watch ~/.claude/projects/   Follow every session
  ccstream --watch . -n 10               Follow this directory's sessions with context")]
struct Cli {
    /// JSONL file to read
    input_file: Option<PathBuf>,

    /// JSONL file to read
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    file: Option<PathBuf>,

    /// Find a session by its id under ~/.claude/projects
    #[arg(long, value_name = "ID", conflicts_with = "latest")]
    session: Option<String>,

    /// Read the most recently modified session
    #[arg(long)]
    latest: bool,

    /// Output format (default: ansi on a terminal, plain otherwise)
    #[arg(short = 'F', long, value_enum)]
    format: Option<OutputFormat>,

    #[arg(long, overrides_with = "show_thinking")]
    hide_thinking: bool,

    /// Show thinking even if the config hides it
    #[arg(long, overrides_with = "hide_thinking")]
    show_thinking: bool,

    #[arg(long, overrides_with = "show_tool_results")]
    hide_tool_results: bool,

    /// Show tool results even if the config hides them
    #[arg(long, overrides_with = "hide_tool_results")]
    show_tool_results: bool,

    /// Show ids, timestamps, model and token usage
    #[arg(long, overrides_with = "hide_metadata")]
    show_metadata: bool,

    #[arg(long, overrides_with = "show_metadata")]
    hide_metadata: bool,

    /// Label each message with its input line number
    #[arg(long)]
    line_numbers: bool,

    /// Only user and assistant text: no metadata, thinking or tool results
    #[arg(long)]
    compact: bool,

    /// Show only these message types (repeatable)
    #[arg(long = "show-type", value_name = "TYPE", value_parser = parse_kind)]
    show_types: Vec<MessageKind>,

    /// Show only these subtypes (repeatable)
    #[arg(long = "show-subtype", value_name = "SUBTYPE")]
    show_subtypes: Vec<String>,

    /// Show only messages using these tools (repeatable)
    #[arg(long = "show-tool", value_name = "TOOL")]
    show_tools: Vec<String>,

    /// Show only messages matching this regex (repeatable)
    #[arg(long = "grep", value_name = "PATTERN")]
    grep: Vec<String>,

    /// Hide messages matching this regex (repeatable)
    #[arg(long, value_name = "PATTERN")]
    exclude: Vec<String>,

    /// Follow a file or directory for new lines, like tail -f
    #[arg(short = 'w', long, value_name = "PATH")]
    watch: Option<PathBuf>,

    /// Show only the last N lines (files and --watch)
    #[arg(short = 'n', long = "lines", value_name = "N", default_value_t = 0)]
    lines: usize,

    /// Watch mode poll interval in milliseconds
    #[arg(long = "poll-ms", value_name = "MS")]
    poll_ms: Option<u64>,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,
}

fn parse_kind(tag: &str) -> std::result::Result<MessageKind, String> {
    MessageKind::from_tag(tag).ok_or_else(|| {
        let known = MessageKind::ALL
            .iter()
            .map(MessageKind::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        format!("unknown message type `{tag}` (expected one of: {known})")
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_broken_pipe(&e) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load().unwrap_or_else(|e| {
        tracing::warn!("{e:#}");
        Config::default()
    });

    let filter = build_filter(&cli, &config)?;
    let format = cli.format.or(config.format).unwrap_or_else(|| {
        if io::stdout().is_tty() {
            OutputFormat::Ansi
        } else {
            OutputFormat::Plain
        }
    });
    let mut pipeline = Pipeline::new(filter, format.formatter());

    if let Some(target) = &cli.watch {
        let poll_interval = cli
            .poll_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or_else(|| config.poll_interval());
        return watch(target, cli.lines, poll_interval, pipeline);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match input_path(&cli)? {
        Some(path) => {
            let file = File::open(&path).map_err(|source| Error::SourceUnavailable {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "reading transcript");
            process_stream(BufReader::new(file), &mut pipeline, &mut out)?;
        }
        None => {
            let stdin = io::stdin();
            if stdin.is_tty() {
                bail!("no input source: pass a file, --session, --latest or --watch, or pipe a transcript on stdin");
            }
            process_stream(stdin.lock(), &mut pipeline, &mut out)?;
        }
    }
    Ok(())
}

fn build_filter(cli: &Cli, config: &Config) -> Result<FilterConfig> {
    let types = if cli.compact && cli.show_types.is_empty() {
        vec![MessageKind::User, MessageKind::Assistant]
    } else {
        cli.show_types.clone()
    };
    let excludes = config
        .exclude_patterns()
        .iter()
        .chain(&cli.exclude)
        .cloned();

    let filter = FilterConfig::builder()
        .types(types)
        .subtypes(cli.show_subtypes.iter().cloned())
        .tools(cli.show_tools.iter().cloned())
        .include(cli.grep.iter().cloned())
        .exclude(excludes)
        .hide_thinking(toggle(
            cli.hide_thinking,
            cli.show_thinking,
            cli.compact,
            config.hide_thinking,
        ))
        .hide_tool_results(toggle(
            cli.hide_tool_results,
            cli.show_tool_results,
            cli.compact,
            config.hide_tool_results,
        ))
        .show_metadata(toggle(
            cli.show_metadata,
            cli.hide_metadata,
            false,
            config.show_metadata.filter(|_| !cli.compact),
        ))
        .line_numbers(cli.line_numbers || config.line_numbers == Some(true))
        .initial_lines(cli.lines)
        .build()?;
    Ok(filter)
}

/// Resolve an on/off flag pair. The last flag given wins, then `--compact`,
/// then the config file.
fn toggle(on: bool, off: bool, compact: bool, config: Option<bool>) -> bool {
    if on || off {
        return on;
    }
    compact || config.unwrap_or(false)
}

/// Positional file first, then `-f`, `--session` and `--latest`.
/// `None` means stdin.
fn input_path(cli: &Cli) -> Result<Option<PathBuf>> {
    if let Some(path) = cli.input_file.as_ref().or(cli.file.as_ref()) {
        return Ok(Some(path.clone()));
    }

    let projects = || projects_dir().context("cannot determine home directory");
    if let Some(id) = &cli.session {
        return Ok(Some(find_session_by_id(&projects()?, id)?));
    }
    if cli.latest {
        return Ok(Some(find_latest_session(&projects()?)?));
    }
    Ok(None)
}

fn watch(target: &Path, lines: usize, poll_interval: Duration, pipeline: Pipeline) -> Result<()> {
    let root = claude_root().context("cannot determine home directory")?;
    let resolved = resolve_watch_path(target, &root);
    let given = target.canonicalize().unwrap_or_else(|_| target.to_path_buf());

    if !resolved.exists() {
        if resolved != given {
            bail!(
                "path not found: {} (looked for Claude project at {})",
                target.display(),
                resolved.display()
            );
        }
        bail!("path not found: {}", target.display());
    }
    if resolved != given {
        eprintln!("watching: {}", resolved.display());
    }

    let source = WatchSource::detect(&resolved);
    let banners = matches!(source, WatchSource::Directory(_));
    let options = WatchOptions {
        initial_lines: lines,
        poll_interval,
        recursive: true,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(follow(source, options, pipeline, banners))
}

async fn follow(
    source: WatchSource,
    options: WatchOptions,
    mut pipeline: Pipeline,
    banners: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let stdout = io::stdout();
    let mut write_error: Option<io::Error> = None;
    Watcher::new(source, options)
        .run(cancel.clone(), |line| {
            if write_error.is_some() {
                return;
            }
            let mut out = stdout.lock();
            if let Err(e) = write_watched(&mut pipeline, &mut out, &line, banners) {
                write_error = Some(e);
                cancel.cancel();
            }
        })
        .await?;

    match write_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn write_watched<W: Write>(
    pipeline: &mut Pipeline,
    out: &mut W,
    line: &WatchedLine,
    banners: bool,
) -> io::Result<()> {
    let Some(rendered) = pipeline.process_line(line.line_number, &line.text) else {
        return Ok(());
    };
    if banners {
        if let Some(banner) = pipeline.announce_source(&line.path) {
            out.write_all(banner.as_bytes())?;
        }
    }
    out.write_all(rendered.as_bytes())?;
    out.flush()
}

fn is_broken_pipe(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}
