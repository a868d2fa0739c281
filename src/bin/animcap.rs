use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use animcap::{
    EngineBindingAdapter, OutputFormat, Recorder, RecordingConfig, RecordingStatus, Resolution,
    SharedEngine, StatusCallback, VariableBinding, VariableValue, demo, shared,
};

#[derive(Parser, Debug)]
#[command(name = "animcap", version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture the demo pattern engine to a GIF, WebM or MP4 file.
    Record(RecordArgs),
    /// Validate a capture job without recording.
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct RecordArgs {
    /// Capture job JSON.
    #[arg(long)]
    job: PathBuf,

    /// Output artifact path. The export descriptor is written next to it as `.json`.
    #[arg(long)]
    out: PathBuf,

    /// Override the job's output format (gif, webm, mp4).
    #[arg(long)]
    format: Option<OutputFormat>,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Capture job JSON.
    #[arg(long)]
    job: PathBuf,
}

/// One capture request: the recording config plus how to set up the engine before it.
#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CaptureJob {
    recording: RecordingConfig,
    #[serde(default)]
    composition: Option<CompositionRequest>,
    #[serde(default)]
    variables: Vec<JobVariable>,
}

#[derive(Debug, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompositionRequest {
    name: String,
    width: u32,
    height: u32,
}

#[derive(Debug, serde::Deserialize)]
struct JobVariable {
    #[serde(flatten)]
    binding: VariableBinding,
    value: VariableValue,
}

const DEFAULT_COMPOSITION: (u32, u32) = (320, 240);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.cmd {
        Command::Record(args) => cmd_record(args).await,
        Command::Check(args) => cmd_check(args),
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn read_job(path: &Path) -> anyhow::Result<CaptureJob> {
    let f = File::open(path).with_context(|| format!("open capture job '{}'", path.display()))?;
    let job: CaptureJob = serde_json::from_reader(BufReader::new(f))
        .with_context(|| format!("parse capture job '{}'", path.display()))?;
    Ok(job)
}

/// Demo engine with the job's composition applied and its variables bound.
fn build_engine(job: &CaptureJob) -> anyhow::Result<SharedEngine> {
    let (w, h) = job
        .composition
        .as_ref()
        .map_or(DEFAULT_COMPOSITION, |c| (c.width, c.height));
    let resolution = Resolution::new(w, h)?;

    let (engine, surface) = demo::pattern("#animcap-canvas", resolution);
    let mut adapter = EngineBindingAdapter::new(Box::new(engine));
    adapter.attach_surface(Arc::new(surface));

    for var in &job.variables {
        adapter.bind(var.binding.clone());
    }
    if let Some(comp) = &job.composition {
        adapter
            .switch_resolution(resolution, comp.name.clone())
            .with_context(|| format!("switch to composition '{}'", comp.name))?;
    }
    for var in &job.variables {
        adapter
            .set_value(&var.binding.id, var.value.clone())
            .with_context(|| format!("set variable '{}'", var.binding.id))?;
    }
    Ok(shared(adapter))
}

fn cmd_check(args: CheckArgs) -> anyhow::Result<()> {
    let job = read_job(&args.job)?;
    job.recording.validate()?;
    build_engine(&job)?;
    eprintln!(
        "ok: {} ({} ms @ {} fps, {} frames, {} variables)",
        job.recording.format,
        job.recording.duration_ms,
        job.recording.fps,
        job.recording.expected_frames(),
        job.variables.len()
    );
    Ok(())
}

async fn cmd_record(args: RecordArgs) -> anyhow::Result<()> {
    let mut job = read_job(&args.job)?;
    if let Some(format) = args.format {
        job.recording.format = format;
    }
    let config = job.recording.clone();
    let recorder = Recorder::new(build_engine(&job)?)?;

    let on_status: StatusCallback = Box::new(|s: &RecordingStatus| {
        tracing::debug!(
            progress = s.progress,
            current_time_ms = s.current_time_ms,
            frames = s.total_frames,
            "status"
        );
    });
    let result = recorder
        .start_recording(config.clone(), Some(on_status))
        .result()
        .await;

    if !result.success {
        anyhow::bail!(
            "recording failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    let data = result
        .data
        .as_deref()
        .context("successful recording without data")?;

    if let Some(parent) = args.out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&args.out, data)
        .with_context(|| format!("write artifact '{}'", args.out.display()))?;

    let descriptor = result
        .descriptor(&config)
        .context("successful recording without descriptor")?;
    let desc_path = args.out.with_extension("json");
    let json = serde_json::to_vec_pretty(&descriptor).context("serialize export descriptor")?;
    std::fs::write(&desc_path, json)
        .with_context(|| format!("write descriptor '{}'", desc_path.display()))?;

    eprintln!(
        "wrote {} ({} bytes, {} ms)",
        args.out.display(),
        result.size,
        result.duration_ms
    );
    Ok(())
}
