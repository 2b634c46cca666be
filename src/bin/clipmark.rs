use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "clipmark", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a video into an animated GIF or WebP (requires `ffmpeg` on PATH).
    Animate(AnimateArgs),
    /// Extract watermarked stills from a video into a ZIP (requires `ffmpeg` on PATH).
    Extract(ExtractArgs),
    /// Write evenly spaced frames as PNGs to pick a thumbnail from.
    Candidates(CandidatesArgs),
}

#[derive(Parser, Debug)]
struct AnimateArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output GIF/WebP path.
    #[arg(long)]
    out: PathBuf,

    /// Job JSON; flags below override its values.
    #[arg(long)]
    job: Option<PathBuf>,

    #[arg(long, value_enum)]
    format: Option<FormatChoice>,

    /// Output width in pixels (100-1280).
    #[arg(long)]
    width: Option<u32>,

    /// Output frame rate (1-30).
    #[arg(long)]
    fps: Option<u32>,

    /// Trim start in seconds.
    #[arg(long, requires = "end")]
    start: Option<f64>,

    /// Trim end in seconds.
    #[arg(long, requires = "start")]
    end: Option<f64>,

    /// Prepend the frame at this timestamp as a thumbnail.
    #[arg(long, conflicts_with = "thumbnail_image")]
    thumbnail_at: Option<f64>,

    /// Prepend this image as a thumbnail.
    #[arg(long)]
    thumbnail_image: Option<PathBuf>,

    /// Add a bottom-right watermark with default styling (repeatable).
    #[arg(long = "watermark")]
    watermarks: Vec<String>,
}

#[derive(Parser, Debug)]
struct ExtractArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output ZIP path.
    #[arg(long)]
    out: PathBuf,

    /// Job JSON; flags below override its values.
    #[arg(long)]
    job: Option<PathBuf>,

    /// Extract this many evenly spaced frames (>= 2).
    #[arg(long, conflicts_with = "interval")]
    count: Option<u32>,

    /// Extract one frame every this many seconds.
    #[arg(long)]
    interval: Option<f64>,

    /// Output width in pixels (100-1280); defaults to the source width.
    #[arg(long)]
    width: Option<u32>,

    /// Save JPEG stills at this quality (10-100).
    #[arg(long, conflicts_with = "png")]
    jpeg_quality: Option<u8>,

    /// Save PNG stills.
    #[arg(long)]
    png: bool,

    /// Add a bottom-right watermark with default styling (repeatable).
    #[arg(long = "watermark")]
    watermarks: Vec<String>,
}

#[derive(Parser, Debug)]
struct CandidatesArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output directory for the candidate PNGs.
    #[arg(long)]
    out: PathBuf,

    /// Number of candidates (>= 2).
    #[arg(long, default_value_t = 6)]
    count: u32,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatChoice {
    Gif,
    Webp,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clipmark=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Animate(args) => cmd_animate(args),
        Command::Extract(args) => cmd_extract(args),
        Command::Candidates(args) => cmd_candidates(args),
    }
}

fn read_job<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> anyhow::Result<T> {
    match path {
        Some(p) => Ok(clipmark::load_json(p)?),
        None => Ok(T::default()),
    }
}

fn cmd_animate(args: AnimateArgs) -> anyhow::Result<()> {
    let mut job: clipmark::AnimateJob = read_job(args.job.as_deref())?;
    if let Some(format) = args.format {
        job.format = match format {
            FormatChoice::Gif => clipmark::AnimationFormat::Gif,
            FormatChoice::Webp => clipmark::AnimationFormat::Webp,
        };
    }
    if let Some(width) = args.width {
        job.width = width;
    }
    if let Some(fps) = args.fps {
        job.fps = fps;
    }
    if let (Some(start_sec), Some(end_sec)) = (args.start, args.end) {
        job.trim = Some(clipmark::TrimRange { start_sec, end_sec });
    }
    if let Some(at_sec) = args.thumbnail_at {
        job.thumbnail = Some(clipmark::ThumbnailSource::VideoFrame { at_sec });
    }
    if let Some(path) = args.thumbnail_image {
        job.thumbnail = Some(clipmark::ThumbnailSource::Image { path });
    }
    job.watermarks
        .extend(args.watermarks.into_iter().map(clipmark::WatermarkSpec::new));

    let report = clipmark::run_animate(&args.in_path, &args.out, &job)?;
    if report.used_fallback_font {
        eprintln!("warning: a watermark font could not be loaded; the default face was used");
    }
    eprintln!(
        "wrote {} ({}x{}, {} frames)",
        report.out_path.display(),
        report.width,
        report.height,
        report.clip_frames + u64::from(report.thumbnail_frames)
    );
    Ok(())
}

fn cmd_extract(args: ExtractArgs) -> anyhow::Result<()> {
    let mut job: clipmark::ExtractJob = read_job(args.job.as_deref())?;
    if let Some(n) = args.count {
        job.sampling = clipmark::SamplingPolicy::ByCount(n);
    }
    if let Some(step) = args.interval {
        job.sampling = clipmark::SamplingPolicy::ByInterval(step);
    }
    if args.width.is_some() {
        job.width = args.width;
    }
    if let Some(quality) = args.jpeg_quality {
        job.format = clipmark::StillFormat::Jpeg { quality };
    }
    if args.png {
        job.format = clipmark::StillFormat::Png;
    }
    job.watermarks
        .extend(args.watermarks.into_iter().map(clipmark::WatermarkSpec::new));

    let report = clipmark::run_extract(&args.in_path, &args.out, &job)?;
    if report.used_fallback_font {
        eprintln!("warning: a watermark font could not be loaded; the default face was used");
    }
    eprintln!(
        "wrote {} ({} stills)",
        report.out_path.display(),
        report.entries.len()
    );
    Ok(())
}

fn cmd_candidates(args: CandidatesArgs) -> anyhow::Result<()> {
    let candidates = clipmark::thumbnail_candidates(&args.in_path, args.count)?;
    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir '{}'", args.out.display()))?;

    for c in &candidates {
        let path = args.out.join(format!("candidate_{:.3}s.png", c.at_sec));
        c.image
            .save_with_format(&path, image::ImageFormat::Png)
            .with_context(|| format!("write png '{}'", path.display()))?;
        println!("{:.3}\t{}", c.at_sec, path.display());
    }
    eprintln!("wrote {} candidates", candidates.len());
    Ok(())
}
