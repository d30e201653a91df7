use std::{
    io::BufRead as _,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{Arc, mpsc},
    thread,
};

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use hwview::codec::software::SoftwareCodec;
use hwview::{
    AssetSource, Control, DisplayMode, PipelineError, Rect, Rotation, SimBehavior,
    SimulatedBackend, Size, Slideshow, TransitionKind, Viewer, ViewerConfig,
};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

#[derive(Parser, Debug)]
#[command(name = "hwview", version, about = "Show images and animations on a hardware display")]
struct Cli {
    /// Image files or directories (defaults to the current directory).
    inputs: Vec<PathBuf>,

    /// Slideshow: advance after this many seconds.
    #[arg(short = 't', long = "timeout")]
    timeout: Option<u64>,

    /// Put a black layer behind the picture.
    #[arg(short = 'b', long)]
    blank: bool,

    /// Destination window as 'x1,y1,x2,y2' or 'x1 y1 x2 y2'.
    #[arg(long, value_parser = parse_window)]
    win: Option<Rect>,

    /// Crop to fill the destination instead of letterboxing.
    #[arg(short = 'f', long)]
    fill: bool,

    /// Stretch to the destination ignoring aspect ratio.
    #[arg(short = 'a', long)]
    no_aspect: bool,

    /// Show pictures that fit at native size, centered.
    #[arg(short = 'c', long)]
    center: bool,

    /// Never scale pictures through the resizer.
    #[arg(short = 'r', long)]
    no_resize: bool,

    /// Initial rotation in degrees (0, 90, 180 or 270).
    #[arg(short = 'o', long, value_parser = parse_rotation)]
    orientation: Option<Rotation>,

    /// Mirror horizontally.
    #[arg(short = 'm', long)]
    mirror: bool,

    /// Compositor layer.
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    layer: Option<i32>,

    /// Display number.
    #[arg(short = 'd', long)]
    display: Option<u32>,

    /// Log asset and presentation milestones.
    #[arg(short = 'i', long)]
    info: bool,

    /// Log every protocol step.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Do not read key controls from stdin.
    #[arg(short = 'k', long)]
    no_keys: bool,

    /// Always decode in software.
    #[arg(short = 's', long)]
    soft: bool,

    /// Ignore EXIF orientation tags.
    #[arg(long)]
    ignore_exif: bool,

    /// Picture-to-picture transition.
    #[arg(long, value_enum)]
    transition: Option<TransitionChoice>,

    /// Blend duration in milliseconds.
    #[arg(long)]
    transition_duration: Option<u64>,

    /// Viewer config JSON. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hardware backend.
    #[arg(long, value_enum, default_value_t = BackendChoice::Sim)]
    backend: BackendChoice,

    /// Resolution the simulated display reports, as WxH.
    #[arg(long, value_parser = parse_size, default_value = "1920x1080")]
    display_size: Size,

    /// Write the last presented frame to this PNG on exit.
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Show the first picture and exit.
    #[arg(long)]
    once: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransitionChoice {
    None,
    Blend,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendChoice {
    Sim,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("hwview: {err:#}");
            ExitCode::from(exit_bits(&err))
        }
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.info {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_bits(err: &anyhow::Error) -> u8 {
    let flags = err
        .chain()
        .find_map(|e| e.downcast_ref::<PipelineError>())
        .map(PipelineError::flags)
        .unwrap_or_default();
    if flags.is_empty() { 1 } else { flags.bits() }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = build_config(&cli)?;
    let sources = collect_sources(&cli.inputs)?;
    if sources.is_empty() {
        return Err(PipelineError::FileNotFound(PathBuf::from("no images found")).into());
    }

    let backend = match cli.backend {
        BackendChoice::Sim => Arc::new(SimulatedBackend::new(
            SimBehavior::default().with_display_size(cli.display_size),
        )),
    };
    let display = backend.display();

    let interval = config.slideshow_interval();
    let mut viewer = Viewer::new(backend, Arc::new(SoftwareCodec), config)?;
    let mut show = Slideshow::new(sources, interval);
    show.start(&mut viewer)?;

    if !cli.once {
        let (tx, rx) = mpsc::channel();
        // Held until the slideshow ends so the control channel never disconnects.
        let _idle = if cli.no_keys {
            Some(tx)
        } else {
            spawn_key_reader(tx)?;
            None
        };
        show.run(&mut viewer, &rx)?;
    }

    if let Some(path) = &cli.snapshot {
        let frame = display
            .last_frame()
            .context("nothing was presented, no snapshot to write")?;
        frame
            .save_with_format(path, image::ImageFormat::Png)
            .with_context(|| format!("write snapshot '{}'", path.display()))?;
        eprintln!("wrote {}", path.display());
    }

    viewer.shutdown()?;
    Ok(())
}

fn build_config(cli: &Cli) -> anyhow::Result<ViewerConfig> {
    let mut config = match &cli.config {
        Some(path) => ViewerConfig::from_path(path)?,
        None => ViewerConfig::default(),
    };
    if let Some(secs) = cli.timeout {
        config.slideshow_secs = Some(secs);
    }
    config.blank_background |= cli.blank;
    config.force_software |= cli.soft;
    config.ignore_exif |= cli.ignore_exif;
    if cli.no_resize {
        config.resize = false;
    }
    if let Some(kind) = cli.transition {
        config.transition.kind = match kind {
            TransitionChoice::None => TransitionKind::Cut,
            TransitionChoice::Blend => TransitionKind::Blend,
        };
    }
    if let Some(ms) = cli.transition_duration {
        config.transition.duration_ms = ms;
    }

    let display = &mut config.display;
    if cli.win.is_some() {
        display.window = cli.win;
    }
    if cli.fill {
        display.mode = DisplayMode::Fill;
    }
    if cli.no_aspect {
        display.keep_aspect = false;
    }
    display.center |= cli.center;
    if let Some(rotation) = cli.orientation {
        display.rotation = rotation;
    }
    display.mirror |= cli.mirror;
    if let Some(layer) = cli.layer {
        display.layer = layer;
    }
    if let Some(num) = cli.display {
        display.display = num;
    }

    config.validate()?;
    Ok(config)
}

fn collect_sources(inputs: &[PathBuf]) -> anyhow::Result<Vec<AssetSource>> {
    let default = [PathBuf::from(".")];
    let inputs = if inputs.is_empty() { &default[..] } else { inputs };
    let mut out = Vec::new();
    for input in inputs {
        if input.is_dir() {
            out.extend(list_images(input)?.into_iter().map(AssetSource::Path));
        } else {
            out.push(AssetSource::Path(input.clone()));
        }
    }
    Ok(out)
}

fn list_images(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("list directory '{}'", dir.display()))?;
    let mut paths = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("list directory '{}'", dir.display()))?
            .path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn spawn_key_reader(tx: mpsc::Sender<Control>) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("hwview-keys".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if let Some(control) = Control::from_key(&line)
                    && tx.send(control).is_err()
                {
                    break;
                }
            }
        })
        .context("spawn key reader")?;
    Ok(())
}

fn parse_window(s: &str) -> Result<Rect, String> {
    let parts: Vec<i32> = s
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse::<i32>().map_err(|e| format!("window coordinate '{p}': {e}")))
        .collect::<Result<_, _>>()?;
    let &[x1, y1, x2, y2] = parts.as_slice() else {
        return Err(format!("window needs 4 coordinates, got {}", parts.len()));
    };
    if x2 <= x1 || y2 <= y1 {
        return Err(format!("window '{s}' is empty"));
    }
    Ok(Rect::from_corners(x1, y1, x2, y2))
}

fn parse_rotation(s: &str) -> Result<Rotation, String> {
    let deg: i32 = s.parse().map_err(|e| format!("orientation '{s}': {e}"))?;
    match deg {
        0 | 90 | 180 | 270 => Rotation::from_degrees(deg).ok_or_else(|| format!("orientation {deg}")),
        _ => Err(format!("orientation must be 0, 90, 180 or 270, got {deg}")),
    }
}

fn parse_size(s: &str) -> Result<Size, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("size '{s}' is not WxH"))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("width '{w}': {e}"))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("height '{h}': {e}"))?;
    if w == 0 || h == 0 {
        return Err(format!("size '{s}' is empty"));
    }
    Ok(Size::new(w, h))
}
