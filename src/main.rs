use anyhow::{bail, Context};
use clap::{ArgGroup, Args, Parser, Subcommand};
use g2burn::camtools::{RasterEngraver, TestPattern};
use g2burn::communication::{
    list_ports, ControllerEvent, GrblController, HOME_COMMAND, JOG_PREFIX, SETTINGS_COMMAND,
};
use g2burn::designer::{generate, parse_shapes, MotionProgram};
use g2burn::settings::Config;
use g2burn::{
    connection_params, generator_settings, init_logging, raster_options, scan_options,
    streaming_config, MachineState,
};
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (built ",
    env!("G2BURN_BUILD_DATE"),
    ")"
);

#[derive(Parser)]
#[command(name = "g2burn", version, long_version = LONG_VERSION, about)]
struct Cli {
    /// Config file (.json or .toml); defaults to the platform config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List serial ports that look like controllers
    Ports,

    /// Generate motion code from a JSON shape list
    Generate {
        #[arg(long)]
        shapes: PathBuf,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Generate raster engraving motion code from an image
    Engrave {
        #[arg(long)]
        image: PathBuf,

        #[command(flatten)]
        size: ImageSize,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Generate a program and stream it to a GRBL controller
    #[command(group(ArgGroup::new("source").required(true).args(["shapes", "image"])))]
    Stream {
        /// Serial port; defaults to the configured port
        #[arg(long)]
        port: Option<String>,

        #[arg(long)]
        baud: Option<u32>,

        #[arg(long)]
        shapes: Option<PathBuf>,

        #[arg(long)]
        image: Option<PathBuf>,

        #[command(flatten)]
        size: ImageSize,
    },

    /// Engrave a built-in calibration pattern
    Pattern {
        /// grid, circles or gradient
        #[arg(long, default_value_t = TestPattern::Grid)]
        kind: TestPattern,

        #[arg(long, default_value_t = 400)]
        width_px: u32,

        #[arg(long, default_value_t = 400)]
        height_px: u32,

        #[command(flatten)]
        size: ImageSize,

        /// Also save the rendered pattern image
        #[arg(long)]
        save_image: Option<PathBuf>,

        /// Write to this file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run the homing cycle
    Home {
        #[command(flatten)]
        link: Link,
    },

    /// Jog relative to the current position
    Jog {
        #[command(flatten)]
        link: Link,

        /// X distance in mm
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        dx: f64,

        /// Y distance in mm
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        dy: f64,

        /// Feed rate in mm/min
        #[arg(long, default_value_t = 1000.0)]
        feed: f64,
    },

    /// Print the controller's `$$` settings
    Settings {
        #[command(flatten)]
        link: Link,
    },
}

#[derive(Args)]
struct Link {
    /// Serial port; defaults to the configured port
    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,
}

/// Single command sent outside a program stream
enum Manual {
    Home,
    Jog { dx: f64, dy: f64, feed: f64 },
    Settings,
}

impl Manual {
    fn completed_by(&self, command: &str) -> bool {
        match self {
            Manual::Home => command == HOME_COMMAND,
            Manual::Jog { .. } => command.starts_with(JOG_PREFIX),
            Manual::Settings => command == SETTINGS_COMMAND,
        }
    }
}

#[derive(Args)]
struct ImageSize {
    /// Engraved width in mm; the image is resampled to fit
    #[arg(long)]
    width_mm: Option<f64>,

    /// Engraved height in mm; keeps the aspect ratio when omitted
    #[arg(long, requires = "width_mm")]
    height_mm: Option<f64>,
}

fn program_from_shapes(path: &Path, config: &Config) -> anyhow::Result<MotionProgram> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let shapes =
        parse_shapes(&json).with_context(|| format!("Invalid shape list in {}", path.display()))?;
    tracing::info!("Loaded {} shape(s) from {}", shapes.len(), path.display());
    Ok(generate(&shapes, &generator_settings(config))?)
}

fn program_from_image(
    path: &Path,
    size: &ImageSize,
    config: &Config,
) -> anyhow::Result<MotionProgram> {
    let mut engraver = RasterEngraver::new(raster_options(config), scan_options(config));
    if let Some(width_mm) = size.width_mm {
        engraver = engraver.with_size(width_mm, size.height_mm);
    }
    let (grid, program) = engraver.engrave_file(path, &generator_settings(config))?;
    let stats = grid.stats();
    tracing::info!(
        "Raster {}x{} cells, {:.1}% burned",
        grid.cols(),
        grid.rows(),
        stats.coverage_percent
    );
    Ok(program)
}

fn emit(program: &MotionProgram, output: Option<&Path>) -> anyhow::Result<()> {
    let metadata = program.metadata();
    tracing::info!(
        "{} instructions, cut {:.1}mm, travel {:.1}mm, about {:.0}s",
        program.len(),
        metadata.cut_distance_mm,
        metadata.travel_distance_mm,
        metadata.estimated_seconds
    );
    match output {
        Some(path) => {
            program.write_to(path)?;
            tracing::info!("Wrote {}", path.display());
        }
        None => print!("{}", program.to_gcode()),
    }
    Ok(())
}

fn program_from_pattern(
    kind: TestPattern,
    (width_px, height_px): (u32, u32),
    size: &ImageSize,
    save_image: Option<&Path>,
    config: &Config,
) -> anyhow::Result<MotionProgram> {
    let pixels = kind.render(width_px, height_px)?;
    if let Some(path) = save_image {
        pixels
            .save(path)
            .with_context(|| format!("Failed to save {}", path.display()))?;
        tracing::info!("Saved {} pattern to {}", kind, path.display());
    }

    let mut engraver = RasterEngraver::new(raster_options(config), scan_options(config));
    if let Some(width_mm) = size.width_mm {
        engraver = engraver.with_size(width_mm, size.height_mm);
    }
    let (_, program) = engraver.engrave_image(
        &image::DynamicImage::ImageLuma8(pixels),
        &generator_settings(config),
    )?;
    Ok(program)
}

/// Connect, send one manual command and wait for it to finish.
async fn manual(config: &Config, link: &Link, command: Manual) -> anyhow::Result<()> {
    let params = connection_params(config, link.port.as_deref(), link.baud)?;
    let controller = GrblController::new(streaming_config(config));
    let mut events = controller.subscribe();

    tracing::info!("Connecting to {} at {} baud", params.port, params.baud_rate);
    controller.connect(params).await?;
    match command {
        Manual::Home => controller.home().await?,
        Manual::Jog { dx, dy, feed } => controller.jog(dx, dy, feed).await?,
        Manual::Settings => controller.query_settings().await?,
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // A jog is acknowledged once planned; wait for the motion to end too.
    let wait_for_idle = matches!(command, Manual::Jog { .. });
    let mut acknowledged = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                controller.emergency_stop().await?;
                controller.disconnect().await?;
                bail!("Emergency stop requested");
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::Setting { number, value }) => println!("${}={}", number, value),
                Ok(ControllerEvent::CommandCompleted { command: text }) if command.completed_by(&text) => {
                    acknowledged = true;
                }
                Ok(ControllerEvent::Fault(report)) => {
                    controller.disconnect().await?;
                    bail!("{}", report);
                }
                Ok(ControllerEvent::Message(text)) => tracing::info!("{}", text),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} controller events", skipped);
                }
                Err(RecvError::Closed) => bail!("Controller stopped unexpectedly"),
            }
        }

        if acknowledged && (!wait_for_idle || controller.current_state() == MachineState::Idle) {
            break;
        }
    }

    controller.disconnect().await?;
    Ok(())
}

async fn stream(
    config: &Config,
    port: Option<&str>,
    baud: Option<u32>,
    program: &MotionProgram,
) -> anyhow::Result<()> {
    let params = connection_params(config, port, baud)?;
    let controller = GrblController::new(streaming_config(config));
    let mut events = controller.subscribe();

    tracing::info!("Connecting to {} at {} baud", params.port, params.baud_rate);
    controller.connect(params).await?;
    let job_id = controller.start_stream(program).await?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                controller.emergency_stop().await?;
                controller.disconnect().await?;
                bail!("Emergency stop requested");
            }
            event = events.recv() => match event {
                Ok(ControllerEvent::Progress { sent, total }) => {
                    tracing::debug!("Sent {}/{}", sent, total);
                }
                Ok(ControllerEvent::StreamCompleted { job_id: id, instructions }) if id == job_id => {
                    tracing::info!("Stream complete, {} instructions acknowledged", instructions);
                    break;
                }
                Ok(ControllerEvent::StreamAborted { job_id: id }) if id == job_id => {
                    let snapshot = controller.snapshot();
                    controller.disconnect().await?;
                    match snapshot.last_fault {
                        Some(report) => bail!("Stream aborted: {}", report),
                        None => bail!("Stream aborted"),
                    }
                }
                Ok(ControllerEvent::Alarm { code, message }) => {
                    tracing::error!("Alarm {}: {}", code, message);
                }
                Ok(ControllerEvent::Message(text)) => tracing::info!("{}", text),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!("Skipped {} controller events", skipped);
                }
                Err(RecvError::Closed) => bail!("Controller stopped unexpectedly"),
            }
        }
    }

    controller.disconnect().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json)?;

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Ports => {
            for port in list_ports()? {
                match port.manufacturer {
                    Some(manufacturer) => {
                        println!("{}\t{} ({})", port.port_name, port.description, manufacturer)
                    }
                    None => println!("{}\t{}", port.port_name, port.description),
                }
            }
        }
        Command::Generate { shapes, output } => {
            let program = program_from_shapes(&shapes, &config)?;
            emit(&program, output.as_deref())?;
        }
        Command::Engrave {
            image,
            size,
            output,
        } => {
            let program = program_from_image(&image, &size, &config)?;
            emit(&program, output.as_deref())?;
        }
        Command::Pattern {
            kind,
            width_px,
            height_px,
            size,
            save_image,
            output,
        } => {
            let program = program_from_pattern(
                kind,
                (width_px, height_px),
                &size,
                save_image.as_deref(),
                &config,
            )?;
            emit(&program, output.as_deref())?;
        }
        Command::Home { link } => manual(&config, &link, Manual::Home).await?,
        Command::Jog { link, dx, dy, feed } => {
            manual(&config, &link, Manual::Jog { dx, dy, feed }).await?
        }
        Command::Settings { link } => manual(&config, &link, Manual::Settings).await?,
        Command::Stream {
            port,
            baud,
            shapes,
            image,
            size,
        } => {
            let program = match (shapes, image) {
                (Some(shapes), _) => program_from_shapes(&shapes, &config)?,
                (None, Some(image)) => program_from_image(&image, &size, &config)?,
                (None, None) => bail!("Either --shapes or --image is required"),
            };
            stream(&config, port.as_deref(), baud, &program).await?;
        }
    }

    Ok(())
}
