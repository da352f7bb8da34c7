//! Scene Pilot CLI - script development entry point
//!
//! Checks scripts and perception against screenshots on desktop, without
//! an Android device.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect as DrawRect;

use scene_pilot::action::{GestureDispatcher, Stroke};
use scene_pilot::config::EngineSettings;
use scene_pilot::engine::{FsmRunner, Tick};
use scene_pilot::graph::{Projection, ScriptGraph, Variables};
use scene_pilot::host::{Collaborators, HostError};
use scene_pilot::stealth::ManualClock;
use scene_pilot::vision::{CaptureSurface, Frame, PerceptionSystem};

const MATCHED: Rgba<u8> = Rgba([0, 230, 118, 255]);
const MISSED: Rgba<u8> = Rgba([255, 61, 0, 255]);

#[derive(Parser)]
#[command(name = "pilot")]
#[command(about = "Scene Pilot script tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Engine settings (JSON); defaults when omitted
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a script and print its structure
    Validate {
        /// Script JSON
        script: PathBuf,
    },

    /// Check which scenes a screenshot matches
    Identify {
        /// Script JSON
        script: PathBuf,

        /// Screenshot (PNG/JPEG)
        screenshot: PathBuf,

        /// Only check this scene
        #[arg(long)]
        scene: Option<String>,

        /// Write a copy of the screenshot with anchor boxes drawn
        #[arg(long)]
        annotate: Option<PathBuf>,
    },

    /// Print engine settings as JSON
    Settings {
        #[arg(long, value_enum, default_value = "default")]
        preset: Preset,
    },

    /// Run the FSM against a still screenshot with a simulated clock
    Simulate {
        /// Script JSON
        script: PathBuf,

        /// Screenshot (PNG/JPEG)
        screenshot: PathBuf,

        /// Iterations to run
        #[arg(long, default_value = "10")]
        steps: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Preset {
    Default,
    Fast,
    Cautious,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Validate { script } => validate(&script),
        Commands::Identify {
            script,
            screenshot,
            scene,
            annotate,
        } => identify(&script, &screenshot, scene.as_deref(), annotate.as_deref(), settings),
        Commands::Settings { preset } => {
            let settings = match preset {
                Preset::Default => settings,
                Preset::Fast => EngineSettings::fast_preset(),
                Preset::Cautious => EngineSettings::cautious_preset(),
            };
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Simulate {
            script,
            screenshot,
            steps,
        } => simulate(&script, &screenshot, steps, settings),
    }
}

fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let Some(path) = path else {
        return Ok(EngineSettings::default());
    };
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    EngineSettings::from_json(&json).with_context(|| format!("parsing {}", path.display()))
}

fn load_script(path: &Path) -> Result<ScriptGraph> {
    let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    ScriptGraph::from_json(&json).with_context(|| format!("loading {}", path.display()))
}

fn load_screenshot(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .into_rgba8())
}

fn validate(path: &Path) -> Result<()> {
    let graph = load_script(path)?;

    println!("Script: {}", graph.metadata().name.as_deref().unwrap_or("(unnamed)"));
    if let Some(package) = &graph.metadata().package_name {
        println!("Package: {}", package);
    }
    println!("Root: {}", graph.root().id);
    println!("Scenes: {}", graph.nodes().len());
    println!();

    for node in graph.nodes() {
        let mut flags = Vec::new();
        if node.is_global {
            flags.push("global");
        }
        if node.is_blind() {
            flags.push("blind");
        }
        println!(
            "  {} ({} anchors, need {}, {} regions){}",
            node.name(),
            node.anchors.len(),
            node.min_matches(),
            node.regions.len(),
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            }
        );
        for region in &node.regions {
            println!(
                "    - {} {:?} p{}{}",
                region.id,
                region.action.kind,
                region.schedule.priority,
                region
                    .target
                    .as_deref()
                    .map(|t| format!(" -> {}", t))
                    .unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn identify(
    script: &Path,
    screenshot: &Path,
    only: Option<&str>,
    annotate: Option<&Path>,
    settings: EngineSettings,
) -> Result<()> {
    let graph = load_script(script)?;
    let screen = Frame::new(load_screenshot(screenshot)?);
    let mut perception = PerceptionSystem::new(settings.vision);
    let mut variables: Variables = graph.variables().clone();
    let mut canvas = annotate.map(|_| screen.image().clone());

    let nodes: Vec<_> = match only {
        Some(id) => match graph.node(id) {
            Some(node) => vec![node],
            None => bail!("unknown scene '{}'", id),
        },
        None => graph.nodes().iter().collect(),
    };

    println!("Screen: {}x{}", screen.width(), screen.height());
    for node in nodes {
        if node.is_blind() {
            println!("  {:<24} blind", node.name());
            continue;
        }
        let active = perception.is_state_active(&screen, node, &mut variables, node.name());
        println!("  {:<24} {}", node.name(), if active { "MATCH" } else { "-" });

        let projection = Projection::new(screen.width(), screen.height(), node.resolution);
        for anchor in &node.anchors {
            let matched = perception.check_anchor(&screen, anchor, node.resolution, &mut variables);
            println!("      {:<20} {:?} {}", anchor.id, anchor.match_type, matched);
            if let Some(canvas) = canvas.as_mut() {
                let area = projection.rect(&anchor.rect);
                let rect = DrawRect::at(area.x.round() as i32, area.y.round() as i32)
                    .of_size(area.width.round().max(1.0) as u32, area.height.round().max(1.0) as u32);
                draw_hollow_rect_mut(canvas, rect, if matched { MATCHED } else { MISSED });
            }
        }
    }

    if !variables.is_empty() {
        println!();
        println!("Variables: {}", serde_json::to_string(&variables)?);
    }

    if let (Some(path), Some(canvas)) = (annotate, canvas) {
        canvas
            .save(path)
            .with_context(|| format!("writing {}", path.display()))?;
        println!("Annotated screenshot written to {}", path.display());
    }
    Ok(())
}

/// Replays one screenshot forever
struct StillFrame(RgbaImage);

impl CaptureSurface for StillFrame {
    fn capture_screen(&self) -> Option<RgbaImage> {
        Some(self.0.clone())
    }
}

/// Prints gestures instead of performing them
struct PrintGestures;

impl GestureDispatcher for PrintGestures {
    fn dispatch(&self, strokes: &[Stroke]) -> Result<(), HostError> {
        for stroke in strokes {
            let path: Vec<String> = stroke
                .path
                .iter()
                .map(|p| format!("({:.0},{:.0})", p.x, p.y))
                .collect();
            println!(
                "      stroke +{}ms {}ms {}",
                stroke.start_delay_ms,
                stroke.duration_ms,
                path.join(" ")
            );
        }
        Ok(())
    }

    fn press_back(&self) -> Result<(), HostError> {
        println!("      back");
        Ok(())
    }
}

fn simulate(script: &Path, screenshot: &Path, steps: u32, settings: EngineSettings) -> Result<()> {
    let graph = Arc::new(load_script(script)?);
    let screen = load_screenshot(screenshot)?;
    let clock = Arc::new(ManualClock::new());
    let collaborators =
        Collaborators::new(Arc::new(StillFrame(screen)), Arc::new(PrintGestures)).with_clock(clock.clone());
    let interval = settings.timings.loop_interval_ms;
    let mut runner = FsmRunner::new(graph, settings, collaborators, Arc::new(AtomicBool::new(false)));

    for i in 1..=steps {
        let tick = runner.step()?;
        println!("[{:>6}ms] #{:<3} {}", clock_ms(&clock), i, describe(&tick));
        clock.advance(interval);
    }

    println!();
    println!("{}", serde_json::to_string_pretty(&runner.snapshot())?);
    Ok(())
}

fn clock_ms(clock: &ManualClock) -> u64 {
    use scene_pilot::stealth::Clock;
    clock.now_ms()
}

fn describe(tick: &Tick) -> String {
    match tick {
        Tick::Acted { scene, region } => format!("{}: performed {}", scene, region),
        Tick::NoEligible { scene } => format!("{}: nothing to do", scene),
        Tick::TransitionWait { checks } => format!("waiting for transition ({})", checks),
        Tick::TransitionRetry { checks } => format!("retrying transition ({})", checks),
        Tick::Lost { frames } => format!("lost ({})", frames),
        Tick::Recovered(recovery) => format!("recovered: {:?}", recovery),
        Tick::Relaunched => "relaunched app".to_string(),
        Tick::CaptureFailed => "capture failed".to_string(),
    }
}
