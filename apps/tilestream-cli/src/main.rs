use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use glam::Vec3;
use tracing_subscriber::EnvFilter;
use tilestream_common::{
    DEFAULT_MAX_GRID_DIM, GridConfig, SUPPORTED_TILE_SIZES, TileCoord, WindowSize,
};
use tilestream_kernel::{Tile, TileSource};
use tilestream_render::{DebugTextRenderer, RenderView, Renderer, TileScene};
use tilestream_source::{MapDescriptor, ProceduralSource, open_map, write_map};
use tilestream_stream::{
    ObserverError, TerrainTiler, TileObserver, TilerConfig, TrackedViewpoint, Viewpoint,
};
use tilestream_tools::TilerInspector;

#[derive(Parser)]
#[command(name = "tilestream-cli", about = "CLI tool for tiled terrain maps")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and supported map parameters
    Info,
    /// Validate a map descriptor and probe its origin tile
    Validate {
        /// Path to the `.map` (or `.yaml`) descriptor
        map: PathBuf,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Write a procedural demo map
    Generate {
        /// Output directory
        out: PathBuf,
        /// Descriptor name (written as `<name>.map`)
        #[arg(long, default_value = "terrain")]
        name: String,
        /// Tiles along each axis
        #[arg(long, default_value = "16")]
        tiles: u32,
        /// Only write the first N x N tiles (default: all)
        #[arg(long)]
        extent: Option<u32>,
        #[arg(long, default_value = "256")]
        tile_size: u32,
        #[arg(long, default_value = "1")]
        tile_scale: u32,
        /// Pack tiles into per-block tar archives
        #[arg(long)]
        archived: bool,
        #[arg(short, long, default_value = "42")]
        seed: u32,
    },
    /// Walk a viewpoint across a map and stream tiles around it
    Simulate {
        /// Map descriptor; a procedural 16x16 map is used when omitted
        #[arg(long)]
        map: Option<PathBuf>,
        /// Viewpoint moves
        #[arg(long, default_value = "24")]
        steps: u32,
        /// Window size: 3, 5, 7 or 9
        #[arg(short, long, default_value = "3")]
        window: u32,
        /// Reconciler ticks per viewpoint move
        #[arg(long, default_value = "8")]
        ticks: u32,
        /// Run the loader on its own thread instead of stepping it inline
        #[arg(long)]
        threaded: bool,
        #[arg(short, long, default_value = "42")]
        seed: u32,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("tilestream-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("tile sizes: {SUPPORTED_TILE_SIZES:?}");
            println!("window sizes: [3, 5, 7, 9]");
            println!("max grid dimension: {DEFAULT_MAX_GRID_DIM}");
            let grid = GridConfig::default();
            println!(
                "default grid: {}x{} tiles of {} (scale {})",
                grid.num_tiles_x, grid.num_tiles_z, grid.tile_size, grid.tile_scale
            );
        }
        Commands::Validate { map, json } => validate(&map, json)?,
        Commands::Generate {
            out,
            name,
            tiles,
            extent,
            tile_size,
            tile_scale,
            archived,
            seed,
        } => {
            let mut descriptor = MapDescriptor::new(tiles, tiles, tile_size, tile_scale);
            descriptor.archived = archived;
            descriptor.validate().context("refusing to write an invalid map")?;

            let extent = extent.unwrap_or(tiles).min(tiles) as i32;
            let source = ProceduralSource::new(tile_size, seed);
            let coords: Vec<TileCoord> = (0..extent)
                .flat_map(|z| (0..extent).map(move |x| TileCoord::new(x, z)))
                .collect();
            let path = write_map(
                &out,
                &name,
                &descriptor,
                coords.iter().map(|c| (*c, source.generate(*c))),
            )?;
            println!("Wrote {} tiles, descriptor {}", coords.len(), path.display());
        }
        Commands::Simulate {
            map,
            steps,
            window,
            ticks,
            threaded,
            seed,
        } => simulate(map, steps, window, ticks, threaded, seed)?,
    }

    Ok(())
}

fn validate(map: &std::path::Path, json: bool) -> anyhow::Result<()> {
    let result = open_map(map);
    if json {
        let value = match &result {
            Ok(opened) => serde_json::json!({
                "valid": true,
                "numTilesX": opened.grid.num_tiles_x,
                "numTilesZ": opened.grid.num_tiles_z,
                "tileSize": opened.grid.tile_size,
                "tileScale": opened.grid.tile_scale,
                "archived": opened.is_archived(),
            }),
            Err(err) => serde_json::json!({ "valid": false, "error": err.to_string() }),
        };
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    let opened = result.with_context(|| format!("invalid map {}", map.display()))?;
    if !json {
        println!("Map {} is valid", map.display());
        println!(
            "  {}x{} tiles, tile size {}, scale {}, layout {:?}",
            opened.grid.num_tiles_x,
            opened.grid.num_tiles_z,
            opened.grid.tile_size,
            opened.grid.tile_scale,
            opened.layout()
        );
    }
    Ok(())
}

/// Counts tile events for the end-of-run report.
#[derive(Default)]
struct EventCounter {
    attached: AtomicU64,
    detached: AtomicU64,
}

impl TileObserver for EventCounter {
    fn on_attached(&self, _center: Vec3, _tile: &Tile) -> Result<(), ObserverError> {
        self.attached.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_detached(&self, _center: Vec3, _tile: &Tile) -> Result<(), ObserverError> {
        self.detached.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn simulate(
    map: Option<PathBuf>,
    steps: u32,
    window: u32,
    ticks: u32,
    threaded: bool,
    seed: u32,
) -> anyhow::Result<()> {
    let window = WindowSize::try_from(window)?;
    let (grid, archived, source): (GridConfig, bool, Box<dyn TileSource>) = match map {
        Some(path) => {
            let opened = open_map(&path).with_context(|| format!("opening {}", path.display()))?;
            (opened.grid, opened.is_archived(), opened.source)
        }
        None => {
            let grid = GridConfig::default();
            let holes = [TileCoord::new(3, 3), TileCoord::new(9, 4)];
            let source = ProceduralSource::new(grid.tile_size, seed).with_missing(holes);
            (grid, false, Box::new(source))
        }
    };

    let config = TilerConfig {
        grid,
        window_size: window,
        archived,
        poll_interval: Duration::from_millis(5),
        ..TilerConfig::default()
    };
    let tws = grid.tile_world_size();
    let viewpoint = Arc::new(TrackedViewpoint::new(Vec3::new(tws / 2.0, 0.0, tws / 2.0)));
    let mut tiler = TerrainTiler::new(config, source, viewpoint.clone(), TileScene::new())?;
    let counter = Arc::new(EventCounter::default());
    tiler.subscribe(counter.clone());

    if threaded {
        tiler.start()?;
    }
    tracing::debug!(threaded, ticks, "simulation started");
    println!(
        "Simulating {steps} moves over a {}x{} grid, window {}",
        grid.num_tiles_x,
        grid.num_tiles_z,
        window.get()
    );

    let span = tws * (grid.num_tiles_x.min(grid.num_tiles_z) as f32 - 1.0);
    for step in 0..steps {
        let t = (step as f32 + 1.0) / steps.max(1) as f32;
        viewpoint.set_position(Vec3::new(tws / 2.0 + span * t, 0.0, tws / 2.0 + span * t * 0.5));
        if threaded {
            tiler.wake();
            std::thread::sleep(Duration::from_millis(10));
        } else {
            tiler.step_loader()?;
        }
        for _ in 0..ticks {
            tiler.reconcile_tick();
        }
        if step % 4 == 3 {
            println!("step {:>3}: {}", step + 1, TilerInspector::summary(&tiler));
        }
    }

    // Let the last window settle before drawing it.
    if !threaded {
        tiler.step_loader()?;
    }
    while tiler.reconcile_tick().is_some() {}

    let view = RenderView {
        eye: viewpoint.position(),
        tile_world_size: tws,
        radius: window.half() + 2,
    };
    print!("{}", DebugTextRenderer::new().render(tiler.renderer(), &view));
    println!("{}", TilerInspector::summary(&tiler));
    if let Some(center) = tiler.center_tile() {
        if let Some(info) = TilerInspector::inspect_tile(tiler.context(), center.coord()) {
            println!("center: {info}");
        }
    }

    let drained = tiler.shutdown()?;
    println!(
        "Shutdown: drained={drained} attached_events={} detached_events={}",
        counter.attached.load(Ordering::Relaxed),
        counter.detached.load(Ordering::Relaxed)
    );
    Ok(())
}
