mod demo;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tickwork_common::{StatNum, WorldId};
use tickwork_kernel::{Heap, SchedulerConfig, TypedIterator, World};
use tickwork_persist::SaveStore;
use tickwork_tools::WorldInspector;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tickwork-cli", about = "Drive the tickwork thinker scheduler")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version, status classes and demo kinds
    Info,
    /// Step a demo world and report what ran
    Run {
        /// Number of steps
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        /// RNG seed
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Number of spawner thinkers
        #[arg(long, default_value = "3")]
        spawners: usize,
        /// Collect per-class timings
        #[arg(long)]
        profile: bool,
        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a demo world, then write it to a save store
    Save {
        /// Store directory
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long, default_value = "10")]
        ticks: u64,
        #[arg(short, long, default_value = "42")]
        seed: u64,
        /// Leave player-controlled thinkers out of the save
        #[arg(long)]
        no_players: bool,
    },
    /// Load a save and keep stepping it
    Load {
        #[arg(short, long)]
        dir: PathBuf,
        /// Save number; the newest when omitted
        #[arg(short, long)]
        index: Option<u32>,
        #[arg(short, long, default_value = "5")]
        ticks: u64,
    },
    /// Check the store's integrity chain
    Verify {
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Move the player between two worlds
    Travel {
        #[arg(short, long, default_value = "42")]
        seed: u64,
        #[arg(short, long, default_value = "3")]
        ticks: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => info(),
        Commands::Run {
            ticks,
            seed,
            spawners,
            profile,
            json,
        } => run(ticks, seed, spawners, profile, json)?,
        Commands::Save {
            dir,
            ticks,
            seed,
            no_players,
        } => save(dir, ticks, seed, !no_players)?,
        Commands::Load { dir, index, ticks } => load(dir, index, ticks)?,
        Commands::Verify { dir } => verify(dir)?,
        Commands::Travel { seed, ticks } => travel(seed, ticks)?,
    }

    Ok(())
}

fn info() {
    println!("tickwork-cli v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "classes: info={} first_thinking={} scroller={} player={} default={} passive={}",
        StatNum::INFO.get(),
        StatNum::FIRST_THINKING.get(),
        StatNum::SCROLLER.get(),
        StatNum::PLAYER.get(),
        StatNum::DEFAULT.get(),
        StatNum::PASSIVE.get()
    );
    let kinds = demo::registry();
    for name in kinds.names() {
        match kinds.parent_of(name) {
            Some(parent) => println!("kind {name} : {parent}"),
            None => println!("kind {name}"),
        }
    }
}

fn demo_world(seed: u64, spawners: usize, config: SchedulerConfig) -> (Heap, World) {
    let mut heap = Heap::new(demo::registry());
    let mut world = World::with_config(WorldId(1), seed, config);
    demo::populate(&mut world, &mut heap, spawners);
    (heap, world)
}

/// Step `world`, collecting garbage after every step. `others` are the
/// remaining worlds sharing the heap; their thinkers are roots too.
fn step(world: &mut World, heap: &mut Heap, ticks: u64, others: &[&World]) -> anyhow::Result<()> {
    for _ in 0..ticks {
        let stats = world.run_step(heap)?;
        tracing::debug!(%stats, "stepped");
        if world.config().profile {
            println!("{stats}");
        }
        let mut roots = world.report_roots(heap);
        for other in others {
            roots.extend(other.report_roots(heap));
        }
        let gc = heap.collect(roots);
        tracing::trace!(swept = gc.swept, live = gc.live, "collected");
    }
    Ok(())
}

fn report(world: &World, heap: &Heap) {
    println!("{}", WorldInspector::summary(world, heap));
    for bucket in WorldInspector::buckets(world) {
        println!("  {bucket}");
    }
    for (kind, count) in WorldInspector::census(world, heap) {
        println!("  {kind:<12} {count:>6}");
    }
}

fn run(ticks: u64, seed: u64, spawners: usize, profile: bool, json: bool) -> anyhow::Result<()> {
    let config = SchedulerConfig {
        profile,
        ..SchedulerConfig::default()
    };
    let (mut heap, mut world) = demo_world(seed, spawners, config);
    step(&mut world, &mut heap, ticks, &[])?;

    if json {
        let summary = WorldInspector::summary(&world, &heap);
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    report(&world, &heap);

    let mut puffs = TypedIterator::<demo::Puff>::new(&world, None);
    let mut oldest: Option<(u32, glam::Vec3)> = None;
    while let Some((_, puff)) = puffs.next_thinker(&heap, &world) {
        if oldest.is_none_or(|(life, _)| puff.life < life) {
            oldest = Some((puff.life, puff.pos));
        }
    }
    if let Some((life, pos)) = oldest {
        println!("closest to expiry: life={life} pos={pos}");
    }
    println!("topology hash: {:#018x}", world.topology_hash(&heap));
    Ok(())
}

fn save(dir: PathBuf, ticks: u64, seed: u64, keep_players: bool) -> anyhow::Result<()> {
    let (mut heap, mut world) = demo_world(seed, 3, SchedulerConfig::default());
    step(&mut world, &mut heap, ticks, &[])?;

    let mut store = SaveStore::open(&dir)
        .with_context(|| format!("opening save store at {}", dir.display()))?;
    store.append_events(&world.drain_events())?;
    let index = store.save(&world, &heap, keep_players)?;
    let snapshot = store.load_snapshot(index)?;
    println!(
        "save {index}: tick={} thinkers={} players={} hash={}",
        snapshot.tick,
        snapshot.thinkers.len(),
        snapshot.keep_players,
        snapshot.hash
    );
    println!("topology hash: {:#018x}", world.topology_hash(&heap));
    Ok(())
}

fn load(dir: PathBuf, index: Option<u32>, ticks: u64) -> anyhow::Result<()> {
    let store = SaveStore::open(&dir)
        .with_context(|| format!("opening save store at {}", dir.display()))?;
    let mut heap = Heap::new(demo::registry());
    let mut world = match index {
        Some(index) => store.load(index, &mut heap)?,
        None => store.load_latest(&mut heap)?,
    };
    println!("loaded topology hash: {:#018x}", world.topology_hash(&heap));
    step(&mut world, &mut heap, ticks, &[])?;
    report(&world, &heap);
    Ok(())
}

fn verify(dir: PathBuf) -> anyhow::Result<()> {
    let store = SaveStore::open(&dir)
        .with_context(|| format!("opening save store at {}", dir.display()))?;
    store.verify_integrity()?;
    for entry in &store.manifest().entries {
        println!("{} {}", &entry.sha256[..16], entry.filename);
    }
    println!(
        "OK: {} saves, {} journal segments, {} journaled events",
        store.meta().save_count,
        store.meta().event_segment_count,
        store.load_events()?.len()
    );
    Ok(())
}

fn travel(seed: u64, ticks: u64) -> anyhow::Result<()> {
    let mut heap = Heap::new(demo::registry());
    let mut from = World::with_seed(WorldId(1), seed);
    let mut to = World::with_seed(WorldId(2), seed ^ 0xff);
    demo::populate(&mut from, &mut heap, 1);
    demo::populate(&mut to, &mut heap, 1);
    step(&mut from, &mut heap, ticks, &[&to])?;

    let player = TypedIterator::<demo::PlayerPawn>::new(&from, Some(StatNum::PLAYER))
        .next(&heap, &from, true)
        .context("demo world has no player")?;
    from.begin_travel(&mut heap, player)?;

    // Nothing links the traveler now; the transit area keeps it alive.
    let mut roots = from.report_roots(&heap);
    roots.extend(to.report_roots(&heap));
    let gc = heap.collect(roots);
    println!("gc while traveling: marked={} swept={} live={}", gc.marked, gc.swept, gc.live);

    to.end_travel(&mut heap, player, StatNum::PLAYER)?;
    step(&mut to, &mut heap, ticks, &[&from])?;
    report(&from, &heap);
    report(&to, &heap);
    if let Some(pawn) = heap.thinker::<demo::PlayerPawn>(player) {
        println!("player arrived in {} at {}", to.id(), pawn.pos);
    }
    Ok(())
}
