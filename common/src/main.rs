use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use guessless::{
    BoardRequest, CellState, Coord, Coordinator, DeducedState, Difficulty, EngineConfig,
    RevealOutcome, Solver, Tier, Topology, analyze, generate,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "guessless", about = "Minefields that never need a guess")]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize one field and print it with its difficulty
    Generate {
        #[command(flatten)]
        board: BoardArgs,
        /// Worker threads (GUESSLESS_PROCS otherwise)
        #[arg(long)]
        procs: Option<usize>,
    },
    /// Solve random placements and report how many need no guess
    Measure {
        #[command(flatten)]
        board: BoardArgs,
        #[arg(long, default_value_t = 200)]
        samples: usize,
        /// Also ask the SAT oracle what the solver missed
        #[arg(long)]
        exact: bool,
    },
    /// Watch a bot clear a fresh field using deductions only
    Play {
        #[command(flatten)]
        board: BoardArgs,
        #[arg(long, default_value_t = 300)]
        delay_ms: u64,
    },
}

#[derive(Args)]
struct BoardArgs {
    #[arg(long, default_value_t = 16)]
    width: usize,
    #[arg(long, default_value_t = 16)]
    height: usize,
    #[arg(long, default_value_t = 40)]
    mines: usize,
    /// neumann, hex or moore
    #[arg(long, default_value = "moore")]
    topology: Topology,
    /// First click as ROW,COL; the centre by default
    #[arg(long, value_parser = parse_coord)]
    start: Option<Coord>,
    #[arg(long)]
    seed: Option<u64>,
    /// Skip the solvability check
    #[arg(long)]
    unchecked: bool,
    /// Keep the solver from using the number of mines left
    #[arg(long)]
    no_flagcount: bool,
}

impl BoardArgs {
    fn request(&self) -> anyhow::Result<BoardRequest> {
        let start = self
            .start
            .unwrap_or(Coord::new(self.height / 2, self.width / 2));
        let request = BoardRequest::new(self.width, self.height, self.mines, self.topology, start)
            .context("invalid board")?;
        Ok(request
            .guessless(!self.unchecked)
            .flagcount(!self.no_flagcount))
    }

    fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::from_env();
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        config.solver.use_mine_count = !self.no_flagcount;
        config
    }
}

fn parse_coord(value: &str) -> Result<Coord, String> {
    let (row, col) = value
        .split_once(',')
        .ok_or_else(|| format!("expected ROW,COL, got {value:?}"))?;
    let parse = |part: &str| {
        part.trim()
            .parse::<usize>()
            .map_err(|err| format!("{part:?}: {err}"))
    };
    Ok(Coord::new(parse(row)?, parse(col)?))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Generate { board, procs } => generate_field(&board, procs),
        Command::Measure {
            board,
            samples,
            exact,
        } => measure(&board, samples, exact),
        Command::Play { board, delay_ms } => play(&board, Duration::from_millis(delay_ms)),
    }
}

fn generate_field(board: &BoardArgs, procs: Option<usize>) -> anyhow::Result<()> {
    let mut config = board.config();
    if let Some(procs) = procs {
        config.procs = procs;
    }
    let coordinator = Coordinator::new(config)?;
    let initialized = coordinator.initialize_detailed(&board.request()?)?;

    println!("{}", initialized.field);
    match initialized.verdict {
        Some(verdict) => print_difficulty(&verdict.difficulty),
        None => println!("unchecked: may need a guess"),
    }
    let report = initialized.report;
    println!(
        "{} trials in {:.2?} of {:.2?} ({:?})",
        report.trials, report.elapsed, report.budget, report.mode
    );
    Ok(())
}

fn print_difficulty(difficulty: &Difficulty) {
    println!(
        "score {}: {} single, {} subset, {} enumerated, {} mine count",
        difficulty.score,
        difficulty.single,
        difficulty.subset,
        difficulty.enumerated,
        difficulty.mine_count
    );
    println!(
        "largest component {}, {} sweeps",
        difficulty.largest_component, difficulty.sweeps
    );
}

fn tier_name(tier: Option<Tier>) -> &'static str {
    match tier {
        None => "cascade only",
        Some(Tier::Single) => "single",
        Some(Tier::Subset) => "subset",
        Some(Tier::Enumerated { .. }) => "enumerated",
        Some(Tier::MineCount) => "mine count",
    }
}

fn measure(board: &BoardArgs, samples: usize, exact: bool) -> anyhow::Result<()> {
    let request = board.request()?;
    let params = *request.params();
    let config = board.config();
    let solver = Solver::new(config.solver);
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let mut scores = Vec::new();
    let mut hardest: BTreeMap<&str, usize> = BTreeMap::new();
    let mut stalled_with_forced = 0;
    let mut missed_cells = 0;

    for _ in 0..samples {
        let field = generate(&params, &mut rng);
        let verdict = solver.solve(&field)?;
        if verdict.is_guessless() {
            scores.push(verdict.difficulty.score);
            *hardest.entry(tier_name(verdict.difficulty.hardest())).or_default() += 1;
            continue;
        }
        if exact {
            // Replay to where the solver stalled and ask what was still forced.
            let mut stalled = field.clone();
            solver.solve_in_place(&mut stalled)?;
            let analysis = analyze(&stalled, solver.config().use_mine_count)?;
            let forced = analysis.cells(DeducedState::ForcedMine).len()
                + analysis.cells(DeducedState::ForcedSafe).len();
            if forced > 0 {
                stalled_with_forced += 1;
                missed_cells += forced;
            }
        }
    }

    let guessless = scores.len();
    println!(
        "{guessless}/{samples} guessless ({:.1}%) on {}x{} {} with {} mines",
        100.0 * guessless as f64 / samples.max(1) as f64,
        params.width(),
        params.height(),
        params.topology(),
        params.mine_count()
    );
    if !scores.is_empty() {
        scores.sort_unstable();
        let at = |quantile: f64| scores[((scores.len() - 1) as f64 * quantile) as usize];
        println!(
            "score min {} / median {} / p90 {} / max {}",
            at(0.0),
            at(0.5),
            at(0.9),
            at(1.0)
        );
        for (tier, count) in &hardest {
            println!("  hardest step {tier}: {count}");
        }
    }
    if exact {
        println!(
            "{stalled_with_forced} stalled fields still had {missed_cells} forced cells"
        );
    }
    Ok(())
}

fn play(board: &BoardArgs, delay: Duration) -> anyhow::Result<()> {
    let config = board.config();
    let solver = Solver::new(config.solver);
    let coordinator = Coordinator::new(config)?;
    let mut field = coordinator.initialize(&board.request()?)?;

    println!("--- Guessless Minesweeper Bot ---");
    println!("Strategy: reveal cells the solver proves safe, flag proven mines.");
    println!("Initial Board:");
    println!("{field}");
    thread::sleep(delay);

    let mut move_count = 0;
    while !field.is_solved() && !field.is_exploded() {
        let deductions = solver.deductions(&field)?;
        for &mine in &deductions.mines {
            if field.state(mine) == Some(CellState::Hidden) {
                field.flag(mine)?;
            }
        }
        let Some(&coord) = deductions.safe.iter().next() else {
            println!("No cell can be proven safe; stopping instead of guessing.");
            break;
        };

        move_count += 1;
        println!("\n--- Move #{move_count} ---");
        println!("Bot reveals {coord}...");
        if let RevealOutcome::Mine = field.reveal(coord)? {
            println!("That was a mine.");
        }
        println!("{field}");
        thread::sleep(delay);
    }

    println!("\n--- Game Over ---");
    if field.is_solved() {
        println!("Result: cleared in {move_count} moves without a guess.");
    } else if field.is_exploded() {
        println!("Result: the bot hit a mine.");
    } else {
        println!(
            "Result: stuck with {} hidden cells and {} flags left.",
            field.hidden_count(),
            field.flags_left()
        );
    }
    Ok(())
}
