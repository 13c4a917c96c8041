use std::io::Write;
use std::time::Instant;

use clap::Parser;
use rayon::ThreadPoolBuilder;
use tracing::info;
use tracing_subscriber::FmtSubscriber;

use talon::cli_main::Cli;
use talon::constants;
use talon::error::Result;
use talon::io::gfa::write_gfa;
use talon::io::loader;
use talon::io::sequence::{normalize_ids, Sequence};
use talon::pipeline::assemble::Assembler;
use talon::pipeline::greedy::GreedyAssembler;

fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Setting tracing default failed");

    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        eprintln!("[talon] error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .expect("Building thread pool failed");

    let start = Instant::now();
    let mut assembler = Assembler::new(cli.weaken);

    if cli.resume {
        assembler.load()?;
        info!(
            "loaded previous run at stage {} {:.2}s",
            assembler.stage(),
            start.elapsed().as_secs_f32()
        );
    }

    if cli.second_run {
        // start the filler set fresh for this run
        std::fs::File::create(constants::FILLER_SEQS_PATH)?;
    }

    let mut sequences: Vec<Sequence> = Vec::new();
    if assembler.stage() < -3 || cli.polishing_rounds > assembler.stage().max(0) {
        sequences = loader::load_sequences(&cli.sequences)?;
    }

    assembler.construct(&mut sequences, cli.second_run)?;
    assembler.assemble()?;
    assembler.polish(
        &sequences,
        cli.match_score,
        cli.mismatch,
        cli.gap,
        cli.polishing_rounds,
    )?;

    if !cli.second_run {
        print_results(&mut assembler, cli, cli.polishing_rounds > 0, start)?;
        return Ok(());
    }

    info!("finished first run in {:.2}s", start.elapsed().as_secs_f32());

    let mut unitigs = assembler.graph.get_unitigs(cli.polishing_rounds > 0);
    normalize_ids(&mut unitigs);
    assembler.clear();

    let greedy = GreedyAssembler::new(if cli.weaken { 29 } else { 15 }, if cli.weaken { 9 } else { 5 });
    let expected = greedy.construct(&mut assembler.graph, unitigs)?;
    greedy.assemble(&mut assembler.graph, expected);

    // the reassembled graph is never polished, print it whole
    print_results(&mut assembler, cli, false, start)
}

fn print_results(
    assembler: &mut Assembler,
    cli: &Cli,
    drop_unpolished: bool,
    start: Instant,
) -> Result<()> {
    if let Some(path) = &cli.gfa_path {
        write_gfa(&assembler.graph, path)?;
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for it in assembler.graph.get_unitigs(drop_unpolished) {
        writeln!(out, ">{}", it.name)?;
        writeln!(out, "{}", it.data)?;
    }

    info!("{:.2}s", start.elapsed().as_secs_f32());
    Ok(())
}
