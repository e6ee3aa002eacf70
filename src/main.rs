//! fschurn CLI entry point

use anyhow::Context;
use fschurn::config::cli::Cli;
use fschurn::worker::Coordinator;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("ERROR: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> fschurn::Result<()> {
    println!("fschurn v{}", env!("CARGO_PKG_VERSION"));
    println!("filesystem and block-device aging workload generator");
    println!();

    let cli = Cli::parse_args();
    let config = cli.into_config().context("configuration error")?;

    print!("{}", config);
    println!();
    println!("Starting workload...");
    println!();

    let coordinator = Coordinator::new(config)?;
    coordinator.run()
}
