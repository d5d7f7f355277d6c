mod cli;

use clap::Parser;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let config = cli::Cli::parse().into_config()?;
    vision_guide::guide::run(config)
}
