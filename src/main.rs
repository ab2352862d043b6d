use clap::Parser;
use factorbench::cli::{run, Cli};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}
