use std::io::{self, BufRead, Write};

use clap::Parser;
use usagectl::migration::{Execution, Operation};
use usagectl::{Config, Mode, config::Args, telemetry};

/// Ask before writing; anything but `y` cancels.
fn confirm(mode: &Mode) -> io::Result<bool> {
    println!("LIVE MODE: {mode} will write to the store");
    print!("Are you sure you want to proceed? (y/N): ");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().lock().read_line(&mut response)?;
    Ok(response.trim().eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();
    let mode = args.mode();

    // Load configuration
    let config = Config::load(&args)?;

    // If --validate flag is set, exit successfully after config validation
    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry()?;
    tracing::debug!("{:?}", args);
    tracing::debug!("{:?}", config);

    if mode.execution == Execution::Apply && !args.yes && !confirm(&mode)? {
        println!("Operation cancelled");
        return Ok(());
    }

    let report = usagectl::run(&config, mode).await?;
    print!("{report}");

    if mode.is_preview() && report.previewed > 0 {
        let flags = match mode.operation {
            Operation::Add => "--execute",
            Operation::Remove => "--remove --execute",
            Operation::Revert => "--revert --execute",
        };
        println!("Dry run only. Re-run with {flags} to apply these changes.");
    }

    Ok(())
}
