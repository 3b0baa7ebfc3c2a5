use std::io;

use colored::Colorize;
use hammurabi_core::lang::LanguageRegistry;

use super::{GlobalArgs, SubcmdResult};

#[derive(Debug, clap::Args)]
pub struct Args {
    #[arg(short, long)]
    pub json: bool,
}

pub async fn exec(args: &Args, _global_args: &GlobalArgs) -> SubcmdResult {
    let registry = LanguageRegistry::builtin();
    let probes = registry.available().await;

    if args.json {
        serde_json::to_writer_pretty(io::stdout(), &probes)?;
        println!();
        return Ok(());
    }

    for probe in probes {
        let state = if probe.ok {
            probe
                .version
                .as_deref()
                .unwrap_or("available")
                .green()
                .to_string()
        } else {
            "not available".red().to_string()
        };
        println!("{:<12} {}  ({})", probe.language.bold(), state, probe.command);
    }
    Ok(())
}
