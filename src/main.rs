use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use commands::GlobalArgs;

mod commands;
mod interrupt;
mod output;
mod tty;

use commands::{check, config, run};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "tfgate")]
#[command(version = VERSION)]
#[command(about = "Run gated terraform plan/apply workflows for pull requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command's steps for one or more projects
    Run(run::RunArgs),
    /// Evaluate apply requirements without running anything
    Check(check::CheckArgs),
    /// Manage global tfgate configuration
    Config(config::ConfigArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("TFGATE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let global = GlobalArgs {};
    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    let _ = output::print_json_result(json_result);

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
