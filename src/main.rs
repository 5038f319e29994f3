use clap::Parser;
use trestle_bot::cli::{run, Cli};
use trestle_bot::error::exit_code;
use trestle_bot::log::init_logging;

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!("CLI arguments parsed, invoking run");

    if let Err(e) = run(cli) {
        let code = exit_code(&e);
        tracing::error!(error = %format!("{e:#}"), exit_code = code, "trestle-bot exited with error");
        std::process::exit(code);
    }
}
