use std::process::exit;

use clap::{CommandFactory, Parser};
use log::error;

use dh_server::cli::CliArgs;
use dh_server::handshake::Abort;

/// Catches errors, prints them through the logger, then exits with a code
/// identifying what failed
pub fn main() {
    let args = CliArgs::parse();

    if let Some(shell) = args.print_completions {
        let mut cmd = CliArgs::command();
        clap_complete::generate(shell, &mut cmd, "dh-server", &mut std::io::stdout());
        return;
    }

    let mut log_builder = env_logger::Builder::from_default_env();
    if let Some(level) = args.get_log_level() {
        log_builder.filter_level(level);
    }
    log_builder.init();

    if let Err(e) = args.run() {
        match e.downcast_ref::<Abort>() {
            Some(abort) => {
                error!("{abort}");
                exit(abort.exit_code());
            }
            None => {
                error!("{e:#}");
                exit(1);
            }
        }
    }
}
