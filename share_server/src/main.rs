//! `share`: serve one file to any number of clients.

use clap::Parser;
use share_core::config::ServeConfig;
use share_core::{logger, signals};
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cfg = ServeConfig::parse();
    logger::init(cfg.verbosity());

    if let Err(e) = cfg.validate() {
        tracing::error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    signals::init_term_signals();
    match share_http::run_server(&cfg, signals::stop_flag()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", error_chain(&e));
            ExitCode::FAILURE
        }
    }
}

/// "outer: cause: root cause" on one line.
fn error_chain(err: &dyn Error) -> String {
    let mut line = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}
