//! hcv: the command-line entry point for the host convergence engine.
//!
//! # Usage
//!
//! ```text
//! hcv plan host.yaml
//! hcv validate host.yaml --json
//! hcv apply host.yaml --settings /etc/hcv/settings.yaml
//! hcv help manifest
//! ```

mod run;

use std::process;
use std::rc::Rc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostconv_core::cli::parse_args;
use hostconv_core::infrastructure::runner::ShellRunner;
use hostconv_core::infrastructure::ProviderSet;

const DEFAULT_LOG_FILTER: &str = "hcv=info,hostconv_core=info";


fn main() {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let arg_refs: Vec<&str> = args.iter().skip(1).map(|s| s.as_str()).collect();

    let cmd = match parse_args(&arg_refs) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("hcv: {}", e);
            process::exit(run::EXIT_REJECTED);
        }
    };

    let mut providers = ProviderSet::host(Rc::new(ShellRunner));
    let outcome = run::execute(&cmd, &mut providers);

    if !outcome.stdout.is_empty() {
        println!("{}", outcome.stdout);
    }
    if !outcome.stderr.is_empty() {
        eprintln!("{}", outcome.stderr);
    }
    process::exit(outcome.code);
}


/// Logs go to stderr so `--json` output on stdout stays parseable.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(log_filter())
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}


/// `HCV_LOG`, then `RUST_LOG`, then the built-in default.
fn log_filter() -> EnvFilter {
    EnvFilter::try_from_env("HCV_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(DEFAULT_LOG_FILTER.parse::<EnvFilter>().is_ok());
    }
}
