use std::path::PathBuf;

use crate::command::{Command, RunOptions};


/// Parse CLI arguments into a typed Command enum.
///
/// Arguments are expected WITHOUT the program name (i.e., `args` should
/// be `["plan", "host.yaml"]`, not `["hcv", "plan", "host.yaml"]`).
pub fn parse_args(args: &[&str]) -> Result<Command, String> {
    if args.is_empty() {
        return Err("No command specified. Run 'hcv help' for usage.".into());
    }

    match args[0] {
        "plan" => {
            let (manifest, options) = parse_run(args)?;
            Ok(Command::Plan { manifest, options })
        }
        "validate" => {
            let (manifest, options) = parse_run(args)?;
            Ok(Command::Validate { manifest, options })
        }
        "apply" => {
            let (manifest, options) = parse_run(args)?;
            Ok(Command::Apply { manifest, options })
        }
        "help" | "--help" | "-h" => parse_help(args),
        _ => Err(format!("Unknown command: '{}'", args[0])),
    }
}


// ---------------------------------------------------------------------------
// Sub-parsers
// ---------------------------------------------------------------------------

/// `hcv <plan|validate|apply> <manifest> [--json] [--settings <path>]`
fn parse_run(args: &[&str]) -> Result<(PathBuf, RunOptions), String> {
    let usage = || format!("Usage: hcv {} <manifest> [--json] [--settings <path>]", args[0]);
    let mut manifest = None;
    let mut options = RunOptions::default();

    let rest = &args[1..];
    let mut i = 0;
    while i < rest.len() {
        match rest[i] {
            "--json" => options.json = true,
            "--settings" => {
                i += 1;
                options.settings = Some(PathBuf::from(take_arg(rest, i, "--settings")?));
            }
            flag if flag.starts_with("--") => {
                return Err(format!("Unknown flag for {}: '{}'", args[0], flag));
            }
            path if manifest.is_none() => manifest = Some(PathBuf::from(path)),
            extra => return Err(format!("Unexpected argument: '{}'. {}", extra, usage())),
        }
        i += 1;
    }

    let manifest = manifest.ok_or_else(usage)?;
    Ok((manifest, options))
}

/// `hcv help [topic]`
fn parse_help(args: &[&str]) -> Result<Command, String> {
    let topic = if args.len() > 1 {
        Some(args[1..].join(" "))
    } else {
        None
    };
    Ok(Command::Help { topic })
}


// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn take_arg(args: &[&str], index: usize, flag: &str) -> Result<String, String> {
    if index >= args.len() {
        return Err(format!("{} requires a value", flag));
    }
    Ok(args[index].into())
}


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
