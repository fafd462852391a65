//! Launch a command inside a memory- and CPU-limited resource group
//!
//! ```text
//! cargo run -p jobgroup --example confined_launch -- [-v] <limits.json> <program> [args...]
//! ```
//!
//! `limits.json` holds a `LimitsConfig`, for example
//! `{"memory": {"max_job_memory": 268435456}, "cpu_rate": 0.5}`.

use std::io::Write;
use std::process::ExitCode;

use env_logger::{Builder, Env};
use jobgroup::{ConfinedProcessLauncher, LimitsConfig, ResourceGroupBuilder};
use log::{error, info, Level};

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `-v`
fn init_logger(verbose: bool) {
    let env = Env::default().filter_or("RUST_LOG", if verbose { "debug" } else { "info" });

    Builder::from_env(env)
        .format(|buf, record| {
            let level = match record.level() {
                Level::Error => "ERROR",
                Level::Warn => "WARN ",
                Level::Info => "INFO ",
                Level::Debug => "DEBUG",
                Level::Trace => "TRACE",
            };
            writeln!(buf, "{} {}", level, record.args())
        })
        .init();
}

fn run(config_path: &str, program: &str, args: &[String]) -> jobgroup::Result<u32> {
    let limits = LimitsConfig::from_json_file(config_path)?;
    info!("Limits: {:?}", limits);

    let group = ResourceGroupBuilder::new().limits(limits).build()?;
    let launcher = ConfinedProcessLauncher::new();
    let child = launcher.launch(program, args, None, Some(&group))?;
    info!("Started pid {} inside the group", child.id());

    let code = child.wait()?;
    info!("pid {} exited with {:#x}", child.id(), code);
    Ok(code)
}

fn main() -> ExitCode {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = args.first().is_some_and(|a| a == "-v");
    if verbose {
        args.remove(0);
    }
    init_logger(verbose);

    if args.len() < 2 {
        eprintln!("usage: confined_launch [-v] <limits.json> <program> [args...]");
        return ExitCode::from(2);
    }

    match run(&args[0], &args[1], &args[2..]) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
