// LN Integration Test Runner
//
// Builds the harness once and runs the registered scenarios in order.
//
// Usage:
//   ln-itest                                  run the whole suite
//   ln-itest --scenario 'single hop invoice'  run one scenario (repeatable)
//   ln-itest --list                           print scenario names
//   LN_ITEST_SEED=0xa3f5c8e1b2d94706 ln-itest replay a failed run
//
// Exit code: 0 all passed, 1 a scenario failed, 2 setup or usage error.

use clap::Parser;
use ln_itest_framework::orchestrator::rng::{parse_seed, TestRng};
use ln_itest_framework::scenarios::report::EXIT_SETUP;
use ln_itest_framework::{HarnessConfig, RunEnv, ScenarioRegistry, ScenarioRunner};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ln-itest")]
#[command(about = "Run lightning network integration scenarios on a regtest chain", long_about = None)]
struct Args {
    /// Run only this scenario, may be given several times
    #[arg(short, long = "scenario")]
    scenarios: Vec<String>,

    /// Print the registered scenarios and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RNG seed in hex, overrides LN_ITEST_SEED and the config file
    #[arg(long, value_parser = seed_arg)]
    seed: Option<u64>,

    /// Directory for failure artifacts
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Print the report as JSON instead of the summary
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn seed_arg(s: &str) -> Result<u64, String> {
    parse_seed(s).ok_or_else(|| format!("invalid hex seed '{}'", s))
}

fn main() {
    let args = Args::parse();

    let log_level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp_millis()
        .init();

    let registry = ScenarioRegistry::with_defaults();
    if args.list {
        for name in registry.names() {
            println!("{}", name);
        }
        return;
    }

    std::process::exit(run(args, registry));
}

fn run(args: Args, registry: ScenarioRegistry) -> i32 {
    let config = match &args.config {
        Some(path) => HarnessConfig::from_yaml_file(path),
        None => Ok(HarnessConfig::default()),
    };
    let mut config = match config {
        Ok(config) => config.with_env_overrides(),
        Err(e) => {
            error!("{}", e);
            return EXIT_SETUP;
        }
    };
    if let Some(seed) = args.seed {
        config.rng_seed = Some(seed);
    }
    if args.artifacts_dir.is_some() {
        config.artifacts_dir = args.artifacts_dir.clone();
    }

    let seed = config
        .rng_seed
        .unwrap_or_else(|| TestRng::new_from_env_or_random().seed());
    let env = RunEnv::system(seed);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Unable to start tokio runtime: {}", e);
            return EXIT_SETUP;
        }
    };

    let runner = ScenarioRunner::new(registry);
    let report = match runtime.block_on(runner.run(config, env, &args.scenarios)) {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return EXIT_SETUP;
        }
    };

    if args.json {
        match report.to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Unable to serialize report: {}", e),
        }
    } else {
        report.print();
    }
    if !report.all_passed() {
        info!("Replay with LN_ITEST_SEED={:#018x}", report.seed);
    }
    report.exit_code()
}
