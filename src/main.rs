use tickserve::cli::Args;
use tickserve::config::ServerConfig;
use tickserve::server::{HttpServer, Param, Registry, json_serializer};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use serde::Serialize;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Host state the operations act on. Only touched on the main thread.
#[derive(Debug, Default)]
struct DemoHost {
    ticks: u64,
    cubes: u32,
}

#[derive(Serialize)]
struct ReturnResult {
    msg: String,
    code: i64,
}

fn build_registry() -> Registry<DemoHost> {
    let mut registry = Registry::new();
    registry
        .register("SpawnCube", vec![], |host: &mut DemoHost, _| {
            host.cubes += 1;
            info!("SpawnCube called via api ({} cubes)", host.cubes);
            Ok(None)
        })
        .register("SimpleStringMethod", vec![], |_, _| {
            Ok(Some(serde_json::json!(["result", "result2"])))
        })
        .register("SimpleIntMethod", vec![], |_, _| Ok(Some(serde_json::json!([1, 2]))))
        .register("CustomObjectReturnMethod", vec![], |_, _| {
            let result = ReturnResult { msg: "testing".into(), code: 1 };
            Ok(Some(serde_json::to_value(result)?))
        })
        .register(
            "CustomObjectReturnMethodWithQuery",
            vec![Param::int("code"), Param::string("msg")],
            |_, args| {
                let result = ReturnResult {
                    code: args.get("code")?.unwrap_or_default(),
                    msg: args.get("msg")?.unwrap_or_default(),
                };
                Ok(Some(serde_json::to_value(result)?))
            },
        )
        .register("Add", vec![Param::int("x"), Param::int("y")], |_, args| {
            let sum = args.require::<i64>("x")? + args.require::<i64>("y")?;
            Ok(Some(sum.into()))
        })
        .register("Status", vec![], |host: &mut DemoHost, _| {
            Ok(Some(serde_json::json!({ "ticks": host.ticks, "cubes": host.cubes })))
        });
    registry
}

fn init_logging(args: &Args) -> Result<()> {
    if let Some(ref log_path_opt) = args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| PathBuf::from("tickserve.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        // File logging: debug unless -v asks for more
        let log_level = if args.verbosity >= 3 {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Debug
        };

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging with specified verbosity level (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    debug!("Command-line args: {:?}", args);

    let config = match &args.config {
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    }
    .apply_overrides(args.root.clone(), args.port);

    let mut server = HttpServer::new(config, build_registry())?.with_serializer(json_serializer());
    server.start()?;

    if let Some(url) = server.url(&args.page) {
        // Printed regardless of log level: this is what users connect to
        println!("Connect at: {}", url);
    }

    let mut host = DemoHost::default();
    let frame = Duration::from_secs_f64(1.0 / f64::from(args.tick_hz.max(1)));
    let run_for = (args.run_secs > 0).then(|| Duration::from_secs(args.run_secs));
    let started = Instant::now();

    loop {
        let tick_start = Instant::now();

        let handled = server.pump(&mut host);
        if handled > 0 {
            debug!("Tick {}: handled {} call(s)", host.ticks, handled);
        }
        host.ticks += 1;

        if run_for.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }
        if let Some(rest) = frame.checked_sub(tick_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    server.stop();
    info!("Demo host finished after {} ticks, {} cubes spawned", host.ticks, host.cubes);
    Ok(())
}
