//! promise-event CLI
//!
//! Drives simulated batches on virtual time and prints the events they publish.

use anyhow::Context;
use clap::{Parser, Subcommand};
use promise_event::{all, EventLoop, EventLoopConfig, Promise, PromiseEvent, Value, VERSION};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "promise-event")]
#[command(author, version, about = "Observe promise settlement through events", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Event loop configuration file (JSON)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of timed tasks through an aggregator
    Batch {
        /// Number of tasks
        #[arg(short, long, default_value_t = 5)]
        tasks: usize,

        /// Indices of tasks that reject
        #[arg(short, long, value_delimiter = ',')]
        fail: Vec<usize>,

        /// Virtual milliseconds between settlements (later indices settle first)
        #[arg(short, long, default_value_t = 10)]
        stagger: u64,

        /// Print event loop statistics as JSON when done
        #[arg(long)]
        stats: bool,
    },

    /// Run a single timed task through a bridge
    Single {
        /// Reject instead of resolving
        #[arg(long)]
        reject: bool,

        /// Virtual milliseconds before the task settles
        #[arg(short, long, default_value_t = 10)]
        delay: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => EventLoopConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => EventLoopConfig::default(),
    };
    info!(version = VERSION, budget = config.max_microtasks_per_tick, "starting");
    let el = EventLoop::with_config(config);

    match cli.command {
        Commands::Batch {
            tasks,
            fail,
            stagger,
            stats,
        } => run_batch(&el, tasks, &fail, stagger, stats),
        Commands::Single { reject, delay } => run_single(&el, reject, delay),
    }
}

fn setup_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "promise_event=info",
        1 => "promise_event=debug",
        _ => "promise_event=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_batch(el: &EventLoop, count: usize, fail: &[usize], stagger: u64, show_stats: bool) -> anyhow::Result<()> {
    let mut promises = Vec::with_capacity(count);
    for index in 0..count {
        let delay = (count - index) as u64 * stagger;
        let fails = fail.contains(&index);
        let timers = el.clone();
        promises.push(Promise::new(el, move |resolve, reject| {
            timers.set_timeout(delay, move || {
                if fails {
                    reject.reject(format!("task {} failed", index));
                } else {
                    resolve.resolve(index * 10);
                }
            });
        }));
    }

    let batch = all(el, promises)?;
    batch.on_progress(move |n| println!("progress  {}/{}", n, count));
    batch.on_resolve(|d| println!("resolve   #{} -> {}", d.index, d.result));
    batch.on_reject(|d| println!("reject    #{} -> {}", d.index, d.error));
    batch.on_finish(|d| {
        let results: Vec<String> = d.result_values().iter().map(|v| format!("{:?}", v)).collect();
        println!("finish    results=[{}] failed={}", results.join(", "), d.error_entries().count());
    });

    let run = el.run_to_completion();
    info!(
        microtasks = run.microtasks_processed,
        macrotasks = run.macrotasks_processed,
        final_time = run.final_time,
        "event loop idle"
    );

    if show_stats {
        println!("{}", serde_json::to_string_pretty(&el.stats())?);
    }
    Ok(())
}

fn run_single(el: &EventLoop, reject: bool, delay: u64) -> anyhow::Result<()> {
    let timers = el.clone();
    let bridge = PromiseEvent::new(el, move |resolve, rejector| {
        timers.set_timeout(delay, move || {
            if reject {
                rejector.reject("rejected");
            } else {
                resolve.resolve(Value::from("resolved"));
            }
        });
    });
    bridge.on_resolve(|v| println!("resolve   {}", v));
    bridge.on_reject(|v| println!("reject    {}", v));

    let run = el.run_to_completion();
    info!(final_time = run.final_time, "event loop idle");
    Ok(())
}
