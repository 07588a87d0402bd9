//! Replay a JSON-lines event file through one [`BucketPricer`].
//!
//! Usage:
//!   replay <config.json> <events.jsonl>
//!   RUST_LOG=barter_pricing=debug replay <config.json> <events.jsonl>
//!
//! Every line of the events file is one [`PricerEvent`], eg/
//! ```json
//! {"type": "greeks", "time_ns": 1, "greeks": {"delta": 45229, "gamma": 12411, ...}}
//! {"type": "deriv_tick", "time_ns": 2, "bid": 100, "ask": 101, "mm_bid": 100, ...}
//! {"type": "und_tick", "time_ns": 3, "spot": 11650000, "is_tight": true}
//! ```

use barter_pricing::{
    BucketPricer, CallValidator, PriceValidator, PricerConfig, PutOrCall, PutValidator,
    SpreadTable, ViolationType,
    greeks::Greeks,
    pricer::{DerivTick, UndTick},
    violation::TriggerInfo,
};
use serde::Deserialize;
use std::{
    env,
    fs::File,
    io::{BufRead, BufReader},
    sync::Arc,
};
use tracing::{error, info, warn};

/// One line of a replay file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum PricerEvent {
    Greeks { time_ns: i64, greeks: Greeks },
    DerivTick(DerivTick),
    UndTick(UndTick),
    Reset { time_ns: i64 },
    ResetTargetSpread { time_ns: i64, target_spread_in_tick: i32 },
}

#[derive(Debug, Default)]
struct ReplaySummary {
    events: u64,
    violations: u64,
    errors: u64,
}

fn main() {
    init_logging();

    let args = env::args().collect::<Vec<_>>();
    let (Some(config_path), Some(events_path)) = (args.get(1), args.get(2)) else {
        eprintln!("usage: replay <config.json> <events.jsonl>");
        std::process::exit(2);
    };

    if let Err(error) = run(config_path, events_path) {
        error!(%error, "replay failed");
        std::process::exit(1);
    }
}

fn run(config_path: &str, events_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = PricerConfig::from_json(&std::fs::read_to_string(config_path)?)?;
    info!(?config, "loaded pricer config");

    let events = BufReader::new(File::open(events_path)?);
    let spread_table = Arc::new(SpreadTable::warrant());

    match config.put_or_call {
        PutOrCall::Call => replay::<CallValidator>(config, spread_table, events),
        PutOrCall::Put => replay::<PutValidator>(config, spread_table, events),
    }
}

fn replay<V>(
    config: PricerConfig,
    spread_table: Arc<SpreadTable>,
    events: impl BufRead,
) -> Result<(), Box<dyn std::error::Error>>
where
    V: PriceValidator,
{
    let mut pricer = BucketPricer::<V>::new(config, spread_table)?;
    let mut summary = ReplaySummary::default();

    for (line_number, line) in events.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let seq_num = line_number as u64 + 1;
        let event = match serde_json::from_str::<PricerEvent>(&line) {
            Ok(event) => event,
            Err(error) => {
                warn!(seq_num, %error, "skipping malformed event");
                continue;
            }
        };
        summary.events += 1;

        let outcome = match event {
            PricerEvent::Greeks { time_ns, greeks } => {
                pricer.observe_greeks(time_ns, greeks);
                Ok(ViolationType::NoViolation)
            }
            PricerEvent::DerivTick(tick) => Ok(pricer
                .observe_deriv_tick(tick, TriggerInfo::new(seq_num, tick.time_ns))),
            PricerEvent::UndTick(tick) => {
                pricer.observe_und_tick(tick, TriggerInfo::new(seq_num, tick.time_ns))
            }
            PricerEvent::Reset { time_ns } => {
                pricer.reset(time_ns);
                Ok(ViolationType::NoViolation)
            }
            PricerEvent::ResetTargetSpread {
                time_ns,
                target_spread_in_tick,
            } => {
                pricer.reset_target_spread(time_ns, target_spread_in_tick);
                Ok(ViolationType::NoViolation)
            }
        };

        match outcome {
            Ok(ViolationType::NoViolation) => {}
            Ok(violation) => {
                summary.violations += 1;
                info!(seq_num, %violation, %pricer, "pricer flagged violation");
            }
            Err(error) => {
                summary.errors += 1;
                warn!(seq_num, %error, "pricer rejected event");
            }
        }
    }

    info!(?summary, "replay finished");
    println!("{pricer}");
    Ok(())
}

/// Initialise a `tracing` subscriber filtered by `RUST_LOG`, defaulting to `info`.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
