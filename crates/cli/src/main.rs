//! # CLI — interactive shell over the time-series storage engine
//!
//! A REPL-style command-line interface. Reads commands from stdin, executes
//! them against the engine, and prints results to stdout. Designed for both
//! interactive use and scripted testing (pipe commands via stdin).
//!
//! ## Commands
//!
//! ```text
//! STORE tag ts value        Store one measurement (expiresAt=0)
//! RETRIEVE tag from to      Range query, inclusive on both ends
//! AVAILABILITY              Print the engine-wide (min, max) timestamp range
//! TAGS                      List every known tag
//! EXIT / QUIT               Shut down gracefully
//! ```
//!
//! ## Configuration
//!
//! All settings are controlled via environment variables:
//!
//! ```text
//! ENGINE_COMMITLOG_PATH          Commit-log directory   (default: "data/commitlog")
//! ENGINE_SST_PATH                SST directory          (default: "data/sst")
//! ENGINE_ENTRIES_PER_COMMITLOG   Rotation threshold     (default: 1000)
//! ENGINE_PERIOD_BETWEEN_FLUSHES_SECS  Flush interval     (default: 60)
//! ENGINE_MEMT_MAX_ENTRIES_PER_TAG     MemT cap per tag   (default: 10)
//! ENGINE_MEMT_PERFORM_EXPIRATION_EVERY_SECS  Sweep interval (default: 10)
//! ENGINE_MEMT_PREFETCH_SECONDS        Startup prefetch span (default: 0)
//! ```
//!
//! `RUST_LOG` controls log verbosity (e.g. `RUST_LOG=debug`).

use anyhow::{Context, Result};
use config::ConfigBuilder;
use engine::{Engine, Measurement};
use std::io::{self, BufRead, Write};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn config_from_env() -> Result<config::EngineConfig> {
    ConfigBuilder::new()
        .commitlog_path(env_or("ENGINE_COMMITLOG_PATH", "data/commitlog"))
        .sst_path(env_or("ENGINE_SST_PATH", "data/sst"))
        .entries_per_commitlog(env_parsed("ENGINE_ENTRIES_PER_COMMITLOG", config::DEFAULT_ENTRIES_PER_COMMITLOG))
        .period_between_flushes_secs(env_parsed(
            "ENGINE_PERIOD_BETWEEN_FLUSHES_SECS",
            config::DEFAULT_PERIOD_BETWEEN_FLUSHES_SECS,
        ))
        .memt_max_entries_per_tag(env_parsed(
            "ENGINE_MEMT_MAX_ENTRIES_PER_TAG",
            config::DEFAULT_MEMT_MAX_ENTRIES_PER_TAG,
        ))
        .memt_perform_expiration_every_secs(env_parsed(
            "ENGINE_MEMT_PERFORM_EXPIRATION_EVERY_SECS",
            config::DEFAULT_MEMT_PERFORM_EXPIRATION_EVERY_SECS,
        ))
        .memt_prefetch_seconds(env_parsed("ENGINE_MEMT_PREFETCH_SECONDS", 0))
        .build()
        .context("invalid engine configuration")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = config_from_env()?;
    let engine = Engine::init(&config).context("failed to bring up storage engine")?;

    println!(
        "storage engine started (commitlog={}, sst={}, entries_per_commitlog={})",
        config.commitlog_path, config.sst_path, config.entries_per_commitlog
    );
    println!("Commands: STORE tag ts value | RETRIEVE tag from to | AVAILABILITY | TAGS | EXIT");
    print!("> ");
    io::stdout().flush().ok();

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        if let Some(cmd) = parts.next() {
            match cmd.to_uppercase().as_str() {
                "STORE" => match (parts.next(), parts.next()) {
                    (Some(tag), Some(ts)) => {
                        let value: String = parts.collect::<Vec<&str>>().join(" ");
                        match ts.parse::<u64>() {
                            Ok(ts) => {
                                let mut batch = std::collections::HashMap::new();
                                batch.insert(
                                    tag.as_bytes().to_vec(),
                                    vec![Measurement { timestamp: ts, value: value.into_bytes() }],
                                );
                                match engine.store(&batch, 0) {
                                    Ok(()) => println!("OK"),
                                    Err(e) => println!("ERR store failed: {e}"),
                                }
                            }
                            Err(_) => println!("ERR timestamp must be an integer"),
                        }
                    }
                    _ => println!("ERR usage: STORE tag ts value"),
                },
                "RETRIEVE" => match (parts.next(), parts.next(), parts.next()) {
                    (Some(tag), Some(from), Some(to)) => match (from.parse::<u64>(), to.parse::<u64>()) {
                        (Ok(from), Ok(to)) => match engine.retrieve(&[tag.as_bytes().to_vec()], from, to) {
                            Ok(result) => {
                                let series = &result[tag.as_bytes()];
                                if series.is_empty() {
                                    println!("(empty)");
                                } else {
                                    for m in series {
                                        println!("{} -> {}", m.timestamp, String::from_utf8_lossy(&m.value));
                                    }
                                    println!("({} entries)", series.len());
                                }
                            }
                            Err(e) => println!("ERR retrieve failed: {e}"),
                        },
                        _ => println!("ERR from/to must be integers"),
                    },
                    _ => println!("ERR usage: RETRIEVE tag from to"),
                },
                "AVAILABILITY" => {
                    let (from, to) = engine.availability();
                    println!("{from} {to}");
                }
                "TAGS" => {
                    let mut tags = engine.get_tags();
                    tags.sort();
                    for tag in &tags {
                        println!("{}", String::from_utf8_lossy(tag));
                    }
                    println!("({} tags)", tags.len());
                }
                "EXIT" | "QUIT" => {
                    println!("bye");
                    break;
                }
                other => println!("unknown command: {other}"),
            }
        }
        print!("> ");
        io::stdout().flush().ok();
    }

    engine.close();
    Ok(())
}
