/// Tank telemetry service entry point.
///
/// Reads newline-delimited JSON sensor messages on stdin and prints a JSON
/// acknowledgment per message — the transport-agnostic stand-in for the
/// reference HTTP ingestion endpoint. Tank configuration comes from
/// `tanks.toml` (override with `TANKS_FILE`); the durable log uses
/// Postgres when `DATABASE_URL` is set, process memory otherwise.

use std::io::BufRead;
use std::path::Path;

use aquamon_service::db::{HistoryStore, MemoryStore, PostgresStore};
use aquamon_service::logging::{self, LogLevel, Subsystem};
use aquamon_service::model::{parse_message, IngestOutcome};
use aquamon_service::pipeline::Monitor;
use aquamon_service::tanks;
use chrono::Utc;
use serde_json::json;

fn main() {
    dotenv::dotenv().ok();
    logging::init_logger(LogLevel::Info, std::env::var("LOG_FILE").ok().as_deref());

    let config_path = std::env::var("TANKS_FILE").unwrap_or_else(|_| "tanks.toml".to_string());
    let registry = if Path::new(&config_path).exists() {
        match tanks::load_tanks(Path::new(&config_path)) {
            Ok(reg) => {
                logging::info(
                    Subsystem::Config,
                    None,
                    &format!("loaded {} tanks from {}", reg.len(), config_path),
                );
                reg
            }
            Err(e) => {
                logging::error(Subsystem::Config, None, &e.to_string());
                std::process::exit(1);
            }
        }
    } else {
        logging::info(
            Subsystem::Config,
            None,
            &format!("{} not found, using built-in single-tank config", config_path),
        );
        tanks::default_registry()
    };

    let store: Box<dyn HistoryStore> = match std::env::var("DATABASE_URL") {
        Ok(url) => match PostgresStore::connect(&url) {
            Ok(store) => {
                logging::info(Subsystem::Database, None, "connected to Postgres");
                Box::new(store)
            }
            Err(e) => {
                logging::error(Subsystem::Database, None, &e.to_string());
                std::process::exit(1);
            }
        },
        Err(_) => {
            logging::info(
                Subsystem::Database,
                None,
                "DATABASE_URL not set, history is in-memory only",
            );
            Box::new(MemoryStore::new())
        }
    };

    let monitor = Monitor::new(registry, store);
    logging::info(Subsystem::System, None, "reading sensor messages from stdin");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                logging::error(Subsystem::System, None, &format!("stdin read failed: {}", e));
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let ack = match parse_message(&line) {
            Ok(msg) => match monitor.ingest(msg, Utc::now()) {
                IngestOutcome::Accepted { reading, persisted } => json!({
                    "status": "success",
                    "tank_id": reading.tank_id,
                    "level_percentage": reading.level_percentage,
                    "volume_liters": reading.volume_liters,
                    "alert_low": reading.alert_low,
                    "persisted": persisted,
                }),
                IngestOutcome::Ignored { tank_id, reason } => json!({
                    "status": "ignored",
                    "tank_id": tank_id,
                    "reason": reason,
                }),
                IngestOutcome::Rejected(e) => json!({
                    "status": "error",
                    "message": e.to_string(),
                }),
            },
            Err(e) => json!({
                "status": "error",
                "message": e.to_string(),
            }),
        };
        println!("{}", ack);
    }
}
