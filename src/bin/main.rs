// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use laundry_settlement_rs::{
    AddressId, BookingRequest, Branch, Collaborators, CustomerId, Directory, EngineConfig,
    ManualClock, MemoryStore, OrderId, OrderKind, OrderSource, OrderStatus, PaymentProvider,
    PaymentStatus, PaymentUpdate, RevenuePeriod, ServiceType, SettlementEngine, SettlementError,
    TextRenderer, TimeWindow,
};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Laundry settlement engine
///
/// Resolves reporting ranges and replays order journals through the engine.
#[derive(Parser, Debug)]
#[command(name = "laundry-settlement-rs")]
#[command(about = "Settlement engine for laundry orders, subscriptions and invoices", long_about = None)]
struct Args {
    /// JSON engine configuration; unspecified fields keep their defaults
    #[arg(long, value_name = "FILE", env = "SETTLEMENT_CONFIG")]
    config: Option<PathBuf>,

    /// Civil offset east of UTC in minutes, overriding the config file
    #[arg(long, env = "SETTLEMENT_CIVIL_OFFSET_MINUTES")]
    civil_offset_minutes: Option<i32>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the instant range and breakdown for a reporting period
    RevenueRange {
        /// Preset such as today, this_month, last_3_months, this_fy, FY25
        #[arg(conflicts_with_all = ["from", "to"], required_unless_present_all = ["from", "to"])]
        period: Option<String>,

        /// First civil day of a custom range (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Last civil day of a custom range, inclusive
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Reference instant (RFC 3339) instead of the wall clock
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Replay a CSV journal and print the resulting orders as CSV
    ///
    /// Expected columns: action,at,order,customer,pincode,source,status,provider,amount,reason
    Replay {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// JSON array of branches to resolve pincodes against
        #[arg(long, value_name = "FILE")]
        branches: Option<PathBuf>,
    },
}

fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };

    let result = match args.command {
        Command::RevenueRange {
            period,
            from,
            to,
            now,
        } => revenue_range(config, period.as_deref(), from.zip(to), now),
        Command::Replay { input, branches } => replay_file(config, &input, branches.as_deref()),
    };
    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Settlement(#[from] SettlementError),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

fn open(path: &std::path::Path) -> Result<File, CliError> {
    File::open(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn load_config(args: &Args) -> Result<EngineConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => {
            let mut json = String::new();
            open(path)?
                .read_to_string(&mut json)
                .map_err(|source| CliError::Io {
                    path: path.clone(),
                    source,
                })?;
            EngineConfig::from_json(&json)?
        }
        None => EngineConfig::default(),
    };
    if let Some(minutes) = args.civil_offset_minutes {
        config.civil_offset_minutes = minutes;
    }
    config.validate()?;
    Ok(config)
}

fn engine_with(
    config: EngineConfig,
    directory: Arc<Directory>,
    clock: Arc<ManualClock>,
) -> Result<SettlementEngine<MemoryStore>, SettlementError> {
    let renderer = Arc::new(TextRenderer::new(
        config.render_lines_per_page,
        config.document_base_url.clone(),
    ));
    SettlementEngine::new(
        MemoryStore::with_clock(clock.clone()),
        Collaborators::from_directory(directory, renderer),
        clock,
        config,
    )
}

#[derive(Debug, Serialize)]
struct RangeRow {
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    first_day: NaiveDate,
    last_day: NaiveDate,
    breakdown: &'static str,
}

fn revenue_range(
    config: EngineConfig,
    period: Option<&str>,
    custom: Option<(NaiveDate, NaiveDate)>,
    now: Option<DateTime<Utc>>,
) -> Result<(), CliError> {
    let clock = Arc::new(ManualClock::new(now.unwrap_or_else(Utc::now)));
    let engine = engine_with(config, Arc::new(Directory::new()), clock)?;
    let range = match (custom, period) {
        (Some((from, to)), _) => engine.revenue_range_custom(from, to)?,
        (None, Some(period)) => engine.revenue_range(period.parse::<RevenuePeriod>()?)?,
        (None, None) => {
            return Err(SettlementError::InvalidInput("a period or --from/--to is required".into()).into());
        }
    };
    let mut wtr = Writer::from_writer(std::io::stdout());
    wtr.serialize(RangeRow {
        from: range.from,
        to: range.to,
        first_day: range.first_day,
        last_day: range.last_day,
        breakdown: match range.breakdown {
            laundry_settlement_rs::Breakdown::Daily => "daily",
            laundry_settlement_rs::Breakdown::Monthly => "monthly",
        },
    })?;
    wtr.flush().map_err(|source| CliError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    Ok(())
}

fn replay_file(
    config: EngineConfig,
    input: &std::path::Path,
    branches: Option<&std::path::Path>,
) -> Result<(), CliError> {
    let directory = Arc::new(Directory::new());
    if let Some(path) = branches {
        let list: Vec<Branch> = serde_json::from_reader(BufReader::new(open(path)?))?;
        for branch in list {
            directory.add_branch(branch);
        }
    }
    let engine = replay(config, directory, BufReader::new(open(input)?))?;
    write_orders(&engine, std::io::stdout())
}

/// One journal row. Columns unused by an action may be empty.
#[derive(Debug, Deserialize)]
struct ReplayRecord {
    action: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    order: Option<u64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    customer: Option<u64>,
    #[serde(default)]
    pincode: String,
    #[serde(default)]
    source: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    provider: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<i64>,
    #[serde(default)]
    reason: String,
}

fn required<T>(value: Option<T>, column: &str) -> Result<T, SettlementError> {
    value.ok_or_else(|| SettlementError::InvalidInput(format!("missing column: {column}")))
}

fn apply(
    engine: &SettlementEngine<MemoryStore>,
    record: ReplayRecord,
    pickup: NaiveDate,
) -> Result<(), SettlementError> {
    match record.action.to_ascii_lowercase().as_str() {
        "book" => {
            let source = match record.source.to_ascii_lowercase().as_str() {
                "walk_in" | "walkin" | "wi" => OrderSource::WalkIn,
                _ => OrderSource::Online,
            };
            engine.book_order(BookingRequest {
                customer_id: CustomerId(required(record.customer, "customer")?),
                kind: OrderKind::Individual,
                services: vec![ServiceType::WashAndFold],
                address_id: AddressId(0),
                pincode: record.pincode,
                pickup_date: pickup,
                pickup_window: TimeWindow {
                    start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
                    end: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
                },
                requested_weight_kg: None,
                subscription_id: None,
                branch_id: None,
                source,
            })?;
        }
        "status" => {
            let reason = Some(record.reason).filter(|r| !r.is_empty());
            engine.update_status(
                OrderId(required(record.order, "order")?),
                record.status.parse::<OrderStatus>()?,
                reason,
            )?;
        }
        "payment" => {
            let status: PaymentStatus = record.status.parse()?;
            let update = PaymentUpdate {
                provider: record.provider.parse::<PaymentProvider>()?,
                status,
                amount: required(record.amount, "amount")?,
                provider_order_ref: None,
                provider_payment_ref: None,
                failure_reason: Some(record.reason).filter(|r| !r.is_empty()),
            };
            engine.capture_order_payment(OrderId(required(record.order, "order")?), update)?;
        }
        other => {
            return Err(SettlementError::InvalidInput(format!("unknown action: {other}")));
        }
    }
    Ok(())
}

/// Replays journal rows in order. Rows that fail are logged and skipped.
///
/// # CSV Format
///
/// ```csv
/// action,at,order,customer,pincode,source,status,provider,amount,reason
/// book,2025-06-01T04:00:00Z,,7,560034,online,,,,
/// status,2025-06-01T06:00:00Z,1,,,,PICKED_UP,,,
/// payment,2025-06-02T10:00:00Z,1,,,,captured,upi,45000,
/// ```
///
/// # Errors
///
/// Returns a CSV error only if the reader itself fails.
fn replay<R: Read>(
    config: EngineConfig,
    directory: Arc<Directory>,
    reader: R,
) -> Result<SettlementEngine<MemoryStore>, CliError> {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let engine = engine_with(config, directory, clock.clone())?;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    for (line, result) in rdr.deserialize::<ReplayRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(line = line + 2, error = %e, "skipping malformed row");
                continue;
            }
        };
        if let Some(at) = record.at {
            clock.set(at);
        }
        let pickup = engine.calendar().civil_date(record.at.unwrap_or_else(Utc::now));
        if let Err(e) = apply(&engine, record, pickup) {
            tracing::warn!(line = line + 2, code = e.code(), error = %e, "skipping row");
        }
    }
    Ok(engine)
}

#[derive(Debug, Serialize)]
struct OrderRow {
    id: u64,
    code: String,
    customer: u64,
    status: OrderStatus,
    branch: Option<u64>,
    payment_status: Option<PaymentStatus>,
    subscription: Option<u64>,
}

/// Writes every order, by id, as CSV.
fn write_orders<W: Write>(engine: &SettlementEngine<MemoryStore>, writer: W) -> Result<(), CliError> {
    let mut wtr = Writer::from_writer(writer);
    let mut id = 1;
    loop {
        let order = match engine.order(OrderId(id)) {
            Ok(order) => order,
            Err(SettlementError::OrderNotFound(_)) => break,
            Err(e) => return Err(e.into()),
        };
        wtr.serialize(OrderRow {
            id: order.id.0,
            code: order.code,
            customer: order.customer_id.0,
            status: order.status,
            branch: order.branch_id.map(|b| b.0),
            payment_status: order.payment_status,
            subscription: order.subscription_id.map(|s| s.0),
        })?;
        id += 1;
    }
    wtr.flush().map_err(|source| CliError::Io {
        path: PathBuf::from("<stdout>"),
        source,
    })?;
    Ok(())
}
