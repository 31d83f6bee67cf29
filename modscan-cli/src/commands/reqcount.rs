//! `modscan reqcount` command handler

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

use modscan_core::config::ModscanConfig;
use modscan_core::storage::{FsObjectStore, ObjectStore};
use modscan_core::warehouse::{JsonlWarehouse, SchemaRegistry, create_tables, upload_many};
use modscan_reqcount::{COUNTS_TABLE, IP_COUNTS_TABLE, count_bucket_day, count_rows};

use crate::cli::ReqcountArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `reqcount` command.
pub async fn execute(
    args: ReqcountArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = ModscanConfig::load(config_path).await?;
    let date = parse_date(&args.date)?;
    let prefix = args
        .prefix
        .unwrap_or_else(|| config.reqcount.log_prefix.clone());
    let bucket = args
        .bucket
        .unwrap_or_else(|| config.storage.root.clone().into());

    let store = Arc::new(FsObjectStore::new(&bucket));
    let report = count_day(store, &prefix, date, config.reqcount.max_concurrency).await?;

    if args.upload {
        upload(&config, &report).await?;
    }
    writer.render(&report)
}

/// Parse a `YYYY-MM-DD` day.
pub fn parse_date(raw: &str) -> Result<NaiveDate, CliError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| CliError::Command(format!("invalid date '{raw}' (expected YYYY-MM-DD): {e}")))
}

/// Count one day of logs under `prefix`.
pub async fn count_day<S: ObjectStore>(
    store: Arc<S>,
    prefix: &str,
    date: NaiveDate,
    max_concurrency: usize,
) -> Result<ReqCountReport, CliError> {
    let day = count_bucket_day(store, prefix, date, max_concurrency).await?;

    let mut per_ip: Vec<IpCount> = day
        .counts
        .per_ip
        .iter()
        .map(|(ip, count)| IpCount {
            ip: ip.clone(),
            count: *count,
        })
        .collect();
    per_ip.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));

    Ok(ReqCountReport {
        date,
        objects: day.objects,
        total: day.counts.total(),
        parse_errors: day.counts.parse_errors,
        per_ip,
    })
}

async fn upload(config: &ModscanConfig, report: &ReqCountReport) -> Result<(), CliError> {
    let warehouse = JsonlWarehouse::open(&config.warehouse.dir).await?;
    let registry = SchemaRegistry::new(modscan_reqcount::rows::tables());
    create_tables(&warehouse, &registry).await?;

    let per_ip: HashMap<String, u64> = report
        .per_ip
        .iter()
        .map(|c| (c.ip.clone(), c.count))
        .collect();
    let (ip_rows, total) = count_rows(report.date, &per_ip);
    let deadline = Duration::from_secs(config.warehouse.insert_timeout_secs);
    let chunk = config.warehouse.chunk_size;

    let ips = upload_many(&warehouse, &registry, IP_COUNTS_TABLE, ip_rows, chunk, deadline).await?;
    upload_many(&warehouse, &registry, COUNTS_TABLE, vec![total], chunk, deadline).await?;
    info!(date = %report.date, ips, "request counts uploaded");
    Ok(())
}

/// Requests from one IP.
#[derive(Debug, Serialize)]
pub struct IpCount {
    pub ip: String,
    pub count: u64,
}

/// One day of request counts, busiest IP first.
#[derive(Debug, Serialize)]
pub struct ReqCountReport {
    pub date: NaiveDate,
    pub objects: usize,
    pub total: u64,
    pub parse_errors: u64,
    pub per_ip: Vec<IpCount>,
}

impl Render for ReqCountReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Requests on {}: {} from {} IPs ({} log objects)",
            self.date.to_string().bold(),
            self.total,
            self.per_ip.len(),
            self.objects
        )?;
        if self.parse_errors > 0 {
            writeln!(
                w,
                "  {}",
                format!("{} malformed lines skipped", self.parse_errors).yellow()
            )?;
        }
        for entry in &self.per_ip {
            writeln!(w, "  {:<40} {:>10}", entry.ip, entry.count)?;
        }
        Ok(())
    }
}
