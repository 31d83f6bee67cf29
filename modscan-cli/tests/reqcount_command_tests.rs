//! `modscan reqcount` over a local log bucket.

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;

use modscan_cli::commands::reqcount::count_day;
use modscan_core::storage::FsObjectStore;

fn line(ip: &str) -> String {
    format!(r#"{{"timestamp":"2024-05-01T12:00:00Z","httpRequest":{{"remoteIp":"{ip}"}}}}"#)
}

fn seed(root: &Path, name: &str, lines: &[String]) {
    let path = root.join(name);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, lines.join("\n")).unwrap();
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

#[tokio::test]
async fn counts_are_sorted_busiest_first() {
    let bucket = tempfile::tempdir().unwrap();
    seed(
        bucket.path(),
        "logs/2024/05/01/00:00:00_00:59:59_S0.json",
        &[line("10.0.0.1"), line("10.0.0.2"), line("10.0.0.2")],
    );
    seed(
        bucket.path(),
        "logs/2024/05/01/01:00:00_01:59:59_S0.json",
        &[line("10.0.0.3"), line("10.0.0.2"), "not json".to_owned()],
    );
    // another day
    seed(
        bucket.path(),
        "logs/2024/05/02/00:00:00_00:59:59_S0.json",
        &[line("10.0.0.9")],
    );

    let store = Arc::new(FsObjectStore::new(bucket.path()));
    let report = count_day(store, "logs", day(), 2).await.expect("count");

    assert_eq!(report.objects, 2);
    assert_eq!(report.total, 5);
    assert_eq!(report.parse_errors, 1);
    let order: Vec<(&str, u64)> = report
        .per_ip
        .iter()
        .map(|c| (c.ip.as_str(), c.count))
        .collect();
    assert_eq!(
        order,
        vec![("10.0.0.2", 3), ("10.0.0.1", 1), ("10.0.0.3", 1)]
    );
}

#[tokio::test]
async fn empty_day_reports_zero() {
    let bucket = tempfile::tempdir().unwrap();
    seed(bucket.path(), "logs/2024/04/30/x.json", &[line("10.0.0.1")]);

    let store = Arc::new(FsObjectStore::new(bucket.path()));
    let report = count_day(store, "logs/", day(), 5).await.unwrap();

    assert_eq!(report.objects, 0);
    assert_eq!(report.total, 0);
    assert!(report.per_ip.is_empty());
}
