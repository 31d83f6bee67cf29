//! `modscan jobs` command handler

use std::io::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use modscan_jobs::Job;

use crate::cli::{JobsAction, JobsArgs};
use crate::client::ControlClient;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `jobs` command.
pub async fn execute(args: JobsArgs, writer: &OutputWriter) -> Result<(), CliError> {
    let client = ControlClient::from_env(&args.server);
    let now = Utc::now();

    match args.action {
        JobsAction::List => {
            let jobs = client.list_jobs().await?;
            writer.render(&JobList::new(jobs, now))
        }
        JobsAction::Show { id } => {
            let job = client.describe_job(&id).await?;
            writer.render(&JobDetail::new(job, now))
        }
        JobsAction::Cancel { id } => {
            let job = client.cancel_job(&id).await?;
            writer.render(&JobDetail::new(job, now))
        }
        JobsAction::Results { id, errors } => {
            let rows = client.job_results(&id, errors).await?;
            writer.render(&JobResults { job_id: id, rows })
        }
    }
}

/// One job with its derived state and ETA.
#[derive(Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub job: Job,
    pub state: String,
    pub eta: String,
}

impl JobDetail {
    pub fn new(job: Job, now: DateTime<Utc>) -> Self {
        let state = job.state().to_string();
        let eta = job.eta(now).to_string();
        Self { job, state, eta }
    }
}

impl Render for JobDetail {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        let width = Job::FIELDS
            .iter()
            .map(|(label, _)| label.len())
            .max()
            .unwrap_or(0);
        for (label, field) in Job::FIELDS {
            writeln!(w, "{:<width$}  {}", label.bold(), field(&self.job))?;
        }
        writeln!(w, "{:<width$}  {}", "State".bold(), self.state)?;
        writeln!(w, "{:<width$}  {}", "ETA".bold(), self.eta)?;
        Ok(())
    }
}

/// All jobs, newest first.
#[derive(Serialize)]
pub struct JobList {
    pub jobs: Vec<JobDetail>,
}

impl JobList {
    pub fn new(jobs: Vec<Job>, now: DateTime<Utc>) -> Self {
        Self {
            jobs: jobs.into_iter().map(|j| JobDetail::new(j, now)).collect(),
        }
    }
}

impl Render for JobList {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if self.jobs.is_empty() {
            writeln!(w, "No jobs.")?;
            return Ok(());
        }

        writeln!(
            w,
            "{:<28} {:<10} {:>8} {:>8} {:>8} {:<10}",
            "ID", "State", "Enqueued", "Finished", "Errored", "ETA"
        )?;
        writeln!(w, "{}", "-".repeat(77))?;
        for detail in &self.jobs {
            let job = &detail.job;
            let state = if job.canceled {
                "canceled"
            } else {
                detail.state.as_str()
            };
            writeln!(
                w,
                "{:<28} {:<10} {:>8} {:>8} {:>8} {:<10}",
                job.id,
                state,
                job.num_enqueued,
                job.num_finished(),
                job.num_errored,
                detail.eta
            )?;
        }
        Ok(())
    }
}

/// Latest analysis rows of a job.
#[derive(Serialize)]
pub struct JobResults {
    pub job_id: String,
    pub rows: Vec<Value>,
}

fn str_field<'a>(row: &'a Value, key: &str) -> &'a str {
    row.get(key).and_then(Value::as_str).unwrap_or_default()
}

impl Render for JobResults {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(w, "Results for {} ({} rows)", self.job_id.bold(), self.rows.len())?;
        for row in &self.rows {
            let target = format!(
                "{}@{}",
                str_field(row, "module_path"),
                str_field(row, "version")
            );
            let error = str_field(row, "error");
            if error.is_empty() {
                writeln!(w, "  {} {}", "ok ".green(), target)?;
            } else {
                writeln!(
                    w,
                    "  {} {} [{}] {}",
                    "err".red(),
                    target,
                    str_field(row, "error_category"),
                    error
                )?;
            }
        }
        Ok(())
    }
}
