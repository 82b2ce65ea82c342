use anyhow::Context;
use serde::Serialize;

use chunkflow_batch::{BatchConfig, InMemoryJobRepository, JobExecution, JobLauncher};
use chunkflow_calllog::{Bill, CallLogStores, call_log_parameters, parse_call_log_job};

#[derive(Serialize)]
struct Report {
    execution: JobExecution,
    bills: Vec<Bill>,
}

fn main() -> anyhow::Result<()> {
    chunkflow_observability::init();

    let file = std::env::var("CALLLOG_FILE").context("CALLLOG_FILE must name a call log file")?;
    let manual_approval = match std::env::var("CALLLOG_MANUAL_APPROVAL") {
        Ok(raw) => raw
            .trim()
            .parse::<bool>()
            .with_context(|| {
                format!("CALLLOG_MANUAL_APPROVAL: expected true or false, got {raw:?}")
            })?,
        Err(_) => false,
    };

    let config = BatchConfig::from_env()?;
    let stores = CallLogStores::new();
    let job = parse_call_log_job(&stores, &config)?;
    let launcher = JobLauncher::new(InMemoryJobRepository::new());

    let execution = launcher.run(&job, call_log_parameters(&file, manual_approval))?;
    tracing::info!(
        execution_id = %execution.id,
        status = %execution.status,
        "call log job returned"
    );

    let report = Report {
        execution,
        bills: stores.bills.find_all()?,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
