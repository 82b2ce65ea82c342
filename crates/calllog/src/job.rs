//! The `parseCallLogJob` flow.
//!
//! ```text
//! readCallDataFromFile -> createBills -> stopForManualApproval
//!     STOPPED -> stop
//!     *       -> sendBills -> notifyDone
//! ```

use tracing::info;

use chunkflow_batch::item::{FnProcessor, ListReader, PassThroughProcessor};
use chunkflow_batch::{
    BatchConfig, BatchError, DefaultJobParametersValidator, ItemError, Job, JobParameters,
    LoggingListener, ManualApprovalDecider, RepeatStatus, Step, StepExecution,
};

use crate::bill::Bill;
use crate::call::{PhoneCall, open_call_log};
use crate::store::CallLogStores;

pub const JOB_NAME: &str = "parseCallLogJob";

pub const PARAM_FILE_PATH: &str = "filePath";
pub const PARAM_MANUAL_APPROVAL: &str = "manualApproval";

pub const STEP_READ_CALLS: &str = "readCallDataFromFile";
pub const STEP_CREATE_BILLS: &str = "createBills";
pub const STEP_APPROVAL: &str = "stopForManualApproval";
pub const STEP_SEND_BILLS: &str = "sendBills";
pub const STEP_NOTIFY_DONE: &str = "notifyDone";

/// Parameters for one call log file.
pub fn call_log_parameters(file_path: &str, manual_approval: bool) -> JobParameters {
    JobParameters::builder()
        .add(PARAM_FILE_PATH, file_path)
        .add(PARAM_MANUAL_APPROVAL, manual_approval)
        .build()
}

pub fn parse_call_log_job(stores: &CallLogStores, config: &BatchConfig) -> Result<Job, BatchError> {
    Job::builder(JOB_NAME)
        .validator(DefaultJobParametersValidator::new(
            [PARAM_FILE_PATH],
            [PARAM_MANUAL_APPROVAL],
        ))
        .listener(LoggingListener)
        .start(read_calls(stores, config)?)
        .next(create_bills(stores, config)?)
        .next(Step::decision(
            STEP_APPROVAL,
            ManualApprovalDecider::new(stores.approvals.clone(), PARAM_FILE_PATH)
                .with_flag_parameter(PARAM_MANUAL_APPROVAL),
        ))
        .on("STOPPED")
        .stop()
        .on("*")
        .to(send_bills(stores, config)?)
        .next(Step::tasklet(STEP_NOTIFY_DONE, notify_done))
        .build()
}

fn read_calls(stores: &CallLogStores, config: &BatchConfig) -> Result<Step, BatchError> {
    Step::chunk::<PhoneCall, PhoneCall>(STEP_READ_CALLS)
        .config(config)
        .reader(|params: &JobParameters| open_call_log(&file_path(params)?))
        .processor(PassThroughProcessor)
        .shared_writer(stores.calls.clone())
        .listener(LoggingListener)
        .build()
}

/// One bill per subscriber with outgoing calls. Receive-only subscribers are
/// filtered out.
fn create_bills(stores: &CallLogStores, config: &BatchConfig) -> Result<Step, BatchError> {
    let subscribers = stores.calls.clone();
    let calls = stores.calls.clone();
    Step::chunk::<String, Bill>(STEP_CREATE_BILLS)
        .config(config)
        .reader(move |_: &JobParameters| Ok(ListReader::new(subscribers.subscribers()?)))
        .processor(FnProcessor::new(move |subscriber: &String| {
            let usage = calls.usage(subscriber)?;
            if usage.calls == 0 {
                return Ok(None);
            }
            Ok(Some(Bill::new(subscriber.clone(), usage.calls, usage.duration)))
        }))
        .shared_writer(stores.bills.clone())
        .build()
}

fn send_bills(stores: &CallLogStores, config: &BatchConfig) -> Result<Step, BatchError> {
    let bills = stores.bills.clone();
    Step::chunk::<Bill, Bill>(STEP_SEND_BILLS)
        .config(config)
        .reader(move |_: &JobParameters| Ok(ListReader::new(bills.find_all()?)))
        .processor(FnProcessor::new(|bill: &Bill| {
            let mut bill = bill.clone();
            bill.send();
            Ok(Some(bill))
        }))
        .shared_writer(stores.bills.clone())
        .build()
}

fn notify_done(
    params: &JobParameters,
    step: &mut StepExecution,
) -> Result<RepeatStatus, ItemError> {
    info!(
        step = %step.step_name,
        file = %file_path(params)?,
        "call log processed, operator notified"
    );
    Ok(RepeatStatus::Finished)
}

fn file_path(params: &JobParameters) -> Result<String, ItemError> {
    params
        .get_string(PARAM_FILE_PATH)
        .ok_or_else(|| ItemError::resource(format!("job parameter '{PARAM_FILE_PATH}' is missing")))
}
