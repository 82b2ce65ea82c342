//! Chunk-oriented processing: read up to N items, process them, write the
//! survivors in one call, then commit the chunk's counters.
//!
//! A chunk is all-or-nothing with respect to the step's counters. Item
//! failures are first retried (processing only), then offered to the skip
//! policy; anything left fails the chunk, which records a rollback and ends
//! the step.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, warn};

use crate::error::ItemError;
use crate::execution::StepExecution;
use crate::item::{Processor, Reader, Writer};
use crate::listener::SkipListener;
use crate::policy::{RetryPolicy, SkipPolicy};

/// Where a chunk is in its lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChunkState {
    Reading,
    Processing,
    Writing,
    Committed,
    Failed,
}

/// Counter deltas of one chunk, applied to the step execution on commit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChunkContribution {
    pub read: u64,
    pub filter: u64,
    pub write: u64,
    pub read_skip: u64,
    pub process_skip: u64,
    pub write_skip: u64,
    pub retry: u64,
}

impl ChunkContribution {
    pub fn skips(&self) -> u64 {
        self.read_skip + self.process_skip + self.write_skip
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply_to(&self, step: &mut StepExecution) {
        step.read_count += self.read;
        step.filter_count += self.filter;
        step.write_count += self.write;
        step.read_skip_count += self.read_skip;
        step.process_skip_count += self.process_skip;
        step.write_skip_count += self.write_skip;
        step.retry_count += self.retry;
    }
}

/// Result of one committed chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub contribution: ChunkContribution,
    /// The reader reported end-of-stream while filling this chunk.
    pub exhausted: bool,
}

/// Drives one step execution's read-process-write loop.
pub struct ChunkProcessor<'a, T, R> {
    reader: &'a mut dyn Reader<T>,
    processor: &'a dyn Processor<T, R>,
    writer: &'a dyn Writer<R>,
    chunk_size: usize,
    skip_policy: &'a dyn SkipPolicy,
    retry_policy: &'a RetryPolicy,
    listeners: &'a [Arc<dyn SkipListener<T, R>>],
    state: ChunkState,
}

impl<'a, T, R> ChunkProcessor<'a, T, R> {
    pub fn new(
        reader: &'a mut dyn Reader<T>,
        processor: &'a dyn Processor<T, R>,
        writer: &'a dyn Writer<R>,
        chunk_size: usize,
        skip_policy: &'a dyn SkipPolicy,
        retry_policy: &'a RetryPolicy,
    ) -> Self {
        Self {
            reader,
            processor,
            writer,
            chunk_size: chunk_size.max(1),
            skip_policy,
            retry_policy,
            listeners: &[],
            state: ChunkState::Committed,
        }
    }

    pub fn with_listeners(mut self, listeners: &'a [Arc<dyn SkipListener<T, R>>]) -> Self {
        self.listeners = listeners;
        self
    }

    /// State of the most recent chunk.
    pub fn state(&self) -> ChunkState {
        self.state
    }

    /// Process chunks until the reader is exhausted or a chunk fails.
    pub fn run(&mut self, step: &mut StepExecution) -> Result<(), ItemError> {
        loop {
            let outcome = self.process_chunk(step)?;
            if outcome.exhausted {
                return Ok(());
            }
        }
    }

    /// Read, process and write a single chunk.
    ///
    /// A chunk that reads nothing at all (not even a skipped record) is not
    /// committed.
    pub fn process_chunk(&mut self, step: &mut StepExecution) -> Result<ChunkOutcome, ItemError> {
        let mut chunk = ChunkContribution::default();

        self.state = ChunkState::Reading;
        let (items, exhausted) = match self.read_items(step, &mut chunk) {
            Ok(read) => read,
            Err(e) => return Err(self.fail(step, e)),
        };

        if chunk.is_empty() {
            self.state = ChunkState::Committed;
            return Ok(ChunkOutcome {
                contribution: chunk,
                exhausted,
            });
        }

        self.state = ChunkState::Processing;
        let outputs = match self.process_items(step, &mut chunk, &items) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(step, e)),
        };

        self.state = ChunkState::Writing;
        if let Err(e) = self.write_items(step, &mut chunk, outputs) {
            return Err(self.fail(step, e));
        }

        chunk.apply_to(step);
        step.commit_count += 1;
        self.state = ChunkState::Committed;
        debug!(
            step = %step.step_name,
            read = chunk.read,
            written = chunk.write,
            filtered = chunk.filter,
            skipped = chunk.skips(),
            commits = step.commit_count,
            "chunk committed"
        );

        Ok(ChunkOutcome {
            contribution: chunk,
            exhausted,
        })
    }

    fn read_items(
        &mut self,
        step: &StepExecution,
        chunk: &mut ChunkContribution,
    ) -> Result<(Vec<T>, bool), ItemError> {
        let mut items = Vec::with_capacity(self.chunk_size);

        while items.len() < self.chunk_size {
            match self.reader.read() {
                Ok(Some(item)) => {
                    chunk.read += 1;
                    items.push(item);
                }
                Ok(None) => return Ok((items, true)),
                Err(e) => {
                    if !self.skip_policy.should_skip(&e, step.skip_count() + chunk.skips()) {
                        return Err(e);
                    }
                    chunk.read += 1;
                    chunk.read_skip += 1;
                    warn!(step = %step.step_name, error = %e, "skipping record on read");
                    for listener in self.listeners {
                        listener.on_skip_in_read(&e);
                    }
                }
            }
        }

        Ok((items, false))
    }

    fn process_items(
        &self,
        step: &StepExecution,
        chunk: &mut ChunkContribution,
        items: &[T],
    ) -> Result<Vec<R>, ItemError> {
        let mut outputs = Vec::with_capacity(items.len());

        for item in items {
            let mut failures = 0u32;
            loop {
                match self.processor.process(item) {
                    Ok(Some(output)) => {
                        outputs.push(output);
                        break;
                    }
                    Ok(None) => {
                        chunk.filter += 1;
                        break;
                    }
                    Err(e) => {
                        failures += 1;
                        if self.retry_policy.should_retry(&e, failures) {
                            chunk.retry += 1;
                            let delay = self.retry_policy.delay_for_attempt(failures);
                            warn!(
                                step = %step.step_name,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying item"
                            );
                            if !delay.is_zero() {
                                thread::sleep(delay);
                            }
                            continue;
                        }
                        if !self.skip_policy.should_skip(&e, step.skip_count() + chunk.skips()) {
                            return Err(e);
                        }
                        chunk.process_skip += 1;
                        warn!(step = %step.step_name, error = %e, "skipping item on process");
                        for listener in self.listeners {
                            listener.on_skip_in_process(item, &e);
                        }
                        break;
                    }
                }
            }
        }

        Ok(outputs)
    }

    /// Write `outputs` in one call. While the writer names the items it
    /// rejected, those items go to the skip policy and the rest is written
    /// again; indices always refer to the batch handed to that write.
    fn write_items(
        &self,
        step: &StepExecution,
        chunk: &mut ChunkContribution,
        outputs: Vec<R>,
    ) -> Result<(), ItemError> {
        let mut pending = outputs;

        while !pending.is_empty() {
            let e = match self.writer.write(&pending) {
                Ok(()) => {
                    chunk.write += pending.len() as u64;
                    return Ok(());
                }
                Err(e) => e,
            };

            let failed_items = match &e {
                ItemError::Write { failed_items, .. } if !failed_items.is_empty() => {
                    failed_items.clone()
                }
                _ => return Err(e),
            };

            let mut survivors = Vec::with_capacity(pending.len());
            let mut skipped = 0usize;
            for (index, output) in pending.into_iter().enumerate() {
                if !failed_items.contains(&index) {
                    survivors.push(output);
                    continue;
                }
                if !self.skip_policy.should_skip(&e, step.skip_count() + chunk.skips()) {
                    return Err(e);
                }
                chunk.write_skip += 1;
                skipped += 1;
                warn!(step = %step.step_name, index, error = %e, "skipping item on write");
                for listener in self.listeners {
                    listener.on_skip_in_write(&output, &e);
                }
            }

            // Indices outside the batch name nothing we can drop.
            if skipped == 0 {
                return Err(e);
            }
            pending = survivors;
        }

        Ok(())
    }

    fn fail(&mut self, step: &mut StepExecution, e: ItemError) -> ItemError {
        self.state = ChunkState::Failed;
        step.rollback_count += 1;
        error!(
            step = %step.step_name,
            rollbacks = step.rollback_count,
            error = %e,
            "chunk failed, rolling back"
        );
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chunkflow_core::JobExecutionId;

    use crate::error::ErrorKind;
    use crate::item::{FnProcessor, FnWriter, ListReader, PassThroughProcessor};
    use crate::policy::{LimitCheckingSkipPolicy, NeverSkipPolicy};

    struct ScriptedReader {
        script: Vec<Result<Option<i32>, ItemError>>,
    }

    impl Reader<i32> for ScriptedReader {
        fn read(&mut self) -> Result<Option<i32>, ItemError> {
            if self.script.is_empty() {
                Ok(None)
            } else {
                self.script.remove(0)
            }
        }
    }

    fn step() -> StepExecution {
        StepExecution::new(JobExecutionId::new(), "test-step")
    }

    type IntChunks<'a> = ChunkProcessor<'a, i32, i32>;

    #[derive(Default)]
    struct VecWriter(Mutex<Vec<i32>>);

    impl VecWriter {
        fn written(&self) -> Vec<i32> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Writer<i32> for VecWriter {
        fn write(&self, items: &[i32]) -> Result<(), ItemError> {
            self.0.lock().unwrap().extend_from_slice(items);
            Ok(())
        }
    }

    #[test]
    fn processes_in_chunks_of_configured_size() {
        let writer = VecWriter::default();
        let mut reader = ListReader::new(1..=7);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let mut processor = IntChunks::new(
            &mut reader,
            &PassThroughProcessor,
            &writer,
            3,
            &NeverSkipPolicy,
            &retry,
        );
        processor.run(&mut step).unwrap();

        assert_eq!(processor.state(), ChunkState::Committed);
        assert_eq!(writer.written(), vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(step.read_count, 7);
        assert_eq!(step.write_count, 7);
        assert_eq!(step.commit_count, 3);
        assert_eq!(step.rollback_count, 0);
    }

    #[test]
    fn empty_input_commits_nothing() {
        let writer = crate::item::NoopWriter;
        let mut reader = ListReader::<i32>::new([]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &NeverSkipPolicy, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(step.commit_count, 0);
        assert_eq!(step.read_count, 0);
    }

    #[test]
    fn read_skips_do_not_count_toward_chunk_size() {
        let writer = VecWriter::default();
        let mut reader = ScriptedReader {
            script: vec![
                Ok(Some(1)),
                Err(ItemError::parse(Some(2), "x", "bad")),
                Ok(Some(3)),
            ],
        };
        let skip = LimitCheckingSkipPolicy::new(10, [ErrorKind::Parse]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let mut processor =
            IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 2, &skip, &retry);
        let first = processor.process_chunk(&mut step).unwrap();

        assert_eq!(first.contribution.read, 3);
        assert_eq!(first.contribution.read_skip, 1);
        assert_eq!(first.contribution.write, 2);
        assert!(!first.exhausted);
        assert_eq!(writer.written(), vec![1, 3]);
    }

    #[test]
    fn filtered_items_are_not_written_or_skipped() {
        let writer = VecWriter::default();
        let odd_only = FnProcessor::new(|n: &i32| Ok((n % 2 == 1).then_some(*n)));
        let mut reader = ListReader::new(1..=6);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        IntChunks::new(&mut reader, &odd_only, &writer, 4, &NeverSkipPolicy, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(step.filter_count, 3);
        assert_eq!(step.write_count, 3);
        assert_eq!(step.skip_count(), 0);
        assert_eq!(step.read_count, step.write_count + step.filter_count + step.skip_count());
    }

    #[test]
    fn skip_limit_is_shared_and_failure_rolls_back_chunk() {
        let writer = crate::item::NoopWriter;
        let mut reader = ScriptedReader {
            script: vec![
                Err(ItemError::parse(Some(1), "a", "bad")),
                Ok(Some(2)),
                Ok(Some(3)),
            ],
        };
        let reject_three = FnProcessor::new(|n: &i32| {
            if *n == 3 {
                Err(ItemError::permanent("three"))
            } else {
                Ok(Some(*n))
            }
        });
        let skip = LimitCheckingSkipPolicy::new(1, [ErrorKind::Parse, ErrorKind::Permanent]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let mut processor = IntChunks::new(&mut reader, &reject_three, &writer, 10, &skip, &retry);
        let err = processor.run(&mut step).unwrap_err();

        assert_eq!(err, ItemError::permanent("three"));
        assert_eq!(processor.state(), ChunkState::Failed);
        assert_eq!(step.rollback_count, 1);
        assert_eq!(step.commit_count, 0);
        assert_eq!(step.read_count, 0);
        assert_eq!(step.skip_count(), 0);
    }

    #[test]
    fn transient_failures_within_retry_limit_succeed() {
        let failures_left = AtomicUsize::new(2);
        let flaky = FnProcessor::new(|n: &i32| {
            if failures_left.load(Ordering::SeqCst) > 0 {
                failures_left.fetch_sub(1, Ordering::SeqCst);
                Err(ItemError::transient("timeout"))
            } else {
                Ok(Some(*n))
            }
        });
        let writer = VecWriter::default();
        let mut reader = ListReader::new([42]);
        let retry = RetryPolicy::fixed(2, Duration::ZERO);
        let mut step = step();

        IntChunks::new(&mut reader, &flaky, &writer, 10, &NeverSkipPolicy, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(step.retry_count, 2);
        assert_eq!(writer.written(), vec![42]);
    }

    #[test]
    fn exhausted_retries_go_to_skip_policy() {
        let always_flaky = FnProcessor::new(|_: &i32| -> Result<Option<i32>, ItemError> {
            Err(ItemError::transient("timeout"))
        });
        let writer = crate::item::NoopWriter;
        let mut reader = ListReader::new([1, 2]);
        let retry = RetryPolicy::fixed(1, Duration::ZERO);
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Transient]);
        let mut step = step();

        IntChunks::new(&mut reader, &always_flaky, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(step.retry_count, 2);
        assert_eq!(step.process_skip_count, 2);
        assert_eq!(step.write_count, 0);
    }

    #[test]
    fn write_failure_naming_items_skips_them_and_rewrites_the_rest() {
        let calls = AtomicUsize::new(0);
        let sink = Mutex::new(Vec::new());
        let writer = FnWriter::new(|items: &[i32]| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(bad) = items.iter().position(|n| *n < 0) {
                return Err(ItemError::write_items("negative", vec![bad]));
            }
            sink.lock().unwrap().extend_from_slice(items);
            Ok(())
        });
        let mut reader = ListReader::new([1, -2, 3]);
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Write]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*sink.lock().unwrap(), vec![1, 3]);
        assert_eq!(step.write_count, 2);
        assert_eq!(step.write_skip_count, 1);
        assert_eq!(step.read_count, 3);
    }

    #[test]
    fn writer_naming_one_bad_item_per_call_gets_every_bad_item_skipped() {
        let calls = AtomicUsize::new(0);
        let sink = Mutex::new(Vec::new());
        let writer = FnWriter::new(|items: &[i32]| {
            calls.fetch_add(1, Ordering::SeqCst);
            if let Some(bad) = items.iter().position(|n| *n < 0) {
                return Err(ItemError::write_items("negative", vec![bad]));
            }
            sink.lock().unwrap().extend_from_slice(items);
            Ok(())
        });
        let mut reader = ListReader::new([1, -2, -3, 4]);
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Write]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*sink.lock().unwrap(), vec![1, 4]);
        assert_eq!(step.write_skip_count, 2);
        assert_eq!(step.write_count, 2);
        assert_eq!(step.commit_count, 1);
    }

    #[test]
    fn repeated_write_skips_still_respect_the_limit() {
        let writer = FnWriter::new(|items: &[i32]| match items.iter().position(|n| *n < 0) {
            Some(bad) => Err(ItemError::write_items("negative", vec![bad])),
            None => Ok(()),
        });
        let mut reader = ListReader::new([-1, -2, 3]);
        let skip = LimitCheckingSkipPolicy::new(1, [ErrorKind::Write]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let err = IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(step.rollback_count, 1);
        assert_eq!(step.write_skip_count, 0);
        assert_eq!(step.write_count, 0);
    }

    #[test]
    fn out_of_range_write_indices_fail_the_chunk() {
        let writer = FnWriter::new(|_: &[i32]| Err(ItemError::write_items("bad index", vec![9])));
        let mut reader = ListReader::new([1, 2]);
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Write]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let err = IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(step.rollback_count, 1);
    }

    #[test]
    fn whole_batch_write_failure_fails_chunk() {
        let writer = FnWriter::new(|_: &[i32]| Err(ItemError::write("disk full")));
        let mut reader = ListReader::new([1, 2]);
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Write]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        let err = IntChunks::new(&mut reader, &PassThroughProcessor, &writer, 10, &skip, &retry)
            .run(&mut step)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Write);
        assert_eq!(step.rollback_count, 1);
        assert_eq!(step.write_count, 0);
    }

    #[test]
    fn skip_listeners_are_notified() {
        #[derive(Default)]
        struct Counting {
            read: AtomicUsize,
            process: AtomicUsize,
        }

        impl SkipListener<i32, i32> for Counting {
            fn on_skip_in_read(&self, _error: &ItemError) {
                self.read.fetch_add(1, Ordering::SeqCst);
            }

            fn on_skip_in_process(&self, _item: &i32, _error: &ItemError) {
                self.process.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counting = Arc::new(Counting::default());
        let listeners: Vec<Arc<dyn SkipListener<i32, i32>>> = vec![counting.clone()];
        let mut reader = ScriptedReader {
            script: vec![Err(ItemError::parse(None, "", "bad")), Ok(Some(-1)), Ok(Some(1))],
        };
        let positive = FnProcessor::new(|n: &i32| {
            if *n < 0 {
                Err(ItemError::permanent("negative"))
            } else {
                Ok(Some(*n))
            }
        });
        let skip = LimitCheckingSkipPolicy::new(5, [ErrorKind::Parse, ErrorKind::Permanent]);
        let retry = RetryPolicy::no_retry();
        let mut step = step();

        IntChunks::new(&mut reader, &positive, &crate::item::NoopWriter, 10, &skip, &retry)
            .with_listeners(&listeners)
            .run(&mut step)
            .unwrap();

        assert_eq!(counting.read.load(Ordering::SeqCst), 1);
        assert_eq!(counting.process.load(Ordering::SeqCst), 1);
    }
}
