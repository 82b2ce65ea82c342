use std::marker::PhantomData;

use crate::error::ItemError;

/// Transforms one read item.
///
/// `Ok(None)` filters the item out: it is not written and does not count as
/// a skip. Processors are shared across executions and must not keep per-run
/// state; the chunk processor may call `process` several times for the same
/// item when retrying.
pub trait Processor<T, R>: Send + Sync {
    fn process(&self, item: &T) -> Result<Option<R>, ItemError>;
}

/// Adapts a closure into a [`Processor`].
pub struct FnProcessor<F, T, R> {
    f: F,
    _types: PhantomData<fn(&T) -> R>,
}

impl<F, T, R> FnProcessor<F, T, R>
where
    F: Fn(&T) -> Result<Option<R>, ItemError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, T, R> Processor<T, R> for FnProcessor<F, T, R>
where
    F: Fn(&T) -> Result<Option<R>, ItemError> + Send + Sync,
{
    fn process(&self, item: &T) -> Result<Option<R>, ItemError> {
        (self.f)(item)
    }
}

/// Passes every item through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughProcessor;

impl<T: Clone> Processor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> Result<Option<T>, ItemError> {
        Ok(Some(item.clone()))
    }
}
