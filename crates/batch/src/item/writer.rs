use std::marker::PhantomData;

use crate::error::ItemError;

/// Consumes one chunk of processed items.
///
/// The whole slice is one unit: returning an error fails the chunk unless the
/// error is `ItemError::Write` naming the offending indices. Writers are
/// shared across executions (and threads), so sinks use interior mutability
/// and must tolerate being handed items a previous, stopped execution already
/// wrote.
pub trait Writer<R>: Send + Sync {
    fn write(&self, items: &[R]) -> Result<(), ItemError>;
}

/// Adapts a closure into a [`Writer`].
pub struct FnWriter<F, R> {
    f: F,
    _types: PhantomData<fn(&[R])>,
}

impl<F, R> FnWriter<F, R>
where
    F: Fn(&[R]) -> Result<(), ItemError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _types: PhantomData,
        }
    }
}

impl<F, R> Writer<R> for FnWriter<F, R>
where
    F: Fn(&[R]) -> Result<(), ItemError> + Send + Sync,
{
    fn write(&self, items: &[R]) -> Result<(), ItemError> {
        (self.f)(items)
    }
}

/// Discards everything. For steps whose side effect happens in the processor.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriter;

impl<R> Writer<R> for NoopWriter {
    fn write(&self, _items: &[R]) -> Result<(), ItemError> {
        Ok(())
    }
}
