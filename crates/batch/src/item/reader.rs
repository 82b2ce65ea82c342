use std::collections::VecDeque;

use crate::error::ItemError;

/// Source of items for a chunk step.
///
/// `Ok(None)` signals end-of-stream. A reader is created per step execution by
/// the step's reader factory, so it may hold cursor state freely.
pub trait Reader<T> {
    fn read(&mut self) -> Result<Option<T>, ItemError>;
}

impl<T, R> Reader<T> for Box<R>
where
    R: Reader<T> + ?Sized,
{
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        (**self).read()
    }
}

/// Reads from a fixed in-memory sequence.
#[derive(Debug, Clone)]
pub struct ListReader<T> {
    items: VecDeque<T>,
}

impl<T> ListReader<T> {
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }
}

impl<T> Reader<T> for ListReader<T> {
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        Ok(self.items.pop_front())
    }
}

/// Reads from a list that is only fetched on the first `read()`.
///
/// Useful when the list is produced by an earlier step of the same job: the
/// supplier runs when this step starts reading, not when the job is defined.
pub struct DeferredListReader<T, F>
where
    F: FnOnce() -> Vec<T>,
{
    supplier: Option<F>,
    items: VecDeque<T>,
}

impl<T, F> DeferredListReader<T, F>
where
    F: FnOnce() -> Vec<T>,
{
    pub fn new(supplier: F) -> Self {
        Self {
            supplier: Some(supplier),
            items: VecDeque::new(),
        }
    }
}

impl<T, F> Reader<T> for DeferredListReader<T, F>
where
    F: FnOnce() -> Vec<T>,
{
    fn read(&mut self) -> Result<Option<T>, ItemError> {
        if let Some(supplier) = self.supplier.take() {
            self.items = supplier().into();
        }
        Ok(self.items.pop_front())
    }
}
