//! Item pipeline primitives consumed by the chunk processor.
//!
//! - `Reader`: produces items one at a time until end-of-stream
//! - `Processor`: transforms one item, or filters it out
//! - `Writer`: consumes a whole chunk of processed items in one call

pub mod file;
pub mod processor;
pub mod reader;
pub mod writer;

pub use file::{DelimitedLineTokenizer, FieldSet, FlatFileReader};
pub use processor::{FnProcessor, PassThroughProcessor, Processor};
pub use reader::{DeferredListReader, ListReader, Reader};
pub use writer::{FnWriter, NoopWriter, Writer};
