pub mod element;
pub mod line_cache;
pub mod resolver;

pub use element::{trace_size, StackTraceElement};
pub use line_cache::{Fragment, LineCache, SourceProvider};
pub use resolver::{TraceResolver, MAX_TRACE_DEPTH};
