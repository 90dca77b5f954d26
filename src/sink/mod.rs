//! Record sinks fed from hub subscriptions.

mod jsonl;

pub use jsonl::JsonlSink;
