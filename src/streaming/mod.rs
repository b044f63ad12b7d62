//! Streaming data delivery: one-shot request/response is `Transport::call`;
//! everything that yields more than one value lives here instead.

pub mod sse;
pub mod subscription;
