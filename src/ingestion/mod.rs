pub mod rest;
pub mod session;
pub mod stream;
pub mod validation;

pub use stream::{build_stream_chunks, run_liquidation_session, run_stream_session, IngestionContext};
