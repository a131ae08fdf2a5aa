//! Structured logging setup via `tracing`/`tracing-subscriber`.
//!
//! Out of scope for the core decision pipeline (an external collaborator
//! per the specification), but every agent emits `tracing` events, so the
//! binary still wires up a subscriber: JSON output, `RUST_LOG`-controlled
//! level, stdout sink.

use std::error::Error;

use tracing_subscriber::{fmt, EnvFilter};

pub fn init_subscriber() -> Result<(), Box<dyn Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().json().with_env_filter(filter).try_init()?;
    Ok(())
}
