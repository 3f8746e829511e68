//! Structured operation events
//!
//! Every facade operation emits one completion event with a fixed field set
//! (engine, operation, entity, duration, outcome). Fire-and-forget log
//! emission through `tracing`; not part of the data contract.

use std::time::Instant;

use crate::config::EngineKind;
use crate::error::UdomError;

pub(crate) fn emit<T>(
    engine: EngineKind,
    operation: &str,
    entity: &str,
    started: Instant,
    outcome: &Result<T, UdomError>,
) {
    let elapsed_ms = started.elapsed().as_micros() as f64 / 1000.0;
    match outcome {
        Ok(_) => {
            tracing::info!(
                engine = %engine,
                operation,
                entity,
                elapsed_ms,
                outcome = "ok",
                "operation completed"
            );
        }
        Err(err) => {
            tracing::warn!(
                engine = %engine,
                operation,
                entity,
                elapsed_ms,
                outcome = "error",
                error = %err,
                "operation failed"
            );
        }
    }
}
