//! Panic containment for pluggable callbacks.
//!
//! Every handler, hook, extractor and validator supplied by users is run
//! through [`invoke`] or [`invoke_sync`]. A panic is converted into
//! [`GatewayError::Panic`] carrying the panic payload's message, so the
//! dispatcher can substitute the stage's fallback response.
use std::{
    any::Any,
    future::Future,
    panic::{self, AssertUnwindSafe},
};

use futures_util::FutureExt;
use tracing::error;

use crate::ports::handler::{GatewayError, Stage};

/// Await `future`, converting a panic raised while polling it into an error.
pub async fn invoke<F, T>(stage: Stage, future: F) -> Result<T, GatewayError>
where
    F: Future<Output = T>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|payload| panicked(stage, &*payload))
}

/// Call `f`, converting a panic into an error.
pub fn invoke_sync<F, T>(stage: Stage, f: F) -> Result<T, GatewayError>
where
    F: FnOnce() -> T,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panicked(stage, &*payload))
}

/// Build the error for a panic payload caught in `stage`.
pub fn panicked(stage: Stage, payload: &(dyn Any + Send)) -> GatewayError {
    let message = panic_message(payload);
    error!(stage = %stage, panic = %message, "recovered from panic in callback");
    GatewayError::Panic { stage, message }
}

/// Best-effort text of a panic payload. `panic!` produces `&str` or `String`;
/// `std::panic::panic_any` may carry anything, including error values.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(e) = payload.downcast_ref::<GatewayError>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>() {
        e.to_string()
    } else if let Some(e) = payload.downcast_ref::<std::io::Error>() {
        e.to_string()
    } else {
        "panic with a non-string payload".to_string()
    }
}
