//! Boundary shims between host error signalling and engine error values.
//!
//! Host calls made by the bridge go through [`host_guard`], which copies the
//! host error into a [`BridgeError`] and leaves the host error state empty.
//! Engine calls made on behalf of the host go through [`engine_guard`], which
//! turns engine errors and panics back into a single [`HostError`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use datafusion::common::{DataFusionError, Result as DFResult};
use futures_util::FutureExt;
use heap_store::{HeapAccess, HostError};
use tracing::{debug, warn};

use crate::error::BridgeError;

/// Runs one host primitive, converting a raised error into
/// [`BridgeError::HostSignal`].
///
/// The host error state is flushed before returning so no error stays pending
/// while control is back in the engine.
pub fn host_guard<T>(
    host: &dyn HeapAccess,
    function: &'static str,
    call: impl FnOnce() -> Result<T, HostError>,
) -> Result<T, BridgeError> {
    match call() {
        Ok(value) => Ok(value),
        Err(err) => {
            // Decision: flush on the calling thread before the error leaves the host.
            host.flush_error_state();
            debug!(
                function,
                sqlstate = err.sqlstate.as_str(),
                message = err.message.as_str(),
                "host call raised"
            );
            Err(BridgeError::HostSignal {
                function,
                sqlstate: err.sqlstate,
                message: err.message,
            })
        }
    }
}

/// Awaits an engine operation on behalf of the host.
///
/// Errors and panics are re-signalled as one [`HostError`]. A host signal
/// carried through the engine keeps its SQLSTATE; anything else becomes
/// `XX000` with a `(HeapFusion/<name>)` prefix.
pub async fn engine_guard<T, F>(name: &str, fut: F) -> Result<T, HostError>
where
    F: Future<Output = DFResult<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(engine_error_to_host(name, err)),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!(function = name, message = message.as_str(), "engine panicked");
            Err(HostError::internal(format!("(HeapFusion/{name}) {message}")))
        }
    }
}

/// Maps an engine error to the host error it should surface as.
pub fn engine_error_to_host(name: &str, err: DataFusionError) -> HostError {
    if let Some(bridge) = BridgeError::find_in(&err) {
        return bridge.clone().into_host_error(name);
    }
    HostError::internal(format!("(HeapFusion/{name}) {err}"))
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heap_store::error::SQLSTATE_QUERY_CANCELED;
    use heap_store::{HeapStore, RelationId};

    #[test]
    fn host_guard_flushes_error_state() {
        let store = HeapStore::default();
        let err = host_guard(&store, "relation_descriptor", || {
            store.relation_descriptor(RelationId(9999))
        })
        .expect_err("missing relation");
        assert!(matches!(
            err,
            BridgeError::HostSignal {
                function: "relation_descriptor",
                ..
            }
        ));
        assert_eq!(store.error_state_depth(), 0);
    }

    #[tokio::test]
    async fn engine_guard_keeps_cancellation_sqlstate() {
        let err = engine_guard::<(), _>("collect", async {
            Err(DataFusionError::from(BridgeError::HostSignal {
                function: "next_tuple",
                sqlstate: SQLSTATE_QUERY_CANCELED.to_string(),
                message: "canceling statement due to user request".to_string(),
            })
            .context("heap scan"))
        })
        .await
        .expect_err("canceled");
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn engine_guard_tags_plain_errors_and_panics() {
        let err = engine_guard::<(), _>("plan", async {
            Err(DataFusionError::Plan("no such column".into()))
        })
        .await
        .expect_err("plan error");
        assert_eq!(err.sqlstate, "XX000");
        assert!(err.message.starts_with("(HeapFusion/plan)"));

        let err = engine_guard::<(), _>("execute", async { panic!("boom") })
            .await
            .expect_err("panic");
        assert_eq!(err.message, "(HeapFusion/execute) boom");
    }
}
