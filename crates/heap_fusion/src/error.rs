//! Error taxonomy of the scan bridge.

use std::fmt;

use datafusion::arrow::error::ArrowError;
use datafusion::common::DataFusionError;
use heap_store::HostError;

/// Failure raised while bridging heap rows and Arrow batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// A row-store or Arrow type has no counterpart on the other side.
    UnsupportedType { type_name: String },
    /// A value could not be represented in the target type.
    Conversion { column: String, message: String },
    /// The host raised an error (or a cancellation) inside a call made by the
    /// bridge. The host's own SQLSTATE and message are preserved.
    HostSignal {
        function: &'static str,
        sqlstate: String,
        message: String,
    },
    /// Arrow or DataFusion rejected a batch under construction.
    Engine { message: String },
    /// Metadata or invariant violation.
    Internal { message: String },
}

impl BridgeError {
    pub fn unsupported(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    pub fn conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn engine(err: impl fmt::Display) -> Self {
        Self::Engine {
            message: err.to_string(),
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::HostSignal { sqlstate, .. } if sqlstate == heap_store::error::SQLSTATE_QUERY_CANCELED)
    }

    /// Finds a bridge error carried inside a DataFusion error chain.
    ///
    /// Operators that re-wrap stream errors through Arrow are followed too:
    /// `ArrowError::ExternalError` payloads are searched as bridge, DataFusion
    /// or Arrow errors.
    pub fn find_in(err: &DataFusionError) -> Option<&BridgeError> {
        match err {
            DataFusionError::External(inner) => Self::find_in_external(inner.as_ref()),
            DataFusionError::ArrowError(inner, _) => Self::find_in_arrow(inner),
            DataFusionError::Context(_, inner) => Self::find_in(inner),
            DataFusionError::Shared(inner) => Self::find_in(inner),
            _ => None,
        }
    }

    fn find_in_arrow(err: &ArrowError) -> Option<&BridgeError> {
        match err {
            ArrowError::ExternalError(inner) => Self::find_in_external(inner.as_ref()),
            _ => None,
        }
    }

    fn find_in_external<'a>(
        err: &'a (dyn std::error::Error + Send + Sync + 'static),
    ) -> Option<&'a BridgeError> {
        if let Some(bridge) = err.downcast_ref::<BridgeError>() {
            return Some(bridge);
        }
        if let Some(inner) = err.downcast_ref::<DataFusionError>() {
            return Self::find_in(inner);
        }
        err.downcast_ref::<ArrowError>().and_then(Self::find_in_arrow)
    }

    /// Re-signals this error through the host's error mechanism.
    ///
    /// Host signals keep their original SQLSTATE so cancellations stay
    /// cancellations; everything else becomes an internal error tagged with
    /// the failing bridge function.
    pub fn into_host_error(self, function: &str) -> HostError {
        match self {
            Self::HostSignal {
                sqlstate, message, ..
            } => HostError::new(&sqlstate, message),
            other => HostError::internal(format!("(HeapFusion/{function}) {other}")),
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedType { type_name } => write!(f, "unsupported type: {type_name}"),
            Self::Conversion { column, message } => {
                write!(f, "cannot convert value of column \"{column}\": {message}")
            }
            Self::HostSignal {
                function,
                sqlstate,
                message,
            } => write!(f, "{message} (SQLSTATE {sqlstate}, in {function})"),
            Self::Engine { message } => write!(f, "columnar engine error: {message}"),
            Self::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<BridgeError> for DataFusionError {
    fn from(err: BridgeError) -> Self {
        DataFusionError::External(Box::new(err))
    }
}

impl From<ArrowError> for BridgeError {
    fn from(err: ArrowError) -> Self {
        Self::engine(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn bridge_error_survives_datafusion_wrapping() {
        let err: DataFusionError = BridgeError::conversion("d", "date out of range").into();
        let wrapped = DataFusionError::Shared(Arc::new(err.context("scan heap")));
        assert_eq!(
            BridgeError::find_in(&wrapped),
            Some(&BridgeError::conversion("d", "date out of range"))
        );
    }

    #[test]
    fn bridge_error_survives_arrow_rewrapping() {
        let cancel = BridgeError::HostSignal {
            function: "next_tuple",
            sqlstate: "57014".into(),
            message: "canceling statement due to user request".into(),
        };
        let direct = DataFusionError::ArrowError(
            Box::new(ArrowError::ExternalError(Box::new(cancel.clone()))),
            None,
        );
        assert_eq!(BridgeError::find_in(&direct), Some(&cancel));

        let through_datafusion = DataFusionError::ArrowError(
            Box::new(ArrowError::ExternalError(Box::new(DataFusionError::from(
                cancel.clone(),
            )))),
            None,
        )
        .context("sort spill");
        let found = BridgeError::find_in(&through_datafusion).expect("found");
        assert!(found.is_cancellation());
        assert!(found.clone().into_host_error("run_query").is_cancellation());

        let plain = DataFusionError::ArrowError(
            Box::new(ArrowError::ComputeError("overflow".into())),
            None,
        );
        assert_eq!(BridgeError::find_in(&plain), None);
    }

    #[test]
    fn host_signal_keeps_sqlstate_when_reraised() {
        let err = BridgeError::HostSignal {
            function: "next_tuple",
            sqlstate: "57014".into(),
            message: "canceling statement due to user request".into(),
        };
        assert!(err.is_cancellation());
        let host = err.into_host_error("run_query");
        assert!(host.is_cancellation());
        assert_eq!(host.message, "canceling statement due to user request");

        let host = BridgeError::unsupported("point").into_host_error("run_query");
        assert_eq!(host.sqlstate, "XX000");
        assert!(host.message.starts_with("(HeapFusion/run_query)"));
    }
}
