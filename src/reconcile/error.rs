use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that abort a whole run. Everything per row or per item is
/// recorded in the run report instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to load {category} from the remote service: {source}")]
    CacheLoad {
        category: &'static str,
        #[source]
        source: GatewayError,
    },
    #[error("Failed to ensure management label '{tag}': {source}")]
    ManagementLabel {
        tag: String,
        #[source]
        source: GatewayError,
    },
}
