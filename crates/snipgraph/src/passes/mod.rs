//! Concrete transformations run by the pass manager.

mod constant_folding;
mod fc_bias_fusion;
mod reshape_canonicalization;
mod transpose_canonicalization;
mod unique_decomposition;

use tracing::debug;

use crate::error::GraphError;

pub use constant_folding::ConstantFoldingPass;
pub use fc_bias_fusion::{FullyConnectedBiasFusion, QuantizedFullyConnectedBiasFusion};
pub use reshape_canonicalization::{
    CollapseReshapeChain, EliminateIdentityReshape, ReshapeCanonicalizationPass,
};
pub use transpose_canonicalization::{
    CollapseTransposeChain, EliminateIdentityTranspose, TransposeCanonicalizationPass,
};
pub use unique_decomposition::UniqueDecomposition;

/// Staging errors reject the rewrite; the graph has not been touched at that point.
fn accept(pass: &'static str, outcome: Result<bool, GraphError>) -> bool {
    match outcome {
        Ok(accepted) => accepted,
        Err(err) => {
            debug!(pass, error = %err, "rewrite rejected while staging");
            false
        }
    }
}
