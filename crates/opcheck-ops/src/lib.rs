//! Operator builders, shape/dtype validation and target dtype fallback.
//!
//! Every builder is a single entry function that runs all validation first and
//! only then records nodes, so a rejected call never leaves a partial graph
//! behind.

pub mod approximate_equal;
pub mod cross_entropy;
pub mod dtype;
pub mod fallback;
pub mod minimum;
pub mod reduce_or;
pub mod validate;

pub use approximate_equal::approximate_equal;
pub use cross_entropy::cross_entropy_loss;
pub use dtype::DTypeSet;
pub use fallback::{Capabilities, Target, narrow_for_select};
pub use minimum::minimum;
pub use reduce_or::reduce_or;
