//! Dtype sets accepted by the operator builders.

use opcheck_core::DType;

/// A fixed set of dtypes an operator accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DTypeSet(&'static [DType]);

impl DTypeSet {
    /// float16 and float32.
    pub const ALL_FLOAT: DTypeSet = DTypeSet(&[DType::F16, DType::F32]);
    pub const BOOL: DTypeSet = DTypeSet(&[DType::Bool]);

    pub const fn new(dtypes: &'static [DType]) -> Self {
        Self(dtypes)
    }

    pub fn contains(self, dtype: DType) -> bool {
        self.0.contains(&dtype)
    }

    pub fn dtypes(self) -> &'static [DType] {
        self.0
    }
}

impl std::fmt::Display for DTypeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}
