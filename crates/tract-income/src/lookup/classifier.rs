use std::sync::Arc;

use super::geography::TractId;
use super::reference::{IncomeLevel, ReferenceTable};

/// The tract is outside the reference table's coverage. Not a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Tract not present in FFIEC reference file")]
pub struct TractNotFound {
    pub tract_id: TractId,
}

/// Exact-match lookup of a tract's official income level.
#[derive(Debug, Clone)]
pub struct TractClassifier {
    table: Arc<ReferenceTable>,
}

impl TractClassifier {
    pub fn new(table: Arc<ReferenceTable>) -> Self {
        Self { table }
    }

    pub fn classify(&self, tract_id: &TractId) -> Result<IncomeLevel, TractNotFound> {
        self.table.get(tract_id).ok_or_else(|| TractNotFound {
            tract_id: tract_id.clone(),
        })
    }

    pub fn source(&self) -> &str {
        self.table.source()
    }
}
