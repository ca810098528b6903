//! Permission grant model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// (module, grantee, active) row of a module's access-control list.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Grant {
    pub module: String,
    pub grantee: String,
    pub active: bool,
}
