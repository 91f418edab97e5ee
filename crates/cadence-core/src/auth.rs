//! Caller identity and the single ownership rule every guarded operation uses.

use serde::{Deserialize, Serialize};

use crate::error::{CadenceError, Result};

/// Identity of the system owner of the built-in scheduled job.
pub const SYSTEM_OWNER_ID: &str = "system";

/// An authenticated caller, as resolved by the transport's auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    /// Display name of the credential that produced this identity.
    #[serde(default)]
    pub name: String,
}

impl Caller {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
        }
    }

    pub fn system() -> Self {
        Self::new(SYSTEM_OWNER_ID)
    }
}

/// Reject unless `caller` owns the resource owned by `owner_id`.
pub fn ensure_owner(caller: &Caller, owner_id: &str) -> Result<()> {
    if caller.id.is_empty() {
        return Err(CadenceError::Unauthenticated);
    }
    if caller.id != owner_id {
        return Err(CadenceError::Forbidden);
    }
    Ok(())
}
