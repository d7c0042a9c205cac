//! Permissions that can be granted on function resources

use ferrule_core::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A grantable permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    /// Create functions and aggregates
    Create,
    /// Replace an existing function or aggregate
    Alter,
    /// Drop a function or aggregate
    Drop,
    /// Grant and revoke permissions
    Authorize,
    /// Call a function or aggregate
    Execute,
}

impl Permission {
    /// Every permission, in declaration order
    pub const ALL: [Permission; 5] = [
        Permission::Create,
        Permission::Alter,
        Permission::Drop,
        Permission::Authorize,
        Permission::Execute,
    ];

    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Create => "CREATE",
            Permission::Alter => "ALTER",
            Permission::Drop => "DROP",
            Permission::Authorize => "AUTHORIZE",
            Permission::Execute => "EXECUTE",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Config(format!("unknown permission '{}'", s)))
    }
}
