//! Static checks over a [`ModuleImage`]
//!
//! Every check runs independently; all violations are accumulated into one
//! sorted, deduplicated [`Violations`] set so a single CREATE reports every
//! problem at once.

use crate::image::{Instruction, ModuleImage, RoutineRole};
use ferrule_core::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use tracing::debug;

/// Owner of the root object methods that must never be called
pub const OBJECT_OWNER: &str = "core.Object";

static OBJECT_METHODS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["clone", "finalize", "wait", "notify", "notifyAll"].into_iter().collect());

/// Raw memory and network primitives, matched on `owner.name`
static RESOURCE_PRIMITIVES: &[&str] = &["core.Buffer.allocateDirect", "net."];

/// Sorted, deduplicated verifier messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Violations(BTreeSet<String>);

impl Violations {
    /// True when the image passed every check
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of distinct violations
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if `message` was reported
    pub fn contains(&self, message: &str) -> bool {
        self.0.contains(message)
    }

    /// Messages in sorted order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Consume into a sorted vector
    pub fn into_vec(self) -> Vec<String> {
        self.0.into_iter().collect()
    }

    fn add(&mut self, message: String) {
        self.0.insert(message);
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(v)?;
        }
        f.write_str("]")
    }
}

/// Static verifier
///
/// Holds the list of disallowed call prefixes: the runtime's own list plus
/// whatever the operator configured.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    disallowed: Vec<String>,
}

impl Verifier {
    /// Create a verifier rejecting calls under any of `prefixes`
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            disallowed: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    /// Copy of this verifier with additional disallowed prefixes
    pub fn extended<I, S>(&self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut disallowed = self.disallowed.clone();
        disallowed.extend(prefixes.into_iter().map(Into::into));
        Self { disallowed }
    }

    /// Disallowed call prefixes
    pub fn disallowed_prefixes(&self) -> &[String] {
        &self.disallowed
    }

    /// Run every check over `image`
    pub fn verify(&self, image: &ModuleImage) -> Violations {
        let mut violations = Violations::default();

        for field in &image.fields {
            violations.add(format!("field declared: {}", field));
        }
        if !image.nested_units.is_empty() {
            violations.add("class declared as inner class".to_string());
        }

        for routine in &image.routines {
            match routine.role {
                RoutineRole::Initializer => violations.add("initializer declared".to_string()),
                RoutineRole::StaticInitializer => {
                    violations.add("static initializer declared".to_string())
                }
                RoutineRole::Entry | RoutineRole::Helper => {}
            }
            for instruction in &routine.instructions {
                match instruction {
                    Instruction::MonitorEnter | Instruction::MonitorExit => {
                        violations.add("use of synchronized".to_string())
                    }
                    Instruction::Invoke(site) => {
                        let qualified = site.qualified();
                        let forbidden = (site.owner == OBJECT_OWNER
                            && OBJECT_METHODS.contains(site.name.as_str()))
                            || RESOURCE_PRIMITIVES.iter().any(|p| qualified.starts_with(p))
                            || self.disallowed.iter().any(|p| qualified.starts_with(p.as_str()));
                        if forbidden {
                            violations.add(format!("call to {}", site));
                        }
                    }
                    Instruction::Other => {}
                }
            }
        }

        if !violations.is_empty() {
            debug!(
                target: "ferrule::verifier",
                module = %image.name,
                count = violations.len(),
                "Verification found violations"
            );
        }
        violations
    }

    /// Verify and turn violations into `Error::VerificationFailure`
    ///
    /// # Errors
    ///
    /// Returns `VerificationFailure` carrying every violation when any check fails.
    pub fn check(&self, language: &str, image: &ModuleImage) -> Result<()> {
        let violations = self.verify(image);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::VerificationFailure {
                language: language.to_string(),
                violations: violations.into_vec(),
            })
        }
    }
}
