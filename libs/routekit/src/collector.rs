//! Candidate collection: explicit controllers plus package-scan results,
//! minus exclusions.

use std::any::TypeId;
use std::collections::HashSet;

use regex::Regex;
use thiserror::Error;

use crate::contracts::{Controller, ControllerRef};

/// Link-time registration submitted by `#[controller]`.
pub struct ControllerRegistration(pub fn() -> ControllerRef);

inventory::collect!(ControllerRegistration);

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("invalid package pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("package scan for '{pattern}' failed: {message}")]
    Unavailable { pattern: String, message: String },
}

/// Finds controllers whose qualified path matches a package pattern.
pub trait ControllerScanner: Send + Sync {
    fn find(&self, pattern: &str) -> Result<Vec<ControllerRef>, ScanError>;
}

/// Scans controllers registered through `inventory`.
///
/// Patterns are regular expressions anchored at the start of the qualified
/// path, so `my_app::web` matches `my_app::web::UsersController` and
/// `my_app::web::admin::AuditController`. Only controllers with at least one
/// handler-bearing method are returned, ordered by qualified path.
#[derive(Debug, Default, Clone, Copy)]
pub struct InventoryScanner;

impl ControllerScanner for InventoryScanner {
    fn find(&self, pattern: &str) -> Result<Vec<ControllerRef>, ScanError> {
        let re = Regex::new(&format!("^(?:{pattern})")).map_err(|source| {
            ScanError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;
        let mut found: Vec<ControllerRef> = inventory::iter::<ControllerRegistration>
            .into_iter()
            .map(|reg| (reg.0)())
            .filter(|c| re.is_match(c.qualified_name()))
            .filter(|c| c.describe_routes().iter().any(|m| m.annotations.is_route()))
            .collect();
        found.sort_by(|a, b| a.qualified_name().cmp(b.qualified_name()));
        Ok(found)
    }
}

/// Controllers that must never be resolved, by type or by name.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    types: HashSet<TypeId>,
    names: HashSet<String>,
}

impl Exclusions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: Controller>(&mut self) {
        self.types.insert(TypeId::of::<T>());
    }

    pub fn add_ref(&mut self, controller: &ControllerRef) {
        self.types.insert(controller.type_id());
    }

    /// Qualified (`my_app::web::UsersController`) or short (`UsersController`) name.
    pub fn add_name(&mut self, name: impl Into<String>) {
        self.names.insert(name.into());
    }

    pub fn contains(&self, controller: &ControllerRef) -> bool {
        self.types.contains(&controller.type_id())
            || self.names.contains(controller.qualified_name())
            || self.names.contains(controller.type_name())
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.names.is_empty()
    }
}

/// Explicit controllers first (insertion order), then scan results (pattern
/// order, then scanner order). First occurrence wins; exclusions are applied
/// last. A pattern the scanner cannot handle is skipped with a warning.
pub fn collect(
    explicit: &[ControllerRef],
    excluded: &Exclusions,
    patterns: &[String],
    scanner: &dyn ControllerScanner,
) -> Vec<ControllerRef> {
    let mut seen: HashSet<TypeId> = HashSet::new();
    let mut out = Vec::new();

    let mut push = |c: ControllerRef, out: &mut Vec<ControllerRef>| {
        if seen.insert(c.type_id()) {
            out.push(c);
        }
    };

    for c in explicit {
        push(c.clone(), &mut out);
    }

    for pattern in patterns {
        match scanner.find(pattern) {
            Ok(found) => {
                tracing::debug!(%pattern, count = found.len(), "package scan");
                for c in found {
                    push(c, &mut out);
                }
            }
            Err(e) => tracing::warn!(%pattern, error = %e, "skipping package pattern"),
        }
    }

    out.retain(|c| {
        let keep = !excluded.contains(c);
        if !keep {
            tracing::debug!(controller = c.qualified_name(), "controller skipped");
        }
        keep
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MethodSpec;

    macro_rules! controllers {
        ($($name:ident),*) => {
            $(
                struct $name;
                impl Controller for $name {
                    fn describe_routes() -> Vec<MethodSpec> {
                        Vec::new()
                    }
                }
            )*
        };
    }

    controllers!(Alpha, Beta, Gamma, Delta);

    /// Pattern "greek" yields Gamma, Beta; pattern "late" yields Delta, Gamma;
    /// pattern "broken" fails.
    struct StubScanner;

    impl ControllerScanner for StubScanner {
        fn find(&self, pattern: &str) -> Result<Vec<ControllerRef>, ScanError> {
            match pattern {
                "greek" => Ok(vec![ControllerRef::of::<Gamma>(), ControllerRef::of::<Beta>()]),
                "late" => Ok(vec![ControllerRef::of::<Delta>(), ControllerRef::of::<Gamma>()]),
                other => Err(ScanError::Unavailable {
                    pattern: other.to_string(),
                    message: "unreadable".into(),
                }),
            }
        }
    }

    fn names(v: &[ControllerRef]) -> Vec<&'static str> {
        v.iter().map(ControllerRef::type_name).collect()
    }

    #[test]
    fn explicit_first_then_scan_results_deduplicated() {
        let out = collect(
            &[ControllerRef::of::<Beta>(), ControllerRef::of::<Alpha>()],
            &Exclusions::new(),
            &["greek".into(), "late".into()],
            &StubScanner,
        );
        assert_eq!(names(&out), vec!["Beta", "Alpha", "Gamma", "Delta"]);
    }

    #[test]
    fn exclusions_win_over_explicit_and_scanned() {
        let mut excluded = Exclusions::new();
        excluded.add::<Alpha>();
        excluded.add_name("Gamma");
        let out = collect(
            &[ControllerRef::of::<Alpha>()],
            &excluded,
            &["greek".into()],
            &StubScanner,
        );
        assert_eq!(names(&out), vec!["Beta"]);
    }

    #[test]
    fn failing_pattern_is_skipped() {
        let out = collect(
            &[],
            &Exclusions::new(),
            &["broken".into(), "late".into()],
            &StubScanner,
        );
        assert_eq!(names(&out), vec!["Delta", "Gamma"]);
    }

    #[test]
    fn inventory_scanner_rejects_invalid_pattern() {
        assert!(matches!(
            InventoryScanner.find("("),
            Err(ScanError::InvalidPattern { .. })
        ));
    }
}
