use serde::Serialize;

use crate::types::TargetConfig;

/// Compatibility tag of the one historical profile the build can switch to.
pub const DEFAULT_LEGACY_TAG: &str = "london";

/// Kind of execution group, in the order groups are visited.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum GroupKind {
    /// Targets matching the default build profile
    Primary,
    /// Targets needing the legacy build profile
    SecondaryCompat,
    /// Special execution class targets, run one at a time
    Special,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionGroup {
    pub kind: GroupKind,
    /// Compatibility tag the build profile must be switched to, if any
    pub required_compatibility: Option<String>,
    pub targets: Vec<TargetConfig>,
}

impl ExecutionGroup {
    pub fn name(&self) -> String {
        self.kind.to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Grouping {
    pub groups: Vec<ExecutionGroup>,
    /// Targets no group can satisfy; reported, never dropped silently
    pub skipped: Vec<TargetConfig>,
}

/// Partition targets by the build profile they require, using [`DEFAULT_LEGACY_TAG`].
pub fn group_targets(targets: &[TargetConfig], default_compatibility: &str) -> Grouping {
    group_targets_with_legacy(targets, default_compatibility, DEFAULT_LEGACY_TAG)
}

/// Partition targets into primary, secondary-compat and special groups.
///
/// Each target lands in the first matching bucket: special class, default
/// tag, legacy tag (only when the default is not already the legacy tag),
/// otherwise skipped. Empty groups are not emitted.
pub fn group_targets_with_legacy(
    targets: &[TargetConfig],
    default_compatibility: &str,
    legacy_compatibility: &str,
) -> Grouping {
    let legacy_is_default = legacy_compatibility.eq_ignore_ascii_case(default_compatibility);

    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    let mut special = Vec::new();
    let mut skipped = Vec::new();

    for target in targets {
        if target.special {
            special.push(target.clone());
        } else if target.compatibility.eq_ignore_ascii_case(default_compatibility) {
            primary.push(target.clone());
        } else if !legacy_is_default && target.compatibility.eq_ignore_ascii_case(legacy_compatibility) {
            secondary.push(target.clone());
        } else {
            skipped.push(target.clone());
        }
    }

    let groups = [
        (GroupKind::Primary, None, primary),
        (GroupKind::SecondaryCompat, Some(legacy_compatibility.to_string()), secondary),
        (GroupKind::Special, None, special),
    ]
    .into_iter()
    .filter(|(_, _, targets)| !targets.is_empty())
    .map(|(kind, required_compatibility, targets)| ExecutionGroup { kind, required_compatibility, targets })
    .collect();

    Grouping { groups, skipped }
}
