//! Feature-branch naming rules.

use std::sync::LazyLock;

use regex::Regex;

static FEATURE_BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]{3}-[a-z0-9][a-z0-9-]*$").unwrap());

/// True when `name` is a three-digit-prefixed feature slug (e.g. `003-my-feature`).
///
/// Feature branches and feature directories under `specs/` share this pattern.
pub fn is_feature_branch(name: &str) -> bool {
    FEATURE_BRANCH_RE.is_match(name)
}
