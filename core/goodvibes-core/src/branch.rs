//! Feature branch lifecycle.
//!
//! ## State Machine
//!
//! ```text
//! on-main ──(first file created this session)──▶ on-feature   git checkout -b feature/<slug>
//! on-feature ──(all merge gates pass)──────────▶ merged-back  checkout main, merge --no-ff, branch -d
//! merged-back ≡ on-main
//! ```
//!
//! Every transition is all-or-nothing on `SessionState`: a failed git step
//! leaves the git section exactly as it was.

use chrono::Utc;

use crate::git::Git;
use crate::state::{BuildStatus, SessionState};

pub const BRANCH_PREFIX: &str = "feature/";
pub const MAX_SLUG_LEN: usize = 50;
const DEFAULT_SLUG: &str = "feature";
/// Longest description kept from a prompt, in characters.
pub const MAX_DESCRIPTION_CHARS: usize = 80;
/// Names tried per creation: `<base>`, then `<base>-2` up to this suffix.
const MAX_NAME_ATTEMPTS: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchOutcome {
    pub changed: bool,
    pub message: String,
}

impl BranchOutcome {
    fn unchanged(message: impl Into<String>) -> Self {
        Self {
            changed: false,
            message: message.into(),
        }
    }

    fn changed(message: impl Into<String>) -> Self {
        Self {
            changed: true,
            message: message.into(),
        }
    }
}

/// Lowercase, hyphen-separated, at most [`MAX_SLUG_LEN`] characters.
pub fn branch_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }

    let truncated: String = slug.chars().take(MAX_SLUG_LEN).collect();
    let trimmed = truncated.trim_matches('-');
    if trimmed.is_empty() {
        DEFAULT_SLUG.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn feature_branch_name(name: &str) -> String {
    format!("{BRANCH_PREFIX}{}", branch_slug(name))
}

/// Records what the session is working on; the next feature branch is named
/// after it. Keeps the first non-empty line only. Returns whether anything
/// was stored.
pub fn set_feature_description(state: &mut SessionState, text: &str) -> bool {
    let Some(line) = text.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return false;
    };
    let description: String = line.chars().take(MAX_DESCRIPTION_CHARS).collect();
    let description = description.trim_end().to_string();
    if state.session.feature_description.as_deref() == Some(description.as_str()) {
        return false;
    }
    tracing::debug!(%description, "Feature description recorded");
    state.session.feature_description = Some(description);
    true
}

/// Only the session's first file creation, on main, with no feature active.
pub fn should_create_feature_branch(state: &SessionState) -> bool {
    state.git.feature_branch.is_none()
        && state.git.on_main()
        && state.files.created_this_session.len() == 1
}

pub fn maybe_create_feature_branch(
    state: &mut SessionState,
    name: Option<&str>,
    git: &Git<'_>,
) -> BranchOutcome {
    if !should_create_feature_branch(state) {
        return BranchOutcome::unchanged("");
    }

    let description = name
        .map(str::to_string)
        .or_else(|| state.session.feature_description.clone())
        .filter(|d| !d.trim().is_empty());
    let base = feature_branch_name(description.as_deref().unwrap_or(DEFAULT_SLUG));
    let Some(branch) = create_unique_branch(git, &base) else {
        return BranchOutcome::unchanged(format!("Could not create branch {base}"));
    };

    state.git.feature_branch = Some(branch.clone());
    state.git.current_branch = branch.clone();
    state.git.feature_started_at = Some(Utc::now());
    state.git.feature_description = description;

    tracing::info!(%branch, "Feature branch created");
    BranchOutcome::changed(format!("Created feature branch {branch}"))
}

/// Creates `base`, stepping to `base-2`, `base-3`, ... while the name is
/// taken by an earlier feature that was never merged.
fn create_unique_branch(git: &Git<'_>, base: &str) -> Option<String> {
    for attempt in 1..=MAX_NAME_ATTEMPTS {
        let candidate = match attempt {
            1 => base.to_string(),
            n => format!("{base}-{n}"),
        };
        let result = git.checkout_new_branch(&candidate);
        if result.success() {
            return Some(candidate);
        }
        tracing::warn!(
            branch = %candidate,
            stderr = %result.stderr.trim(),
            "Feature branch creation failed"
        );
        if !git.branch_exists(&candidate) {
            return None;
        }
    }
    None
}

/// All gates must hold; partial satisfaction never merges.
pub fn should_merge_feature(state: &SessionState) -> bool {
    state.git.feature_branch.is_some()
        && state.tests.failing_files.is_empty()
        && state.build.status == BuildStatus::Passing
        && state.tests.pending_fixes.is_empty()
        && state.git.pending_merge
}

pub fn maybe_merge_feature(state: &mut SessionState, git: &Git<'_>) -> BranchOutcome {
    let Some(feature) = state.git.feature_branch.clone() else {
        return BranchOutcome::unchanged("No feature branch to merge");
    };
    let main = state.git.main_branch.clone();
    let conflict =
        || BranchOutcome::unchanged(format!("Merge of {feature} failed; a conflict is likely"));

    let message = match state.git.feature_description.as_deref() {
        Some(description) => format!("Merge {feature}: {description}"),
        None => format!("Merge {feature}"),
    };

    if !git.checkout(&main).success() {
        tracing::warn!(%main, "Merge aborted: could not check out main");
        return conflict();
    }

    if !git.merge_no_ff(&feature, &message).success() {
        tracing::warn!(%feature, "Merge failed; restoring feature branch");
        let _ = git.merge_abort();
        let _ = git.checkout(&feature);
        return conflict();
    }

    if !git.delete_branch(&feature).success() {
        tracing::warn!(%feature, "Feature branch delete refused; restoring feature branch");
        let _ = git.checkout(&feature);
        return conflict();
    }

    state.git.current_branch = main.clone();
    state.git.feature_branch = None;
    state.git.feature_started_at = None;
    state.git.feature_description = None;
    state.git.pending_merge = false;

    tracing::info!(%feature, %main, "Feature branch merged");
    BranchOutcome::changed(format!("Merged {feature} into {main}"))
}

/// The explicit "feature is done" signal.
pub fn mark_feature_done(state: &mut SessionState) -> bool {
    if state.git.feature_branch.is_none() {
        return false;
    }
    state.git.pending_merge = true;
    true
}

/// Refreshes branch facts from the repository at session start.
pub fn sync_branch(state: &mut SessionState, git: &Git<'_>) {
    if git.branch_exists("main") {
        state.git.main_branch = "main".to_string();
    } else if git.branch_exists("master") {
        state.git.main_branch = "master".to_string();
    }

    if let Some(current) = git.current_branch() {
        state.git.current_branch = current;
    }

    let diverged = state
        .git
        .feature_branch
        .as_ref()
        .is_some_and(|feature| *feature != state.git.current_branch);
    if diverged {
        tracing::info!(
            feature = ?state.git.feature_branch,
            current = %state.git.current_branch,
            "Left feature branch outside the hook; forgetting it"
        );
        state.git.feature_branch = None;
        state.git.feature_started_at = None;
        state.git.feature_description = None;
        state.git.pending_merge = false;
    }
}
