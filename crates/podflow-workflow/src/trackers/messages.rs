//! Maps raw backend git errors to user-facing text.

pub const UNKNOWN_ERROR_MESSAGE: &str = "unknown error";

struct ErrorRule {
    needles: &'static [&'static str],
    message: &'static str,
}

const CLONE_RULES: &[ErrorRule] = &[
    ErrorRule {
        needles: &["already exists"],
        message: "A repository with this name already exists",
    },
    ErrorRule {
        needles: &["authentication failed", "could not read username", "permission denied"],
        message: "Authentication failed, check your access to the repository",
    },
    ErrorRule {
        needles: &["not found", "404"],
        message: "Repository not found, check the URL",
    },
    ErrorRule {
        needles: &["could not resolve host", "network", "connection refused", "timed out"],
        message: "Network error, check your connection and retry",
    },
    ErrorRule {
        needles: &["no space left", "disk space", "disk full"],
        message: "Not enough disk space to clone the repository",
    },
];

const PULL_RULES: &[ErrorRule] = &[
    ErrorRule {
        needles: &["would be overwritten", "uncommitted changes", "local changes"],
        message: "Local changes would be overwritten, commit or stash them first",
    },
    ErrorRule {
        needles: &["merge conflict", "conflict"],
        message: "Pull produced merge conflicts, resolve them locally",
    },
    ErrorRule {
        needles: &["authentication failed", "could not read username", "permission denied"],
        message: "Authentication failed, check your access to the repository",
    },
    ErrorRule {
        needles: &["no tracking information", "no upstream"],
        message: "The current branch has no upstream to pull from",
    },
    ErrorRule {
        needles: &["could not resolve host", "network", "connection refused", "timed out"],
        message: "Network error, check your connection and retry",
    },
    ErrorRule {
        needles: &["not a git repository", "not found", "404"],
        message: "Repository not found",
    },
];

const CHECKOUT_RULES: &[ErrorRule] = &[
    ErrorRule {
        needles: &["did not match any", "invalid reference", "not a valid", "unknown revision"],
        message: "Branch does not exist",
    },
    ErrorRule {
        needles: &["would be overwritten", "uncommitted changes", "local changes"],
        message: "Uncommitted changes would be overwritten, commit or stash them first",
    },
    ErrorRule {
        needles: &["already exists"],
        message: "A branch with this name already exists",
    },
    ErrorRule {
        needles: &["could not resolve host", "network", "connection refused", "timed out"],
        message: "Network error while fetching the branch, retry later",
    },
    ErrorRule {
        needles: &["not a git repository", "repository not found"],
        message: "Repository not found",
    },
];

fn classify(raw: Option<&str>, rules: &[ErrorRule]) -> String {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return UNKNOWN_ERROR_MESSAGE.to_string();
    }
    let lowered = raw.to_lowercase();
    rules
        .iter()
        .find(|rule| rule.needles.iter().any(|needle| lowered.contains(needle)))
        .map(|rule| rule.message.to_string())
        .unwrap_or_else(|| raw.to_string())
}

pub fn clone_error_message(raw: Option<&str>) -> String {
    classify(raw, CLONE_RULES)
}

pub fn pull_error_message(raw: Option<&str>) -> String {
    classify(raw, PULL_RULES)
}

pub fn checkout_error_message(raw: Option<&str>) -> String {
    classify(raw, CHECKOUT_RULES)
}
