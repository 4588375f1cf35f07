//! Output safety checks.
//!
//! [`verify_output`] scans agent text for leaked credentials and for
//! structural anomalies. It is a pure function; the task runner turns each
//! returned issue into a warning event.

use regex::Regex;
use std::sync::LazyLock;

/// Lines longer than this are reported as anomalies.
pub const MAX_LINE_CHARS: usize = 10_000;

struct SecretPattern {
    name: &'static str,
    regex: Regex,
}

static SECRET_PATTERNS: LazyLock<Vec<SecretPattern>> = LazyLock::new(|| {
    [
        ("AWS access key id", r"\b(?:AKIA|ASIA)[0-9A-Z]{16}\b"),
        (
            "private key block",
            r"-----BEGIN (?:RSA |EC |DSA |OPENSSH |PGP )?PRIVATE KEY(?: BLOCK)?-----",
        ),
        ("GitHub token", r"\bgh[pousr]_[A-Za-z0-9]{36,}\b"),
        ("OpenAI-style API key", r"\bsk-(?:proj-)?[A-Za-z0-9_-]{20,}\b"),
        ("Anthropic API key", r"\bsk-ant-[A-Za-z0-9_-]{20,}\b"),
        ("Slack token", r"\bxox[abposr]-[A-Za-z0-9-]{10,}\b"),
        (
            "hard-coded credential",
            r#"(?i)\b(?:api[_-]?key|secret|token|passw(?:or)?d)\b\s*[:=]\s*["'][^"'\s]{8,}["']"#,
        ),
    ]
    .into_iter()
    .map(|(name, pattern)| SecretPattern {
        name,
        regex: Regex::new(pattern).unwrap(),
    })
    .collect()
});

/// Return one human-readable issue per problem found. Empty means clean.
pub fn verify_output(text: &str) -> Vec<String> {
    let mut issues = Vec::new();

    if text.trim().is_empty() {
        issues.push("Output is empty".to_string());
        return issues;
    }

    for pattern in SECRET_PATTERNS.iter() {
        let hits = pattern.regex.find_iter(text).count();
        if hits > 0 {
            issues.push(format!(
                "Possible {} in output ({} occurrence{})",
                pattern.name,
                hits,
                if hits == 1 { "" } else { "s" }
            ));
        }
    }

    let fences = text
        .lines()
        .filter(|line| line.trim_start().starts_with("```"))
        .count();
    if fences % 2 != 0 {
        issues.push("Unbalanced code fence (odd number of ``` markers)".to_string());
    }

    if text.contains('\0') {
        issues.push("Output contains NUL bytes".to_string());
    }

    if let Some((idx, line)) = text
        .lines()
        .enumerate()
        .find(|(_, line)| line.chars().count() > MAX_LINE_CHARS)
    {
        issues.push(format!(
            "Line {} is {} characters long (limit {})",
            idx + 1,
            line.chars().count(),
            MAX_LINE_CHARS
        ));
    }

    issues
}
