//! Adaptive decoding controller.
//!
//! Maps locally detected draft issues onto sampler adjustments for the next
//! attempt. Early retries nudge the base options; later retries pin them to
//! known-safe values. All outputs are clamped to the backend's bounds.

use ollama::Options;

use crate::quality::{Issue, IssueKind};

/// Derive options for the next drafting attempt from the issues found in the
/// current one. `retry` is zero-based: the first redraft passes 0 and gets
/// the gentle nudge; from the second redraft on the values are pinned.
pub fn adjust(base: &Options, issues: &[Issue], retry: u32) -> Options {
    let mut options = base.clone();

    let has = |kind: IssueKind| issues.iter().any(|issue| issue.kind == kind);
    let gentle = retry == 0;

    if has(IssueKind::Repetition) {
        if gentle {
            options.repeat_penalty += 0.1;
            options.presence_penalty += 0.1;
            options.frequency_penalty += 0.1;
        } else {
            options.repeat_penalty = 1.5;
            options.repeat_last_n = options.repeat_last_n.saturating_mul(2);
        }
    }

    if has(IssueKind::Length) || has(IssueKind::Structure) {
        if gentle {
            options.temperature -= 0.1;
            options.top_p -= 0.05;
        } else {
            options.temperature = 0.7;
            options.top_p = 0.85;
            options.top_k = 40;
        }
    }

    if has(IssueKind::BannedPhrase) {
        if gentle {
            options.temperature -= 0.2;
            options.top_k = options.top_k.saturating_sub(10);
        } else {
            options.temperature = 0.4;
            options.top_k = 30;
            options.min_p = 0.05;
        }
    }

    options.clamp();
    options
}
