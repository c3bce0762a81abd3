//! Local prose quality checks.
//!
//! Cheap, deterministic checks run on every draft before any model-based
//! critique. Each rule reports issues tagged with a kind; the decoding
//! controller keys its escalation table off those kinds.

use std::collections::HashMap;

/// Category of a locally detected prose issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    /// Word count outside the target band.
    Length,
    /// Repeated n-grams above threshold.
    Repetition,
    /// A denylisted phrase appeared in the draft.
    BannedPhrase,
    /// Heading structure or point-of-view defects.
    Structure,
}

/// One issue found by a local rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub kind: IssueKind,
    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Issue {
            kind,
            message: message.into(),
        }
    }
}

/// A draft split into prose and any trailing self-analysis block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftText {
    pub prose: String,
    pub analysis: Option<String>,
}

/// Strip a trailing ```qa fenced block, which some drafts append with the
/// model's own notes. Only the prose is checked and published.
pub fn split_analysis(text: &str) -> DraftText {
    if let Some(open) = text.rfind("```qa") {
        let after = &text[open + "```qa".len()..];
        if let Some(close) = after.find("```") {
            let analysis = after[..close].trim();
            let mut prose = String::with_capacity(text.len());
            prose.push_str(text[..open].trim_end());
            let rest = after[close + 3..].trim_start();
            if !rest.is_empty() {
                prose.push_str("\n\n");
                prose.push_str(rest);
            }
            return DraftText {
                prose,
                analysis: if analysis.is_empty() {
                    None
                } else {
                    Some(analysis.to_string())
                },
            };
        }
    }
    DraftText {
        prose: text.trim_end().to_string(),
        analysis: None,
    }
}

/// Whitespace-delimited word count.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Count occurrences of each word n-gram, case-folded.
pub fn ngram_counts(text: &str, n: usize) -> HashMap<String, usize> {
    let words: Vec<String> = text
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'')
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect();
    let mut counts = HashMap::new();
    if words.len() < n || n == 0 {
        return counts;
    }
    for window in words.windows(n) {
        *counts.entry(window.join(" ")).or_insert(0) += 1;
    }
    counts
}

/// Remove quoted dialogue, leaving only narration. Handles curly and
/// straight double quotes plus curly single quotes. Straight single quotes
/// are left alone: they double as apostrophes.
pub fn strip_dialogue(text: &str) -> String {
    let mut narration = String::with_capacity(text.len());
    let mut closing: Option<char> = None;
    for c in text.chars() {
        match closing {
            Some(close) => {
                if c == close {
                    closing = None;
                } else if c == '\n' {
                    // Unterminated quote; stop swallowing at the line break.
                    closing = None;
                    narration.push(c);
                }
            }
            None => match c {
                '"' => closing = Some('"'),
                '\u{201C}' => closing = Some('\u{201D}'),
                '\u{2018}' => closing = Some('\u{2019}'),
                _ => narration.push(c),
            },
        }
    }
    narration
}

// ============================================================
// Rules
// ============================================================

/// One local prose check.
pub trait ProseRule: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, prose: &str) -> Vec<Issue>;
}

/// Word count must land within `tolerance` of `target`.
pub struct LengthRule {
    pub target: usize,
    pub tolerance: f64,
}

impl LengthRule {
    pub fn new(target: usize) -> Self {
        LengthRule {
            target,
            tolerance: 0.25,
        }
    }
}

impl ProseRule for LengthRule {
    fn name(&self) -> &str {
        "length"
    }

    fn check(&self, prose: &str) -> Vec<Issue> {
        let words = count_words(prose);
        let low = (self.target as f64 * (1.0 - self.tolerance)).floor() as usize;
        let high = (self.target as f64 * (1.0 + self.tolerance)).ceil() as usize;
        if words < low {
            vec![Issue::new(
                IssueKind::Length,
                format!(
                    "draft is {words} words, below the minimum of {low} (target {})",
                    self.target
                ),
            )]
        } else if words > high {
            vec![Issue::new(
                IssueKind::Length,
                format!(
                    "draft is {words} words, above the maximum of {high} (target {})",
                    self.target
                ),
            )]
        } else {
            Vec::new()
        }
    }
}

/// Flags word n-grams that repeat too often.
pub struct RepetitionRule {
    pub n: usize,
    pub min_occurrences: usize,
}

impl Default for RepetitionRule {
    fn default() -> Self {
        RepetitionRule {
            n: 4,
            min_occurrences: 3,
        }
    }
}

impl ProseRule for RepetitionRule {
    fn name(&self) -> &str {
        "repetition"
    }

    fn check(&self, prose: &str) -> Vec<Issue> {
        let mut offenders: Vec<(String, usize)> = ngram_counts(prose, self.n)
            .into_iter()
            .filter(|(_, count)| *count >= self.min_occurrences)
            .collect();
        offenders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        offenders
            .into_iter()
            .map(|(phrase, count)| {
                Issue::new(
                    IssueKind::Repetition,
                    format!("the phrase \"{phrase}\" appears {count} times"),
                )
            })
            .collect()
    }
}

/// Flags denylisted phrases, case-insensitively.
pub struct BannedPhraseRule {
    pub phrases: Vec<String>,
}

impl BannedPhraseRule {
    pub fn new(phrases: Vec<String>) -> Self {
        BannedPhraseRule { phrases }
    }
}

impl ProseRule for BannedPhraseRule {
    fn name(&self) -> &str {
        "banned-phrase"
    }

    fn check(&self, prose: &str) -> Vec<Issue> {
        let haystack = prose.to_lowercase();
        self.phrases
            .iter()
            .filter(|phrase| !phrase.is_empty() && haystack.contains(&phrase.to_lowercase()))
            .map(|phrase| {
                Issue::new(
                    IssueKind::BannedPhrase,
                    format!("the banned phrase \"{phrase}\" appears in the draft"),
                )
            })
            .collect()
    }
}

/// Requires exactly one chapter heading (`# `) and at least one scene
/// heading (`###`).
pub struct StructureRule;

impl ProseRule for StructureRule {
    fn name(&self) -> &str {
        "structure"
    }

    fn check(&self, prose: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        let chapter_headings = prose
            .lines()
            .filter(|line| line.starts_with("# "))
            .count();
        if chapter_headings != 1 {
            issues.push(Issue::new(
                IssueKind::Structure,
                format!("expected exactly one chapter heading, found {chapter_headings}"),
            ));
        }
        let scene_headings = prose
            .lines()
            .filter(|line| line.trim_start().starts_with("###"))
            .count();
        if scene_headings == 0 {
            issues.push(Issue::new(
                IssueKind::Structure,
                "no scene headings (###) found".to_string(),
            ));
        }
        issues
    }
}

/// Heuristic check for objective point of view: interiority verbs and a
/// first-person narrator are only allowed inside dialogue.
pub struct PovRule {
    pub forbidden_terms: Vec<String>,
}

impl PovRule {
    pub fn new(forbidden_terms: Vec<String>) -> Self {
        PovRule { forbidden_terms }
    }
}

impl ProseRule for PovRule {
    fn name(&self) -> &str {
        "pov"
    }

    fn check(&self, prose: &str) -> Vec<Issue> {
        let narration = strip_dialogue(prose);
        let lowered = narration.to_lowercase();
        let mut issues: Vec<Issue> = self
            .forbidden_terms
            .iter()
            .filter(|term| !term.is_empty() && lowered.contains(&term.to_lowercase()))
            .map(|term| {
                Issue::new(
                    IssueKind::Structure,
                    format!("interiority term \"{term}\" appears in narration"),
                )
            })
            .collect();

        let first_person = narration
            .split_whitespace()
            .filter(|word| {
                let bare = word.trim_matches(|c: char| !c.is_alphanumeric() && c != '\'');
                bare == "I" || bare == "I'm" || bare == "I'll" || bare == "I've" || bare == "I'd"
            })
            .count();
        if first_person > 0 {
            issues.push(Issue::new(
                IssueKind::Structure,
                format!("first-person narration appears {first_person} times outside dialogue"),
            ));
        }
        issues
    }
}

// ============================================================
// Checker
// ============================================================

/// Runs a fixed set of rules over a draft.
pub struct QualityChecker {
    rules: Vec<Box<dyn ProseRule>>,
}

impl QualityChecker {
    pub fn new(rules: Vec<Box<dyn ProseRule>>) -> Self {
        QualityChecker { rules }
    }

    /// The standard rule set for chapter drafts.
    pub fn standard(
        target_words: usize,
        denylist: Vec<String>,
        interiority_terms: Vec<String>,
        objective_pov: bool,
    ) -> Self {
        let mut rules: Vec<Box<dyn ProseRule>> = vec![
            Box::new(LengthRule::new(target_words)),
            Box::new(RepetitionRule::default()),
            Box::new(BannedPhraseRule::new(denylist)),
            Box::new(StructureRule),
        ];
        if objective_pov {
            rules.push(Box::new(PovRule::new(interiority_terms)));
        }
        QualityChecker::new(rules)
    }

    pub fn check(&self, prose: &str) -> Vec<Issue> {
        self.rules.iter().flat_map(|rule| rule.check(prose)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repeat_words(word: &str, n: usize) -> String {
        std::iter::repeat(word).take(n).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_split_analysis() {
        let draft = "# Chapter 1\n\nProse here.\n\n```qa\nself notes\n```";
        let split = split_analysis(draft);
        assert_eq!(split.prose, "# Chapter 1\n\nProse here.");
        assert_eq!(split.analysis.as_deref(), Some("self notes"));

        let plain = split_analysis("just prose");
        assert_eq!(plain.prose, "just prose");
        assert!(plain.analysis.is_none());
    }

    #[test]
    fn test_length_rule_band() {
        let rule = LengthRule::new(100);
        assert!(rule.check(&repeat_words("word", 100)).is_empty());
        assert!(rule.check(&repeat_words("word", 75)).is_empty());
        assert!(rule.check(&repeat_words("word", 125)).is_empty());

        let short = rule.check(&repeat_words("word", 40));
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].kind, IssueKind::Length);
        assert!(short[0].message.contains("40 words"));

        let long = rule.check(&repeat_words("word", 200));
        assert_eq!(long[0].kind, IssueKind::Length);
    }

    #[test]
    fn test_repetition_rule() {
        let phrase = "the rain kept falling";
        let text = format!("{phrase} on them. {phrase} on the roof. {phrase} all night.");
        let issues = RepetitionRule::default().check(&text);
        assert!(issues
            .iter()
            .any(|i| i.kind == IssueKind::Repetition && i.message.contains("the rain kept falling")));

        let clean = "every sentence here uses different words than the one before it";
        assert!(RepetitionRule::default().check(clean).is_empty());
    }

    #[test]
    fn test_banned_phrase_case_insensitive() {
        let rule = BannedPhraseRule::new(vec!["little did".to_string()]);
        let issues = rule.check("Little did they know the door was open.");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind, IssueKind::BannedPhrase);
        assert!(issues[0].message.contains("little did"));
    }

    #[test]
    fn test_structure_rule() {
        let good = "# Chapter 1: Dawn\n\n### Scene 1\n\nText.";
        assert!(StructureRule.check(good).is_empty());

        let no_scene = "# Chapter 1\n\nText.";
        let issues = StructureRule.check(no_scene);
        assert!(issues.iter().any(|i| i.message.contains("scene headings")));

        let two_titles = "# One\n# Two\n### Scene";
        let issues = StructureRule.check(two_titles);
        assert!(issues.iter().any(|i| i.message.contains("found 2")));
    }

    #[test]
    fn test_strip_dialogue_preserves_apostrophes() {
        let text = "\u{201C}I can't stay,\u{201D} she said. It wasn't her choice.";
        let narration = strip_dialogue(text);
        assert!(!narration.contains("can't stay"));
        assert!(narration.contains("wasn't her choice"));
    }

    #[test]
    fn test_pov_rule_ignores_dialogue() {
        let rule = PovRule::new(vec!["she thought".to_string()]);
        let inside = "\u{201C}I think she thought it over,\u{201D} he said. The door closed.";
        assert!(rule.check(inside).is_empty());

        let outside = "She thought about leaving. The door closed.";
        let issues = rule.check(outside);
        assert!(issues.iter().any(|i| i.message.contains("she thought")));
    }

    #[test]
    fn test_pov_rule_first_person_narration() {
        let rule = PovRule::new(Vec::new());
        let issues = rule.check("I walked to the door. It was locked.");
        assert!(issues.iter().any(|i| i.message.contains("first-person")));

        let quoted = "\u{201C}I walked to the door,\u{201D} he said.";
        assert!(rule.check(quoted).is_empty());
    }

    #[test]
    fn test_standard_checker_aggregates() {
        let checker = QualityChecker::standard(
            10,
            vec!["suddenly".to_string()],
            Vec::new(),
            false,
        );
        let prose = "# Chapter 1\n\n### Scene\n\nSuddenly the lights went out across the bay tonight.";
        let issues = checker.check(prose);
        assert!(issues.iter().any(|i| i.kind == IssueKind::BannedPhrase));
    }
}
