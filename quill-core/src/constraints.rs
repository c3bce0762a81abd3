//! Project-wide creative constraints.
//!
//! Point of view, tone, pacing, safety limits, and the phrase denylist are
//! fixed at pipeline construction and injected into every prompt. No global
//! state: two pipelines with different constraints can run side by side.

use serde::{Deserialize, Serialize};

/// Narrative point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PovType {
    FirstPerson,
    ThirdLimited,
    ThirdOmniscient,
    /// Camera-eye narration: no access to any character's thoughts.
    Objective,
}

impl PovType {
    pub fn is_objective(&self) -> bool {
        matches!(self, PovType::Objective)
    }

    /// Prose description for prompt injection.
    pub fn describe(&self) -> &'static str {
        match self {
            PovType::FirstPerson => "first person, narrated by the protagonist",
            PovType::ThirdLimited => "third person limited, one viewpoint character per scene",
            PovType::ThirdOmniscient => "third person omniscient",
            PovType::Objective => {
                "objective (camera-eye): report only what can be seen and heard, \
                 never any character's thoughts or feelings"
            }
        }
    }
}

/// Point of view plus the interiority terms forbidden under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PovConstraint {
    pub pov: PovType,
    /// Terms that signal interiority and are forbidden in narration when the
    /// point of view is objective.
    #[serde(default)]
    pub forbidden_terms: Vec<String>,
}

impl PovConstraint {
    pub fn objective() -> Self {
        PovConstraint {
            pov: PovType::Objective,
            forbidden_terms: [
                "thought", "felt", "realized", "wondered", "knew", "remembered", "hoped",
                "decided", "understood",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }

    pub fn third_limited() -> Self {
        PovConstraint {
            pov: PovType::ThirdLimited,
            forbidden_terms: Vec::new(),
        }
    }
}

/// Audience safety limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyProfile {
    /// 0 (none) through 5 (intense but non-graphic).
    pub peril_level: u8,
    pub age_min: u8,
    pub age_max: u8,
    #[serde(default)]
    pub content_warnings: Vec<String>,
}

impl Default for SafetyProfile {
    fn default() -> Self {
        SafetyProfile {
            peril_level: 3,
            age_min: 14,
            age_max: 99,
            content_warnings: Vec::new(),
        }
    }
}

/// The full constraint set for one book project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConstraints {
    pub pov: PovConstraint,
    pub tone: String,
    pub pace: String,
    pub safety: SafetyProfile,
    /// Phrases that must not appear anywhere in the prose.
    #[serde(default)]
    pub denylist: Vec<String>,
}

impl ProjectConstraints {
    /// Render the constraints as a block for prompt injection.
    pub fn render_for_prompt(&self) -> String {
        let mut block = String::new();
        block.push_str(&format!("Point of view: {}.\n", self.pov.pov.describe()));
        block.push_str(&format!("Tone: {}.\n", self.tone));
        block.push_str(&format!("Pacing: {}.\n", self.pace));
        block.push_str(&format!(
            "Audience: ages {} to {}; peril level at most {} of 5, never graphic.\n",
            self.safety.age_min, self.safety.age_max, self.safety.peril_level
        ));
        if !self.pov.forbidden_terms.is_empty() {
            block.push_str(&format!(
                "Never use these interiority words in narration: {}.\n",
                self.pov.forbidden_terms.join(", ")
            ));
        }
        if !self.denylist.is_empty() {
            block.push_str(&format!(
                "Never use these phrases: {}.\n",
                self.denylist
                    .iter()
                    .map(|p| format!("\"{p}\""))
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        block
    }
}

impl Default for ProjectConstraints {
    fn default() -> Self {
        ProjectConstraints {
            pov: PovConstraint::third_limited(),
            tone: "grounded, warm, with dry humor".to_string(),
            pace: "steady, scene-driven".to_string(),
            safety: SafetyProfile::default(),
            denylist: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_objective_pov_has_forbidden_terms() {
        let constraint = PovConstraint::objective();
        assert!(constraint.pov.is_objective());
        assert!(constraint.forbidden_terms.iter().any(|t| t == "thought"));
    }

    #[test]
    fn test_render_includes_denylist() {
        let constraints = ProjectConstraints {
            denylist: vec!["little did".to_string()],
            ..ProjectConstraints::default()
        };
        let block = constraints.render_for_prompt();
        assert!(block.contains("\"little did\""));
        assert!(block.contains("third person limited"));
    }

    #[test]
    fn test_render_omits_empty_sections() {
        let block = ProjectConstraints::default().render_for_prompt();
        assert!(!block.contains("Never use these phrases"));
        assert!(!block.contains("interiority"));
    }
}
