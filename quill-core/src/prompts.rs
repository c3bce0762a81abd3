//! Prompt assembly.
//!
//! Static instruction blocks live in `prompts/*.txt` and are compiled in
//! with `include_str!`; the functions here splice dynamic material into
//! them. Violations and payloads are always embedded verbatim so the model
//! sees exactly what failed.

use serde_json::Value;

use crate::artifact::{BookPlan, ChapterBrief, ChapterOutline, ScenePlan};
use crate::critique::{CritiqueContext, CritiqueFindings};
use crate::skeleton::json_skeleton_string;

/// Marker opening a revised chapter in a revision response.
pub const REVISED_START: &str = "<REVISED_CHAPTER_START>";
/// Marker closing a revised chapter in a revision response.
pub const REVISED_END: &str = "<REVISED_CHAPTER_END>";

/// System prompt for the planning stage.
pub fn planner_system() -> &'static str {
    include_str!("prompts/planner_system.txt")
}

/// Initial planning prompt: the author's materials plus shape coercion.
pub fn plan_prompt(materials: &str, schema: &Value) -> String {
    let mut prompt = String::new();
    prompt.push_str("Produce the complete book plan for the project described below.\n\n");
    prompt.push_str("PROJECT MATERIALS:\n");
    prompt.push_str(materials.trim());
    prompt.push_str("\n\n");
    prompt.push_str(&coercion_instruction(schema));
    prompt
}

/// Shape-coercion block: the schema and a minimal instance of it.
pub fn coercion_instruction(schema: &Value) -> String {
    format!(
        "Your answer must be a single JSON object conforming to this JSON Schema:\n\
         {schema}\n\n\
         Here is a minimal instance of the required shape (fill it out fully, \
         do not leave placeholder values):\n\
         {skeleton}\n",
        skeleton = json_skeleton_string(schema)
    )
}

/// Brief-planning prompt: expand one outline entry into a full chapter
/// brief, anchored to the plan and the story so far.
pub fn chapter_brief_prompt(
    plan: &BookPlan,
    outline: &ChapterOutline,
    story_so_far: &str,
    schema: &Value,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Plan chapter {} of \"{}\" in detail: beats, scenes, setups, payoffs, \
         and foreshadowing.\n\n",
        outline.number, plan.project.title
    ));
    prompt.push_str(&format!("LOGLINE: {}\n", plan.logline));
    if !plan.themes.is_empty() {
        prompt.push_str(&format!("THEMES: {}\n", plan.themes.join(", ")));
    }
    if !plan.characters.is_empty() {
        prompt.push_str("CAST:\n");
        for (name, character) in &plan.characters {
            prompt.push_str(&format!("- {name}: {}\n", character.description));
        }
    }
    prompt.push_str(&format!(
        "\nOUTLINE ENTRY FOR THIS CHAPTER:\n\
         Chapter {}: \"{}\" ({} words)\n{}\n\n",
        outline.number, outline.title, outline.target_words, outline.description
    ));
    if !story_so_far.trim().is_empty() {
        prompt.push_str("THE STORY SO FAR:\n");
        prompt.push_str(story_so_far.trim());
        prompt.push_str("\n\n");
    }
    prompt.push_str(
        "The meta fields must copy the outline entry exactly: its chapter \
         number, its title, and its word target.\n\n",
    );
    prompt.push_str(&coercion_instruction(schema));
    prompt
}

/// Corrective nudge after a reply contained no parseable JSON.
pub fn json_corrective() -> &'static str {
    "Your previous reply did not contain a parseable JSON value. Respond again \
     with ONLY the JSON object. No prose, no markdown fences, no commentary \
     before or after it."
}

/// Repair prompt: the exact rejected payload and the exact violations.
pub fn repair_prompt(payload: &Value, violations: &[String], schema: &Value) -> String {
    let pretty = serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string());
    let mut prompt = String::new();
    prompt.push_str("Your previous JSON answer was rejected. Here is exactly what you sent:\n\n");
    prompt.push_str(&pretty);
    prompt.push_str("\n\nIt violates the schema in these ways:\n");
    for violation in violations {
        prompt.push_str("- ");
        prompt.push_str(violation);
        prompt.push('\n');
    }
    prompt.push_str(
        "\nFix every violation listed above and resend the COMPLETE corrected JSON \
         object. Keep everything that was already valid. Output only the JSON.\n\n",
    );
    prompt.push_str(&format!("The schema, again:\n{schema}\n"));
    prompt
}

/// System prompt for chapter drafting: base rules plus project constraints.
pub fn writer_system(constraints_block: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(include_str!("prompts/writer_base.txt"));
    prompt.push_str("\nPROJECT CONSTRAINTS:\n");
    prompt.push_str(constraints_block);
    prompt
}

/// Drafting prompt for one chapter.
pub fn chapter_prompt(brief: &ChapterBrief, story_so_far: &str, previous_excerpt: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Write chapter {} of the book: \"{}\". Target length: about {} words.\n\n",
        brief.meta.chapter_number, brief.meta.chapter_title, brief.meta.target_words
    ));
    if !story_so_far.trim().is_empty() {
        prompt.push_str("THE STORY SO FAR:\n");
        prompt.push_str(story_so_far.trim());
        prompt.push_str("\n\n");
    }
    if !previous_excerpt.trim().is_empty() {
        prompt.push_str("CLOSING LINES OF THE PREVIOUS CHAPTER (pick up from here):\n");
        prompt.push_str(previous_excerpt.trim());
        prompt.push_str("\n\n");
    }
    if !brief.narrative_beats.is_empty() {
        prompt.push_str("BEATS THIS CHAPTER MUST DELIVER:\n");
        for beat in &brief.narrative_beats {
            prompt.push_str("- ");
            prompt.push_str(beat);
            prompt.push('\n');
        }
        prompt.push('\n');
    }
    if !brief.scenes.is_empty() {
        prompt.push_str("SCENE PLAN:\n");
        prompt.push_str(&format_scenes(&brief.scenes));
        prompt.push('\n');
    }
    for (label, items) in [
        ("SETUPS TO PLANT", &brief.setups),
        ("PAYOFFS TO DELIVER", &brief.payoffs),
        ("FORESHADOWING", &brief.foreshadowing),
    ] {
        if !items.is_empty() {
            prompt.push_str(label);
            prompt.push_str(":\n");
            for item in items {
                prompt.push_str("- ");
                prompt.push_str(item);
                prompt.push('\n');
            }
            prompt.push('\n');
        }
    }
    if !brief.style_checks.forbid_inner_monologue_terms.is_empty() {
        prompt.push_str(&format!(
            "NEVER use these words in narration: {}.\n\n",
            brief.style_checks.forbid_inner_monologue_terms.join(", ")
        ));
    }
    prompt.push_str("Write the full chapter now.\n");
    prompt
}

/// Redraft prompt after local quality checks failed.
pub fn quality_revision_prompt(brief: &ChapterBrief, draft: &str, issues: &[String]) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Your draft of chapter {} has mechanical problems. Here is the draft:\n\n",
        brief.meta.chapter_number
    ));
    prompt.push_str(draft.trim());
    prompt.push_str("\n\nPROBLEMS FOUND:\n");
    for issue in issues {
        prompt.push_str("- ");
        prompt.push_str(issue);
        prompt.push('\n');
    }
    prompt.push_str(&format!(
        "\nRewrite the complete chapter fixing every problem above. Keep the same \
         events and beats. Target length remains about {} words.\n",
        brief.meta.target_words
    ));
    prompt
}

/// Critique prompt: the rubric, the brief, the story context, and the
/// chapter text.
pub fn critique_prompt(
    brief: &ChapterBrief,
    chapter: &str,
    context: &CritiqueContext,
    local_red_flags: &[String],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(include_str!("prompts/critic_rubric.txt"));
    prompt.push_str("\nCHAPTER BRIEF:\n");
    if let Ok(brief_json) = serde_json::to_string_pretty(brief) {
        prompt.push_str(&brief_json);
    }
    prompt.push_str("\n\nCONTEXT (do not repeat back, just use it when judging):\n");
    if !context.story_so_far.trim().is_empty() {
        prompt.push_str("The story so far:\n");
        prompt.push_str(context.story_so_far.trim());
        prompt.push('\n');
    }
    if let Some(excerpt) = context
        .previous_excerpt
        .as_deref()
        .filter(|e| !e.trim().is_empty())
    {
        prompt.push_str("Closing lines of the previous chapter:\n");
        prompt.push_str(excerpt.trim());
        prompt.push('\n');
    }
    if !context.constraints_summary.trim().is_empty() {
        prompt.push_str("Project constraints:\n");
        prompt.push_str(context.constraints_summary.trim());
        prompt.push('\n');
    }
    if !local_red_flags.is_empty() {
        prompt.push_str("\n\nDEFECTS ALREADY DETECTED MECHANICALLY (include these in red_flags):\n");
        for flag in local_red_flags {
            prompt.push_str("- ");
            prompt.push_str(flag);
            prompt.push('\n');
        }
    }
    prompt.push_str("\n\nCHAPTER TEXT:\n");
    prompt.push_str(chapter.trim());
    prompt.push('\n');
    prompt
}

/// Revision prompt: the findings verbatim, with output markers.
pub fn revision_prompt(
    brief: &ChapterBrief,
    chapter: &str,
    findings: &CritiqueFindings,
    reasons: &[String],
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Revise chapter {} to address an editor's critique. The current text:\n\n",
        brief.meta.chapter_number
    ));
    prompt.push_str(chapter.trim());
    prompt.push_str("\n\nWHY THE CHAPTER WAS REJECTED:\n");
    for reason in reasons {
        prompt.push_str("- ");
        prompt.push_str(reason);
        prompt.push('\n');
    }
    if !findings.fix_list.is_empty() {
        prompt.push_str("\nTHE EDITOR'S FIX LIST, in priority order:\n");
        for fix in &findings.fix_list {
            prompt.push_str("- ");
            prompt.push_str(fix);
            prompt.push('\n');
        }
    }
    if !findings.strengths.is_empty() {
        prompt.push_str("\nKEEP THESE STRENGTHS INTACT:\n");
        for strength in &findings.strengths {
            prompt.push_str("- ");
            prompt.push_str(strength);
            prompt.push('\n');
        }
    }
    prompt.push_str(&format!(
        "\nNon-negotiable: keep the chapter heading format, every beat from the \
         brief, and a length of about {} words.\n\n\
         Output the complete revised chapter between these exact markers:\n\
         {REVISED_START}\n...revised chapter...\n{REVISED_END}\n",
        brief.meta.target_words
    ));
    prompt
}

/// Continuity extraction prompt for a finished chapter.
pub fn continuity_prompt(chapter_number: u32, chapter: &str, schema: &Value) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "Read chapter {chapter_number} below and extract its continuity facts: \
         which characters are introduced or developed, which plot threads are \
         opened, advanced, or resolved, the key events, and a 2-4 sentence \
         summary. Use the exact character and thread names from the text.\n\n"
    ));
    prompt.push_str("CHAPTER TEXT:\n");
    prompt.push_str(chapter.trim());
    prompt.push_str("\n\n");
    prompt.push_str(&coercion_instruction(schema));
    prompt
}

/// Render a scene plan as a numbered list.
pub fn format_scenes(scenes: &[ScenePlan]) -> String {
    let mut block = String::new();
    for (index, scene) in scenes.iter().enumerate() {
        block.push_str(&format!("{}. {}: {}", index + 1, scene.heading, scene.summary));
        if !scene.characters.is_empty() {
            block.push_str(&format!(" (on stage: {})", scene.characters.join(", ")));
        }
        block.push('\n');
    }
    block
}

/// Extract the revised chapter between markers, if present.
pub fn extract_revised(text: &str) -> Option<&str> {
    let start = text.find(REVISED_START)? + REVISED_START.len();
    let end = text[start..].find(REVISED_END)? + start;
    let revised = text[start..end].trim();
    if revised.is_empty() {
        None
    } else {
        Some(revised)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_repair_prompt_embeds_verbatim() {
        let payload = json!({"project": {"title": "Heart on Margin"}});
        let violations = vec![
            "/project/title: \"Heart on Margin\" must equal \"Hearts on Margin\"".to_string(),
        ];
        let schema = json!({"type": "object"});
        let prompt = repair_prompt(&payload, &violations, &schema);
        assert!(prompt.contains("Heart on Margin"));
        assert!(prompt.contains("must equal \"Hearts on Margin\""));
        assert!(prompt.contains("\"type\": \"object\"") || prompt.contains("{\"type\":\"object\"}"));
    }

    #[test]
    fn test_coercion_includes_skeleton() {
        let schema = json!({
            "type": "object",
            "required": ["title"],
            "properties": {"title": {"type": "string"}}
        });
        let block = coercion_instruction(&schema);
        assert!(block.contains("{\"title\":\"\"}"));
    }

    #[test]
    fn test_extract_revised() {
        let reply = format!("notes\n{REVISED_START}\n# Chapter 1\n\nText.\n{REVISED_END}\ntrailing");
        assert_eq!(extract_revised(&reply), Some("# Chapter 1\n\nText."));
        assert_eq!(extract_revised("no markers here"), None);
        let empty = format!("{REVISED_START}{REVISED_END}");
        assert_eq!(extract_revised(&empty), None);
    }

    #[test]
    fn test_format_scenes() {
        let scenes = vec![ScenePlan {
            heading: "Opening Bell".to_string(),
            summary: "Mara spots the anomaly".to_string(),
            characters: vec!["Mara".to_string()],
        }];
        let block = format_scenes(&scenes);
        assert_eq!(block, "1. Opening Bell: Mara spots the anomaly (on stage: Mara)\n");
    }
}
