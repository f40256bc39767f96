//! Builds the tutor's system prompt from a recall set's template plus the
//! live checklist (spec §4.5 step 5).

use crate::checklist::Checklist;

pub fn build_tutor_system_prompt(discussion_system_prompt: &str, checklist: &Checklist) -> String {
    let mut prompt = discussion_system_prompt.to_string();
    prompt.push_str("\n\nChecklist of facts this student still needs to demonstrate:\n");
    for entry in checklist.entries() {
        prompt.push_str(&format!("- {}\n  ({})\n", entry.content, entry.context));
    }
    if checklist.is_empty() {
        prompt.push_str("- (none remaining — every point has been recalled)\n");
    }
    prompt
}
