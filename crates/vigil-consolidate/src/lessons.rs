//! Lesson promotion and pattern detection (§4.G step 5), plus the
//! best-effort markdown mirror of curated lessons (step 6).

use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_core::time::MonotonicMs;
use vigil_memory::manager::MemoryStore;
use vigil_memory::types::Lesson;

use crate::error::Result;

const PATTERN_WINDOW_MS: i64 = 24 * 60 * 60 * 1_000;
const PATTERN_MIN_COUNT: usize = 3;

/// Promotes every qualifying lesson (`should_be_promoted`) that isn't
/// already promoted. Returns how many were newly promoted.
pub fn promote_eligible_lessons(memory: &Arc<MemoryStore>) -> Result<usize> {
    let mut promoted = 0;
    for lesson in memory.list_lessons_for_person(None, false)? {
        if !lesson.promoted && lesson.should_be_promoted() {
            memory.promote_lesson(lesson.lesson_id)?;
            promoted += 1;
        }
    }
    Ok(promoted)
}

/// Lesson types that recurred `PATTERN_MIN_COUNT` or more times in the
/// last 24h and don't already have a `Pattern:`-prefixed entry recording
/// the observation.
pub fn detect_unrecorded_patterns(lessons: &[Lesson]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut already_recorded: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();

    for lesson in lessons {
        let Some(lesson_type) = lesson.lesson_type.as_deref() else {
            continue;
        };
        if lesson.content.starts_with("Pattern:") {
            already_recorded.insert(lesson_type);
            continue;
        }
        *counts.entry(lesson_type).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .filter(|(lesson_type, count)| *count >= PATTERN_MIN_COUNT && !already_recorded.contains(lesson_type))
        .map(|(lesson_type, _)| lesson_type.to_string())
        .collect()
}

/// Runs promotion then pattern detection, recording a new observational
/// lesson for each freshly-detected pattern. Returns `(promoted_count,
/// patterns_recorded)`.
pub fn run_lesson_promotion(memory: &Arc<MemoryStore>) -> Result<(usize, usize)> {
    let promoted = promote_eligible_lessons(memory)?;

    let since = MonotonicMs::now().minus_ms(PATTERN_WINDOW_MS);
    let recent = memory.list_lessons_since(since)?;
    let patterns = detect_unrecorded_patterns(&recent);

    for lesson_type in &patterns {
        memory.add_lesson(
            "pattern",
            Some(lesson_type.as_str()),
            &format!("Pattern: recurring \"{lesson_type}\" lessons observed in the last 24 hours."),
            None,
            None,
            None,
            &[],
            None,
        )?;
    }

    Ok((promoted, patterns.len()))
}

/// §4.G step 6: best-effort markdown mirror of promoted lessons. Never
/// fails the consolidation run — mirroring is a convenience surface, not
/// a durability guarantee.
pub fn mirror_promoted_lessons(memory: &Arc<MemoryStore>) -> Result<()> {
    let lessons = memory.list_lessons_for_person(None, true)?;
    let rendered = render_lessons_markdown(&lessons);
    memory.mirror_lessons(&rendered);
    Ok(())
}

fn render_lessons_markdown(lessons: &[Lesson]) -> String {
    let mut out = String::from("# Promoted lessons\n\n");
    for lesson in lessons {
        out.push_str(&format!("- **{}**: {}\n", lesson.category, lesson.content));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::ids::LessonId;

    fn lesson(lesson_type: &str, content: &str) -> Lesson {
        Lesson {
            lesson_id: LessonId(1),
            category: "behavioral".into(),
            lesson_type: Some(lesson_type.into()),
            content: content.into(),
            rule: None,
            alternative: None,
            person_id: None,
            episode_refs: vec![],
            confidence: None,
            times_validated: 0,
            times_violated: 0,
            promoted: false,
            created_at_ms: MonotonicMs::now(),
        }
    }

    #[test]
    fn three_same_type_lessons_without_pattern_entry_triggers_detection() {
        let lessons = vec![
            lesson("over_apologizes", "said sorry unprompted"),
            lesson("over_apologizes", "apologized again for nothing"),
            lesson("over_apologizes", "a third unnecessary apology"),
        ];
        assert_eq!(detect_unrecorded_patterns(&lessons), vec!["over_apologizes".to_string()]);
    }

    #[test]
    fn existing_pattern_entry_suppresses_redetection() {
        let lessons = vec![
            lesson("over_apologizes", "said sorry unprompted"),
            lesson("over_apologizes", "apologized again for nothing"),
            lesson("over_apologizes", "a third unnecessary apology"),
            lesson("over_apologizes", "Pattern: recurring over_apologizes lessons observed in the last 24 hours."),
        ];
        assert!(detect_unrecorded_patterns(&lessons).is_empty());
    }

    #[test]
    fn below_threshold_count_is_not_a_pattern() {
        let lessons = vec![lesson("over_apologizes", "said sorry unprompted"), lesson("over_apologizes", "apologized again")];
        assert!(detect_unrecorded_patterns(&lessons).is_empty());
    }
}
