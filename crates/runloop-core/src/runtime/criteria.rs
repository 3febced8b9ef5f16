// runloop-core/src/runtime/criteria.rs
// ============================================================================
// Module: Criteria Manager
// Description: Criteria normalization, merging, conflicts, and snapshots.
// Purpose: Build deterministic acceptance criteria bundles for evaluation.
// Dependencies: crate::{core, runtime}, serde_json
// ============================================================================

//! ## Overview
//! The criteria manager turns free-form acceptance statements into a
//! deterministic snapshot: normalized text derives stable ids, higher-priority
//! sources win merges, contradictions are detected by comparing negation
//! polarity over a stripped "core", and the whole sorted bundle hashes
//! canonically so reflection passes over the same inputs are idempotent.
//! Subjective, unquantified statements fail closed as `manual` criteria.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde_json::Map;
use serde_json::Value;

use crate::core::CriteriaConflict;
use crate::core::CriteriaSnapshot;
use crate::core::CriteriaSource;
use crate::core::Criterion;
use crate::core::CriterionId;
use crate::core::VerificationMethod;
use crate::core::derive_criterion_id;
use crate::core::sha256_canonical_json;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Baseline criterion injected when no explicit criteria exist.
pub const BASELINE_SUCCESS_CRITERION_TEXT: &str =
    "run completed successfully (status=completed and terminal event=workflow_complete)";

/// Maximum clarification questions composed per snapshot.
const MAX_USER_QUESTIONS: usize = 3;

/// Tokens that flip a statement's polarity (longest first so compound
/// Chinese tokens strip before their single-character prefix).
const NEGATION_TOKENS: &[&str] = &[
    "不得", "不能", "不要", "无需", "禁止", "不", "never", "deny", "not", "no",
];

/// Modal or filler tokens stripped before conflict comparison.
const STOPWORDS: &[&str] = &[
    "必须", "需要", "应当", "应该", "确保", "允许", "可以", "尽量", "务必", "请", "should",
    "ensure", "please", "shall", "must", "may",
];

/// Hints marking a statement as subjective when no number anchors it.
const SUBJECTIVE_HINTS: &[&str] = &[
    "更好", "更快", "更漂亮", "更美观", "好看", "优雅", "易用", "友好", "更稳定", "更安全",
    "better", "faster", "prettier", "beautiful", "secure",
];

// ============================================================================
// SECTION: Criteria Manager
// ============================================================================

/// Builds deterministic criteria snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct CriteriaManager;

impl CriteriaManager {
    /// Creates a criteria manager.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds a snapshot from explicit criteria, injecting the baseline when
    /// none are given.
    #[must_use]
    pub fn build_snapshot(
        &self,
        task_description: Option<&str>,
        user_criteria: &[String],
        plan_criteria: &[String],
    ) -> CriteriaSnapshot {
        let mut merged: BTreeMap<String, Criterion> = BTreeMap::new();

        for text in user_criteria {
            add_criterion(&mut merged, text, CriteriaSource::User, None);
        }
        for text in plan_criteria {
            add_criterion(&mut merged, text, CriteriaSource::Plan, None);
        }

        if merged.is_empty() {
            for (text, method) in infer_minimum_criteria(task_description) {
                add_criterion(&mut merged, &text, CriteriaSource::Inferred, Some(method));
            }
        }

        let mut criteria: Vec<Criterion> = merged.into_values().collect();
        criteria.sort_by(|a, b| {
            b.source
                .priority()
                .cmp(&a.source.priority())
                .then_with(|| normalize_text(&a.text).cmp(&normalize_text(&b.text)))
        });

        let conflicts = detect_conflicts(&criteria);
        let unverifiable: Vec<CriterionId> = criteria
            .iter()
            .filter(|criterion| is_unverifiable(criterion))
            .map(|criterion| criterion.id.clone())
            .collect();
        let user_questions = build_user_questions(&criteria, &conflicts, &unverifiable);

        let canonical: Vec<Value> = criteria.iter().map(Criterion::to_canonical_json).collect();
        let criteria_hash = sha256_canonical_json(&canonical).unwrap_or_default();

        CriteriaSnapshot {
            criteria,
            criteria_hash,
            conflicts,
            unverifiable_criteria_ids: unverifiable,
            user_questions,
        }
    }
}

// ============================================================================
// SECTION: Normalization
// ============================================================================

/// Lowercases and collapses whitespace.
fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns true when the text contains a digit anchor.
fn has_number(text: &str) -> bool {
    text.chars().any(|ch| ch.is_ascii_digit())
}

/// Returns true when the text reads subjective with no numeric anchor.
fn is_subjective_and_unquantified(text: &str) -> bool {
    let normalized = normalize_text(text);
    if has_number(&normalized) {
        return false;
    }
    SUBJECTIVE_HINTS.iter().any(|hint| normalized.contains(hint))
}

/// Returns true when the text carries a negation token.
fn is_negated(text: &str) -> bool {
    let normalized = normalize_text(text);
    NEGATION_TOKENS.iter().any(|token| normalized.contains(token))
}

/// Extracts the comparison "core" of a statement for conflict detection:
/// negation and modal tokens removed, punctuation stripped, whitespace
/// collapsed.
fn core_text(text: &str) -> String {
    let mut normalized = normalize_text(text);
    for token in NEGATION_TOKENS {
        normalized = normalized.replace(token, " ");
    }
    for token in STOPWORDS {
        normalized = normalized.replace(token, " ");
    }
    let stripped: String = normalized
        .chars()
        .map(|ch| if ch.is_alphanumeric() || is_cjk(ch) { ch } else { ' ' })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns true for CJK unified ideographs.
const fn is_cjk(ch: char) -> bool {
    matches!(ch, '\u{4e00}'..='\u{9fff}')
}

// ============================================================================
// SECTION: Merging
// ============================================================================

/// Adds a criterion to the merge map, preferring higher-priority sources.
fn add_criterion(
    merged: &mut BTreeMap<String, Criterion>,
    text: &str,
    source: CriteriaSource,
    method_override: Option<VerificationMethod>,
) {
    let normalized = normalize_text(text);
    if normalized.is_empty() {
        return;
    }
    let id = derive_criterion_id(&normalized);
    let method = method_override.unwrap_or_else(|| infer_verification_method(text, source));
    let candidate = Criterion {
        id: CriterionId::new(id.clone()),
        text: text.trim().to_string(),
        source,
        verification_method: method,
        meta: Map::new(),
    };

    match merged.get(&id) {
        Some(existing) if existing.source.priority() >= candidate.source.priority() => {}
        _ => {
            merged.insert(id, candidate);
        }
    }
}

/// Returns the minimum inferred criteria for a task.
fn infer_minimum_criteria(task_description: Option<&str>) -> Vec<(String, VerificationMethod)> {
    let mut inferred =
        vec![(BASELINE_SUCCESS_CRITERION_TEXT.to_string(), VerificationMethod::RunEvent)];
    if let Some(description) = task_description {
        let trimmed = description.trim();
        if !trimmed.is_empty() && is_subjective_and_unquantified(trimmed) {
            inferred.push((format!("goal satisfied: {trimmed}"), VerificationMethod::Manual));
        }
    }
    inferred
}

/// Heuristic verification-method inference for explicit criteria.
fn infer_verification_method(text: &str, source: CriteriaSource) -> VerificationMethod {
    let normalized = normalize_text(text);
    if source == CriteriaSource::Inferred
        && normalized == normalize_text(BASELINE_SUCCESS_CRITERION_TEXT)
    {
        return VerificationMethod::RunEvent;
    }
    if is_subjective_and_unquantified(&normalized) {
        return VerificationMethod::Manual;
    }
    VerificationMethod::Unknown
}

/// Returns true when the criterion cannot be auto-verified.
fn is_unverifiable(criterion: &Criterion) -> bool {
    match criterion.verification_method {
        VerificationMethod::Manual => true,
        VerificationMethod::Unknown => is_subjective_and_unquantified(&criterion.text),
        _ => false,
    }
}

// ============================================================================
// SECTION: Conflicts and Questions
// ============================================================================

/// Detects opposite-polarity criteria sharing a comparison core.
fn detect_conflicts(criteria: &[Criterion]) -> Vec<CriteriaConflict> {
    let mut indexed: BTreeMap<String, (&Criterion, bool)> = BTreeMap::new();
    let mut conflicts = Vec::new();

    for criterion in criteria {
        let core = core_text(&criterion.text);
        if core.is_empty() {
            continue;
        }
        let negated = is_negated(&criterion.text);
        match indexed.get(&core) {
            None => {
                indexed.insert(core, (criterion, negated));
            }
            Some((other, other_negated)) if negated != *other_negated => {
                let (left, right) = if other.id.as_str() < criterion.id.as_str() {
                    (other.id.clone(), criterion.id.clone())
                } else {
                    (criterion.id.clone(), other.id.clone())
                };
                conflicts.push(CriteriaConflict {
                    left_id: left,
                    right_id: right,
                    reason: format!("conflict_on_core:{core}"),
                });
            }
            Some(_) => {}
        }
    }
    conflicts
}

/// Composes at most three clarification questions: conflicts first, then
/// prompts to quantify unverifiable criteria.
fn build_user_questions(
    criteria: &[Criterion],
    conflicts: &[CriteriaConflict],
    unverifiable: &[CriterionId],
) -> Vec<String> {
    let text_by_id: BTreeMap<&str, &str> = criteria
        .iter()
        .map(|criterion| (criterion.id.as_str(), criterion.text.as_str()))
        .collect();
    let mut questions = Vec::new();

    for conflict in conflicts {
        if questions.len() >= MAX_USER_QUESTIONS {
            return questions;
        }
        let left =
            text_by_id.get(conflict.left_id.as_str()).copied().unwrap_or(conflict.left_id.as_str());
        let right = text_by_id
            .get(conflict.right_id.as_str())
            .copied()
            .unwrap_or(conflict.right_id.as_str());
        questions.push(format!(
            "These criteria conflict; confirm which one to keep: A) {left}  B) {right}"
        ));
    }

    for id in unverifiable {
        if questions.len() >= MAX_USER_QUESTIONS {
            return questions;
        }
        let text = text_by_id.get(id.as_str()).copied().unwrap_or(id.as_str());
        questions.push(format!(
            "Make this criterion measurable: {text} (give a threshold, sample output, or baseline)"
        ));
    }
    questions
}
