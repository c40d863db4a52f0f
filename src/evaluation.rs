//! Evaluation history: interview sheets and score sheets per period.
//!
//! For one user and each configured period two datasets are loaded (and
//! cached under `<userKey>_<period>`):
//!
//! - the **interview sheet**, `{ "data": { "info": {...}, "pastDetails": [...] } }`,
//!   carrying the narrative fields and the goal list;
//! - the **score sheet**, `{ "data": [...], "dataNotSelf": [...] }`, carrying
//!   the self assessment and the manager assessment of every skill.
//!
//! Self and manager entries are reconciled by `evaluationKindId` through a
//! [`ManagerScores`] index built once per sheet. A retained self entry with no
//! manager counterpart fails the whole history with
//! [`HarnessError::Reconciliation`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::Engine;
use crate::error::{HarnessError, Result};
use crate::models::lenient_string;
use crate::upstream::{Dataset, PeriodScope, SessionSlot};
use crate::users::UserRow;

/// Category label of performance-review items (never scored as skills).
pub const PERFORMANCE_REVIEW: &str = "業績考課";
/// Category label of technical-review items (reported in their own list).
pub const TECHNICAL_REVIEW: &str = "技術考課";

// ============ Wire records ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InterviewInfo {
    #[serde(deserialize_with = "lenient_string")]
    period_name: String,
    #[serde(deserialize_with = "lenient_string")]
    vision: String,
    #[serde(deserialize_with = "lenient_string")]
    appeal: String,
    #[serde(deserialize_with = "lenient_string")]
    note: String,
    #[serde(deserialize_with = "lenient_string")]
    evaluation_kind: String,
    #[serde(deserialize_with = "lenient_string")]
    evaluation_stage: String,
    #[serde(deserialize_with = "lenient_string")]
    evaluation_class: String,
    #[serde(deserialize_with = "lenient_string")]
    expectation: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GoalDetail {
    #[serde(deserialize_with = "lenient_string")]
    goal: String,
    #[serde(deserialize_with = "lenient_string")]
    condition: String,
    #[serde(deserialize_with = "lenient_string")]
    assessment: String,
    #[serde(deserialize_with = "lenient_string")]
    comment: String,
    #[serde(deserialize_with = "lenient_string")]
    assessment_comment: String,
}

/// One scored item of a score sheet.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreItem {
    #[serde(deserialize_with = "lenient_string")]
    pub group_name: String,
    #[serde(deserialize_with = "lenient_string")]
    pub evaluation_kind: String,
    #[serde(deserialize_with = "lenient_string")]
    pub evaluation_kind_id: String,
    pub item_points: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoreSheet {
    #[serde(rename = "data")]
    pub self_items: Vec<ScoreItem>,
    #[serde(rename = "dataNotSelf")]
    pub manager_items: Vec<ScoreItem>,
}

// ============ Output records ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterviewOverview {
    #[serde(rename = "将来のあるべき姿")]
    pub vision: String,
    #[serde(rename = "アピールポイント")]
    pub appeal: String,
    #[serde(rename = "会社へ一言")]
    pub note: String,
    #[serde(rename = "技術分類")]
    pub evaluation_kind: String,
    #[serde(rename = "評価ステージ")]
    pub evaluation_stage: String,
    #[serde(rename = "評価クラス")]
    pub evaluation_class: String,
    #[serde(rename = "管理職からの期待")]
    pub expectation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GoalReview {
    #[serde(rename = "目標")]
    pub goal: String,
    #[serde(rename = "達成条件")]
    pub condition: String,
    #[serde(rename = "達成度(%)")]
    pub assessment: String,
    #[serde(rename = "実行結果コメント")]
    pub comment: String,
    #[serde(rename = "管理職からのコメント")]
    pub manager_comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextGoal {
    #[serde(rename = "目標")]
    pub goal: String,
    #[serde(rename = "達成条件")]
    pub condition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRow {
    #[serde(rename = "スキル種類")]
    pub category: String,
    #[serde(rename = "スキル名")]
    pub skill_name: String,
    #[serde(rename = "自己評価得点")]
    pub self_score: Value,
    #[serde(rename = "管理職評価得点")]
    pub manager_score: Value,
}

/// Everything reported for one period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationBlock {
    #[serde(rename = "評価年月")]
    pub period_label: String,
    #[serde(rename = "評価全体情報")]
    pub overview: InterviewOverview,
    #[serde(rename = "前期目標振り返り")]
    pub past_goal_review: Vec<GoalReview>,
    #[serde(rename = "来季目標")]
    pub next_goals: Vec<NextGoal>,
    #[serde(rename = "能力評価得点")]
    pub skill_scores: Vec<ScoreRow>,
    #[serde(rename = "技術評価得点")]
    pub technical_scores: Vec<ScoreRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationHistory {
    #[serde(rename = "対象者名")]
    pub target_user_name: String,
    #[serde(rename = "評価情報")]
    pub blocks: Vec<EvaluationBlock>,
}

// ============ Interview sheet ============

/// Narrative part of an evaluation block, decoded from an interview sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterviewSummary {
    pub period_label: String,
    pub overview: InterviewOverview,
    pub past_goal_review: Vec<GoalReview>,
    pub next_goals: Vec<NextGoal>,
}

/// Decodes an interview-sheet blob.
///
/// Both goal lists are projections of one goal collection: the review list
/// always reads `pastDetails`, the next-goal list reads `next_goal_field`
/// (which is `pastDetails` unless configured otherwise).
pub fn summarize_interview(
    key: &str,
    blob: &Value,
    next_goal_field: &str,
) -> Result<InterviewSummary> {
    let sheet = blob
        .get("data")
        .filter(|v| v.is_object())
        .ok_or_else(|| HarnessError::corrupt(key, "missing data object"))?;

    let info: InterviewInfo = match sheet.get("info") {
        Some(v) if v.is_object() => serde_json::from_value(v.clone())
            .map_err(|e| HarnessError::corrupt(key, e.to_string()))?,
        _ => return Err(HarnessError::corrupt(key, "missing info object")),
    };

    let past = goal_details(key, sheet, "pastDetails")?;
    let next = if next_goal_field == "pastDetails" {
        past.clone()
    } else {
        goal_details(key, sheet, next_goal_field)?
    };

    Ok(InterviewSummary {
        period_label: info.period_name,
        overview: InterviewOverview {
            vision: info.vision,
            appeal: info.appeal,
            note: info.note,
            evaluation_kind: info.evaluation_kind,
            evaluation_stage: info.evaluation_stage,
            evaluation_class: info.evaluation_class,
            expectation: info.expectation,
        },
        past_goal_review: past
            .iter()
            .map(|g| GoalReview {
                goal: g.goal.clone(),
                condition: g.condition.clone(),
                assessment: g.assessment.clone(),
                comment: g.comment.clone(),
                manager_comment: g.assessment_comment.clone(),
            })
            .collect(),
        next_goals: next
            .into_iter()
            .map(|g| NextGoal {
                goal: g.goal,
                condition: g.condition,
            })
            .collect(),
    })
}

fn goal_details(key: &str, sheet: &Value, field: &str) -> Result<Vec<GoalDetail>> {
    match sheet.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(list @ Value::Array(_)) => serde_json::from_value(list.clone())
            .map_err(|e| HarnessError::corrupt(key, format!("{}: {}", field, e))),
        Some(_) => Err(HarnessError::corrupt(key, format!("{} is not an array", field))),
    }
}

// ============ Score sheet ============

/// Manager-assessment entries indexed by evaluation-kind id.
///
/// When an id occurs more than once the first entry is kept.
pub struct ManagerScores<'a> {
    by_kind: HashMap<&'a str, &'a ScoreItem>,
}

impl<'a> ManagerScores<'a> {
    pub fn index(items: &'a [ScoreItem]) -> Self {
        let mut by_kind = HashMap::with_capacity(items.len());
        for item in items {
            by_kind
                .entry(item.evaluation_kind_id.as_str())
                .or_insert(item);
        }
        Self { by_kind }
    }

    /// Pairs a self-assessment entry with its manager counterpart.
    pub fn reconcile(&self, own: &ScoreItem) -> Result<ScoreRow> {
        let manager = self
            .by_kind
            .get(own.evaluation_kind_id.as_str())
            .ok_or_else(|| HarnessError::Reconciliation {
                kind_id: own.evaluation_kind_id.clone(),
                kind: own.evaluation_kind.clone(),
            })?;
        Ok(ScoreRow {
            category: own.group_name.clone(),
            skill_name: own.evaluation_kind.clone(),
            self_score: own.item_points.clone(),
            manager_score: manager.item_points.clone(),
        })
    }
}

/// A score counts as empty when it is null, `""`, `0`, `false`, or an empty
/// collection; such items are left out of both lists.
pub fn is_empty_score(points: &Value) -> bool {
    match points {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Splits a score sheet into (skill scores, technical scores).
///
/// Performance-review items are dropped; technical-review items go to the
/// second list; every other scored item goes to the first. Order within each
/// list follows the self-assessment list.
pub fn reconcile_scores(sheet: &ScoreSheet) -> Result<(Vec<ScoreRow>, Vec<ScoreRow>)> {
    let managers = ManagerScores::index(&sheet.manager_items);
    let mut skills = Vec::new();
    let mut technical = Vec::new();

    for own in &sheet.self_items {
        if own.group_name == PERFORMANCE_REVIEW || is_empty_score(&own.item_points) {
            continue;
        }
        let row = managers.reconcile(own)?;
        if own.group_name == TECHNICAL_REVIEW {
            technical.push(row);
        } else {
            skills.push(row);
        }
    }

    Ok((skills, technical))
}

fn decode_score_sheet(key: &str, blob: Value) -> Result<ScoreSheet> {
    if !blob.is_object() {
        return Err(HarnessError::corrupt(key, "score sheet is not an object"));
    }
    serde_json::from_value(blob).map_err(|e| HarnessError::corrupt(key, e.to_string()))
}

impl Engine {
    /// Builds the evaluation history of one resolved user over every
    /// configured period, in configured order.
    ///
    /// Any failure aborts the whole history; no partial result is returned.
    pub async fn evaluation_history(&self, user: &UserRow) -> Result<EvaluationHistory> {
        self.evaluation_history_in(user, &mut self.session_slot()).await
    }

    pub(crate) async fn evaluation_history_in(
        &self,
        user: &UserRow,
        slot: &mut SessionSlot<'_>,
    ) -> Result<EvaluationHistory> {
        let config = self.evaluation_config();
        let mut blocks = Vec::with_capacity(config.periods.len());

        for period in &config.periods {
            let scope = PeriodScope {
                user_key: &user.user_key,
                period,
            };
            let sub_key = scope.sub_key();

            let interview_blob = self
                .load_scoped(Dataset::InterviewSheet, scope, slot)
                .await?;
            let score_blob = self
                .load_scoped(Dataset::ScoreSheet, scope, slot)
                .await?;

            let summary = summarize_interview(
                &format!("{}[{}]", Dataset::InterviewSheet.name(), sub_key),
                &interview_blob,
                &config.next_goal_field,
            )?;
            let sheet = decode_score_sheet(
                &format!("{}[{}]", Dataset::ScoreSheet.name(), sub_key),
                score_blob,
            )?;
            let (skill_scores, technical_scores) = reconcile_scores(&sheet)?;

            blocks.push(EvaluationBlock {
                period_label: summary.period_label,
                overview: summary.overview,
                past_goal_review: summary.past_goal_review,
                next_goals: summary.next_goals,
                skill_scores,
                technical_scores,
            });
        }

        Ok(EvaluationHistory {
            target_user_name: user.user_name.clone(),
            blocks,
        })
    }
}
