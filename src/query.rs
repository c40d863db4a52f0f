//! Filtered lookups and response envelopes.
//!
//! Every top-level operation returns a [`QueryOutcome`]: a found payload, an
//! empty result, or (for evaluation lookups) an ambiguous set of candidate
//! users. Failures stay in [`HarnessError`] until [`render`] turns the whole
//! thing into the JSON envelope callers see:
//!
//! ```text
//! found / empty / ambiguous:
//!   { "report_title", "description", "analysis_instruction", "columns"?, "data" }
//! failure:
//!   { "error": "<message>" }
//! ```
//!
//! Empty and ambiguous envelopes are told apart from found ones by their
//! `description` text; an empty result always carries `data: []`.

use serde::Serialize;
use serde_json::{json, Value};

use crate::engine::Engine;
use crate::error::{HarnessError, Result};
use crate::evaluation::EvaluationHistory;
use crate::org::{OrganizationRow, OrganizationView};
use crate::users::{UserRow, UserView};

/// Result of a lookup that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T> {
    Found(T),
    Empty { columns: Vec<String> },
    Ambiguous { columns: Vec<String>, candidates: Vec<UserRow> },
}

/// A payload that can fill the `columns` and `data` slots of an envelope.
pub trait EnvelopeBody {
    /// Column labels, or `None` when `data` is not tabular.
    fn columns(&self) -> Option<&[String]>;
    fn data(&self) -> Value;
}

impl EnvelopeBody for OrganizationView {
    fn columns(&self) -> Option<&[String]> {
        Some(&self.columns)
    }

    fn data(&self) -> Value {
        serde_json::to_value(&self.rows).unwrap_or_default()
    }
}

impl EnvelopeBody for UserView {
    fn columns(&self) -> Option<&[String]> {
        Some(&self.columns)
    }

    fn data(&self) -> Value {
        serde_json::to_value(&self.rows).unwrap_or_default()
    }
}

impl EnvelopeBody for EvaluationHistory {
    fn columns(&self) -> Option<&[String]> {
        None
    }

    fn data(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Fixed texts of one report kind.
#[derive(Debug, Clone, Copy)]
pub struct ReportTexts {
    pub title: &'static str,
    /// Title of empty and ambiguous envelopes.
    pub miss_title: &'static str,
    pub found_description: &'static str,
    pub found_instruction: &'static str,
    pub empty_description: &'static str,
    pub empty_instruction: &'static str,
}

const ANSWER_IN_PROSE: &str = "質問で求められている情報を文章で回答してください。";
const NO_SUCH_EMPLOYEE: &str = "該当する社員が見つかりませんでした。";
const TELL_NO_EMPLOYEE: &str = "該当者がいない旨をユーザーに伝えてください。";

pub const AMBIGUOUS_DESCRIPTION: &str = "該当する社員が複数見つかりました。";
pub const AMBIGUOUS_INSTRUCTION: &str =
    "該当者を1名に絞り込める情報を渡すようにユーザーに伝えてください。";

pub const COMPANY_REPORT: ReportTexts = ReportTexts {
    title: "会社組織情報",
    miss_title: "会社組織情報",
    found_description: "これは会社全体の組織情報です。事業部 → 部門 → グループの階層構造を1行ずつ表しています。各行は1つのグループに対応し、上位の事業部・部門情報を含みます。",
    found_instruction: "このデータから事業部・部門・グループの階層構造を整理し、質問で求められている組織単位や名称を特定してください。全体構造の説明が求められている場合は、上位から順に分かりやすく文章でまとめてください。",
    empty_description: "会社組織情報が登録されていません。",
    empty_instruction: "組織情報が存在しないことをユーザーに伝えてください。",
};

pub const DIVISION_REPORT: ReportTexts = ReportTexts {
    title: "事業部情報",
    miss_title: "事業部情報",
    found_description: "これは指定された事業部の情報です。事業部→部門→グループの構造を表しています。",
    found_instruction: ANSWER_IN_PROSE,
    empty_description: "指定された事業部は見つかりませんでした。",
    empty_instruction: "該当する事業部が存在しないことをユーザーに伝えてください。",
};

pub const DEPARTMENT_REPORT: ReportTexts = ReportTexts {
    title: "部門情報",
    miss_title: "部門情報",
    found_description: "これは指定された部門の情報です。事業部→部門→グループの構造を表しています。",
    found_instruction: ANSWER_IN_PROSE,
    empty_description: "指定された部門は見つかりませんでした。",
    empty_instruction: "該当する部門が存在しないことをユーザーに伝えてください。",
};

pub const GROUP_REPORT: ReportTexts = ReportTexts {
    title: "グループ情報",
    miss_title: "グループ情報",
    found_description: "これは指定されたグループの情報です。事業部→部門→グループの構造を表しています。",
    found_instruction: ANSWER_IN_PROSE,
    empty_description: "指定されたグループは見つかりませんでした。",
    empty_instruction: "該当するグループが存在しないことをユーザーに伝えてください。",
};

pub const USER_REPORT: ReportTexts = ReportTexts {
    title: "ユーザ情報",
    miss_title: "ユーザ情報",
    found_description: "これはユーザ情報です。",
    found_instruction: ANSWER_IN_PROSE,
    empty_description: NO_SUCH_EMPLOYEE,
    empty_instruction: TELL_NO_EMPLOYEE,
};

pub const EVALUATION_REPORT: ReportTexts = ReportTexts {
    title: "評価面談情報",
    miss_title: "評価面談",
    found_description: "これは評価面談情報です。対象者の面談情報と評価得点を過去の情報も含めて取得しています。",
    found_instruction: ANSWER_IN_PROSE,
    empty_description: NO_SUCH_EMPLOYEE,
    empty_instruction: TELL_NO_EMPLOYEE,
};

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    report_title: &'a str,
    description: &'a str,
    analysis_instruction: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    columns: Option<&'a [String]>,
    data: Value,
}

/// Renders an operation result as its JSON envelope.
pub fn render<T: EnvelopeBody>(result: Result<QueryOutcome<T>>, texts: &ReportTexts) -> Value {
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return error_envelope(&e),
    };

    let envelope = match &outcome {
        QueryOutcome::Found(body) => Envelope {
            report_title: texts.title,
            description: texts.found_description,
            analysis_instruction: texts.found_instruction,
            columns: body.columns(),
            data: body.data(),
        },
        QueryOutcome::Empty { columns } => Envelope {
            report_title: texts.miss_title,
            description: texts.empty_description,
            analysis_instruction: texts.empty_instruction,
            columns: Some(columns),
            data: json!([]),
        },
        QueryOutcome::Ambiguous {
            columns,
            candidates,
        } => Envelope {
            report_title: texts.miss_title,
            description: AMBIGUOUS_DESCRIPTION,
            analysis_instruction: AMBIGUOUS_INSTRUCTION,
            columns: Some(columns),
            data: serde_json::to_value(candidates).unwrap_or_default(),
        },
    };

    serde_json::to_value(envelope).unwrap_or_default()
}

/// The failure envelope.
pub fn error_envelope(err: &HarnessError) -> Value {
    tracing::warn!(error = %err, "query failed");
    json!({ "error": err.to_string() })
}

fn organization_subset(
    view: OrganizationView,
    keep: impl Fn(&OrganizationRow) -> bool,
) -> QueryOutcome<OrganizationView> {
    let rows: Vec<OrganizationRow> = view.rows.into_iter().filter(|r| keep(r)).collect();
    if rows.is_empty() {
        QueryOutcome::Empty {
            columns: view.columns,
        }
    } else {
        QueryOutcome::Found(OrganizationView {
            columns: view.columns,
            rows,
        })
    }
}

fn user_subset(columns: Vec<String>, rows: Vec<UserRow>) -> QueryOutcome<UserView> {
    if rows.is_empty() {
        QueryOutcome::Empty { columns }
    } else {
        QueryOutcome::Found(UserView { columns, rows })
    }
}

impl Engine {
    /// The whole organization, one row per group.
    pub async fn company_organization(&self) -> Result<QueryOutcome<OrganizationView>> {
        Ok(QueryOutcome::Found(self.organization_view().await?))
    }

    /// Rows whose division short name equals `name`.
    pub async fn by_division_short_name(
        &self,
        name: &str,
    ) -> Result<QueryOutcome<OrganizationView>> {
        let view = self.organization_view().await?;
        Ok(organization_subset(view, |r| r.division_short_name == name))
    }

    /// Rows whose department short name equals `name`.
    pub async fn by_department_short_name(
        &self,
        name: &str,
    ) -> Result<QueryOutcome<OrganizationView>> {
        let view = self.organization_view().await?;
        Ok(organization_subset(view, |r| r.department_short_name == name))
    }

    /// Rows whose group short name equals `name`.
    pub async fn by_group_short_name(&self, name: &str) -> Result<QueryOutcome<OrganizationView>> {
        let view = self.organization_view().await?;
        Ok(organization_subset(view, |r| r.group_short_name == name))
    }

    /// Users whose name contains `fragment`.
    pub async fn users_by_name(&self, fragment: &str) -> Result<QueryOutcome<UserView>> {
        let view = self.user_view().await?;
        let rows = view.matching_name(fragment);
        Ok(user_subset(view.columns, rows))
    }

    /// Users whose group short name equals `name`.
    pub async fn users_by_group_short_name(&self, name: &str) -> Result<QueryOutcome<UserView>> {
        let view = self.user_view().await?;
        let rows = view.in_group(name);
        Ok(user_subset(view.columns, rows))
    }

    /// Evaluation history of the single user whose name contains `fragment`.
    ///
    /// Zero or several matching users short-circuit before any evaluation
    /// dataset is touched. The user table and every evaluation sheet share
    /// one login.
    pub async fn evaluation_by_user_name(
        &self,
        fragment: &str,
    ) -> Result<QueryOutcome<EvaluationHistory>> {
        let mut slot = self.session_slot();
        let view = self.user_view_in(&mut slot).await?;
        let mut matches = view.matching_name(fragment);

        match matches.len() {
            0 => Ok(QueryOutcome::Empty {
                columns: view.columns,
            }),
            1 => {
                let user = matches.remove(0);
                tracing::debug!(user_key = %user.user_key, "resolved evaluation target");
                let history = self.evaluation_history_in(&user, &mut slot).await?;
                Ok(QueryOutcome::Found(history))
            }
            _ => Ok(QueryOutcome::Ambiguous {
                columns: view.columns,
                candidates: matches,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::org::ORGANIZATION_COLUMNS;
    use crate::users::USER_COLUMNS;

    fn org_view() -> OrganizationView {
        let row = |div: &str, dep: &str, grp: &str| OrganizationRow {
            division_short_name: div.into(),
            department_short_name: dep.into(),
            group_short_name: grp.into(),
            ..Default::default()
        };
        OrganizationView {
            columns: ORGANIZATION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: vec![row("SAL", "SO", "T1"), row("SAL", "SO", "T2"), row("ENG", "PL", "P1")],
        }
    }

    #[test]
    fn test_subset_found_and_empty() {
        match organization_subset(org_view(), |r| r.division_short_name == "SAL") {
            QueryOutcome::Found(v) => assert_eq!(v.rows.len(), 2),
            other => panic!("unexpected outcome: {:?}", other),
        }
        match organization_subset(org_view(), |r| r.division_short_name == "SA") {
            QueryOutcome::Empty { columns } => assert_eq!(columns.len(), 9),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_found_envelope_shape() {
        let value = render(Ok(QueryOutcome::Found(org_view())), &COMPANY_REPORT);
        assert_eq!(value["report_title"], "会社組織情報");
        assert_eq!(value["columns"].as_array().unwrap().len(), 9);
        assert_eq!(value["data"].as_array().unwrap().len(), 3);
        assert_eq!(value["data"][2]["グループ短縮名"], "P1");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_empty_envelope_has_empty_data() {
        let result: Result<QueryOutcome<OrganizationView>> = Ok(QueryOutcome::Empty {
            columns: ORGANIZATION_COLUMNS.iter().map(|c| c.to_string()).collect(),
        });
        let value = render(result, &DIVISION_REPORT);
        assert_eq!(value["description"], "指定された事業部は見つかりませんでした。");
        assert_eq!(value["data"], json!([]));
    }

    #[test]
    fn test_error_envelope_has_only_error() {
        let result: Result<QueryOutcome<UserView>> =
            Err(HarnessError::Auth("login rejected with 401".into()));
        let value = render(result, &USER_REPORT);
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 1);
        assert!(obj["error"].as_str().unwrap().contains("401"));
    }

    #[test]
    fn test_evaluation_misses_use_lookup_title() {
        let columns: Vec<String> = USER_COLUMNS.iter().map(|c| c.to_string()).collect();
        let candidates = vec![
            UserRow {
                user_name: "山田 太郎".into(),
                ..Default::default()
            },
            UserRow {
                user_name: "山田 花子".into(),
                ..Default::default()
            },
        ];
        let result: Result<QueryOutcome<EvaluationHistory>> = Ok(QueryOutcome::Ambiguous {
            columns,
            candidates,
        });
        let value = render(result, &EVALUATION_REPORT);
        assert_eq!(value["report_title"], "評価面談");
        assert_eq!(value["description"], AMBIGUOUS_DESCRIPTION);
        assert_eq!(value["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_evaluation_found_has_no_columns() {
        let history = EvaluationHistory {
            target_user_name: "佐藤 次郎".into(),
            blocks: vec![],
        };
        let value = render(Ok(QueryOutcome::Found(history)), &EVALUATION_REPORT);
        assert_eq!(value["report_title"], "評価面談情報");
        assert!(value.get("columns").is_none());
        assert_eq!(value["data"]["対象者名"], "佐藤 次郎");
        assert_eq!(value["data"]["評価情報"], json!([]));
    }
}
