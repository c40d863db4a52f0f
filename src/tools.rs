//! Tool surface over the query layer.
//!
//! Every lookup the engine offers is exposed as a [`Tool`]: a name, a
//! description agents read to decide when to call it, a JSON Schema for its
//! parameters, and an `execute` method. Tools live in a [`ToolRegistry`] that
//! the HTTP server, the MCP bridge and the CLI all dispatch through.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │                ToolRegistry                │
//! │  organization: company / division /        │
//! │                department / group          │
//! │  users:        by name / by group          │
//! │  evaluation:   by user name                │
//! └──────────────┬─────────────────────────────┘
//!                ▼
//!   POST /tools/{name}  ·  MCP call_tool  ·  newarp query
//! ```
//!
//! A tool never fails because of the upstream system or the cache: such
//! failures come back as the `{ "error": ... }` envelope inside a successful
//! result. `execute` only returns `Err` for invalid parameters.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::engine::Engine;
use crate::query::{
    render, COMPANY_REPORT, DEPARTMENT_REPORT, DIVISION_REPORT, EVALUATION_REPORT, GROUP_REPORT,
    USER_REPORT,
};

/// A tool agents can discover and call.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`) and MCP tool name.
    fn name(&self) -> &str;

    /// Usage description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) of the parameters.
    fn parameters_schema(&self) -> Value;

    /// Runs the tool with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// What a tool can reach while executing.
#[derive(Clone)]
pub struct ToolContext {
    engine: Arc<Engine>,
}

impl ToolContext {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// Entry of `GET /tools/list`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolInfo {
    pub fn of(tool: &dyn Tool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters_schema(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Built-in lookups
// ═══════════════════════════════════════════════════════════════════════

/// The fixed set of lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    CompanyOrganization,
    Division,
    Department,
    Group,
    UserByName,
    UserByGroup,
    Evaluation,
}

/// The single string parameter a lookup takes.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    pub name: &'static str,
    pub description: &'static str,
}

impl Lookup {
    pub const ALL: [Lookup; 7] = [
        Lookup::CompanyOrganization,
        Lookup::Division,
        Lookup::Department,
        Lookup::Group,
        Lookup::UserByName,
        Lookup::UserByGroup,
        Lookup::Evaluation,
    ];

    pub fn tool_name(&self) -> &'static str {
        match self {
            Lookup::CompanyOrganization => "get_company_organization_master",
            Lookup::Division => "get_division_master",
            Lookup::Department => "get_department_master",
            Lookup::Group => "get_group_master",
            Lookup::UserByName => "get_user_master_user_name",
            Lookup::UserByGroup => "get_user_master_group_short_name",
            Lookup::Evaluation => "get_user_evaluation",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Lookup::CompanyOrganization => concat!(
                "会社全体の組織構造を一覧で取得するツールです。",
                "事業部・部門・グループのすべての階層を含む組織マスタを返します。",
                "組織の全体像を把握したい場合や、どの事業部・部門・グループが存在するか分からない場合に使用してください。",
                "他の組織検索ツール（事業部・部門・グループ指定）の前段として利用されます。",
                "例: '会社の組織構成を教えて', 'どんな事業部があるか一覧で見たい'"
            ),
            Lookup::Division => concat!(
                "事業部単位で組織情報を取得するツールです。",
                "事業部短縮名（divisionShortName）を指定して検索します。",
                "指定した事業部に属する部門およびグループ一覧を返します。",
                "特定の事業部にどの部門・グループがあるかを知りたい質問のときに使用してください。",
                "例: '営業事業部にはどんな部門がある？', 'BSS事業部の組織構成を教えて'"
            ),
            Lookup::Department => concat!(
                "部門単位で組織情報を取得するツールです。",
                "部門短縮名（departmentShortName）を指定して検索します。",
                "指定した部門に属するグループ一覧と、上位の事業部情報を含めて返します。",
                "特定の部門にどのグループが属しているか、またその部門の事業部を知りたい質問のときに使用してください。",
                "例: '営業部にはどんなグループがある？', 'BSS部門はどの事業部？'"
            ),
            Lookup::Group => concat!(
                "グループ（課）単位の組織情報を取得するツールです。",
                "グループ短縮名（groupShortName）を指定して検索します。",
                "事業部・部門・グループの階層構造を含む情報を返します。",
                "特定のグループがどの事業部・部門に属しているかを知りたい質問のときに使用してください。",
                "例: 'BSSグループはどの部門？', '○○グループの所属事業部を教えて'"
            ),
            Lookup::UserByName => concat!(
                "社員（ユーザ）情報を検索して返すツールです。",
                "社員名（userName）をもとにユーザマスタを検索します。",
                "userName は部分一致で検索されます。",
                "社員の氏名、メールアドレス、所属グループ、役職などを知りたい質問のときに使用してください。",
                "例: '山田太郎のメールアドレスは？', '佐藤という名前の社員一覧を出して'"
            ),
            Lookup::UserByGroup => concat!(
                "社員（ユーザ）情報を検索して返すツールです。",
                "グループ短縮名（groupShortName）をもとにユーザマスタを検索します。",
                "グループに所属する社員の氏名、メールアドレス、所属グループ、役職などを知りたい質問のときに使用してください。",
                "例: 'BTIに所属する社員一覧を出して'"
            ),
            Lookup::Evaluation => concat!(
                "社員（ユーザ）の評価面談情報を取得して返すツールです。過去の履歴も含めて返します。",
                "社員名（userName）をもとに検索します。",
                "userName は部分一致で検索されます。",
                "社員の自己評価や得意なこと苦手なこと、キャリアプランややりたいことを質問するときに使用してください。",
                "例: '山田太郎の何が得意？', '佐藤のキャリアプランは何？', '佐藤のスキルは何が得意？'"
            ),
        }
    }

    pub fn parameter(&self) -> Option<ParamSpec> {
        match self {
            Lookup::CompanyOrganization => None,
            Lookup::Division => Some(ParamSpec {
                name: "divisionShortName",
                description: "検索対象の事業部短縮名（完全一致）",
            }),
            Lookup::Department => Some(ParamSpec {
                name: "departmentShortName",
                description: "検索対象の部門短縮名（完全一致）",
            }),
            Lookup::Group => Some(ParamSpec {
                name: "groupShortName",
                description: "検索対象のグループ短縮名（完全一致）",
            }),
            Lookup::UserByName | Lookup::Evaluation => Some(ParamSpec {
                name: "userName",
                description: "検索したい社員名（部分一致）",
            }),
            Lookup::UserByGroup => Some(ParamSpec {
                name: "groupShortName",
                description: "検索対象のグループ短縮名（完全一致）",
            }),
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Lookup> {
        Self::ALL.into_iter().find(|l| l.tool_name() == name)
    }

    /// Runs the lookup and renders its envelope.
    pub async fn run(&self, engine: &Engine, value: &str) -> Value {
        match self {
            Lookup::CompanyOrganization => {
                render(engine.company_organization().await, &COMPANY_REPORT)
            }
            Lookup::Division => {
                render(engine.by_division_short_name(value).await, &DIVISION_REPORT)
            }
            Lookup::Department => render(
                engine.by_department_short_name(value).await,
                &DEPARTMENT_REPORT,
            ),
            Lookup::Group => render(engine.by_group_short_name(value).await, &GROUP_REPORT),
            Lookup::UserByName => render(engine.users_by_name(value).await, &USER_REPORT),
            Lookup::UserByGroup => render(
                engine.users_by_group_short_name(value).await,
                &USER_REPORT,
            ),
            Lookup::Evaluation => render(
                engine.evaluation_by_user_name(value).await,
                &EVALUATION_REPORT,
            ),
        }
    }
}

/// A [`Lookup`] registered as a [`Tool`].
pub struct LookupTool {
    lookup: Lookup,
}

impl LookupTool {
    pub fn new(lookup: Lookup) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Tool for LookupTool {
    fn name(&self) -> &str {
        self.lookup.tool_name()
    }

    fn description(&self) -> &str {
        self.lookup.description()
    }

    fn parameters_schema(&self) -> Value {
        match self.lookup.parameter() {
            None => json!({
                "type": "object",
                "properties": {}
            }),
            Some(param) => {
                let mut properties = Map::new();
                properties.insert(
                    param.name.to_string(),
                    json!({ "type": "string", "description": param.description }),
                );
                json!({
                    "type": "object",
                    "properties": properties,
                    "required": [param.name]
                })
            }
        }
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let value = match self.lookup.parameter() {
            None => "",
            Some(param) => match params.get(param.name).and_then(|v| v.as_str()) {
                Some(s) => s,
                None => bail!("missing required parameter: {}", param.name),
            },
        };
        tracing::info!(tool = self.name(), value, "tool call");
        Ok(self.lookup.run(ctx.engine(), value).await)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of callable tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding every built-in lookup, in declaration order.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for lookup in Lookup::ALL {
            registry.register(Box::new(LookupTool::new(lookup)));
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter validation
// ═══════════════════════════════════════════════════════════════════════

/// Checks parameters against a tool schema.
///
/// Required fields must be present and every declared property must have its
/// declared type. Empty strings are accepted. Unknown fields are passed
/// through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|v| v.as_str()) {
            if !params_obj.contains_key(field) {
                bail!("missing required parameter: {}", field);
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
        for (prop_name, prop_schema) in properties {
            let Some(value) = params_obj.get(prop_name) else {
                continue;
            };
            let Some(expected) = prop_schema.get("type").and_then(|t| t.as_str()) else {
                continue;
            };
            let type_ok = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !type_ok {
                bail!(
                    "parameter '{}' must be of type '{}', got {}",
                    prop_name,
                    expected,
                    json_type_name(value)
                );
            }
        }
    }

    Ok(Value::Object(params_obj))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
