//! Organization view: the division → department → group join.
//!
//! One [`OrganizationRow`] is produced per group, in group-table order,
//! annotated with its department and that department's division. A group
//! whose parent cannot be resolved still yields a row; the unresolved level
//! (and everything above it) is left as empty strings.

use std::collections::HashMap;

use serde::Serialize;

use crate::engine::Engine;
use crate::error::Result;
use crate::models::{Department, Division, Group};
use crate::upstream::Dataset;

/// Column labels of the organization view, in output order.
pub const ORGANIZATION_COLUMNS: [&str; 9] = [
    "事業部コード",
    "事業部名",
    "事業部短縮名",
    "部門コード",
    "部門名",
    "部門短縮名",
    "グループコード",
    "グループ名",
    "グループ短縮名",
];

/// Master tables the organization view is built from, in fetch order.
pub const ORGANIZATION_TABLES: [Dataset; 3] =
    [Dataset::Division, Dataset::Department, Dataset::Group];

/// A group flattened together with its ancestors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganizationRow {
    #[serde(rename = "事業部コード")]
    pub division_code: String,
    #[serde(rename = "事業部名")]
    pub division_name: String,
    #[serde(rename = "事業部短縮名")]
    pub division_short_name: String,
    #[serde(rename = "部門コード")]
    pub department_code: String,
    #[serde(rename = "部門名")]
    pub department_name: String,
    #[serde(rename = "部門短縮名")]
    pub department_short_name: String,
    #[serde(rename = "グループコード")]
    pub group_code: String,
    #[serde(rename = "グループ名")]
    pub group_name: String,
    #[serde(rename = "グループ短縮名")]
    pub group_short_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationView {
    pub columns: Vec<String>,
    pub rows: Vec<OrganizationRow>,
}

/// Joins the three master tables.
///
/// Duplicate codes are not detected: the last division/department with a
/// given code wins.
pub fn join_organization(
    divisions: &[Division],
    departments: &[Department],
    groups: &[Group],
) -> Vec<OrganizationRow> {
    let division_by_code: HashMap<&str, &Division> = divisions
        .iter()
        .map(|d| (d.division_code.as_str(), d))
        .collect();
    let department_by_code: HashMap<&str, &Department> = departments
        .iter()
        .map(|d| (d.department_code.as_str(), d))
        .collect();

    groups
        .iter()
        .map(|group| {
            let department = department_by_code
                .get(group.department_code.as_str())
                .copied();
            let division = department
                .and_then(|dep| division_by_code.get(dep.division_code.as_str()))
                .copied();

            let mut row = OrganizationRow {
                group_code: group.group_code.clone(),
                group_name: group.group_name.clone(),
                group_short_name: group.group_short_name.clone(),
                ..Default::default()
            };
            if let Some(dep) = department {
                row.department_code = dep.department_code.clone();
                row.department_name = dep.department_name.clone();
                row.department_short_name = dep.department_short_name.clone();
            }
            if let Some(div) = division {
                row.division_code = div.division_code.clone();
                row.division_name = div.division_name.clone();
                row.division_short_name = div.division_short_name.clone();
            }
            row
        })
        .collect()
}

impl Engine {
    /// Full organization view, fetching the master tables on a cache miss.
    pub async fn organization_view(&self) -> Result<OrganizationView> {
        let mut slot = self.session_slot();
        self.ensure_tables(&ORGANIZATION_TABLES, &mut slot).await?;

        let divisions: Vec<Division> = self.load_table(Dataset::Division).await?;
        let departments: Vec<Department> = self.load_table(Dataset::Department).await?;
        let groups: Vec<Group> = self.load_table(Dataset::Group).await?;

        Ok(OrganizationView {
            columns: ORGANIZATION_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: join_organization(&divisions, &departments, &groups),
        })
    }
}
