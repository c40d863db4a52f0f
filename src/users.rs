//! User master view.

use serde::Serialize;

use crate::engine::Engine;
use crate::error::Result;
use crate::models::User;
use crate::upstream::{Dataset, SessionSlot};

pub const USER_COLUMNS: [&str; 7] = [
    "ユーザキー",
    "ユーザID",
    "ユーザ名",
    "メールアドレス",
    "グループ短縮名",
    "役職",
    "入社日",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserRow {
    #[serde(rename = "ユーザキー")]
    pub user_key: String,
    #[serde(rename = "ユーザID")]
    pub user_id: String,
    #[serde(rename = "ユーザ名")]
    pub user_name: String,
    #[serde(rename = "メールアドレス")]
    pub mail_address: String,
    #[serde(rename = "グループ短縮名")]
    pub group_short_name: String,
    #[serde(rename = "役職")]
    pub position: String,
    #[serde(rename = "入社日")]
    pub joining_date: String,
}

impl From<User> for UserRow {
    fn from(u: User) -> Self {
        Self {
            user_key: u.user_key,
            user_id: u.user_id,
            user_name: u.user_name,
            mail_address: u.mail_address,
            group_short_name: u.group_short_name,
            position: u.position,
            joining_date: u.joining_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserView {
    pub columns: Vec<String>,
    pub rows: Vec<UserRow>,
}

impl UserView {
    /// Users whose name contains `fragment` (case-sensitive).
    pub fn matching_name(&self, fragment: &str) -> Vec<UserRow> {
        self.rows
            .iter()
            .filter(|u| u.user_name.contains(fragment))
            .cloned()
            .collect()
    }

    /// Users whose group short name equals `name` exactly.
    pub fn in_group(&self, name: &str) -> Vec<UserRow> {
        self.rows
            .iter()
            .filter(|u| u.group_short_name == name)
            .cloned()
            .collect()
    }
}

impl Engine {
    /// The user master, fetching it on a cache miss.
    pub async fn user_view(&self) -> Result<UserView> {
        self.user_view_in(&mut self.session_slot()).await
    }

    /// Like [`user_view`](Engine::user_view), logging in through the
    /// caller's session slot when a fetch is needed.
    pub(crate) async fn user_view_in(&self, slot: &mut SessionSlot<'_>) -> Result<UserView> {
        self.ensure_tables(&[Dataset::User], slot).await?;
        let users: Vec<User> = self.load_table(Dataset::User).await?;

        Ok(UserView {
            columns: USER_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: users.into_iter().map(UserRow::from).collect(),
        })
    }
}
