//! The return value of a `Run`: one summary per account.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountSummary {
    pub filled: Vec<String>,
    pub canceled: Vec<String>,
    pub timeout: bool,
    pub done: bool,
    pub user_cancel: bool,
}

pub type RunSummary = HashMap<String, AccountSummary>;
