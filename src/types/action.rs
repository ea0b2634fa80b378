//! Action records submitted by the activity tracker

use super::timestamp::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ActionType {
    ApiCall,
    DomAccess,
    ContentScript,
    /// Query-only wildcard. Never stored.
    Any,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::ApiCall => "api_call",
            ActionType::DomAccess => "dom_access",
            ActionType::ContentScript => "content_script",
            ActionType::Any => "any",
        }
    }

    /// Whether a stored action of type `other` satisfies this filter value.
    pub fn matches(&self, other: ActionType) -> bool {
        *self == ActionType::Any || *self == other
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A primitive API argument.
///
/// Serializes to plain JSON, which keeps both order and type visible in the
/// canonical form (`["a",1,true]`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
}

impl From<&str> for ArgValue {
    fn from(v: &str) -> Self {
        ArgValue::String(v.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(v: String) -> Self {
        ArgValue::String(v)
    }
}

impl From<i64> for ArgValue {
    fn from(v: i64) -> Self {
        ArgValue::Int(v)
    }
}

impl From<f64> for ArgValue {
    fn from(v: f64) -> Self {
        ArgValue::Double(v)
    }
}

impl From<bool> for ArgValue {
    fn from(v: bool) -> Self {
        ArgValue::Bool(v)
    }
}

/// One observed extension action, or an aggregate of merged ones when returned
/// from a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub extension_id: String,
    pub time: Timestamp,
    pub action_type: ActionType,
    pub api_name: String,
    /// `None` when never set or stripped by the argument policy.
    pub args: Option<Vec<ArgValue>>,
    pub page_url: Option<Url>,
    pub page_title: Option<String>,
    pub arg_url: Option<Url>,
    pub count: u32,
}

impl ActionRecord {
    pub fn new(
        extension_id: impl Into<String>,
        time: Timestamp,
        action_type: ActionType,
        api_name: impl Into<String>,
    ) -> Self {
        Self {
            extension_id: extension_id.into(),
            time,
            action_type,
            api_name: api_name.into(),
            args: None,
            page_url: None,
            page_title: None,
            arg_url: None,
            count: 1,
        }
    }

    pub fn with_args(mut self, args: Vec<ArgValue>) -> Self {
        self.args = Some(args);
        self
    }

    /// Append one argument, creating the list if needed.
    pub fn push_arg(&mut self, arg: impl Into<ArgValue>) -> &mut Self {
        self.args.get_or_insert_with(Vec::new).push(arg.into());
        self
    }

    pub fn with_page_url(mut self, url: Url) -> Self {
        self.page_url = Some(url);
        self
    }

    pub fn with_page_title(mut self, title: impl Into<String>) -> Self {
        self.page_title = Some(title.into());
        self
    }

    pub fn with_arg_url(mut self, url: Url) -> Self {
        self.arg_url = Some(url);
        self
    }

    /// Canonical JSON of the arguments, empty when there are none.
    pub fn args_json(&self) -> String {
        self.args
            .as_deref()
            .map(super::key::canonical_args)
            .unwrap_or_default()
    }

    pub fn page_url_string(&self) -> String {
        self.page_url
            .as_ref()
            .map(super::key::normalize_url)
            .unwrap_or_default()
    }

    pub fn arg_url_string(&self) -> String {
        self.arg_url
            .as_ref()
            .map(super::key::normalize_url)
            .unwrap_or_default()
    }
}

impl fmt::Display for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID={} CATEGORY={} API={}",
            self.extension_id, self.action_type, self.api_name
        )?;
        if self.args.is_some() {
            write!(f, " ARGS={}", self.args_json())?;
        }
        if self.page_url.is_some() {
            write!(f, " PAGE_URL={}", self.page_url_string())?;
        }
        if let Some(title) = &self.page_title {
            write!(f, " PAGE_TITLE={:?}", title)?;
        }
        if self.arg_url.is_some() {
            write!(f, " ARG_URL={}", self.arg_url_string())?;
        }
        write!(f, " COUNT={}", self.count)
    }
}
