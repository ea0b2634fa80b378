//! Merge-key derivation
//!
//! Two records merge iff their `MergeKey`s are equal. The key carries every
//! identity field in canonical string form, so it can be journaled as-is and
//! resolved against the dictionary without re-parsing the submitted record.

use super::action::{ActionRecord, ActionType, ArgValue};
use super::timestamp::{DayBucket, Timestamp};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use url::Url;

/// Compact JSON of an argument list.
pub fn canonical_args(args: &[ArgValue]) -> String {
    // A Vec of primitives always serializes; non-finite floats become `null`.
    serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string())
}

/// Scheme, host, port, path and query of a URL. Fragment and credentials are dropped.
pub fn normalize_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}

/// Parse and normalize a URL string. `None` if it is not a valid absolute URL.
pub fn normalize_url_str(raw: &str) -> Option<String> {
    Url::parse(raw).ok().map(|url| normalize_url(&url))
}

/// (action type, API name) pairs whose arguments are never kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrippedApi {
    pub action_type: ActionType,
    pub api_name: String,
}

impl StrippedApi {
    pub fn api_call(api_name: &str) -> Self {
        Self {
            action_type: ActionType::ApiCall,
            api_name: api_name.to_string(),
        }
    }
}

/// Argument stripping allow-list.
#[derive(Debug, Clone, Default)]
pub struct ArgPolicy {
    stripped: AHashMap<ActionType, AHashSet<String>>,
}

impl ArgPolicy {
    pub fn new<'a>(apis: impl IntoIterator<Item = &'a StrippedApi>) -> Self {
        let mut stripped: AHashMap<ActionType, AHashSet<String>> = AHashMap::new();
        for api in apis {
            stripped
                .entry(api.action_type)
                .or_default()
                .insert(api.api_name.clone());
        }
        Self { stripped }
    }

    pub fn should_strip(&self, action_type: ActionType, api_name: &str) -> bool {
        self.stripped
            .get(&action_type)
            .map_or(false, |names| names.contains(api_name))
    }
}

/// Identity of a merged row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MergeKey {
    pub extension_id: String,
    pub day: DayBucket,
    pub action_type: ActionType,
    pub api_name: String,
    pub args: Option<String>,
    pub page_url: Option<String>,
    pub arg_url: Option<String>,
}

/// Aggregate state accumulated under one `MergeKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeValue {
    /// Latest timestamp merged in.
    pub time: Timestamp,
    pub count: u32,
    pub page_title: Option<String>,
}

impl MergeValue {
    /// Fold another aggregate of the same key into this one.
    pub fn absorb(&mut self, other: &MergeValue) {
        self.count = self.count.saturating_add(other.count.max(1));
        if other.time >= self.time {
            self.time = other.time;
            if other.page_title.is_some() {
                self.page_title = other.page_title.clone();
            }
        } else if self.page_title.is_none() {
            self.page_title = other.page_title.clone();
        }
    }
}

impl MergeKey {
    /// Derive the key and initial aggregate for a submitted record.
    ///
    /// The stripping check runs first; a stripped record carries no argument data
    /// in either the key or anything stored from it.
    pub fn derive(record: ActionRecord, policy: &ArgPolicy) -> (MergeKey, MergeValue) {
        let args = if policy.should_strip(record.action_type, &record.api_name) {
            None
        } else {
            record.args.as_deref().map(canonical_args)
        };

        let key = MergeKey {
            day: record.time.day_bucket(),
            extension_id: record.extension_id,
            action_type: record.action_type,
            api_name: record.api_name,
            args,
            page_url: record.page_url.as_ref().map(normalize_url),
            arg_url: record.arg_url.as_ref().map(normalize_url),
        };
        let value = MergeValue {
            time: record.time,
            count: record.count.max(1),
            page_title: record.page_title,
        };
        (key, value)
    }

    /// Rebuild a caller-facing record from a key and its aggregate.
    pub fn to_record(&self, value: &MergeValue) -> ActionRecord {
        ActionRecord {
            extension_id: self.extension_id.clone(),
            time: value.time,
            action_type: self.action_type,
            api_name: self.api_name.clone(),
            args: self
                .args
                .as_deref()
                .and_then(|json| serde_json::from_str::<Vec<ArgValue>>(json).ok()),
            page_url: self.page_url.as_deref().and_then(|u| Url::parse(u).ok()),
            page_title: value.page_title.clone(),
            arg_url: self.arg_url.as_deref().and_then(|u| Url::parse(u).ok()),
            count: value.count,
        }
    }
}
