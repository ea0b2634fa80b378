//! Query engine
//!
//! Reads run on the writer thread and combine persisted rows with buffered
//! entries that have not been flushed yet. Neither source is modified.

use crate::database::mem_buffer::MergeBuffer;
use crate::storage::ActivityStore;
use crate::types::{normalize_url_str, ActionRecord, ActionType, DayBucket, MergeKey, MergeValue};
use ahash::AHashMap;

/// Criteria for `ActivityLog::read_filtered_data`
///
/// Empty strings mean "no constraint".
/// - `extension_id`: exact match
/// - `action_type`: `ActionType::Any` matches every type
/// - `api_name`: prefix match
/// - `page_url`: prefix match against the normalized page URL
/// - `arg_url`: exact match against the normalized argument URL
#[derive(Debug, Clone, PartialEq)]
pub struct ActionFilter {
    pub extension_id: String,
    pub action_type: ActionType,
    pub api_name: String,
    pub page_url: String,
    pub arg_url: String,
}

impl Default for ActionFilter {
    fn default() -> Self {
        Self {
            extension_id: String::new(),
            action_type: ActionType::Any,
            api_name: String::new(),
            page_url: String::new(),
            arg_url: String::new(),
        }
    }
}

impl ActionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extension(mut self, extension_id: impl Into<String>) -> Self {
        self.extension_id = extension_id.into();
        self
    }

    pub fn action_type(mut self, action_type: ActionType) -> Self {
        self.action_type = action_type;
        self
    }

    pub fn api_prefix(mut self, api_name: impl Into<String>) -> Self {
        self.api_name = api_name.into();
        self
    }

    pub fn page_url_prefix(mut self, page_url: impl Into<String>) -> Self {
        self.page_url = page_url.into();
        self
    }

    pub fn arg_url(mut self, arg_url: impl Into<String>) -> Self {
        self.arg_url = arg_url.into();
        self
    }

    /// Resolve into a matcher. `None` when the filter can never match.
    fn compile(&self) -> Option<CompiledFilter<'_>> {
        let arg_url = if self.arg_url.is_empty() {
            None
        } else {
            Some(normalize_url_str(&self.arg_url)?)
        };
        Some(CompiledFilter {
            filter: self,
            arg_url,
        })
    }
}

struct CompiledFilter<'a> {
    filter: &'a ActionFilter,
    arg_url: Option<String>,
}

impl CompiledFilter<'_> {
    fn matches(&self, key: &MergeKey) -> bool {
        let f = self.filter;
        if !f.extension_id.is_empty() && key.extension_id != f.extension_id {
            return false;
        }
        if !f.action_type.matches(key.action_type) {
            return false;
        }
        if !key.api_name.starts_with(f.api_name.as_str()) {
            return false;
        }
        if !f.page_url.is_empty() {
            match key.page_url.as_deref() {
                Some(url) if url.starts_with(f.page_url.as_str()) => {}
                _ => return false,
            }
        }
        if let Some(arg_url) = self.arg_url.as_deref() {
            if key.arg_url.as_deref() != Some(arg_url) {
                return false;
            }
        }
        true
    }
}

/// A read scheduled on the writer
#[derive(Debug, Clone)]
pub(crate) enum QueryRequest {
    Day { extension_id: String, day: DayBucket },
    Filtered(ActionFilter),
}

/// Run a read against the buffer and (if available) the store.
///
/// Persisted rows are returned as they are; two rows that share a key after a
/// URL scrub stay separate. A buffered entry is folded into the first
/// persisted row with the same key, or returned on its own.
pub(crate) fn execute(request: &QueryRequest, buffer: &MergeBuffer, store: Option<&ActivityStore>) -> Vec<ActionRecord> {
    let (persisted, buffered) = match request {
        QueryRequest::Day { extension_id, day } => {
            let persisted = store
                .map(|s| s.rows_for_day(extension_id, *day))
                .unwrap_or_default();
            let buffered = buffer.collect(|k| k.extension_id == *extension_id && k.day == *day);
            (persisted, buffered)
        }
        QueryRequest::Filtered(filter) => {
            let Some(compiled) = filter.compile() else {
                return Vec::new();
            };
            let persisted = store
                .map(|s| s.scan(|k| compiled.matches(k)))
                .unwrap_or_default();
            let buffered = buffer.collect(|k| compiled.matches(k));
            (persisted, buffered)
        }
    };

    let mut records = merge(persisted, buffered)
        .into_iter()
        .map(|(key, value)| key.to_record(&value))
        .collect::<Vec<_>>();
    records.sort_by(|a, b| b.time.cmp(&a.time));
    records
}

fn merge(
    mut persisted: Vec<(MergeKey, MergeValue)>,
    buffered: Vec<(MergeKey, MergeValue)>,
) -> Vec<(MergeKey, MergeValue)> {
    let mut positions: AHashMap<MergeKey, usize> = AHashMap::with_capacity(persisted.len());
    for (pos, (key, _)) in persisted.iter().enumerate() {
        positions.entry(key.clone()).or_insert(pos);
    }

    for (key, value) in buffered {
        match positions.get(&key) {
            Some(&pos) => persisted[pos].1.absorb(&value),
            None => {
                positions.insert(key.clone(), persisted.len());
                persisted.push((key, value));
            }
        }
    }
    persisted
}
