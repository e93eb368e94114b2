use serde_json::{Map, Value};

/// Exact-field filter over JSON documents.
///
/// Keys may be dotted paths (`"md.active"`); a document matches when every
/// key resolves to a value equal to the filter's.
///
/// # Example
/// ```
/// use serde_json::json;
/// use yunovisor::Filter;
///
/// let f = Filter::new().eq("yuno_role", "emailsender").eq("disabled", false);
/// assert!(f.matches(&json!({"yuno_role": "emailsender", "disabled": false, "x": 1})));
/// assert!(!f.matches(&json!({"yuno_role": "emailsender"})));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(Map<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Adds an equality condition.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Adds an equality condition only when `value` is `Some`.
    pub fn eq_opt<V: Into<Value>>(self, key: impl Into<String>, value: Option<V>) -> Self {
        match value {
            Some(v) => self.eq(key, v),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.0.iter().all(|(key, want)| {
            let mut cur = Some(doc);
            for part in key.split('.') {
                cur = cur.and_then(|v| v.get(part));
            }
            cur == Some(want)
        })
    }
}

impl From<Map<String, Value>> for Filter {
    fn from(m: Map<String, Value>) -> Self {
        Self(m)
    }
}
