//! Event predicates a [`FanInCounter`](super::FanInCounter) counts.

use serde_json::{Value, json};

use crate::events::{Event, EventKind};
use crate::resources::Filter;

/// One acknowledgement the counter waits for.
///
/// Matches when the event kind is `event` and every `filters` key resolves
/// (dotted path into the event `kw`) to the same value.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub event: EventKind,
    pub filters: Filter,
}

impl EventFilter {
    pub fn new(event: EventKind, filters: Filter) -> Self {
        Self { event, filters }
    }

    /// `event` carrying `yuno_id` in its payload.
    pub fn for_yuno(event: EventKind, yuno_id: &str) -> Self {
        Self::new(event, Filter::new().eq("yuno_id", yuno_id))
    }

    pub fn matches(&self, ev: &Event) -> bool {
        ev.kind == self.event
            && match ev.kw.as_deref() {
                Some(kw) => self.filters.matches(kw),
                None => self.filters.is_empty(),
            }
    }
}

/// Ordered set of filters; each one can be satisfied once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema(Vec<EventFilter>);

impl InputSchema {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, filter: EventFilter) {
        self.0.push(filter);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Index of the first filter not yet `seen` that matches `ev`.
    pub fn first_unseen_match(&self, ev: &Event, seen: &[bool]) -> Option<usize> {
        self.0
            .iter()
            .enumerate()
            .find(|(i, f)| !seen.get(*i).copied().unwrap_or(false) && f.matches(ev))
            .map(|(i, _)| i)
    }

    /// JSON view: `[{"event": "EV_ON_OPEN", "filters": {...}}, ...]`.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|f| json!({"event": f.event.as_str(), "filters": f.filters.as_map()}))
                .collect(),
        )
    }
}

impl FromIterator<EventFilter> for InputSchema {
    fn from_iter<I: IntoIterator<Item = EventFilter>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened(yuno: &str) -> Event {
        Event::new(EventKind::YunoOpened)
            .with_yuno(yuno)
            .with_kw(json!({"yuno_id": yuno, "identity_card": {"yuno_id": yuno}}))
    }

    #[test]
    fn filter_requires_kind_and_fields() {
        let f = EventFilter::for_yuno(EventKind::YunoOpened, "a");
        assert!(f.matches(&opened("a")));
        assert!(!f.matches(&opened("b")));
        let closed = Event::new(EventKind::YunoClosed).with_kw(json!({"yuno_id": "a"}));
        assert!(!f.matches(&closed));
    }

    #[test]
    fn dotted_filters_reach_identity_card() {
        let f = EventFilter::new(
            EventKind::YunoOpened,
            Filter::new().eq("identity_card.yuno_id", "a"),
        );
        assert!(f.matches(&opened("a")));
    }

    #[test]
    fn seen_filters_are_skipped() {
        let schema: InputSchema = ["a", "a"]
            .iter()
            .map(|y| EventFilter::for_yuno(EventKind::YunoOpened, y))
            .collect();
        let ev = opened("a");
        assert_eq!(schema.first_unseen_match(&ev, &[false, false]), Some(0));
        assert_eq!(schema.first_unseen_match(&ev, &[true, false]), Some(1));
        assert_eq!(schema.first_unseen_match(&ev, &[true, true]), None);
    }

    #[test]
    fn json_view_names_events() {
        let schema: InputSchema = std::iter::once(EventFilter::for_yuno(EventKind::YunoPlayed, "a")).collect();
        let v = schema.to_json();
        assert_eq!(v[0]["event"], EventKind::YunoPlayed.as_str());
        assert_eq!(v[0]["filters"]["yuno_id"], "a");
    }
}
