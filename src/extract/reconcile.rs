use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::store::RecordStore;

/// A validated extraction result joined with its source record.
/// `amount` is still the model's raw text.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub source_id: usize,
    pub title: String,
    pub winner: Option<String>,
    pub amount: Option<String>,
    pub date: String,
    pub url: String,
}

#[derive(Debug, Default)]
pub struct Reconciliation {
    pub records: Vec<Reconciled>,
    /// Entries dropped for a missing, malformed or out-of-range id.
    pub discarded: usize,
}

/// The two response shapes models produce for the same content.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResultsShape {
    Wrapped { results: Vec<Value> },
    Bare(Vec<Value>),
}

/// The result list inside a response; empty for any other shape.
pub fn result_entries(response: &Value) -> Vec<Value> {
    match ResultsShape::deserialize(response) {
        Ok(ResultsShape::Wrapped { results }) => results,
        Ok(ResultsShape::Bare(results)) => results,
        Err(_) => Vec::new(),
    }
}

/// Join each result entry to `store` by its id, in response order.
///
/// Entries whose id is absent, not an integer, negative or past the end of
/// the store are dropped without touching the rest.
pub fn reconcile(response: &Value, store: &RecordStore) -> Reconciliation {
    let mut out = Reconciliation::default();
    for entry in result_entries(response) {
        let Some(source) = entry_id(&entry).and_then(|id| store.get(id)) else {
            debug!("Discarding result with unusable id: {}", entry);
            out.discarded += 1;
            continue;
        };
        out.records.push(Reconciled {
            source_id: source.id,
            title: source.title.clone(),
            winner: text_field(&entry, "winner"),
            amount: text_field(&entry, "amount"),
            date: source.date.clone(),
            url: source.url.clone(),
        });
    }
    out
}

fn entry_id(entry: &Value) -> Option<usize> {
    let id = match entry.get("id")? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    usize::try_from(id).ok()
}

fn text_field(entry: &Value, key: &str) -> Option<String> {
    match entry.get(key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::RecordDraft;

    fn store(n: usize) -> RecordStore {
        let mut store = RecordStore::new();
        for i in 0..n {
            store.push(RecordDraft {
                title: format!("公告{}", i),
                content: String::new(),
                date: format!("2024-01-{:02}", i + 1),
                url: format!("https://example.gov.cn/{}.html", i),
            });
        }
        store
    }

    #[test]
    fn wrapped_and_bare_shapes_agree() {
        let items = json!([
            {"id": 1, "winner": "公司A", "amount": "123.45"},
            {"id": 0, "winner": "公司B", "amount": null}
        ]);
        let s = store(3);
        let wrapped = reconcile(&json!({ "results": items.clone() }), &s);
        let bare = reconcile(&items, &s);
        assert_eq!(wrapped.records, bare.records);
        assert_eq!(wrapped.records.len(), 2);
    }

    #[test]
    fn joins_source_fields() {
        let r = reconcile(&json!({"results": [{"id": 2, "winner": "公司A", "amount": "99"}]}), &store(3));
        let rec = &r.records[0];
        assert_eq!(rec.source_id, 2);
        assert_eq!(rec.title, "公告2");
        assert_eq!(rec.date, "2024-01-03");
        assert_eq!(rec.url, "https://example.gov.cn/2.html");
        assert_eq!(rec.winner.as_deref(), Some("公司A"));
        assert_eq!(rec.amount.as_deref(), Some("99"));
    }

    #[test]
    fn bad_ids_are_dropped_individually() {
        let response = json!({"results": [
            {"id": -1, "winner": "neg"},
            {"id": "abc", "winner": "nan"},
            {"id": 3, "winner": "past end"},
            {"id": 1.5, "winner": "fraction"},
            {"winner": "no id"},
            {"id": null, "winner": "null id"},
            "not an object",
            {"id": 1, "winner": "ok"}
        ]});
        let r = reconcile(&response, &store(3));
        assert_eq!(r.discarded, 7);
        assert_eq!(r.records.len(), 1);
        assert_eq!(r.records[0].winner.as_deref(), Some("ok"));
    }

    #[test]
    fn numeric_strings_and_integral_floats_coerce() {
        let r = reconcile(&json!([{"id": " 2 "}, {"id": 1.0}]), &store(3));
        let ids: Vec<usize> = r.records.iter().map(|x| x.source_id).collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn keeps_response_order() {
        let r = reconcile(&json!([{"id": 2}, {"id": 0}, {"id": 1}]), &store(3));
        let ids: Vec<usize> = r.records.iter().map(|x| x.source_id).collect();
        assert_eq!(ids, vec![2, 0, 1]);
    }

    #[test]
    fn numeric_amount_becomes_text() {
        let r = reconcile(&json!([{"id": 0, "winner": "A", "amount": 123.45}]), &store(1));
        assert_eq!(r.records[0].amount.as_deref(), Some("123.45"));
    }

    #[test]
    fn other_shapes_yield_nothing() {
        let s = store(2);
        for response in [
            json!({"data": [{"id": 0}]}),
            json!({"results": "none"}),
            json!("results"),
            json!(42),
            json!(null),
        ] {
            let r = reconcile(&response, &s);
            assert!(r.records.is_empty());
            assert_eq!(r.discarded, 0);
        }
    }

    #[test]
    fn empty_store_accepts_nothing() {
        let r = reconcile(&json!([{"id": 0}]), &RecordStore::new());
        assert!(r.records.is_empty());
        assert_eq!(r.discarded, 1);
    }
}
