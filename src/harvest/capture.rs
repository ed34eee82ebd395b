use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

use crate::store::{RecordDraft, SharedStore};

const HIGHLIGHT_MARKERS: [&str; 2] = ["<em>", "</em>"];

#[derive(Debug, Deserialize)]
struct SearchPayload {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    records: Vec<SearchRecord>,
}

#[derive(Debug, Deserialize)]
struct SearchRecord {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    infodate: Option<String>,
    #[serde(default)]
    linkurl: Option<String>,
}

/// Turns intercepted search-API responses into store records.
#[derive(Debug, Clone)]
pub struct ResponseCapture {
    endpoint_marker: String,
    origin: String,
}

impl ResponseCapture {
    pub fn new(endpoint_marker: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            endpoint_marker: endpoint_marker.into(),
            origin: origin.into().trim_end_matches('/').to_string(),
        }
    }

    /// Whether a response URL belongs to the data API.
    pub fn matches(&self, url: &str) -> bool {
        url.contains(&self.endpoint_marker)
    }

    /// Parse one response body. `None` when the body is not the expected shape.
    pub fn parse(&self, body: &str) -> Option<Vec<RecordDraft>> {
        let payload: SearchPayload = serde_json::from_str(body).ok()?;
        let drafts = payload
            .result
            .records
            .into_iter()
            .map(|r| RecordDraft {
                title: strip_highlights(r.title.as_deref().unwrap_or_default()),
                content: strip_highlights(r.content.as_deref().unwrap_or_default()),
                date: r.infodate.unwrap_or_default(),
                url: format!("{}{}", self.origin, r.linkurl.unwrap_or_default()),
            })
            .collect();
        Some(drafts)
    }

    /// Append the records of a matching response to the store.
    ///
    /// Returns how many records were added. Non-matching URLs and malformed
    /// bodies add nothing and never fail.
    pub fn ingest(&self, url: &str, body: &str, store: &SharedStore) -> usize {
        if !self.matches(url) {
            return 0;
        }
        match self.parse(body) {
            Some(drafts) if !drafts.is_empty() => {
                let added = drafts.len();
                let total = store.extend(drafts);
                debug!("Captured {} records from {} ({} total)", added, url, total);
                added
            }
            Some(_) => 0,
            None => {
                debug!("Ignoring unparseable payload from {}", url);
                0
            }
        }
    }
}

/// Data-API requests whose response headers arrived but whose body has not
/// finished loading yet, keyed by CDP request id.
#[derive(Debug, Default)]
pub struct PendingBodies {
    urls: HashMap<String, String>,
}

impl PendingBodies {
    /// Remember a response if it belongs to the data API.
    pub fn track(&mut self, capture: &ResponseCapture, request_id: &str, url: &str) {
        if capture.matches(url) {
            self.urls.insert(request_id.to_string(), url.to_string());
        }
    }

    /// URL of a tracked request whose body is now readable. Each request is
    /// handed out once.
    pub fn finish(&mut self, request_id: &str) -> Option<String> {
        self.urls.remove(request_id)
    }
}

fn strip_highlights(s: &str) -> String {
    HIGHLIGHT_MARKERS
        .iter()
        .fold(s.to_string(), |acc, marker| acc.replace(marker, ""))
}

#[cfg(test)]
mod tests {
    use super::*;

    const API: &str = "https://ggzyjy.example.gov.cn/inteligentsearch/rest/esinteligentsearch/getFullTextDataNew";

    fn capture() -> ResponseCapture {
        ResponseCapture::new("getFullTextDataNew", "https://ggzyjy.example.gov.cn/")
    }

    fn page(titles: &[&str]) -> String {
        let records: Vec<_> = titles
            .iter()
            .map(|t| {
                serde_json::json!({
                    "title": format!("<em>{}</em>结果公告", t),
                    "content": format!("中标人：<em>{}</em>", t),
                    "infodate": "2024-05-01 09:00:00",
                    "linkurl": format!("/jyxx/{}.html", t),
                })
            })
            .collect();
        serde_json::json!({ "result": { "records": records, "totalcount": titles.len() } }).to_string()
    }

    #[test]
    fn strips_markers_and_builds_url() {
        let drafts = capture().parse(&page(&["甲"])).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].title, "甲结果公告");
        assert_eq!(drafts[0].content, "中标人：甲");
        assert_eq!(drafts[0].date, "2024-05-01 09:00:00");
        assert_eq!(drafts[0].url, "https://ggzyjy.example.gov.cn/jyxx/甲.html");
    }

    #[test]
    fn ids_continue_across_pages() {
        let store = SharedStore::new();
        let c = capture();
        assert_eq!(c.ingest(API, &page(&["a", "b", "c"]), &store), 3);
        assert_eq!(c.ingest(API, &page(&["d", "e"]), &store), 2);
        let store = store.take();
        let ids: Vec<usize> = store.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(store.get(3).unwrap().title, "d结果公告");
    }

    #[test]
    fn other_traffic_is_ignored() {
        let store = SharedStore::new();
        let added = capture().ingest("https://ggzyjy.example.gov.cn/css/site.css", &page(&["a"]), &store);
        assert_eq!(added, 0);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn malformed_payloads_are_swallowed() {
        let store = SharedStore::new();
        let c = capture();
        assert_eq!(c.ingest(API, "<html>502 Bad Gateway</html>", &store), 0);
        assert_eq!(c.ingest(API, r#"{"status":"error"}"#, &store), 0);
        assert_eq!(c.ingest(API, r#"{"result":{"records":"oops"}}"#, &store), 0);
        assert_eq!(c.ingest(API, r#"{"result":{}}"#, &store), 0);
        assert_eq!(store.len(), 0);

        // a later good page still lands at id 0
        assert_eq!(c.ingest(API, &page(&["x"]), &store), 1);
        assert_eq!(store.take().get(0).unwrap().id, 0);
    }

    #[test]
    fn missing_fields_default_to_empty() {
        let body = r#"{"result":{"records":[{"title":"only title","content":null}]}}"#;
        let drafts = capture().parse(body).unwrap();
        assert_eq!(drafts[0].content, "");
        assert_eq!(drafts[0].url, "https://ggzyjy.example.gov.cn");
    }

    #[test]
    fn pending_bodies_pair_response_with_loading_finished() {
        let cap = capture();
        let mut pending = PendingBodies::default();
        pending.track(&cap, "1000.1", &format!("{}?page=1", API));
        pending.track(&cap, "1000.2", "https://ggzyjy.example.gov.cn/css/site.css");
        pending.track(&cap, "1000.3", &format!("{}?page=2", API));

        // loading can finish out of order
        assert_eq!(pending.finish("1000.3"), Some(format!("{}?page=2", API)));
        assert_eq!(pending.finish("1000.2"), None);
        assert_eq!(pending.finish("1000.1"), Some(format!("{}?page=1", API)));
        assert_eq!(pending.finish("1000.1"), None);
    }
}
