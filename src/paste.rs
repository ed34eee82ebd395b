use std::sync::LazyLock;

use regex::Regex;

use crate::store::{RecordDraft, RecordStore};

static TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}\s\d{2}:\d{2}:\d{2}").unwrap());

/// Segments of this many characters or fewer are list chrome, not bulletins.
const MIN_SEGMENT_CHARS: usize = 50;

/// Split pasted search-result text into one record per bulletin.
///
/// Bulletins are separated by their `YYYY-MM-DD HH:MM:SS` publish stamps.
/// Every record gets a synthesized title, `date` as its date and no url.
pub fn split_bulletins(text: &str, date: &str) -> RecordStore {
    let mut store = RecordStore::new();
    let segments = TIMESTAMP_RE
        .split(text)
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_SEGMENT_CHARS);

    for (n, segment) in segments.enumerate() {
        store.push(RecordDraft {
            title: format!("手动输入项-{}", n + 1),
            content: segment.to_string(),
            date: date.to_string(),
            url: String::new(),
        });
    }
    store
}
