use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Settings;
use crate::extract::client::ExtractionClient;
use crate::extract::{BatchOptions, ExtractionBatcher};
use crate::harvest::{self, HarvestError};
use crate::paste;
use crate::sink::{self, FinalRecord};
use crate::store::RecordStore;

/// Progress messages from the worker to whoever displays the run.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    HarvestStarted { url: String },
    PageCaptured { added: usize, total: usize },
    PageAdvanced { index: usize, label: String },
    HarvestFinished { pages: usize, records: usize, capped: bool },
    TextSplit { records: usize },
    BatchStarted { index: usize, total: usize },
    BatchFinished { index: usize, kept: usize, discarded: usize },
    BatchFailed { index: usize, error: String },
    SinkWritten { path: PathBuf, rows: usize },
}

/// Sending half of the progress channel. Never blocks; messages are dropped
/// once the display side has gone away.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    tx: Option<mpsc::UnboundedSender<Progress>>,
}

impl Reporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Progress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A reporter nobody listens to.
    pub fn detached() -> Self {
        Self::default()
    }

    fn send(&self, progress: Progress) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(progress);
        }
    }

    pub fn harvest_started(&self, url: &str) {
        self.send(Progress::HarvestStarted { url: url.to_string() });
    }

    pub fn page_captured(&self, added: usize, total: usize) {
        self.send(Progress::PageCaptured { added, total });
    }

    pub fn page_advanced(&self, index: usize, label: &str) {
        self.send(Progress::PageAdvanced { index, label: label.to_string() });
    }

    pub fn harvest_finished(&self, pages: usize, records: usize, capped: bool) {
        self.send(Progress::HarvestFinished { pages, records, capped });
    }

    pub fn text_split(&self, records: usize) {
        self.send(Progress::TextSplit { records });
    }

    pub fn batch_started(&self, index: usize, total: usize) {
        self.send(Progress::BatchStarted { index, total });
    }

    pub fn batch_finished(&self, index: usize, kept: usize, discarded: usize) {
        self.send(Progress::BatchFinished { index, kept, discarded });
    }

    pub fn batch_failed(&self, index: usize, error: &str) {
        self.send(Progress::BatchFailed { index, error: error.to_string() });
    }

    pub fn sink_written(&self, path: &Path, rows: usize) {
        self.send(Progress::SinkWritten { path: path.to_path_buf(), rows });
    }
}

/// Where a run's records come from.
#[derive(Debug, Clone)]
pub enum RunSource {
    Web { keyword: String },
    Text { content: String, keyword: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// `capped` is set when the record cap cut the harvest short.
    Written { path: PathBuf, rows: usize, capped: bool },
    /// The run finished but produced nothing to write.
    NoResults,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Harvest(#[from] HarvestError),
    #[error("writing results failed: {0}")]
    Sink(String),
}

/// One complete run: collect records, extract, write. Meant to be spawned
/// as the background worker; all I/O happens here.
pub async fn run(
    settings: Settings,
    source: RunSource,
    client: Arc<dyn ExtractionClient>,
    reporter: Reporter,
) -> Result<RunOutcome, RunError> {
    let (store, keyword, capped) = match source {
        RunSource::Web { keyword } => {
            let harvest = harvest::harvest(&settings, &keyword, &reporter).await?;
            (harvest.store, keyword, harvest.summary.capped)
        }
        RunSource::Text { content, keyword } => {
            let date = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            let store = paste::split_bulletins(&content, &date);
            info!("Split pasted text into {} bulletins", store.len());
            reporter.text_split(store.len());
            (store, keyword, false)
        }
    };

    if store.is_empty() {
        info!("No source records collected");
        return Ok(RunOutcome::NoResults);
    }

    let records = extract_records(&settings, &store, &keyword, client.as_ref(), &reporter).await;
    if records.is_empty() {
        info!("Extraction produced no award records");
        return Ok(RunOutcome::NoResults);
    }

    let path = sink::output_path(&settings.output_dir, settings.output_format, &Local::now());
    let rows = records.len();
    let format = settings.output_format;
    let target = path.clone();
    tokio::task::spawn_blocking(move || sink::write(&target, format, &records))
        .await
        .map_err(|e| RunError::Sink(e.to_string()))?
        .map_err(|e| RunError::Sink(format!("{:#}", e)))?;

    info!("Wrote {} rows to {}", rows, path.display());
    reporter.sink_written(&path, rows);
    Ok(RunOutcome::Written { path, rows, capped })
}

/// Batch, extract and reconcile the whole store, normalizing amounts.
pub async fn extract_records(
    settings: &Settings,
    store: &RecordStore,
    keyword: &str,
    client: &dyn ExtractionClient,
    reporter: &Reporter,
) -> Vec<FinalRecord> {
    let options = BatchOptions {
        batch_size: settings.batch_size,
        excerpt_chars: settings.excerpt_chars,
        concurrency: settings.batch_concurrency,
    };
    ExtractionBatcher::new(client, options)
        .run(store, keyword, reporter)
        .await
        .into_iter()
        .map(FinalRecord::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::LazyLock;

    use regex::Regex;
    use serde_json::{json, Value};

    use super::*;
    use crate::extract::client::ExtractError;
    use crate::extract::tests::FakeClient;
    use crate::sink::OutputFormat;
    use crate::store::RecordDraft;

    static AWARD_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\[ID: (\d+)\] ---\n内容: [^\n]*中标人：([^，]+)，金额：([\d.]+)").unwrap()
    });

    /// Reports only bulletins that state "中标人：X，金额：N".
    fn award_model(_: &[usize], user: &str) -> Result<Value, ExtractError> {
        let results: Vec<Value> = AWARD_RE
            .captures_iter(user)
            .map(|c| json!({"id": c[1].parse::<usize>().unwrap(), "winner": &c[2], "amount": &c[3]}))
            .collect();
        Ok(json!({ "results": results }))
    }

    fn settings(dir: &Path, format: OutputFormat) -> Settings {
        Settings {
            output_dir: dir.to_path_buf(),
            output_format: format,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn only_stated_awards_survive() {
        let mut store = RecordStore::new();
        store.push(RecordDraft {
            title: "道路工程中标结果公告".into(),
            content: "经评审，中标人：公司A，金额：123.45万元，特此公告。".into(),
            date: "2024-05-01".into(),
            url: "https://example.gov.cn/0.html".into(),
        });
        store.push(RecordDraft {
            title: "桥梁工程中标候选人公示".into(),
            content: "第一中标候选人：公司B，综合得分95分。".into(),
            date: "2024-05-02".into(),
            url: "https://example.gov.cn/1.html".into(),
        });
        let client = FakeClient::new(award_model);

        let out = extract_records(&Settings::default(), &store, "公司", &client, &Reporter::detached()).await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "道路工程中标结果公告");
        assert_eq!(out[0].winner.as_deref(), Some("公司A"));
        assert_eq!(out[0].amount, 123.45);
        assert_eq!(out[0].url, "https://example.gov.cn/0.html");
    }

    #[tokio::test]
    async fn text_run_writes_results() {
        let dir = tempfile::tempdir().unwrap();
        let content = "\
2024-05-01 09:30:00
某市政道路改造工程中标结果公告 经评审委员会评审并公示，中标人：公司A，金额：88.5万元，公示期三个工作日，特此公告。
2024-05-02 10:00:00
某学校教学楼建设项目中标候选人公示 第一中标候选人：公司B，综合得分九十五分，第二中标候选人：公司C，特此公示。";
        let client: Arc<dyn ExtractionClient> = Arc::new(FakeClient::new(award_model));
        let (reporter, mut rx) = Reporter::channel();

        let outcome = run(
            settings(dir.path(), OutputFormat::Sqlite),
            RunSource::Text { content: content.into(), keyword: String::new() },
            client,
            reporter,
        )
        .await
        .unwrap();

        let RunOutcome::Written { path, rows, capped } = outcome else {
            panic!("expected a written file, got {:?}", outcome);
        };
        assert_eq!(rows, 1);
        assert!(!capped);
        let conn = crate::db::open(&path).unwrap();
        let saved = crate::db::fetch_records(&conn, 10).unwrap();
        assert_eq!(saved[0].winner.as_deref(), Some("公司A"));
        assert_eq!(saved[0].amount, 88.5);
        assert_eq!(saved[0].title, "手动输入项-1");

        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        assert_eq!(seen.first(), Some(&Progress::TextSplit { records: 2 }));
        assert!(seen.contains(&Progress::BatchFinished { index: 0, kept: 1, discarded: 0 }));
        assert!(matches!(seen.last(), Some(Progress::SinkWritten { rows: 1, .. })));
    }

    #[tokio::test]
    async fn nothing_pasted_is_no_results() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient::new(award_model));

        let outcome = run(
            settings(dir.path(), OutputFormat::Xlsx),
            RunSource::Text { content: "太短".into(), keyword: String::new() },
            client.clone(),
            Reporter::detached(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, RunOutcome::NoResults);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn no_awards_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let content = "某学校教学楼建设项目中标候选人公示 第一中标候选人：公司B，综合得分九十五分，第二中标候选人：公司C，第三中标候选人：公司D。";
        let client: Arc<dyn ExtractionClient> = Arc::new(FakeClient::new(award_model));

        let outcome = run(
            settings(dir.path(), OutputFormat::Xlsx),
            RunSource::Text { content: content.into(), keyword: String::new() },
            client,
            Reporter::detached(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, RunOutcome::NoResults);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
