use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::harvest::pager::{PagerConfig, SettleMode};
use crate::sink::OutputFormat;

const CONFIG_FILE: &str = "bidscan";
const ENV_PREFIX: &str = "BIDSCAN";
const FALLBACK_KEY_VAR: &str = "DEEPSEEK_API_KEY";

#[derive(Debug, PartialEq)]
enum EnvFile {
    Loaded(PathBuf),
    Missing,
    Malformed(String),
}

fn env_file_status(result: Result<PathBuf, dotenvy::Error>) -> EnvFile {
    match result {
        Ok(path) => EnvFile::Loaded(path),
        Err(dotenvy::Error::Io(e)) if e.kind() == ErrorKind::NotFound => EnvFile::Missing,
        Err(e) => EnvFile::Malformed(e.to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleKind {
    Fixed,
    Quiescent,
}

/// Everything one run needs, built once and passed down by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub model: String,
    pub request_timeout_secs: u64,

    pub keyword: Option<String>,
    pub batch_size: usize,
    pub excerpt_chars: usize,
    pub batch_concurrency: usize,

    pub search_origin: String,
    pub search_path: String,
    pub endpoint_marker: String,
    pub pager_selector: String,
    pub initial_settle_secs: u64,
    pub page_settle_secs: u64,
    pub settle_mode: SettleKind,
    pub quiet_window_millis: u64,
    pub record_cap: Option<usize>,
    pub chrome_path: Option<PathBuf>,
    pub user_agent: String,

    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.deepseek.com".into(),
            model: "deepseek-chat".into(),
            request_timeout_secs: 120,
            keyword: None,
            batch_size: 5,
            excerpt_chars: 2500,
            batch_concurrency: 1,
            search_origin: "https://ggzyjy.fzggw.nx.gov.cn".into(),
            search_path: "/search/fullsearch.html".into(),
            endpoint_marker: "getFullTextDataNew".into(),
            pager_selector: ".m-pagination-page a[data-page-index='{index}']".into(),
            initial_settle_secs: 5,
            page_settle_secs: 8,
            settle_mode: SettleKind::Quiescent,
            quiet_window_millis: 1500,
            record_cap: None,
            chrome_path: None,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .into(),
            output_dir: PathBuf::from("."),
            output_format: OutputFormat::Xlsx,
        }
    }
}

impl Settings {
    /// Defaults, then `bidscan.toml` (optional), then `BIDSCAN_*` env vars.
    /// A `.env` file is read first when present.
    pub fn load() -> Result<Self, config::ConfigError> {
        match env_file_status(dotenvy::dotenv()) {
            EnvFile::Loaded(path) => debug!("Loaded {}", path.display()),
            EnvFile::Missing => {}
            EnvFile::Malformed(e) => warn!("Ignoring .env file: {}", e),
        }
        let builder = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true));
        let mut settings = Self::from_builder(builder)?;
        if settings.api_key.is_none() {
            settings.api_key = std::env::var(FALLBACK_KEY_VAR).ok();
        }
        settings.api_key = settings.api_key.filter(|k| !k.trim().is_empty());
        Ok(settings)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, config::ConfigError> {
        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.batch_size = settings.batch_size.max(1);
        settings.batch_concurrency = settings.batch_concurrency.max(1);
        Ok(settings)
    }

    /// Search page URL for a keyword, passed as the `wd` query parameter.
    pub fn search_url(&self, keyword: &str) -> Result<Url, url::ParseError> {
        let base = format!(
            "{}/{}",
            self.search_origin.trim_end_matches('/'),
            self.search_path.trim_start_matches('/')
        );
        Url::parse_with_params(&base, &[("wd", keyword)])
    }

    pub fn pager_selector_for(&self, index: usize) -> String {
        self.pager_selector.replace("{index}", &index.to_string())
    }

    pub fn settle_mode(&self) -> SettleMode {
        match self.settle_mode {
            SettleKind::Fixed => SettleMode::Fixed,
            SettleKind::Quiescent => SettleMode::Quiescent {
                quiet: Duration::from_millis(self.quiet_window_millis),
            },
        }
    }

    pub fn pager_config(&self) -> PagerConfig {
        PagerConfig {
            initial_settle: Duration::from_secs(self.initial_settle_secs),
            page_settle: Duration::from_secs(self.page_settle_secs),
            record_cap: self.record_cap,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
