//! Remote opacity archive: refractive-index tables and precomputed solver
//! opacity tables served over HTTPS, with an on-disk cache.
use crate::error::PipelineError;
use crate::opacity::{parse_opacity_text, OpacityTable};
use crate::util::write_atomic;
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

pub const ARCHIVE_BASE_URL: &str =
    "https://raw.githubusercontent.com/jzamponi/utils/main/opacity_tables/";

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Named text files in a remote table archive.
pub trait OpacityArchive {
    fn fetch_text(&self, file_name: &str) -> Result<String>;

    /// GET an absolute URL outside the archive.
    fn fetch_url(&self, url: &str) -> Result<String>;

    /// Fetch a precomputed solver table and verify it parses before use.
    fn fetch_table(&self, file_name: &str) -> Result<OpacityTable> {
        let text = self.fetch_text(file_name)?;
        parse_opacity_text(file_name, &text).map_err(|err| {
            anyhow::Error::from(PipelineError::Fetch {
                url: file_name.to_string(),
                reason: format!("{err:#}"),
            })
        })
    }
}

/// HTTPS archive client; successful downloads are cached by file name.
pub struct HttpArchive {
    base_url: String,
    cache_dir: Option<PathBuf>,
    agent: ureq::Agent,
}

impl HttpArchive {
    pub fn new(base_url: impl Into<String>, cache_dir: Option<PathBuf>) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .build()
            .into();
        Self {
            base_url: base_url.into(),
            cache_dir,
            agent,
        }
    }

    /// The public archive, cached under the user cache directory.
    pub fn public() -> Self {
        let cache_dir = dirs::cache_dir().map(|dir| dir.join("synthesizer").join("opacity_tables"));
        Self::new(ARCHIVE_BASE_URL, cache_dir)
    }

    fn url_for(&self, file_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), file_name)
    }

    fn cached(&self, file_name: &str) -> Option<String> {
        let path = self.cache_dir.as_ref()?.join(file_name);
        fs::read_to_string(path).ok()
    }

    fn store(&self, file_name: &str, text: &str) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let path = dir.join(file_name);
        if let Err(err) = write_atomic(&path, text.as_bytes()) {
            tracing::warn!(path = %path.display(), error = %err, "unable to cache archive file");
        }
    }
}

impl OpacityArchive for HttpArchive {
    fn fetch_text(&self, file_name: &str) -> Result<String> {
        if let Some(text) = self.cached(file_name) {
            tracing::debug!(file = file_name, "archive cache hit");
            return Ok(text);
        }
        let text = self.fetch_url(&self.url_for(file_name))?;
        self.store(file_name, &text);
        Ok(text)
    }

    /// Every transport or status failure maps to `PipelineError::Fetch`.
    fn fetch_url(&self, url: &str) -> Result<String> {
        let start = Instant::now();
        let mut response = self.agent.get(url).call().map_err(|err| PipelineError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| PipelineError::Fetch {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        tracing::info!(
            url,
            bytes = text.len(),
            elapsed_ms = start.elapsed().as_millis(),
            "archive fetch complete"
        );
        Ok(text)
    }
}

/// Download a file referenced by URL into `dest`.
pub fn download_to(archive: &dyn OpacityArchive, url: &str, dest: &Path) -> Result<PathBuf> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(anyhow!("not a URL: {url}"));
    }
    let text = archive.fetch_url(url)?;
    write_atomic(dest, text.as_bytes()).with_context(|| format!("save {url}"))?;
    Ok(dest.to_path_buf())
}
