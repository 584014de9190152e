use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::download::job::DEFAULT_WORKERS;
use crate::shared::network::http::config::HttpArgs;

const FALLBACK_FILE_NAME: &str = "download.bin";

#[derive(Debug, Clone, Parser)]
#[command(name = "mediafetch", version, about = "Parallel, resumable downloader for media resources", long_about = None)]
pub struct FetchArgs {
    /// Http url of the resource to download.
    #[arg(value_parser = parse_url)]
    pub url: Url,
    /// Path to save the download to. Defaults to the last segment of the url path.
    #[arg(short = 'o', long, value_parser = parse_path)]
    pub output: Option<PathBuf>,
    /// Stable identity of the resource, used to resume interrupted downloads.
    /// Defaults to the url without query and fragment.
    #[arg(long)]
    pub resource_id: Option<String>,
    /// Number of parallel range requests.
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS as i64, allow_negative_numbers = true)]
    pub workers: i64,
    /// Extra request header `Name: value`, may be repeated. Overrides defaults of the same name.
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,
    /// Directory holding resume state.
    #[arg(long, value_parser = parse_path)]
    pub cache_dir: Option<PathBuf>,
    /// Directory part files are written to.
    #[arg(long, value_parser = parse_path)]
    pub parts_dir: Option<PathBuf>,
    /// Don't persist resume state across runs.
    #[arg(long)]
    pub no_resume: bool,
    /// Fail instead of using a single connection when the server ignores ranges.
    #[arg(long)]
    pub no_fallback: bool,
    /// Hide the progress bar.
    #[arg(short = 'q', long)]
    pub quiet: bool,
    /// Log debug output to stderr.
    #[arg(short = 'v', long)]
    pub verbose: bool,
    #[command(flatten)]
    pub http_args: HttpArgs,
}

impl FetchArgs {
    pub fn output_path(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let name = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or(FALLBACK_FILE_NAME);
        PathBuf::from(name)
    }

    pub fn resource_id(&self) -> String {
        if let Some(id) = &self.resource_id {
            return id.clone();
        }
        let mut url = self.url.clone();
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("mediafetch")
        })
    }
}

/// Accepts scheme-less urls, defaulting to https.
fn parse_url(url: &str) -> Result<Url, String> {
    if url.starts_with("https://") || url.starts_with("http://") {
        return Url::parse(url).map_err(|e| format!("Invalid Url {url} {e}"));
    }
    let new_url = format!("https://{url}");
    Url::parse(&new_url).map_err(|e| format!("Invalid Url {url} {e}"))
}

/// Expand `~` and normalize the path.
fn parse_path(path: &str) -> Result<PathBuf, String> {
    let expanded = shellexpand::tilde(path);
    if expanded.trim().is_empty() {
        return Err("Path must not be empty.".into());
    }
    Ok(path_clean::clean(&*expanded))
}
