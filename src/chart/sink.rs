//! Persists rendered charts as PNG files under the public static directory

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Where generated charts are written and how they are addressed over HTTP.
#[derive(Debug, Clone)]
pub struct ChartSink {
    dir: PathBuf,
    url_prefix: String,
}

impl ChartSink {
    pub fn new(dir: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<static_dir>/generated`, served as `/static/generated`.
    pub fn under_static_dir(static_dir: &Path) -> Self {
        Self::new(static_dir.join("generated"), "/static/generated")
    }

    /// Create the output directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create chart directory {:?}", self.dir))
    }

    /// Write the image under a fresh random name and return its public URL.
    pub async fn save(&self, image: &RgbImage) -> Result<String> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .context("Failed to encode chart as PNG")?;

        let file_name = format!("plot-{}.png", Uuid::new_v4().simple());
        let path = self.dir.join(&file_name);
        fs::write(&path, &png)
            .await
            .with_context(|| format!("Failed to write chart to {:?}", path))?;

        tracing::info!(path = %path.display(), bytes = png.len(), "Saved chart");
        Ok(format!("{}/{}", self.url_prefix, file_name))
    }

    /// Map a URL returned by [`ChartSink::save`] back to its file.
    pub fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(&self.url_prefix)?.strip_prefix('/')?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        Some(self.dir.join(name))
    }
}
