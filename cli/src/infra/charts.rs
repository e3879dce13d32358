//! Bundled Helm charts compiled into the binary.
//!
//! At compile time `include_dir!` embeds everything under `cli/charts/`.
//! A configured charts directory on disk takes precedence, so a chart can be
//! edited without rebuilding.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use include_dir::{Dir, DirEntry, include_dir};
use tracing::debug;

use crate::application::ports::ChartBundle;

static EMBEDDED_CHARTS: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/charts");

/// Packs bundled charts as gzip tarballs rooted at the chart directory.
pub struct BundledCharts {
    override_dir: Option<PathBuf>,
}

impl BundledCharts {
    #[must_use]
    pub fn new(override_dir: Option<PathBuf>) -> Self {
        Self { override_dir }
    }

    /// Names of the charts embedded in this build.
    #[must_use]
    pub fn embedded_names() -> Vec<String> {
        EMBEDDED_CHARTS
            .dirs()
            .map(|d| d.path().display().to_string())
            .collect()
    }
}

impl ChartBundle for BundledCharts {
    fn pack(&self, path: &str) -> Result<Vec<u8>> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

        let on_disk = self
            .override_dir
            .as_ref()
            .map(|dir| dir.join(path))
            .filter(|dir| dir.is_dir());
        if let Some(dir) = on_disk {
            debug!(chart = path, dir = %dir.display(), "packing chart from disk");
            builder
                .append_dir_all(".", &dir)
                .with_context(|| format!("packing {}", dir.display()))?;
        } else {
            let root = EMBEDDED_CHARTS
                .get_dir(path)
                .ok_or_else(|| anyhow::anyhow!("bundled chart not found: {path}"))?;
            append_embedded(&mut builder, root, Path::new(path))?;
        }

        let encoder = builder.into_inner().context("finishing chart archive")?;
        encoder.finish().context("compressing chart archive")
    }
}

fn append_embedded<W: std::io::Write>(
    builder: &mut tar::Builder<W>,
    dir: &Dir<'_>,
    root: &Path,
) -> Result<()> {
    for entry in dir.entries() {
        match entry {
            DirEntry::Dir(child) => append_embedded(builder, child, root)?,
            DirEntry::File(file) => {
                let relative = file
                    .path()
                    .strip_prefix(root)
                    .with_context(|| format!("{} outside chart root", file.path().display()))?;
                let mut header = tar::Header::new_gnu();
                header.set_size(file.contents().len() as u64);
                header.set_mode(0o644);
                builder
                    .append_data(&mut header, relative, file.contents())
                    .with_context(|| format!("adding {}", relative.display()))?;
            }
        }
    }
    Ok(())
}
