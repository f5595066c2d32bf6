//! Template rendering seam.
//!
//! A renderer turns an app's chart package and profile package into
//! single-document manifest files, ordered for installation. The files live
//! in a scratch directory owned by [`RenderedTemplates`] and are removed when
//! it is dropped.

mod chart;
mod order;
mod values;

pub use chart::ChartRenderer;
pub use order::{install_rank, split_documents};

use std::path::{Path, PathBuf};

use tempfile::TempDir;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unpacking {what}: {source}")]
    Archive {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("chart {0} not found in package")]
    ChartNotFound(String),

    #[error("profile manifest: {0}")]
    Profile(String),

    #[error("invalid values: {0}")]
    Values(String),

    #[error("template {file}: {message}")]
    Template { file: String, message: String },

    #[error("release name {0:?} is not a valid DNS label")]
    ReleaseName(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// One rendered, single-document manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubernetesResourceTemplate {
    pub api_version: String,
    /// Empty when the document carries no object, e.g. comments only.
    pub kind: String,
    pub file_path: PathBuf,
}

/// Rendered templates plus the scratch directory holding them.
#[derive(Debug)]
pub struct RenderedTemplates {
    templates: Vec<KubernetesResourceTemplate>,
    scratch: TempDir,
}

impl RenderedTemplates {
    pub fn new() -> RenderResult<Self> {
        let scratch = tempfile::Builder::new().prefix("emco-render-").tempdir()?;
        Ok(Self::in_dir(scratch))
    }

    pub(crate) fn in_dir(scratch: TempDir) -> Self {
        Self {
            templates: Vec::new(),
            scratch,
        }
    }

    /// Write a document under `relative` and append it in install order position.
    pub fn push(
        &mut self,
        api_version: &str,
        kind: &str,
        relative: &Path,
        content: &str,
    ) -> RenderResult<()> {
        let path = self.scratch.path().join("manifests").join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, content)?;
        self.templates.push(KubernetesResourceTemplate {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            file_path: path,
        });
        Ok(())
    }

    pub fn templates(&self) -> &[KubernetesResourceTemplate] {
        &self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Root of the scratch directory.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }
}

/// Renders an app's packages into manifests.
pub trait TemplateRenderer: Send + Sync {
    /// `app_package` and `profile_package` are gzip tarballs; `overrides`
    /// are `key=value` pairs applied last.
    fn resolve(
        &self,
        app_package: &[u8],
        profile_package: &[u8],
        overrides: &[String],
        app_name: &str,
        release: &str,
    ) -> RenderResult<RenderedTemplates>;
}
