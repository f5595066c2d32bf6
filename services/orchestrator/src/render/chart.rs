//! Renderer for gzip-tarball chart packages.
//!
//! Supports the subset of chart templating the orchestrator's packages use:
//! `{{ .Values.<path> }}`, `{{ .Release.Name }}` and `{{ .Release.Namespace }}`.
//! Values are layered as chart `values.yaml`, then the profile's values
//! file, then `key=value` overrides.

use std::fs;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use super::order::{install_rank, split_documents};
use super::values;
use super::{RenderError, RenderResult, RenderedTemplates, TemplateRenderer};

/// Name of the manifest inside a profile package.
pub const PROFILE_MANIFEST: &str = "manifest.yaml";

/// Profile `manifest.yaml`.
#[derive(Debug, Default, Deserialize)]
struct ProfileManifest {
    #[serde(rename = "type", default)]
    overrides: ProfileOverrides,
}

#[derive(Debug, Default, Deserialize)]
struct ProfileOverrides {
    /// Values file inside the profile package.
    #[serde(default)]
    values: String,
    #[serde(default)]
    configresource: Vec<ConfigResource>,
}

/// A profile file copied into the chart before rendering.
#[derive(Debug, Deserialize)]
struct ConfigResource {
    filepath: String,
    chartpath: String,
}

struct Document {
    rank: usize,
    path: PathBuf,
    api_version: String,
    kind: String,
    content: String,
}

/// [`TemplateRenderer`] for chart tarballs.
#[derive(Debug, Clone)]
pub struct ChartRenderer {
    namespace: String,
}

impl Default for ChartRenderer {
    fn default() -> Self {
        Self::new("default")
    }
}

impl ChartRenderer {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    fn load_profile(&self, profile_root: &Path) -> RenderResult<ProfileManifest> {
        let path = profile_root.join(PROFILE_MANIFEST);
        let raw = fs::read_to_string(&path)
            .map_err(|e| RenderError::Profile(format!("reading {PROFILE_MANIFEST}: {e}")))?;
        serde_yaml::from_str(&raw)
            .map_err(|e| RenderError::Profile(format!("parsing {PROFILE_MANIFEST}: {e}")))
    }

    fn evaluate(&self, expr: &str, values: &Value, release: &str) -> Result<String, String> {
        match expr {
            ".Release.Name" => Ok(release.to_string()),
            ".Release.Namespace" => Ok(self.namespace.clone()),
            _ if expr.starts_with("/*") && expr.ends_with("*/") => Ok(String::new()),
            _ => {
                let path = expr
                    .strip_prefix(".Values.")
                    .ok_or_else(|| format!("unsupported expression {{{{ {expr} }}}}"))?;
                match values::lookup(values, path) {
                    None => Ok(String::new()),
                    Some(v) => values::scalar_text(v)
                        .ok_or_else(|| format!("{expr} is not a scalar value")),
                }
            }
        }
    }

    fn substitute(&self, text: &str, values: &Value, release: &str) -> Result<String, String> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after
                .find("}}")
                .ok_or_else(|| "unclosed {{".to_string())?;
            let expr = after[..end]
                .trim()
                .trim_start_matches('-')
                .trim_end_matches('-')
                .trim();
            out.push_str(&self.evaluate(expr, values, release)?);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl TemplateRenderer for ChartRenderer {
    fn resolve(
        &self,
        app_package: &[u8],
        profile_package: &[u8],
        overrides: &[String],
        app_name: &str,
        release: &str,
    ) -> RenderResult<RenderedTemplates> {
        validate_release(release)?;

        let mut rendered = RenderedTemplates::new()?;
        let chart_root = rendered.scratch_dir().join("chart");
        let profile_root = rendered.scratch_dir().join("profile");
        unpack(app_package, &chart_root, "app package")?;
        unpack(profile_package, &profile_root, "profile package")?;

        let profile = self.load_profile(&profile_root)?;
        for res in &profile.overrides.configresource {
            let from = safe_join(&profile_root, &res.filepath)?;
            let to = safe_join(&chart_root, &res.chartpath)?;
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&from, &to).map_err(|e| {
                RenderError::Profile(format!("copying {} into chart: {e}", res.filepath))
            })?;
        }

        let chart_dir = chart_root.join(app_name);
        if !chart_dir.is_dir() {
            return Err(RenderError::ChartNotFound(app_name.to_string()));
        }

        let mut merged = match read_optional(&chart_dir.join("values.yaml"))? {
            Some(text) => values::parse(&text)?,
            None => values::parse("")?,
        };
        if !profile.overrides.values.is_empty() {
            let path = safe_join(&profile_root, &profile.overrides.values)?;
            let text = fs::read_to_string(&path).map_err(|e| {
                RenderError::Profile(format!("reading {}: {e}", profile.overrides.values))
            })?;
            values::merge(&mut merged, values::parse(&text)?);
        }
        for assignment in overrides {
            values::apply_override(&mut merged, assignment)?;
        }

        let templates_dir = chart_dir.join("templates");
        let mut documents = Vec::new();
        for file in list_files(&templates_dir)? {
            let relative = file.strip_prefix(&templates_dir).unwrap_or(&file);
            let base = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if base == "NOTES.txt" || base.starts_with('_') {
                continue;
            }

            let source = fs::read_to_string(&file)?;
            let text = self
                .substitute(&source, &merged, release)
                .map_err(|message| RenderError::Template {
                    file: relative.display().to_string(),
                    message,
                })?;

            for (n, doc) in split_documents(&text).into_iter().enumerate() {
                if doc.trim().is_empty() {
                    continue;
                }
                let (api_version, kind) =
                    type_meta(&doc).map_err(|message| RenderError::Template {
                        file: relative.display().to_string(),
                        message,
                    })?;
                documents.push(Document {
                    rank: install_rank(&kind),
                    path: PathBuf::from(format!("{}-{n}", relative.display())),
                    api_version,
                    kind,
                    content: doc,
                });
            }
        }

        documents.sort_by_key(|d| d.rank);
        for doc in documents {
            rendered.push(&doc.api_version, &doc.kind, &doc.path, &doc.content)?;
        }

        debug!(app = app_name, release, templates = rendered.len(), "Rendered chart");
        Ok(rendered)
    }
}

fn unpack(package: &[u8], dest: &Path, what: &'static str) -> RenderResult<()> {
    fs::create_dir_all(dest)?;
    tar::Archive::new(GzDecoder::new(package))
        .unpack(dest)
        .map_err(|source| RenderError::Archive { what, source })
}

/// Join a package-relative path, refusing anything that escapes `base`.
fn safe_join(base: &Path, relative: &str) -> RenderResult<PathBuf> {
    let rel = Path::new(relative);
    if relative.is_empty()
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(RenderError::Profile(format!(
            "path {relative:?} must stay inside the package"
        )));
    }
    Ok(base.join(rel))
}

fn read_optional(path: &Path) -> RenderResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All files under `dir`, sorted by path.
fn list_files(dir: &Path) -> RenderResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// `apiVersion` and `kind` of a document; both empty for comment-only documents.
fn type_meta(doc: &str) -> Result<(String, String), String> {
    let value: Value = serde_yaml::from_str(doc).map_err(|e| e.to_string())?;
    match value {
        Value::Null => Ok((String::new(), String::new())),
        Value::Mapping(map) => {
            let field = |name: &str| {
                map.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            Ok((field("apiVersion"), field("kind")))
        }
        _ => Err("document is not an object".to_string()),
    }
}

/// Release names must be DNS labels when set.
fn validate_release(release: &str) -> RenderResult<()> {
    if release.is_empty() {
        return Ok(());
    }
    let bytes = release.as_bytes();
    let valid_char = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-';
    let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    let ok = release.len() <= 63
        && bytes.iter().all(valid_char)
        && bytes.first().is_some_and(alnum)
        && bytes.last().is_some_and(alnum);
    if ok {
        Ok(())
    } else {
        Err(RenderError::ReleaseName(release.to_string()))
    }
}
