use std::path::{Path, PathBuf};

use serde::Serialize;
use tera::{Context, Tera};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::data::Namespace;
use crate::markdown::MarkdownFilter;

/// Extensions loaded as templates. Everything else is copied verbatim.
pub const TEMPLATE_EXTENSIONS: [&str; 4] = ["html", "htm", "xml", "txt"];

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to walk template directory: {0}")]
    Walk(#[from] walkdir::Error),
}

pub struct SiteRenderer {
    tera: Tera,
    context: Context,
    templates_dir: PathBuf,
    assets: Vec<String>,
}

impl SiteRenderer {
    pub fn new<P: AsRef<Path>>(templates_dir: P) -> Result<Self, RenderError> {
        let templates_dir = templates_dir.as_ref().to_path_buf();
        let mut templates = Vec::new();
        let mut assets = Vec::new();

        for entry in WalkDir::new(&templates_dir)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Some(name) = template_name(&templates_dir, entry.path()) else {
                continue;
            };

            if is_template(entry.path()) {
                templates.push((entry.path().to_path_buf(), Some(name)));
            } else {
                assets.push(name);
            }
        }

        let mut tera = Tera::default();
        tera.add_template_files(templates)?;
        tera.register_filter("markdown", MarkdownFilter);
        assets.sort();

        Ok(Self {
            tera,
            context: Context::new(),
            templates_dir,
            assets,
        })
    }

    /// Add a global variable visible to every template
    pub fn set_global_context<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.context.insert(key, value);
    }

    /// Bind every section of the namespace as a global
    pub fn set_globals(&mut self, namespace: &Namespace) {
        for (key, value) in namespace.iter() {
            self.set_global_context(key.as_str(), value);
        }
    }

    /// Templates that produce an output file, sorted by name
    pub fn pages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .tera
            .get_template_names()
            .filter(|name| !is_partial(name))
            .collect();
        names.sort_unstable();
        names
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn render(&self, template: &str) -> Result<String, RenderError> {
        Ok(self.tera.render(template, &self.context)?)
    }

    /// Render every page and copy every asset into `output_dir`.
    ///
    /// All pages are rendered before anything is written, so a template
    /// error leaves the previous output untouched.
    pub fn render_all<P: AsRef<Path>>(&self, output_dir: P) -> Result<Vec<PathBuf>, RenderError> {
        let output_dir = output_dir.as_ref();
        let mut written = Vec::new();

        let rendered = self
            .pages()
            .into_iter()
            .map(|name| Ok((name, self.render(name)?)))
            .collect::<Result<Vec<_>, RenderError>>()?;

        for (name, html) in rendered {
            let out_path = output_dir.join(name);
            ensure_parent(&out_path)?;
            std::fs::write(&out_path, html).map_err(|source| RenderError::Io {
                path: out_path.clone(),
                source,
            })?;
            debug!("Rendered {name}");
            written.push(out_path);
        }

        for name in &self.assets {
            let out_path = output_dir.join(name);
            ensure_parent(&out_path)?;
            std::fs::copy(self.templates_dir.join(name), &out_path).map_err(|source| {
                RenderError::Io {
                    path: out_path.clone(),
                    source,
                }
            })?;
            debug!("Copied {name}");
            written.push(out_path);
        }

        info!(
            "Wrote {} files to {}",
            written.len(),
            output_dir.display()
        );

        Ok(written)
    }
}

fn ensure_parent(path: &Path) -> Result<(), RenderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| RenderError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

// Template names always use `/`, whatever the platform separator is.
fn template_name(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

fn is_template(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext))
}

/// Partials start with `_` and are only reachable through include/extends.
fn is_partial(name: &str) -> bool {
    name.rsplit('/').next().is_some_and(|file| file.starts_with('_'))
}
