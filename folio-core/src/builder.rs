use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::Config;
use crate::data::{DataError, DataLoader, MalformedPolicy, Namespace};
use crate::renderer::{RenderError, SiteRenderer};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Data directory not specified")]
    MissingDataDir,
    #[error(transparent)]
    Data(#[from] DataError),
    #[error(transparent)]
    Render(#[from] RenderError),
}

pub struct SiteBuilder {
    data_dir: Option<PathBuf>,
    templates_dir: PathBuf,
    output_dir: PathBuf,
    on_malformed: MalformedPolicy,
}

impl Default for SiteBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteBuilder {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            templates_dir: PathBuf::from("./templates"),
            output_dir: PathBuf::from("./build"),
            on_malformed: MalformedPolicy::default(),
        }
    }

    // Required configuration
    pub fn data_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    // Optional paths
    pub fn templates_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.templates_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = path.as_ref().to_path_buf();
        self
    }

    pub fn on_malformed(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn config(self, config: &Config) -> Self {
        self.on_malformed(config.data.on_malformed)
    }

    /// Load the data namespace and prepare templates.
    ///
    /// Data is loaded first so that a broken data file stops the build
    /// before anything is rendered.
    pub fn build(self) -> Result<Site, BuildError> {
        let data_dir = self.data_dir.ok_or(BuildError::MissingDataDir)?;

        let namespace = DataLoader::new(&data_dir)
            .on_malformed(self.on_malformed)
            .load()?;

        let mut renderer = SiteRenderer::new(&self.templates_dir)?;
        renderer.set_globals(&namespace);

        Ok(Site {
            namespace,
            renderer,
            output_dir: self.output_dir,
        })
    }
}

pub struct Site {
    namespace: Namespace,
    renderer: SiteRenderer,
    output_dir: PathBuf,
}

impl Site {
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn render_all(&self) -> Result<Vec<PathBuf>, BuildError> {
        Ok(self.renderer.render_all(&self.output_dir)?)
    }
}

/// Load data, render every template and return the files written.
pub fn build_site(
    config: &Config,
    data_dir: &Path,
    templates_dir: &Path,
    output_dir: &Path,
) -> Result<Vec<PathBuf>, BuildError> {
    let site = SiteBuilder::new()
        .data_dir(data_dir)
        .templates_dir(templates_dir)
        .output_dir(output_dir)
        .config(config)
        .build()?;

    let written = site.render_all()?;
    info!("Built {} files into {}", written.len(), output_dir.display());

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataConfig;
    use crate::data::SectionKey;
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        data: TempDir,
        templates: TempDir,
        out: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let fixture = Self {
                data: TempDir::new().unwrap(),
                templates: TempDir::new().unwrap(),
                out: TempDir::new().unwrap(),
            };
            std::fs::write(
                fixture.templates.path().join("index.html"),
                "<h1>{{ header.title }}</h1><p>{{ education.title }}</p>",
            )
            .unwrap();
            fixture
        }

        fn data_file(&self, name: &str, contents: &str) {
            std::fs::write(self.data.path().join(name), contents).unwrap();
        }

        fn build(&self, config: &Config) -> Result<Vec<PathBuf>, BuildError> {
            build_site(config, self.data.path(), self.templates.path(), self.out.path())
        }

        fn index(&self) -> String {
            std::fs::read_to_string(self.out.path().join("index.html")).unwrap()
        }
    }

    #[test]
    fn test_build_requires_data_dir() {
        assert!(matches!(
            SiteBuilder::new().build(),
            Err(BuildError::MissingDataDir)
        ));
    }

    #[test]
    fn test_build_site_renders_with_data() {
        let fixture = Fixture::new();
        fixture.data_file("header.json", r#"{"title":"Welcome"}"#);

        let written = fixture.build(&Config::default()).unwrap();

        assert_eq!(written, vec![fixture.out.path().join("index.html")]);
        assert_eq!(
            fixture.index(),
            "<h1>Welcome</h1><p>No education.json file found</p>"
        );
    }

    #[test]
    fn test_malformed_data_renders_nothing() {
        let fixture = Fixture::new();
        fixture.data_file("education.json", "{ nope");

        let err = fixture.build(&Config::default()).unwrap_err();

        assert!(matches!(err, BuildError::Data(DataError::Malformed { .. })));
        assert!(!fixture.out.path().join("index.html").exists());
    }

    #[test]
    fn test_malformed_data_with_lenient_config() {
        let fixture = Fixture::new();
        fixture.data_file("header.json", r#"{"title":"Welcome"}"#);
        fixture.data_file("education.json", "{ nope");
        let config = Config {
            data: DataConfig {
                on_malformed: MalformedPolicy::UseDefault,
            },
        };

        fixture.build(&config).unwrap();

        assert_eq!(
            fixture.index(),
            "<h1>Welcome</h1><p>No education.json file found</p>"
        );
    }

    #[test]
    fn test_rebuild_reflects_removed_file() {
        let fixture = Fixture::new();
        fixture.data_file("header.json", r#"{"title":"Welcome"}"#);
        fixture.build(&Config::default()).unwrap();

        std::fs::remove_file(fixture.data.path().join("header.json")).unwrap();
        fixture.build(&Config::default()).unwrap();

        assert_eq!(
            fixture.index(),
            "<h1>No header.json file found</h1><p>No education.json file found</p>"
        );
    }

    #[test]
    fn test_site_exposes_namespace() {
        let fixture = Fixture::new();
        fixture.data_file("about.json", r#"{"title":"Me"}"#);

        let site = SiteBuilder::new()
            .data_dir(fixture.data.path())
            .templates_dir(fixture.templates.path())
            .output_dir(fixture.out.path())
            .build()
            .unwrap();

        assert_eq!(site.namespace().get(SectionKey::About), &json!({ "title": "Me" }));
        assert_eq!(site.output_dir(), fixture.out.path());
    }
}
