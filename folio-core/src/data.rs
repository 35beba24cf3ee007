use std::fmt;
use std::path::{Path, PathBuf};

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Extension a file needs to be considered a data file.
pub const DATA_EXTENSION: &str = "json";

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("failed to read data directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to read data file {}: {source}", path.display())]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed data file {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// The page sections a data file can provide content for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionKey {
    Header,
    About,
    Projects,
    Experiences,
    Education,
}

impl SectionKey {
    pub const ALL: [SectionKey; 5] = [
        SectionKey::Header,
        SectionKey::About,
        SectionKey::Projects,
        SectionKey::Experiences,
        SectionKey::Education,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SectionKey::Header => "header",
            SectionKey::About => "about",
            SectionKey::Projects => "projects",
            SectionKey::Experiences => "experiences",
            SectionKey::Education => "education",
        }
    }

    /// Match a file stem against the recognized keys. Case-sensitive.
    pub fn from_stem(stem: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == stem)
    }

    /// Placeholder content used when `<key>.json` is absent.
    pub fn default_entry(self) -> Value {
        json!({ "title": format!("No {}.{} file found", self.as_str(), DATA_EXTENSION) })
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content for every recognized section, handed to templates as globals.
///
/// Always holds exactly one entry per [`SectionKey`].
#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    entries: [Value; 5],
    loaded: [bool; 5],
}

impl Namespace {
    pub fn with_defaults() -> Self {
        Self {
            entries: SectionKey::ALL.map(SectionKey::default_entry),
            loaded: [false; 5],
        }
    }

    pub fn get(&self, key: SectionKey) -> &Value {
        &self.entries[key.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionKey, &Value)> {
        SectionKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    pub fn is_default(&self, key: SectionKey) -> bool {
        *self.get(key) == key.default_entry()
    }

    /// Whether the entry came from a data file, even one whose content
    /// happens to equal the default.
    pub fn is_loaded(&self, key: SectionKey) -> bool {
        self.loaded[key.index()]
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.iter().filter(|loaded| **loaded).count()
    }

    // Replaces the whole entry; nested values are never merged.
    fn replace(&mut self, key: SectionKey, value: Value) {
        self.entries[key.index()] = value;
        self.loaded[key.index()] = true;
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Serialize for Namespace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key.as_str(), value)?;
        }
        map.end()
    }
}

/// What to do with a recognized data file that is not valid JSON.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MalformedPolicy {
    /// Abort the whole load.
    #[default]
    Fail,
    /// Keep the section's default entry and log a warning.
    UseDefault,
}

impl fmt::Display for MalformedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedPolicy::Fail => f.write_str("fail"),
            MalformedPolicy::UseDefault => f.write_str("use-default"),
        }
    }
}

pub struct DataLoader {
    data_dir: PathBuf,
    on_malformed: MalformedPolicy,
}

impl DataLoader {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            data_dir: path.as_ref().to_path_buf(),
            on_malformed: MalformedPolicy::default(),
        }
    }

    pub fn on_malformed(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Build a fresh namespace from the data directory.
    pub fn load(&self) -> Result<Namespace, DataError> {
        debug!("Loading data from {}", self.data_dir.display());
        let mut namespace = Namespace::with_defaults();

        for path in self.data_files()? {
            let Some(key) = section_key(&path) else {
                debug!("Ignoring unrecognized data file {}", path.display());
                continue;
            };

            match read_entry(&path) {
                Ok(value) => {
                    debug!("Loaded {} from {}", key, path.display());
                    namespace.replace(key, value);
                }
                Err(err @ DataError::Malformed { .. })
                    if self.on_malformed == MalformedPolicy::UseDefault =>
                {
                    warn!("{err}; using default {key} content");
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "Loaded {} of {} data sections from {}",
            namespace.loaded_count(),
            SectionKey::ALL.len(),
            self.data_dir.display()
        );

        Ok(namespace)
    }

    // Regular files directly inside the data directory with the data extension.
    fn data_files(&self) -> Result<Vec<PathBuf>, DataError> {
        let read_dir_err = |source| DataError::ReadDir {
            path: self.data_dir.clone(),
            source,
        };

        let mut files = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir).map_err(read_dir_err)? {
            let path = entry.map_err(read_dir_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == DATA_EXTENSION) {
                files.push(path);
            }
        }

        Ok(files)
    }
}

/// Load a namespace, failing on any malformed data file.
pub fn load_namespace<P: AsRef<Path>>(path: P) -> Result<Namespace, DataError> {
    DataLoader::new(path).load()
}

fn section_key(path: &Path) -> Option<SectionKey> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(SectionKey::from_stem)
}

fn read_entry(path: &Path) -> Result<Value, DataError> {
    // Raw bytes, so invalid UTF-8 surfaces as a parse error rather than an I/O one.
    let data = std::fs::read(path).map_err(|source| DataError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    serde_json::from_slice(&data).map_err(|source| DataError::Malformed {
        path: path.to_path_buf(),
        source,
    })
}
