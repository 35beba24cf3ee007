pub mod builder;
pub mod config;
pub mod data;
pub mod markdown;
pub mod renderer;

// Re-export main types
pub use builder::{BuildError, Site, SiteBuilder, build_site};
pub use config::{Config, DataConfig};
pub use data::{DataError, DataLoader, MalformedPolicy, Namespace, SectionKey, load_namespace};
pub use renderer::{RenderError, SiteRenderer};
