use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

pub const LIVERELOAD_PATH: &str = "/__livereload";

const RELOAD_MESSAGE: &str = "reload";
const DEBOUNCE: Duration = Duration::from_millis(500);
const MIN_RELOAD_INTERVAL: Duration = Duration::from_millis(1000);

/// Configuration for the preview server
#[derive(Debug, Clone)]
pub struct PreviewConfig {
    /// Host to bind to
    pub host: String,
    /// Port to serve on
    pub port: u16,
    /// Built site to serve and watch
    pub root: PathBuf,
    /// Auto-open browser
    pub open: bool,
    /// Path fragments to ignore when watching
    pub ignore: Vec<String>,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            root: PathBuf::from("./build"),
            open: false,
            ignore: vec![],
        }
    }
}

impl PreviewConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid address {}:{}", self.host, self.port))
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.ignore.iter().any(|pattern| path.contains(pattern.as_str()))
    }
}

/// Static file server that tells connected pages to reload when the
/// served directory changes.
pub struct PreviewServer {
    config: PreviewConfig,
}

impl PreviewServer {
    pub fn new(config: PreviewConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> Result<()> {
        if !self.config.root.exists() {
            anyhow::bail!("Root directory does not exist: {}", self.config.root.display());
        }

        let addr = self.config.addr()?;
        let (reload_tx, _) = broadcast::channel::<String>(16);

        let watcher_config = self.config.clone();
        let watcher_tx = reload_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_root(watcher_config, watcher_tx).await {
                warn!("Output watcher stopped: {e:#}");
            }
        });

        let app = Router::new()
            .route(LIVERELOAD_PATH, get(websocket_handler))
            .fallback_service(ServeDir::new(&self.config.root))
            .with_state(reload_tx);

        info!("Serving {} at http://{addr}", self.config.root.display());

        if self.config.open {
            if let Err(e) = open::that(format!("http://{addr}")) {
                warn!("Failed to open browser: {e}");
            }
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(reload_tx): State<broadcast::Sender<String>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket_connection(socket, reload_tx.subscribe()))
}

async fn websocket_connection(mut socket: WebSocket, mut rx: broadcast::Receiver<String>) {
    if socket.send(Message::Text("connected".into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = next_reload(&mut rx) => {
                let Some(msg) = msg else { break };
                if socket.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }
}

/// Next reload message, or `None` once the sender is gone. A slow client
/// that lagged behind just gets the next message.
async fn next_reload(rx: &mut broadcast::Receiver<String>) -> Option<String> {
    loop {
        match rx.recv().await {
            Ok(msg) => return Some(msg),
            Err(RecvError::Lagged(skipped)) => debug!("Live reload client skipped {skipped} messages"),
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn watch_root(config: PreviewConfig, reload_tx: broadcast::Sender<String>) -> Result<()> {
    let (tx, mut rx) = mpsc::channel(100);

    let mut debouncer = new_debouncer(DEBOUNCE, move |res: DebounceEventResult| {
        if let Ok(events) = res {
            for event in events {
                let _ = tx.blocking_send(event.path);
            }
        }
    })?;
    debouncer
        .watcher()
        .watch(&config.root, RecursiveMode::Recursive)?;

    debug!("Watching output directory {}", config.root.display());

    let mut last_reload: Option<Instant> = None;
    while let Some(path) = rx.recv().await {
        if config.is_ignored(&path) {
            continue;
        }

        let now = Instant::now();
        if last_reload.is_some_and(|at| now.duration_since(at) < MIN_RELOAD_INTERVAL) {
            debug!("Skipping reload for {} (too soon)", path.display());
            continue;
        }

        debug!("Output changed: {}", path.display());
        // No receivers just means no page is open.
        let _ = reload_tx.send(RELOAD_MESSAGE.to_string());
        last_reload = Some(now);
    }

    Ok(())
}

/// Inject the live reload client into an HTML document
pub fn inject_livereload_script(html: &str, host: &str, port: u16) -> String {
    let script = format!(
        r#"
<script>
(function() {{
    const socket = new WebSocket('ws://{host}:{port}{LIVERELOAD_PATH}');
    socket.onmessage = function(event) {{
        if (event.data === '{RELOAD_MESSAGE}') {{
            location.reload();
        }}
    }};
    socket.onclose = function() {{
        console.log('Live reload disconnected');
    }};
}})();
</script>
"#
    );

    match html.rfind("</body>") {
        Some(pos) => {
            let mut result = String::with_capacity(html.len() + script.len());
            result.push_str(&html[..pos]);
            result.push_str(&script);
            result.push_str(&html[pos..]);
            result
        }
        None => format!("{html}{script}"),
    }
}

/// Rewrite a rendered `.html`/`.htm` file in place with the live reload client.
/// Returns whether the file was changed.
pub fn inject_livereload_into_file(path: &Path, host: &str, port: u16) -> Result<bool> {
    let is_html = path
        .extension()
        .is_some_and(|ext| ext == "html" || ext == "htm");
    if !is_html {
        return Ok(false);
    }

    let html = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    std::fs::write(path, inject_livereload_script(&html, host, port))
        .with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_lagging_client_keeps_receiving() {
        let (tx, mut rx) = broadcast::channel::<String>(1);
        tx.send("first".to_string()).unwrap();
        tx.send("second".to_string()).unwrap();

        assert_eq!(next_reload(&mut rx).await.as_deref(), Some("second"));

        drop(tx);
        assert_eq!(next_reload(&mut rx).await, None);
    }

    #[test]
    fn test_script_goes_before_closing_body() {
        let html = inject_livereload_script("<html><body><p>hi</p></body></html>", "127.0.0.1", 3000);

        let script_at = html.find("<script>").unwrap();
        assert!(script_at < html.find("</body>").unwrap());
        assert!(html.contains("ws://127.0.0.1:3000/__livereload"));
        assert!(html.ends_with("</body></html>"));
    }

    #[test]
    fn test_script_appended_without_body() {
        let html = inject_livereload_script("<p>fragment</p>", "localhost", 8080);

        assert!(html.starts_with("<p>fragment</p>"));
        assert!(html.trim_end().ends_with("</script>"));
        assert!(html.contains("ws://localhost:8080/__livereload"));
    }

    #[test]
    fn test_inject_into_file_only_touches_html() {
        let dir = TempDir::new().unwrap();
        let page = dir.path().join("index.html");
        let style = dir.path().join("site.css");
        std::fs::write(&page, "<body></body>").unwrap();
        std::fs::write(&style, "body {}").unwrap();

        assert!(inject_livereload_into_file(&page, "127.0.0.1", 3000).unwrap());
        assert!(!inject_livereload_into_file(&style, "127.0.0.1", 3000).unwrap());

        assert!(std::fs::read_to_string(&page).unwrap().contains("<script>"));
        assert_eq!(std::fs::read_to_string(&style).unwrap(), "body {}");
    }

    #[test]
    fn test_ignore_patterns() {
        let config = PreviewConfig {
            ignore: vec![".git".to_string(), ".tmp".to_string()],
            ..PreviewConfig::default()
        };

        assert!(config.is_ignored(Path::new("build/.git/index")));
        assert!(config.is_ignored(Path::new("build/page.html.tmp")));
        assert!(!config.is_ignored(Path::new("build/index.html")));
    }

    #[test]
    fn test_addr() {
        let config = PreviewConfig::default();
        assert_eq!(config.addr().unwrap().port(), 3000);

        let bad = PreviewConfig {
            host: "not a host".to_string(),
            ..PreviewConfig::default()
        };
        assert!(bad.addr().is_err());
    }
}
