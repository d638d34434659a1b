use answerpipe_core::{
    BrowserLauncher, BrowserSession, Error, RenderRequest, RenderedPage, Result,
    MAX_RENDERED_HTML_CHARS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Wall-clock limits around the browser process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    /// How long to wait for Chromium to come up.
    pub launch: Duration,
    /// Extra allowance on top of the navigation timeout before a render is abandoned.
    pub render_slack: Duration,
    /// How long `close` waits for the child to exit before killing it.
    pub close_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            launch: Duration::from_secs(30),
            render_slack: Duration::from_secs(10),
            close_grace: Duration::from_secs(10),
        }
    }
}

fn env_truthy(k: &str) -> bool {
    matches!(
        std::env::var(k)
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
            .as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn node_path_candidates() -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    if let Some(home) = std::env::var_os("HOME").map(std::path::PathBuf::from) {
        out.push(
            home.join(".npm-global")
                .join("lib")
                .join("node_modules")
                .to_string_lossy()
                .to_string(),
        );
    }
    out.push("/opt/homebrew/lib/node_modules".to_string());
    out.push("/usr/local/lib/node_modules".to_string());
    out.push("/usr/lib/node_modules".to_string());
    out
}

fn node_path_has_playwright(np: &str) -> bool {
    np.split(':')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .any(|p| std::path::Path::new(p).join("playwright").is_dir())
}

fn npm_root_g() -> Option<String> {
    let out = std::process::Command::new("npm")
        .args(["root", "-g"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let s = String::from_utf8_lossy(&out.stdout).trim().to_string();
    node_path_has_playwright(&s).then_some(s)
}

/// NODE_PATH value that lets `require('playwright')` resolve a global install.
///
/// Returns `None` when the existing NODE_PATH already works or nothing was found.
pub fn detect_node_path_for_playwright() -> Option<String> {
    if let Ok(v) = std::env::var("ANSWERPIPE_NODE_PATH") {
        let v = v.trim();
        if !v.is_empty() {
            return Some(v.to_string());
        }
    }

    let existing = std::env::var("NODE_PATH").ok().unwrap_or_default();
    if node_path_has_playwright(&existing) {
        return None;
    }

    let found = npm_root_g().or_else(|| {
        node_path_candidates()
            .into_iter()
            .find(|root| node_path_has_playwright(root))
    })?;

    if existing.trim().is_empty() {
        Some(found)
    } else {
        Some(format!("{existing}:{found}"))
    }
}

/// NODE_PATH a spawned Node process ends up with: the detected value, else the inherited one.
pub fn effective_node_path() -> Option<String> {
    detect_node_path_for_playwright().or_else(|| {
        std::env::var("NODE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
    })
}

/// Whether `require('playwright')` can succeed for `node_bin`.
///
/// A `playwright` directory on the effective NODE_PATH is enough; otherwise Node itself is
/// asked to resolve the module (this also covers local `node_modules`).
pub async fn playwright_resolvable(node_bin: &str, timeout: Duration) -> bool {
    let node_path = tokio::task::spawn_blocking(effective_node_path)
        .await
        .ok()
        .flatten();
    if node_path.as_deref().is_some_and(node_path_has_playwright) {
        return true;
    }
    let mut cmd = tokio::process::Command::new(node_bin);
    if let Some(np) = node_path {
        cmd.env("NODE_PATH", np);
    }
    cmd.arg("-e")
        .arg("require.resolve('playwright')")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    matches!(
        tokio::time::timeout(timeout, cmd.status()).await,
        Ok(Ok(status)) if status.success()
    )
}

// Line protocol: the first stdout line is a launch handshake ({id:0}); every stdin line is a
// render request and yields exactly one stdout line with the same id. EOF on stdin drains
// in-flight renders, closes the browser and exits.
const JS: &str = r#"
const readline = require('readline');

function emit(obj) { process.stdout.write(JSON.stringify(obj) + '\n'); }
function errMsg(e) { return String(e && e.message ? e.message : e); }

async function render(browser, req) {
  let context;
  const t0 = Date.now();
  try {
    context = await browser.newContext({ userAgent: req.user_agent, serviceWorkers: 'block' });
    const page = await context.newPage();
    const resp = await page.goto(req.url, { waitUntil: 'networkidle', timeout: req.timeout_ms });
    const html = await page.content();
    return {
      id: req.id, ok: true, final_url: page.url(), status: resp ? resp.status() : null,
      html, elapsed_ms: Date.now() - t0,
    };
  } catch (e) {
    return { id: req.id, ok: false, error: { code: 'fetch_failed', message: errMsg(e) } };
  } finally {
    if (context) { try { await context.close(); } catch (_) {} }
  }
}

async function main() {
  let pw;
  try { pw = require('playwright'); } catch (e) {
    emit({ id: 0, ok: false, error: { code: 'not_configured',
      message: 'Playwright is not installed for Node.js (require("playwright") failed). Install it with `npm i -g playwright` and `npx playwright install chromium`.' } });
    process.exit(0);
  }

  let browser;
  try {
    browser = await pw.chromium.launch({ headless: true, args: ['--no-sandbox', '--disable-setuid-sandbox'] });
  } catch (e) {
    emit({ id: 0, ok: false, error: { code: 'launch_failed', message: errMsg(e) } });
    process.exit(0);
  }
  emit({ id: 0, ok: true });

  const inflight = new Set();
  const rl = readline.createInterface({ input: process.stdin });
  rl.on('line', (line) => {
    let req;
    try { req = JSON.parse(line); } catch (_) { return; }
    const p = render(browser, req).then(emit);
    inflight.add(p);
    p.finally(() => inflight.delete(p));
  });
  rl.on('close', async () => {
    await Promise.allSettled([...inflight]);
    try { await browser.close(); } catch (_) {}
    process.exit(0);
  });
}

main().catch((e) => { emit({ id: 0, ok: false, error: { code: 'launch_failed', message: errMsg(e) } }); process.exit(0); });
"#;

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    id: u64,
    url: &'a str,
    user_agent: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct WireReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    final_url: Option<String>,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    html: Option<String>,
    #[serde(default)]
    elapsed_ms: Option<u64>,
    #[serde(default)]
    error: Option<WireError>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<WireReply>>>>;

/// Launches one headless Chromium (via Node + Playwright) per request.
#[derive(Debug, Clone)]
pub struct PlaywrightLauncher {
    node_bin: String,
    timeouts: SessionTimeouts,
    // Resolved on first launch; probing may shell out to `npm`.
    node_path: Arc<tokio::sync::OnceCell<Option<String>>>,
}

impl PlaywrightLauncher {
    pub fn new(node_bin: impl Into<String>) -> Self {
        Self {
            node_bin: node_bin.into(),
            timeouts: SessionTimeouts::default(),
            node_path: Arc::new(tokio::sync::OnceCell::new()),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    async fn node_path(&self) -> Option<String> {
        self.node_path
            .get_or_init(|| async {
                tokio::task::spawn_blocking(detect_node_path_for_playwright)
                    .await
                    .ok()
                    .flatten()
            })
            .await
            .clone()
    }
}

impl Default for PlaywrightLauncher {
    fn default() -> Self {
        Self::new(std::env::var("ANSWERPIPE_NODE").unwrap_or_else(|_| "node".to_string()))
    }
}

#[async_trait::async_trait]
impl BrowserLauncher for PlaywrightLauncher {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn launch(&self) -> Result<Box<dyn BrowserSession>> {
        if env_truthy("ANSWERPIPE_RENDER_DISABLE") {
            return Err(Error::NotConfigured(
                "render backend disabled (ANSWERPIPE_RENDER_DISABLE)".to_string(),
            ));
        }
        let mut cmd = tokio::process::Command::new(&self.node_bin);
        if let Some(node_path) = self.node_path().await {
            cmd.env("NODE_PATH", node_path);
        }
        cmd.arg("-e").arg(JS);
        let child = spawn_piped(&mut cmd).map_err(|e| {
            Error::NotConfigured(format!(
                "Playwright render requires Node.js (`{}`) and the Playwright npm package: {e}",
                self.node_bin
            ))
        })?;
        let session = PlaywrightSession::attach(child, self.timeouts).await?;
        Ok(Box::new(session))
    }
}

fn spawn_piped(cmd: &mut tokio::process::Command) -> std::io::Result<Child> {
    cmd.kill_on_drop(true)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
}

/// A running Node/Playwright process shared by every render of one request.
pub struct PlaywrightSession {
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    pending: Pending,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    timeouts: SessionTimeouts,
}

impl PlaywrightSession {
    /// Wait for the launch handshake of a child spawned by [`spawn_piped`]. The child must
    /// speak the line protocol of the embedded script.
    async fn attach(mut child: Child, timeouts: SessionTimeouts) -> Result<Self> {
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Browser("missing stdout pipe".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "answerpipe::browser", "node: {line}");
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        let handshake = tokio::time::timeout(timeouts.launch, lines.next_line()).await;
        let first = match handshake {
            Ok(Ok(Some(line))) => line,
            Ok(Ok(None)) => {
                return Err(Error::Browser(
                    "browser process exited before launch handshake".to_string(),
                ))
            }
            Ok(Err(e)) => return Err(Error::Browser(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                return Err(Error::Browser(format!(
                    "browser launch timed out after {}ms",
                    timeouts.launch.as_millis()
                )));
            }
        };
        let hello: WireReply = serde_json::from_str(first.trim())
            .map_err(|e| Error::Browser(format!("invalid launch handshake: {e}")))?;
        if !hello.ok {
            let err = hello.error.unwrap_or(WireError {
                code: String::new(),
                message: "browser launch failed".to_string(),
            });
            return Err(match err.code.as_str() {
                "not_configured" => Error::NotConfigured(err.message),
                _ => Error::Browser(err.message),
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let pending_rx = pending.clone();
        let reader = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                let reply: WireReply = match serde_json::from_str(line.trim()) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(target: "answerpipe::browser", "ignoring non-reply line: {e}");
                        continue;
                    }
                };
                let tx = pending_rx
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&reply.id);
                if let Some(tx) = tx {
                    let _ = tx.send(reply);
                }
            }
            // Process gone: dropping the senders fails every waiting render.
            pending_rx.lock().unwrap_or_else(|e| e.into_inner()).clear();
        });

        tracing::debug!(target: "answerpipe::browser", "playwright session launched");
        Ok(Self {
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            next_id: AtomicU64::new(1),
            reader,
            timeouts,
        })
    }

    fn forget(&self, id: u64) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }
}

#[async_trait::async_trait]
impl BrowserSession for PlaywrightSession {
    fn name(&self) -> &'static str {
        "playwright"
    }

    async fn render(&self, req: &RenderRequest) -> Result<RenderedPage> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, tx);

        let mut line = serde_json::to_string(&WireRequest {
            id,
            url: &req.url,
            user_agent: &req.user_agent,
            timeout_ms: req.timeout_ms,
        })
        .map_err(|e| Error::Browser(e.to_string()))?;
        line.push('\n');

        {
            let mut guard = self.stdin.lock().await;
            let Some(stdin) = guard.as_mut() else {
                self.forget(id);
                return Err(Error::Browser("browser session is closed".to_string()));
            };
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.forget(id);
                return Err(Error::Browser(format!("write to browser process: {e}")));
            }
            let _ = stdin.flush().await;
        }

        let hard_timeout = req.timeout() + self.timeouts.render_slack;
        let reply = match tokio::time::timeout(hard_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(Error::Browser(
                    "browser process exited during render".to_string(),
                ))
            }
            Err(_) => {
                self.forget(id);
                return Err(Error::Fetch(format!(
                    "render hard timeout after {}ms",
                    hard_timeout.as_millis()
                )));
            }
        };

        if !reply.ok {
            let message = reply
                .error
                .map(|e| e.message)
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "render failed".to_string());
            return Err(Error::Fetch(message));
        }

        let html = reply.html.unwrap_or_default();
        if html.trim().is_empty() {
            return Err(Error::Fetch("render returned empty HTML".to_string()));
        }
        if html.len() > MAX_RENDERED_HTML_CHARS && html.chars().count() > MAX_RENDERED_HTML_CHARS
        {
            return Err(Error::Fetch(format!(
                "rendered HTML too large (> {MAX_RENDERED_HTML_CHARS} chars)"
            )));
        }

        Ok(RenderedPage {
            url: req.url.clone(),
            final_url: reply.final_url.unwrap_or_else(|| req.url.clone()),
            status: reply.status,
            html,
            elapsed_ms: reply.elapsed_ms.unwrap_or(0),
        })
    }

    async fn close(&self) -> Result<()> {
        // Closing stdin asks the script to drain and close Chromium.
        if let Some(mut stdin) = self.stdin.lock().await.take() {
            let _ = stdin.shutdown().await;
        }
        let mut child = self.child.lock().await;
        let grace = self.timeouts.close_grace;
        let exited = tokio::time::timeout(grace, child.wait()).await;
        let out = match exited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(Error::Browser(e.to_string())),
            Err(_) => {
                let _ = child.kill().await;
                let _ = child.wait().await;
                Err(Error::Browser(format!(
                    "browser did not exit within {}ms; killed",
                    grace.as_millis()
                )))
            }
        };
        self.reader.abort();
        tracing::debug!(target: "answerpipe::browser", "playwright session closed");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env vars are process-global; serialize tests that mutate them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn launch_fails_closed_when_render_disabled() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("ANSWERPIPE_RENDER_DISABLE", "1");
        let r = PlaywrightLauncher::new("node").launch().await;
        std::env::remove_var("ANSWERPIPE_RENDER_DISABLE");
        assert!(matches!(r, Err(Error::NotConfigured(_))));
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn launch_reports_missing_node_binary_as_not_configured() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::remove_var("ANSWERPIPE_RENDER_DISABLE");
        let r = PlaywrightLauncher::new("/definitely/not/a/node-binary")
            .launch()
            .await;
        match r {
            Err(Error::NotConfigured(m)) => assert!(m.contains("Node.js")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected launch failure"),
        }
    }

    #[test]
    fn wire_reply_parses_success_and_failure_lines() {
        let ok: WireReply = serde_json::from_str(
            r#"{"id":3,"ok":true,"final_url":"https://a.test/","status":200,"html":"<p>x</p>","elapsed_ms":12}"#,
        )
        .unwrap();
        assert_eq!(ok.id, 3);
        assert!(ok.ok);
        assert_eq!(ok.status, Some(200));

        let bad: WireReply = serde_json::from_str(
            r#"{"id":4,"ok":false,"error":{"code":"fetch_failed","message":"Timeout 30000ms exceeded."}}"#,
        )
        .unwrap();
        assert!(!bad.ok);
        assert_eq!(bad.error.unwrap().message, "Timeout 30000ms exceeded.");
    }

    #[test]
    fn wire_request_is_a_single_json_line() {
        let req = RenderRequest::new("https://a.test/\nnext");
        let s = serde_json::to_string(&WireRequest {
            id: 1,
            url: &req.url,
            user_agent: &req.user_agent,
            timeout_ms: req.timeout_ms,
        })
        .unwrap();
        assert!(!s.contains('\n'));
        assert!(s.contains("\"timeout_ms\":30000"));
    }

    #[test]
    fn node_path_probe_ignores_empty_segments() {
        assert!(!node_path_has_playwright(""));
        assert!(!node_path_has_playwright(" : :"));
    }

    #[test]
    fn node_path_probe_finds_playwright_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("playwright")).unwrap();
        let np = format!("/nonexistent:{}", dir.path().display());
        assert!(node_path_has_playwright(&np));
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn inherited_node_path_counts_as_resolvable() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("playwright")).unwrap();
        let prev = std::env::var_os("NODE_PATH");
        std::env::remove_var("ANSWERPIPE_NODE_PATH");
        std::env::set_var("NODE_PATH", dir.path());

        assert_eq!(detect_node_path_for_playwright(), None);
        let effective = effective_node_path();
        let ok = playwright_resolvable("/definitely/not/a/node-binary", Duration::from_millis(200)).await;

        match prev {
            Some(v) => std::env::set_var("NODE_PATH", v),
            None => std::env::remove_var("NODE_PATH"),
        }
        assert_eq!(effective.as_deref(), Some(dir.path().to_str().unwrap()));
        assert!(ok);
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn bogus_override_is_not_resolvable_without_node() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("ANSWERPIPE_NODE_PATH", dir.path());
        let ok = playwright_resolvable("/definitely/not/a/node-binary", Duration::from_millis(200)).await;
        std::env::remove_var("ANSWERPIPE_NODE_PATH");
        assert!(!ok);
    }

    #[tokio::test]
    #[allow(clippy::await_holding_lock)]
    async fn launcher_resolves_node_path_once() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let launcher = PlaywrightLauncher::new("node");
        std::env::set_var("ANSWERPIPE_NODE_PATH", "/first");
        let first = launcher.node_path().await;
        std::env::set_var("ANSWERPIPE_NODE_PATH", "/second");
        let again = launcher.clone().node_path().await;
        std::env::remove_var("ANSWERPIPE_NODE_PATH");
        assert_eq!(first.as_deref(), Some("/first"));
        assert_eq!(again.as_deref(), Some("/first"));
    }

    /// Sessions driven by small `sh` scripts that speak the line protocol.
    #[cfg(unix)]
    mod scripted {
        use super::*;

        const HANDSHAKE: &str = r#"echo '{"id":0,"ok":true}'"#;

        fn quick() -> SessionTimeouts {
            SessionTimeouts {
                launch: Duration::from_secs(5),
                render_slack: Duration::from_millis(300),
                close_grace: Duration::from_secs(5),
            }
        }

        async fn start(script: &str, timeouts: SessionTimeouts) -> Result<PlaywrightSession> {
            let mut cmd = tokio::process::Command::new("sh");
            cmd.arg("-c").arg(script);
            let child = spawn_piped(&mut cmd).unwrap();
            PlaywrightSession::attach(child, timeouts).await
        }

        fn pending_len(s: &PlaywrightSession) -> usize {
            s.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
        }

        #[tokio::test]
        async fn handshake_errors_map_to_error_kinds() {
            let r = start(
                r#"echo '{"id":0,"ok":false,"error":{"code":"not_configured","message":"no playwright"}}'"#,
                quick(),
            )
            .await;
            assert!(matches!(r, Err(Error::NotConfigured(m)) if m == "no playwright"));

            let r = start(
                r#"echo '{"id":0,"ok":false,"error":{"code":"launch_failed","message":"chromium crashed"}}'"#,
                quick(),
            )
            .await;
            assert!(matches!(r, Err(Error::Browser(m)) if m == "chromium crashed"));

            let r = start("echo 'Debugger listening'", quick()).await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("invalid launch handshake")));

            let r = start("exit 0", quick()).await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("before launch handshake")));
        }

        #[tokio::test]
        async fn launch_times_out_when_no_handshake_arrives() {
            let t = SessionTimeouts {
                launch: Duration::from_millis(200),
                ..quick()
            };
            let r = start("sleep 5", t).await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("timed out")));
        }

        #[tokio::test]
        async fn replies_are_matched_by_id_not_arrival_order() {
            let script = format!(
                r#"{HANDSHAKE}
reply() {{
  id=$(printf '%s\n' "$1" | sed -n 's/^{{"id":\([0-9]*\),.*/\1/p')
  url=$(printf '%s\n' "$1" | sed -n 's/.*"url":"\([^"]*\)".*/\1/p')
  printf '{{"id":%s,"ok":true,"final_url":"%s","status":200,"html":"<p>%s</p>","elapsed_ms":1}}\n' "$id" "$url" "$url"
}}
read -r first
read -r second
reply "$second"
reply "$first"
cat >/dev/null
"#
            );
            let s = start(&script, quick()).await.unwrap();
            let a = RenderRequest::new("https://a.test/");
            let b = RenderRequest::new("https://b.test/");
            let (ra, rb) = tokio::join!(s.render(&a), s.render(&b));
            let (ra, rb) = (ra.unwrap(), rb.unwrap());

            assert_eq!(ra.html, "<p>https://a.test/</p>");
            assert_eq!(ra.final_url, "https://a.test/");
            assert_eq!(rb.html, "<p>https://b.test/</p>");
            assert_eq!(rb.status, Some(200));
            assert_eq!(pending_len(&s), 0);
            s.close().await.unwrap();
        }

        #[tokio::test]
        async fn failed_and_empty_renders_are_fetch_errors() {
            let script = format!(
                r#"{HANDSHAKE}
read -r line
echo '{{"id":1,"ok":false,"error":{{"code":"fetch_failed","message":"Timeout 30000ms exceeded."}}}}'
read -r line
echo '{{"id":2,"ok":true,"html":"  "}}'
cat >/dev/null
"#
            );
            let s = start(&script, quick()).await.unwrap();
            let r = s.render(&RenderRequest::new("https://slow.test/")).await;
            assert!(matches!(r, Err(Error::Fetch(m)) if m == "Timeout 30000ms exceeded."));
            let r = s.render(&RenderRequest::new("https://blank.test/")).await;
            assert!(matches!(r, Err(Error::Fetch(m)) if m.contains("empty HTML")));
            s.close().await.unwrap();
        }

        #[tokio::test]
        async fn silent_process_hits_hard_timeout_and_forgets_the_render() {
            let s = start(&format!("{HANDSHAKE}\ncat >/dev/null"), quick())
                .await
                .unwrap();
            let mut req = RenderRequest::new("https://hang.test/");
            req.timeout_ms = 50;
            let t0 = std::time::Instant::now();
            let r = s.render(&req).await;
            assert!(matches!(r, Err(Error::Fetch(m)) if m.contains("hard timeout")));
            assert!(t0.elapsed() < Duration::from_secs(3));
            assert_eq!(pending_len(&s), 0);
            s.close().await.unwrap();
        }

        #[tokio::test]
        async fn process_exit_fails_the_inflight_render() {
            let s = start(&format!("{HANDSHAKE}\nread -r line\nexit 0"), quick())
                .await
                .unwrap();
            let r = s.render(&RenderRequest::new("https://a.test/")).await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("exited during render")));
        }

        #[tokio::test]
        async fn render_after_close_is_rejected() {
            let s = start(&format!("{HANDSHAKE}\ncat >/dev/null"), quick())
                .await
                .unwrap();
            s.close().await.unwrap();
            let r = s.render(&RenderRequest::new("https://a.test/")).await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("closed")));
        }

        #[tokio::test]
        async fn close_kills_a_process_that_ignores_eof() {
            let t = SessionTimeouts {
                close_grace: Duration::from_millis(200),
                ..quick()
            };
            let s = start(
                &format!("{HANDSHAKE}\ntrap '' TERM\nwhile :; do sleep 1; done"),
                t,
            )
            .await
            .unwrap();
            let t0 = std::time::Instant::now();
            let r = s.close().await;
            assert!(matches!(r, Err(Error::Browser(m)) if m.contains("killed")));
            assert!(t0.elapsed() < Duration::from_secs(3));
        }
    }
}
