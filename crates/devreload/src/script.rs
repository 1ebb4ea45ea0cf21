//! Browser-side snippet that listens on the watch endpoint.

/// Script that enables auto-reloading in the browser.
///
/// Embed it in the served HTML page (see [`inject_script`]). The page opens a
/// WebSocket to `/watch` and reloads when it receives `reload`. After the
/// connection drops it retries every second, and reloads as soon as a retry
/// succeeds, which covers a restarted server.
pub const CLIENT_SCRIPT: &str = r#"
<script>
  function retry() {
    setTimeout(() => listen(true), 1000)
  }
  function listen(isRetry) {
    let protocol = location.protocol === "https:" ? "wss://" : "ws://"
    let ws = new WebSocket(protocol + location.host + "/watch")
    if (isRetry) {
      ws.onopen = () => window.location.reload()
    }
    ws.onmessage = function(msg) {
      if (msg.data === "reload") {
        window.location.reload()
      }
    }
    ws.onclose = retry
  }
  listen(false)
</script>
"#;

/// Insert [`CLIENT_SCRIPT`] into an HTML document.
///
/// The script goes right before the last `</body>` tag (matched
/// case-insensitively). Documents without one get it appended.
#[must_use]
pub fn inject_script(html: &str) -> String {
    let mut out = String::with_capacity(html.len() + CLIENT_SCRIPT.len());

    match html.to_ascii_lowercase().rfind("</body>") {
        Some(pos) => {
            out.push_str(&html[..pos]);
            out.push_str(CLIENT_SCRIPT);
            out.push_str(&html[pos..]);
        }
        None => {
            out.push_str(html);
            out.push_str(CLIENT_SCRIPT);
        }
    }

    out
}
