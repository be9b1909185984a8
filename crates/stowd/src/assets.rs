//! Static browser UI
//!
//! A configured directory is served as-is; without one, a minimal built-in
//! page covers upload and share-code resolution so the gateway is usable
//! from a browser out of the box.

use std::path::{Component, Path, PathBuf};

pub const INDEX_HTML: &str = r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>stow</title>
<style>
  body { font-family: system-ui, sans-serif; max-width: 42rem; margin: 3rem auto; padding: 0 1rem; }
  h1 { font-size: 1.4rem; }
  section { margin: 1.5rem 0; }
  input, textarea, button { font: inherit; width: 100%; box-sizing: border-box; margin: .25rem 0; }
  textarea { min-height: 5rem; }
  pre { background: #f4f4f4; padding: .5rem; overflow-x: auto; white-space: pre-wrap; word-break: break-all; }
</style>
</head>
<body>
<h1>stow gateway</h1>
<section>
  <h2>Upload</h2>
  <input type="file" id="file">
  <button onclick="upload()">Upload</button>
  <pre id="result"></pre>
</section>
<section>
  <h2>Open a share code</h2>
  <textarea id="code" placeholder="paste a share code"></textarea>
  <button onclick="openCode()">Download</button>
</section>
<script>
async function upload() {
  const input = document.getElementById('file');
  if (!input.files.length) return;
  const file = input.files[0];
  const resp = await fetch('/api/upload?name=' + encodeURIComponent(file.name), {
    method: 'PUT',
    body: file,
  });
  document.getElementById('result').textContent = await resp.text();
}
function openCode() {
  const code = document.getElementById('code').value;
  window.location = '/api/download?s=' + encodeURIComponent(code);
}
</script>
</body>
</html>
"#;

/// Resolve a request path inside the static directory, refusing traversal.
pub fn resolve_static(static_dir: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let relative = if relative.is_empty() {
        "index.html"
    } else {
        relative
    };

    let candidate = Path::new(relative);
    if candidate
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }

    let full = static_dir.join(candidate);
    full.is_file().then_some(full)
}
