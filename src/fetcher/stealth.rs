//! Launch flags and page scripts for the browser tier.
//!
//! [`stealth_script`] patches one fingerprinting check per block: the webdriver
//! flag, languages/plugins/platform, WebGL vendor and renderer, the
//! `chrome.runtime` object, device pixel ratio, and the notifications
//! permission query.

use scraper::{Html, Selector};

pub const LAUNCH_ARGS: [&str; 5] = [
    "--disable-blink-features=AutomationControlled",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-features=VizDisplayCompositor",
    "--disable-backgrounding-occluded-windows",
];

pub const WEBGL_VENDOR: &str = "Apple Inc.";
pub const WEBGL_RENDERER: &str = "Apple M1";

pub fn stealth_script(locale: &str) -> String {
    let primary_language = locale.split('-').next().unwrap_or("en");
    format!(
        r#"
(() => {{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
  Object.defineProperty(navigator, 'languages', {{ get: () => ['{locale}', '{primary_language}'] }});
  Object.defineProperty(navigator, 'plugins', {{ get: () => [1, 2, 3, 4, 5] }});
  Object.defineProperty(navigator, 'platform', {{ get: () => 'MacIntel' }});

  const patchWebGl = (proto) => {{
    if (!proto) return;
    const getParameter = proto.getParameter;
    proto.getParameter = function (parameter) {{
      if (parameter === 37445) return '{vendor}';
      if (parameter === 37446) return '{renderer}';
      return getParameter.call(this, parameter);
    }};
  }};
  patchWebGl(window.WebGLRenderingContext && WebGLRenderingContext.prototype);
  patchWebGl(window.WebGL2RenderingContext && WebGL2RenderingContext.prototype);

  window.chrome = window.chrome || {{}};
  window.chrome.runtime = window.chrome.runtime || {{}};

  Object.defineProperty(window, 'devicePixelRatio', {{ get: () => 2 }});

  const permissions = window.navigator.permissions;
  if (permissions && permissions.query) {{
    const originalQuery = permissions.query.bind(permissions);
    permissions.query = (parameters) => (
      parameters && parameters.name === 'notifications'
        ? Promise.resolve({{ state: Notification.permission }})
        : originalQuery(parameters)
    );
  }}
}})();
"#,
        locale = locale,
        primary_language = primary_language,
        vendor = WEBGL_VENDOR,
        renderer = WEBGL_RENDERER,
    )
}

/// Script for the in-page authenticated fetch; resolves to the response text.
pub fn in_page_fetch_script(url: &str) -> String {
    // JSON string literal is also a valid JS string literal.
    let url_literal = serde_json::Value::String(url.to_string()).to_string();
    format!(
        r#"(async () => {{
  const r = await fetch({url}, {{ credentials: 'include' }});
  if (!r.ok) throw new Error('Bad status: ' + r.status);
  return await r.text();
}})()"#,
        url = url_literal
    )
}

/// Visible text of a rendered document's `<body>`.
pub fn visible_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let body = Selector::parse("body").ok()?;
    let text: String = document.select(&body).next()?.text().collect();
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
