//! Evaluates the untrusted JS configuration source under a CommonJS-style
//! `module`/`exports` shim, both locally (to materialize a
//! [`ConfigurationFile`]) and as page-injection text (to publish
//! `window.BLeakConfig`).
//!
//! The two uses render the *same* wrapper shape from [`render_shim`] so the
//! controller's view of the config and the page's view can never diverge.

use boa_engine::{Context, Source};

use crate::config::{ConfigError, ConfigurationFile};

/// Wrap `source` in a `module`/`exports` shim seeded with `default_json`.
///
/// `publish_expr`, if given, is an assignment target (e.g. `"window.BLeakConfig"`)
/// that the wrapper assigns `module.exports` to as its last statement, in
/// addition to leaving `module.exports` as the IIFE's own return value.
fn render_shim(default_json: &str, source: &str, publish_expr: Option<&str>) -> String {
    let publish = match publish_expr {
        Some(target) => format!("{target} = module.exports;\n"),
        None => String::new(),
    };
    format!(
        "(function() {{\n\
         var module = {{ exports: {default_json} }};\n\
         var exports = module.exports;\n\
         (function(module, exports) {{\n\
         {source}\n\
         }})(module, exports);\n\
         {publish}\
         return module.exports;\n\
         }})()"
    )
}

/// Evaluate `source` locally against the default configuration, returning the
/// materialized [`ConfigurationFile`].
///
/// Runs inside a fresh embedded ECMAScript realm — not `eval` against the
/// host process — with no ambient Rust globals exposed. One realm per call;
/// nothing about the evaluation is retained afterwards.
pub fn evaluate_config(source: &str) -> Result<ConfigurationFile, ConfigError> {
    let default_json =
        serde_json::to_string(&ConfigurationFile::default()).map_err(ConfigError::Deserialize)?;
    let wrapped = render_shim(&default_json, source, None);

    let mut context = Context::default();
    let result = context
        .eval(Source::from_bytes(&wrapped))
        .map_err(|e| ConfigError::EvalFailed(e.to_string()))?;

    let json_text = result
        .to_json(&mut context)
        .map_err(|e| ConfigError::EvalFailed(e.to_string()))?
        .ok_or_else(|| ConfigError::EvalFailed("module.exports was undefined".to_string()))?
        .to_string();

    serde_json::from_str(&json_text).map_err(ConfigError::Deserialize)
}

/// Render the self-contained `<script>` body the proxy injects into every
/// HTML response, before the first `<script>` tag.
///
/// Evaluating it installs `window.BLeakConfig` by running the exact same
/// module-emulation shim used in [`evaluate_config`], this time inside the
/// page rather than the controller.
pub fn build_injection_preamble(default_json: &str, source: &str) -> String {
    render_shim(default_json, source, Some("window.BLeakConfig"))
}
