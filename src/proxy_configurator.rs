//! Wires a [`ConfigurationFile`] into an [`InterceptionProxy`]: builds the
//! page-injection preamble and forwards the rewrite toggle and active fix set.

use crate::config::ConfigurationFile;
use crate::config_eval::build_injection_preamble;
use crate::driver::{InterceptionProxy, ProxyError};

/// Install `config` on `proxy`.
///
/// `active_fixes` is the leak-id prefix currently being evaluated (empty
/// during a plain find-leaks pass). `rewrite_js` controls whether JS bodies
/// matching `config.rewrite` get rewritten at all; when false the preamble is
/// still injected so the page can read `window.BLeakConfig`, but no fix is
/// applied. `disable_all_rewrites` is the independent kill-switch fix
/// evaluation uses for its base case — when true, injection still occurs but
/// `rewrite_js`/`active_fixes` are ignored for instrumentation purposes.
pub async fn configure_proxy(
    proxy: &dyn InterceptionProxy,
    config: &ConfigurationFile,
    config_source: &str,
    active_fixes: &[u32],
    rewrite_js: bool,
    disable_all_rewrites: bool,
) -> Result<(), ProxyError> {
    let default_json = serde_json::to_string(&ConfigurationFile::default())
        .expect("ConfigurationFile::default always serializes");
    let preamble = build_injection_preamble(&default_json, config_source);

    proxy
        .configure(
            rewrite_js,
            active_fixes,
            &preamble,
            disable_all_rewrites,
            config.rewrite.clone(),
        )
        .await
}
