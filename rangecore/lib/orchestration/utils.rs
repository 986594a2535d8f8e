//! Resource naming and script rendering helpers.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Matches `{server.net}` address tokens in init scripts.
static SCRIPT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_-]+\.[A-Za-z0-9_-]+)\}").expect("script token regex is valid")
});

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Builds the namespaced display name of a cloud resource:
/// `<group>.<prefix>.<scene>.<entity>`.
///
/// The fixed group prefix makes orphaned resources identifiable by external
/// sweeps.
pub fn resource_name(group: &str, prefix: &str, scene: &str, entity: &str) -> String {
    format!("{group}.{prefix}.{scene}.{entity}")
}

/// Renders an init script, replacing `{server.net}` tokens with the
/// referenced server's assigned IP on that network. Unknown tokens are left
/// untouched.
pub fn render_script(template: &str, addresses: &HashMap<String, String>) -> String {
    SCRIPT_TOKEN
        .replace_all(template, |captures: &regex::Captures<'_>| {
            let token = &captures[1];
            match addresses.get(token) {
                Some(ip) => ip.clone(),
                None => captures[0].to_string(),
            }
        })
        .into_owned()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_name_is_fully_namespaced() {
        assert_eq!(
            resource_name("rangecore", "scene", "demo", "net1"),
            "rangecore.scene.demo.net1"
        );
    }

    #[test]
    fn test_render_script_substitutes_known_tokens() {
        let mut addresses = HashMap::new();
        addresses.insert("srv1.net1".to_string(), "192.168.10.5".to_string());
        addresses.insert("srv2.net1".to_string(), "192.168.10.6".to_string());

        let rendered = render_script(
            "ping -c1 {srv1.net1} && curl http://{srv2.net1}:8080",
            &addresses,
        );

        assert_eq!(
            rendered,
            "ping -c1 192.168.10.5 && curl http://192.168.10.6:8080"
        );
    }

    #[test]
    fn test_render_script_leaves_unknown_tokens() {
        let rendered = render_script("echo {nobody.net9}", &HashMap::new());
        assert_eq!(rendered, "echo {nobody.net9}");
    }
}
