//! Daemon configuration
//!
//! A TOML file with `[server]`, `[bridge]` and optional `[agent]` sections and
//! inline `[[routes]]` entries. Route entries keep the JSON route shape, so they
//! are carried as untyped values until validated as a whole list.

use std::path::{Path, PathBuf};

use anyhow::Context;
use http2bus_api::BridgeOptions;
use http2bus_core::schema::parse_routes;
use http2bus_core::Route;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub bridge: BridgeConfig,
    pub agent: Option<AgentSection>,
    pub routes: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body in bytes
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            body_limit: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub default_wait_for_responses_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_wait_for_responses_ms: 3000,
        }
    }
}

/// Routes this process announces for gateways mounting it as a provider
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    pub name: String,
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default)]
    pub routes_file: Option<PathBuf>,
}

fn default_ttl() -> u64 {
    3_600_000
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

impl AgentSection {
    /// Routes to announce, empty without a routes file
    pub fn routes(&self) -> anyhow::Result<Vec<Route>> {
        match &self.routes_file {
            Some(path) => Ok(parse_routes(&Value::Array(load_route_file(path)?))?),
            None => Ok(Vec::new()),
        }
    }
}

impl GatewayConfig {
    /// Read a TOML config; relative paths inside resolve against its directory
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: GatewayConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        if let (Some(agent), Some(dir)) = (config.agent.as_mut(), path.parent()) {
            if let Some(file) = agent.routes_file.as_mut() {
                if file.is_relative() {
                    *file = dir.join(&*file);
                }
            }
        }
        Ok(config)
    }

    pub fn bridge_options(&self) -> BridgeOptions {
        BridgeOptions {
            default_wait_for_responses_ms: self.bridge.default_wait_for_responses_ms,
            body_limit: self.server.body_limit,
        }
    }

    /// Inline routes followed by the routes of each file, validated as one list
    pub fn resolve_routes(&self, route_files: &[PathBuf]) -> anyhow::Result<Vec<Route>> {
        let mut entries = self.routes.clone();
        for path in route_files {
            entries.extend(load_route_file(path)?);
        }
        Ok(parse_routes(&Value::Array(entries))?)
    }
}

/// Read a JSON or YAML file holding a route list
pub fn load_route_file(path: &Path) -> anyhow::Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read routes {}", path.display()))?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let value: Value = match ext {
        "yaml" | "yml" => serde_yaml::from_str(&content)?,
        "json" => serde_json::from_str(&content)?,
        other => anyhow::bail!("Unsupported routes file extension {:?}: {}", other, path.display()),
    };

    match value {
        Value::Array(entries) => Ok(entries),
        _ => anyhow::bail!("Routes file {} must contain a list", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.bridge_options(), BridgeOptions::default());
        assert!(config.agent.is_none());
        assert!(config.resolve_routes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_load_full_config() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "announce.json",
            r#"[{ "bus": { "namespace": "me:items" }, "http": { "path": "/items" } }]"#,
        );
        let path = write(
            dir.path(),
            "http2busd.toml",
            r#"
[server]
port = 9000
body_limit = 2048

[bridge]
default_wait_for_responses_ms = 500

[agent]
name = "me"
routes_file = "announce.json"

[[routes]]
bus = { namespace = "example:hello", waitForResponses = 2 }
http = { path = "/hello", methods = ["get", "post"] }
"#,
        );

        let config = GatewayConfig::load(&path).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.bridge_options().body_limit, 2048);
        assert_eq!(config.bridge_options().default_wait_for_responses_ms, 500);

        let agent = config.agent.as_ref().unwrap();
        assert_eq!(agent.ttl, 3_600_000);
        assert_eq!(agent.routes().unwrap().len(), 1);

        let routes = config.resolve_routes(&[]).unwrap();
        match &routes[0] {
            Route::Bus(route) => {
                assert_eq!(route.bus.namespace, "example:hello");
                assert_eq!(route.wait_for_responses(), 2);
            }
            Route::Provider(_) => panic!("expected bus route"),
        }
    }

    #[test]
    fn test_route_files_append_after_inline_routes() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = write(
            dir.path(),
            "extra.yaml",
            "- provider:\n    name: nested\n  http:\n    basePath: /nested\n",
        );
        let config: GatewayConfig = toml::from_str(
            r#"
[[routes]]
bus = { namespace = "a:b" }
http = { path = "/a" }
"#,
        )
        .unwrap();

        let routes = config.resolve_routes(&[yaml]).unwrap();
        assert_eq!(routes.len(), 2);
        assert!(matches!(routes[0], Route::Bus(_)));
        assert!(matches!(routes[1], Route::Provider(_)));
    }

    #[test]
    fn test_invalid_route_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_list = write(dir.path(), "bad.json", r#"{ "bus": {} }"#);
        let bad_namespace = write(
            dir.path(),
            "ns.json",
            r#"[{ "bus": { "namespace": "Nope" }, "http": {} }]"#,
        );
        let unknown = write(dir.path(), "routes.txt", "[]");

        let config = GatewayConfig::default();
        assert!(config.resolve_routes(&[not_a_list]).is_err());
        assert!(config.resolve_routes(&[bad_namespace]).is_err());
        assert!(config.resolve_routes(&[unknown]).is_err());
    }
}
