//! Default configuration values

use super::types::Config;

/// Default configuration file name (TOML)
pub const DEFAULT_CONFIG_TOML: &str = "orbiter.toml";

/// Default configuration file name (YAML)
pub const DEFAULT_CONFIG_YAML: &str = "orbiter.yaml";

/// Get list of config file names to search for
pub fn config_file_names() -> Vec<&'static str> {
    vec![
        DEFAULT_CONFIG_TOML,
        DEFAULT_CONFIG_YAML,
        ".orbiter.toml",
        ".orbiter.yaml",
    ]
}

/// Generate default configuration TOML
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default())
        .unwrap_or_else(|_| DEFAULT_CONFIG_TEMPLATE.to_string())
}

/// Default configuration template
pub const DEFAULT_CONFIG_TEMPLATE: &str = r#"# Orbiter Configuration

[target]
device_dir = "/data/local/tmp/orbiter"
ready_dir = "/sdcard"
roots = ["/", "/sdcard", "/data/local/tmp"]
run_command = "dalvikvm {vm_args} -cp {artifact} {action}"

[tasks]
concurrency = 4

[cache]
enabled = true
device = true

[timeouts]
run_secs = 300
boot_secs = 120
file_secs = 30

[profiler]
kind = "disabled"
"#;
