pub mod schema;

pub use schema::{
    resolve_config_dir, Config, DaemonConfig, EngineConfig, MqttConfig, TopicsConfig,
};

/// JSON schema for `config.toml`, as printed by `robot-taskd config schema`.
pub fn json_schema() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(Config)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert_eq!(config.mqtt.qos, 1);
        assert_eq!(config.engine.frame_id, "map");
        assert!(config.daemon.state_flush_secs > 0);
    }

    #[test]
    fn schema_lists_top_level_sections() {
        let schema = json_schema();
        let properties = schema["properties"].as_object().unwrap();
        for section in ["mqtt", "topics", "engine", "daemon"] {
            assert!(properties.contains_key(section), "missing {section}");
        }
        assert!(!properties.contains_key("config_path"));
    }
}
