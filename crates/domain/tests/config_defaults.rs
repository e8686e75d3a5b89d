use sa_domain::config::Config;

#[test]
fn default_config_has_no_providers_and_no_mcp_servers() {
    let config = Config::default();
    assert!(config.llm.providers.is_empty());
    assert!(config.mcp.servers.is_empty());
}

#[test]
fn default_reasoning_thresholds_match_the_documented_defaults() {
    let config = Config::default();
    assert_eq!(config.reasoning.max_iterations, 3);
    assert_eq!(config.reasoning.min_quality_direct, 0.60);
    assert_eq!(config.reasoning.min_quality_light, 0.65);
    assert_eq!(config.reasoning.min_quality_deep, 0.60);
    assert_eq!(config.reasoning.min_confidence, 0.60);
    assert!(config.reasoning.force_strategy.is_none());
}

#[test]
fn default_conversation_caching_is_enabled_with_unbounded_history() {
    let config = Config::default();
    assert!(config.conversation.enable_caching);
    assert!(config.conversation.max_history_messages.is_none());
}

#[test]
fn default_summarization_guard_ratio_is_one_point_five() {
    let config = Config::default();
    assert_eq!(config.summarization.min_messages_for_summary, 6);
    assert_eq!(config.summarization.reconcat_guard_ratio, 1.5);
}

#[test]
fn explicit_provider_parses_from_toml() {
    let toml_str = r#"
[[llm.providers]]
id = "openai"
kind = "openai_compat"
base_url = "https://api.openai.com/v1"

[llm.providers.auth]
mode = "api_key"
env = "OPENAI_API_KEY"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.llm.providers.len(), 1);
    assert_eq!(config.llm.providers[0].id, "openai");
    assert!(config.validate().is_empty());
}

#[test]
fn explicit_mcp_server_parses_from_toml() {
    let toml_str = r#"
[[mcp.servers]]
id = "filesystem"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem"]
transport = "stdio"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.mcp.servers.len(), 1);
    assert_eq!(config.mcp.servers[0].id, "filesystem");
}

#[test]
fn forced_strategy_overrides_the_analyzer_recommendation() {
    let toml_str = r#"
[reasoning]
force_strategy = "deep_reasoning"
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(
        config.reasoning.force_strategy,
        Some(sa_domain::config::Strategy::DeepReasoning)
    );
}
