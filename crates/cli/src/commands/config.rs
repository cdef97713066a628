use frontdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let mut lines =
        vec!["effective config (source precedence: override > env > file > default):".to_string()];

    lines.push(render_line("database.url", &config.database.url));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
    ));
    lines.push(render_line("database.timeout_secs", &config.database.timeout_secs.to_string()));

    let api_key = config
        .llm
        .api_key
        .as_ref()
        .map(|key| redact_token(key.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    lines.push(render_line("llm.api_key", &api_key));
    lines.push(render_line("llm.model", &config.llm.model));
    lines.push(render_line("llm.max_tokens", &config.llm.max_tokens.to_string()));
    lines.push(render_line("llm.timeout_secs", &config.llm.timeout_secs.to_string()));
    lines.push(render_line("llm.max_retries", &config.llm.max_retries.to_string()));

    lines.push(render_line("twilio.account_sid", &config.twilio.account_sid));
    lines.push(render_line(
        "twilio.auth_token",
        &redact_token(config.twilio.auth_token.expose_secret()),
    ));
    lines.push(render_line("twilio.from_number", &config.twilio.from_number));

    lines.push(render_line(
        "google.client_id",
        config.google.client_id.as_deref().unwrap_or("<unset>"),
    ));
    lines.push(render_line(
        "google.client_secret",
        &config
            .google
            .client_secret
            .as_ref()
            .map(|secret| redact_token(secret.expose_secret()))
            .unwrap_or_else(|| "<unset>".to_string()),
    ));
    lines.push(render_line(
        "google.refresh_token",
        &config
            .google
            .refresh_token
            .as_ref()
            .map(|secret| redact_token(secret.expose_secret()))
            .unwrap_or_else(|| "<unset>".to_string()),
    ));
    lines.push(render_line("google.calendar_id", &config.google.calendar_id));
    lines.push(render_line(
        "google.calendar_booking",
        if config.google.is_configured() { "enabled" } else { "disabled" },
    ));

    lines.push(render_line("practice.name", &config.practice.name));
    lines.push(render_line("practice.time_zone", &config.practice.time_zone));

    lines.push(render_line("server.bind_address", &config.server.bind_address));
    lines.push(render_line("server.port", &config.server.port.to_string()));
    lines.push(render_line(
        "server.session_idle_timeout_secs",
        &config.server.session_idle_timeout_secs.to_string(),
    ));

    lines.push(render_line("logging.level", &config.logging.level));
    lines.push(render_line("logging.format", &format!("{:?}", config.logging.format)));

    lines.join("\n")
}

fn render_line(key: &str, value: &str) -> String {
    format!("  {key} = {value}")
}

fn redact_token(token: &str) -> String {
    if token.is_empty() {
        return "<unset>".to_string();
    }
    let visible: String = token.chars().take(4).collect();
    format!("{visible}***")
}
