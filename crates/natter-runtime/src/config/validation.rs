//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{BotConfig, FlowsConfig, LogOutput, LoggingConfig, NatterConfig, PoolConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &NatterConfig) -> ConfigResult<()> {
    validate_bot_config(&config.bot)?;
    validate_pool_config("workers", &config.workers)?;
    validate_flows_config(&config.flows)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

fn validate_bot_config(bot: &BotConfig) -> ConfigResult<()> {
    if bot.prefix.trim().is_empty() {
        return Err(ConfigError::missing_field("bot.prefix"));
    }

    if let Some(blank) = bot.alt_prefixes.iter().position(|p| p.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "bot.alt_prefixes[{blank}] is blank"
        )));
    }

    if let Some(blank) = bot.admins.iter().position(|a| a.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "bot.admins[{blank}] is blank"
        )));
    }

    if let Some(blank) = bot.chatroom_presence.iter().position(|r| r.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "bot.chatroom_presence[{blank}] is blank"
        )));
    }

    Ok(())
}

fn validate_pool_config(section: &str, pool: &PoolConfig) -> ConfigResult<()> {
    check_pool(section, pool.size, pool.backlog)
}

fn validate_flows_config(flows: &FlowsConfig) -> ConfigResult<()> {
    check_pool("flows", flows.size, flows.backlog)?;

    if flows.max_auto_advances == 0 {
        return Err(ConfigError::validation(
            "flows.max_auto_advances must be greater than 0",
        ));
    }

    if flows.session_timeout_secs == Some(0) {
        return Err(ConfigError::validation(
            "flows.session_timeout_secs must be greater than 0 when set",
        ));
    }

    Ok(())
}

fn check_pool(section: &str, size: usize, backlog: usize) -> ConfigResult<()> {
    if size == 0 {
        return Err(ConfigError::validation(format!(
            "{section}.size must be greater than 0"
        )));
    }
    if backlog == 0 {
        return Err(ConfigError::validation(format!(
            "{section}.backlog must be greater than 0"
        )));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if logging.filters.keys().any(|module| module.trim().is_empty()) {
        return Err(ConfigError::validation(
            "logging.filters contains an empty module name",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&NatterConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let mut config = NatterConfig::default();
        config.bot.prefix = "  ".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { ref field } if field == "bot.prefix"));
    }

    #[test]
    fn test_validate_blank_admin() {
        let mut config = NatterConfig::default();
        config.bot.admins = vec!["alice".to_string(), String::new()];
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("bot.admins[1]"));
    }

    #[test]
    fn test_validate_zero_pool_sizes() {
        let mut config = NatterConfig::default();
        config.workers.size = 0;
        assert!(validate_config(&config).unwrap_err().to_string().contains("workers.size"));

        let mut config = NatterConfig::default();
        config.flows.backlog = 0;
        assert!(validate_config(&config).unwrap_err().to_string().contains("flows.backlog"));
    }

    #[test]
    fn test_validate_auto_advance_cap() {
        let mut config = NatterConfig::default();
        config.flows.max_auto_advances = 0;
        assert!(
            validate_config(&config)
                .unwrap_err()
                .to_string()
                .contains("max_auto_advances")
        );
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = NatterConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("natter.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
