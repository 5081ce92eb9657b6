use crate::config::types::{Config, CrawlerConfig, DomainScope, OutputConfig, UserAgentConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates a crawl session configuration
///
/// This runs again when a session is started, so sessions built in code
/// are held to the same rules as ones loaded from a file.
pub fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    let base = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if base.scheme() != "http" && base.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' must use http or https",
            config.base_url
        )));
    }

    if base.host_str().is_none() {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url '{}' has no host",
            config.base_url
        )));
    }

    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.worker_count < 1 || config.worker_count > 100 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 100, got {}",
            config.worker_count
        )));
    }

    if config.delay_min_ms > config.delay_max_ms {
        return Err(ConfigError::Validation(format!(
            "delay_min_ms ({}) must not exceed delay_max_ms ({})",
            config.delay_min_ms, config.delay_max_ms
        )));
    }

    if config.request_timeout_ms < 1 {
        return Err(ConfigError::Validation(
            "request_timeout_ms must be >= 1".to_string(),
        ));
    }

    if config.result_buffer < 1 {
        return Err(ConfigError::Validation(
            "result_buffer must be >= 1".to_string(),
        ));
    }

    if config.domain_scope == DomainScope::Allowlist {
        if config.allowlist.is_empty() {
            return Err(ConfigError::Validation(
                "allowlist scope requires at least one domain pattern".to_string(),
            ));
        }
        for pattern in &config.allowlist {
            validate_domain_pattern(pattern)?;
        }
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.summary_path.is_empty() {
        return Err(ConfigError::Validation(
            "summary_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn crawler_config() -> CrawlerConfig {
        CrawlerConfig::new("https://example.com/", 2, 10)
    }

    #[test]
    fn test_validate_domain_pattern() {
        assert!(validate_domain_pattern("example.com").is_ok());
        assert!(validate_domain_pattern("*.example.com").is_ok());
        assert!(validate_domain_pattern("localhost").is_ok());

        assert!(validate_domain_pattern("").is_err());
        assert!(validate_domain_pattern("*.").is_err());
        assert!(validate_domain_pattern(".example.com").is_err());
        assert!(validate_domain_pattern("example.com.").is_err());
        assert!(validate_domain_pattern("exa mple.com").is_err());
    }

    #[test]
    fn test_default_crawler_config_is_valid() {
        assert!(validate_crawler_config(&crawler_config()).is_ok());
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let mut config = crawler_config();
        config.base_url = "ftp://example.com/".to_string();
        assert!(matches!(
            validate_crawler_config(&config),
            Err(ConfigError::InvalidUrl(_))
        ));

        config.base_url = "not a url".to_string();
        assert!(matches!(
            validate_crawler_config(&config),
            Err(ConfigError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_rejects_bad_bounds() {
        let mut config = crawler_config();
        config.max_pages = 0;
        assert!(validate_crawler_config(&config).is_err());

        let mut config = crawler_config();
        config.worker_count = 101;
        assert!(validate_crawler_config(&config).is_err());

        let mut config = crawler_config();
        config.delay_min_ms = 500;
        config.delay_max_ms = 100;
        assert!(validate_crawler_config(&config).is_err());

        let mut config = crawler_config();
        config.request_timeout_ms = 0;
        assert!(validate_crawler_config(&config).is_err());
    }

    #[test]
    fn test_allowlist_scope_requires_patterns() {
        let mut config = crawler_config();
        config.domain_scope = DomainScope::Allowlist;
        assert!(validate_crawler_config(&config).is_err());

        config.allowlist = vec!["*.example.com".to_string()];
        assert!(validate_crawler_config(&config).is_ok());

        config.allowlist = vec!["bad..pattern".to_string()];
        assert!(matches!(
            validate_crawler_config(&config),
            Err(ConfigError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_zero_delay_allowed() {
        let mut config = crawler_config();
        config.delay_min_ms = 0;
        config.delay_max_ms = 0;
        assert!(validate_crawler_config(&config).is_ok());
    }
}
