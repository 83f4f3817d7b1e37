use std::path::Path;

use crate::{Config, RoutingStrategy};

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, expansion or parsing
    /// fails, or the configuration is inconsistent
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let config = Self::parse(&raw)?;
        tracing::debug!(path = %path.display(), backends = config.backends.len(), "configuration loaded");

        Ok(config)
    }

    /// Parse and validate configuration text
    ///
    /// # Errors
    ///
    /// Returns an error if expansion, parsing or validation fails
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;
        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error describing the first inconsistency found
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backends.is_empty() {
            anyhow::bail!("at least one backend must be configured");
        }

        self.validate_backends()?;
        self.validate_router()?;

        Ok(())
    }

    /// Backend names the router dispatches to, in candidate order
    pub fn router_backends(&self) -> Vec<&str> {
        match &self.router {
            Some(router) if !router.backends.is_empty() => router.backends.iter().map(String::as_str).collect(),
            _ => self.backends.keys().map(String::as_str).collect(),
        }
    }

    fn validate_backends(&self) -> anyhow::Result<()> {
        for (name, backend) in &self.backends {
            for header in backend.headers.keys() {
                if header.is_empty() || header.bytes().any(|b| b.is_ascii_whitespace() || b == b':') {
                    anyhow::bail!("backend '{name}' has an invalid header name '{header}'");
                }
            }

            if backend.timeout.is_some_and(|t| t.is_zero()) {
                anyhow::bail!("backend '{name}' timeout must be greater than zero");
            }
        }

        Ok(())
    }

    fn validate_router(&self) -> anyhow::Result<()> {
        let Some(router) = &self.router else {
            return Ok(());
        };

        for name in &router.backends {
            if !self.backends.contains_key(name) {
                anyhow::bail!("router references unknown backend '{name}'");
            }
        }

        for (name, weight) in &router.weights {
            if !self.backends.contains_key(name) {
                anyhow::bail!("router weight references unknown backend '{name}'");
            }
            if !weight.is_finite() || *weight <= 0.0 {
                anyhow::bail!("router weight for '{name}' must be a positive number");
            }
        }
        if !router.weights.values().sum::<f64>().is_finite() {
            anyhow::bail!("router weights must sum to a finite number");
        }

        if router.strategy == RoutingStrategy::Weighted {
            for name in self.router_backends() {
                if !router.weights.contains_key(name) {
                    anyhow::bail!("weighted routing requires a weight for backend '{name}'");
                }
            }
        }

        if router.max_attempts == Some(0) {
            anyhow::bail!("router.max_attempts must be at least 1");
        }

        if let Some(parallel) = router.parallel
            && parallel < 2
        {
            anyhow::bail!("router.parallel must be at least 2");
        }

        if let Some(breaker) = &router.circuit_breaker
            && breaker.error_threshold == 0
        {
            anyhow::bail!("router.circuit_breaker.error_threshold must be at least 1");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use crate::{BackendType, Config, LogFormat, RoutingStrategy};

    const FULL: &str = r#"
        [telemetry]
        log_filter = "debug"
        format = "json"

        [backends.openai]
        type = "openai"
        api_key = "{{ env.CONDUIT_TEST_OPENAI_KEY }}"
        timeout = "45s"

        [backends.claude]
        type = "anthropic"
        api_key = "{{ env.CONDUIT_TEST_ANTHROPIC_KEY | default("sk-default") }}"

        [router]
        backends = ["claude", "openai"]
        strategy = "priority"

        [middleware.retry]
        max_retries = 2
    "#;

    #[test]
    fn parse_full_config() {
        temp_env::with_vars(
            [
                ("CONDUIT_TEST_OPENAI_KEY", Some("sk-openai")),
                ("CONDUIT_TEST_ANTHROPIC_KEY", None),
            ],
            || {
                let config = Config::parse(FULL).unwrap();

                assert_eq!(config.telemetry.format, LogFormat::Json);
                assert_eq!(config.backends.len(), 2);
                assert_eq!(config.backends["openai"].backend_type, BackendType::Openai);
                assert_eq!(
                    config.backends["openai"].api_key.as_ref().unwrap().expose_secret(),
                    "sk-openai"
                );
                assert_eq!(
                    config.backends["claude"].api_key.as_ref().unwrap().expose_secret(),
                    "sk-default"
                );
                assert_eq!(config.router.as_ref().unwrap().strategy, RoutingStrategy::Priority);
                assert_eq!(config.router_backends(), vec!["claude", "openai"]);
                assert_eq!(config.middleware.retry.as_ref().unwrap().max_retries, 2);
            },
        );
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[backends.local]\ntype = \"ollama\"").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.router_backends(), vec!["local"]);
        assert!(config.router.is_none());
    }

    #[test]
    fn missing_file_is_reported() {
        let err = Config::load(std::path::Path::new("/nonexistent/conduit.toml")).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn requires_a_backend() {
        let err = Config::parse("").unwrap_err();
        assert!(err.to_string().contains("at least one backend"));
    }

    #[test]
    fn rejects_unknown_router_backend() {
        let raw = "[backends.a]\ntype = \"ollama\"\n[router]\nbackends = [\"b\"]";
        let err = Config::parse(raw).unwrap_err();
        assert!(err.to_string().contains("unknown backend 'b'"));
    }

    #[test]
    fn weighted_routing_needs_positive_weights() {
        let raw = "[backends.a]\ntype = \"ollama\"\n[router]\nstrategy = \"weighted\"\nweights = { a = 0.0 }";
        let err = Config::parse(raw).unwrap_err();
        assert!(err.to_string().contains("positive"));

        let raw = "[backends.a]\ntype = \"ollama\"\n[backends.b]\ntype = \"ollama\"\n[router]\nstrategy = \"weighted\"\nweights = { a = 1.0 }";
        let err = Config::parse(raw).unwrap_err();
        assert!(err.to_string().contains("weight for backend 'b'"));
    }

    #[test]
    fn weighted_routing_rejects_overflowing_weights() {
        let raw = "[backends.a]\ntype = \"ollama\"\n[backends.b]\ntype = \"ollama\"\n[router]\nstrategy = \"weighted\"\nweights = { a = 1e308, b = 1e308 }";
        let err = Config::parse(raw).unwrap_err();
        assert!(err.to_string().contains("finite"));
    }

    #[test]
    fn parallel_must_fan_out() {
        let raw = "[backends.a]\ntype = \"ollama\"\n[router]\nparallel = 1";
        let err = Config::parse(raw).unwrap_err();
        assert!(err.to_string().contains("parallel"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = "[backends.a]\ntype = \"ollama\"\nmodel_map = {}";
        assert!(Config::parse(raw).is_err());
    }
}
