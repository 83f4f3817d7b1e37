use std::sync::OnceLock;

use regex::{Captures, Regex};

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `{{ scope.NAME }}` with an optional `| default("value")`
    RE.get_or_init(|| {
        Regex::new(r#"\{\{\s*([A-Za-z0-9_.]+)\s*(?:\|\s*default\("([^"]*)"\)\s*)?\}\}"#)
            .expect("placeholder pattern is valid")
    })
}

fn resolve(key: &str, fallback: Option<&str>) -> Result<String, String> {
    let Some(var) = key.strip_prefix("env.").filter(|v| !v.is_empty() && !v.contains('.')) else {
        return Err(format!("unsupported placeholder `{key}`: only `env.NAME` is allowed"));
    };

    match (std::env::var(var), fallback) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(fallback)) => Ok(fallback.to_owned()),
        (Err(_), None) => Err(format!("environment variable `{var}` is not set")),
    }
}

/// Substitute `{{ env.NAME }}` placeholders in raw config text
///
/// Lines whose first non-blank character is `#` are left untouched so that
/// commented-out settings never require their variables to exist.
pub fn expand_env(input: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut failure = None;

    for line in input.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            output.push_str(line);
            continue;
        }

        let expanded = placeholder().replace_all(line, |caps: &Captures<'_>| {
            resolve(&caps[1], caps.get(2).map(|m| m.as_str())).unwrap_or_else(|e| {
                failure.get_or_insert(e);
                String::new()
            })
        });
        output.push_str(&expanded);

        if let Some(error) = failure.take() {
            return Err(error);
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_without_placeholders_is_unchanged() {
        let input = "a = 1\nb = \"two\"\n";
        assert_eq!(expand_env(input).unwrap(), input);
    }

    #[test]
    fn expands_set_variable() {
        temp_env::with_var("CONDUIT_TEST_KEY", Some("sk-123"), || {
            let result = expand_env("api_key = \"{{ env.CONDUIT_TEST_KEY }}\"").unwrap();
            assert_eq!(result, "api_key = \"sk-123\"");
        });
    }

    #[test]
    fn expands_several_variables_on_one_line() {
        temp_env::with_vars([("CONDUIT_A", Some("x")), ("CONDUIT_B", Some("y"))], || {
            let result = expand_env("v = \"{{env.CONDUIT_A}}-{{ env.CONDUIT_B }}\"").unwrap();
            assert_eq!(result, "v = \"x-y\"");
        });
    }

    #[test]
    fn missing_variable_fails() {
        temp_env::with_var_unset("CONDUIT_MISSING", || {
            let err = expand_env("k = \"{{ env.CONDUIT_MISSING }}\"").unwrap_err();
            assert!(err.contains("CONDUIT_MISSING"));
        });
    }

    #[test]
    fn default_applies_only_when_unset() {
        temp_env::with_var_unset("CONDUIT_OPT", || {
            let result = expand_env("k = \"{{ env.CONDUIT_OPT | default(\"local\") }}\"").unwrap();
            assert_eq!(result, "k = \"local\"");
        });
        temp_env::with_var("CONDUIT_OPT", Some("remote"), || {
            let result = expand_env("k = \"{{ env.CONDUIT_OPT | default(\"local\") }}\"").unwrap();
            assert_eq!(result, "k = \"remote\"");
        });
    }

    #[test]
    fn empty_default_is_allowed() {
        temp_env::with_var_unset("CONDUIT_OPT", || {
            let result = expand_env("k = \"{{ env.CONDUIT_OPT | default(\"\") }}\"").unwrap();
            assert_eq!(result, "k = \"\"");
        });
    }

    #[test]
    fn other_scopes_are_rejected() {
        let err = expand_env("k = \"{{ vault.KEY }}\"").unwrap_err();
        assert!(err.contains("only `env.NAME`"));
    }

    #[test]
    fn comments_are_not_expanded() {
        temp_env::with_var_unset("CONDUIT_MISSING", || {
            let input = "  # k = \"{{ env.CONDUIT_MISSING }}\"\nok = true\n";
            assert_eq!(expand_env(input).unwrap(), input);
        });
    }
}
