//! Environment variable interpolation for config files.
//!
//! Lets credentials stay out of the YAML on disk:
//! - `$VAR` or `${VAR}` - substitute the value, error if unset
//! - `${VAR:-default}` - use the default if VAR is unset or empty
//! - `${VAR-default}` - use the default only if VAR is unset
//! - `$$` - literal `$`

use regex::Regex;
use std::env;
use std::sync::LazyLock;

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # literal-dollar escape
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # braced variable name
            (?:
                (:?-)                  # :- or - default marker
                ([^}]*)                # default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # unbraced variable name
        ",
    )
    .expect("Invalid regex pattern")
});

/// Outcome of one interpolation pass.
///
/// Errors are accumulated rather than short-circuited so the operator
/// sees every missing variable at once.
#[derive(Debug)]
pub struct InterpolationResult {
    pub text: String,
    pub errors: Vec<String>,
}

impl InterpolationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Substitute environment variables in the given text.
pub fn interpolate(input: &str) -> InterpolationResult {
    let mut errors = Vec::new();

    let text = VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            substitute(caps, &mut errors)
        })
        .to_string();

    InterpolationResult { text, errors }
}

fn substitute(caps: &regex::Captures, errors: &mut Vec<String>) -> String {
    let matched = caps.get(0).map_or("", |m| m.as_str());
    if matched == "$$" {
        return "$".to_string();
    }

    let name = caps
        .get(1)
        .or_else(|| caps.get(4))
        .map_or("", |m| m.as_str());
    let marker = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) => {
            // A value with line breaks could smuggle extra YAML keys in.
            if value.contains('\n') || value.contains('\r') {
                errors.push(format!(
                    "environment variable '{name}' contains newlines, which is not allowed"
                ));
                return matched.to_string();
            }

            if value.is_empty() && marker == Some(":-") {
                return default.unwrap_or("").to_string();
            }

            value
        }
        Err(_) => match default {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                matched.to_string()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: each test uses variable names unique to it, and the
        // original values are restored before returning
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_basic_substitution() {
        with_env_vars(&[("GRAUPEL_TEST_BASIC", Some("hello"))], || {
            let result = interpolate("value: $GRAUPEL_TEST_BASIC");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: hello");
        });
    }

    #[test]
    fn test_braced_substitution() {
        with_env_vars(&[("GRAUPEL_TEST_BRACED", Some("world"))], || {
            let result = interpolate("value: ${GRAUPEL_TEST_BRACED}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: world");
        });
    }

    #[test]
    fn test_missing_variables_are_all_reported() {
        with_env_vars(
            &[("GRAUPEL_TEST_MISS1", None), ("GRAUPEL_TEST_MISS2", None)],
            || {
                let result = interpolate("a: $GRAUPEL_TEST_MISS1, b: $GRAUPEL_TEST_MISS2");
                assert!(!result.is_ok());
                assert_eq!(result.errors.len(), 2);
                assert!(result.errors[0].contains("GRAUPEL_TEST_MISS1"));
                assert!(result.errors[0].contains("not set"));
            },
        );
    }

    #[test]
    fn test_default_when_unset() {
        with_env_vars(&[("GRAUPEL_TEST_UNSET", None)], || {
            let result = interpolate("value: ${GRAUPEL_TEST_UNSET:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: fallback");
        });
    }

    #[test]
    fn test_colon_default_applies_to_empty_value() {
        with_env_vars(&[("GRAUPEL_TEST_EMPTY", Some(""))], || {
            let result = interpolate("value: ${GRAUPEL_TEST_EMPTY:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: fallback");
        });
    }

    #[test]
    fn test_bare_default_keeps_empty_value() {
        with_env_vars(&[("GRAUPEL_TEST_EMPTY_BARE", Some(""))], || {
            let result = interpolate("value: ${GRAUPEL_TEST_EMPTY_BARE-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: ");
        });
    }

    #[test]
    fn test_set_variable_beats_default() {
        with_env_vars(&[("GRAUPEL_TEST_SET", Some("actual"))], || {
            let result = interpolate("value: ${GRAUPEL_TEST_SET:-fallback}");
            assert!(result.is_ok());
            assert_eq!(result.text, "value: actual");
        });
    }

    #[test]
    fn test_escape_sequence() {
        let result = interpolate("price: $$100");
        assert!(result.is_ok());
        assert_eq!(result.text, "price: $100");
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(&[("GRAUPEL_TEST_INJECT", Some("line1\nline2"))], || {
            let result = interpolate("value: $GRAUPEL_TEST_INJECT");
            assert!(!result.is_ok());
            assert!(result.errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_no_interpolation_needed() {
        let result = interpolate("plain text without variables");
        assert!(result.is_ok());
        assert_eq!(result.text, "plain text without variables");
    }

    #[test]
    fn test_yaml_config_example() {
        with_env_vars(
            &[
                ("GRAUPEL_TEST_WH_HOST", Some("ch.internal")),
                ("GRAUPEL_TEST_WH_PASSWORD", Some("secret")),
                ("GRAUPEL_TEST_WH_DB", None),
            ],
            || {
                let yaml = r#"
backend: warehouse
warehouse:
  host: ${GRAUPEL_TEST_WH_HOST}
  user: ingest
  password: ${GRAUPEL_TEST_WH_PASSWORD}
  database: ${GRAUPEL_TEST_WH_DB:-wearables}
"#;
                let result = interpolate(yaml);
                assert!(result.is_ok());
                assert!(result.text.contains("host: ch.internal"));
                assert!(result.text.contains("password: secret"));
                assert!(result.text.contains("database: wearables"));
            },
        );
    }
}
