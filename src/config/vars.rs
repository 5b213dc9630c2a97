//! Environment variable interpolation for config files.
//!
//! Supported syntax:
//! - `$VAR` or `${VAR}`: the variable's value, error if unset
//! - `${VAR:-default}`: default if VAR is unset or empty
//! - `${VAR-default}`: default only if VAR is unset
//! - `$$`: a literal `$`

use regex::{Captures, Regex};
use std::env;
use std::sync::LazyLock;

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # 1: braced name
            (?:
                (:?-)                  # 2: default operator
                ([^}]*)                # 3: default value
            )?
        \}
        |
        \$([A-Za-z_][A-Za-z0-9_]*)     # 4: bare name
        ",
    )
    .expect("valid regex")
});

fn substitute(caps: &Captures<'_>, errors: &mut Vec<String>) -> String {
    let whole = &caps[0];
    if whole == "$$" {
        return "$".to_string();
    }

    let Some(name) = caps.get(1).or_else(|| caps.get(4)).map(|m| m.as_str()) else {
        return whole.to_string();
    };
    let operator = caps.get(2).map(|m| m.as_str());
    let default = caps.get(3).map(|m| m.as_str());

    match env::var(name) {
        Ok(value) if value.contains(['\n', '\r']) => {
            errors.push(format!(
                "environment variable '{name}' contains newlines, which is not allowed"
            ));
            whole.to_string()
        }
        Ok(value) if value.is_empty() && operator == Some(":-") => {
            default.unwrap_or_default().to_string()
        }
        Ok(value) => value,
        Err(_) => match default {
            Some(default) => default.to_string(),
            None => {
                errors.push(format!("environment variable '{name}' is not set"));
                whole.to_string()
            }
        },
    }
}

/// Interpolate environment variables in `input`.
///
/// Every problem is collected, so a config with several missing variables
/// reports all of them at once.
pub fn interpolate(input: &str) -> Result<String, Vec<String>> {
    let mut errors = Vec::new();
    let text = ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures<'_>| substitute(caps, &mut errors))
        .into_owned();

    if errors.is_empty() {
        Ok(text)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_env_vars<F, R>(vars: &[(&str, Option<&str>)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let originals: Vec<_> = vars.iter().map(|(k, _)| (*k, env::var(k).ok())).collect();

        // SAFETY: every test uses its own variable names
        for (key, value) in vars {
            match value {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        let result = f();

        // SAFETY: restoring the values captured above
        for (key, original) in originals {
            match original {
                Some(v) => unsafe { env::set_var(key, v) },
                None => unsafe { env::remove_var(key) },
            }
        }

        result
    }

    #[test]
    fn test_bare_and_braced() {
        with_env_vars(&[("KILLFEED_TEST_HOST", Some("10.0.0.5"))], || {
            assert_eq!(
                interpolate("a: $KILLFEED_TEST_HOST b: ${KILLFEED_TEST_HOST}").unwrap(),
                "a: 10.0.0.5 b: 10.0.0.5"
            );
        });
    }

    #[test]
    fn test_all_missing_variables_reported() {
        with_env_vars(
            &[("KILLFEED_TEST_MISS1", None), ("KILLFEED_TEST_MISS2", None)],
            || {
                let errors =
                    interpolate("a: $KILLFEED_TEST_MISS1, b: ${KILLFEED_TEST_MISS2}").unwrap_err();
                assert_eq!(errors.len(), 2);
                assert!(errors[0].contains("KILLFEED_TEST_MISS1"));
                assert!(errors[1].contains("not set"));
            },
        );
    }

    #[test]
    fn test_defaults() {
        with_env_vars(
            &[
                ("KILLFEED_TEST_UNSET", None),
                ("KILLFEED_TEST_EMPTY", Some("")),
            ],
            || {
                assert_eq!(
                    interpolate("${KILLFEED_TEST_UNSET:-22}").unwrap(),
                    "22"
                );
                assert_eq!(
                    interpolate("${KILLFEED_TEST_EMPTY:-22}").unwrap(),
                    "22"
                );
                assert_eq!(interpolate("${KILLFEED_TEST_EMPTY-22}").unwrap(), "");
                assert_eq!(interpolate("${KILLFEED_TEST_UNSET-22}").unwrap(), "22");
            },
        );
    }

    #[test]
    fn test_escape_sequence() {
        assert_eq!(interpolate("password: p$$ss").unwrap(), "password: p$ss");
    }

    #[test]
    fn test_newline_injection_blocked() {
        with_env_vars(&[("KILLFEED_TEST_NL", Some("a\r\nb"))], || {
            let errors = interpolate("value: $KILLFEED_TEST_NL").unwrap_err();
            assert!(errors[0].contains("newlines"));
        });
    }

    #[test]
    fn test_server_block() {
        with_env_vars(
            &[
                ("KILLFEED_TEST_SFTP_USER", Some("deadside")),
                ("KILLFEED_TEST_SFTP_PASS", Some("hunter2")),
                ("KILLFEED_TEST_SFTP_PORT", None),
            ],
            || {
                let yaml = r#"
servers:
  - server_id: "7020"
    host: 192.0.2.10
    port: ${KILLFEED_TEST_SFTP_PORT:-8822}
    username: ${KILLFEED_TEST_SFTP_USER}
    password: $KILLFEED_TEST_SFTP_PASS
"#;
                let text = interpolate(yaml).unwrap();
                assert!(text.contains("port: 8822"));
                assert!(text.contains("username: deadside"));
                assert!(text.contains("password: hunter2"));
            },
        );
    }
}
