//! Security validation for MCP server definitions, run at application-tier
//! load time and again at merge-before-use.
//!
//! Grounded on `astrid_core::env_policy`'s spawn-env denylist approach,
//! extended here with the command-injection and SSRF checks the resolver
//! needs that the denylist alone doesn't cover.

use crate::config::ServerConfig;
use crate::error::McpError;
use regex::Regex;
use std::net::ToSocketAddrs;
use std::sync::OnceLock;

const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '[', ']', '<', '>', '!', '\n', '\r', '\\',
];

const DENIED_ENV_KEYS: &[&str] = &["LD_PRELOAD", "LD_LIBRARY_PATH", "PATH"];

const METADATA_HOSTS: &[&str] = &["metadata.google.internal", "169.254.169.254"];

/// Validate a single server definition. Called once at application-file
/// load time (warn-and-skip on failure) and again whenever a resolved
/// definition is about to be handed to an agent (reject-the-request on
/// failure).
///
/// # Errors
/// Returns [`McpError::SecurityRejected`] describing the first violation
/// found.
pub fn validate_server(
    name: &str,
    command: Option<&str>,
    args: &[String],
    url: Option<&str>,
    env: &std::collections::HashMap<String, String>,
) -> Result<(), McpError> {
    if let Some(command) = command {
        check_no_shell_metacharacters(name, command)?;
    }
    for arg in args {
        check_no_shell_metacharacters(name, arg)?;
    }
    if let Some(url) = url {
        check_not_ssrf_target(name, url)?;
    }
    for (key, value) in env {
        if DENIED_ENV_KEYS.contains(&key.as_str()) {
            return Err(McpError::SecurityRejected {
                name: name.to_string(),
                reason: format!("environment key {key} is not permitted"),
            });
        }
        check_no_null_byte(name, key)?;
        check_no_null_byte(name, value)?;
    }
    Ok(())
}

fn check_no_shell_metacharacters(name: &str, value: &str) -> Result<(), McpError> {
    check_no_null_byte(name, value)?;
    if value.contains(SHELL_METACHARACTERS) {
        return Err(McpError::SecurityRejected {
            name: name.to_string(),
            reason: "command or argument contains a shell metacharacter".to_string(),
        });
    }
    Ok(())
}

fn check_no_null_byte(name: &str, value: &str) -> Result<(), McpError> {
    if value.contains('\0') {
        return Err(McpError::SecurityRejected {
            name: name.to_string(),
            reason: "value contains a null byte".to_string(),
        });
    }
    Ok(())
}

fn check_not_ssrf_target(name: &str, raw_url: &str) -> Result<(), McpError> {
    let parsed = url::Url::parse(raw_url).map_err(|e| McpError::SecurityRejected {
        name: name.to_string(),
        reason: format!("invalid URL: {e}"),
    })?;

    let host = parsed.host_str().ok_or_else(|| McpError::SecurityRejected {
        name: name.to_string(),
        reason: "URL has no host".to_string(),
    })?;

    if METADATA_HOSTS.contains(&host) {
        return Err(McpError::SecurityRejected {
            name: name.to_string(),
            reason: format!("URL targets a known cloud metadata host ({host})"),
        });
    }

    if let Ok(ip) = host.parse::<std::net::IpAddr>() {
        check_ip_not_internal(name, ip)?;
    } else {
        // Best-effort DNS resolution; a hostname that can't be resolved here
        // will simply fail to connect later — not this check's concern.
        let lookup = format!("{host}:0");
        if let Ok(addrs) = lookup.to_socket_addrs() {
            for addr in addrs {
                check_ip_not_internal(name, addr.ip())?;
            }
        }
    }

    Ok(())
}

fn credential_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new("(?i)api_key|apikey|secret|password|token|auth|credential|authorization")
            .expect("static pattern is valid")
    })
}

/// A copy of `server` with any header or env value whose key looks
/// credential-shaped replaced by `***REDACTED***`. Used wherever MCP
/// records are logged or returned through an admin endpoint; never used
/// on the path that hands configuration to an agent.
#[must_use]
pub fn redact_server(server: &ServerConfig) -> ServerConfig {
    let mut redacted = server.clone();
    for (key, value) in &mut redacted.headers {
        if credential_key_pattern().is_match(key) {
            *value = "***REDACTED***".to_string();
        }
    }
    for (key, value) in &mut redacted.env {
        if credential_key_pattern().is_match(key) {
            *value = "***REDACTED***".to_string();
        }
    }
    redacted
}

fn check_ip_not_internal(name: &str, ip: std::net::IpAddr) -> Result<(), McpError> {
    let blocked = match ip {
        std::net::IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_link_local()
                || v4.is_private()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_reserved()
        }
        std::net::IpAddr::V6(v6) => v6.is_loopback() || v6.is_unique_local() || v6.is_unspecified(),
    };
    if blocked {
        return Err(McpError::SecurityRejected {
            name: name.to_string(),
            reason: format!("URL resolves to a non-routable address ({ip})"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn rejects_shell_metacharacters_in_command() {
        let err = validate_server("x", Some("echo; rm -rf /"), &[], None, &HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn accepts_plain_command() {
        let err = validate_server("x", Some("npx"), &["-y".into()], None, &HashMap::new());
        assert!(err.is_ok());
    }

    #[test]
    fn rejects_loopback_url() {
        let err = validate_server("x", None, &[], Some("http://127.0.0.1:8080/mcp"), &HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unspecified_address() {
        let err = check_ip_not_internal("x", "0.0.0.0".parse().unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_reserved_address() {
        let err = check_ip_not_internal("x", "240.0.0.1".parse().unwrap());
        assert!(err.is_err());
    }

    #[test]
    fn rejects_metadata_host() {
        let err = validate_server(
            "x",
            None,
            &[],
            Some("http://169.254.169.254/latest/meta-data"),
            &HashMap::new(),
        );
        assert!(err.is_err());
    }

    #[test]
    fn accepts_public_https_url() {
        let err = validate_server("x", None, &[], Some("https://example.com/mcp"), &HashMap::new());
        assert!(err.is_ok());
    }

    #[test]
    fn rejects_denied_env_key() {
        let mut env = HashMap::new();
        env.insert("LD_PRELOAD".to_string(), "/tmp/evil.so".to_string());
        let err = validate_server("x", Some("npx"), &[], None, &env);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_null_byte() {
        let err = validate_server("x", Some("npx\0"), &[], None, &HashMap::new());
        assert!(err.is_err());
    }

    #[test]
    fn redact_server_masks_credential_shaped_headers_and_env() {
        let mut server = ServerConfig::stdio("x", "npx");
        server.headers.insert("Authorization".to_string(), "Bearer secret-value".to_string());
        server.env.insert("API_KEY".to_string(), "sk-live-123".to_string());
        server.env.insert("WORKDIR".to_string(), "/tmp".to_string());

        let redacted = redact_server(&server);
        assert_eq!(redacted.headers["Authorization"], "***REDACTED***");
        assert_eq!(redacted.env["API_KEY"], "***REDACTED***");
        assert_eq!(redacted.env["WORKDIR"], "/tmp");
    }
}
