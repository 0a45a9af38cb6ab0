//! Custom URI scheme handling.
//!
//! The OS launches the shell with a link such as
//! `agentshell://run?task=open%20the%20news` as a process argument.

use crate::error::{Result, ShellError};
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Query keys that carry a command to send once the backend is ready.
const SEED_KEYS: [&str; 2] = ["task", "command"];

/// A parsed deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeepLink {
    /// Scheme without the trailing `:`.
    pub protocol: String,
    /// Host part, empty when the link has none.
    pub host: String,
    /// Raw query string.
    pub query: Option<String>,
    /// Decoded query pairs, in order.
    pub params: Vec<(String, String)>,
}

impl DeepLink {
    /// Parse `uri`, requiring the given scheme (case-insensitive).
    pub fn parse(uri: &str, expected_scheme: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| ShellError::InvalidDeepLink {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

        if !url.scheme().eq_ignore_ascii_case(expected_scheme) {
            return Err(ShellError::InvalidDeepLink {
                uri: uri.to_string(),
                message: format!("expected scheme {}, got {}", expected_scheme, url.scheme()),
            });
        }

        Ok(Self {
            protocol: url.scheme().to_string(),
            host: url.host_str().unwrap_or_default().to_string(),
            query: url.query().map(str::to_string),
            params: url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        })
    }

    /// First value of the query parameter `key`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Command the link asks the backend to run, if any.
    ///
    /// The first key with a non-blank value wins.
    pub fn seed_command(&self) -> Option<&str> {
        SEED_KEYS
            .iter()
            .filter_map(|key| self.param(key))
            .map(str::trim)
            .find(|cmd| !cmd.is_empty())
    }

    /// Find the first argument using `scheme`.
    ///
    /// Other arguments are ignored; a malformed link with the right scheme
    /// is an error.
    pub fn find_in_args<I, S>(args: I, scheme: &str) -> Result<Option<Self>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let prefix = format!("{}:", scheme.to_ascii_lowercase());
        for arg in args {
            let arg = arg.as_ref();
            if arg.to_ascii_lowercase().starts_with(&prefix) {
                debug!("Deep link argument: {}", arg);
                return Self::parse(arg, scheme).map(Some);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_query() {
        let link = DeepLink::parse("agentshell://run?task=open%20news&lang=ko", "agentshell")
            .unwrap();
        assert_eq!(link.protocol, "agentshell");
        assert_eq!(link.host, "run");
        assert_eq!(link.query.as_deref(), Some("task=open%20news&lang=ko"));
        assert_eq!(link.param("lang"), Some("ko"));
        assert_eq!(link.seed_command(), Some("open news"));
    }

    #[test]
    fn test_seed_command_fallbacks() {
        let link = DeepLink::parse("agentshell://open?command=ls", "agentshell").unwrap();
        assert_eq!(link.seed_command(), Some("ls"));

        let link = DeepLink::parse("agentshell://open?task=%20%20", "agentshell").unwrap();
        assert_eq!(link.seed_command(), None);

        let link = DeepLink::parse("agentshell://open?task=%20&command=ls", "agentshell").unwrap();
        assert_eq!(link.seed_command(), Some("ls"));

        let link = DeepLink::parse("agentshell://open", "agentshell").unwrap();
        assert!(link.query.is_none());
        assert_eq!(link.seed_command(), None);
    }

    #[test]
    fn test_wrong_scheme() {
        let err = DeepLink::parse("https://example.com", "agentshell").unwrap_err();
        assert!(matches!(err, ShellError::InvalidDeepLink { .. }));
        assert!(DeepLink::parse("not a link", "agentshell").is_err());
    }

    #[test]
    fn test_find_in_args() {
        let args = ["--debug", "AgentShell://run?task=hi", "agentshell://other"];
        let link = DeepLink::find_in_args(args, "agentshell").unwrap().unwrap();
        assert_eq!(link.host, "run");

        assert!(DeepLink::find_in_args(["--debug"], "agentshell")
            .unwrap()
            .is_none());
    }
}
