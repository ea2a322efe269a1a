//! Translates request scripts into protocol requests.
//!
//! A script holds one command per line: `PUT key value`, `READ key` or
//! `GET key`. Blank lines are skipped; invalid lines are reported and dropped
//! so nothing is ever sent to the server for them.

use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::warn;

use crate::protocol::{LimitError, Request, split_fields};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("{0} needs a key")]
    MissingKey(String),
    #[error(transparent)]
    Limit(#[from] LimitError),
}

/// Parses one script line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<Request>, ScriptError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (command, key, value) = split_fields(line);
    if !matches!(command, "PUT" | "READ" | "GET") {
        return Err(ScriptError::UnknownCommand(command.to_string()));
    }
    if key.is_empty() {
        return Err(ScriptError::MissingKey(command.to_string()));
    }

    let key = key.to_string();
    let request = match command {
        "PUT" => Request::Put {
            key,
            value: value.to_string(),
        },
        "READ" => Request::Read { key },
        _ => Request::Get { key },
    };

    request.check_limits()?;
    Ok(Some(request))
}

/// Parses a whole script, logging and skipping every rejected line.
pub fn parse_script(text: &str) -> Vec<Request> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| match parse_line(line) {
            Ok(request) => request,
            Err(error) => {
                warn!(line = index + 1, %error, "ignoring invalid request line");
                None
            }
        })
        .collect()
}

pub async fn load(path: &Path) -> Result<Vec<Request>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read request script {}", path.display()))?;
    Ok(parse_script(&text))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_each_command() {
        assert_eq!(
            parse_line("PUT a 1"),
            Ok(Some(Request::Put {
                key: "a".into(),
                value: "1".into()
            }))
        );
        assert_eq!(
            parse_line("  READ   a "),
            Ok(Some(Request::Read { key: "a".into() }))
        );
        assert_eq!(
            parse_line("GET a"),
            Ok(Some(Request::Get { key: "a".into() }))
        );
    }

    #[test]
    fn put_value_keeps_inner_spaces() {
        assert_eq!(
            parse_line("PUT greeting hello there  world"),
            Ok(Some(Request::Put {
                key: "greeting".into(),
                value: "hello there  world".into()
            }))
        );
    }

    #[test]
    fn rejects_unknown_commands_and_missing_keys() {
        assert_eq!(parse_line("   "), Ok(None));
        assert_eq!(
            parse_line("DELETE a"),
            Err(ScriptError::UnknownCommand("DELETE".into()))
        );
        assert_eq!(
            parse_line("read a"),
            Err(ScriptError::UnknownCommand("read".into()))
        );
        assert_eq!(
            parse_line("GET"),
            Err(ScriptError::MissingKey("GET".into()))
        );
    }

    #[test]
    fn key_limit_is_inclusive() {
        let line = format!("READ {}", "k".repeat(999));
        assert!(matches!(parse_line(&line), Ok(Some(_))));

        let line = format!("READ {}", "k".repeat(1000));
        assert_eq!(
            parse_line(&line),
            Err(ScriptError::Limit(LimitError::KeyTooLong(1000)))
        );
    }

    #[test]
    fn put_tuple_limit_is_inclusive() {
        let key = "k".repeat(485);
        let line = format!("PUT {key} {}", "v".repeat(484));
        assert!(matches!(parse_line(&line), Ok(Some(_))));

        let line = format!("PUT {key} {}", "v".repeat(485));
        assert_eq!(
            parse_line(&line),
            Err(ScriptError::Limit(LimitError::TupleTooLong(971)))
        );
    }

    #[test]
    fn put_value_limit_is_checked_first() {
        let line = format!("PUT k {}", "v".repeat(1000));
        assert_eq!(
            parse_line(&line),
            Err(ScriptError::Limit(LimitError::ValueTooLong(1000)))
        );
    }

    #[test]
    fn script_skips_invalid_lines() {
        let requests = parse_script("PUT a 1\n\nBOGUS a\nREAD a\nGET\nGET a\n");
        assert_eq!(
            requests,
            vec![
                Request::Put {
                    key: "a".into(),
                    value: "1".into()
                },
                Request::Read { key: "a".into() },
                Request::Get { key: "a".into() },
            ]
        );
    }

    #[tokio::test]
    async fn loads_scripts_from_disk() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "PUT x 42").expect("write script");
        writeln!(file, "READ x").expect("write script");

        let requests = load(file.path()).await.expect("load script");
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], Request::Read { key: "x".into() });
    }

    #[tokio::test]
    async fn missing_script_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = load(&dir.path().join("absent.txt")).await;
        assert!(result.is_err());
    }
}
