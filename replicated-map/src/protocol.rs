//! Console command parsing for the interactive node shell.
//!
//! This module turns text commands (like "PUT AAPL 150") into structured
//! variants. It is separate from [`crate::rpc::Operation`] because:
//! - `ConsoleCommand` is the shell interface, including local commands such
//!   as LIST, NODE and EXIT
//! - `Operation` is only what gets broadcast to members
//!
//! Malformed numbers are rejected here and never reach the map.

use anyhow::{Context, Result, anyhow};

/// Commands that can be entered at the shell prompt.
#[derive(Debug, PartialEq)]
pub enum ConsoleCommand {
    List,
    Get { key: String },
    Put { key: String, value: f64 },
    CompareAndSwap { key: String, old: f64, new: f64 },
    Remove { key: String },
    Bench { count: usize },
    Node { index: usize },
    Join,
    Leave,
    Members,
    Help,
    Exit,
}

impl ConsoleCommand {
    /// Parses a line of user input into a command.
    ///
    /// # Syntax
    /// Commands are case-insensitive and support aliases:
    /// - `LIST` (alias: `l`) - Print every entry held by the active node
    /// - `GET <key>` (alias: `g`) - Read a value
    /// - `PUT <key> <value>` (alias: `p`) - Set a value on every node
    /// - `CAS <key> <old> <new>` (alias: `c`) - Compare and swap
    /// - `REMOVE <key>` (alias: `r`) - Remove a key from every node
    /// - `BENCH <count>` (alias: `b`) - Time `count` sequential puts
    /// - `NODE <index>` (alias: `n`) - Switch the active node
    /// - `JOIN` (alias: `j`) - Start another node
    /// - `LEAVE` - Disconnect the active node
    /// - `MEMBERS` (alias: `m`) - Show the active node's view
    /// - `HELP` (alias: `h`) - Print command reference
    /// - `EXIT` (alias: `e`) - Shut down
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        let cmd = first.to_uppercase();
        let normalized_cmd = match cmd.as_str() {
            "L" => "LIST",
            "G" => "GET",
            "P" => "PUT",
            "C" => "CAS",
            "R" => "REMOVE",
            "B" => "BENCH",
            "N" => "NODE",
            "J" => "JOIN",
            "M" => "MEMBERS",
            "H" => "HELP",
            "E" => "EXIT",
            other => other,
        };

        match (normalized_cmd, parts.len()) {
            ("LIST", 1) => Ok(ConsoleCommand::List),
            ("JOIN", 1) => Ok(ConsoleCommand::Join),
            ("LEAVE", 1) => Ok(ConsoleCommand::Leave),
            ("MEMBERS", 1) => Ok(ConsoleCommand::Members),
            ("HELP", 1) => Ok(ConsoleCommand::Help),
            ("EXIT", 1) => Ok(ConsoleCommand::Exit),
            ("GET", 2) => Ok(ConsoleCommand::Get {
                key: parts[1].to_string(),
            }),
            ("REMOVE", 2) => Ok(ConsoleCommand::Remove {
                key: parts[1].to_string(),
            }),
            ("PUT", 3) => Ok(ConsoleCommand::Put {
                key: parts[1].to_string(),
                value: parse_value(parts[2])?,
            }),
            ("CAS", 4) => Ok(ConsoleCommand::CompareAndSwap {
                key: parts[1].to_string(),
                old: parse_value(parts[2])?,
                new: parse_value(parts[3])?,
            }),
            ("BENCH", 2) => Ok(ConsoleCommand::Bench {
                count: parts[1]
                    .parse()
                    .with_context(|| format!("invalid count '{}'", parts[1]))?,
            }),
            ("NODE", 2) => Ok(ConsoleCommand::Node {
                index: parts[1]
                    .parse()
                    .with_context(|| format!("invalid node index '{}'", parts[1]))?,
            }),
            ("GET", _) => Err(anyhow!("GET requires exactly one argument: GET <key>")),
            ("REMOVE", _) => Err(anyhow!("REMOVE requires exactly one argument: REMOVE <key>")),
            ("PUT", _) => Err(anyhow!("PUT requires exactly two arguments: PUT <key> <value>")),
            ("CAS", _) => Err(anyhow!(
                "CAS requires exactly three arguments: CAS <key> <old> <new>"
            )),
            ("BENCH", _) => Err(anyhow!("BENCH requires exactly one argument: BENCH <count>")),
            ("NODE", _) => Err(anyhow!("NODE requires exactly one argument: NODE <index>")),
            ("LIST" | "JOIN" | "LEAVE" | "MEMBERS" | "HELP" | "EXIT", _) => {
                Err(anyhow!("{normalized_cmd} takes no arguments"))
            }
            _ => Err(anyhow!(
                "invalid command. Try: LIST/l, GET/g, PUT/p, CAS/c, REMOVE/r, HELP/h, EXIT/e"
            )),
        }
    }
}

fn parse_value(text: &str) -> Result<f64> {
    text.parse()
        .with_context(|| format!("invalid value '{text}', expected a number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_commands() {
        assert!(matches!(ConsoleCommand::parse("exit"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("EXIT"), Ok(ConsoleCommand::Exit)));
        assert!(matches!(ConsoleCommand::parse("ExIt"), Ok(ConsoleCommand::Exit)));

        assert!(matches!(ConsoleCommand::parse("list"), Ok(ConsoleCommand::List)));
        assert!(matches!(ConsoleCommand::parse("Members"), Ok(ConsoleCommand::Members)));
        assert!(matches!(ConsoleCommand::parse("leave"), Ok(ConsoleCommand::Leave)));
    }

    #[test]
    fn test_aliases() {
        assert!(matches!(ConsoleCommand::parse("l"), Ok(ConsoleCommand::List)));
        assert!(matches!(ConsoleCommand::parse("J"), Ok(ConsoleCommand::Join)));
        assert!(matches!(ConsoleCommand::parse("h"), Ok(ConsoleCommand::Help)));
        assert!(matches!(ConsoleCommand::parse("e"), Ok(ConsoleCommand::Exit)));

        assert!(matches!(
            ConsoleCommand::parse("g AAPL"),
            Ok(ConsoleCommand::Get { key }) if key == "AAPL"
        ));
        assert!(matches!(
            ConsoleCommand::parse("r AAPL"),
            Ok(ConsoleCommand::Remove { key }) if key == "AAPL"
        ));
        assert!(matches!(
            ConsoleCommand::parse("n 2"),
            Ok(ConsoleCommand::Node { index: 2 })
        ));
        assert!(matches!(
            ConsoleCommand::parse("b 1000"),
            Ok(ConsoleCommand::Bench { count: 1000 })
        ));
    }

    #[test]
    fn test_numeric_arguments() {
        assert_eq!(
            ConsoleCommand::parse("PUT AAPL 150").unwrap(),
            ConsoleCommand::Put {
                key: "AAPL".into(),
                value: 150.0
            }
        );
        assert_eq!(
            ConsoleCommand::parse("c AAPL 150.0 -1.5e2").unwrap(),
            ConsoleCommand::CompareAndSwap {
                key: "AAPL".into(),
                old: 150.0,
                new: -150.0
            }
        );
    }

    #[test]
    fn test_keys_keep_their_case() {
        assert!(matches!(
            ConsoleCommand::parse("p aapl 1"),
            Ok(ConsoleCommand::Put { key, .. }) if key == "aapl"
        ));
    }

    #[test]
    fn test_invalid_commands() {
        assert!(ConsoleCommand::parse("").is_err());
        assert!(ConsoleCommand::parse("   ").is_err());
        assert!(ConsoleCommand::parse("INVALID").is_err());
        assert!(ConsoleCommand::parse("GET").is_err());
        assert!(ConsoleCommand::parse("PUT AAPL").is_err());
        assert!(ConsoleCommand::parse("PUT AAPL abc").is_err());
        assert!(ConsoleCommand::parse("CAS AAPL 1").is_err());
        assert!(ConsoleCommand::parse("CAS AAPL 1 x").is_err());
        assert!(ConsoleCommand::parse("NODE -1").is_err());
        assert!(ConsoleCommand::parse("LIST extra").is_err());
    }
}
