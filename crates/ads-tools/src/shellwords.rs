// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Minimal shell-style command-line splitting for the `exec` tool: single
//! quotes are literal, double quotes honor backslash escapes, a backslash
//! outside quotes escapes the next character.  No expansion of any kind —
//! the child is spawned with the shell disabled.

use crate::ToolError;

pub fn split_command_line(line: &str) -> Result<Vec<String>, ToolError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ToolError::Failed("unterminated single quote".into()))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(esc @ ('"' | '\\' | '$' | '`')) => current.push(esc),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => {
                                return Err(ToolError::Failed(
                                    "unterminated double quote".into(),
                                ))
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ToolError::Failed("unterminated double quote".into()))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(esc) => current.push(esc),
                    None => return Err(ToolError::Failed("trailing backslash".into())),
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(
            split_command_line("git  status   --short").unwrap(),
            vec!["git", "status", "--short"]
        );
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(
            split_command_line(r#"echo 'a b' 'c\d'"#).unwrap(),
            vec!["echo", "a b", r"c\d"]
        );
    }

    #[test]
    fn double_quotes_allow_escapes() {
        assert_eq!(
            split_command_line(r#"echo "say \"hi\"""#).unwrap(),
            vec!["echo", r#"say "hi""#]
        );
    }

    #[test]
    fn backslash_escapes_space_outside_quotes() {
        assert_eq!(
            split_command_line(r"cat my\ file.txt").unwrap(),
            vec!["cat", "my file.txt"]
        );
    }

    #[test]
    fn adjacent_quoted_and_bare_join_one_word() {
        assert_eq!(
            split_command_line(r#"pre'fix'post"#).unwrap(),
            vec!["prefixpost"]
        );
    }

    #[test]
    fn empty_quoted_string_is_a_word() {
        assert_eq!(split_command_line(r#"echo """#).unwrap(), vec!["echo", ""]);
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(split_command_line("echo 'open").is_err());
        assert!(split_command_line(r#"echo "open"#).is_err());
    }

    #[test]
    fn empty_line_yields_no_words() {
        assert!(split_command_line("   ").unwrap().is_empty());
    }
}
