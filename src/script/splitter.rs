use super::{SqlScript, Statement, StatementKind};
use once_cell::sync::Lazy;
use regex::Regex;

static PROCEDURE_START: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bCREATE\s+(?:OR\s+REPLACE\s+)?(?:SECURE\s+)?PROCEDURE\b")
        .expect("procedure start regex is valid")
});

/// Part of `line` before a `--` comment that is not inside a string literal.
fn strip_line_comment(line: &str) -> &str {
    let mut in_string = false;
    for (idx, ch) in line.char_indices() {
        match ch {
            '\'' => in_string = !in_string,
            '-' if !in_string && line[idx..].starts_with("--") => return &line[..idx],
            _ => {}
        }
    }
    line
}

/// Offset of the first procedure keyword that is not commented out.
fn procedure_start(text: &str) -> Option<usize> {
    PROCEDURE_START
        .find_iter(text)
        .map(|m| m.start())
        .find(|&start| {
            let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
            let prefix = &text[line_start..start];
            strip_line_comment(prefix).len() == prefix.len()
        })
}

/// Splits a script into executable statements.
///
/// Text before the first `CREATE [OR REPLACE] PROCEDURE` is split on `;`.
/// Everything from that keyword to the end of the script is kept as a single
/// procedure-body statement, since `$$`-quoted bodies contain their own `;`.
/// Only the first procedure definition is recognized; anything after it,
/// including a second definition, stays inside that one statement.
pub struct StatementSplitter;

impl StatementSplitter {
    pub fn split(script: &SqlScript) -> Vec<Statement> {
        Self::split_text(script.text())
    }

    pub fn split_text(text: &str) -> Vec<Statement> {
        let (setup, body) = match procedure_start(text) {
            Some(start) => (&text[..start], Some(&text[start..])),
            None => (text, None),
        };

        let mut statements: Vec<Statement> = Self::split_plain(setup)
            .into_iter()
            .enumerate()
            .map(|(position, sql)| Statement {
                position,
                kind: StatementKind::Plain,
                sql,
            })
            .collect();

        if let Some(body) = body {
            let body = body.trim();
            if !body.is_empty() {
                statements.push(Statement {
                    position: statements.len(),
                    kind: StatementKind::ProcedureBody,
                    sql: body.to_string(),
                });
            }
        }

        statements
    }

    pub fn contains_procedure(text: &str) -> bool {
        procedure_start(text).is_some()
    }

    fn split_plain(text: &str) -> Vec<String> {
        let without_comments = text
            .lines()
            .map(|line| strip_line_comment(line).trim_end())
            .filter(|line| !line.trim().is_empty())
            .collect::<Vec<_>>()
            .join("\n");

        without_comments
            .split(';')
            .map(str::trim)
            .filter(|fragment| !fragment.is_empty())
            .map(str::to_string)
            .collect()
    }
}
