//! A thin, line-oriented command shell over the tree engine (§4.17). No
//! SQL grammar, no planner — just the fixed set of verbs in the external
//! interface table, tokenized by splitting on whitespace.

use std::io::Write;

use tracing::info;

use crate::engine;
use crate::err;
use crate::errors::Error;
use crate::table::Table;

#[derive(Debug, PartialEq, Eq)]
pub enum Statement {
    Insert { id: u32, user_name: String, email: String },
    SelectAll,
    SelectId(u32),
    Update { id: u32, user_name: Option<String>, email: Option<String> },
    Delete(u32),
    Exit,
}

/// Parses one line of input into a [`Statement`]. Returns a logical
/// [`Error::InvalidInput`] on anything that doesn't match the grammar.
pub fn parse(line: &str) -> Result<Statement, Error> {
    let line = line.trim();
    if line == ".exit" {
        return Ok(Statement::Exit);
    }

    let mut tokens = line.split_whitespace();
    match tokens.next() {
        Some("insert") => {
            let id = next_token(&mut tokens, "insert requires <id> <user_name> <email>")?;
            let user_name = next_token(&mut tokens, "insert requires <id> <user_name> <email>")?;
            let email = next_token(&mut tokens, "insert requires <id> <user_name> <email>")?;
            no_trailing_tokens(&mut tokens, "insert")?;
            Ok(Statement::Insert {
                id: parse_id(id)?,
                user_name: user_name.to_string(),
                email: email.to_string(),
            })
        }
        Some("select") => match tokens.next() {
            None => Ok(Statement::SelectAll),
            Some(clause) => {
                let id = parse_id_eq(clause)?;
                no_trailing_tokens(&mut tokens, "select")?;
                Ok(Statement::SelectId(id))
            }
        },
        Some("delete") => {
            let clause = next_token(&mut tokens, "delete requires id=<N>")?;
            let id = parse_id_eq(clause)?;
            no_trailing_tokens(&mut tokens, "delete")?;
            Ok(Statement::Delete(id))
        }
        Some("update") => parse_update(tokens),
        Some(other) => Err(err!(InvalidInput, "unrecognized command: {}", other)),
        None => Err(err!(InvalidInput, "empty command")),
    }
}

fn parse_update<'a>(mut tokens: impl Iterator<Item = &'a str>) -> Result<Statement, Error> {
    match tokens.next() {
        Some("set") => {}
        _ => return Err(err!(InvalidInput, "expected 'update set ...'")),
    }

    let mut user_name = None;
    let mut email = None;
    let id = loop {
        let tok = tokens
            .next()
            .ok_or_else(|| err!(InvalidInput, "expected 'where id=<N>'"))?;
        if tok == "where" {
            let id_tok = next_token(&mut tokens, "expected id=<N> after where")?;
            break parse_id_eq(id_tok)?;
        } else if let Some(v) = tok.strip_prefix("user_name=") {
            if user_name.is_some() {
                return Err(err!(InvalidInput, "duplicate user_name assignment"));
            }
            user_name = Some(v.to_string());
        } else if let Some(v) = tok.strip_prefix("email=") {
            if email.is_some() {
                return Err(err!(InvalidInput, "duplicate email assignment"));
            }
            email = Some(v.to_string());
        } else {
            return Err(err!(InvalidInput, "unrecognized assignment: {}", tok));
        }
    };

    if user_name.is_none() && email.is_none() {
        return Err(err!(InvalidInput, "update requires at least one of user_name=, email="));
    }
    no_trailing_tokens(&mut tokens, "update")?;
    Ok(Statement::Update { id, user_name, email })
}

fn next_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, msg: &str) -> Result<&'a str, Error> {
    tokens.next().ok_or_else(|| err!(InvalidInput, "{}", msg))
}

fn no_trailing_tokens<'a>(tokens: &mut impl Iterator<Item = &'a str>, cmd: &str) -> Result<(), Error> {
    if tokens.next().is_some() {
        return Err(err!(InvalidInput, "unexpected trailing tokens after {}", cmd));
    }
    Ok(())
}

fn parse_id_eq(token: &str) -> Result<u32, Error> {
    let rest = token
        .strip_prefix("id=")
        .ok_or_else(|| err!(InvalidInput, "expected id=<N>, got {}", token))?;
    parse_id(rest)
}

fn parse_id(token: &str) -> Result<u32, Error> {
    token.parse().map_err(|_| err!(InvalidInput, "id must be a non-negative integer, got {}", token))
}

/// Executes one parsed statement against `table`, writing the response to
/// `out` per the external interface table. Returns `Ok(false)` on `.exit`.
pub fn execute(table: &mut Table, stmt: Statement, out: &mut impl Write) -> Result<bool, Error> {
    match stmt {
        Statement::Exit => return Ok(false),
        Statement::Insert { id, user_name, email } => {
            info!(command = "insert", id, "received");
            run(out, engine::insert(table, id, &user_name, &email))?;
        }
        Statement::SelectAll => {
            info!(command = "select", "received");
            let rows = engine::select_all(table)?;
            for row in &rows {
                writeln!(out, "{}", row)?;
            }
            writeln!(out, "Executed.")?;
        }
        Statement::SelectId(id) => {
            info!(command = "select", id, "received");
            match engine::select_one(table, id) {
                Ok(row) => {
                    writeln!(out, "{}", row)?;
                    writeln!(out, "Executed.")?;
                }
                Err(e) if e.is_logical() => writeln!(out, "Error: {}", e)?,
                Err(e) => return Err(e),
            }
        }
        Statement::Update { id, user_name, email } => {
            info!(command = "update", id, "received");
            run(out, engine::update(table, id, user_name.as_deref(), email.as_deref()))?;
        }
        Statement::Delete(id) => {
            info!(command = "delete", id, "received");
            run(out, engine::delete(table, id))?;
        }
    }
    Ok(true)
}

/// Reports a logical error as an `Error:` line and lets fatal errors
/// (`Io`/`Storage`) propagate, per §7.
fn run(out: &mut impl Write, result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Ok(()) => writeln!(out, "Executed.").map_err(Error::from),
        Err(e) if e.is_logical() => writeln!(out, "Error: {}", e).map_err(Error::from),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_insert() {
        assert_eq!(
            parse("insert 1 alice alice@example.com").unwrap(),
            Statement::Insert {
                id: 1,
                user_name: "alice".to_string(),
                email: "alice@example.com".to_string()
            }
        );
    }

    #[test]
    fn parses_select_all_and_select_by_id() {
        assert_eq!(parse("select").unwrap(), Statement::SelectAll);
        assert_eq!(parse("select id=7").unwrap(), Statement::SelectId(7));
    }

    #[test]
    fn parses_delete() {
        assert_eq!(parse("delete id=3").unwrap(), Statement::Delete(3));
    }

    #[test]
    fn parses_update_with_both_fields_in_either_order() {
        assert_eq!(
            parse("update set user_name=bob email=b@x where id=2").unwrap(),
            Statement::Update { id: 2, user_name: Some("bob".to_string()), email: Some("b@x".to_string()) }
        );
        assert_eq!(
            parse("update set email=b@x user_name=bob where id=2").unwrap(),
            Statement::Update { id: 2, user_name: Some("bob".to_string()), email: Some("b@x".to_string()) }
        );
    }

    #[test]
    fn parses_exit() {
        assert_eq!(parse(".exit").unwrap(), Statement::Exit);
    }

    #[test]
    fn rejects_unrecognized_command() {
        assert!(parse("drop table").is_err());
    }

    #[test]
    fn rejects_insert_missing_arguments() {
        assert!(parse("insert 1 alice").is_err());
    }

    #[test]
    fn rejects_malformed_id_clause() {
        assert!(parse("select idx=1").is_err());
        assert!(parse("select id=abc").is_err());
    }
}
