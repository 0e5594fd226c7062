//! Hand-written parser for the one-line chain rule grammar (§6):
//!
//! ```text
//! [!] field op "arg" -> action[value]
//! ```
//!
//! where `action` is `vhost-name | chain-name | block | mark = uint`. This
//! isn't TOML — the grammar is given in literal one-line form — so it gets
//! its own small line-oriented parser rather than a `serde` derive, living
//! next to the rule table it feeds.

use crate::error::EngineError;
use crate::rules::{Action, Field, Op, Rule};

/// Parse one chain's worth of rule lines (blank lines and `#`-comments are
/// skipped) into match-rules. Mark-rules use the same grammar but are kept
/// in a separate source section by convention, parsed with the same function.
pub fn parse_rules(src: &str) -> Result<Vec<Rule>, EngineError> {
    let mut rules = Vec::new();
    for (lineno, line) in src.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        rules.push(parse_line(line, lineno + 1)?);
    }
    Ok(rules)
}

fn grammar_err(line: usize, reason: impl Into<String>) -> EngineError {
    EngineError::RuleGrammar {
        line,
        reason: reason.into(),
    }
}

fn parse_line(line: &str, lineno: usize) -> Result<Rule, EngineError> {
    let (head, action_str) = line
        .split_once("->")
        .ok_or_else(|| grammar_err(lineno, "missing '->' action separator"))?;
    let head = head.trim();
    let action_str = action_str.trim();

    let (inv, head) = match head.strip_prefix('!') {
        Some(rest) => (true, rest.trim_start()),
        None => (false, head),
    };

    let mut parts = head.splitn(3, char::is_whitespace);
    let field_str = parts.next().unwrap_or("").trim();
    let rest = head[field_str.len()..].trim_start();
    let (op_str, arg_part) = rest
        .split_once(char::is_whitespace)
        .map(|(a, b)| (a, b.trim_start()))
        .ok_or_else(|| grammar_err(lineno, "expected '<field> <op> \"<arg>\"'"))?;

    let field = parse_field(field_str).ok_or_else(|| {
        grammar_err(lineno, format!("unknown field '{field_str}'"))
    })?;
    let op = parse_op(op_str).ok_or_else(|| grammar_err(lineno, format!("unknown op '{op_str}'")))?;
    let arg = parse_quoted_arg(arg_part).ok_or_else(|| {
        grammar_err(lineno, "expected a double-quoted argument")
    })?;

    let action = parse_action(action_str).ok_or_else(|| {
        grammar_err(lineno, format!("unrecognized action '{action_str}'"))
    })?;

    Ok(Rule {
        field,
        op,
        inv,
        arg,
        action,
    })
}

fn parse_field(s: &str) -> Option<Field> {
    Some(match s {
        "URI" => Field::Uri,
        "HOST" => Field::Host,
        "HDR_HOST" => Field::HdrHost,
        "HDR_CONN" => Field::HdrConn,
        "HDR_REFERER" => Field::HdrReferer,
        "HDR_RAW" => Field::HdrRaw,
        "MARK" => Field::Mark,
        "METHOD" => Field::Method,
        "WILDCARD" => Field::Wildcard,
        _ => return None,
    })
}

fn parse_op(s: &str) -> Option<Op> {
    Some(match s {
        "EQ" => Op::Eq,
        "PREFIX" => Op::Prefix,
        "WILDCARD" => Op::Wildcard,
        _ => return None,
    })
}

/// Strip one layer of double quotes; `PREFIX` literals carry a trailing `*`
/// in the source grammar (§4.E) which is dropped here since `Op::Prefix`
/// evaluation only ever needs the bare literal.
fn parse_quoted_arg(s: &str) -> Option<String> {
    let s = s.trim();
    let inner = s.strip_prefix('"')?.strip_suffix('"')?;
    Some(inner.strip_suffix('*').unwrap_or(inner).to_owned())
}

fn parse_action(s: &str) -> Option<Action> {
    if s == "block" {
        return Some(Action::Block);
    }
    if let Some(value) = s.strip_prefix("mark") {
        let value = value.trim().strip_prefix('=')?.trim();
        return value.parse().ok().map(Action::Mark);
    }
    if let Some(name) = s.strip_prefix("chain:") {
        return Some(Action::Chain(name.trim().to_owned()));
    }
    if let Some(name) = s.strip_prefix("vhost:") {
        return Some(Action::Vhost(name.trim().to_owned()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_rule_with_vhost_action() {
        let rules = parse_rules(r#"URI PREFIX "/api/*" -> vhost:api"#).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].field, Field::Uri);
        assert_eq!(rules[0].op, Op::Prefix);
        assert_eq!(rules[0].arg, "/api/");
        assert_eq!(rules[0].action, Action::Vhost("api".into()));
    }

    #[test]
    fn parses_negated_eq_rule_with_block_action() {
        let rules = parse_rules(r#"! HOST EQ "trusted.example" -> block"#).unwrap();
        assert!(rules[0].inv);
        assert_eq!(rules[0].action, Action::Block);
    }

    #[test]
    fn parses_mark_action_with_value() {
        let rules = parse_rules(r#"HDR_RAW EQ "X-Internal: 1" -> mark = 7"#).unwrap();
        assert_eq!(rules[0].action, Action::Mark(7));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let src = "# a comment\n\nWILDCARD WILDCARD \"\" -> chain:fallback\n";
        let rules = parse_rules(src).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].action, Action::Chain("fallback".into()));
    }

    #[test]
    fn missing_arrow_is_a_grammar_error() {
        let err = parse_rules("URI EQ \"/x\" block").unwrap_err();
        assert!(matches!(err, EngineError::RuleGrammar { .. }));
    }
}
