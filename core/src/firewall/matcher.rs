//! Match-expression normalization and subsumption.
//!
//! A match expression is read as a conjunction of constraints. Rule A covers
//! rule B when every constraint of A also appears in B: then anything B
//! matches, A matched first. The check is conservative. It can miss overlaps
//! (port ranges, CIDR containment) but never reports one that isn't there.

use std::collections::BTreeSet;

/// Normalized constraint set of one rule.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchSpec {
    constraints: BTreeSet<String>,
}

impl MatchSpec {
    pub fn parse(expr: &str) -> MatchSpec {
        let tokens: Vec<&str> = expr.split_whitespace().collect();
        let mut constraints = BTreeSet::new();
        let mut negate_next = false;
        let mut i = 0;
        while i < tokens.len() {
            let tok = tokens[i];
            if tok == "!" {
                negate_next = true;
                i += 1;
                continue;
            }
            if !is_option(tok) {
                // Stray value with no option in front; keep it so it still
                // narrows the match.
                constraints.insert(tok.to_string());
                i += 1;
                continue;
            }

            let option = canonical_option(tok);
            let mut negated = negate_next;
            negate_next = false;
            let mut values = Vec::new();
            i += 1;
            while i < tokens.len() && !is_option(tokens[i]) {
                if tokens[i] == "!" {
                    // `! --opt` negates the next option; `--opt ! val` the value.
                    if values.is_empty() && i + 1 < tokens.len() && !is_option(tokens[i + 1]) {
                        negated = true;
                        i += 1;
                        continue;
                    }
                    break;
                }
                values.push(tokens[i]);
                i += 1;
            }

            // Loading a match module constrains nothing by itself.
            if option == "--match" {
                continue;
            }
            let value = canonical_value(option, &values.join(" "));
            if !negated && is_wildcard(option, &value) {
                continue;
            }
            let prefix = if negated { "!" } else { "" };
            constraints.insert(format!("{}{}={}", prefix, option, value));
        }
        MatchSpec { constraints }
    }

    /// Matches every packet that reaches the chain.
    pub fn is_unconditional(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Whether every packet `other` matches is also matched by `self`.
    pub fn covers(&self, other: &MatchSpec) -> bool {
        self.constraints.is_subset(&other.constraints)
    }

    pub fn constraints(&self) -> impl Iterator<Item = &str> {
        self.constraints.iter().map(|s| s.as_str())
    }
}

fn is_option(tok: &str) -> bool {
    tok.starts_with('-') && tok.len() > 1 && !tok[1..].starts_with(|c: char| c.is_ascii_digit())
}

fn canonical_option(opt: &str) -> &str {
    match opt {
        "-p" => "--protocol",
        "-s" | "--src" => "--source",
        "-d" | "--dst" => "--destination",
        "-i" => "--in-interface",
        "-o" => "--out-interface",
        "-m" => "--match",
        "--destination-port" => "--dport",
        "--source-port" => "--sport",
        other => other,
    }
}

/// `iptables -S` prints host addresses with a prefix length and may reorder
/// comma lists; bring declared values into the same shape.
fn canonical_value(option: &str, value: &str) -> String {
    match option {
        "--source" | "--destination" if !value.contains('/') && !value.is_empty() => {
            let bits = if value.contains(':') { 128 } else { 32 };
            format!("{}/{}", value, bits)
        }
        _ if value.contains(',') => {
            let mut items: Vec<&str> = value.split(',').collect();
            items.sort_unstable();
            items.join(",")
        }
        _ => value.to_string(),
    }
}

fn is_wildcard(option: &str, value: &str) -> bool {
    match option {
        "--source" | "--destination" => matches!(value, "0.0.0.0/0" | "::/0" | "0/0"),
        "--protocol" => value == "all",
        "--in-interface" | "--out-interface" => value == "+",
        _ => false,
    }
}
