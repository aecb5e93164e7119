//! Lightweight Solidity source scanner.
//!
//! Only what the registry needs is extracted: contract names and the header
//! of every `function` declared directly in a contract body.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static CONTRACT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:abstract\s+)?(contract|library|interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("contract regex is valid")
});

static FUNCTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bfunction\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*\(").expect("function regex is valid")
});

/// Visibility of a function declaration.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    External,
    Public,
    Internal,
    Private,
}

/// A `function` declaration as written in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    /// Parameter list between the parentheses, whitespace normalised.
    pub params: String,
    pub visibility: Visibility,
    /// `view`, `pure` or `payable`.
    pub mutability: Option<String>,
    /// Return list between the parentheses of `returns (...)`.
    pub returns: Option<String>,
}

impl FunctionDecl {
    /// Parameter type names, in order.
    pub fn param_types(&self) -> Vec<String> {
        split_top_level(&self.params)
            .into_iter()
            .filter_map(|param| param.split_whitespace().next().map(normalize_type))
            .collect()
    }

    pub fn param_count(&self) -> usize {
        split_top_level(&self.params).len()
    }
}

/// A contract declaration and its functions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractDecl {
    pub name: String,
    pub kind: String,
    pub functions: Vec<FunctionDecl>,
}

/// Remove `//` and `/* */` comments, keeping string literals intact.
pub fn strip_comments(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                out.push(c);
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                    } else if inner == c {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        out.push('\n');
                    }
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }

    out
}

/// Replace the contents of string literals with spaces, byte for byte, so
/// brackets and keywords inside them do not count as code.
pub fn blank_literals(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();

    while let Some(c) = chars.next() {
        out.push(c);
        if c != '"' && c != '\'' {
            continue;
        }

        while let Some(inner) = chars.next() {
            if inner == c {
                out.push(c);
                break;
            }
            push_blank(&mut out, inner);
            if inner == '\\' {
                if let Some(escaped) = chars.next() {
                    push_blank(&mut out, escaped);
                }
            }
        }
    }

    out
}

fn push_blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.extend(std::iter::repeat_n(' ', c.len_utf8()));
    }
}

/// Every contract, library and interface declared in `source`.
pub fn parse_contracts(source: &str) -> Vec<ContractDecl> {
    let source = blank_literals(&strip_comments(source));
    let mut contracts = Vec::new();

    for captures in CONTRACT_RE.captures_iter(&source) {
        let (Some(whole), Some(kind), Some(name)) = (captures.get(0), captures.get(1), captures.get(2))
        else {
            continue;
        };

        let Some(open) = source[whole.end()..].find('{').map(|i| whole.end() + i) else {
            continue;
        };
        let Some(close) = matching(&source, open, '{', '}') else {
            continue;
        };

        contracts.push(ContractDecl {
            name: name.as_str().to_string(),
            kind: kind.as_str().to_string(),
            functions: parse_functions(&source[open + 1..close]),
        });
    }

    contracts
}

/// Pick the contract named `stem`, falling back to the first `contract`.
pub fn select_contract(contracts: Vec<ContractDecl>, stem: &str) -> Option<ContractDecl> {
    let position = contracts
        .iter()
        .position(|c| c.name == stem)
        .or_else(|| contracts.iter().position(|c| c.kind == "contract"))?;
    contracts.into_iter().nth(position)
}

fn parse_functions(body: &str) -> Vec<FunctionDecl> {
    let mut functions = Vec::new();

    for captures in FUNCTION_RE.captures_iter(body) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        // Only declarations at the top level of the contract body.
        if depth_at(body, whole.start()) != 0 {
            continue;
        }

        let open = whole.end() - 1;
        let Some(close) = matching(body, open, '(', ')') else {
            continue;
        };
        let params = normalize_whitespace(&body[open + 1..close]);

        let rest = &body[close + 1..];
        let header_end = rest.find(['{', ';']).unwrap_or(rest.len());
        let (visibility, mutability, returns) = parse_header(&rest[..header_end]);

        functions.push(FunctionDecl {
            name: name.as_str().to_string(),
            params,
            visibility,
            mutability,
            returns,
        });
    }

    functions
}

fn parse_header(header: &str) -> (Visibility, Option<String>, Option<String>) {
    let (attributes, returns) = match header.find("returns") {
        Some(at) => {
            let after = &header[at + "returns".len()..];
            let returns = after.find('(').and_then(|open| {
                matching(after, open, '(', ')').map(|close| normalize_whitespace(&after[open + 1..close]))
            });
            (&header[..at], returns)
        }
        None => (header, None),
    };

    // Modifier arguments may contain anything; drop them before tokenizing.
    let attributes = remove_parenthesized(attributes);

    let mut visibility = Visibility::Public;
    let mut mutability = None;
    for token in attributes.split_whitespace() {
        match token {
            "external" => visibility = Visibility::External,
            "public" => visibility = Visibility::Public,
            "internal" => visibility = Visibility::Internal,
            "private" => visibility = Visibility::Private,
            "view" | "pure" | "payable" => mutability = Some(token.to_string()),
            _ => {}
        }
    }

    (visibility, mutability, returns)
}

/// Brace depth at `position`, counted from the start of `text`.
fn depth_at(text: &str, position: usize) -> i32 {
    text[..position].chars().fold(0, |depth, c| match c {
        '{' => depth + 1,
        '}' => depth - 1,
        _ => depth,
    })
}

/// Index of the delimiter closing the one at `open`.
fn matching(text: &str, open: usize, left: char, right: char) -> Option<usize> {
    let mut depth = 0;
    for (i, c) in text[open..].char_indices() {
        if c == left {
            depth += 1;
        } else if c == right {
            depth -= 1;
            if depth == 0 {
                return Some(open + i);
            }
        }
    }
    None
}

fn remove_parenthesized(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut depth = 0;
    for c in text.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on commas that are not nested in parentheses or brackets.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0;

    for c in text.chars() {
        match c {
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }

    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }

    parts
}

/// Expand elementary type aliases (`uint` is `uint256`).
pub fn normalize_type(ty: &str) -> String {
    let (base, suffix) = match ty.find('[') {
        Some(at) => ty.split_at(at),
        None => (ty, ""),
    };
    let base = match base {
        "uint" => "uint256",
        "int" => "int256",
        "byte" => "bytes1",
        other => other,
    };
    format!("{}{}", base, suffix)
}
