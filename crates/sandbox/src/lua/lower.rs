//! Lua body lowering
//!
//! A token-level scan, not a full parse. It reports:
//! - assignments to bare global names as fields, plus an initializer
//!   when the value is anything but plain literals
//! - global `function` declarations as nested units
//! - every reference to a non-local name or dotted path as a call site
//!   (`os.execute` counts whether or not it is called)
//!
//! Locals are collected in a first pass over the whole body (declared
//! arguments, `local` names, function parameters, `for` variables) without
//! block scoping, so a name that is local anywhere is local everywhere.

use ferrule_core::FunctionDefinition;
use ferrule_verifier::{CallSite, Instruction, ModuleImage, Routine, RoutineRole};
use once_cell::sync::Lazy;
use std::collections::HashSet;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
        "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
    ]
    .into_iter()
    .collect()
});

const SYMBOLS_3: &[&str] = &["..."];
const SYMBOLS_2: &[&str] = &["==", "~=", "<=", ">=", "//", "..", "::", "<<", ">>"];

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Name(String),
    Str,
    Num,
    Sym(String),
}

impl Token {
    fn is_sym(&self, s: &str) -> bool {
        matches!(self, Token::Sym(x) if x == s)
    }

    fn is_name(&self, s: &str) -> bool {
        matches!(self, Token::Name(x) if x == s)
    }

    fn name(&self) -> Option<&str> {
        match self {
            Token::Name(n) => Some(n),
            _ => None,
        }
    }
}

/// True for a valid Lua identifier that is not a keyword
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_') && !KEYWORDS.contains(name)
}

/// Lower a Lua body into a verifier image
pub(crate) fn lower(def: &FunctionDefinition) -> ModuleImage {
    let tokens = tokenize(&def.body);
    let locals = collect_locals(&tokens, &def.arg_names);
    let mut image = ModuleImage::new(def.name.name.clone());
    let mut entry = Routine::new(def.name.name.clone(), RoutineRole::Entry);

    let mut brackets: Vec<char> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let prev = if i > 0 { tokens.get(i - 1) } else { None };
        match &tokens[i] {
            Token::Sym(s) => {
                match s.as_str() {
                    "(" => brackets.push('('),
                    "[" => brackets.push('['),
                    "{" => brackets.push('{'),
                    ")" | "]" | "}" => {
                        brackets.pop();
                    }
                    _ => {}
                }
                i += 1;
            }
            Token::Name(n) if n == "function" => {
                let after_local = prev.map_or(false, |t| t.is_name("local"));
                let (chain, next) = read_chain(&tokens, i + 1);
                if !after_local && !chain.is_empty() {
                    image.nested_units.push(chain.join("."));
                }
                i = next;
            }
            Token::Name(n) => {
                let skip = KEYWORDS.contains(n.as_str())
                    || locals.contains(n)
                    || prev.map_or(false, |t| {
                        t.is_sym(".") || t.is_sym(":") || t.is_sym("::") || t.is_name("goto")
                    });
                if skip {
                    i += 1;
                    continue;
                }
                let (mut chain, next) = read_chain(&tokens, i);
                let in_constructor = brackets.last() == Some(&'{');
                let at_statement_level = !matches!(brackets.last(), Some('(') | Some('['));
                if chain.len() == 1 && in_constructor && tokens.get(next).map_or(false, |t| t.is_sym("=")) {
                    // table constructor key
                    i = next;
                    continue;
                }
                if chain.len() == 1 && at_statement_level && !in_constructor {
                    if let Some(eq) = assignment_operator(&tokens, next) {
                        let field = chain.remove(0);
                        if has_initializer(&tokens, eq) {
                            image
                                .routines
                                .push(Routine::new(field.clone(), RoutineRole::Initializer));
                        }
                        image.fields.push(field);
                        i = next;
                        continue;
                    }
                }
                if chain.len() > 1 && (chain[0] == "_G" || chain[0] == "_ENV") {
                    chain.remove(0);
                }
                let arity = call_arity(&tokens, next);
                let name = chain.pop().unwrap_or_default();
                let owner = if chain.is_empty() {
                    "_G".to_string()
                } else {
                    chain.join(".")
                };
                entry.push(Instruction::Invoke(CallSite::new(owner, name, arity)));
                i = next;
            }
            Token::Str | Token::Num => i += 1,
        }
    }

    image.routines.push(entry);
    image
}

/// Read `a.b:c` starting at `start`; returns the components and the index after them
fn read_chain(tokens: &[Token], start: usize) -> (Vec<String>, usize) {
    let mut chain = Vec::new();
    let Some(first) = tokens.get(start).and_then(Token::name) else {
        return (chain, start);
    };
    chain.push(first.to_string());
    let mut j = start + 1;
    while let (Some(sep), Some(Token::Name(part))) = (tokens.get(j), tokens.get(j + 1)) {
        if !(sep.is_sym(".") || sep.is_sym(":")) {
            break;
        }
        chain.push(part.clone());
        j += 2;
    }
    (chain, j)
}

/// `x = ...` or `x, y, z = ...` starting at the token after the first name;
/// returns the index of the `=`
fn assignment_operator(tokens: &[Token], mut k: usize) -> Option<usize> {
    loop {
        match tokens.get(k) {
            Some(t) if t.is_sym("=") => return Some(k),
            Some(t) if t.is_sym(",") => {
                if !matches!(tokens.get(k + 1), Some(Token::Name(_))) {
                    return None;
                }
                k += 2;
            }
            _ => return None,
        }
    }
}

/// False only when the values after the `=` at `eq` are plain literals
fn has_initializer(tokens: &[Token], eq: usize) -> bool {
    let mut k = eq + 1;
    loop {
        match tokens.get(k) {
            Some(Token::Str | Token::Num) => {}
            Some(t) if t.is_name("true") || t.is_name("false") || t.is_name("nil") => {}
            Some(t) if t.is_sym("-") && matches!(tokens.get(k + 1), Some(Token::Num)) => k += 1,
            _ => return true,
        }
        k += 1;
        match tokens.get(k) {
            Some(t) if t.is_sym(",") => k += 1,
            Some(Token::Sym(s)) if s != ";" => return true,
            _ => return false,
        }
    }
}

/// Argument count when `tokens[k]` opens a call, 0 for a plain reference
fn call_arity(tokens: &[Token], k: usize) -> usize {
    match tokens.get(k) {
        Some(Token::Str) => 1,
        Some(t) if t.is_sym("{") => 1,
        Some(t) if t.is_sym("(") => {
            if tokens.get(k + 1).map_or(false, |t| t.is_sym(")")) {
                return 0;
            }
            let mut depth = 0usize;
            let mut commas = 0;
            for t in &tokens[k..] {
                match t {
                    Token::Sym(s) if s == "(" || s == "{" || s == "[" => depth += 1,
                    Token::Sym(s) if s == ")" || s == "}" || s == "]" => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    Token::Sym(s) if s == "," && depth == 1 => commas += 1,
                    _ => {}
                }
            }
            commas + 1
        }
        _ => 0,
    }
}

fn collect_locals(tokens: &[Token], args: &[String]) -> HashSet<String> {
    let mut locals: HashSet<String> = args.iter().cloned().collect();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i].is_name("local") {
            if tokens.get(i + 1).map_or(false, |t| t.is_name("function")) {
                if let Some(n) = tokens.get(i + 2).and_then(Token::name) {
                    locals.insert(n.to_string());
                }
            } else {
                let mut j = i + 1;
                while let Some(n) = tokens.get(j).and_then(Token::name) {
                    locals.insert(n.to_string());
                    j += 1;
                    // `<const>` / `<close>` attributes
                    if tokens.get(j).map_or(false, |t| t.is_sym("<")) {
                        j += 3;
                    }
                    if tokens.get(j).map_or(false, |t| t.is_sym(",")) {
                        j += 1;
                    } else {
                        break;
                    }
                }
            }
        } else if tokens[i].is_name("for") {
            let mut j = i + 1;
            while let Some(n) = tokens.get(j).and_then(Token::name) {
                locals.insert(n.to_string());
                if tokens.get(j + 1).map_or(false, |t| t.is_sym(",")) {
                    j += 2;
                } else {
                    break;
                }
            }
        } else if tokens[i].is_name("function") {
            let (chain, mut j) = read_chain(tokens, i + 1);
            let method = chain.len() > 1
                && tokens
                    .get(j.saturating_sub(2))
                    .map_or(false, |t| t.is_sym(":"));
            if method {
                locals.insert("self".to_string());
            }
            if tokens.get(j).map_or(false, |t| t.is_sym("(")) {
                j += 1;
                while let Some(t) = tokens.get(j) {
                    match t {
                        Token::Name(n) => {
                            locals.insert(n.clone());
                        }
                        Token::Sym(s) if s == ")" => break,
                        _ => {}
                    }
                    j += 1;
                }
            }
        }
        i += 1;
    }
    locals
}

fn tokenize(src: &str) -> Vec<Token> {
    let b = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < b.len() {
        let c = b[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c == b'-' && b.get(i + 1) == Some(&b'-') {
            i += 2;
            match long_bracket_end(b, i) {
                Some(end) => i = end,
                None => {
                    while i < b.len() && b[i] != b'\n' {
                        i += 1;
                    }
                }
            }
            continue;
        }
        if c == b'[' {
            if let Some(end) = long_bracket_end(b, i) {
                out.push(Token::Str);
                i = end;
                continue;
            }
        }
        if c == b'"' || c == b'\'' {
            i += 1;
            while i < b.len() && b[i] != c {
                if b[i] == b'\\' {
                    i += 1;
                }
                i += 1;
            }
            i += 1;
            out.push(Token::Str);
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let start = i;
            while i < b.len() && (b[i].is_ascii_alphanumeric() || b[i] == b'_') {
                i += 1;
            }
            out.push(Token::Name(src[start..i].to_string()));
            continue;
        }
        if c.is_ascii_digit() || (c == b'.' && b.get(i + 1).map_or(false, u8::is_ascii_digit)) {
            i += 1;
            while i < b.len() {
                let d = b[i];
                let exponent_sign = (d == b'+' || d == b'-')
                    && matches!(b[i - 1], b'e' | b'E' | b'p' | b'P');
                if d.is_ascii_alphanumeric() || d == b'.' || exponent_sign {
                    i += 1;
                } else {
                    break;
                }
            }
            out.push(Token::Num);
            continue;
        }
        let rest = &src[i..];
        let sym = SYMBOLS_3
            .iter()
            .chain(SYMBOLS_2)
            .find(|s| rest.starts_with(**s))
            .map(|s| s.to_string())
            .unwrap_or_else(|| rest.chars().next().map(String::from).unwrap_or_default());
        i += sym.len().max(1);
        out.push(Token::Sym(sym));
    }
    out
}

/// End index of a long bracket (`[[ ]]`, `[==[ ]==]`) opening at `i`
fn long_bracket_end(b: &[u8], i: usize) -> Option<usize> {
    if b.get(i) != Some(&b'[') {
        return None;
    }
    let mut j = i + 1;
    while b.get(j) == Some(&b'=') {
        j += 1;
    }
    if b.get(j) != Some(&b'[') {
        return None;
    }
    let level = j - i - 1;
    let mut k = j + 1;
    while k < b.len() {
        if b[k] == b']' {
            let closes = (1..=level).all(|o| b.get(k + o) == Some(&b'='))
                && b.get(k + level + 1) == Some(&b']');
            if closes {
                return Some(k + level + 2);
            }
        }
        k += 1;
    }
    Some(b.len())
}
