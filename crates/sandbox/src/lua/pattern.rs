//! Work bounds for Lua pattern matching
//!
//! `string.find`, `match`, `gmatch` and `gsub` backtrack inside C, where
//! the instruction hook never runs. Before each call the worst-case step
//! count of the pattern against the actual subject is estimated, and calls
//! over [`PATTERN_STEP_BUDGET`] are refused.
//!
//! A repeated item can consume at most the longest run of subject bytes in
//! its class, so each `*`, `+` or `-` multiplies the estimate by that run
//! plus one, `?` by two, and `%b` or a back reference by the subject
//! length. An unanchored pattern is tried from every position.

/// Largest estimated step count a single pattern call may take
pub(crate) const PATTERN_STEP_BUDGET: u64 = 100_000_000;

enum Class<'p> {
    Any,
    Byte(u8),
    Escape(u8),
    Set { body: &'p [u8], negated: bool },
}

impl Class<'_> {
    fn matches(&self, c: u8) -> bool {
        match self {
            Class::Any => true,
            Class::Byte(b) => *b == c,
            Class::Escape(e) => escape_matches(*e, c),
            Class::Set { body, negated } => set_matches(body, c) != *negated,
        }
    }
}

fn escape_matches(class: u8, c: u8) -> bool {
    let matched = match class.to_ascii_lowercase() {
        b'a' => c.is_ascii_alphabetic(),
        b'c' => c.is_ascii_control(),
        b'd' => c.is_ascii_digit(),
        b'g' => c.is_ascii_graphic(),
        b'l' => c.is_ascii_lowercase(),
        b'p' => c.is_ascii_punctuation(),
        b's' => matches!(c, b' ' | b'\t'..=b'\r'),
        b'u' => c.is_ascii_uppercase(),
        b'w' => c.is_ascii_alphanumeric(),
        b'x' => c.is_ascii_hexdigit(),
        _ => return class == c,
    };
    if class.is_ascii_uppercase() {
        !matched
    } else {
        matched
    }
}

fn set_matches(body: &[u8], c: u8) -> bool {
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'%' && i + 1 < body.len() {
            if escape_matches(body[i + 1], c) {
                return true;
            }
            i += 2;
        } else if i + 2 < body.len() && body[i + 1] == b'-' {
            if body[i] <= c && c <= body[i + 2] {
                return true;
            }
            i += 3;
        } else {
            if body[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}

/// Index of the `]` closing the set opened at `open`, `None` if malformed
fn set_end(pattern: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    if pattern.get(i).copied() == Some(b'^') {
        i += 1;
    }
    loop {
        let c = *pattern.get(i)?;
        i += 1;
        if c == b'%' {
            i += 1;
        }
        if *pattern.get(i)? == b']' {
            return Some(i);
        }
    }
}

fn longest_run(subject: &[u8], class: &Class<'_>) -> u64 {
    let mut best = 0u64;
    let mut run = 0u64;
    for &c in subject {
        if class.matches(c) {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

/// Upper bound on the matcher steps for `pattern` over `subject`
///
/// A malformed pattern estimates to zero; Lua rejects it on its own.
pub(crate) fn worst_case_steps(subject: &[u8], pattern: &[u8]) -> u64 {
    let n = subject.len() as u64 + 1;
    let (mut i, mut steps) = match pattern.first().copied() {
        Some(b'^') => (1, 1u64),
        _ => (0, n),
    };
    while i < pattern.len() {
        let (class, next) = match pattern[i] {
            b'(' | b')' => {
                i += 1;
                continue;
            }
            b'%' => match pattern.get(i + 1).copied() {
                None => return 0,
                Some(b'b') => {
                    steps = steps.saturating_mul(n);
                    i += 4;
                    continue;
                }
                Some(b'f') => {
                    if pattern.get(i + 2).copied() != Some(b'[') {
                        return 0;
                    }
                    match set_end(pattern, i + 2) {
                        Some(end) => {
                            i = end + 1;
                            continue;
                        }
                        None => return 0,
                    }
                }
                Some(d) if d.is_ascii_digit() => {
                    steps = steps.saturating_mul(n);
                    i += 2;
                    continue;
                }
                Some(e) => (Class::Escape(e), i + 2),
            },
            b'[' => match set_end(pattern, i) {
                Some(end) => {
                    let negated = pattern.get(i + 1).copied() == Some(b'^');
                    let start = if negated { i + 2 } else { i + 1 };
                    (
                        Class::Set {
                            body: &pattern[start..end],
                            negated,
                        },
                        end + 1,
                    )
                }
                None => return 0,
            },
            b'.' => (Class::Any, i + 1),
            b => (Class::Byte(b), i + 1),
        };
        i = next;
        match pattern.get(i).copied() {
            Some(b'*' | b'+' | b'-') => {
                steps = steps.saturating_mul(longest_run(subject, &class) + 1);
                i += 1;
            }
            Some(b'?') => {
                steps = steps.saturating_mul(2);
                i += 1;
            }
            _ => {}
        }
    }
    steps
}
