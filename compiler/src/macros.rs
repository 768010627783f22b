// macros.rs — `$name(args)` macro processor
//
// Scans code-block text into literal runs and macro invocations, expands
// macro arguments first (they may hold nested macros), then asks a
// `MacroHandler` for each invocation's replacement. Also provides the
// comma/paren helpers shared by every macro implementation.
//
// Preconditions: none.
// Postconditions: text outside macro invocations is copied unchanged;
//   an escaped `\$` is copied through as `\$` (see `lexer::unescape_dollars`).
// `${name}` reads a parameter through the handler, falling back to a few
// environment constants. A `$$` that does not start a meta-macro is copied
// through unchanged.
//
// Failure modes: `$` with no following `(` (E0300); handler failures are
//   wrapped with the macro name, parameter and original code (E0301);
//   `${` without `}` (E0307); a `${name}` nothing defines (E0308).
// Side effects: logs a warning for each unrecognized macro.

use std::collections::HashMap;

use crate::diag::{codes, CgError, Result};
use crate::lexer::{self, Span, Token};

// ── Segments ────────────────────────────────────────────────────────────────

/// One `$name(args)` occurrence in template text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroInvocation<'a> {
    /// Macro name, trimmed. May itself contain `$` (meta-macro).
    pub name: &'a str,
    /// Raw argument text between the balanced parentheses.
    pub args: &'a str,
    /// From the `$` to the closing paren, inclusive.
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    Literal(&'a str),
    Macro(MacroInvocation<'a>),
    /// `${name}`, with the name trimmed.
    Variable { name: &'a str, span: Span },
}

/// Split `code` into literal runs and macro invocations.
///
/// A `$` whose closing paren is never found turns the rest of the text into
/// a literal. Escaped dollars stay inside literal runs.
pub fn scan(code: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut resume = 0;

    for (tok, span) in lexer::lex(code) {
        if span.start < resume || tok != Token::Dollar {
            continue;
        }

        let rest = &code[span.end..];
        if rest.starts_with('$') && !starts_meta_macro(&rest[1..]) {
            // Literal `$$`: both dollars stay in the current literal run.
            resume = span.end + 1;
            continue;
        }

        if rest.starts_with('{') {
            let close = find_from(code, "}", span.end).ok_or_else(|| {
                CgError::macro_error(format!("Failed to find '}}' in \"{}\".", code))
                    .with_code(codes::E0307)
                    .with_span(span)
            })?;
            if literal_start < span.start {
                segments.push(Segment::Literal(&code[literal_start..span.start]));
            }
            segments.push(Segment::Variable {
                name: code[span.end + 1..close].trim(),
                span: Span::new(span.start, close + 1),
            });
            literal_start = close + 1;
            resume = literal_start;
            continue;
        }

        let open = find_from(code, "(", span.end).ok_or_else(|| {
            CgError::macro_error(format!("Failed to find open paren in \"{}\".", code))
                .with_code(codes::E0300)
                .with_span(span)
        })?;

        let Some(close) = find_closed_paren(code, open) else {
            break;
        };

        if literal_start < span.start {
            segments.push(Segment::Literal(&code[literal_start..span.start]));
        }
        segments.push(Segment::Macro(MacroInvocation {
            name: code[span.end..open].trim(),
            args: &code[open + 1..close],
            span: Span::new(span.start, close + 1),
        }));
        literal_start = close + 1;
        resume = literal_start;
    }

    if literal_start < code.len() {
        segments.push(Segment::Literal(&code[literal_start..]));
    }
    Ok(segments)
}

/// `$$def(..)` is a meta-macro; `$$` before anything but a name is literal.
fn starts_meta_macro(after: &str) -> bool {
    after
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
}

// ── Paren and comma scanning ────────────────────────────────────────────────

fn find_from(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    haystack
        .get(from..)
        .and_then(|rest| rest.find(needle))
        .map(|i| i + from)
}

/// Index of the `)` balancing the `(` at `open`, or `None`.
///
/// Walks the nearer of the next `(` and the next `)`: an open paren raises
/// the pending count, a close paren lowers it, and the close that brings it
/// to zero is the match.
pub fn find_closed_paren(code: &str, open: usize) -> Option<usize> {
    if code.as_bytes().get(open) != Some(&b'(') {
        return None;
    }

    let mut pending = 1usize;
    let mut next_open = find_from(code, "(", open + 1);
    let mut next_close = find_from(code, ")", open + 1);

    loop {
        let close = next_close?;
        match next_open {
            Some(o) if o < close => {
                pending += 1;
                next_open = find_from(code, "(", o + 1);
            }
            _ => {
                pending -= 1;
                if pending == 0 {
                    return Some(close);
                }
                next_close = find_from(code, ")", close + 1);
            }
        }
    }
}

/// Index of the first `needle` at or after `from` that is not nested inside
/// parentheses.
pub fn index_of(needle: &str, code: &str, from: usize) -> Option<usize> {
    let mut search_from = from;
    loop {
        let found = find_from(code, needle, search_from);
        let paren = find_from(code, "(", search_from);
        match (found, paren) {
            (Some(f), Some(p)) if p < f => {
                search_from = find_closed_paren(code, p)?;
            }
            _ => return found,
        }
    }
}

/// Split a macro parameter string on top-level commas.
///
/// Items are trimmed; an empty trailing item is dropped.
pub fn parse_list(parameters: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut previous = 0;
    while let Some(comma) = index_of(",", parameters, previous) {
        result.push(parameters[previous..comma].trim().to_string());
        previous = comma + 1;
    }
    let last = parameters[previous..].trim();
    if !last.is_empty() {
        result.push(last.to_string());
    }
    result
}

// ── Processing ──────────────────────────────────────────────────────────────

/// Resolves a single macro. `Ok(None)` means the name is not recognized.
pub trait MacroHandler {
    fn replace_macro(&self, name: &str, parameter: &str) -> Result<Option<String>>;

    /// Text for `${name}`, or `None` when the handler has no such variable.
    fn replace_variable(&self, _name: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Values for `${NAME}` that no parameter defines.
pub fn constant(name: &str) -> Option<String> {
    match name {
        "PI" | "pi" => Some(std::f64::consts::PI.to_string()),
        "E" | "e" => Some(std::f64::consts::E.to_string()),
        "TMPDIR" => Some(std::env::temp_dir().display().to_string()),
        "CWD" => std::env::current_dir()
            .ok()
            .map(|d| d.display().to_string()),
        "HOME" | "PTII" => std::env::var(name).ok(),
        "USERNAME" => std::env::var("USER").ok(),
        _ => None,
    }
}

/// Expand every macro in `code` through `handler`.
pub fn process_code(code: &str, handler: &dyn MacroHandler) -> Result<String> {
    if !lexer::has_macro(code) {
        return Ok(code.to_string());
    }

    let mut result = String::with_capacity(code.len());
    for segment in scan(code)? {
        match segment {
            Segment::Literal(text) => result.push_str(text),
            Segment::Macro(inv) => {
                let parameter = process_code(inv.args.trim(), handler)?;
                let replaced = expand(inv.name, &parameter, handler).map_err(|e| {
                    CgError::macro_error(format!(
                        "Failed to replace the parameter \"{}\" in the macro \"{}\".\nInitial code was:\n{}",
                        parameter, inv.name, code
                    ))
                    .with_code(codes::E0301)
                    .with_span(inv.span)
                    .caused_by(e)
                })?;
                result.push_str(&replaced);
            }
            Segment::Variable { name, span } => {
                let value = match handler.replace_variable(name)? {
                    Some(value) => value,
                    None => constant(name).ok_or_else(|| {
                        CgError::macro_error(format!(
                            "Failed to find '{}' variable in scope, code was \"{}\".",
                            name, code
                        ))
                        .with_code(codes::E0308)
                        .with_span(span)
                    })?,
                };
                result.push_str(&value);
            }
        }
    }
    Ok(result)
}

fn expand(name: &str, parameter: &str, handler: &dyn MacroHandler) -> Result<String> {
    // `$x$def(p)`: the name is computed, `x` is kept literally after a `$`.
    if let Some(idx) = name.find('$') {
        let inner = expand(&name[idx + 1..], parameter, handler)?;
        return Ok(format!("${}{}", &name[..idx], inner));
    }

    match handler.replace_macro(name, parameter)? {
        Some(text) => Ok(text),
        None => {
            log::warn!("unrecognized macro ${}({}) left unexpanded", name, parameter);
            Ok(format!("${}({})", name, parameter))
        }
    }
}

// ── User macros ─────────────────────────────────────────────────────────────

/// An externally supplied macro, consulted after the built-ins and the
/// adapter's own method table.
pub trait UserMacro {
    /// Reject unusable argument lists before `handle_macro` runs.
    fn check_arguments(&self, arguments: &[String]) -> std::result::Result<(), String>;

    fn handle_macro(&self, arguments: &[String]) -> std::result::Result<String, String>;
}

/// User macros keyed by macro name.
#[derive(Default)]
pub struct UserMacroRegistry {
    macros: HashMap<String, Box<dyn UserMacro>>,
}

impl UserMacroRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, user_macro: Box<dyn UserMacro>) {
        self.macros.insert(name.into(), user_macro);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.macros.len()
    }

    pub fn is_empty(&self) -> bool {
        self.macros.is_empty()
    }

    /// Run the named user macro, or `None` if no such macro is registered.
    pub fn invoke(&self, name: &str, parameter: &str) -> Option<Result<String>> {
        let user_macro = self.macros.get(name)?;
        let arguments = parse_list(parameter);
        let outcome = user_macro
            .check_arguments(&arguments)
            .and_then(|()| user_macro.handle_macro(&arguments));
        Some(outcome.map_err(|message| {
            CgError::macro_error(format!("Failed to invoke user macro (${})", name))
                .with_code(codes::E0303)
                .with_cause(message, None)
        }))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
