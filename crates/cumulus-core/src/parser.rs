//! Template parser.
//!
//! One statement per line: a command (`action entity key=value …`), an
//! assignment (`ident = <command or value>`) or a comment (`#` / `//`).
//! Parameter values are classified lexically and nothing more: unquoted
//! CIDR and IP tokens normalize through `std::net`, bare tokens try integer
//! then float then fall back to the raw string, quoted strings stay
//! verbatim. `$name`, `{name}` and `@name` become reference, hole and alias
//! entries on the command node.
//!
//! Built on `nom` with `nom_locate` spans so failures report the line and
//! column of the offending region.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, line_ending, not_line_ending, satisfy},
    combinator::{all_consuming, map, not, opt, recognize, value},
    error::{context, ContextError, ParseError as NomParseError, VerboseError, VerboseErrorKind},
    multi::{many0, many1, separated_list1},
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};
use nom_locate::LocatedSpan;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use thiserror::Error;

use crate::ast::values::is_bare_char;
use crate::ast::*;

/// Input type with location tracking.
pub type NomSpan<'a> = LocatedSpan<&'a str>;

// =============================================================================
// PUBLIC API
// =============================================================================

/// Parse a complete template script from source text.
pub fn parse_script(input: &str) -> Result<Script, ParseError> {
    let span = NomSpan::new(input);
    match all_consuming(script::<VerboseError<NomSpan>>)(span) {
        Ok((_, script)) => Ok(script),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(ParseError::from_verbose(input, e))
        }
        Err(nom::Err::Incomplete(_)) => Err(ParseError {
            line: 0,
            column: 0,
            message: "incomplete input".into(),
            snippet: String::new(),
        }),
    }
}

/// A syntax error with the position of the farthest reached input.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("syntax error at line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub column: usize,
    pub message: String,
    /// The offending source line, for caret-style reporting by callers.
    pub snippet: String,
}

impl ParseError {
    fn from_verbose(input: &str, err: VerboseError<NomSpan>) -> Self {
        // The first entry is the deepest failure; outer entries carry the
        // `context(..)` labels wrapped around it.
        let (line, column, base) = match err.errors.first() {
            Some((span, kind)) => {
                let base = match kind {
                    VerboseErrorKind::Context(ctx) => format!("expected {}", ctx),
                    VerboseErrorKind::Char(c) => format!("expected '{}'", c),
                    VerboseErrorKind::Nom(_) => {
                        let region = span.fragment().lines().next().unwrap_or("");
                        let quote: String = region.chars().take(24).collect();
                        let ellipsis = if region.chars().count() > 24 { "…" } else { "" };
                        format!("unexpected '{}{}'", quote, ellipsis)
                    }
                };
                (span.location_line(), span.get_utf8_column(), base)
            }
            None => (1, 1, "invalid template".to_string()),
        };

        let contexts: Vec<&str> = err
            .errors
            .iter()
            .filter_map(|(_, kind)| match kind {
                VerboseErrorKind::Context(ctx) => Some(*ctx),
                _ => None,
            })
            .collect();

        let message = if contexts.is_empty() {
            base
        } else {
            format!("{} (in {})", base, contexts.join(" in "))
        };

        let snippet = input
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("")
            .trim_end()
            .to_string();

        ParseError {
            line,
            column,
            message,
            snippet,
        }
    }
}

// =============================================================================
// SCRIPT & STATEMENTS
// =============================================================================

fn script<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, Script, E> {
    let (input, statements) = many1(delimited(
        many0(blank_line),
        context("statement", statement),
        many0(blank_line),
    ))(input)?;
    let (input, _) = ws(input)?;
    Ok((input, Script { statements }))
}

fn statement<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, Statement, E> {
    delimited(
        ws,
        alt((
            map(command, Statement::Command),
            map(assignment, Statement::Assignment),
            map(comment, Statement::Comment),
        )),
        ws,
    )(input)
}

fn blank_line<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, (), E> {
    value((), pair(ws, line_ending))(input)
}

fn comment<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    let (input, raw) = recognize(pair(alt((tag("//"), tag("#"))), not_line_ending))(input)?;
    Ok((input, raw.fragment().to_string()))
}

// =============================================================================
// COMMANDS & ASSIGNMENTS
// =============================================================================

fn command<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CommandNode, E> {
    let (input, action) = action_token(input)?;
    let (input, _) = must_ws(input)?;
    let (input, entity) = entity_token(input)?;
    let (input, raw_params) = opt(preceded(must_ws, params))(input)?;

    let mut cmd = CommandNode::new(action, entity);
    for (key, val) in raw_params.unwrap_or_default() {
        match val {
            CompositeValue::Ref {
                name,
                resolved: None,
            } => cmd.refs.push((key, name)),
            CompositeValue::Hole { name, filled: None } => cmd.holes.push((key, name)),
            other => cmd.params.push((key, other)),
        }
    }
    Ok((input, cmd))
}

fn assignment<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, AssignmentNode, E> {
    let (input, ident) = identifier(input)?;
    let (input, _) = equal(input)?;
    let (input, expr) = context(
        "assignment expression",
        alt((
            map(command, AssignExpr::Command),
            map(composite_value, AssignExpr::Value),
        )),
    )(input)?;
    Ok((input, AssignmentNode { ident, expr }))
}

fn params<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, Vec<(String, CompositeValue)>, E> {
    many1(param)(input)
}

fn param<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, (String, CompositeValue), E> {
    let (input, key) = identifier(input)?;
    let (input, _) = equal(input)?;
    let (input, val) = context("parameter value", composite_value)(input)?;
    let (input, _) = ws(input)?;
    Ok((input, (key, val)))
}

// =============================================================================
// VALUES
// =============================================================================

fn composite_value<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    alt((list_value, single_value))(input)
}

fn list_value<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    map(
        delimited(
            pair(char('['), ws),
            separated_list1(delimited(ws, char(','), ws), single_value),
            pair(ws, char(']')),
        ),
        CompositeValue::List,
    )(input)
}

fn single_value<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    alt((ref_value, no_ref_value))(input)
}

fn ref_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    map(preceded(char('$'), identifier), CompositeValue::reference)(input)
}

fn no_ref_value<'a, E: NomParseError<NomSpan<'a>> + ContextError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    alt((
        alias_value,
        // typed values keep their classification under matching quotes
        delimited(char('"'), custom_typed_value, char('"')),
        delimited(char('\''), custom_typed_value, char('\'')),
        custom_typed_value,
        map(single_quoted, |s| {
            CompositeValue::Literal(ParamValue::Str(s))
        }),
        map(double_quoted, |s| {
            CompositeValue::Literal(ParamValue::Str(s))
        }),
        hole_value,
        map(bare_token, |text| {
            CompositeValue::Literal(classify_bare(text))
        }),
    ))(input)
}

fn alias_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    let (input, name) = preceded(
        char('@'),
        alt((map(bare_token, str::to_string), single_quoted, double_quoted)),
    )(input)?;
    Ok((input, CompositeValue::alias(name)))
}

fn hole_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    map(
        delimited(pair(char('{'), ws), identifier, pair(ws, char('}'))),
        CompositeValue::hole,
    )(input)
}

/// CIDR, IP or integer-range token. Guarded so it only matches a complete
/// bare token; `10.0.0.0.1` falls through to the plain-string rule.
fn custom_typed_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, CompositeValue, E> {
    let (rest, val) = alt((cidr_value, ip_value, int_range_value))(input)?;
    let (rest, _) = not(satisfy(is_bare_char))(rest)?;
    Ok((rest, CompositeValue::Literal(val)))
}

fn cidr_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, ParamValue, E> {
    let (rest, raw) = recognize(tuple((dotted_quad, char('/'), digit1)))(input)?;
    match normalize_cidr(raw.fragment()) {
        Some(cidr) => Ok((rest, ParamValue::Cidr(cidr))),
        None => Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

fn ip_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, ParamValue, E> {
    let (rest, raw) = recognize(dotted_quad)(input)?;
    match raw.fragment().parse::<Ipv4Addr>() {
        Ok(ip) => Ok((rest, ParamValue::Ip(ip.to_string()))),
        Err(_) => Err(nom::Err::Error(E::from_error_kind(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

/// `1024-2048` — matched as a typed token but carried as its raw text,
/// since no numeric classification applies to a range.
fn int_range_value<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, ParamValue, E> {
    let (rest, raw) = recognize(tuple((digit1, char('-'), digit1)))(input)?;
    Ok((rest, ParamValue::Str(raw.fragment().to_string())))
}

fn dotted_quad<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, NomSpan<'a>, E> {
    recognize(tuple((
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
        char('.'),
        digit1,
    )))(input)
}

// =============================================================================
// TOKENS
// =============================================================================

fn action_token<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    map(take_while1(|c: char| c.is_ascii_lowercase()), |s: NomSpan| {
        s.fragment().to_string()
    })(input)
}

fn entity_token<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    map(
        take_while1(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()),
        |s: NomSpan| s.fragment().to_string(),
    )(input)
}

fn identifier<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    map(
        take_while1(|c: char| c.is_ascii_alphanumeric() || "._-".contains(c)),
        |s: NomSpan| s.fragment().to_string(),
    )(input)
}

fn bare_token<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, &'a str, E> {
    map(take_while1(is_bare_char), |s: NomSpan<'a>| *s.fragment())(input)
}

fn single_quoted<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    map(
        delimited(char('\''), take_while(|c| c != '\''), char('\'')),
        |s: NomSpan| s.fragment().to_string(),
    )(input)
}

fn double_quoted<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, String, E> {
    map(
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        |s: NomSpan| s.fragment().to_string(),
    )(input)
}

fn equal<'a, E: NomParseError<NomSpan<'a>>>(input: NomSpan<'a>) -> IResult<NomSpan<'a>, (), E> {
    value((), delimited(ws, char('='), ws))(input)
}

fn ws<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, NomSpan<'a>, E> {
    take_while(|c| c == ' ' || c == '\t')(input)
}

fn must_ws<'a, E: NomParseError<NomSpan<'a>>>(
    input: NomSpan<'a>,
) -> IResult<NomSpan<'a>, NomSpan<'a>, E> {
    take_while1(|c| c == ' ' || c == '\t')(input)
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Bare tokens classify as integer, then float, then raw string.
fn classify_bare(text: &str) -> ParamValue {
    if let Ok(i) = text.parse::<i64>() {
        ParamValue::Int(i)
    } else if let Ok(f) = text.parse::<f64>() {
        ParamValue::Float(f)
    } else {
        ParamValue::Str(text.to_string())
    }
}

/// Normalize `a.b.c.d/len` to its network address, e.g. `10.0.2.1/16`
/// becomes `10.0.0.0/16`.
fn normalize_cidr(text: &str) -> Option<String> {
    let (addr, prefix) = text.split_once('/')?;
    let ip: Ipv4Addr = addr.parse().ok()?;
    let prefix: u8 = prefix.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let mask = if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    };
    let network = Ipv4Addr::from(u32::from(ip) & mask);
    Some(format!("{}/{}", network, prefix))
}

// =============================================================================
// TESTS
// =============================================================================
