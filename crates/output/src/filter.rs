//! Per-session record filter
//!
//! A client installs a filter with `FILTER: <expr>`. Expressions are a
//! conjunction of terms, each optionally negated:
//!
//! ```text
//! expr := term ("and" term)*
//! term := ["not"] primary
//! primary := far | mar | event | tcp | udp | icmp | proto N
//!          | [src|dst] host ADDR | [src|dst] port N | srcid ID
//! ```
//!
//! Address and port terms without a direction match either side of the
//! flow key. Records without a flow key never match address, port or
//! protocol terms.
//!
//! # Example
//!
//! ```
//! use flowcast_output::RecordFilter;
//!
//! let filter = RecordFilter::compile("tcp and not port 22").unwrap();
//! assert_eq!(filter.to_string(), "tcp and not port 22");
//! ```

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use flowcast_protocol::{FlowKey, FlowRecord, RecordKind, SourceIdentity};

use crate::error::FilterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Predicate {
    Kind(RecordKind),
    Proto(u8),
    Host(Side, IpAddr),
    Port(Side, u16),
    SourceId(SourceIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Term {
    negated: bool,
    predicate: Predicate,
}

/// Compiled record filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFilter {
    expression: String,
    terms: Vec<Term>,
}

impl RecordFilter {
    /// Compile a filter expression
    pub fn compile(expression: &str) -> Result<Self, FilterError> {
        let tokens: Vec<&str> = expression.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(FilterError::Empty);
        }

        let mut terms = Vec::new();
        let mut rest = &tokens[..];
        loop {
            let (term, after) = parse_term(rest)?;
            terms.push(term);
            match after {
                [] => break,
                [conj, tail @ ..] if conj.eq_ignore_ascii_case("and") => rest = tail,
                [other, ..] => return Err(FilterError::UnknownTerm(other.to_string())),
            }
        }

        Ok(Self {
            expression: tokens.join(" "),
            terms,
        })
    }

    /// The normalized expression text
    #[inline]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Check whether a record passes every term
    pub fn matches(&self, record: &FlowRecord) -> bool {
        self.terms
            .iter()
            .all(|term| term.predicate.matches(record) != term.negated)
    }
}

impl FromStr for RecordFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::compile(s)
    }
}

impl fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_term<'a>(tokens: &'a [&'a str]) -> Result<(Term, &'a [&'a str]), FilterError> {
    let (negated, tokens) = match tokens {
        [first, rest @ ..] if first.eq_ignore_ascii_case("not") => (true, rest),
        _ => (false, tokens),
    };
    let (predicate, rest) = parse_primary(tokens)?;
    Ok((Term { negated, predicate }, rest))
}

fn parse_primary<'a>(tokens: &'a [&'a str]) -> Result<(Predicate, &'a [&'a str]), FilterError> {
    let Some((first, rest)) = tokens.split_first() else {
        return Err(FilterError::MissingValue { term: "not" });
    };

    let word = first.to_ascii_lowercase();
    let predicate = match word.as_str() {
        "far" | "flow" => Predicate::Kind(RecordKind::Flow),
        "mar" => Predicate::Kind(RecordKind::Management),
        "event" => Predicate::Kind(RecordKind::Event),
        "tcp" => Predicate::Proto(6),
        "udp" => Predicate::Proto(17),
        "icmp" => Predicate::Proto(1),
        "proto" => {
            let (value, rest) = value_of("proto", rest)?;
            let proto = value
                .parse()
                .map_err(|_| FilterError::invalid("proto", value))?;
            return Ok((Predicate::Proto(proto), rest));
        }
        "srcid" => {
            let (value, rest) = value_of("srcid", rest)?;
            let id = value
                .parse()
                .map_err(|_| FilterError::invalid("srcid", value))?;
            return Ok((Predicate::SourceId(id), rest));
        }
        "src" | "dst" => {
            let side = if word == "src" { Side::Src } else { Side::Dst };
            let Some((next, rest)) = rest.split_first() else {
                return Err(FilterError::MissingValue { term: "src/dst" });
            };
            return parse_endpoint(side, next, rest);
        }
        "host" | "port" => return parse_endpoint(Side::Either, first, rest),
        _ => return Err(FilterError::UnknownTerm(first.to_string())),
    };
    Ok((predicate, rest))
}

fn parse_endpoint<'a>(
    side: Side,
    keyword: &str,
    tokens: &'a [&'a str],
) -> Result<(Predicate, &'a [&'a str]), FilterError> {
    if keyword.eq_ignore_ascii_case("host") {
        let (value, rest) = value_of("host", tokens)?;
        let addr = value
            .parse()
            .map_err(|_| FilterError::invalid("host", value))?;
        Ok((Predicate::Host(side, addr), rest))
    } else if keyword.eq_ignore_ascii_case("port") {
        let (value, rest) = value_of("port", tokens)?;
        let port = value
            .parse()
            .map_err(|_| FilterError::invalid("port", value))?;
        Ok((Predicate::Port(side, port), rest))
    } else {
        Err(FilterError::UnknownTerm(keyword.to_string()))
    }
}

fn value_of<'a>(
    term: &'static str,
    tokens: &'a [&'a str],
) -> Result<(&'a str, &'a [&'a str]), FilterError> {
    tokens
        .split_first()
        .map(|(value, rest)| (*value, rest))
        .ok_or(FilterError::MissingValue { term })
}

impl Predicate {
    fn matches(&self, record: &FlowRecord) -> bool {
        match self {
            Self::Kind(kind) => record.kind == *kind,
            Self::Proto(proto) => record.flow.as_ref().is_some_and(|k| k.proto() == *proto),
            Self::Host(side, addr) => record
                .flow
                .as_ref()
                .is_some_and(|k| side_matches(*side, endpoints(k), addr)),
            Self::Port(side, port) => record.flow.as_ref().is_some_and(|k| {
                let (sport, dport) = k.ports();
                side_matches(*side, (sport, dport), port)
            }),
            Self::SourceId(id) => {
                let source = match &record.mar {
                    Some(mar) => Some(mar.source),
                    None => record.transport.as_ref().and_then(|t| t.source),
                };
                source == Some(*id)
            }
        }
    }
}

fn endpoints(key: &FlowKey) -> (IpAddr, IpAddr) {
    match key {
        FlowKey::V4 { src, dst, .. } => (IpAddr::V4(*src), IpAddr::V4(*dst)),
        FlowKey::V6 { src, dst, .. } => (IpAddr::V6(*src), IpAddr::V6(*dst)),
    }
}

#[inline]
fn side_matches<T: PartialEq>(side: Side, (src, dst): (T, T), want: &T) -> bool {
    match side {
        Side::Src => src == *want,
        Side::Dst => dst == *want,
        Side::Either => src == *want || dst == *want,
    }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod tests;
