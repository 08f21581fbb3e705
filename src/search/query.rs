//
// mailmirror - free text queries
//
// This file is part of mailmirror.
//
// mailmirror is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// mailmirror is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with mailmirror. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: EUPL-1.2 OR GPL-3.0-or-later

//! Parsing of user supplied search text and translation to `FTS5` match
//! expressions.
//!
//! ```text
//! query   := or
//! or      := and ( "OR" and )*
//! and     := unary ( "AND"? unary )*
//! unary   := "NOT" unary | primary
//! primary := WORD | WORD* | "PHRASE" | "(" query ")"
//! ```
//!
//! Operators are case insensitive. Every term is emitted quoted, so user
//! input never reaches the `FTS5` syntax unescaped. Parentheses and `NOT`
//! nest at most [`MAX_NESTING`] levels deep.

use std::borrow::Cow;

use crate::{
    error::{Error, ErrorKind, Result},
    utils::parsec::{
        any_char, delimited, either, map, map_res, match_literal, one_or_more, opt, pair, pred,
        prefix, quoted_string, whitespace_wrap, zero_or_more, Parser,
    },
};

bitflags! {
    /// Fields a free text query is matched against.
    #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct SearchFields: u8 {
        const SUBJECT = 0b001;
        const CONTENT = 0b010;
        const FROM    = 0b100;
    }
}

impl Default for SearchFields {
    fn default() -> Self {
        Self::all()
    }
}

impl SearchFields {
    /// Names of the `fts` columns.
    pub fn columns(self) -> Vec<&'static str> {
        [
            (Self::SUBJECT, "subject"),
            (Self::CONTENT, "content"),
            (Self::FROM, "_from"),
        ]
        .into_iter()
        .filter(|(f, _)| self.contains(*f))
        .map(|(_, c)| c)
        .collect()
    }
}

pub fn escape_double_quote(w: &str) -> Cow<str> {
    if w.contains('"') {
        Cow::from(w.replace('"', "\"\""))
    } else {
        Cow::from(w)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TextQuery {
    Term { text: String, prefix: bool },
    Phrase(String),
    And(Box<TextQuery>, Box<TextQuery>),
    Or(Box<TextQuery>, Box<TextQuery>),
    Not(Box<TextQuery>),
}

fn malformed<M: Into<Cow<'static, str>>>(msg: M) -> Error {
    Error::new(msg).set_kind(ErrorKind::Query)
}

/// How deep parentheses and negations may nest.
pub const MAX_NESTING: usize = 64;

/// Longest accepted query text, in bytes.
pub const MAX_QUERY_LEN: usize = 1024;

fn is_operator(word: &str) -> bool {
    ["AND", "OR", "NOT"]
        .iter()
        .any(|op| word.eq_ignore_ascii_case(op))
}

/// A run of characters up to whitespace, a parenthesis or a double quote.
fn word<'a>() -> impl Parser<'a, String> {
    whitespace_wrap(one_or_more(pred(any_char, |c: &char| {
        !c.is_whitespace() && !matches!(*c, '(' | ')' | '"')
    })))
    .map(|chars: Vec<char>| chars.into_iter().collect())
}

fn keyword<'a>(expected: &'static str) -> impl Parser<'a, ()> {
    map(
        pred(word(), move |w: &String| w.eq_ignore_ascii_case(expected)),
        |_| (),
    )
}

fn term<'a>() -> impl Parser<'a, TextQuery> {
    map_res(word(), |word: String| {
        if is_operator(&word) {
            return Err(());
        }
        let (text, prefix) = match word.strip_suffix('*') {
            Some(stem) => (stem.to_string(), true),
            None => (word, false),
        };
        if text.is_empty() || text.contains('*') {
            return Err(());
        }
        Ok(TextQuery::Term { text, prefix })
    })
}

fn phrase<'a>() -> impl Parser<'a, TextQuery> {
    whitespace_wrap(quoted_string()).map(TextQuery::Phrase)
}

fn group<'a>(depth: usize) -> impl Parser<'a, TextQuery> {
    move |input: &'a str| {
        if depth >= MAX_NESTING {
            return Err(input);
        }
        delimited(
            whitespace_wrap(match_literal("(")),
            query(depth + 1),
            whitespace_wrap(match_literal(")")),
        )
        .parse(input)
    }
}

fn negation<'a>(depth: usize) -> impl Parser<'a, TextQuery> {
    move |input: &'a str| {
        if depth >= MAX_NESTING {
            return Err(input);
        }
        prefix(keyword("NOT"), unary(depth + 1))
            .map(|operand| TextQuery::Not(Box::new(operand)))
            .parse(input)
    }
}

fn unary<'a>(depth: usize) -> impl Parser<'a, TextQuery> {
    move |input: &'a str| {
        either(
            negation(depth),
            either(group(depth), either(phrase(), term())),
        )
        .parse(input)
    }
}

/// Adjacent operands are joined by an implicit `AND`.
fn conjunction<'a>(depth: usize) -> impl Parser<'a, TextQuery> {
    move |input: &'a str| {
        map(
            pair(
                unary(depth),
                zero_or_more(prefix(opt(keyword("AND")), unary(depth))),
            ),
            |(first, rest): (TextQuery, Vec<TextQuery>)| {
                rest.into_iter().fold(first, |lhs, rhs| {
                    TextQuery::And(Box::new(lhs), Box::new(rhs))
                })
            },
        )
        .parse(input)
    }
}

fn query<'a>(depth: usize) -> impl Parser<'a, TextQuery> {
    move |input: &'a str| {
        map(
            pair(
                conjunction(depth),
                zero_or_more(prefix(keyword("OR"), conjunction(depth))),
            ),
            |(first, rest): (TextQuery, Vec<TextQuery>)| {
                rest.into_iter().fold(first, |lhs, rhs| {
                    TextQuery::Or(Box::new(lhs), Box::new(rhs))
                })
            },
        )
        .parse(input)
    }
}

impl TextQuery {
    pub fn parse(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Err(malformed("Empty query."));
        }
        if input.len() > MAX_QUERY_LEN {
            return Err(malformed(format!(
                "Query is longer than {} bytes.",
                MAX_QUERY_LEN
            )));
        }
        match query(0).parse(input) {
            Ok(("", ret)) => Ok(ret),
            Ok((rest, _)) | Err(rest) => Err(malformed(format!(
                "Could not parse query `{}` near `{}`.",
                input, rest
            ))
            .set_details(format!(
                "Parentheses and negations nest at most {} levels deep.",
                MAX_NESTING
            ))),
        }
    }

    /// Renders a `MATCH` expression restricted to `fields`.
    pub fn to_fts(&self, fields: SearchFields) -> Result<String> {
        if fields.is_empty() {
            return Err(Error::new("No field selected for a text search.")
                .set_kind(ErrorKind::ValueError));
        }
        let mut expr = String::new();
        self.render(&mut expr)?;
        Ok(format!("{{{}}} : ({})", fields.columns().join(" "), expr))
    }

    fn render(&self, s: &mut String) -> Result<()> {
        match self {
            Self::Term { text, prefix } => {
                s.push('"');
                s.push_str(&escape_double_quote(text));
                s.push('"');
                if *prefix {
                    s.push_str(" *");
                }
            }
            Self::Phrase(phrase) => {
                s.push('"');
                s.push_str(&escape_double_quote(phrase));
                s.push('"');
            }
            Self::And(lhs, rhs) => {
                // FTS5 only has binary NOT, so a negated operand must have a
                // positive partner.
                let (positive, op, other) = match (lhs.as_ref(), rhs.as_ref()) {
                    (Self::Not(_), Self::Not(_)) => {
                        return Err(malformed("A conjunction of negations matches nothing."))
                    }
                    (pos, Self::Not(neg)) | (Self::Not(neg), pos) => (pos, " NOT ", neg.as_ref()),
                    (l, r) => (l, " AND ", r),
                };
                s.push('(');
                positive.render(s)?;
                s.push_str(op);
                other.render(s)?;
                s.push(')');
            }
            Self::Or(lhs, rhs) => {
                if matches!(lhs.as_ref(), Self::Not(_)) || matches!(rhs.as_ref(), Self::Not(_)) {
                    return Err(malformed("Negation is only allowed next to a positive term."));
                }
                s.push('(');
                lhs.render(s)?;
                s.push_str(" OR ");
                rhs.render(s)?;
                s.push(')');
            }
            Self::Not(_) => {
                return Err(malformed("Negation is only allowed next to a positive term."));
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for TextQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
