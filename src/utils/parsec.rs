//
// mailmirror - parsec
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

//! Parser combinators.
//!
//! A parser consumes a prefix of its input and returns the rest together
//! with its output. On failure it returns the input it could not parse.

pub type Result<'a, Output> = std::result::Result<(&'a str, Output), &'a str>;

pub trait Parser<'a, Output> {
    fn parse(&self, input: &'a str) -> Result<'a, Output>;

    fn map<F, NewOutput>(self, map_fn: F) -> BoxedParser<'a, NewOutput>
    where
        Self: Sized + 'a,
        Output: 'a,
        NewOutput: 'a,
        F: Fn(Output) -> NewOutput + 'a,
    {
        BoxedParser::new(map(self, map_fn))
    }
}

impl<'a, F, Output> Parser<'a, Output> for F
where
    F: Fn(&'a str) -> Result<Output>,
{
    fn parse(&self, input: &'a str) -> Result<'a, Output> {
        self(input)
    }
}

pub struct BoxedParser<'a, Output> {
    parser: Box<dyn Parser<'a, Output> + 'a>,
}

impl<'a, Output> BoxedParser<'a, Output> {
    fn new<P>(parser: P) -> Self
    where
        P: Parser<'a, Output> + 'a,
    {
        BoxedParser {
            parser: Box::new(parser),
        }
    }
}

impl<'a, Output> Parser<'a, Output> for BoxedParser<'a, Output> {
    fn parse(&self, input: &'a str) -> Result<'a, Output> {
        self.parser.parse(input)
    }
}

pub fn map<'a, P, F, A, B>(parser: P, map_fn: F) -> impl Parser<'a, B>
where
    P: Parser<'a, A>,
    F: Fn(A) -> B,
{
    move |input| {
        parser
            .parse(input)
            .map(|(next_input, result)| (next_input, map_fn(result)))
    }
}

/// Like [`map`], but a failing `map_fn` fails the parser at the input it
/// started from.
pub fn map_res<'a, P, F, E, A, B>(parser: P, map_fn: F) -> impl Parser<'a, B>
where
    P: Parser<'a, A>,
    F: Fn(A) -> std::result::Result<B, E>,
{
    move |input| {
        parser.parse(input).and_then(|(next_input, result)| {
            map_fn(result).map_or_else(|_| Err(input), |res| Ok((next_input, res)))
        })
    }
}

pub fn match_literal<'a>(expected: &'static str) -> impl Parser<'a, ()> {
    move |input: &'a str| match input.get(0..expected.len()) {
        Some(next) if next == expected => Ok((&input[expected.len()..], ())),
        _ => Err(input),
    }
}

pub fn pair<'a, P1, P2, R1, R2>(parser1: P1, parser2: P2) -> impl Parser<'a, (R1, R2)>
where
    P1: Parser<'a, R1>,
    P2: Parser<'a, R2>,
{
    move |input| {
        parser1.parse(input).and_then(|(next_input, result1)| {
            parser2
                .parse(next_input)
                .map(|(last_input, result2)| (last_input, (result1, result2)))
        })
    }
}

pub fn left<'a, P1, P2, R1, R2>(parser1: P1, parser2: P2) -> impl Parser<'a, R1>
where
    P1: Parser<'a, R1>,
    P2: Parser<'a, R2>,
{
    map(pair(parser1, parser2), |(left, _right)| left)
}

pub fn right<'a, P1, P2, R1, R2>(parser1: P1, parser2: P2) -> impl Parser<'a, R2>
where
    P1: Parser<'a, R1>,
    P2: Parser<'a, R2>,
{
    map(pair(parser1, parser2), |(_left, right)| right)
}

pub fn one_or_more<'a, P, A>(parser: P) -> impl Parser<'a, Vec<A>>
where
    P: Parser<'a, A>,
{
    move |mut input| {
        let mut result = Vec::new();

        if let Ok((next_input, first_item)) = parser.parse(input) {
            input = next_input;
            result.push(first_item);
        } else {
            return Err(input);
        }

        while let Ok((next_input, next_item)) = parser.parse(input) {
            input = next_input;
            result.push(next_item);
        }

        Ok((input, result))
    }
}

pub fn zero_or_more<'a, P, A>(parser: P) -> impl Parser<'a, Vec<A>>
where
    P: Parser<'a, A>,
{
    move |mut input| {
        let mut result = Vec::new();

        while let Ok((next_input, next_item)) = parser.parse(input) {
            input = next_input;
            result.push(next_item);
        }

        Ok((input, result))
    }
}

pub fn pred<'a, P, A, F>(parser: P, predicate: F) -> impl Parser<'a, A>
where
    P: Parser<'a, A>,
    F: Fn(&A) -> bool,
{
    move |input| {
        if let Ok((next_input, value)) = parser.parse(input) {
            if predicate(&value) {
                return Ok((next_input, value));
            }
        }
        Err(input)
    }
}

pub fn any_char(input: &str) -> Result<char> {
    input
        .chars()
        .next()
        .map_or_else(|| Err(input), |next| Ok((&input[next.len_utf8()..], next)))
}

pub fn whitespace_char<'a>() -> impl Parser<'a, char> {
    pred(any_char, |c| c.is_whitespace())
}

pub fn space0<'a>() -> impl Parser<'a, Vec<char>> {
    zero_or_more(whitespace_char())
}

/// Discards whitespace around `parser`.
pub fn whitespace_wrap<'a, P, A>(parser: P) -> impl Parser<'a, A>
where
    P: Parser<'a, A>,
{
    right(space0(), left(parser, space0()))
}

/// Text between double quotes, which cannot itself contain one.
pub fn quoted_string<'a>() -> impl Parser<'a, String> {
    map(
        right(
            match_literal("\""),
            left(
                zero_or_more(pred(any_char, |c| *c != '"')),
                match_literal("\""),
            ),
        ),
        |chars| chars.into_iter().collect(),
    )
}

pub fn either<'a, P1, P2, A>(parser1: P1, parser2: P2) -> impl Parser<'a, A>
where
    P1: Parser<'a, A>,
    P2: Parser<'a, A>,
{
    move |input| match parser1.parse(input) {
        ok @ Ok(_) => ok,
        Err(_) => parser2.parse(input),
    }
}

/// Runs `pre`, discards its output and continues with `parser`.
pub fn prefix<'a, PN, P, R, RN>(pre: PN, parser: P) -> impl Parser<'a, R>
where
    PN: Parser<'a, RN>,
    P: Parser<'a, R>,
{
    move |input| {
        pre.parse(input)
            .and_then(|(last_input, _)| parser.parse(last_input))
    }
}

pub fn delimited<'a, PNL, PNR, LN, RN, P, R>(
    lparser: PNL,
    mid: P,
    rparser: PNR,
) -> impl Parser<'a, R>
where
    PNL: Parser<'a, LN>,
    PNR: Parser<'a, RN>,
    P: Parser<'a, R>,
{
    move |input| {
        lparser.parse(input).and_then(|(next_input, _)| {
            mid.parse(next_input).and_then(|(last_input, result)| {
                rparser.parse(last_input).map(|(rest, _)| (rest, result))
            })
        })
    }
}

pub fn opt<'a, P, A>(opt_parser: P) -> impl Parser<'a, Option<A>>
where
    P: Parser<'a, A>,
{
    move |input| match opt_parser.parse(input) {
        Ok((next_input, result)) => Ok((next_input, Some(result))),
        Err(_) => Ok((input, None)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsec_list() {
        fn number<'a>() -> impl Parser<'a, u32> {
            map_res(
                whitespace_wrap(one_or_more(pred(any_char, |c| c.is_ascii_digit()))),
                |digits: Vec<char>| digits.into_iter().collect::<String>().parse::<u32>(),
            )
        }

        fn list<'a>() -> impl Parser<'a, Vec<u32>> {
            move |input| {
                delimited(
                    whitespace_wrap(match_literal("[")),
                    map(
                        pair(
                            opt(number()),
                            zero_or_more(prefix(match_literal(","), number())),
                        ),
                        |(first, mut rest): (Option<u32>, Vec<u32>)| match first {
                            Some(first) => {
                                rest.insert(0, first);
                                rest
                            }
                            None => rest,
                        },
                    ),
                    whitespace_wrap(match_literal("]")),
                )
                .parse(input)
            }
        }

        assert_eq!(Ok(("", vec![])), list().parse("[]"));
        assert_eq!(Ok(("", vec![1, 22, 333])), list().parse(" [ 1, 22 ,333 ] "));
        assert_eq!(Ok(("tail", vec![4])), list().parse("[4] tail"));
        assert_eq!(Err("x]"), list().parse("[x]"));
        assert_eq!(Err("99999999999]"), list().parse("[99999999999]"));
        assert_eq!(
            Ok(("", "a b".to_string())),
            either(quoted_string(), number().map(|n| n.to_string())).parse("\"a b\"")
        );
        assert!(quoted_string().parse("\"open").is_err());
        assert_eq!(Ok(("b", 'a')), any_char.parse("ab"));
        assert_eq!(Err(""), any_char.parse(""));
    }
}
