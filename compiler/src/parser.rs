// Parser for the text form of module listings.
//
// Grammar (one module per row):
//
//   listing := NL* (row (NL+ row)*)? NL*
//   row     := position class shape attr*
//   shape   := '[' NUMBER (',' NUMBER)* ']'
//   attr    := IDENT ('.' IDENT)? '=' value
//   value   := NUMBER | '[' (value (',' value)* ','?)? ']'
//
// `weight=` sets the module weight, `p.<field>=` a cell-parameter field, and
// any other identifier a module attribute. Uses chumsky combinators over the
// `logos` token stream.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns the rows plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::error::{Error, Result};
use crate::lexer::Token;
use crate::listing::{ListingEntry, ModuleDescriptor, ModuleListing, ParamValue};

/// Result of parsing: rows plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub entries: Option<Vec<ListingEntry>>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Where an attribute lands in the descriptor.
#[derive(Debug, Clone, PartialEq)]
enum AttrTarget {
    Weight,
    Attribute(String),
    Parameter(String),
}

/// Parse listing text. Lexes then parses.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = listing_parser(source);
    let (entries, parse_errors) = parser.parse(stream).into_output_errors();

    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        entries,
        errors: all_errors,
    }
}

/// Parse listing text into a `ModuleListing`, failing on the first error.
pub fn parse_listing(source: &str) -> Result<ModuleListing> {
    let result = parse(source);
    if let Some(err) = result.errors.first() {
        let start = err.span().start();
        let line = source[..start.min(source.len())]
            .matches('\n')
            .count()
            + 1;
        return Err(Error::Listing(format!("line {line}: {err}")));
    }
    let entries = result
        .entries
        .ok_or_else(|| Error::Listing("parse failed with no output".to_string()))?;
    ModuleListing::from_entries(entries)
}

fn listing_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Vec<ListingEntry>, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let nl = just(Token::Newline).repeated().ignored();

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    let natural = select! {
        Token::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
    };

    // ── Values ──

    let value = recursive(|value| {
        let scalar = select! { Token::Number(n) => ParamValue::Scalar(n) };
        let array = value
            .separated_by(just(Token::Comma))
            .allow_trailing()
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map(ParamValue::Array);
        scalar.or(array)
    });

    // ── Shape ──

    let shape = natural
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket));

    // ── Attributes ──

    let target = ident
        .clone()
        .then(just(Token::Dot).ignore_then(ident.clone()).or_not())
        .try_map(|(head, field), span| match field {
            None if head == "weight" => Ok(AttrTarget::Weight),
            None => Ok(AttrTarget::Attribute(head)),
            Some(field) if head == "p" => Ok(AttrTarget::Parameter(field)),
            Some(_) => Err(Rich::custom(
                span,
                format!("unknown attribute group '{head}' (only 'p.' is allowed)"),
            )),
        });

    let attr = target.then_ignore(just(Token::Equals)).then(value);

    // ── Row ──

    let row = natural
        .then(ident)
        .then(shape)
        .then(attr.repeated().collect::<Vec<_>>())
        .map(|(((position, class_name), output_size), attrs)| {
            let mut module = ModuleDescriptor::new(class_name, output_size);
            for (target, value) in attrs {
                module = match target {
                    AttrTarget::Weight => module.with_weight(value),
                    AttrTarget::Attribute(name) => module.with_attribute(name, value),
                    AttrTarget::Parameter(name) => module.with_parameter(name, value),
                };
            }
            ListingEntry { position, module }
        });

    // ── Listing ──

    nl.clone()
        .ignore_then(
            row.separated_by(just(Token::Newline).repeated().at_least(1))
                .allow_trailing()
                .collect::<Vec<_>>(),
        )
        .then_ignore(nl)
}
