//! BNF grammar:
//!
//! ```text
//! expression = additive ("=" additive)*
//! additive   = multiplicative (("+" | "-") multiplicative)*
//! multiplicative = scripted (("\times" | "\cdot" | "*")? scripted)*
//! scripted   = atom (("^" | "_") arg)*
//! arg        = "{" expression "}" | atom
//! atom       = "\frac" arg arg | "\sqrt" arg | "\qvar{" name "}"
//!            | "\" name | "(" expression ")" | letter | number
//! ```
//!
//! Parenthesized sub-expressions become GROUP nodes; braces only delimit
//! arguments. Ordered operands (fraction sides, script slots) sit under
//! rank sentinel nodes so that `\frac{x}{y}` and `\frac{y}{x}` index apart.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, multispace0, satisfy};
use nom::combinator::{all_consuming, map, opt, recognize, verify};
use nom::multi::many0;
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::{Finish, IResult};

use super::{symbol, token, ExprNode, ExprTree, ParseError};

type PResult<'a, O> = IResult<&'a str, O>;

pub fn parse(tex: &str) -> Result<ExprTree, ParseError> {
    if tex.trim().is_empty() {
        return Err(ParseError { offset: 0, message: "empty expression".to_string() });
    }

    match all_consuming(delimited(multispace0, expression, multispace0))(tex).finish() {
        Ok((_, root)) => Ok(ExprTree { root }),
        Err(err) => {
            let offset = tex.len() - err.input.len();
            let near: String = err.input.chars().take(12).collect();
            Err(ParseError { offset, message: format!("unexpected input near `{near}`") })
        }
    }
}

fn expression(input: &str) -> PResult<'_, ExprNode> {
    let (input, first) = additive(input)?;
    let (input, rest) = many0(preceded(ws(char('=')), additive))(input)?;

    if rest.is_empty() {
        return Ok((input, first));
    }
    let mut children = vec![first];
    children.extend(rest);
    Ok((input, ExprNode::internal(token::EQ, children)))
}

fn additive(input: &str) -> PResult<'_, ExprNode> {
    let (input, lead) = opt(ws(char('-')))(input)?;
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0(pair(ws(alt((char('+'), char('-')))), multiplicative))(input)?;

    let first = match lead {
        Some(_) => ExprNode::internal(token::NEG, vec![first]),
        None => first,
    };
    if rest.is_empty() {
        return Ok((input, first));
    }

    let mut children = vec![first];
    for (op, operand) in rest {
        match op {
            '-' => children.push(ExprNode::internal(token::NEG, vec![operand])),
            _ => children.push(operand),
        }
    }
    Ok((input, ExprNode::internal(token::ADD, children)))
}

fn multiplicative(input: &str) -> PResult<'_, ExprNode> {
    let (input, first) = scripted(input)?;
    let (input, rest) = many0(preceded(opt(mul_op), scripted))(input)?;

    if rest.is_empty() {
        return Ok((input, first));
    }
    let mut children = vec![first];
    children.extend(rest);
    Ok((input, ExprNode::internal(token::TIMES, children)))
}

fn mul_op(input: &str) -> PResult<'_, &str> {
    ws(alt((tag("\\times"), tag("\\cdot"), tag("*"))))(input)
}

fn scripted(input: &str) -> PResult<'_, ExprNode> {
    let (input, base) = atom(input)?;
    let (input, scripts) = many0(pair(ws(alt((char('^'), char('_')))), arg))(input)?;

    let mut node = base;
    for (op, script) in scripts {
        let op_token = if op == '^' { token::SUP } else { token::SUB };
        node = ExprNode::internal(
            op_token,
            vec![
                ExprNode::internal(token::rank(1), vec![node]),
                ExprNode::internal(token::rank(2), vec![script]),
            ],
        );
    }
    Ok((input, node))
}

fn arg(input: &str) -> PResult<'_, ExprNode> {
    alt((delimited(ws(char('{')), expression, ws(char('}'))), atom))(input)
}

fn atom(input: &str) -> PResult<'_, ExprNode> {
    ws(alt((frac, sqrt, qvar, command, paren_group, variable, number)))(input)
}

fn frac(input: &str) -> PResult<'_, ExprNode> {
    let (input, (num, den)) = preceded(tag("\\frac"), pair(arg, arg))(input)?;
    let node = ExprNode::internal(
        token::FRAC,
        vec![
            ExprNode::internal(token::rank(1), vec![num]),
            ExprNode::internal(token::rank(2), vec![den]),
        ],
    );
    Ok((input, node))
}

fn sqrt(input: &str) -> PResult<'_, ExprNode> {
    map(preceded(tag("\\sqrt"), arg), |radicand| {
        ExprNode::internal(token::SQRT, vec![radicand])
    })(input)
}

fn qvar(input: &str) -> PResult<'_, ExprNode> {
    map(
        preceded(tag("\\qvar"), delimited(char('{'), command_name, char('}'))),
        |_| ExprNode::leaf(token::QVAR, symbol::WILDCARD),
    )(input)
}

fn command(input: &str) -> PResult<'_, ExprNode> {
    map(
        preceded(
            char('\\'),
            verify(command_name, |name: &str| !matches!(name, "times" | "cdot" | "frac" | "sqrt" | "qvar")),
        ),
        |name| ExprNode::leaf(token::VAR, symbol::of_command(name)),
    )(input)
}

fn command_name(input: &str) -> PResult<'_, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(input)
}

fn paren_group(input: &str) -> PResult<'_, ExprNode> {
    map(delimited(char('('), expression, ws(char(')'))), |inner| {
        ExprNode::internal(token::GROUP, vec![inner])
    })(input)
}

fn variable(input: &str) -> PResult<'_, ExprNode> {
    map(satisfy(|c| c.is_ascii_alphabetic()), |c| {
        ExprNode::leaf(token::VAR, symbol::of_char(c))
    })(input)
}

fn number(input: &str) -> PResult<'_, ExprNode> {
    map(
        recognize(tuple((
            take_while1(|c: char| c.is_ascii_digit()),
            opt(pair(char('.'), take_while1(|c: char| c.is_ascii_digit()))),
        ))),
        |text: &str| ExprNode::leaf(token::NUM, symbol::of_number(text)),
    )(input)
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_is_one_flat_add_node() {
        let tree = parse("a+b").unwrap();
        assert_eq!(tree.root.token, token::ADD);
        assert_eq!(tree.root.children.len(), 2);
        assert!(tree.root.children.iter().all(|c| c.token == token::VAR));
    }

    #[test]
    fn subtraction_wraps_the_operand() {
        let tree = parse("a-b").unwrap();
        assert_eq!(tree.root.token, token::ADD);
        assert_eq!(tree.root.children[1].token, token::NEG);
    }

    #[test]
    fn fraction_sides_sit_under_distinct_ranks() {
        let tree = parse("\\frac{x}{y}").unwrap();
        assert_eq!(tree.root.token, token::FRAC);
        assert_eq!(tree.root.children[0].token, token::rank(1));
        assert_eq!(tree.root.children[1].token, token::rank(2));
        assert_ne!(tree.root.children[0].token, tree.root.children[1].token);
    }

    #[test]
    fn implicit_multiplication_and_superscript() {
        let tree = parse("2x^2").unwrap();
        assert_eq!(tree.root.token, token::TIMES);
        assert_eq!(tree.root.children[1].token, token::SUP);
    }

    #[test]
    fn parens_become_a_group_node() {
        let tree = parse("(a+b)c").unwrap();
        assert_eq!(tree.root.token, token::TIMES);
        assert_eq!(tree.root.children[0].token, token::GROUP);
    }

    #[test]
    fn qvar_is_a_wildcard_leaf() {
        let tree = parse("\\qvar{u}+b").unwrap();
        assert_eq!(tree.root.children[0].token, token::QVAR);
        assert_eq!(tree.root.children[0].symbol, symbol::WILDCARD);
    }

    #[test]
    fn greek_commands_are_variables() {
        let tree = parse("\\alpha+\\beta").unwrap();
        assert_eq!(tree.root.children[0].token, token::VAR);
        assert_ne!(tree.root.children[0].symbol, tree.root.children[1].symbol);
    }

    #[test]
    fn garbage_reports_the_offending_offset() {
        let err = parse("a+!").unwrap_err();
        assert!(err.offset > 0);
        assert!(err.message.contains('!'));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(parse("  ").is_err());
    }
}
