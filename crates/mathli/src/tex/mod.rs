//! TeX expression model: the token table, the parsed expression tree and a
//! parser for the practical subset of math TeX the engine indexes.

mod parse;

use thiserror::Error;

pub use self::parse::parse;
use crate::{SymbolId, TokenId};

/// One node type per operator or leaf kind. A contiguous high range is
/// reserved for rank tokens, the sentinels that keep ordered operands
/// (fraction sides, script slots) apart. Rank-rooted index elements are
/// dropped at indexing time.
pub mod token {
    use crate::TokenId;

    pub const VAR: TokenId = 1;
    pub const NUM: TokenId = 2;
    pub const QVAR: TokenId = 3;
    pub const ADD: TokenId = 10;
    pub const NEG: TokenId = 11;
    pub const TIMES: TokenId = 12;
    pub const FRAC: TokenId = 13;
    pub const SQRT: TokenId = 14;
    pub const SUP: TokenId = 15;
    pub const SUB: TokenId = 16;
    pub const EQ: TokenId = 17;
    pub const GROUP: TokenId = 18;

    pub const RANK_BASE: TokenId = 0xff00;

    pub fn rank(i: u8) -> TokenId {
        RANK_BASE + i as TokenId
    }

    pub fn is_rank(token: TokenId) -> bool {
        token >= RANK_BASE
    }

    pub fn name(token: TokenId) -> &'static str {
        match token {
            VAR => "VAR",
            NUM => "NUM",
            QVAR => "QVAR",
            ADD => "ADD",
            NEG => "NEG",
            TIMES => "TIMES",
            FRAC => "FRAC",
            SQRT => "SQRT",
            SUP => "SUP",
            SUB => "SUB",
            EQ => "EQ",
            GROUP => "GROUP",
            t if is_rank(t) => "RANK",
            _ => "UNKNOWN",
        }
    }
}

/// Leaf symbol ids. Latin letters and a few greek commands get small stable
/// ids; everything else (numbers, unknown commands) is folded into a
/// disjoint hashed range.
pub mod symbol {
    use crate::{fold16, SymbolId};

    pub const WILDCARD: SymbolId = 0;

    const GREEK: &[&str] = &[
        "alpha", "beta", "gamma", "delta", "epsilon", "zeta", "eta", "theta", "lambda", "mu",
        "pi", "rho", "sigma", "tau", "phi", "omega",
    ];

    pub fn of_char(c: char) -> SymbolId {
        if c.is_ascii_lowercase() {
            1 + (c as u16 - 'a' as u16)
        } else {
            27 + (c as u16 - 'A' as u16)
        }
    }

    pub fn of_number(text: &str) -> SymbolId {
        0x1000 | (fold16(fxhash::hash64(text.as_bytes())) & 0x0fff)
    }

    pub fn of_command(name: &str) -> SymbolId {
        match GREEK.iter().position(|g| *g == name) {
            Some(i) => 53 + i as SymbolId,
            None => 0x2000 | (fold16(fxhash::hash64(name.as_bytes())) & 0x0fff),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprNode {
    pub token: TokenId,
    pub symbol: SymbolId,
    pub children: Vec<ExprNode>,
}

impl ExprNode {
    pub fn leaf(token: TokenId, symbol: SymbolId) -> ExprNode {
        ExprNode { token, symbol, children: Vec::new() }
    }

    pub fn internal(token: TokenId, children: Vec<ExprNode>) -> ExprNode {
        ExprNode { token, symbol: 0, children }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprTree {
    pub root: ExprNode,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("TeX parse error at byte {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}
