//! Parser and desugarer: token tree to AST.
//!
//! The parser is a recursive descent over each logical line's tokens, with
//! block structure taken from the lex tree. It performs the desugarings
//! that happen at parse time (`elif` chains, `with`, lambda, list
//! comprehensions, loop/conditional `else` attachment) and runs the
//! capture-resolution pass over every function body.
//!
//! The first structural violation aborts parsing with a [`CodeError`];
//! no error recovery is attempted.

use std::collections::BTreeSet;

use crate::exception::{CodeError, SourcePos};
use crate::expressions::{
    AssignTarget, BinOp, BoolOp, CallArg, CmpOp, ExceptClause, Expr, ExprNode, FuncDefExpr,
    Literal, Param, Stat, StatKind, UnaryOp,
};
use crate::lexer::{LexNode, Token, TokenKind, is_keyword};

type ParseResult<T> = Result<T, CodeError>;

/// Parses a lexed module into the synthetic module-body function.
pub(crate) fn parse_module(root: &LexNode) -> ParseResult<FuncDefExpr> {
    let mut state = ParserState::default();
    let mut module = FuncDefExpr::new("<module>", SourcePos::default());
    module.body = parse_block(&root.children, &mut state)?;
    resolve_captures(&mut module);
    // At module level every name lives in the module's globals, so
    // captures collapse into plain module names.
    let captures = std::mem::take(&mut module.local_captures);
    module.locals.extend(captures);
    Ok(module)
}

/// Parses a single expression as a module body returning its value.
pub(crate) fn parse_expression_module(root: &LexNode) -> ParseResult<FuncDefExpr> {
    if root.children.len() != 1 || !root.children[0].children.is_empty() {
        return Err(CodeError::new(
            "expected a single expression",
            SourcePos::default(),
        ));
    }
    let node = &root.children[0];
    let mut cur = Cursor::new(&node.tokens);
    let expr = parse_tuple_expression(&mut cur)?;
    cur.expect_end()?;
    let pos = expr.pos;
    let mut module = FuncDefExpr::new("<module>", pos);
    module.body = vec![Stat::new(StatKind::Return(Some(expr)), pos)];
    resolve_captures(&mut module);
    let captures = std::mem::take(&mut module.local_captures);
    module.locals.extend(captures);
    Ok(module)
}

#[derive(Default)]
struct ParserState {
    /// Depth of enclosing loops within the current function body.
    loop_depth: usize,
    /// Depth of enclosing function (or class body) scopes.
    func_depth: usize,
    /// Counter for synthesized temporary names.
    tmp_counter: usize,
}

struct Cursor<'a> {
    tokens: &'a [Token],
    i: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, i: 0 }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.i)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let t = self.tokens.get(self.i);
        self.i += 1;
        t
    }

    fn at_end(&self) -> bool {
        self.i >= self.tokens.len()
    }

    /// Position for error reporting: the current token, or just past the last.
    fn pos(&self) -> SourcePos {
        self.tokens
            .get(self.i)
            .or_else(|| self.tokens.last())
            .map_or_else(SourcePos::default, |t| t.pos)
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_symbol(sym)) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_word(word)) {
            self.i += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: &str) -> ParseResult<()> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            Err(CodeError::new(format!("expected '{sym}'"), self.pos()))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<(String, SourcePos)> {
        let pos = self.pos();
        match self.peek().and_then(Token::identifier) {
            Some(name) => {
                let name = name.to_string();
                self.i += 1;
                Ok((name, pos))
            }
            None => Err(CodeError::new("expected an identifier", pos)),
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        if self.at_end() {
            Ok(())
        } else {
            Err(CodeError::new("unexpected trailing tokens", self.pos()))
        }
    }
}

fn first_word(node: &LexNode) -> &str {
    match node.tokens.first() {
        Some(t) if matches!(t.kind, TokenKind::Word) => &t.text,
        _ => "",
    }
}

fn node_pos(node: &LexNode) -> SourcePos {
    node.tokens.first().map_or_else(SourcePos::default, |t| t.pos)
}

fn expect_no_block(node: &LexNode) -> ParseResult<()> {
    if node.children.is_empty() {
        Ok(())
    } else {
        Err(CodeError::new("unexpected indent", node_pos(&node.children[0])))
    }
}

fn expect_block<'a>(node: &'a LexNode) -> ParseResult<&'a [LexNode]> {
    if node.children.is_empty() {
        Err(CodeError::new(
            "expected an indented block",
            node.tokens.last().map_or_else(SourcePos::default, |t| t.pos),
        ))
    } else {
        Ok(&node.children)
    }
}

// --- Statements ---------------------------------------------------------

fn parse_block(nodes: &[LexNode], st: &mut ParserState) -> ParseResult<Vec<Stat>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < nodes.len() {
        let node = &nodes[i];
        let pos = node_pos(node);
        match first_word(node) {
            "if" => {
                let (cond, body) = parse_conditional(node, st)?;
                // Collect the elif chain and optional trailing else.
                let mut elifs = Vec::new();
                let mut orelse = Vec::new();
                while i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "elif" {
                    i += 1;
                    elifs.push((node_pos(&nodes[i]), parse_conditional(&nodes[i], st)?));
                }
                if i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "else" {
                    i += 1;
                    orelse = parse_else(&nodes[i], st)?;
                }
                // elif desugars into nested if/else from the back.
                for (epos, (econd, ebody)) in elifs.into_iter().rev() {
                    let inner = Stat::new(
                        StatKind::If {
                            cond: econd,
                            body: ebody,
                            orelse,
                        },
                        epos,
                    );
                    orelse = vec![inner];
                }
                out.push(Stat::new(StatKind::If { cond, body, orelse }, pos));
            }
            "while" => {
                st.loop_depth += 1;
                let parsed = parse_conditional(node, st);
                st.loop_depth -= 1;
                let (cond, body) = parsed?;
                let mut orelse = Vec::new();
                if i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "else" {
                    i += 1;
                    orelse = parse_else(&nodes[i], st)?;
                }
                out.push(Stat::new(StatKind::While { cond, body, orelse }, pos));
            }
            "for" => {
                let mut stat = parse_for(node, st)?;
                if i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "else" {
                    i += 1;
                    let orelse = parse_else(&nodes[i], st)?;
                    if let StatKind::For { orelse: slot, .. } = &mut stat.kind {
                        *slot = orelse;
                    }
                }
                out.push(stat);
            }
            "try" => {
                let mut cur = Cursor::new(&node.tokens);
                cur.advance();
                let body = parse_suite(node, &mut cur, st)?;
                let mut excepts = Vec::new();
                let mut finally = Vec::new();
                while i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "except" {
                    i += 1;
                    let clause = parse_except(&nodes[i], st)?;
                    if let Some(prev) = excepts.last() {
                        let prev: &ExceptClause = prev;
                        if prev.exc_type.is_none() {
                            return Err(CodeError::new(
                                "default 'except' clause must be last",
                                clause.pos,
                            ));
                        }
                    }
                    excepts.push(clause);
                }
                if i + 1 < nodes.len() && first_word(&nodes[i + 1]) == "finally" {
                    i += 1;
                    let fnode = &nodes[i];
                    let mut cur = Cursor::new(&fnode.tokens);
                    cur.advance();
                    finally = parse_suite(fnode, &mut cur, st)?;
                }
                if excepts.is_empty() && finally.is_empty() {
                    return Err(CodeError::new("expected an 'except' or 'finally' clause", pos));
                }
                out.push(Stat::new(StatKind::Try { body, excepts, finally }, pos));
            }
            "elif" => {
                return Err(CodeError::new(
                    "an 'elif' clause may only appear after an 'if' or 'elif' clause",
                    pos,
                ));
            }
            "else" => {
                return Err(CodeError::new(
                    "an 'else' clause may only appear after an 'if', 'elif', 'while', or 'for' clause",
                    pos,
                ));
            }
            "except" | "finally" => {
                return Err(CodeError::new(
                    "an 'except' or 'finally' clause may only appear after a 'try' clause",
                    pos,
                ));
            }
            "with" => {
                parse_with(node, st, &mut out)?;
            }
            "def" => {
                let func = parse_def(node, st)?;
                out.push(Stat::new(StatKind::Def(Box::new(func)), pos));
            }
            "class" => {
                out.push(parse_class(node, st)?);
            }
            _ => {
                // One or more simple statements separated by semicolons.
                expect_no_block(node)?;
                let mut cur = Cursor::new(&node.tokens);
                parse_simple_statements(&mut cur, st, &mut out)?;
            }
        }
        i += 1;
    }
    Ok(out)
}

/// Parses a statement body: either an inline suite of simple statements
/// after the colon, or the indented block beneath the line.
fn parse_suite(node: &LexNode, cur: &mut Cursor<'_>, st: &mut ParserState) -> ParseResult<Vec<Stat>> {
    cur.expect_symbol(":")?;
    if cur.at_end() {
        parse_block(expect_block(node)?, st)
    } else {
        expect_no_block(node)?;
        let mut out = Vec::new();
        parse_simple_statements(cur, st, &mut out)?;
        Ok(out)
    }
}

/// Parses semicolon-separated simple statements until the end of the line.
fn parse_simple_statements(
    cur: &mut Cursor<'_>,
    st: &mut ParserState,
    out: &mut Vec<Stat>,
) -> ParseResult<()> {
    loop {
        out.push(parse_simple_statement(cur, st)?);
        if cur.eat_symbol(";") {
            if cur.at_end() {
                return Ok(());
            }
            continue;
        }
        return cur.expect_end();
    }
}

/// One simple (non-block) statement read from the cursor, stopping at a
/// `;` or the end of the line.
fn parse_simple_statement(cur: &mut Cursor<'_>, st: &mut ParserState) -> ParseResult<Stat> {
    let pos = cur.pos();
    let word = match cur.peek() {
        Some(t) if matches!(t.kind, TokenKind::Word) => &*t.text,
        _ => "",
    };
    match word {
        "return" => {
            cur.advance();
            let value = if at_statement_end(cur) {
                None
            } else {
                Some(parse_tuple_expression(cur)?)
            };
            Ok(Stat::new(StatKind::Return(value), pos))
        }
        "raise" => {
            cur.advance();
            let value = if at_statement_end(cur) {
                None
            } else {
                Some(parse_expression(cur)?)
            };
            Ok(Stat::new(StatKind::Raise(value), pos))
        }
        "pass" => {
            cur.advance();
            Ok(Stat::new(StatKind::Pass, pos))
        }
        "break" | "continue" => {
            cur.advance();
            if st.loop_depth == 0 {
                return Err(CodeError::new("'break' or 'continue' outside of loop", pos));
            }
            let kind = if word == "break" {
                StatKind::Break
            } else {
                StatKind::Continue
            };
            Ok(Stat::new(kind, pos))
        }
        "global" | "nonlocal" => {
            cur.advance();
            if st.func_depth == 0 {
                return Err(CodeError::new(
                    "'global' and 'nonlocal' are not allowed at module level",
                    pos,
                ));
            }
            let (name, _) = cur.expect_identifier()?;
            let kind = if word == "global" {
                StatKind::Global(name)
            } else {
                StatKind::Nonlocal(name)
            };
            Ok(Stat::new(kind, pos))
        }
        "import" => {
            cur.advance();
            let (module, _) = cur.expect_identifier()?;
            let alias = if cur.eat_word("as") {
                Some(cur.expect_identifier()?.0)
            } else {
                None
            };
            Ok(Stat::new(StatKind::Import { module, alias }, pos))
        }
        "from" => {
            cur.advance();
            let (module, _) = cur.expect_identifier()?;
            if !cur.eat_word("import") {
                return Err(CodeError::new("expected 'import'", cur.pos()));
            }
            let mut names = Vec::new();
            loop {
                let (name, _) = cur.expect_identifier()?;
                let alias = if cur.eat_word("as") {
                    Some(cur.expect_identifier()?.0)
                } else {
                    None
                };
                names.push((name, alias));
                if !cur.eat_symbol(",") {
                    break;
                }
            }
            Ok(Stat::new(StatKind::ImportFrom { module, names }, pos))
        }
        "def" | "class" | "if" | "elif" | "else" | "while" | "for" | "try" | "except"
        | "finally" | "with" => Err(CodeError::new(
            format!("'{word}' is not allowed in an inline statement list"),
            pos,
        )),
        _ => {
            let expr = parse_expression_statement(cur)?;
            Ok(Stat::new(StatKind::Expr(expr), pos))
        }
    }
}

fn at_statement_end(cur: &Cursor<'_>) -> bool {
    match cur.peek() {
        None => true,
        Some(t) => t.is_symbol(";"),
    }
}

/// `if cond:` / `elif cond:` / `while cond:` header plus suite.
fn parse_conditional(node: &LexNode, st: &mut ParserState) -> ParseResult<(ExprNode, Vec<Stat>)> {
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();
    let cond = parse_expression(&mut cur)?;
    let body = parse_suite(node, &mut cur, st)?;
    Ok((cond, body))
}

fn parse_else(node: &LexNode, st: &mut ParserState) -> ParseResult<Vec<Stat>> {
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();
    parse_suite(node, &mut cur, st)
}

fn parse_for(node: &LexNode, st: &mut ParserState) -> ParseResult<Stat> {
    let pos = node_pos(node);
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();

    // Loop variable list: one or more names separated by commas.
    let mut names = Vec::new();
    loop {
        let (name, _) = cur.expect_identifier()?;
        names.push(name);
        if !cur.eat_symbol(",") {
            break;
        }
    }
    if !cur.eat_word("in") {
        return Err(CodeError::new("expected 'in'", cur.pos()));
    }
    let target = if names.len() == 1 {
        AssignTarget::Direct(names.pop().expect("one name"))
    } else {
        AssignTarget::Pack(names.into_iter().map(AssignTarget::Direct).collect())
    };
    let iterable = parse_expression(&mut cur)?;

    st.loop_depth += 1;
    let body = parse_suite(node, &mut cur, st);
    st.loop_depth -= 1;
    Ok(Stat::new(
        StatKind::For {
            target,
            iterable,
            body: body?,
            orelse: Vec::new(),
        },
        pos,
    ))
}

fn parse_except(node: &LexNode, st: &mut ParserState) -> ParseResult<ExceptClause> {
    let pos = node_pos(node);
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();

    let mut exc_type = None;
    let mut binding = None;
    if !cur.peek().is_some_and(|t| t.is_symbol(":")) {
        exc_type = Some(parse_expression(&mut cur)?);
        if cur.eat_word("as") {
            let (name, _) = cur.expect_identifier()?;
            binding = Some(name);
        }
    }
    let body = parse_suite(node, &mut cur, st)?;
    Ok(ExceptClause {
        exc_type,
        binding,
        body,
        pos,
    })
}

/// Desugars `with mgr [as v]: body` into manager-temp assignment,
/// `__enter__` call, and a try/finally calling `__exit__(None, None, None)`.
fn parse_with(node: &LexNode, st: &mut ParserState, out: &mut Vec<Stat>) -> ParseResult<()> {
    let pos = node_pos(node);
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();

    let manager = parse_expression(&mut cur)?;
    let mut var = None;
    if cur.eat_word("as") {
        let (name, _) = cur.expect_identifier()?;
        var = Some(name);
    }
    let body = parse_suite(node, &mut cur, st)?;

    st.tmp_counter += 1;
    let mgr_name = format!("__With{}", st.tmp_counter);
    let load_mgr = |kind_pos| ExprNode::new(Expr::Var(mgr_name.clone()), kind_pos);

    out.push(Stat::new(
        StatKind::Expr(ExprNode::new(
            Expr::Assign {
                target: Box::new(AssignTarget::Direct(mgr_name.clone())),
                value: Box::new(manager),
            },
            pos,
        )),
        pos,
    ));

    let enter_call = ExprNode::new(
        Expr::Call {
            callee: Box::new(ExprNode::new(
                Expr::Attr {
                    obj: Box::new(load_mgr(pos)),
                    name: "__enter__".to_string(),
                },
                pos,
            )),
            args: Vec::new(),
        },
        pos,
    );
    let enter_stat = match var {
        Some(name) => ExprNode::new(
            Expr::Assign {
                target: Box::new(AssignTarget::Direct(name)),
                value: Box::new(enter_call),
            },
            pos,
        ),
        None => enter_call,
    };
    out.push(Stat::new(StatKind::Expr(enter_stat), pos));

    let none = |p| ExprNode::new(Expr::Literal(Literal::None), p);
    let exit_call = ExprNode::new(
        Expr::Call {
            callee: Box::new(ExprNode::new(
                Expr::Attr {
                    obj: Box::new(load_mgr(pos)),
                    name: "__exit__".to_string(),
                },
                pos,
            )),
            args: vec![
                CallArg::Pos(none(pos)),
                CallArg::Pos(none(pos)),
                CallArg::Pos(none(pos)),
            ],
        },
        pos,
    );
    out.push(Stat::new(
        StatKind::Try {
            body,
            excepts: Vec::new(),
            finally: vec![Stat::new(StatKind::Expr(exit_call), pos)],
        },
        pos,
    ));
    Ok(())
}

fn parse_def(node: &LexNode, st: &mut ParserState) -> ParseResult<FuncDefExpr> {
    let pos = node_pos(node);
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();

    let (name, _) = cur.expect_identifier()?;
    cur.expect_symbol("(")?;
    let mut func = FuncDefExpr::new(name, pos);
    parse_parameter_list(&mut cur, &mut func)?;
    cur.expect_symbol(")")?;

    let saved_loop = std::mem::take(&mut st.loop_depth);
    st.func_depth += 1;
    let body = parse_suite(node, &mut cur, st);
    st.func_depth -= 1;
    st.loop_depth = saved_loop;
    func.body = body?;
    resolve_captures(&mut func);
    Ok(func)
}

fn parse_parameter_list(cur: &mut Cursor<'_>, func: &mut FuncDefExpr) -> ParseResult<()> {
    loop {
        if cur.peek().is_none() || cur.peek().is_some_and(|t| t.is_symbol(")")) {
            return Ok(());
        }
        if cur.eat_symbol("*") {
            if func.star_args.is_some() {
                return Err(CodeError::new(
                    "only one variadic arguments parameter is allowed",
                    cur.pos(),
                ));
            }
            if func.star_kwargs.is_some() {
                return Err(CodeError::new(
                    "keyword arguments parameter must appear last",
                    cur.pos(),
                ));
            }
            let (name, npos) = cur.expect_identifier()?;
            check_duplicate_param(func, &name, npos)?;
            func.star_args = Some(name);
        } else if cur.eat_symbol("**") {
            if func.star_kwargs.is_some() {
                return Err(CodeError::new(
                    "only one keyword arguments parameter is allowed",
                    cur.pos(),
                ));
            }
            let (name, npos) = cur.expect_identifier()?;
            check_duplicate_param(func, &name, npos)?;
            func.star_kwargs = Some(name);
        } else {
            let (name, npos) = cur.expect_identifier()?;
            if func.star_args.is_some() || func.star_kwargs.is_some() {
                return Err(CodeError::new("regular parameters must appear first", npos));
            }
            check_duplicate_param(func, &name, npos)?;
            let default = if cur.eat_symbol("=") {
                Some(parse_expression(cur)?)
            } else {
                if func.params.last().is_some_and(|p| p.default.is_some()) {
                    return Err(CodeError::new(
                        "parameters with default values must appear at the end of the parameter list",
                        npos,
                    ));
                }
                None
            };
            func.params.push(Param { name, default });
        }
        if !cur.eat_symbol(",") {
            return Ok(());
        }
    }
}

fn check_duplicate_param(func: &FuncDefExpr, name: &str, pos: SourcePos) -> ParseResult<()> {
    let dup = func.params.iter().any(|p| p.name == name)
        || func.star_args.as_deref() == Some(name)
        || func.star_kwargs.as_deref() == Some(name);
    if dup {
        Err(CodeError::new("duplicate parameter name", pos))
    } else {
        Ok(())
    }
}

fn parse_class(node: &LexNode, st: &mut ParserState) -> ParseResult<Stat> {
    let pos = node_pos(node);
    let mut cur = Cursor::new(&node.tokens);
    cur.advance();

    let (name, _) = cur.expect_identifier()?;
    let mut bases = Vec::new();
    if cur.eat_symbol("(") {
        if !cur.peek().is_some_and(|t| t.is_symbol(")")) {
            loop {
                bases.push(parse_expression(&mut cur)?);
                if !cur.eat_symbol(",") {
                    break;
                }
            }
        }
        cur.expect_symbol(")")?;
    }

    let saved_loop = std::mem::take(&mut st.loop_depth);
    st.func_depth += 1;
    let body = parse_suite(node, &mut cur, st);
    st.func_depth -= 1;
    st.loop_depth = saved_loop;

    // The class body is its own scope, executed as a function whose locals
    // become the instance template.
    let mut body_fn = FuncDefExpr::new(name.clone(), pos);
    body_fn.body = body?;
    resolve_captures(&mut body_fn);
    Ok(Stat::new(
        StatKind::Class {
            name,
            bases,
            body: Box::new(body_fn),
        },
        pos,
    ))
}

// --- Expressions --------------------------------------------------------

/// Expression statement: tuple display plus (possibly chained) assignment.
fn parse_expression_statement(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let expr = parse_tuple_expression(cur)?;
    let pos = expr.pos;

    if cur.eat_symbol("=") {
        let target = to_assign_target(expr)?;
        let value = parse_expression_statement(cur)?;
        return Ok(ExprNode::new(
            Expr::Assign {
                target: Box::new(target),
                value: Box::new(value),
            },
            pos,
        ));
    }

    let aug = cur.peek().and_then(|t| match t.kind {
        TokenKind::Symbol => aug_assign_op(&t.text),
        _ => None,
    });
    if let Some(op) = aug {
        cur.advance();
        let target = to_assign_target(expr)?;
        if matches!(target, AssignTarget::Pack(_)) {
            return Err(CodeError::new(
                "compound assignment cannot unpack",
                pos,
            ));
        }
        let value = parse_tuple_expression(cur)?;
        return Ok(ExprNode::new(
            Expr::AugAssign {
                target: Box::new(target),
                op,
                value: Box::new(value),
            },
            pos,
        ));
    }

    Ok(expr)
}

fn aug_assign_op(sym: &str) -> Option<BinOp> {
    Some(match sym {
        "+=" => BinOp::Add,
        "-=" => BinOp::Sub,
        "*=" => BinOp::Mul,
        "/=" => BinOp::Div,
        "//=" => BinOp::FloorDiv,
        "%=" => BinOp::Mod,
        "**=" => BinOp::Pow,
        "&=" => BinOp::BitAnd,
        "|=" => BinOp::BitOr,
        "^=" => BinOp::BitXor,
        "<<=" => BinOp::Shl,
        ">>=" => BinOp::Shr,
        _ => return None,
    })
}

fn to_assign_target(expr: ExprNode) -> ParseResult<AssignTarget> {
    let pos = expr.pos;
    match expr.kind {
        Expr::Var(name) => Ok(AssignTarget::Direct(name)),
        Expr::Index { obj, index } => Ok(AssignTarget::Index {
            obj: *obj,
            index: *index,
        }),
        Expr::Attr { obj, name } => Ok(AssignTarget::Attr { obj: *obj, name }),
        Expr::Tuple(items) => {
            let targets: ParseResult<Vec<_>> = items.into_iter().map(to_assign_target).collect();
            Ok(AssignTarget::Pack(targets?))
        }
        _ => Err(CodeError::new("expression is not assignable", pos)),
    }
}

/// One or more ternary expressions separated by commas; a bare comma
/// builds a tuple.
fn parse_tuple_expression(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let first = parse_expression(cur)?;
    if !cur.peek().is_some_and(|t| t.is_symbol(",")) {
        return Ok(first);
    }
    let pos = first.pos;
    let mut items = vec![first];
    while cur.eat_symbol(",") {
        if cur.at_end() || !starts_expression(cur.peek().expect("not at end")) {
            break;
        }
        items.push(parse_expression(cur)?);
    }
    Ok(ExprNode::new(Expr::Tuple(items), pos))
}

fn starts_expression(tok: &Token) -> bool {
    match &tok.kind {
        TokenKind::Word => !is_keyword(&tok.text) || matches!(&*tok.text, "True" | "False" | "None" | "not" | "lambda"),
        TokenKind::Symbol => matches!(&*tok.text, "(" | "[" | "{" | "+" | "-" | "~"),
        _ => true,
    }
}

fn parse_expression(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    parse_ternary(cur)
}

fn parse_ternary(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let then = parse_or(cur)?;
    if !cur.eat_word("if") {
        return Ok(then);
    }
    let pos = then.pos;
    let cond = parse_or(cur)?;
    if !cur.eat_word("else") {
        return Err(CodeError::new("expected 'else'", cur.pos()));
    }
    let orelse = parse_ternary(cur)?;
    Ok(ExprNode::new(
        Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            orelse: Box::new(orelse),
        },
        pos,
    ))
}

fn parse_or(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let mut lhs = parse_and(cur)?;
    while cur.eat_word("or") {
        let rhs = parse_and(cur)?;
        let pos = lhs.pos;
        lhs = ExprNode::new(
            Expr::Bool {
                op: BoolOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        );
    }
    Ok(lhs)
}

fn parse_and(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let mut lhs = parse_not(cur)?;
    while cur.eat_word("and") {
        let rhs = parse_not(cur)?;
        let pos = lhs.pos;
        lhs = ExprNode::new(
            Expr::Bool {
                op: BoolOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        );
    }
    Ok(lhs)
}

fn parse_not(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    if cur.peek().is_some_and(|t| t.is_word("not")) {
        let pos = cur.pos();
        cur.advance();
        let operand = parse_not(cur)?;
        return Ok(ExprNode::new(
            Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            },
            pos,
        ));
    }
    parse_comparison(cur)
}

fn parse_comparison(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let mut lhs = parse_bit_or(cur)?;
    loop {
        let op = match cur.peek() {
            Some(t) if t.is_symbol("==") => CmpOp::Eq,
            Some(t) if t.is_symbol("!=") => CmpOp::Ne,
            Some(t) if t.is_symbol("<") => CmpOp::Lt,
            Some(t) if t.is_symbol("<=") => CmpOp::Le,
            Some(t) if t.is_symbol(">") => CmpOp::Gt,
            Some(t) if t.is_symbol(">=") => CmpOp::Ge,
            Some(t) if t.is_word("in") => CmpOp::In,
            Some(t) if t.is_word("is") => CmpOp::Is,
            Some(t)
                if t.is_word("not")
                    && cur.tokens.get(cur.i + 1).is_some_and(|n| n.is_word("in")) =>
            {
                cur.advance();
                CmpOp::NotIn
            }
            _ => break,
        };
        cur.advance();
        let op = if op == CmpOp::Is && cur.eat_word("not") {
            CmpOp::IsNot
        } else {
            op
        };
        let rhs = parse_bit_or(cur)?;
        let pos = lhs.pos;
        lhs = ExprNode::new(
            Expr::Compare {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            pos,
        );
    }
    Ok(lhs)
}

macro_rules! binary_level {
    ($name:ident, $next:ident, $(($sym:literal, $op:expr)),+ $(,)?) => {
        fn $name(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
            let mut lhs = $next(cur)?;
            loop {
                let op = match cur.peek() {
                    $(Some(t) if t.is_symbol($sym) => $op,)+
                    _ => break,
                };
                cur.advance();
                let rhs = $next(cur)?;
                let pos = lhs.pos;
                lhs = ExprNode::new(
                    Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) },
                    pos,
                );
            }
            Ok(lhs)
        }
    };
}

binary_level!(parse_bit_or, parse_bit_xor, ("|", BinOp::BitOr));
binary_level!(parse_bit_xor, parse_bit_and, ("^", BinOp::BitXor));
binary_level!(parse_bit_and, parse_shift, ("&", BinOp::BitAnd));
binary_level!(parse_shift, parse_additive, ("<<", BinOp::Shl), (">>", BinOp::Shr));
binary_level!(parse_additive, parse_multiplicative, ("+", BinOp::Add), ("-", BinOp::Sub));
binary_level!(
    parse_multiplicative,
    parse_unary,
    ("*", BinOp::Mul),
    ("/", BinOp::Div),
    ("//", BinOp::FloorDiv),
    ("%", BinOp::Mod),
);

fn parse_unary(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let op = match cur.peek() {
        Some(t) if t.is_symbol("-") => Some(UnaryOp::Neg),
        Some(t) if t.is_symbol("+") => Some(UnaryOp::Pos),
        Some(t) if t.is_symbol("~") => Some(UnaryOp::Invert),
        _ => None,
    };
    if let Some(op) = op {
        let pos = cur.pos();
        cur.advance();
        let operand = parse_unary(cur)?;
        return Ok(ExprNode::new(
            Expr::Unary {
                op,
                operand: Box::new(operand),
            },
            pos,
        ));
    }
    parse_power(cur)
}

fn parse_power(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let base = parse_postfix(cur)?;
    if cur.eat_symbol("**") {
        // Right-associative; the exponent may itself be unary.
        let exp = parse_unary(cur)?;
        let pos = base.pos;
        return Ok(ExprNode::new(
            Expr::Binary {
                op: BinOp::Pow,
                lhs: Box::new(base),
                rhs: Box::new(exp),
            },
            pos,
        ));
    }
    Ok(base)
}

fn parse_postfix(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let mut expr = parse_atom(cur)?;
    loop {
        if cur.eat_symbol("(") {
            let args = parse_call_args(cur)?;
            let pos = expr.pos;
            expr = ExprNode::new(
                Expr::Call {
                    callee: Box::new(expr),
                    args,
                },
                pos,
            );
        } else if cur.eat_symbol("[") {
            let index = parse_subscript(cur)?;
            cur.expect_symbol("]")?;
            let pos = expr.pos;
            expr = ExprNode::new(
                Expr::Index {
                    obj: Box::new(expr),
                    index: Box::new(index),
                },
                pos,
            );
        } else if cur.eat_symbol(".") {
            let (name, _) = cur.expect_identifier()?;
            let pos = expr.pos;
            expr = ExprNode::new(
                Expr::Attr {
                    obj: Box::new(expr),
                    name,
                },
                pos,
            );
        } else {
            return Ok(expr);
        }
    }
}

fn parse_call_args(cur: &mut Cursor<'_>) -> ParseResult<Vec<CallArg>> {
    let mut args = Vec::new();
    let mut seen_keyword = false;
    if cur.eat_symbol(")") {
        return Ok(args);
    }
    loop {
        if cur.eat_symbol("*") {
            args.push(CallArg::Star(parse_expression(cur)?));
        } else if cur.eat_symbol("**") {
            seen_keyword = true;
            args.push(CallArg::StarStar(parse_expression(cur)?));
        } else {
            // Keyword argument: identifier '=' not followed by '='.
            let is_kwarg = cur.peek().and_then(Token::identifier).is_some()
                && cur.tokens.get(cur.i + 1).is_some_and(|t| t.is_symbol("="));
            if is_kwarg {
                let (name, _) = cur.expect_identifier()?;
                cur.expect_symbol("=")?;
                seen_keyword = true;
                args.push(CallArg::Keyword(name, parse_expression(cur)?));
            } else {
                if seen_keyword {
                    return Err(CodeError::new(
                        "positional argument follows keyword argument",
                        cur.pos(),
                    ));
                }
                args.push(CallArg::Pos(parse_expression(cur)?));
            }
        }
        if cur.eat_symbol(",") {
            if cur.eat_symbol(")") {
                return Ok(args);
            }
            continue;
        }
        cur.expect_symbol(")")?;
        return Ok(args);
    }
}

fn parse_subscript(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let pos = cur.pos();
    let start = if cur.peek().is_some_and(|t| t.is_symbol(":")) {
        None
    } else {
        Some(parse_expression(cur)?)
    };
    if !cur.peek().is_some_and(|t| t.is_symbol(":")) {
        return start.ok_or_else(|| CodeError::new("expected an index", pos));
    }
    cur.expect_symbol(":")?;
    let stop = if cur.peek().is_some_and(|t| t.is_symbol(":") || t.is_symbol("]")) {
        None
    } else {
        Some(parse_expression(cur)?)
    };
    let step = if cur.eat_symbol(":") {
        if cur.peek().is_some_and(|t| t.is_symbol("]")) {
            None
        } else {
            Some(parse_expression(cur)?)
        }
    } else {
        None
    };
    Ok(ExprNode::new(
        Expr::Slice {
            start: start.map(Box::new),
            stop: stop.map(Box::new),
            step: step.map(Box::new),
        },
        pos,
    ))
}

fn parse_atom(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let pos = cur.pos();
    let Some(tok) = cur.peek() else {
        return Err(CodeError::new("expected an expression", pos));
    };
    match &tok.kind {
        TokenKind::Int(v) => {
            let v = *v;
            cur.advance();
            Ok(ExprNode::new(Expr::Literal(Literal::Int(v)), pos))
        }
        TokenKind::Float(v) => {
            let v = *v;
            cur.advance();
            Ok(ExprNode::new(Expr::Literal(Literal::Float(v)), pos))
        }
        TokenKind::Str(s) => {
            let s = s.clone();
            cur.advance();
            Ok(ExprNode::new(Expr::Literal(Literal::Str(s)), pos))
        }
        TokenKind::Word => match &*tok.text {
            "True" => {
                cur.advance();
                Ok(ExprNode::new(Expr::Literal(Literal::Bool(true)), pos))
            }
            "False" => {
                cur.advance();
                Ok(ExprNode::new(Expr::Literal(Literal::Bool(false)), pos))
            }
            "None" => {
                cur.advance();
                Ok(ExprNode::new(Expr::Literal(Literal::None), pos))
            }
            "lambda" => parse_lambda(cur),
            word if is_keyword(word) => {
                Err(CodeError::new(format!("unexpected keyword '{word}'"), pos))
            }
            word => {
                let name = word.to_string();
                cur.advance();
                Ok(ExprNode::new(Expr::Var(name), pos))
            }
        },
        TokenKind::Symbol => match &*tok.text {
            "(" => {
                cur.advance();
                if cur.eat_symbol(")") {
                    return Ok(ExprNode::new(Expr::Tuple(Vec::new()), pos));
                }
                let first = parse_expression(cur)?;
                if cur.peek().is_some_and(|t| t.is_symbol(",")) {
                    let mut items = vec![first];
                    while cur.eat_symbol(",") {
                        if cur.peek().is_some_and(|t| t.is_symbol(")")) {
                            break;
                        }
                        items.push(parse_expression(cur)?);
                    }
                    cur.expect_symbol(")")?;
                    Ok(ExprNode::new(Expr::Tuple(items), pos))
                } else {
                    cur.expect_symbol(")")?;
                    Ok(first)
                }
            }
            "[" => {
                cur.advance();
                if cur.eat_symbol("]") {
                    return Ok(ExprNode::new(Expr::List(Vec::new()), pos));
                }
                let first = parse_expression(cur)?;
                if cur.peek().is_some_and(|t| t.is_word("for")) {
                    return parse_list_comprehension(cur, first, pos);
                }
                let mut items = vec![first];
                while cur.eat_symbol(",") {
                    if cur.peek().is_some_and(|t| t.is_symbol("]")) {
                        break;
                    }
                    items.push(parse_expression(cur)?);
                }
                cur.expect_symbol("]")?;
                Ok(ExprNode::new(Expr::List(items), pos))
            }
            "{" => {
                cur.advance();
                if cur.eat_symbol("}") {
                    return Ok(ExprNode::new(Expr::Dict(Vec::new()), pos));
                }
                let first = parse_expression(cur)?;
                if cur.eat_symbol(":") {
                    let value = parse_expression(cur)?;
                    let mut entries = vec![(first, value)];
                    while cur.eat_symbol(",") {
                        if cur.peek().is_some_and(|t| t.is_symbol("}")) {
                            break;
                        }
                        let k = parse_expression(cur)?;
                        cur.expect_symbol(":")?;
                        let v = parse_expression(cur)?;
                        entries.push((k, v));
                    }
                    cur.expect_symbol("}")?;
                    Ok(ExprNode::new(Expr::Dict(entries), pos))
                } else {
                    let mut items = vec![first];
                    while cur.eat_symbol(",") {
                        if cur.peek().is_some_and(|t| t.is_symbol("}")) {
                            break;
                        }
                        items.push(parse_expression(cur)?);
                    }
                    cur.expect_symbol("}")?;
                    Ok(ExprNode::new(Expr::Set(items), pos))
                }
            }
            sym => Err(CodeError::new(format!("unexpected symbol '{sym}'"), pos)),
        },
    }
}

fn parse_lambda(cur: &mut Cursor<'_>) -> ParseResult<ExprNode> {
    let pos = cur.pos();
    cur.advance();
    let mut func = FuncDefExpr::new("<lambda>", pos);
    if !cur.peek().is_some_and(|t| t.is_symbol(":")) {
        parse_parameter_list(cur, &mut func)?;
    }
    cur.expect_symbol(":")?;
    let body = parse_expression(cur)?;
    let bpos = body.pos;
    func.body = vec![Stat::new(StatKind::Return(Some(body)), bpos)];
    resolve_captures(&mut func);
    Ok(ExprNode::new(Expr::Function(Box::new(func)), pos))
}

/// `[value for target in iterable]`: the value expression and the target
/// binding become two closures capturing the loop variable from the
/// enclosing scope; the interpreter's list-comprehension instruction
/// drives the iteration.
fn parse_list_comprehension(
    cur: &mut Cursor<'_>,
    value: ExprNode,
    pos: SourcePos,
) -> ParseResult<ExprNode> {
    if !cur.eat_word("for") {
        return Err(CodeError::new("expected 'for'", cur.pos()));
    }
    let mut names = Vec::new();
    loop {
        let (name, _) = cur.expect_identifier()?;
        names.push(name);
        if !cur.eat_symbol(",") {
            break;
        }
    }
    if !cur.eat_word("in") {
        return Err(CodeError::new("expected 'in'", cur.pos()));
    }
    let iterable = parse_expression(cur)?;
    cur.expect_symbol("]")?;

    let target = if names.len() == 1 {
        AssignTarget::Direct(names[0].clone())
    } else {
        AssignTarget::Pack(names.iter().cloned().map(AssignTarget::Direct).collect())
    };

    let mut expr_fn = FuncDefExpr::new("<listcomp>", pos);
    expr_fn.local_captures = referenced_vars(&value).into_iter().collect();
    let vpos = value.pos;
    expr_fn.body = vec![Stat::new(StatKind::Return(Some(value)), vpos)];

    let mut bind_fn = FuncDefExpr::new("<listcomp>", pos);
    bind_fn.params = vec![Param {
        name: "_Value".to_string(),
        default: None,
    }];
    bind_fn.local_captures = names;
    bind_fn.body = vec![Stat::new(
        StatKind::Expr(ExprNode::new(
            Expr::Assign {
                target: Box::new(target),
                value: Box::new(ExprNode::new(Expr::Var("_Value".to_string()), pos)),
            },
            pos,
        )),
        pos,
    )];

    Ok(ExprNode::new(
        Expr::ListComp {
            expr_fn: Box::new(expr_fn),
            bind_fn: Box::new(bind_fn),
            iterable: Box::new(iterable),
        },
        pos,
    ))
}

// --- Capture resolution -------------------------------------------------

/// Classifies every name a function body touches.
///
/// Names declared `global` become global captures; names declared
/// `nonlocal` become local captures; names bound by plain assignment,
/// `def`, `class`, a loop variable, or an `except ... as` binding become
/// locals; names referenced but never bound become local captures resolved
/// from the enclosing scope when the closure is created. Compound
/// assignment reads its target rather than binding it.
fn resolve_captures(func: &mut FuncDefExpr) {
    let mut scope = ScopeScan::default();
    scope.scan_block(&func.body);

    let params: BTreeSet<String> = func
        .params
        .iter()
        .map(|p| p.name.clone())
        .chain(func.star_args.clone())
        .chain(func.star_kwargs.clone())
        .collect();

    let mut locals: Vec<String> = scope
        .writes
        .iter()
        .filter(|n| {
            !scope.globals.contains(*n) && !scope.nonlocals.contains(*n) && !params.contains(*n)
        })
        .cloned()
        .collect();
    let mut captures: BTreeSet<String> = scope.nonlocals.clone();
    for name in &scope.reads {
        if !scope.writes.contains(name) && !params.contains(name) && !scope.globals.contains(name) {
            captures.insert(name.clone());
        }
    }
    captures.retain(|n| !scope.globals.contains(n));
    locals.sort();

    func.locals = locals;
    func.local_captures = captures.into_iter().collect();
    func.global_captures = scope.globals.into_iter().collect();
}

#[derive(Default)]
struct ScopeScan {
    reads: BTreeSet<String>,
    writes: BTreeSet<String>,
    globals: BTreeSet<String>,
    nonlocals: BTreeSet<String>,
}

impl ScopeScan {
    fn scan_block(&mut self, body: &[Stat]) {
        for stat in body {
            match &stat.kind {
                StatKind::Expr(e) => self.scan_expr(e),
                StatKind::Pass | StatKind::Break | StatKind::Continue => {}
                StatKind::If { cond, body, orelse } | StatKind::While { cond, body, orelse } => {
                    self.scan_expr(cond);
                    self.scan_block(body);
                    self.scan_block(orelse);
                }
                StatKind::For {
                    target,
                    iterable,
                    body,
                    orelse,
                } => {
                    self.write_target(target);
                    self.scan_expr(iterable);
                    self.scan_block(body);
                    self.scan_block(orelse);
                }
                StatKind::Return(value) => {
                    if let Some(v) = value {
                        self.scan_expr(v);
                    }
                }
                StatKind::Def(f) => {
                    self.writes.insert(f.name.clone());
                    for param in &f.params {
                        if let Some(d) = &param.default {
                            self.scan_expr(d);
                        }
                    }
                    self.reads.extend(f.local_captures.iter().cloned());
                }
                StatKind::Class { name, bases, body } => {
                    self.writes.insert(name.clone());
                    for base in bases {
                        self.scan_expr(base);
                    }
                    // The class body is its own scope; only its free names
                    // reach the enclosing one.
                    self.reads.extend(body.local_captures.iter().cloned());
                }
                StatKind::Try {
                    body,
                    excepts,
                    finally,
                } => {
                    self.scan_block(body);
                    for clause in excepts {
                        if let Some(t) = &clause.exc_type {
                            self.scan_expr(t);
                        }
                        if let Some(b) = &clause.binding {
                            self.writes.insert(b.clone());
                        }
                        self.scan_block(&clause.body);
                    }
                    self.scan_block(finally);
                }
                StatKind::Raise(value) => {
                    if let Some(v) = value {
                        self.scan_expr(v);
                    }
                }
                // Imports bind into the module's globals, not the local scope.
                StatKind::Import { .. } | StatKind::ImportFrom { .. } => {}
                StatKind::Global(name) => {
                    self.globals.insert(name.clone());
                }
                StatKind::Nonlocal(name) => {
                    self.nonlocals.insert(name.clone());
                }
            }
        }
    }

    fn scan_expr(&mut self, expr: &ExprNode) {
        match &expr.kind {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                self.reads.insert(name.clone());
            }
            Expr::Tuple(items) | Expr::List(items) | Expr::Set(items) => {
                for item in items {
                    self.scan_expr(item);
                }
            }
            Expr::Dict(entries) => {
                for (k, v) in entries {
                    self.scan_expr(k);
                    self.scan_expr(v);
                }
            }
            Expr::ListComp {
                expr_fn,
                bind_fn,
                iterable,
            } => {
                self.reads.extend(expr_fn.local_captures.iter().cloned());
                self.reads.extend(bind_fn.local_captures.iter().cloned());
                self.scan_expr(iterable);
            }
            Expr::Attr { obj, .. } => self.scan_expr(obj),
            Expr::Index { obj, index } => {
                self.scan_expr(obj);
                self.scan_expr(index);
            }
            Expr::Slice { start, stop, step } => {
                for part in [start, stop, step].into_iter().flatten() {
                    self.scan_expr(part);
                }
            }
            Expr::Call { callee, args } => {
                self.scan_expr(callee);
                for arg in args {
                    match arg {
                        CallArg::Pos(e)
                        | CallArg::Keyword(_, e)
                        | CallArg::Star(e)
                        | CallArg::StarStar(e) => self.scan_expr(e),
                    }
                }
            }
            Expr::Unary { operand, .. } => self.scan_expr(operand),
            Expr::Binary { lhs, rhs, .. }
            | Expr::Compare { lhs, rhs, .. }
            | Expr::Bool { lhs, rhs, .. } => {
                self.scan_expr(lhs);
                self.scan_expr(rhs);
            }
            Expr::Ternary { cond, then, orelse } => {
                self.scan_expr(cond);
                self.scan_expr(then);
                self.scan_expr(orelse);
            }
            Expr::Assign { target, value } => {
                self.write_target(target);
                self.scan_expr(value);
            }
            Expr::AugAssign { target, value, .. } => {
                // A compound assignment reads its target; it does not bind it.
                match &**target {
                    AssignTarget::Direct(name) => {
                        self.reads.insert(name.clone());
                    }
                    AssignTarget::Index { obj, index } => {
                        self.scan_expr(obj);
                        self.scan_expr(index);
                    }
                    AssignTarget::Attr { obj, .. } => self.scan_expr(obj),
                    AssignTarget::Pack(_) => {}
                }
                self.scan_expr(value);
            }
            Expr::Function(f) => {
                self.reads.extend(f.local_captures.iter().cloned());
            }
        }
    }

    fn write_target(&mut self, target: &AssignTarget) {
        match target {
            AssignTarget::Direct(name) => {
                self.writes.insert(name.clone());
            }
            AssignTarget::Index { obj, index } => {
                self.scan_expr(obj);
                self.scan_expr(index);
            }
            AssignTarget::Attr { obj, .. } => self.scan_expr(obj),
            AssignTarget::Pack(targets) => {
                for t in targets {
                    self.write_target(t);
                }
            }
        }
    }
}

/// Every variable referenced anywhere in an expression.
fn referenced_vars(expr: &ExprNode) -> BTreeSet<String> {
    let mut scope = ScopeScan::default();
    scope.scan_expr(expr);
    let mut vars = scope.reads;
    vars.extend(scope.writes);
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::lex;

    fn parse_src(src: &str) -> FuncDefExpr {
        let lexed = lex(src).expect("lex failed");
        parse_module(&lexed.root).expect("parse failed")
    }

    fn parse_err(src: &str) -> CodeError {
        let lexed = lex(src).expect("lex failed");
        parse_module(&lexed.root).expect_err("expected parse error")
    }

    #[test]
    fn assignment_chain() {
        let module = parse_src("a = b = 1\n");
        assert_eq!(module.body.len(), 1);
        let StatKind::Expr(e) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        let Expr::Assign { value, .. } = &e.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, Expr::Assign { .. }));
    }

    #[test]
    fn tuple_assignment_packs() {
        let module = parse_src("a, b = 1, 2\n");
        let StatKind::Expr(e) = &module.body[0].kind else {
            panic!("expected expression statement");
        };
        let Expr::Assign { target, .. } = &e.kind else {
            panic!("expected assignment");
        };
        assert!(matches!(**target, AssignTarget::Pack(ref ts) if ts.len() == 2));
    }

    #[test]
    fn elif_desugars_to_nested_if() {
        let module = parse_src("if a:\n    pass\nelif b:\n    pass\nelse:\n    pass\n");
        assert_eq!(module.body.len(), 1);
        let StatKind::If { orelse, .. } = &module.body[0].kind else {
            panic!("expected if");
        };
        assert_eq!(orelse.len(), 1);
        let StatKind::If { orelse: inner, .. } = &orelse[0].kind else {
            panic!("expected nested if");
        };
        assert_eq!(inner.len(), 1);
    }

    #[test]
    fn else_requires_conditional() {
        let err = parse_err("else:\n    pass\n");
        assert!(err.message.contains("else"));
    }

    #[test]
    fn with_desugars_to_try_finally() {
        let module = parse_src("with m as f:\n    f.use()\n");
        assert_eq!(module.body.len(), 3);
        assert!(matches!(module.body[0].kind, StatKind::Expr(_)));
        assert!(matches!(module.body[1].kind, StatKind::Expr(_)));
        let StatKind::Try { finally, excepts, .. } = &module.body[2].kind else {
            panic!("expected try");
        };
        assert!(excepts.is_empty());
        assert_eq!(finally.len(), 1);
    }

    #[test]
    fn break_outside_loop_rejected() {
        let err = parse_err("break\n");
        assert!(err.message.contains("outside of loop"));
        // Through a try block is still inside the loop.
        parse_src("while x:\n    try:\n        break\n    finally:\n        pass\n");
        // But not through a function boundary.
        let err = parse_err("while x:\n    def f():\n        break\n");
        assert!(err.message.contains("outside of loop"));
    }

    #[test]
    fn global_rejected_at_module_level() {
        let err = parse_err("global x\n");
        assert!(err.message.contains("module level"));
    }

    #[test]
    fn parameter_rules() {
        assert!(parse_err("def f(a, a):\n    pass\n").message.contains("duplicate"));
        assert!(
            parse_err("def f(a=1, b):\n    pass\n")
                .message
                .contains("default")
        );
        assert!(
            parse_err("def f(*a, *b):\n    pass\n")
                .message
                .contains("variadic")
        );
        assert!(
            parse_err("def f(**k, a):\n    pass\n")
                .message
                .contains("appear first")
        );
        parse_src("def f(a, b=1, *args, **kwargs):\n    pass\n");
    }

    #[test]
    fn default_except_must_be_last() {
        let err = parse_err(
            "try:\n    pass\nexcept:\n    pass\nexcept ValueError:\n    pass\n",
        );
        assert!(err.message.contains("must be last"));
    }

    #[test]
    fn try_requires_handler() {
        let err = parse_err("try:\n    pass\nx = 1\n");
        assert!(err.message.contains("except"));
    }

    #[test]
    fn capture_classification() {
        let module = parse_src(
            "def mk():\n    x = 0\n    def inc():\n        nonlocal x\n        x += 1\n        return x\n    return inc\n",
        );
        let StatKind::Def(mk) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(mk.locals, vec!["inc".to_string(), "x".to_string()]);
        let StatKind::Def(inc) = &mk.body[1].kind else {
            panic!("expected nested def");
        };
        assert_eq!(inc.local_captures, vec!["x".to_string()]);
        assert!(inc.locals.is_empty());
    }

    #[test]
    fn read_only_names_become_captures() {
        let module = parse_src("def f():\n    return helper(x)\n");
        let StatKind::Def(f) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(
            f.local_captures,
            vec!["helper".to_string(), "x".to_string()]
        );
    }

    #[test]
    fn global_declaration_wins() {
        let module = parse_src("def f():\n    global g\n    g = 1\n");
        let StatKind::Def(f) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(f.global_captures, vec!["g".to_string()]);
        assert!(f.locals.is_empty());
        assert!(f.local_captures.is_empty());
    }

    #[test]
    fn listcomp_splits_into_closures() {
        let module = parse_src("r = [x * 2 for x in items]\n");
        let StatKind::Expr(e) = &module.body[0].kind else {
            panic!("expected expr");
        };
        let Expr::Assign { value, .. } = &e.kind else {
            panic!("expected assign");
        };
        let Expr::ListComp {
            expr_fn, bind_fn, ..
        } = &value.kind
        else {
            panic!("expected list comprehension");
        };
        assert!(expr_fn.local_captures.contains(&"x".to_string()));
        assert_eq!(bind_fn.local_captures, vec!["x".to_string()]);
        assert_eq!(bind_fn.params.len(), 1);
    }

    #[test]
    fn not_in_and_is_not() {
        let module = parse_src("a = x not in y\nb = x is not y\n");
        for (i, op) in [(0, CmpOp::NotIn), (1, CmpOp::IsNot)] {
            let StatKind::Expr(e) = &module.body[i].kind else {
                panic!("expected expr");
            };
            let Expr::Assign { value, .. } = &e.kind else {
                panic!("expected assign");
            };
            let Expr::Compare { op: got, .. } = &value.kind else {
                panic!("expected comparison");
            };
            assert_eq!(*got, op);
        }
    }

    #[test]
    fn precedence() {
        // 2 + 3 * 4 parses as 2 + (3 * 4)
        let module = parse_src("v = 2 + 3 * 4\n");
        let StatKind::Expr(e) = &module.body[0].kind else {
            panic!("expected expr");
        };
        let Expr::Assign { value, .. } = &e.kind else {
            panic!("expected assign");
        };
        let Expr::Binary { op, rhs, .. } = &value.kind else {
            panic!("expected binary");
        };
        assert_eq!(*op, BinOp::Add);
        assert!(matches!(rhs.kind, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn power_is_right_associative_and_tight() {
        let module = parse_src("v = -2 ** 2\n");
        let StatKind::Expr(e) = &module.body[0].kind else {
            panic!("expected expr");
        };
        let Expr::Assign { value, .. } = &e.kind else {
            panic!("expected assign");
        };
        // Unary minus applies to the whole power expression.
        assert!(matches!(
            value.kind,
            Expr::Unary {
                op: UnaryOp::Neg,
                ..
            }
        ));
    }

    #[test]
    fn slices() {
        let module = parse_src("v = a[1:2:3]\nw = a[:2]\nu = a[::2]\n");
        for stat in &module.body {
            let StatKind::Expr(e) = &stat.kind else {
                panic!("expected expr");
            };
            let Expr::Assign { value, .. } = &e.kind else {
                panic!("expected assign");
            };
            let Expr::Index { index, .. } = &value.kind else {
                panic!("expected index");
            };
            assert!(matches!(index.kind, Expr::Slice { .. }));
        }
    }

    #[test]
    fn inline_suites() {
        let module = parse_src("def f():\n    try: return 1\n    finally: pass\n");
        let StatKind::Def(f) = &module.body[0].kind else {
            panic!("expected def");
        };
        let StatKind::Try { body, finally, .. } = &f.body[0].kind else {
            panic!("expected try");
        };
        assert!(matches!(body[0].kind, StatKind::Return(Some(_))));
        assert!(matches!(finally[0].kind, StatKind::Pass));
    }

    #[test]
    fn semicolon_separated_statements() {
        let module = parse_src("def inc():\n    nonlocal x; x += 1; return x\n");
        let StatKind::Def(f) = &module.body[0].kind else {
            panic!("expected def");
        };
        assert_eq!(f.body.len(), 3);
        assert!(matches!(f.body[0].kind, StatKind::Nonlocal(_)));
        assert!(matches!(f.body[1].kind, StatKind::Expr(_)));
        assert!(matches!(f.body[2].kind, StatKind::Return(Some(_))));
    }

    #[test]
    fn inline_class_method_suite() {
        let module = parse_src("class R:\n    def __iter__(self): self.i = 0; return self\n");
        let StatKind::Class { body, .. } = &module.body[0].kind else {
            panic!("expected class");
        };
        let StatKind::Def(m) = &body.body[0].kind else {
            panic!("expected method");
        };
        assert_eq!(m.body.len(), 2);
    }

    #[test]
    fn block_statements_rejected_inline() {
        let err = parse_err("x = 1; if x: pass\n");
        assert!(err.message.contains("not allowed"));
    }
}
