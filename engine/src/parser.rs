// Parser for mica source files.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<Module>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a mica source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start as usize..span.end as usize).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser(source);
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start as usize..e.span.end as usize).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    // A module with errors is unusable for resolution: spans would not be
    // trustworthy. Treat any error as parse failure.
    ParseResult {
        module: if all_errors.is_empty() { module } else { None },
        errors: all_errors,
    }
}

/// Convert a chumsky span to a byte-offset AST span.
fn sp(span: SimpleSpan) -> Span {
    Span::new(span.start() as u32, span.end() as u32)
}

/// Check that an expression is a valid assignment/delete target:
/// a name, attribute, subscript, or tuple of targets.
fn validate_target(expr: &Expr) -> Result<(), String> {
    match &expr.kind {
        ExprKind::Name(_) | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => Ok(()),
        ExprKind::Tuple(elems) => {
            for e in elems {
                validate_target(e)?;
            }
            Ok(())
        }
        _ => Err("invalid assignment target".to_string()),
    }
}

/// Split a raw format-string body into text and `{name}` field parts.
///
/// `base` is the byte offset of the first raw character in the source
/// (after the `f"` prefix), so field and name spans are exact.
fn fstring_parts(raw: &str, base: u32) -> Result<Vec<FsPart>, String> {
    let bytes = raw.as_bytes();
    let mut parts = Vec::new();
    let mut text_start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'}' => return Err("single '}' in format string".to_string()),
            b'{' => {
                let close = raw[i..]
                    .find('}')
                    .map(|j| i + j)
                    .ok_or_else(|| "unclosed '{' in format string".to_string())?;
                let name = &raw[i + 1..close];
                let valid = !name.is_empty()
                    && name
                        .chars()
                        .enumerate()
                        .all(|(k, c)| c == '_' || c.is_ascii_alphabetic() || (k > 0 && c.is_ascii_digit()));
                if !valid {
                    return Err(format!("invalid interpolation field: {{{name}}}"));
                }
                if text_start < i {
                    let text = crate::lexer::unescape_text(&raw[text_start..i])
                        .ok_or_else(|| "bad escape in format string".to_string())?;
                    parts.push(FsPart::Text(text));
                }
                let name_span = Span::new(base + i as u32 + 1, base + close as u32);
                parts.push(FsPart::Field {
                    name: Box::new(Expr {
                        kind: ExprKind::Name(name.to_string()),
                        span: name_span,
                    }),
                    span: Span::new(base + i as u32, base + close as u32 + 1),
                });
                i = close + 1;
                text_start = i;
            }
            _ => i += 1,
        }
    }
    if text_start < bytes.len() {
        let text = crate::lexer::unescape_text(&raw[text_start..])
            .ok_or_else(|| "bad escape in format string".to_string())?;
        parts.push(FsPart::Text(text));
    }
    Ok(parts)
}

// ── Main parser builder ──
//
// All grammar rules are built inside `module_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn module_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Module, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let src_len = source.len() as u32;

    // ── Newline padding (inside delimited constructs) ──

    let pad = just(Token::Newline).repeated().ignored();

    // ── Identifier ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span: sp(span),
        }
    });

    // ── Expressions ──

    let expr = recursive(|expr| {
        // ── Primary ──

        let literal = select! {
            Token::Int(v) = e => Expr { kind: ExprKind::Literal(Lit::Int(v)), span: sp(e.span()) },
            Token::Float(v) = e => Expr { kind: ExprKind::Literal(Lit::Float(v)), span: sp(e.span()) },
            Token::Str(s) = e => Expr { kind: ExprKind::Literal(Lit::Str(s)), span: sp(e.span()) },
            Token::True = e => Expr { kind: ExprKind::Literal(Lit::Bool(true)), span: sp(e.span()) },
            Token::False = e => Expr { kind: ExprKind::Literal(Lit::Bool(false)), span: sp(e.span()) },
            Token::Nil = e => Expr { kind: ExprKind::Literal(Lit::Nil), span: sp(e.span()) },
        };

        let name = just(Token::Ident).map_with(move |_, e| {
            let span: SimpleSpan = e.span();
            Expr {
                kind: ExprKind::Name(source[span.start()..span.end()].to_string()),
                span: sp(span),
            }
        });

        let fstring = select! { Token::FStr(raw) = e => (raw, sp(e.span())) }.try_map(
            |(raw, span): (String, Span), tspan| {
                // Raw body starts after the `f"` prefix.
                let parts = fstring_parts(&raw, span.start + 2)
                    .map_err(|msg| Rich::custom(tspan, msg))?;
                Ok(Expr {
                    kind: ExprKind::FString { parts },
                    span,
                })
            },
        );

        // `(e)` keeps the inner expression; `(a, b)` is a tuple display
        // whose span includes the parentheses.
        let paren = expr
            .clone()
            .separated_by(just(Token::Comma).then_ignore(pad.clone()))
            .at_least(1)
            .allow_trailing()
            .collect::<Vec<Expr>>()
            .delimited_by(just(Token::LParen).then_ignore(pad.clone()), pad.clone().ignore_then(just(Token::RParen)))
            .map_with(|mut elems, e| {
                if elems.len() == 1 {
                    elems.pop().unwrap()
                } else {
                    Expr {
                        kind: ExprKind::Tuple(elems),
                        span: sp(e.span()),
                    }
                }
            });

        let list = expr
            .clone()
            .separated_by(just(Token::Comma).then_ignore(pad.clone()))
            .allow_trailing()
            .collect::<Vec<Expr>>()
            .delimited_by(just(Token::LBracket).then_ignore(pad.clone()), pad.clone().ignore_then(just(Token::RBracket)))
            .map_with(|elems, e| Expr {
                kind: ExprKind::List(elems),
                span: sp(e.span()),
            });

        let dict = expr
            .clone()
            .then_ignore(just(Token::Colon).then_ignore(pad.clone()))
            .then(expr.clone())
            .separated_by(just(Token::Comma).then_ignore(pad.clone()))
            .allow_trailing()
            .collect::<Vec<(Expr, Expr)>>()
            .delimited_by(just(Token::LBrace).then_ignore(pad.clone()), pad.clone().ignore_then(just(Token::RBrace)))
            .map_with(|pairs, e| Expr {
                kind: ExprKind::Dict(pairs),
                span: sp(e.span()),
            });

        // `fn(params) -> expr`
        let lambda = just(Token::Fn)
            .ignore_then(
                ident
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<Ident>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then_ignore(just(Token::Arrow))
            .then(expr.clone())
            .map_with(|(params, body), e| Expr {
                kind: ExprKind::Lambda {
                    params,
                    body: Box::new(body),
                },
                span: sp(e.span()),
            });

        let primary = lambda
            .or(literal)
            .or(fstring)
            .or(name)
            .or(paren)
            .or(list)
            .or(dict)
            .boxed();

        // ── Postfix trailers: call / attribute / subscript ──

        enum Trailer {
            Call(Vec<Expr>, Span),
            Attr(Ident, Span),
            Index(Box<Expr>, Span),
        }

        let call_trailer = expr
            .clone()
            .separated_by(just(Token::Comma).then_ignore(pad.clone()))
            .allow_trailing()
            .collect::<Vec<Expr>>()
            .delimited_by(just(Token::LParen).then_ignore(pad.clone()), pad.clone().ignore_then(just(Token::RParen)))
            .map_with(|args, e| Trailer::Call(args, sp(e.span())));

        let attr_trailer = just(Token::Dot)
            .ignore_then(ident.clone())
            .map_with(|name, e| Trailer::Attr(name, sp(e.span())));

        let index_trailer = expr
            .clone()
            .delimited_by(just(Token::LBracket).then_ignore(pad.clone()), pad.clone().ignore_then(just(Token::RBracket)))
            .map_with(|idx, e| Trailer::Index(Box::new(idx), sp(e.span())));

        let postfix = primary
            .foldl(
                call_trailer.or(attr_trailer).or(index_trailer).repeated(),
                |obj, trailer| {
                    let obj_span = obj.span;
                    match trailer {
                        Trailer::Call(args, tspan) => Expr {
                            kind: ExprKind::Call {
                                func: Box::new(obj),
                                args,
                            },
                            span: obj_span.union(tspan),
                        },
                        Trailer::Attr(name, tspan) => Expr {
                            kind: ExprKind::Attribute {
                                obj: Box::new(obj),
                                name,
                            },
                            span: obj_span.union(tspan),
                        },
                        Trailer::Index(index, tspan) => Expr {
                            kind: ExprKind::Subscript {
                                obj: Box::new(obj),
                                index,
                            },
                            span: obj_span.union(tspan),
                        },
                    }
                },
            )
            .boxed();

        // ── Unary minus ──

        let unary = recursive(|unary| {
            just(Token::Minus)
                .map_with(|_, e| sp(e.span()))
                .then(unary)
                .map(|(minus_span, operand): (Span, Expr)| {
                    let span = minus_span.union(operand.span);
                    Expr {
                        kind: ExprKind::UnaryOp {
                            op: UnaryOpKind::Neg,
                            operand: Box::new(operand),
                        },
                        span,
                    }
                })
                .or(postfix)
        });

        // ── Multiplicative / additive (left-associative) ──

        let mul_op = select! {
            Token::Star => BinOpKind::Mul,
            Token::Slash => BinOpKind::Div,
            Token::Percent => BinOpKind::Mod,
        };
        let term = unary
            .clone()
            .foldl(mul_op.then(unary).repeated(), |left, (op, right)| {
                let span = left.span.union(right.span);
                Expr {
                    kind: ExprKind::BinOp {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                }
            })
            .boxed();

        let add_op = select! {
            Token::Plus => BinOpKind::Add,
            Token::Minus => BinOpKind::Sub,
        };
        let arith = term
            .clone()
            .foldl(add_op.then(term).repeated(), |left, (op, right)| {
                let span = left.span.union(right.span);
                Expr {
                    kind: ExprKind::BinOp {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    span,
                }
            })
            .boxed();

        // ── Comparison (non-chaining) ──

        let cmp_op = select! {
            Token::EqEq => CmpKind::Eq,
            Token::NotEq => CmpKind::Ne,
            Token::Lt => CmpKind::Lt,
            Token::Le => CmpKind::Le,
            Token::Gt => CmpKind::Gt,
            Token::Ge => CmpKind::Ge,
            Token::Is => CmpKind::Is,
            Token::In => CmpKind::In,
        };
        let comparison = arith
            .clone()
            .then(cmp_op.then(arith).or_not())
            .map(|(left, rest)| match rest {
                None => left,
                Some((op, right)) => {
                    let span = left.span.union(right.span);
                    Expr {
                        kind: ExprKind::Compare {
                            op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    }
                }
            })
            .boxed();

        // ── Boolean negation ──

        let not_expr = recursive(|not_expr| {
            just(Token::Not)
                .map_with(|_, e| sp(e.span()))
                .then(not_expr)
                .map(|(not_span, operand): (Span, Expr)| {
                    let span = not_span.union(operand.span);
                    Expr {
                        kind: ExprKind::UnaryOp {
                            op: UnaryOpKind::Not,
                            operand: Box::new(operand),
                        },
                        span,
                    }
                })
                .or(comparison)
        });

        // ── Short-circuit and / or ──

        let bool_and = not_expr
            .clone()
            .foldl(
                just(Token::And).ignore_then(not_expr).repeated(),
                |left, right| {
                    let span = left.span.union(right.span);
                    Expr {
                        kind: ExprKind::BoolOp {
                            op: BoolOpKind::And,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    }
                },
            )
            .boxed();

        bool_and
            .clone()
            .foldl(
                just(Token::Or).ignore_then(bool_and).repeated(),
                |left, right| {
                    let span = left.span.union(right.span);
                    Expr {
                        kind: ExprKind::BoolOp {
                            op: BoolOpKind::Or,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        span,
                    }
                },
            )
            .boxed()
    });

    // ── Statement-level expression list: `a, b, c` → tuple ──

    let expr_list = expr
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<Expr>>()
        .map(|mut elems| {
            if elems.len() == 1 {
                elems.pop().unwrap()
            } else {
                let span = elems[0].span.union(elems[elems.len() - 1].span);
                Expr {
                    kind: ExprKind::Tuple(elems),
                    span,
                }
            }
        })
        .boxed();

    // ── Statements ──

    let stmt = recursive(|stmt| {
        // Statement separators: newlines and/or semicolons.
        let sep = just(Token::Newline)
            .or(just(Token::Semi))
            .repeated()
            .at_least(1)
            .ignored();

        let stmt_list = stmt
            .clone()
            .separated_by(sep.clone())
            .allow_leading()
            .allow_trailing()
            .collect::<Vec<Stmt>>();

        let block = stmt_list
            .clone()
            .delimited_by(just(Token::LBrace), just(Token::RBrace))
            .boxed();

        // ── fn name(params) { body } ──

        let fn_def = just(Token::Fn)
            .ignore_then(ident.clone())
            .then(
                ident
                    .clone()
                    .separated_by(just(Token::Comma))
                    .allow_trailing()
                    .collect::<Vec<Ident>>()
                    .delimited_by(just(Token::LParen), just(Token::RParen)),
            )
            .then(block.clone())
            .map_with(|((name, params), body), e| Stmt {
                kind: StmtKind::FnDef { name, params, body },
                span: sp(e.span()),
            });

        // ── class Name { body } ──

        let class_def = just(Token::Class)
            .ignore_then(ident.clone())
            .then(block.clone())
            .map_with(|(name, body), e| Stmt {
                kind: StmtKind::ClassDef { name, body },
                span: sp(e.span()),
            });

        // ── return ──

        let return_stmt = just(Token::Return)
            .ignore_then(expr_list.clone().or_not())
            .map_with(|value, e| Stmt {
                kind: StmtKind::Return { value },
                span: sp(e.span()),
            });

        // ── del ──

        let del_stmt = just(Token::Del)
            .ignore_then(
                expr.clone()
                    .separated_by(just(Token::Comma))
                    .at_least(1)
                    .collect::<Vec<Expr>>(),
            )
            .try_map_with(|targets, e| {
                for t in &targets {
                    validate_target(t).map_err(|msg| Rich::custom(e.span(), msg))?;
                }
                Ok(Stmt {
                    kind: StmtKind::Delete { targets },
                    span: sp(e.span()),
                })
            });

        // ── if / else ──

        let if_stmt = recursive(|if_stmt| {
            just(Token::If)
                .ignore_then(expr.clone())
                .then(block.clone())
                .then(
                    just(Token::Else)
                        .ignore_then(block.clone().or(if_stmt.map(|s: Stmt| vec![s])))
                        .or_not(),
                )
                .map_with(|((test, then_body), else_body), e| Stmt {
                    kind: StmtKind::If {
                        test,
                        then_body,
                        else_body: else_body.unwrap_or_default(),
                    },
                    span: sp(e.span()),
                })
        });

        // ── while ──

        let while_stmt = just(Token::While)
            .ignore_then(expr.clone())
            .then(block.clone())
            .map_with(|(test, body), e| Stmt {
                kind: StmtKind::While { test, body },
                span: sp(e.span()),
            });

        // ── augmented assignment: `name op= expr` ──

        let aug_op = select! {
            Token::PlusEq => BinOpKind::Add,
            Token::MinusEq => BinOpKind::Sub,
            Token::StarEq => BinOpKind::Mul,
            Token::SlashEq => BinOpKind::Div,
        };
        let aug_assign = ident
            .clone()
            .then(aug_op)
            .then(expr.clone())
            .map_with(|((target, op), value), e| Stmt {
                kind: StmtKind::AugAssign { target, op, value },
                span: sp(e.span()),
            });

        // ── assignment / expression statement ──
        //
        // `t1 = t2 = ... = value`: everything before the final list is a
        // target and must be a valid target expression.

        let assign_or_expr = expr_list
            .clone()
            .then(
                just(Token::Equals)
                    .ignore_then(expr_list.clone())
                    .repeated()
                    .collect::<Vec<Expr>>(),
            )
            .try_map_with(|(first, mut rest), e| {
                let span = sp(e.span());
                if rest.is_empty() {
                    return Ok(Stmt {
                        kind: StmtKind::Expr { value: first },
                        span,
                    });
                }
                let value = rest.pop().unwrap();
                let mut targets = vec![first];
                targets.append(&mut rest);
                for t in &targets {
                    validate_target(t).map_err(|msg| Rich::custom(e.span(), msg))?;
                }
                Ok(Stmt {
                    kind: StmtKind::Assign { targets, value },
                    span,
                })
            });

        fn_def
            .or(class_def)
            .or(return_stmt)
            .or(del_stmt)
            .or(if_stmt)
            .or(while_stmt)
            .or(aug_assign)
            .or(assign_or_expr)
            .boxed()
    });

    // ── Module ──

    let sep = just(Token::Newline)
        .or(just(Token::Semi))
        .repeated()
        .at_least(1)
        .ignored();

    stmt.separated_by(sep)
        .allow_leading()
        .allow_trailing()
        .collect::<Vec<Stmt>>()
        .then_ignore(end())
        .map(move |body| Module {
            body,
            span: Span::new(0, src_len),
        })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Module {
        let result = parse(source);
        assert!(
            result.errors.is_empty(),
            "unexpected parse errors for {source:?}: {:?}",
            result.errors
        );
        result.module.expect("no module produced")
    }

    fn single_expr(source: &str) -> Expr {
        let module = parse_ok(source);
        assert_eq!(module.body.len(), 1, "expected one statement");
        match module.body.into_iter().next().unwrap().kind {
            StmtKind::Expr { value } => value,
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn binop_spans_cover_operands() {
        let e = single_expr("134895 / 0");
        assert_eq!(e.span, Span::new(0, 10));
        match e.kind {
            ExprKind::BinOp { op, left, right } => {
                assert_eq!(op, BinOpKind::Div);
                assert_eq!(left.span, Span::new(0, 6));
                assert_eq!(right.span, Span::new(9, 10));
            }
            other => panic!("expected BinOp, got {other:?}"),
        }
    }

    #[test]
    fn precedence_mul_over_add() {
        let e = single_expr("1 + 2 * 3");
        match e.kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(op, BinOpKind::Add);
                assert!(matches!(
                    right.kind,
                    ExprKind::BinOp {
                        op: BinOpKind::Mul,
                        ..
                    }
                ));
            }
            other => panic!("expected BinOp, got {other:?}"),
        }
    }

    #[test]
    fn method_call_shape() {
        let e = single_expr("obj.method(1, x)");
        match e.kind {
            ExprKind::Call { func, args } => {
                assert_eq!(args.len(), 2);
                match func.kind {
                    ExprKind::Attribute { name, .. } => assert_eq!(name.name, "method"),
                    other => panic!("expected Attribute func, got {other:?}"),
                }
                // Attribute span covers `obj.method`, call span the whole text.
                assert_eq!(func.span, Span::new(0, 10));
                assert_eq!(e.span, Span::new(0, 16));
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn chained_assignment() {
        let module = parse_ok("a = b = 1");
        match &module.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 2);
                assert!(matches!(value.kind, ExprKind::Literal(Lit::Int(1))));
            }
            other => panic!("expected Assign, got {other:?}"),
        }
    }

    #[test]
    fn tuple_unpack_target() {
        let module = parse_ok("a, b = 1, 2");
        match &module.body[0].kind {
            StmtKind::Assign { targets, value } => {
                assert_eq!(targets.len(), 1);
                assert!(matches!(targets[0].kind, ExprKind::Tuple(_)));
                assert!(matches!(value.kind, ExprKind::Tuple(_)));
            }
            other => panic!("expected Assign, got {other:?}"),
        }
    }

    #[test]
    fn invalid_target_rejected() {
        let result = parse("1 + 2 = 3");
        assert!(!result.errors.is_empty());
        assert!(result.module.is_none());
    }

    #[test]
    fn aug_assign_name_only() {
        let module = parse_ok("x += 2");
        assert!(matches!(
            module.body[0].kind,
            StmtKind::AugAssign {
                op: BinOpKind::Add,
                ..
            }
        ));
        // Attribute targets are not supported for aug-assignment.
        let result = parse("a.b += 2");
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn semicolon_separated_statements() {
        let module = parse_ok("probe(1); probe(2); probe(3)");
        assert_eq!(module.body.len(), 3);
    }

    #[test]
    fn fn_def_and_nested() {
        let module = parse_ok("fn f(a, b) {\n  return a + b\n}");
        match &module.body[0].kind {
            StmtKind::FnDef { name, params, body } => {
                assert_eq!(name.name, "f");
                assert_eq!(params.len(), 2);
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected FnDef, got {other:?}"),
        }
    }

    #[test]
    fn class_def() {
        let module = parse_ok("class C {\n  fn m(self) {\n    return 1\n  }\n}");
        match &module.body[0].kind {
            StmtKind::ClassDef { name, body } => {
                assert_eq!(name.name, "C");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected ClassDef, got {other:?}"),
        }
    }

    #[test]
    fn lambda_expression() {
        let e = single_expr("fn(x) -> x + 1");
        match e.kind {
            ExprKind::Lambda { params, body } => {
                assert_eq!(params.len(), 1);
                assert!(matches!(body.kind, ExprKind::BinOp { .. }));
            }
            other => panic!("expected Lambda, got {other:?}"),
        }
    }

    #[test]
    fn if_else_chain() {
        let module = parse_ok("if a { b() } else if c { d() } else { e() }");
        match &module.body[0].kind {
            StmtKind::If { else_body, .. } => {
                assert_eq!(else_body.len(), 1);
                assert!(matches!(else_body[0].kind, StmtKind::If { .. }));
            }
            other => panic!("expected If, got {other:?}"),
        }
    }

    #[test]
    fn fstring_fields_have_exact_spans() {
        let e = single_expr(r#"f"a {name} b""#);
        match e.kind {
            ExprKind::FString { parts } => {
                assert_eq!(parts.len(), 3);
                match &parts[1] {
                    FsPart::Field { name, span } => {
                        // `{name}` starts at byte 4 of the source.
                        assert_eq!(*span, Span::new(4, 10));
                        assert_eq!(name.span, Span::new(5, 9));
                    }
                    other => panic!("expected Field, got {other:?}"),
                }
            }
            other => panic!("expected FString, got {other:?}"),
        }
    }

    #[test]
    fn multiline_call_arguments() {
        let module = parse_ok("probe(\n  1,\n  2,\n)");
        assert_eq!(module.body.len(), 1);
    }

    #[test]
    fn unparsable_source_yields_no_module() {
        let result = parse("fn fn fn (((");
        assert!(result.module.is_none());
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn del_statement() {
        let module = parse_ok("del x, a.b, c[0]");
        match &module.body[0].kind {
            StmtKind::Delete { targets } => assert_eq!(targets.len(), 3),
            other => panic!("expected Delete, got {other:?}"),
        }
    }

    #[test]
    fn comparison_operators() {
        for (src, op) in [
            ("a == b", CmpKind::Eq),
            ("a != b", CmpKind::Ne),
            ("a is b", CmpKind::Is),
            ("a in b", CmpKind::In),
        ] {
            let e = single_expr(src);
            match e.kind {
                ExprKind::Compare { op: got, .. } => assert_eq!(got, op, "{src}"),
                other => panic!("expected Compare for {src}, got {other:?}"),
            }
        }
    }
}
