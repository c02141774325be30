//! Adapter from `sqlparser` trees to the crate's own statement model.
//!
//! Only the shapes the model carries are accepted. Everything else fails with
//! [`HoistError::Unsupported`] so a caller can fall back to the input text.

use sqlparser::ast as sql;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::ast::{
    ArithmeticOp, CaseBranch, CastStyle, ColumnRef, ComparisonOp, Cte, Expr, Function, Ident,
    Join, JoinKind, Literal, ObjectName, OrderByExpr, Query, Select, SelectItem, TableFactor,
    TableWithJoins, UnaryOp, WindowSpec,
};
use crate::error::{HoistError, HoistResult};

/// Parse exactly one `SELECT` statement (PostgreSQL dialect).
pub fn parse_query(sql_text: &str) -> HoistResult<Query> {
    let dialect = PostgreSqlDialect {};
    let mut statements =
        Parser::parse_sql(&dialect, sql_text).map_err(|e| HoistError::Parse(e.to_string()))?;

    if statements.len() != 1 {
        return Err(HoistError::Parse(format!(
            "expected exactly one statement, found {}",
            statements.len()
        )));
    }

    match statements.remove(0) {
        sql::Statement::Query(query) => lower_query(*query),
        _ => Err(HoistError::unsupported("only SELECT statements can be rewritten")),
    }
}

pub fn lower_query(query: sql::Query) -> HoistResult<Query> {
    let sql::Query {
        with,
        body,
        order_by,
        limit_clause,
        fetch,
        locks,
        for_clause,
        settings,
        format_clause,
        pipe_operators,
    } = query;

    reject_if(fetch.is_some(), "FETCH")?;
    reject_if(!locks.is_empty(), "FOR UPDATE/SHARE")?;
    reject_if(for_clause.is_some(), "FOR XML/JSON/BROWSE")?;
    reject_if(settings.is_some(), "SETTINGS")?;
    reject_if(format_clause.is_some(), "FORMAT")?;
    reject_if(!pipe_operators.is_empty(), "pipe operators")?;

    let with = match with {
        None => None,
        Some(with) => {
            reject_if(with.recursive, "WITH RECURSIVE")?;
            Some(
                with.cte_tables
                    .into_iter()
                    .map(lower_cte)
                    .collect::<HoistResult<Vec<_>>>()?,
            )
        }
    };

    let body = match *body {
        sql::SetExpr::Select(select) => lower_select(*select)?,
        other => {
            return Err(HoistError::unsupported(format!(
                "query body other than a plain SELECT: {}",
                other
            )));
        }
    };

    let order_by = match order_by {
        None => Vec::new(),
        Some(order_by) => {
            reject_if(order_by.interpolate.is_some(), "INTERPOLATE")?;
            match order_by.kind {
                sql::OrderByKind::Expressions(exprs) => exprs
                    .into_iter()
                    .map(lower_order_by)
                    .collect::<HoistResult<Vec<_>>>()?,
                sql::OrderByKind::All(_) => return Err(HoistError::unsupported("ORDER BY ALL")),
            }
        }
    };

    let (limit, offset) = match limit_clause {
        None => (None, None),
        Some(sql::LimitClause::LimitOffset {
            limit,
            offset,
            limit_by,
        }) => {
            if !limit_by.is_empty() {
                return Err(HoistError::unsupported("LIMIT BY"));
            }
            (
                limit.map(lower_expr).transpose()?,
                offset.map(|o| lower_expr(o.value)).transpose()?,
            )
        }
        Some(sql::LimitClause::OffsetCommaLimit { .. }) => {
            return Err(HoistError::unsupported("LIMIT <offset>, <limit>"));
        }
    };

    Ok(Query {
        with,
        body,
        order_by,
        limit,
        offset,
    })
}

fn lower_cte(cte: sql::Cte) -> HoistResult<Cte> {
    reject_if(!cte.alias.columns.is_empty(), "CTE column lists")?;
    reject_if(cte.materialized.is_some(), "MATERIALIZED CTE hints")?;
    reject_if(cte.from.is_some(), "CTE FROM")?;
    Ok(Cte {
        name: lower_ident(cte.alias.name),
        query: lower_query(*cte.query)?,
    })
}

fn lower_select(select: sql::Select) -> HoistResult<Select> {
    let sql::Select {
        select_token: _,
        distinct,
        top,
        top_before_distinct: _,
        projection,
        exclude,
        into,
        from,
        lateral_views,
        prewhere,
        selection,
        group_by,
        cluster_by,
        distribute_by,
        sort_by,
        having,
        named_window,
        qualify,
        window_before_qualify: _,
        value_table_mode,
        connect_by,
        flavor,
    } = select;

    reject_if(top.is_some(), "TOP")?;
    reject_if(exclude.is_some(), "EXCLUDE")?;
    reject_if(into.is_some(), "SELECT INTO")?;
    reject_if(!lateral_views.is_empty(), "LATERAL VIEW")?;
    reject_if(prewhere.is_some(), "PREWHERE")?;
    reject_if(!cluster_by.is_empty(), "CLUSTER BY")?;
    reject_if(!distribute_by.is_empty(), "DISTRIBUTE BY")?;
    reject_if(!sort_by.is_empty(), "SORT BY")?;
    reject_if(!named_window.is_empty(), "WINDOW clause")?;
    reject_if(qualify.is_some(), "QUALIFY")?;
    reject_if(value_table_mode.is_some(), "SELECT AS VALUE/STRUCT")?;
    reject_if(connect_by.is_some(), "CONNECT BY")?;
    reject_if(
        !matches!(flavor, sql::SelectFlavor::Standard),
        "FROM-first SELECT",
    )?;

    let distinct = match distinct {
        None => false,
        Some(sql::Distinct::Distinct) => true,
        Some(_) => return Err(HoistError::unsupported("DISTINCT ON")),
    };

    let group_by = match group_by {
        sql::GroupByExpr::Expressions(exprs, modifiers) => {
            if !modifiers.is_empty() {
                return Err(HoistError::unsupported("GROUP BY modifiers"));
            }
            exprs
                .into_iter()
                .map(lower_expr)
                .collect::<HoistResult<Vec<_>>>()?
        }
        sql::GroupByExpr::All(_) => return Err(HoistError::unsupported("GROUP BY ALL")),
    };

    Ok(Select {
        distinct,
        projection: projection
            .into_iter()
            .map(lower_select_item)
            .collect::<HoistResult<Vec<_>>>()?,
        from: from
            .into_iter()
            .map(lower_table_with_joins)
            .collect::<HoistResult<Vec<_>>>()?,
        selection: selection.map(lower_expr).transpose()?,
        group_by,
        having: having.map(lower_expr).transpose()?,
    })
}

fn lower_select_item(item: sql::SelectItem) -> HoistResult<SelectItem> {
    match item {
        sql::SelectItem::UnnamedExpr(expr) => Ok(SelectItem::Expr {
            expr: lower_expr(expr)?,
            alias: None,
        }),
        sql::SelectItem::ExprWithAlias { expr, alias } => Ok(SelectItem::Expr {
            expr: lower_expr(expr)?,
            alias: Some(lower_ident(alias)),
        }),
        sql::SelectItem::Wildcard(_) => Ok(SelectItem::Wildcard),
        sql::SelectItem::QualifiedWildcard(kind, _) => match kind {
            sql::SelectItemQualifiedWildcardKind::ObjectName(name) => {
                Ok(SelectItem::QualifiedWildcard(lower_object_name(name)?))
            }
            sql::SelectItemQualifiedWildcardKind::Expr(_) => {
                Err(HoistError::unsupported("expression-qualified wildcard"))
            }
        },
    }
}

fn lower_table_with_joins(table: sql::TableWithJoins) -> HoistResult<TableWithJoins> {
    Ok(TableWithJoins {
        relation: lower_table_factor(table.relation)?,
        joins: table
            .joins
            .into_iter()
            .map(lower_join)
            .collect::<HoistResult<Vec<_>>>()?,
    })
}

fn lower_table_factor(factor: sql::TableFactor) -> HoistResult<TableFactor> {
    match factor {
        sql::TableFactor::Table {
            name,
            alias,
            args,
            with_hints,
            version,
            with_ordinality,
            partitions,
            json_path,
            sample,
            index_hints,
        } => {
            reject_if(args.is_some(), "table-valued function")?;
            reject_if(!with_hints.is_empty(), "table hints")?;
            reject_if(version.is_some(), "table versions")?;
            reject_if(with_ordinality, "WITH ORDINALITY")?;
            reject_if(!partitions.is_empty(), "PARTITION")?;
            reject_if(json_path.is_some(), "JSON path table reference")?;
            reject_if(sample.is_some(), "TABLESAMPLE")?;
            reject_if(!index_hints.is_empty(), "index hints")?;
            Ok(TableFactor::Table {
                name: lower_object_name(name)?,
                alias: alias.map(lower_table_alias).transpose()?,
            })
        }
        sql::TableFactor::Derived {
            lateral,
            subquery,
            alias,
        } => {
            reject_if(lateral, "LATERAL")?;
            Ok(TableFactor::Derived {
                subquery: Box::new(lower_query(*subquery)?),
                alias: alias.map(lower_table_alias).transpose()?,
            })
        }
        other => Err(HoistError::unsupported(format!("table factor {}", other))),
    }
}

fn lower_table_alias(alias: sql::TableAlias) -> HoistResult<Ident> {
    if !alias.columns.is_empty() {
        return Err(HoistError::unsupported("table alias column lists"));
    }
    Ok(lower_ident(alias.name))
}

fn lower_join(join: sql::Join) -> HoistResult<Join> {
    use sql::JoinOperator as Op;

    reject_if(join.global, "GLOBAL JOIN")?;

    let (kind, constraint) = match join.join_operator {
        Op::Join(c) | Op::Inner(c) => (JoinKind::Inner, c),
        Op::Left(c) | Op::LeftOuter(c) => (JoinKind::Left, c),
        Op::Right(c) | Op::RightOuter(c) => (JoinKind::Right, c),
        Op::FullOuter(c) => (JoinKind::Full, c),
        _ => return Err(HoistError::unsupported("join kind")),
    };
    let on = match constraint {
        sql::JoinConstraint::On(expr) => lower_expr(expr)?,
        _ => return Err(HoistError::unsupported("join without an ON condition")),
    };

    Ok(Join {
        kind,
        relation: lower_table_factor(join.relation)?,
        on,
    })
}

fn lower_order_by(order_by: sql::OrderByExpr) -> HoistResult<OrderByExpr> {
    if order_by.with_fill.is_some() {
        return Err(HoistError::unsupported("WITH FILL"));
    }
    Ok(OrderByExpr {
        expr: lower_expr(order_by.expr)?,
        asc: order_by.options.asc,
        nulls_first: order_by.options.nulls_first,
    })
}

/// Lower-cases a printed type name outside its quoted identifiers.
fn fold_type_name(text: &str) -> String {
    let mut quoted = false;
    text.chars()
        .map(|c| {
            if c == '"' {
                quoted = !quoted;
            }
            if quoted { c } else { c.to_ascii_lowercase() }
        })
        .collect()
}

fn reject_if(present: bool, what: &str) -> HoistResult<()> {
    if present {
        return Err(HoistError::unsupported(what));
    }
    Ok(())
}

fn lower_ident(ident: sql::Ident) -> Ident {
    Ident {
        value: ident.value,
        quoted: ident.quote_style.is_some(),
    }
}

fn lower_object_name(name: sql::ObjectName) -> HoistResult<ObjectName> {
    let mut parts = Vec::with_capacity(name.0.len());
    for part in name.0 {
        #[allow(unreachable_patterns)]
        match part {
            sql::ObjectNamePart::Identifier(ident) => parts.push(lower_ident(ident)),
            _ => return Err(HoistError::unsupported("function-valued object name")),
        }
    }
    Ok(ObjectName(parts))
}

fn lower_value(value: sql::Value) -> HoistResult<Literal> {
    match value {
        sql::Value::Number(n, _) => Ok(match n.parse::<i64>() {
            Ok(i) => Literal::Integer(i),
            Err(_) => Literal::Decimal(n),
        }),
        sql::Value::SingleQuotedString(s) => Ok(Literal::String(s)),
        sql::Value::Boolean(b) => Ok(Literal::Boolean(b)),
        sql::Value::Null => Ok(Literal::Null),
        sql::Value::Placeholder(p) => Err(HoistError::unsupported(format!("placeholder {}", p))),
        other => Err(HoistError::unsupported(format!("literal {}", other))),
    }
}

fn boxed(expr: Box<sql::Expr>) -> HoistResult<Box<Expr>> {
    Ok(Box::new(lower_expr(*expr)?))
}

fn lower_subquery(query: Box<sql::Query>) -> HoistResult<Box<Query>> {
    Ok(Box::new(lower_query(*query)?))
}

pub fn lower_expr(expr: sql::Expr) -> HoistResult<Expr> {
    use sql::Expr as E;

    match expr {
        E::Identifier(ident) => Ok(Expr::Column(ColumnRef::new(lower_ident(ident)))),
        E::CompoundIdentifier(mut idents) => match idents.len() {
            2 => {
                let name = lower_ident(idents.remove(1));
                let table = lower_ident(idents.remove(0));
                Ok(Expr::Column(ColumnRef::qualified(table, name)))
            }
            n => Err(HoistError::unsupported(format!(
                "column reference with {} name parts",
                n
            ))),
        },
        E::Value(value) => Ok(Expr::Literal(lower_value(value.value)?)),
        E::BinaryOp { left, op, right } => lower_binary_op(left, op, right),
        E::UnaryOp { op, expr } => match op {
            sql::UnaryOperator::Not => Ok(Expr::Not(boxed(expr)?)),
            sql::UnaryOperator::Plus => Ok(Expr::Unary {
                op: UnaryOp::Plus,
                expr: boxed(expr)?,
            }),
            sql::UnaryOperator::Minus => Ok(Expr::Unary {
                op: UnaryOp::Minus,
                expr: boxed(expr)?,
            }),
            other => Err(HoistError::unsupported(format!("unary operator {}", other))),
        },
        E::Nested(expr) => Ok(Expr::Nested(boxed(expr)?)),
        E::Function(func) => lower_function(func),
        E::IsNull(expr) => Ok(Expr::IsNull {
            expr: boxed(expr)?,
            negated: false,
        }),
        E::IsNotNull(expr) => Ok(Expr::IsNull {
            expr: boxed(expr)?,
            negated: true,
        }),
        E::Between {
            expr,
            negated,
            low,
            high,
        } => Ok(Expr::Between {
            expr: boxed(expr)?,
            negated,
            low: boxed(low)?,
            high: boxed(high)?,
        }),
        E::InList {
            expr,
            list,
            negated,
        } => Ok(Expr::InList {
            expr: boxed(expr)?,
            list: list
                .into_iter()
                .map(lower_expr)
                .collect::<HoistResult<Vec<_>>>()?,
            negated,
        }),
        E::InSubquery {
            expr,
            subquery,
            negated,
        } => Ok(Expr::InSubquery {
            expr: boxed(expr)?,
            subquery: lower_subquery(subquery)?,
            negated,
        }),
        E::Subquery(query) => Ok(Expr::Subquery(lower_subquery(query)?)),
        E::Exists { subquery, negated } => Ok(Expr::Exists {
            subquery: lower_subquery(subquery)?,
            negated,
        }),
        E::Cast {
            kind,
            expr,
            data_type,
            format: None,
            ..
        } => {
            let style = match kind {
                sql::CastKind::Cast => CastStyle::Function,
                sql::CastKind::DoubleColon => CastStyle::DoubleColon,
                _ => return Err(HoistError::unsupported("TRY_CAST/SAFE_CAST")),
            };
            Ok(Expr::Cast {
                expr: boxed(expr)?,
                data_type: fold_type_name(&data_type.to_string()),
                style,
            })
        }
        E::Case {
            operand,
            conditions,
            else_result,
            ..
        } => Ok(Expr::Case {
            operand: operand.map(boxed).transpose()?,
            branches: conditions
                .into_iter()
                .map(|when| {
                    Ok(CaseBranch {
                        condition: lower_expr(when.condition)?,
                        result: lower_expr(when.result)?,
                    })
                })
                .collect::<HoistResult<Vec<_>>>()?,
            else_result: else_result.map(boxed).transpose()?,
        }),
        E::Extract { field, expr, .. } => Ok(Expr::Extract {
            field: field.to_string().to_lowercase(),
            expr: boxed(expr)?,
        }),
        E::Like {
            negated,
            any: false,
            expr,
            pattern,
            escape_char: None,
            ..
        } => Ok(Expr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated,
            case_insensitive: false,
        }),
        E::ILike {
            negated,
            any: false,
            expr,
            pattern,
            escape_char: None,
            ..
        } => Ok(Expr::Like {
            expr: boxed(expr)?,
            pattern: boxed(pattern)?,
            negated,
            case_insensitive: true,
        }),
        other => Err(HoistError::unsupported(format!("expression {}", other))),
    }
}

fn lower_binary_op(
    left: Box<sql::Expr>,
    op: sql::BinaryOperator,
    right: Box<sql::Expr>,
) -> HoistResult<Expr> {
    use sql::BinaryOperator as B;

    let left = boxed(left)?;
    let right = boxed(right)?;

    let arithmetic = match op {
        B::And => return Ok(Expr::And { left, right }),
        B::Or => return Ok(Expr::Or { left, right }),
        B::Eq => return Ok(comparison(left, ComparisonOp::Eq, right)),
        B::NotEq => return Ok(comparison(left, ComparisonOp::NotEq, right)),
        B::Lt => return Ok(comparison(left, ComparisonOp::Lt, right)),
        B::LtEq => return Ok(comparison(left, ComparisonOp::LtEq, right)),
        B::Gt => return Ok(comparison(left, ComparisonOp::Gt, right)),
        B::GtEq => return Ok(comparison(left, ComparisonOp::GtEq, right)),
        B::Plus => ArithmeticOp::Add,
        B::Minus => ArithmeticOp::Sub,
        B::Multiply => ArithmeticOp::Mul,
        B::Divide => ArithmeticOp::Div,
        B::Modulo => ArithmeticOp::Rem,
        B::StringConcat => ArithmeticOp::Concat,
        other => return Err(HoistError::unsupported(format!("binary operator {}", other))),
    };

    Ok(Expr::Arithmetic {
        left,
        op: arithmetic,
        right,
    })
}

fn comparison(left: Box<Expr>, op: ComparisonOp, right: Box<Expr>) -> Expr {
    Expr::Comparison { left, op, right }
}

fn lower_function(func: sql::Function) -> HoistResult<Expr> {
    let sql::Function {
        name,
        parameters,
        args,
        filter,
        null_treatment,
        over,
        within_group,
        ..
    } = func;

    if filter.is_some() {
        return Err(HoistError::unsupported("aggregate FILTER"));
    }
    if null_treatment.is_some() {
        return Err(HoistError::unsupported("IGNORE/RESPECT NULLS"));
    }
    if !within_group.is_empty() {
        return Err(HoistError::unsupported("WITHIN GROUP"));
    }
    if !matches!(parameters, sql::FunctionArguments::None) {
        return Err(HoistError::unsupported("parametric function"));
    }

    let (args, distinct) = match args {
        sql::FunctionArguments::None => (None, false),
        sql::FunctionArguments::Subquery(_) => {
            return Err(HoistError::unsupported("subquery as function argument list"));
        }
        sql::FunctionArguments::List(list) => {
            if !list.clauses.is_empty() {
                return Err(HoistError::unsupported("function argument clauses"));
            }
            let distinct = matches!(
                list.duplicate_treatment,
                Some(sql::DuplicateTreatment::Distinct)
            );
            let args = list
                .args
                .into_iter()
                .map(lower_function_arg)
                .collect::<HoistResult<Vec<_>>>()?;
            (Some(args), distinct)
        }
    };

    let over = match over {
        None => None,
        Some(sql::WindowType::WindowSpec(spec)) => {
            if spec.window_name.is_some() || spec.window_frame.is_some() {
                return Err(HoistError::unsupported("window frames and named windows"));
            }
            Some(WindowSpec {
                partition_by: spec
                    .partition_by
                    .into_iter()
                    .map(lower_expr)
                    .collect::<HoistResult<Vec<_>>>()?,
                order_by: spec
                    .order_by
                    .into_iter()
                    .map(lower_order_by)
                    .collect::<HoistResult<Vec<_>>>()?,
            })
        }
        Some(_) => return Err(HoistError::unsupported("named window reference")),
    };

    Ok(Expr::Function(Function {
        name: lower_object_name(name)?,
        args,
        distinct,
        over,
    }))
}

fn lower_function_arg(arg: sql::FunctionArg) -> HoistResult<Expr> {
    match arg {
        sql::FunctionArg::Unnamed(arg) => {
            #[allow(unreachable_patterns)]
            match arg {
                sql::FunctionArgExpr::Expr(expr) => lower_expr(expr),
                sql::FunctionArgExpr::Wildcard => Ok(Expr::Wildcard),
                sql::FunctionArgExpr::QualifiedWildcard(name) => {
                    Ok(Expr::QualifiedWildcard(lower_object_name(name)?))
                }
                _ => Err(HoistError::unsupported("wildcard options in function arguments")),
            }
        }
        _ => Err(HoistError::unsupported("named function arguments")),
    }
}
