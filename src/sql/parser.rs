//! # SQL Parser
//!
//! Recursive-descent parser with precedence climbing for expressions. The
//! grammar is the supported subset of PostgreSQL syntax; anything outside it
//! fails with `InvalidInput` naming the offending token.
//!
//! ## Expression Precedence (loosest to tightest)
//!
//! ```text
//! OR < AND < comparisons < distance ops (<-> <#> <=>) < + - < * / %
//! ```

use super::ast::{
    AstJoinType, BinaryOp, ColumnDef, Expr, OrderDir, SelectItem, SelectStmt, Stmt, TableRef,
};
use super::lexer::{tokenize, Keyword, Token};
use crate::error::DbError;
use crate::types::TypeId;
use bumpalo::Bump;
use eyre::Result;

pub fn parse_statement<'a>(sql: &'a str, arena: &'a Bump) -> Result<Stmt<'a>> {
    let tokens = tokenize(sql, arena)?;
    let mut parser = Parser { tokens, pos: 0, arena };
    let stmt = parser.statement()?;
    parser.eat(Token::Semicolon);
    parser.expect(Token::Eof)?;
    Ok(stmt)
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    arena: &'a Bump,
}

fn invalid(msg: impl Into<String>) -> eyre::Report {
    DbError::InvalidInput(msg.into()).into()
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Token<'a> {
        self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token<'a> {
        let token = self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: Token<'a>) -> bool {
        if self.peek() == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        self.eat(Token::Keyword(kw))
    }

    fn expect(&mut self, token: Token<'a>) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(invalid(format!("expected {token:?}, found {:?}", self.peek())))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<()> {
        self.expect(Token::Keyword(kw))
    }

    fn ident(&mut self) -> Result<&'a str> {
        match self.advance() {
            Token::Ident(name) => Ok(name),
            other => Err(invalid(format!("expected identifier, found {other:?}"))),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> Result<Stmt<'a>> {
        match self.peek() {
            Token::Keyword(Keyword::Create) => self.create(),
            Token::Keyword(Keyword::Select) => {
                let select = self.select()?;
                Ok(Stmt::Select(self.arena.alloc(select)))
            }
            Token::Keyword(Keyword::Insert) => self.insert(),
            Token::Keyword(Keyword::Update) => self.update(),
            Token::Keyword(Keyword::Delete) => self.delete(),
            Token::Keyword(Keyword::Explain) => {
                self.advance();
                let inner = self.statement()?;
                Ok(Stmt::Explain(self.arena.alloc(inner)))
            }
            Token::Keyword(Keyword::Begin) => {
                self.advance();
                let serializable = self.eat_keyword(Keyword::Serializable);
                Ok(Stmt::Begin { serializable })
            }
            Token::Keyword(Keyword::Commit) => {
                self.advance();
                Ok(Stmt::Commit)
            }
            Token::Keyword(Keyword::Abort) | Token::Keyword(Keyword::Rollback) => {
                self.advance();
                Ok(Stmt::Abort)
            }
            Token::Keyword(Keyword::Set) => {
                self.advance();
                let name = self.ident()?;
                self.expect(Token::Eq)?;
                let value = self.setting_value()?;
                Ok(Stmt::Set { name, value })
            }
            Token::Keyword(Keyword::Show) => {
                self.advance();
                let name = self.ident()?;
                Ok(Stmt::Show { name })
            }
            other => Err(invalid(format!("unexpected start of statement: {other:?}"))),
        }
    }

    fn setting_value(&mut self) -> Result<&'a str> {
        match self.advance() {
            Token::Ident(value) | Token::StringLit(value) => Ok(value),
            Token::IntLit(v) => Ok(self.arena.alloc_str(&v.to_string())),
            Token::FloatLit(v) => Ok(self.arena.alloc_str(&v.to_string())),
            Token::Keyword(Keyword::True) => Ok("true"),
            Token::Keyword(Keyword::False) => Ok("false"),
            Token::Keyword(Keyword::On) => Ok("on"),
            other => Err(invalid(format!("bad SET value: {other:?}"))),
        }
    }

    fn create(&mut self) -> Result<Stmt<'a>> {
        self.expect_keyword(Keyword::Create)?;
        if self.eat_keyword(Keyword::Table) {
            return self.create_table();
        }
        if self.eat_keyword(Keyword::Index) {
            return self.create_index();
        }
        Err(invalid("expected TABLE or INDEX after CREATE"))
    }

    fn create_table(&mut self) -> Result<Stmt<'a>> {
        let name = self.ident()?;
        self.expect(Token::LParen)?;
        let mut columns = Vec::new();
        loop {
            columns.push(self.column_def()?);
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen)?;
        Ok(Stmt::CreateTable { name, columns: self.arena.alloc_slice_copy(&columns) })
    }

    fn column_def(&mut self) -> Result<ColumnDef<'a>> {
        let name = self.ident()?;
        let type_name = self.ident()?;
        let type_id = TypeId::parse(type_name)?;
        let mut length = 0u32;
        if self.eat(Token::LParen) {
            match self.advance() {
                Token::IntLit(n) if n > 0 => length = n as u32,
                other => return Err(invalid(format!("bad type length: {other:?}"))),
            }
            self.expect(Token::RParen)?;
        }
        if type_id.is_variable() && length == 0 {
            return Err(invalid(format!("{type_id} requires a length, e.g. {type_id}(16)")));
        }
        let mut primary_key = false;
        if self.eat_keyword(Keyword::Primary) {
            self.expect_keyword(Keyword::Key)?;
            primary_key = true;
        }
        Ok(ColumnDef { name, type_id, length, primary_key })
    }

    fn create_index(&mut self) -> Result<Stmt<'a>> {
        let name = self.ident()?;
        self.expect_keyword(Keyword::On)?;
        let table = self.ident()?;
        // USING defaults to btree, matching the surface syntax.
        let method = if self.eat_keyword(Keyword::Using) { self.ident()? } else { "btree" };
        self.expect(Token::LParen)?;
        let column = self.ident()?;
        let op_class = match self.peek() {
            Token::Ident(op) => {
                self.advance();
                Some(op)
            }
            _ => None,
        };
        self.expect(Token::RParen)?;

        let mut options = Vec::new();
        if self.eat_keyword(Keyword::With) {
            self.expect(Token::LParen)?;
            loop {
                let key = self.ident()?;
                self.expect(Token::Eq)?;
                let value = match self.advance() {
                    Token::IntLit(v) => v as f64,
                    Token::FloatLit(v) => v,
                    other => return Err(invalid(format!("bad index option value: {other:?}"))),
                };
                options.push((key, value));
                if !self.eat(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen)?;
        }
        Ok(Stmt::CreateIndex {
            name,
            table,
            method,
            column,
            op_class,
            options: self.arena.alloc_slice_copy(&options),
        })
    }

    fn select(&mut self) -> Result<SelectStmt<'a>> {
        self.expect_keyword(Keyword::Select)?;
        let mut projections = Vec::new();
        loop {
            if self.eat(Token::Star) {
                projections.push(SelectItem::Star);
            } else {
                let expr = self.expr(0)?;
                let alias = if self.eat_keyword(Keyword::As) {
                    Some(self.ident()?)
                } else if let Token::Ident(alias) = self.peek() {
                    self.advance();
                    Some(alias)
                } else {
                    None
                };
                projections.push(SelectItem::Expr { expr, alias });
            }
            if !self.eat(Token::Comma) {
                break;
            }
        }

        let from = if self.eat_keyword(Keyword::From) {
            Some(&*self.arena.alloc(self.table_ref()?))
        } else {
            None
        };
        let filter = if self.eat_keyword(Keyword::Where) { Some(self.expr(0)?) } else { None };

        let mut group_by = Vec::new();
        if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            loop {
                group_by.push(self.expr(0)?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        let having = if self.eat_keyword(Keyword::Having) { Some(self.expr(0)?) } else { None };

        let mut order_by = Vec::new();
        if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            loop {
                let expr = self.expr(0)?;
                let dir = if self.eat_keyword(Keyword::Desc) {
                    OrderDir::Desc
                } else {
                    self.eat_keyword(Keyword::Asc);
                    OrderDir::Asc
                };
                order_by.push((dir, expr));
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }

        let limit = if self.eat_keyword(Keyword::Limit) {
            match self.advance() {
                Token::IntLit(n) if n >= 0 => Some(n as u64),
                other => return Err(invalid(format!("bad LIMIT value: {other:?}"))),
            }
        } else {
            None
        };

        Ok(SelectStmt {
            projections: self.arena.alloc_slice_copy(&projections),
            from,
            filter,
            group_by: self.arena.alloc_slice_copy(&group_by),
            having,
            order_by: self.arena.alloc_slice_copy(&order_by),
            limit,
        })
    }

    fn table_ref(&mut self) -> Result<TableRef<'a>> {
        let mut left = self.table_primary()?;
        loop {
            let join_type = if self.eat_keyword(Keyword::Join) {
                AstJoinType::Inner
            } else if self.eat_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                AstJoinType::Inner
            } else if self.eat_keyword(Keyword::Left) {
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                AstJoinType::Left
            } else {
                return Ok(left);
            };
            let right = self.table_primary()?;
            self.expect_keyword(Keyword::On)?;
            let on = self.expr(0)?;
            left = TableRef::Join {
                left: self.arena.alloc(left),
                right: self.arena.alloc(right),
                join_type,
                on,
            };
        }
    }

    fn table_primary(&mut self) -> Result<TableRef<'a>> {
        let name = self.ident()?;
        let alias = if self.eat_keyword(Keyword::As) {
            Some(self.ident()?)
        } else if let Token::Ident(alias) = self.peek() {
            self.advance();
            Some(alias)
        } else {
            None
        };
        Ok(TableRef::Table { name, alias })
    }

    fn insert(&mut self) -> Result<Stmt<'a>> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let table = self.ident()?;
        self.expect_keyword(Keyword::Values)?;
        let mut rows = Vec::new();
        loop {
            self.expect(Token::LParen)?;
            let mut row = Vec::new();
            loop {
                row.push(self.expr(0)?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RParen)?;
            rows.push(&*self.arena.alloc_slice_copy(&row));
            if !self.eat(Token::Comma) {
                break;
            }
        }
        Ok(Stmt::Insert { table, rows: self.arena.alloc_slice_copy(&rows) })
    }

    fn update(&mut self) -> Result<Stmt<'a>> {
        self.expect_keyword(Keyword::Update)?;
        let table = self.ident()?;
        self.expect_keyword(Keyword::Set)?;
        let mut assignments = Vec::new();
        loop {
            let column = self.ident()?;
            self.expect(Token::Eq)?;
            let value = self.expr(0)?;
            assignments.push((column, value));
            if !self.eat(Token::Comma) {
                break;
            }
        }
        let filter = if self.eat_keyword(Keyword::Where) { Some(self.expr(0)?) } else { None };
        Ok(Stmt::Update { table, assignments: self.arena.alloc_slice_copy(&assignments), filter })
    }

    fn delete(&mut self) -> Result<Stmt<'a>> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let table = self.ident()?;
        let filter = if self.eat_keyword(Keyword::Where) { Some(self.expr(0)?) } else { None };
        Ok(Stmt::Delete { table, filter })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    fn binary_op(token: Token<'a>) -> Option<(BinaryOp, u8)> {
        let op = match token {
            Token::Keyword(Keyword::Or) => (BinaryOp::Or, 1),
            Token::Keyword(Keyword::And) => (BinaryOp::And, 2),
            Token::Eq => (BinaryOp::Eq, 3),
            Token::NotEq => (BinaryOp::NotEq, 3),
            Token::Lt => (BinaryOp::Lt, 3),
            Token::LtEq => (BinaryOp::LtEq, 3),
            Token::Gt => (BinaryOp::Gt, 3),
            Token::GtEq => (BinaryOp::GtEq, 3),
            Token::L2Dist => (BinaryOp::L2Dist, 4),
            Token::IpDist => (BinaryOp::IpDist, 4),
            Token::CosineDist => (BinaryOp::CosineDist, 4),
            Token::Plus => (BinaryOp::Add, 5),
            Token::Minus => (BinaryOp::Sub, 5),
            Token::Star => (BinaryOp::Mul, 6),
            Token::Slash => (BinaryOp::Div, 6),
            Token::Percent => (BinaryOp::Mod, 6),
            _ => return None,
        };
        Some(op)
    }

    fn expr(&mut self, min_prec: u8) -> Result<&'a Expr<'a>> {
        let mut lhs = self.unary()?;
        while let Some((op, prec)) = Self::binary_op(self.peek()) {
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.expr(prec + 1)?;
            lhs = self.arena.alloc(Expr::Binary { op, lhs, rhs });
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<&'a Expr<'a>> {
        if self.eat(Token::Minus) {
            let inner = self.unary()?;
            return Ok(self.arena.alloc(Expr::Neg(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<&'a Expr<'a>> {
        match self.advance() {
            Token::IntLit(v) => Ok(self.arena.alloc(Expr::IntLit(v))),
            Token::FloatLit(v) => Ok(self.arena.alloc(Expr::FloatLit(v))),
            Token::StringLit(s) => Ok(self.arena.alloc(Expr::StringLit(s))),
            Token::Keyword(Keyword::True) => Ok(self.arena.alloc(Expr::BoolLit(true))),
            Token::Keyword(Keyword::False) => Ok(self.arena.alloc(Expr::BoolLit(false))),
            Token::Keyword(Keyword::Null) => Ok(self.arena.alloc(Expr::NullLit)),
            Token::LParen => {
                let inner = self.expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.vector_literal(),
            Token::Ident(name) => {
                if self.eat(Token::LParen) {
                    return self.fn_call(name);
                }
                if self.eat(Token::Dot) {
                    let column = self.ident()?;
                    return Ok(self.arena.alloc(Expr::Column { table: Some(name), name: column }));
                }
                Ok(self.arena.alloc(Expr::Column { table: None, name }))
            }
            other => Err(invalid(format!("unexpected token in expression: {other:?}"))),
        }
    }

    fn vector_literal(&mut self) -> Result<&'a Expr<'a>> {
        let mut elements = Vec::new();
        if !self.eat(Token::RBracket) {
            loop {
                let negative = self.eat(Token::Minus);
                let value = match self.advance() {
                    Token::IntLit(v) => v as f64,
                    Token::FloatLit(v) => v,
                    other => return Err(invalid(format!("bad vector element: {other:?}"))),
                };
                elements.push(if negative { -value } else { value });
                if !self.eat(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RBracket)?;
        }
        Ok(self.arena.alloc(Expr::VectorLit(self.arena.alloc_slice_copy(&elements))))
    }

    fn fn_call(&mut self, name: &'a str) -> Result<&'a Expr<'a>> {
        if self.eat(Token::Star) {
            self.expect(Token::RParen)?;
            return Ok(self.arena.alloc(Expr::FnCall { name, arg: None, star: true }));
        }
        let arg = self.expr(0)?;
        self.expect(Token::RParen)?;
        Ok(self.arena.alloc(Expr::FnCall { name, arg: Some(arg), star: false }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    macro_rules! parse {
        ($stmt:ident = $sql:expr) => {
            let arena = Bump::new();
            let $stmt = parse_statement($sql, &arena).unwrap();
        };
    }

    #[test]
    fn create_table_with_types_and_pk() {
        parse!(stmt = "CREATE TABLE t(a INTEGER PRIMARY KEY, s VARCHAR(16), v VECTOR(8))");
        let Stmt::CreateTable { name, columns } = stmt else { panic!("not a create table") };
        assert_eq!(name, "t");
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].type_id, TypeId::Varchar);
        assert_eq!(columns[2].length, 8);
    }

    #[test]
    fn varchar_without_length_is_rejected() {
        let arena = Bump::new();
        assert!(parse_statement("CREATE TABLE t(s VARCHAR)", &arena).is_err());
    }

    #[test]
    fn create_index_with_method_opclass_and_options() {
        parse!(stmt = "CREATE INDEX i ON t USING hnsw (v vector_l2_ops) WITH (m = 16, ef_construction = 100)");
        let Stmt::CreateIndex { name, table, method, column, op_class, options } = stmt else {
            panic!("not a create index")
        };
        assert_eq!((name, table, method, column), ("i", "t", "hnsw", "v"));
        assert_eq!(op_class, Some("vector_l2_ops"));
        assert_eq!(options, &[("m", 16.0), ("ef_construction", 100.0)]);
    }

    #[test]
    fn select_with_all_clauses() {
        parse!(stmt = "SELECT a, count(*) AS n FROM t WHERE a > 1 GROUP BY a HAVING count(*) > 2 ORDER BY a DESC LIMIT 10;");
        let Stmt::Select(select) = stmt else { panic!("not a select") };
        assert_eq!(select.projections.len(), 2);
        assert!(select.filter.is_some());
        assert_eq!(select.group_by.len(), 1);
        assert!(select.having.is_some());
        assert_eq!(select.order_by.len(), 1);
        assert_eq!(select.order_by[0].0, OrderDir::Desc);
        assert_eq!(select.limit, Some(10));
    }

    #[test]
    fn joins_nest_left_associatively() {
        parse!(stmt = "SELECT * FROM a JOIN b ON a.x = b.x LEFT JOIN c ON b.y = c.y");
        let Stmt::Select(select) = stmt else { panic!("not a select") };
        let Some(TableRef::Join { join_type, left, .. }) = select.from else {
            panic!("expected join")
        };
        assert_eq!(*join_type, AstJoinType::Left);
        assert!(matches!(left, TableRef::Join { join_type: AstJoinType::Inner, .. }));
    }

    #[test]
    fn vector_literal_and_distance_operator() {
        parse!(stmt = "SELECT * FROM t ORDER BY v <-> [1.0, -2, 0.5] LIMIT 5");
        let Stmt::Select(select) = stmt else { panic!("not a select") };
        let (_, expr) = select.order_by[0];
        let Expr::Binary { op: BinaryOp::L2Dist, rhs, .. } = expr else {
            panic!("expected distance op")
        };
        assert_eq!(*rhs, &Expr::VectorLit(&[1.0, -2.0, 0.5]));
    }

    #[test]
    fn precedence_binds_and_over_or() {
        parse!(stmt = "SELECT * FROM t WHERE a = 1 OR b = 2 AND c = 3");
        let Stmt::Select(select) = stmt else { panic!("not a select") };
        let Some(Expr::Binary { op: BinaryOp::Or, rhs, .. }) = select.filter else {
            panic!("OR should be at the top")
        };
        assert!(matches!(rhs, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn insert_multiple_rows() {
        parse!(stmt = "INSERT INTO t VALUES (1, 'a'), (2, 'b')");
        let Stmt::Insert { rows, .. } = stmt else { panic!("not an insert") };
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].len(), 2);
    }

    #[test]
    fn update_and_delete_with_filters() {
        parse!(stmt = "UPDATE t SET a = a + 1, b = 2 WHERE a < 10");
        let Stmt::Update { assignments, filter, .. } = stmt else { panic!("not an update") };
        assert_eq!(assignments.len(), 2);
        assert!(filter.is_some());

        parse!(stmt = "DELETE FROM t");
        assert!(matches!(stmt, Stmt::Delete { filter: None, .. }));
    }

    #[test]
    fn txn_control_and_settings() {
        parse!(stmt = "BEGIN SERIALIZABLE");
        assert_eq!(stmt, Stmt::Begin { serializable: true });
        parse!(stmt = "ROLLBACK");
        assert_eq!(stmt, Stmt::Abort);
        parse!(stmt = "SET cache_enabled = on");
        assert_eq!(stmt, Stmt::Set { name: "cache_enabled", value: "on" });
        parse!(stmt = "SHOW log_timeout");
        assert_eq!(stmt, Stmt::Show { name: "log_timeout" });
    }

    #[test]
    fn explain_wraps_the_inner_statement() {
        parse!(stmt = "EXPLAIN SELECT * FROM t");
        assert!(matches!(stmt, Stmt::Explain(Stmt::Select(_))));
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        let arena = Bump::new();
        assert!(parse_statement("SELECT 1 garbage! tokens", &arena).is_err());
    }
}
