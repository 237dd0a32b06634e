//! Recursive-descent parser producing a rule-tagged parse tree. The
//! tree carries shape only; semantic assembly and validation live in
//! the builder, which walks these nodes as enter/exit events.

use crate::ast::Position;
use crate::errors::ErrorKind;
use crate::lexer::{Token, TokenType};
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Program,
    ConstDecl,
    GlobalVarDecl,
    GlobalListDecl,
    SpriteDecl,
    ModuleDecl,
    ImportDecl,
    CostumeDecl,
    MethodDecl,
    EventDecl,
    Param,
    Modifier,
    Block,
    VarDeclStmt,
    ArrayDeclStmt,
    AssignStmt,
    ArrayAssignStmt,
    ArrayReAssignStmt,
    IfStmt,
    SwitchStmt,
    CaseClause,
    DefaultClause,
    RepeatStmt,
    WhileStmt,
    UntilStmt,
    ForStmt,
    ForeachStmt,
    ForeverStmt,
    ReturnStmt,
    CallStmt,
    ScopeStmt,
    TermExpr,
    BinaryExpr,
    UnaryExpr,
    CallExpr,
    ArrayLookupExpr,
    LookupExpr,
    NameOfExpr,
    NumberLit,
    StringLit,
    BoolLit,
    BoundLit,
    TypeName,
    Name,
}

impl Rule {
    pub fn is_statement(self) -> bool {
        matches!(
            self,
            Rule::VarDeclStmt
                | Rule::ArrayDeclStmt
                | Rule::AssignStmt
                | Rule::ArrayAssignStmt
                | Rule::ArrayReAssignStmt
                | Rule::IfStmt
                | Rule::SwitchStmt
                | Rule::RepeatStmt
                | Rule::WhileStmt
                | Rule::UntilStmt
                | Rule::ForStmt
                | Rule::ForeachStmt
                | Rule::ForeverStmt
                | Rule::ReturnStmt
                | Rule::CallStmt
                | Rule::ScopeStmt
        )
    }

    pub fn is_expression(self) -> bool {
        matches!(
            self,
            Rule::TermExpr
                | Rule::BinaryExpr
                | Rule::UnaryExpr
                | Rule::CallExpr
                | Rule::ArrayLookupExpr
                | Rule::LookupExpr
                | Rule::NameOfExpr
        )
    }
}

/// One parse tree node: the rule that matched, the significant token
/// text (operator, name or literal), the covered span, and children in
/// source order.
#[derive(Debug, Clone)]
pub struct ParseNode {
    pub rule: Rule,
    pub text: String,
    pub pos: Position,
    pub children: Vec<ParseNode>,
}

impl ParseNode {
    pub fn find(&self, rule: Rule) -> Option<&ParseNode> {
        self.children.iter().find(|c| c.rule == rule)
    }

    pub fn all(&self, rule: Rule) -> Vec<&ParseNode> {
        self.children.iter().filter(|c| c.rule == rule).collect()
    }

    pub fn child_text(&self, rule: Rule) -> Option<&str> {
        self.find(rule).map(|c| c.text.as_str())
    }

    pub fn expression_count(&self) -> usize {
        self.children.iter().filter(|c| c.rule.is_expression()).count()
    }

    pub fn literal_children(&self) -> Vec<&ParseNode> {
        self.children
            .iter()
            .filter(|c| matches!(c.rule, Rule::NumberLit | Rule::StringLit | Rule::BoolLit))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
    pub kind: ErrorKind,
    pub pos: Position,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (line {}, column {})",
            self.message, self.pos.line, self.pos.column
        )
    }
}

impl Error for ParseError {}

pub struct Parser {
    tokens: Vec<Token>,
    index: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, index: 0 }
    }

    pub fn parse_program(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let mut items = Vec::new();
        while !self.at_end() {
            items.push(self.parse_top_item()?);
        }
        Ok(self.close(Rule::Program, "", start, items))
    }

    fn parse_top_item(&mut self) -> Result<ParseNode, ParseError> {
        if self.check_keyword("const") {
            return self.parse_const();
        }
        if self.check_keyword("list") {
            return self.parse_global_list();
        }
        if self.check_type_keyword() {
            return self.parse_global_var();
        }
        if self.check_keyword("sprite") {
            return self.parse_sprite();
        }
        if self.check_keyword("module") {
            return self.parse_module();
        }
        self.error_here(
            ErrorKind::NoViableAlternative,
            "Expected a declaration, 'sprite' or 'module' at the top level.",
        )
    }

    fn parse_const(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("const", "Expected 'const'.")?;
        let typ = self.consume_type_name()?;
        let name = self.consume_name("Expected a name after the constant type.")?;
        self.consume_op("=", "Expected '=' in constant declaration.")?;
        let value = self.parse_literal()?;
        self.consume_type(TokenType::Semicolon, "Expected ';' after constant declaration.")?;
        Ok(self.close(Rule::ConstDecl, "", start, vec![typ, name, value]))
    }

    fn parse_global_var(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let typ = self.consume_type_name()?;
        let name = self.consume_name("Expected a name after the variable type.")?;
        let mut children = vec![typ, name];
        if self.match_op("=") {
            children.push(self.parse_literal()?);
        }
        self.consume_type(TokenType::Semicolon, "Expected ';' after variable declaration.")?;
        Ok(self.close(Rule::GlobalVarDecl, "", start, children))
    }

    fn parse_global_list(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("list", "Expected 'list'.")?;
        let mut children = Vec::new();
        if self.check_type_keyword() {
            children.push(self.consume_type_name()?);
        }
        children.push(self.consume_name("Expected a list name.")?);
        if self.match_type(TokenType::LBracket) {
            let bound = self.consume_type(TokenType::Number, "Expected a list bound.")?;
            children.push(leaf(Rule::BoundLit, &bound));
            self.consume_type(TokenType::RBracket, "Expected ']' after list bound.")?;
        }
        if self.match_op("=") {
            self.consume_type(TokenType::LBrace, "Expected '{' to open the list initializer.")?;
            if !self.check_type(TokenType::RBrace) {
                loop {
                    children.push(self.parse_literal()?);
                    if !self.match_type(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume_type(TokenType::RBrace, "Expected '}' to close the list initializer.")?;
        }
        self.consume_type(TokenType::Semicolon, "Expected ';' after list declaration.")?;
        Ok(self.close(Rule::GlobalListDecl, "", start, children))
    }

    fn parse_sprite(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("sprite", "Expected 'sprite'.")?;
        let name = self.consume_name("Expected a sprite name.")?;
        self.consume_type(TokenType::LBrace, "Expected '{' after the sprite name.")?;
        let mut children = vec![name];
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here(
                    ErrorKind::TokenMissing,
                    "Unterminated sprite body. Expected '}'.",
                );
            }
            children.push(self.parse_member(true)?);
        }
        self.consume_type(TokenType::RBrace, "Expected '}' to close the sprite body.")?;
        Ok(self.close(Rule::SpriteDecl, "", start, children))
    }

    fn parse_module(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("module", "Expected 'module'.")?;
        let name = self.consume_name("Expected a module name.")?;
        self.consume_type(TokenType::LBrace, "Expected '{' after the module name.")?;
        let mut children = vec![name];
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here(
                    ErrorKind::TokenMissing,
                    "Unterminated module body. Expected '}'.",
                );
            }
            children.push(self.parse_member(false)?);
        }
        self.consume_type(TokenType::RBrace, "Expected '}' to close the module body.")?;
        Ok(self.close(Rule::ModuleDecl, "", start, children))
    }

    fn parse_member(&mut self, in_sprite: bool) -> Result<ParseNode, ParseError> {
        if self.check_keyword("const") {
            return self.parse_const();
        }
        if self.check_keyword("list") {
            return self.parse_global_list();
        }
        if self.check_type_keyword() {
            return self.parse_global_var();
        }
        if in_sprite && self.check_keyword("import") {
            let start = self.current().pos;
            self.advance();
            let name = self.consume_name("Expected a module name after 'import'.")?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after import.")?;
            return Ok(self.close(Rule::ImportDecl, "", start, vec![name]));
        }
        if in_sprite && self.check_keyword("costume") {
            let start = self.current().pos;
            self.advance();
            let file = self.consume_type(TokenType::Str, "Expected a costume file string.")?;
            let file_leaf = leaf(Rule::StringLit, &file);
            self.consume_type(TokenType::Semicolon, "Expected ';' after costume declaration.")?;
            return Ok(self.close(Rule::CostumeDecl, "", start, vec![file_leaf]));
        }
        if self.check_modifier() || self.check_keyword("void") || self.check_keyword("function") {
            return self.parse_method_or_event();
        }
        if self.check_keyword("event") {
            return self.parse_method_or_event();
        }
        self.error_here(
            ErrorKind::NoViableAlternative,
            if in_sprite {
                "Expected a declaration, method, event, import or costume inside the sprite."
            } else {
                "Expected a declaration, method or event inside the module."
            },
        )
    }

    fn parse_method_or_event(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let mut children = Vec::new();
        while self.check_modifier() {
            let token = self.advance().clone();
            children.push(leaf(Rule::Modifier, &token));
        }
        if self.check_keyword("event") {
            self.advance();
            children.push(self.consume_name("Expected an event name after 'event'.")?);
            if self.match_op("<") {
                children.push(self.parse_literal()?);
                self.consume_op(">", "Expected '>' after the event parameter.")?;
            }
            self.consume_type(TokenType::LParen, "Expected '(' after the event name.")?;
            self.consume_type(TokenType::RParen, "Expected ')' (event handlers take no parameters).")?;
            children.push(self.parse_block()?);
            return Ok(self.close(Rule::EventDecl, "", start, children));
        }

        let kind = if self.match_keyword("void") {
            "void"
        } else if self.match_keyword("function") {
            children.push(self.consume_type_name()?);
            "function"
        } else {
            return self.error_here(
                ErrorKind::TokenMissing,
                "Expected 'void', 'function' or 'event' after the modifiers.",
            );
        };
        children.push(self.consume_name("Expected a method name.")?);
        self.consume_type(TokenType::LParen, "Expected '(' after the method name.")?;
        if !self.check_type(TokenType::RParen) {
            loop {
                children.push(self.parse_param()?);
                if !self.match_type(TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume_type(TokenType::RParen, "Expected ')' after the parameter list.")?;
        children.push(self.parse_block()?);
        Ok(self.close(Rule::MethodDecl, kind, start, children))
    }

    fn parse_param(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let typ = self.consume_type_name()?;
        let name = self.consume_name("Expected a parameter name.")?;
        let mut children = vec![typ, name];
        if self.match_op("=") {
            children.push(self.parse_literal()?);
        }
        Ok(self.close(Rule::Param, "", start, children))
    }

    fn parse_block(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_type(TokenType::LBrace, "Expected '{'.")?;
        let mut statements = Vec::new();
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here(ErrorKind::TokenMissing, "Unterminated block. Expected '}'.");
            }
            statements.push(self.parse_statement()?);
        }
        self.consume_type(TokenType::RBrace, "Expected '}'.")?;
        Ok(self.close(Rule::Block, "", start, statements))
    }

    fn parse_statement(&mut self) -> Result<ParseNode, ParseError> {
        if self.check_type_keyword() {
            return self.parse_scoped_decl();
        }
        if self.check_keyword("inline") {
            let start = self.current().pos;
            self.advance();
            if !self.check_keyword("repeat") {
                return self.error_here(
                    ErrorKind::TokenMissing,
                    "Expected 'repeat' after 'inline'.",
                );
            }
            return self.parse_repeat(start, true);
        }
        if self.check_keyword("repeat") {
            let start = self.current().pos;
            return self.parse_repeat(start, false);
        }
        if self.check_keyword("if") {
            return self.parse_if();
        }
        if self.check_keyword("switch") {
            return self.parse_switch();
        }
        if self.check_keyword("while") {
            return self.parse_condition_loop("while", Rule::WhileStmt);
        }
        if self.check_keyword("until") {
            return self.parse_condition_loop("until", Rule::UntilStmt);
        }
        if self.check_keyword("for") {
            return self.parse_for();
        }
        if self.check_keyword("foreach") {
            return self.parse_foreach();
        }
        if self.check_keyword("forever") {
            let start = self.current().pos;
            self.advance();
            let body = self.parse_block()?;
            return Ok(self.close(Rule::ForeverStmt, "", start, vec![body]));
        }
        if self.check_keyword("return") {
            let start = self.current().pos;
            self.advance();
            let mut children = Vec::new();
            if !self.check_type(TokenType::Semicolon) {
                children.push(self.parse_expr()?);
            }
            self.consume_type(TokenType::Semicolon, "Expected ';' after return.")?;
            return Ok(self.close(Rule::ReturnStmt, "", start, children));
        }
        if self.check_type(TokenType::LBrace) {
            let start = self.current().pos;
            let body = self.parse_block()?;
            return Ok(self.close(Rule::ScopeStmt, "", start, vec![body]));
        }
        if self.check_type(TokenType::Ident) {
            return self.parse_name_statement();
        }
        self.error_here(ErrorKind::NoViableAlternative, "Expected a statement.")
    }

    fn parse_scoped_decl(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let typ = self.consume_type_name()?;
        if self.match_type(TokenType::LBracket) {
            let bound = self.consume_type(TokenType::Number, "Expected an array bound.")?;
            let bound_leaf = leaf(Rule::BoundLit, &bound);
            self.consume_type(TokenType::RBracket, "Expected ']' after the array bound.")?;
            let name = self.consume_name("Expected an array name.")?;
            let mut children = vec![typ, bound_leaf, name];
            if self.match_op("=") {
                self.consume_type(TokenType::LBrace, "Expected '{' to open the array initializer.")?;
                if !self.check_type(TokenType::RBrace) {
                    loop {
                        children.push(self.parse_expr()?);
                        if !self.match_type(TokenType::Comma) {
                            break;
                        }
                    }
                }
                self.consume_type(TokenType::RBrace, "Expected '}' to close the array initializer.")?;
            }
            self.consume_type(TokenType::Semicolon, "Expected ';' after the array declaration.")?;
            return Ok(self.close(Rule::ArrayDeclStmt, "", start, children));
        }
        let name = self.consume_name("Expected a variable name.")?;
        let mut children = vec![typ, name];
        if self.match_op("=") {
            children.push(self.parse_expr()?);
        }
        self.consume_type(TokenType::Semicolon, "Expected ';' after the variable declaration.")?;
        Ok(self.close(Rule::VarDeclStmt, "", start, children))
    }

    fn parse_name_statement(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        let name = self.consume_name("Expected a name.")?;
        if self.check_type(TokenType::LParen) {
            self.advance();
            let mut children = vec![name];
            if !self.check_type(TokenType::RParen) {
                loop {
                    children.push(self.parse_expr()?);
                    if !self.match_type(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume_type(TokenType::RParen, "Expected ')' after the arguments.")?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after the call.")?;
            return Ok(self.close(Rule::CallStmt, "", start, children));
        }
        if self.match_type(TokenType::LBracket) {
            let index = self.parse_expr()?;
            self.consume_type(TokenType::RBracket, "Expected ']' after the index.")?;
            let op = self.consume_assign_op()?;
            let mut children = vec![name, index];
            if op != "++" && op != "--" {
                children.push(self.parse_expr()?);
            }
            self.consume_type(TokenType::Semicolon, "Expected ';' after the assignment.")?;
            return Ok(self.close(Rule::ArrayAssignStmt, op, start, children));
        }
        let op = self.consume_assign_op()?;
        if op == "=" && self.check_type(TokenType::LBrace) {
            self.advance();
            let mut children = vec![name];
            if !self.check_type(TokenType::RBrace) {
                loop {
                    children.push(self.parse_expr()?);
                    if !self.match_type(TokenType::Comma) {
                        break;
                    }
                }
            }
            self.consume_type(TokenType::RBrace, "Expected '}' to close the value list.")?;
            self.consume_type(TokenType::Semicolon, "Expected ';' after the assignment.")?;
            return Ok(self.close(Rule::ArrayReAssignStmt, "", start, children));
        }
        let mut children = vec![name];
        if op != "++" && op != "--" {
            children.push(self.parse_expr()?);
        }
        self.consume_type(TokenType::Semicolon, "Expected ';' after the assignment.")?;
        Ok(self.close(Rule::AssignStmt, op, start, children))
    }

    fn parse_repeat(&mut self, start: Position, inline: bool) -> Result<ParseNode, ParseError> {
        self.consume_keyword("repeat", "Expected 'repeat'.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after 'repeat'.")?;
        let count = self.parse_expr()?;
        self.consume_type(TokenType::RParen, "Expected ')' after the repeat count.")?;
        let body = self.parse_block()?;
        let text = if inline { "inline" } else { "" };
        Ok(self.close(Rule::RepeatStmt, text, start, vec![count, body]))
    }

    fn parse_condition_loop(&mut self, keyword: &str, rule: Rule) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword(keyword, "Expected a loop keyword.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after the loop keyword.")?;
        let condition = self.parse_expr()?;
        self.consume_type(TokenType::RParen, "Expected ')' after the loop condition.")?;
        let body = self.parse_block()?;
        Ok(self.close(rule, "", start, vec![condition, body]))
    }

    fn parse_if(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("if", "Expected 'if'.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after 'if'.")?;
        let mut children = vec![self.parse_expr()?];
        self.consume_type(TokenType::RParen, "Expected ')' after the condition.")?;
        children.push(self.parse_block()?);
        while self.match_keyword("else") {
            if self.match_keyword("if") {
                self.consume_type(TokenType::LParen, "Expected '(' after 'else if'.")?;
                children.push(self.parse_expr()?);
                self.consume_type(TokenType::RParen, "Expected ')' after the condition.")?;
                children.push(self.parse_block()?);
            } else {
                children.push(self.parse_block()?);
                break;
            }
        }
        Ok(self.close(Rule::IfStmt, "", start, children))
    }

    fn parse_switch(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("switch", "Expected 'switch'.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after 'switch'.")?;
        let mut children = vec![self.parse_expr()?];
        self.consume_type(TokenType::RParen, "Expected ')' after the switch subject.")?;
        self.consume_type(TokenType::LBrace, "Expected '{' to open the switch body.")?;
        while !self.check_type(TokenType::RBrace) {
            if self.at_end() {
                return self.error_here(
                    ErrorKind::TokenMissing,
                    "Unterminated switch body. Expected '}'.",
                );
            }
            if self.check_keyword("case") {
                let case_start = self.current().pos;
                self.advance();
                let mut case_children = vec![self.parse_literal()?];
                while self.match_type(TokenType::Comma) {
                    case_children.push(self.parse_literal()?);
                }
                self.consume_type(TokenType::Colon, "Expected ':' after the case labels.")?;
                case_children.extend(self.parse_case_body()?);
                children.push(self.close(Rule::CaseClause, "", case_start, case_children));
            } else if self.check_keyword("default") {
                let default_start = self.current().pos;
                self.advance();
                self.consume_type(TokenType::Colon, "Expected ':' after 'default'.")?;
                let body = self.parse_case_body()?;
                children.push(self.close(Rule::DefaultClause, "", default_start, body));
            } else {
                return self.error_here(
                    ErrorKind::NoViableAlternative,
                    "Expected 'case', 'default' or '}' in the switch body.",
                );
            }
        }
        self.consume_type(TokenType::RBrace, "Expected '}' to close the switch body.")?;
        Ok(self.close(Rule::SwitchStmt, "", start, children))
    }

    fn parse_case_body(&mut self) -> Result<Vec<ParseNode>, ParseError> {
        let mut statements = Vec::new();
        while !self.check_keyword("case")
            && !self.check_keyword("default")
            && !self.check_type(TokenType::RBrace)
        {
            if self.at_end() {
                return Err(ParseError {
                    message: "Unterminated case body.".to_string(),
                    kind: ErrorKind::TokenMissing,
                    pos: self.current().pos,
                });
            }
            statements.push(self.parse_statement()?);
        }
        Ok(statements)
    }

    fn parse_for(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("for", "Expected 'for'.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after 'for'.")?;
        let typ = self.consume_type_name()?;
        let name = self.consume_name("Expected a loop variable name.")?;
        self.consume_keyword("in", "Expected 'in' after the loop variable.")?;
        let count = self.parse_expr()?;
        self.consume_type(TokenType::RParen, "Expected ')' after the loop count.")?;
        let body = self.parse_block()?;
        Ok(self.close(Rule::ForStmt, "", start, vec![typ, name, count, body]))
    }

    fn parse_foreach(&mut self) -> Result<ParseNode, ParseError> {
        let start = self.current().pos;
        self.consume_keyword("foreach", "Expected 'foreach'.")?;
        self.consume_type(TokenType::LParen, "Expected '(' after 'foreach'.")?;
        let typ = self.consume_type_name()?;
        let name = self.consume_name("Expected a loop variable name.")?;
        self.consume_keyword("in", "Expected 'in' after the loop variable.")?;
        let source = self.consume_name("Expected a list or array name after 'in'.")?;
        self.consume_type(TokenType::RParen, "Expected ')' after the source name.")?;
        let body = self.parse_block()?;
        Ok(self.close(Rule::ForeachStmt, "", start, vec![typ, name, source, body]))
    }

    fn parse_expr(&mut self) -> Result<ParseNode, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<ParseNode, ParseError> {
        let mut left = self.parse_and()?;
        while self.check_op("||") {
            let op = self.advance().clone();
            let right = self.parse_and()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<ParseNode, ParseError> {
        let mut left = self.parse_comparison()?;
        while self.check_op("&&") {
            let op = self.advance().clone();
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    /// One non-associative comparison level: `a < b < c` is rejected.
    fn parse_comparison(&mut self) -> Result<ParseNode, ParseError> {
        let left = self.parse_concat()?;
        for op_text in ["==", "!=", "<=", ">=", "<", ">"] {
            if self.check_op(op_text) {
                let op = self.advance().clone();
                let right = self.parse_concat()?;
                return Ok(binary(op, left, right));
            }
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<ParseNode, ParseError> {
        let mut left = self.parse_additive()?;
        while self.check_op(".") {
            let op = self.advance().clone();
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<ParseNode, ParseError> {
        let mut left = self.parse_multiplicative()?;
        while self.check_op("+") || self.check_op("-") {
            let op = self.advance().clone();
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<ParseNode, ParseError> {
        let mut left = self.parse_unary()?;
        while self.check_op("*") || self.check_op("/") || self.check_op("%") {
            let op = self.advance().clone();
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ParseNode, ParseError> {
        if self.check_op("-") || self.check_op("!") {
            let op = self.advance().clone();
            let operand = self.parse_unary()?;
            return Ok(ParseNode {
                rule: Rule::UnaryExpr,
                text: op.value.clone(),
                pos: op.pos,
                children: vec![operand],
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ParseNode, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Number => {
                self.advance();
                Ok(term(leaf(Rule::NumberLit, &token)))
            }
            TokenType::Str => {
                self.advance();
                Ok(term(leaf(Rule::StringLit, &token)))
            }
            TokenType::Keyword if token.value == "true" || token.value == "false" => {
                self.advance();
                Ok(term(leaf(Rule::BoolLit, &token)))
            }
            TokenType::Keyword if token.value == "nameof" => {
                let start = token.pos;
                self.advance();
                self.consume_type(TokenType::LParen, "Expected '(' after 'nameof'.")?;
                let name = self.consume_name("Expected a name inside 'nameof'.")?;
                self.consume_type(TokenType::RParen, "Expected ')' after the name.")?;
                Ok(self.close(Rule::NameOfExpr, "", start, vec![name]))
            }
            TokenType::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.consume_type(TokenType::RParen, "Expected ')' to close the expression.")?;
                Ok(inner)
            }
            TokenType::Ident => {
                let start = token.pos;
                let name = self.consume_name("Expected a name.")?;
                if self.match_type(TokenType::LParen) {
                    let mut children = vec![name];
                    if !self.check_type(TokenType::RParen) {
                        loop {
                            children.push(self.parse_expr()?);
                            if !self.match_type(TokenType::Comma) {
                                break;
                            }
                        }
                    }
                    self.consume_type(TokenType::RParen, "Expected ')' after the arguments.")?;
                    return Ok(self.close(Rule::CallExpr, "", start, children));
                }
                if self.match_type(TokenType::LBracket) {
                    let index = self.parse_expr()?;
                    self.consume_type(TokenType::RBracket, "Expected ']' after the index.")?;
                    return Ok(self.close(Rule::ArrayLookupExpr, "", start, vec![name, index]));
                }
                Ok(ParseNode {
                    rule: Rule::LookupExpr,
                    text: name.text.clone(),
                    pos: name.pos,
                    children: vec![name],
                })
            }
            _ => self.error_here(ErrorKind::NoViableAlternative, "Expected an expression."),
        }
    }

    /// A literal value in a context that allows no expressions:
    /// constant values, initializers of project/sprite variables and
    /// lists, parameter defaults, case labels and event parameters.
    fn parse_literal(&mut self) -> Result<ParseNode, ParseError> {
        let token = self.current().clone();
        match token.typ {
            TokenType::Number => {
                self.advance();
                Ok(leaf(Rule::NumberLit, &token))
            }
            TokenType::Str => {
                self.advance();
                Ok(leaf(Rule::StringLit, &token))
            }
            TokenType::Keyword if token.value == "true" || token.value == "false" => {
                self.advance();
                Ok(leaf(Rule::BoolLit, &token))
            }
            TokenType::Op if token.value == "-" => {
                self.advance();
                let number = self.consume_type(TokenType::Number, "Expected a number after '-'.")?;
                let mut node = leaf(Rule::NumberLit, &number);
                node.text = format!("-{}", node.text);
                node.pos = token.pos;
                Ok(node)
            }
            _ => self.error_here(ErrorKind::TokenMissing, "Expected a literal value."),
        }
    }

    fn consume_assign_op(&mut self) -> Result<String, ParseError> {
        for op in ["=", "+=", "-=", ".=", "++", "--"] {
            if self.check_op(op) {
                self.advance();
                return Ok(op.to_string());
            }
        }
        Err(ParseError {
            message: "Expected an assignment operator or '(' after the name.".to_string(),
            kind: ErrorKind::TokenMissing,
            pos: self.current().pos,
        })
    }

    fn consume_type_name(&mut self) -> Result<ParseNode, ParseError> {
        if self.check_type_keyword() {
            let token = self.advance().clone();
            return Ok(leaf(Rule::TypeName, &token));
        }
        self.error_here(
            ErrorKind::TokenMissing,
            "Expected a type ('num', 'string', 'bool' or 'var').",
        )
    }

    fn consume_name(&mut self, message: &str) -> Result<ParseNode, ParseError> {
        let token = self.consume_type(TokenType::Ident, message)?;
        Ok(leaf(Rule::Name, &token))
    }

    fn check_type_keyword(&self) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword
            && matches!(token.value.as_str(), "num" | "string" | "bool" | "var")
    }

    fn check_modifier(&self) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword
            && matches!(token.value.as_str(), "unsafe" | "inline" | "atomic")
    }

    fn current(&self) -> &Token {
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn at_end(&self) -> bool {
        self.current().typ == TokenType::Eof
    }

    fn advance(&mut self) -> &Token {
        if !self.at_end() {
            self.index += 1;
        }
        &self.tokens[self.index - 1]
    }

    fn check_type(&self, typ: TokenType) -> bool {
        self.current().typ == typ
    }

    fn match_type(&mut self, typ: TokenType) -> bool {
        if self.check_type(typ) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_keyword(&self, keyword: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Keyword && token.value == keyword
    }

    fn match_keyword(&mut self, keyword: &str) -> bool {
        if self.check_keyword(keyword) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_keyword(&mut self, keyword: &str, message: &str) -> Result<&Token, ParseError> {
        if self.check_keyword(keyword) {
            return Ok(self.advance());
        }
        Err(ParseError {
            message: message.to_string(),
            kind: ErrorKind::TokenMissing,
            pos: self.current().pos,
        })
    }

    fn check_op(&self, op: &str) -> bool {
        let token = self.current();
        token.typ == TokenType::Op && token.value == op
    }

    fn match_op(&mut self, op: &str) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn consume_op(&mut self, op: &str, message: &str) -> Result<&Token, ParseError> {
        if self.check_op(op) {
            return Ok(self.advance());
        }
        Err(ParseError {
            message: message.to_string(),
            kind: ErrorKind::TokenMissing,
            pos: self.current().pos,
        })
    }

    fn consume_type(&mut self, typ: TokenType, message: &str) -> Result<Token, ParseError> {
        if self.check_type(typ) {
            return Ok(self.advance().clone());
        }
        Err(ParseError {
            message: message.to_string(),
            kind: ErrorKind::TokenMissing,
            pos: self.current().pos,
        })
    }

    fn error_here<T>(&self, kind: ErrorKind, message: impl Into<String>) -> Result<T, ParseError> {
        Err(ParseError {
            message: message.into(),
            kind,
            pos: self.current().pos,
        })
    }

    fn close(
        &self,
        rule: Rule,
        text: impl Into<String>,
        start: Position,
        children: Vec<ParseNode>,
    ) -> ParseNode {
        let mut pos = start;
        if self.index > 0 {
            pos.stop = self.tokens[self.index - 1].pos.stop;
        }
        ParseNode {
            rule,
            text: text.into(),
            pos,
            children,
        }
    }
}

fn leaf(rule: Rule, token: &Token) -> ParseNode {
    ParseNode {
        rule,
        text: token.value.clone(),
        pos: token.pos,
        children: Vec::new(),
    }
}

fn term(literal: ParseNode) -> ParseNode {
    ParseNode {
        rule: Rule::TermExpr,
        text: String::new(),
        pos: literal.pos,
        children: vec![literal],
    }
}

fn binary(op: Token, left: ParseNode, right: ParseNode) -> ParseNode {
    let mut pos = left.pos;
    pos.stop = right.pos.stop;
    ParseNode {
        rule: Rule::BinaryExpr,
        text: op.value,
        pos,
        children: vec![left, right],
    }
}

/// Parses one tokenized file into its parse tree.
pub fn parse(tokens: Vec<Token>) -> Result<ParseNode, ParseError> {
    Parser::new(tokens).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn parse_source(source: &str) -> ParseNode {
        parse(tokenize(source, 0).unwrap()).unwrap()
    }

    #[test]
    fn sprite_with_method_parses() {
        let tree = parse_source("sprite Cat { void Run() { } }");
        assert_eq!(tree.rule, Rule::Program);
        let sprite = &tree.children[0];
        assert_eq!(sprite.rule, Rule::SpriteDecl);
        assert_eq!(sprite.child_text(Rule::Name), Some("Cat"));
        let method = sprite.find(Rule::MethodDecl).unwrap();
        assert_eq!(method.text, "void");
        assert_eq!(method.child_text(Rule::Name), Some("Run"));
    }

    #[test]
    fn binary_chain_is_left_associative() {
        let tree = parse_source("sprite S { void M() { num x = 1 + 2 + 3; } }");
        let sprite = &tree.children[0];
        let method = sprite.find(Rule::MethodDecl).unwrap();
        let block = method.find(Rule::Block).unwrap();
        let decl = &block.children[0];
        let init = decl.children.iter().find(|c| c.rule.is_expression()).unwrap();
        assert_eq!(init.rule, Rule::BinaryExpr);
        assert_eq!(init.text, "+");
        assert_eq!(init.children[0].rule, Rule::BinaryExpr);
        assert_eq!(init.children[1].rule, Rule::TermExpr);
    }

    #[test]
    fn chained_comparison_is_rejected() {
        let tokens = tokenize("sprite S { void M() { bool b = 1 < 2 < 3; } }", 0).unwrap();
        assert!(parse(tokens).is_err());
    }

    #[test]
    fn switch_cases_carry_labels_and_statements() {
        let tree = parse_source(
            "sprite S { void M(num x) { switch (x) { case 1, 2: x = 3; default: x = 4; } } }",
        );
        let sprite = &tree.children[0];
        let method = sprite.find(Rule::MethodDecl).unwrap();
        let block = method.find(Rule::Block).unwrap();
        let switch = &block.children[0];
        assert_eq!(switch.rule, Rule::SwitchStmt);
        let case = switch.find(Rule::CaseClause).unwrap();
        assert_eq!(case.literal_children().len(), 2);
        assert!(case.children.iter().any(|c| c.rule == Rule::AssignStmt));
        assert!(switch.find(Rule::DefaultClause).is_some());
    }

    #[test]
    fn array_reassign_differs_from_assign() {
        let tree = parse_source("sprite S { void M() { num[2] a; a = {1, 2}; a[1] = 3; } }");
        let block = tree.children[0]
            .find(Rule::MethodDecl)
            .unwrap()
            .find(Rule::Block)
            .unwrap();
        assert_eq!(block.children[0].rule, Rule::ArrayDeclStmt);
        assert_eq!(block.children[1].rule, Rule::ArrayReAssignStmt);
        assert_eq!(block.children[2].rule, Rule::ArrayAssignStmt);
    }

    #[test]
    fn event_parameter_sits_between_angle_brackets() {
        let tree = parse_source("sprite S { event KeyPressed<\"space\"> () { } }");
        let event = tree.children[0].find(Rule::EventDecl).unwrap();
        assert_eq!(event.child_text(Rule::Name), Some("KeyPressed"));
        assert_eq!(event.child_text(Rule::StringLit), Some("space"));
    }

    #[test]
    fn negative_literal_in_const() {
        let tree = parse_source("const num Low = -5;");
        let constant = &tree.children[0];
        assert_eq!(constant.child_text(Rule::NumberLit), Some("-5"));
    }

    #[test]
    fn missing_semicolon_is_a_parse_error() {
        let tokens = tokenize("num x = 5", 0).unwrap();
        let err = parse(tokens).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TokenMissing);
    }
}
