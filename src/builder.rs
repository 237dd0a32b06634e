//! Assembles the project model from parse trees.
//!
//! The builder walks each tree depth-first and reacts to enter/exit
//! events. Expressions are assembled on one stack, statement bodies on
//! another: an expression node pushes itself when it exits, and the
//! statement that owns it pops its operands when it exits. Between two
//! statements of the same block the expression stack is back at the
//! block's floor; a mismatch is a compiler bug and panics.
//!
//! All user-facing checks report through [`Diagnostics`] and keep
//! going, so one pass collects every declaration error in the file.

use crate::ast::*;
use crate::errors::{Diagnostics, ErrorKind};
use crate::parser::{ParseNode, Rule};
use crate::scope::names;

/// Builds one parsed file into the shared project. Call once per
/// injected file; declarations accumulate across calls.
pub fn build_file(tree: &ParseNode, project: &mut Project, diags: &mut Diagnostics) {
    let mut builder = Builder {
        project,
        diags,
        target: None,
        exprs: Vec::new(),
        bodies: Vec::new(),
        expr_floors: Vec::new(),
        pending_cases: Vec::new(),
        case_marks: Vec::new(),
    };
    walk(tree, &mut builder);
}

fn walk(node: &ParseNode, builder: &mut Builder) {
    builder.enter(node);
    for child in &node.children {
        walk(child, builder);
    }
    builder.exit(node);
}

/// Sprite or module body under construction.
struct PendingTarget {
    pos: Position,
    name: String,
    is_sprite: bool,
    members: Members,
    imports: Vec<ImportDecl>,
    costumes: Vec<CostumeDecl>,
}

enum PendingCase {
    Case(SwitchCase),
    Default(Position, Vec<Statement>),
}

struct Builder<'a> {
    project: &'a mut Project,
    diags: &'a mut Diagnostics,
    target: Option<PendingTarget>,
    exprs: Vec<Expression>,
    bodies: Vec<Vec<Statement>>,
    expr_floors: Vec<usize>,
    pending_cases: Vec<PendingCase>,
    case_marks: Vec<usize>,
}

impl Builder<'_> {
    fn enter(&mut self, node: &ParseNode) {
        if node.rule.is_statement() {
            let floor = self.expr_floors.last().copied().unwrap_or(0);
            assert_eq!(
                self.exprs.len(),
                floor,
                "expression stack out of balance at statement start"
            );
        }
        match node.rule {
            Rule::SpriteDecl | Rule::ModuleDecl => {
                self.target = Some(PendingTarget {
                    pos: node.pos,
                    name: node.child_text(Rule::Name).unwrap_or_default().to_string(),
                    is_sprite: node.rule == Rule::SpriteDecl,
                    members: Members::default(),
                    imports: Vec::new(),
                    costumes: Vec::new(),
                });
            }
            Rule::Block | Rule::CaseClause | Rule::DefaultClause => {
                self.bodies.push(Vec::new());
                self.expr_floors.push(self.exprs.len());
            }
            Rule::SwitchStmt => {
                self.case_marks.push(self.pending_cases.len());
            }
            _ => {}
        }
    }

    fn exit(&mut self, node: &ParseNode) {
        match node.rule {
            Rule::ConstDecl => self.exit_const(node),
            Rule::GlobalVarDecl => self.exit_global_var(node),
            Rule::GlobalListDecl => self.exit_global_list(node),
            Rule::ImportDecl => self.exit_import(node),
            Rule::CostumeDecl => self.exit_costume(node),
            Rule::MethodDecl => self.exit_method(node),
            Rule::EventDecl => self.exit_event(node),
            Rule::SpriteDecl => self.exit_sprite(node),
            Rule::ModuleDecl => self.exit_module(node),
            Rule::Block => {
                let floor = self.expr_floors.pop().unwrap_or(0);
                assert_eq!(
                    self.exprs.len(),
                    floor,
                    "expression stack out of balance at block end"
                );
            }
            Rule::CaseClause => {
                self.expr_floors.pop();
                let body = self.bodies.pop().unwrap_or_default();
                let labels = node.literal_children().into_iter().map(literal_of).collect();
                self.pending_cases.push(PendingCase::Case(SwitchCase {
                    pos: node.pos,
                    labels,
                    body,
                }));
            }
            Rule::DefaultClause => {
                self.expr_floors.pop();
                let body = self.bodies.pop().unwrap_or_default();
                self.pending_cases.push(PendingCase::Default(node.pos, body));
            }
            Rule::VarDeclStmt => {
                let value = self.pop_optional_expr(node);
                self.push_statement(Statement::VarDecl {
                    pos: node.pos,
                    name: name_of(node),
                    data_type: type_of(node),
                    value,
                });
            }
            Rule::ArrayDeclStmt => self.exit_array_decl(node),
            Rule::AssignStmt => {
                let op = assign_op(&node.text);
                let value = self.pop_assign_value(op);
                self.push_statement(Statement::Assign {
                    pos: node.pos,
                    name: name_of(node),
                    op,
                    value,
                });
            }
            Rule::ArrayAssignStmt => {
                let op = assign_op(&node.text);
                let value = self.pop_assign_value(op);
                let index = self.pop_expr();
                self.push_statement(Statement::ArrayAssign {
                    pos: node.pos,
                    name: name_of(node),
                    index,
                    op,
                    value,
                });
            }
            Rule::ArrayReAssignStmt => {
                let values = self.pop_exprs(node.expression_count());
                self.push_statement(Statement::ArrayReAssign {
                    pos: node.pos,
                    name: name_of(node),
                    values,
                });
            }
            Rule::IfStmt => self.exit_if(node),
            Rule::SwitchStmt => self.exit_switch(node),
            Rule::RepeatStmt => {
                let body = self.pop_body();
                let count = self.pop_expr();
                self.push_statement(Statement::Repeat {
                    pos: node.pos,
                    count,
                    body,
                    inline: node.text == "inline",
                });
            }
            Rule::WhileStmt => {
                let body = self.pop_body();
                let condition = self.pop_expr();
                self.push_statement(Statement::While {
                    pos: node.pos,
                    condition,
                    body,
                });
            }
            Rule::UntilStmt => {
                let body = self.pop_body();
                let condition = self.pop_expr();
                self.push_statement(Statement::Until {
                    pos: node.pos,
                    condition,
                    body,
                });
            }
            Rule::ForStmt => {
                let body = self.pop_body();
                let count = self.pop_expr();
                self.push_statement(Statement::For {
                    pos: node.pos,
                    variable: name_of(node),
                    data_type: type_of(node),
                    count,
                    body,
                });
            }
            Rule::ForeachStmt => {
                let body = self.pop_body();
                let name_nodes = node.all(Rule::Name);
                self.push_statement(Statement::Foreach {
                    pos: node.pos,
                    variable: name_nodes.first().map(|n| n.text.clone()).unwrap_or_default(),
                    data_type: type_of(node),
                    source: name_nodes.get(1).map(|n| n.text.clone()).unwrap_or_default(),
                    body,
                });
            }
            Rule::ForeverStmt => {
                let body = self.pop_body();
                self.push_statement(Statement::Forever {
                    pos: node.pos,
                    body,
                });
            }
            Rule::ReturnStmt => {
                let value = self.pop_optional_expr(node);
                self.push_statement(Statement::Return {
                    pos: node.pos,
                    value,
                });
            }
            Rule::CallStmt => {
                let args = self.pop_exprs(node.expression_count());
                self.push_statement(Statement::Call {
                    pos: node.pos,
                    method: name_of(node),
                    args,
                });
            }
            Rule::ScopeStmt => {
                let body = self.pop_body();
                self.push_statement(Statement::Scope {
                    pos: node.pos,
                    body,
                });
            }
            Rule::TermExpr => {
                let value = node
                    .literal_children()
                    .first()
                    .map(|leaf| literal_of(leaf))
                    .unwrap_or(Literal::Text(String::new()));
                self.exprs.push(Expression::Terminal {
                    pos: node.pos,
                    value,
                });
            }
            Rule::LookupExpr => {
                self.exprs.push(Expression::Lookup {
                    pos: node.pos,
                    name: name_of(node),
                });
            }
            Rule::ArrayLookupExpr => {
                let index = self.pop_expr();
                self.exprs.push(Expression::ArrayLookup {
                    pos: node.pos,
                    name: name_of(node),
                    index: Box::new(index),
                });
            }
            Rule::UnaryExpr => {
                let operand = self.pop_expr();
                let op = if node.text == "!" {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                self.exprs.push(Expression::Unary {
                    pos: node.pos,
                    op,
                    operand: Box::new(operand),
                });
            }
            Rule::BinaryExpr => {
                let right = self.pop_expr();
                let left = self.pop_expr();
                self.exprs.push(Expression::Compound {
                    pos: node.pos,
                    op: binary_op(&node.text),
                    left: Box::new(left),
                    right: Box::new(right),
                });
            }
            Rule::CallExpr => {
                let args = self.pop_exprs(node.expression_count());
                self.exprs.push(Expression::Call {
                    pos: node.pos,
                    method: name_of(node),
                    args,
                });
            }
            Rule::NameOfExpr => {
                self.exprs.push(Expression::NameOf {
                    pos: node.pos,
                    name: name_of(node),
                });
            }
            _ => {}
        }
    }

    fn exit_const(&mut self, node: &ParseNode) {
        let data_type = type_of(node);
        let name = name_of(node);
        let value = literal_child(node).unwrap_or_else(|| data_type.default_literal());
        if !data_type.accepts(value.data_type()) {
            self.diags.report(
                ErrorKind::TypeMismatch,
                format!(
                    "Constant '{}' of type '{}' cannot hold a '{}' value.",
                    name,
                    data_type,
                    value.data_type()
                ),
                node.pos,
            );
        }
        if self.value_name_taken(&name) {
            self.diags.report(
                ErrorKind::DuplicateDeclaration,
                format!("A value named '{}' is already declared here.", name),
                node.pos,
            );
            return;
        }
        let decl = ConstantDecl {
            pos: node.pos,
            name,
            data_type,
            value,
        };
        match &mut self.target {
            Some(target) => target.members.constants.push(decl),
            None => self.project.constants.push(decl),
        }
    }

    fn exit_global_var(&mut self, node: &ParseNode) {
        let data_type = type_of(node);
        let name = name_of(node);
        let value = match literal_child(node) {
            Some(value) => {
                if !data_type.accepts(value.data_type()) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Variable '{}' of type '{}' cannot start as a '{}' value.",
                            name,
                            data_type,
                            value.data_type()
                        ),
                        node.pos,
                    );
                }
                value
            }
            None => data_type.default_literal(),
        };
        if self.value_name_taken(&name) {
            self.diags.report(
                ErrorKind::DuplicateDeclaration,
                format!("A value named '{}' is already declared here.", name),
                node.pos,
            );
            return;
        }
        let decl = VariableDecl {
            pos: node.pos,
            name,
            data_type,
            value,
        };
        match &mut self.target {
            Some(target) => target.members.variables.push(decl),
            None => self.project.variables.push(decl),
        }
    }

    fn exit_global_list(&mut self, node: &ParseNode) {
        let data_type = if node.find(Rule::TypeName).is_some() {
            type_of(node)
        } else {
            DataType::Object
        };
        let name = name_of(node);
        let mut items: Vec<Literal> = node.literal_children().into_iter().map(literal_of).collect();
        for item in &items {
            if !data_type.accepts(item.data_type()) {
                self.diags.report(
                    ErrorKind::TypeMismatch,
                    format!(
                        "List '{}' of type '{}' cannot hold a '{}' value.",
                        name,
                        data_type,
                        item.data_type()
                    ),
                    node.pos,
                );
            }
        }
        if let Some(bound_text) = node.child_text(Rule::BoundLit) {
            let bound = bound_text.parse::<f64>().unwrap_or(0.0) as usize;
            if bound == 0 {
                self.diags.report(
                    ErrorKind::InvalidArgument,
                    "A list bound must be at least 1.",
                    node.pos,
                );
            } else if items.is_empty() {
                items = vec![Literal::Text(String::new()); bound];
            } else if items.len() != bound {
                self.diags.report(
                    ErrorKind::InvalidArgument,
                    format!(
                        "List '{}' declares {} slots but initializes {}.",
                        name,
                        bound,
                        items.len()
                    ),
                    node.pos,
                );
            }
        }
        if self.value_name_taken(&name) {
            self.diags.report(
                ErrorKind::DuplicateDeclaration,
                format!("A value named '{}' is already declared here.", name),
                node.pos,
            );
            return;
        }
        let decl = ListDecl {
            pos: node.pos,
            name,
            data_type,
            items,
        };
        match &mut self.target {
            Some(target) => target.members.lists.push(decl),
            None => self.project.lists.push(decl),
        }
    }

    fn exit_import(&mut self, node: &ParseNode) {
        let module = name_of(node);
        if let Some(target) = &mut self.target {
            if target.imports.iter().any(|i| names::eq(&i.module, &module)) {
                self.diags.report(
                    ErrorKind::ModuleAlreadyImported,
                    format!("Module '{}' is already imported.", module),
                    node.pos,
                );
                return;
            }
            target.imports.push(ImportDecl {
                pos: node.pos,
                module,
            });
        }
    }

    fn exit_costume(&mut self, node: &ParseNode) {
        let file = node.child_text(Rule::StringLit).unwrap_or_default().to_string();
        if let Some(target) = &mut self.target {
            target.costumes.push(CostumeDecl {
                pos: node.pos,
                file,
            });
        }
    }

    fn exit_method(&mut self, node: &ParseNode) {
        let body = self.pop_body();
        let has_return = node.text == "function";
        let return_type = if has_return {
            type_of(node)
        } else {
            DataType::Object
        };
        let name = name_of(node);
        let modifiers = self.read_modifiers(node, false);
        let params = self.read_params(node);
        if let Some(target) = &self.target {
            if target.members.methods.iter().any(|m| names::eq(&m.name, &name)) {
                self.diags.report(
                    ErrorKind::DuplicateDeclaration,
                    format!("A method named '{}' is already declared here.", name),
                    node.pos,
                );
                return;
            }
        }
        let method = Method {
            pos: node.pos,
            name,
            return_type,
            has_return,
            params,
            is_unsafe: modifiers.is_unsafe,
            is_inline: modifiers.is_inline,
            is_atomic: modifiers.is_atomic,
            body,
        };
        if let Some(target) = &mut self.target {
            target.members.methods.push(method);
        }
    }

    fn exit_event(&mut self, node: &ParseNode) {
        let body = self.pop_body();
        let modifiers = self.read_modifiers(node, true);
        let handler = EventHandler {
            pos: node.pos,
            event: name_of(node),
            parameter: literal_child(node),
            is_unsafe: modifiers.is_unsafe,
            body,
        };
        if let Some(target) = &mut self.target {
            target.members.events.push(handler);
        }
    }

    fn exit_sprite(&mut self, node: &ParseNode) {
        let Some(target) = self.target.take() else {
            return;
        };
        if self
            .project
            .sprites
            .iter()
            .any(|s| names::eq(&s.name, &target.name))
        {
            self.diags.report(
                ErrorKind::DuplicateDeclaration,
                format!("A sprite named '{}' is already declared.", target.name),
                node.pos,
            );
            return;
        }
        self.project.sprites.push(Sprite {
            pos: target.pos,
            name: target.name,
            members: target.members,
            imports: target.imports,
            costumes: target.costumes,
        });
    }

    fn exit_module(&mut self, node: &ParseNode) {
        let Some(target) = self.target.take() else {
            return;
        };
        if self
            .project
            .modules
            .iter()
            .any(|m| names::eq(&m.name, &target.name))
        {
            self.diags.report(
                ErrorKind::DuplicateDeclaration,
                format!("A module named '{}' is already declared.", target.name),
                node.pos,
            );
            return;
        }
        self.project.modules.push(Module {
            pos: target.pos,
            name: target.name,
            members: target.members,
        });
    }

    fn exit_array_decl(&mut self, node: &ParseNode) {
        let mut values = self.pop_exprs(node.expression_count());
        let data_type = type_of(node);
        let name = name_of(node);
        let bound = node
            .child_text(Rule::BoundLit)
            .and_then(|t| t.parse::<f64>().ok())
            .unwrap_or(0.0) as usize;
        if bound == 0 {
            self.diags.report(
                ErrorKind::InvalidArgument,
                "An array bound must be at least 1.",
                node.pos,
            );
        } else if values.is_empty() {
            values = (0..bound)
                .map(|_| Expression::Terminal {
                    pos: node.pos,
                    value: Literal::Text(String::new()),
                })
                .collect();
        } else if values.len() != bound {
            self.diags.report(
                ErrorKind::InvalidArgument,
                format!(
                    "Array '{}' declares {} slots but initializes {}.",
                    name,
                    bound,
                    values.len()
                ),
                node.pos,
            );
        }
        self.push_statement(Statement::ArrayDecl {
            pos: node.pos,
            name,
            data_type,
            bound,
            values,
        });
    }

    fn exit_if(&mut self, node: &ParseNode) {
        let block_count = node.all(Rule::Block).len();
        let cond_count = node.expression_count();
        let mut blocks = self.pop_bodies(block_count);
        let else_body = if block_count > cond_count {
            blocks.pop()
        } else {
            None
        };
        let conditions = self.pop_exprs(cond_count);
        self.push_statement(Statement::If {
            pos: node.pos,
            branches: conditions.into_iter().zip(blocks).collect(),
            else_body,
        });
    }

    fn exit_switch(&mut self, node: &ParseNode) {
        let mark = self.case_marks.pop().unwrap_or(0);
        let clauses = self.pending_cases.split_off(mark);
        let subject = self.pop_expr();
        let mut cases = Vec::new();
        let mut default_body = None;
        for clause in clauses {
            match clause {
                PendingCase::Case(case) => cases.push(case),
                PendingCase::Default(pos, body) => {
                    if default_body.is_some() {
                        self.diags.report(
                            ErrorKind::InvalidArgument,
                            "A switch can have only one default clause.",
                            pos,
                        );
                    } else {
                        default_body = Some(body);
                    }
                }
            }
        }
        self.push_statement(Statement::Switch {
            pos: node.pos,
            subject,
            cases,
            default_body,
        });
    }

    fn read_modifiers(&mut self, node: &ParseNode, is_event: bool) -> ModifierSet {
        let mut set = ModifierSet::default();
        for modifier in node.all(Rule::Modifier) {
            let seen = match modifier.text.as_str() {
                "unsafe" => {
                    let seen = set.is_unsafe;
                    set.is_unsafe = true;
                    seen
                }
                "inline" => {
                    let seen = set.is_inline;
                    set.is_inline = true;
                    seen
                }
                _ => {
                    let seen = set.is_atomic;
                    set.is_atomic = true;
                    seen
                }
            };
            if seen {
                self.diags.report(
                    ErrorKind::ExtraneousToken,
                    format!("Duplicate modifier '{}'.", modifier.text),
                    modifier.pos,
                );
            }
            if is_event && modifier.text != "unsafe" {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("Modifier '{}' does not apply to event handlers.", modifier.text),
                    modifier.pos,
                );
            }
        }
        set
    }

    fn read_params(&mut self, node: &ParseNode) -> Vec<ParamDecl> {
        let mut params: Vec<ParamDecl> = Vec::new();
        for param in node.all(Rule::Param) {
            let data_type = type_of(param);
            let name = name_of(param);
            let default = literal_child(param);
            if let Some(value) = &default {
                if !data_type.accepts(value.data_type()) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Parameter '{}' of type '{}' cannot default to a '{}' value.",
                            name,
                            data_type,
                            value.data_type()
                        ),
                        param.pos,
                    );
                }
            }
            if params.iter().any(|p| names::eq(&p.name, &name)) {
                self.diags.report(
                    ErrorKind::DuplicateDeclaration,
                    format!("Duplicate parameter '{}'.", name),
                    param.pos,
                );
                continue;
            }
            if default.is_none() && params.iter().any(|p| p.default.is_some()) {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!(
                        "Parameter '{}' without a default cannot follow an optional parameter.",
                        name
                    ),
                    param.pos,
                );
            }
            params.push(ParamDecl {
                pos: param.pos,
                name,
                data_type,
                default,
            });
        }
        params
    }

    fn value_name_taken(&self, name: &str) -> bool {
        match &self.target {
            Some(target) => members_value_taken(&target.members, name),
            None => {
                self.project.constants.iter().any(|c| names::eq(&c.name, name))
                    || self.project.variables.iter().any(|v| names::eq(&v.name, name))
                    || self.project.lists.iter().any(|l| names::eq(&l.name, name))
            }
        }
    }

    fn push_statement(&mut self, statement: Statement) {
        if let Some(body) = self.bodies.last_mut() {
            body.push(statement);
        }
    }

    fn pop_expr(&mut self) -> Expression {
        self.exprs.pop().expect("expression stack underflow")
    }

    fn pop_exprs(&mut self, count: usize) -> Vec<Expression> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.pop_expr());
        }
        out.reverse();
        out
    }

    fn pop_optional_expr(&mut self, node: &ParseNode) -> Option<Expression> {
        if node.expression_count() > 0 {
            Some(self.pop_expr())
        } else {
            None
        }
    }

    fn pop_assign_value(&mut self, op: AssignOp) -> Option<Expression> {
        if matches!(op, AssignOp::Inc | AssignOp::Dec) {
            None
        } else {
            Some(self.pop_expr())
        }
    }

    fn pop_body(&mut self) -> Vec<Statement> {
        self.bodies.pop().expect("statement body stack underflow")
    }

    fn pop_bodies(&mut self, count: usize) -> Vec<Vec<Statement>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.pop_body());
        }
        out.reverse();
        out
    }
}

#[derive(Default)]
struct ModifierSet {
    is_unsafe: bool,
    is_inline: bool,
    is_atomic: bool,
}

fn type_of(node: &ParseNode) -> DataType {
    match node.child_text(Rule::TypeName) {
        Some("num") => DataType::Number,
        Some("string") => DataType::String,
        Some("bool") => DataType::Boolean,
        _ => DataType::Object,
    }
}

fn name_of(node: &ParseNode) -> String {
    node.child_text(Rule::Name).unwrap_or_default().to_string()
}

fn literal_child(node: &ParseNode) -> Option<Literal> {
    node.literal_children().first().map(|leaf| literal_of(leaf))
}

fn literal_of(leaf: &ParseNode) -> Literal {
    match leaf.rule {
        Rule::NumberLit => Literal::Number(leaf.text.parse().unwrap_or(0.0)),
        Rule::BoolLit => Literal::Bool(leaf.text == "true"),
        _ => Literal::Text(leaf.text.clone()),
    }
}

fn assign_op(text: &str) -> AssignOp {
    match text {
        "+=" => AssignOp::Add,
        "-=" => AssignOp::Sub,
        ".=" => AssignOp::Concat,
        "++" => AssignOp::Inc,
        "--" => AssignOp::Dec,
        _ => AssignOp::Assign,
    }
}

fn binary_op(text: &str) -> BinaryOp {
    match text {
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        "." => BinaryOp::Concat,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Neq,
        "<" => BinaryOp::Lt,
        ">" => BinaryOp::Gt,
        "<=" => BinaryOp::LtEq,
        ">=" => BinaryOp::GtEq,
        "&&" => BinaryOp::And,
        _ => BinaryOp::Or,
    }
}

fn members_value_taken(members: &Members, name: &str) -> bool {
    members.constants.iter().any(|c| names::eq(&c.name, name))
        || members.variables.iter().any(|v| names::eq(&v.name, name))
        || members.lists.iter().any(|l| names::eq(&l.name, name))
}

/// Copies each imported module's members into the importing sprite.
/// Runs once, after every file has been built, so modules may be
/// declared in any file. The copy is a snapshot: later edits to the
/// module model do not flow through.
pub fn link_imports(project: &mut Project, diags: &mut Diagnostics) {
    let modules = project.modules.clone();
    for sprite in &mut project.sprites {
        let imports = sprite.imports.clone();
        for import in imports {
            match modules.iter().find(|m| names::eq(&m.name, &import.module)) {
                None => diags.report(
                    ErrorKind::NotDefined,
                    format!("Module '{}' is not defined.", import.module),
                    import.pos,
                ),
                Some(module) => merge_members(sprite, module, &import, diags),
            }
        }
    }
}

fn merge_members(sprite: &mut Sprite, module: &Module, import: &ImportDecl, diags: &mut Diagnostics) {
    for constant in &module.members.constants {
        if members_value_taken(&sprite.members, &constant.name) {
            report_clash(diags, import, &constant.name);
        } else {
            sprite.members.constants.push(constant.clone());
        }
    }
    for variable in &module.members.variables {
        if members_value_taken(&sprite.members, &variable.name) {
            report_clash(diags, import, &variable.name);
        } else {
            sprite.members.variables.push(variable.clone());
        }
    }
    for list in &module.members.lists {
        if members_value_taken(&sprite.members, &list.name) {
            report_clash(diags, import, &list.name);
        } else {
            sprite.members.lists.push(list.clone());
        }
    }
    for method in &module.members.methods {
        if sprite
            .members
            .methods
            .iter()
            .any(|m| names::eq(&m.name, &method.name))
        {
            report_clash(diags, import, &method.name);
        } else {
            sprite.members.methods.push(method.clone());
        }
    }
    for event in &module.members.events {
        sprite.members.events.push(event.clone());
    }
}

fn report_clash(diags: &mut Diagnostics, import: &ImportDecl, member: &str) {
    diags.report(
        ErrorKind::DuplicateDeclaration,
        format!(
            "Importing module '{}' clashes with the existing member '{}'.",
            import.module, member
        ),
        import.pos,
    );
}
