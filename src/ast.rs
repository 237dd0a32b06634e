#![allow(dead_code)]

use std::fmt;

/// A point in a source file. `start`/`stop` are inclusive character
/// offsets so diagnostics can quote the offending text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub file: usize,
    pub line: usize,
    pub column: usize,
    pub start: usize,
    pub stop: usize,
}

impl Position {
    pub fn new(file: usize, line: usize, column: usize, start: usize, stop: usize) -> Self {
        Self {
            file,
            line,
            column,
            start,
            stop,
        }
    }
}

/// Static value categories. `Object` is the untyped catch-all: an
/// expected `Object` accepts a value of any type, while every other
/// pairing must match exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Object,
    String,
    Number,
    Boolean,
}

impl DataType {
    /// One-directional compatibility check: `expected.accepts(actual)`.
    pub fn accepts(self, actual: DataType) -> bool {
        self == DataType::Object || self == actual
    }

    /// Initial value for declarations without an initializer.
    pub fn default_literal(self) -> Literal {
        match self {
            DataType::Number => Literal::Number(0.0),
            DataType::Boolean => Literal::Bool(false),
            _ => Literal::Text(String::new()),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DataType::Object => "var",
            DataType::String => "string",
            DataType::Number => "num",
            DataType::Boolean => "bool",
        };
        f.write_str(text)
    }
}

/// A compile-time value: number, string or boolean.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl Literal {
    pub fn data_type(&self) -> DataType {
        match self {
            Literal::Number(_) => DataType::Number,
            Literal::Text(_) => DataType::String,
            Literal::Bool(_) => DataType::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::Text(s) => write!(f, "{}", s),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Neq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    /// Operators whose chains the code generator may rebalance.
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Mul | BinaryOp::Concat | BinaryOp::And | BinaryOp::Or
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Terminal {
        pos: Position,
        value: Literal,
    },
    Lookup {
        pos: Position,
        name: String,
    },
    ArrayLookup {
        pos: Position,
        name: String,
        index: Box<Expression>,
    },
    Unary {
        pos: Position,
        op: UnaryOp,
        operand: Box<Expression>,
    },
    Compound {
        pos: Position,
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Call {
        pos: Position,
        method: String,
        args: Vec<Expression>,
    },
    NameOf {
        pos: Position,
        name: String,
    },
}

impl Expression {
    pub fn pos(&self) -> Position {
        match self {
            Expression::Terminal { pos, .. }
            | Expression::Lookup { pos, .. }
            | Expression::ArrayLookup { pos, .. }
            | Expression::Unary { pos, .. }
            | Expression::Compound { pos, .. }
            | Expression::Call { pos, .. }
            | Expression::NameOf { pos, .. } => *pos,
        }
    }
}

/// Assignment operators, shared by scalar and array-element targets.
/// `Inc`/`Dec` are the `++`/`--` forms and carry no value expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Concat,
    Inc,
    Dec,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    VarDecl {
        pos: Position,
        name: String,
        data_type: DataType,
        value: Option<Expression>,
    },
    ArrayDecl {
        pos: Position,
        name: String,
        data_type: DataType,
        bound: usize,
        values: Vec<Expression>,
    },
    Assign {
        pos: Position,
        name: String,
        op: AssignOp,
        value: Option<Expression>,
    },
    ArrayAssign {
        pos: Position,
        name: String,
        index: Expression,
        op: AssignOp,
        value: Option<Expression>,
    },
    ArrayReAssign {
        pos: Position,
        name: String,
        values: Vec<Expression>,
    },
    If {
        pos: Position,
        branches: Vec<(Expression, Vec<Statement>)>,
        else_body: Option<Vec<Statement>>,
    },
    Switch {
        pos: Position,
        subject: Expression,
        cases: Vec<SwitchCase>,
        default_body: Option<Vec<Statement>>,
    },
    Repeat {
        pos: Position,
        count: Expression,
        body: Vec<Statement>,
        inline: bool,
    },
    While {
        pos: Position,
        condition: Expression,
        body: Vec<Statement>,
    },
    Until {
        pos: Position,
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        pos: Position,
        variable: String,
        data_type: DataType,
        count: Expression,
        body: Vec<Statement>,
    },
    Foreach {
        pos: Position,
        variable: String,
        data_type: DataType,
        source: String,
        body: Vec<Statement>,
    },
    Forever {
        pos: Position,
        body: Vec<Statement>,
    },
    Return {
        pos: Position,
        value: Option<Expression>,
    },
    Call {
        pos: Position,
        method: String,
        args: Vec<Expression>,
    },
    Scope {
        pos: Position,
        body: Vec<Statement>,
    },
}

impl Statement {
    pub fn pos(&self) -> Position {
        match self {
            Statement::VarDecl { pos, .. }
            | Statement::ArrayDecl { pos, .. }
            | Statement::Assign { pos, .. }
            | Statement::ArrayAssign { pos, .. }
            | Statement::ArrayReAssign { pos, .. }
            | Statement::If { pos, .. }
            | Statement::Switch { pos, .. }
            | Statement::Repeat { pos, .. }
            | Statement::While { pos, .. }
            | Statement::Until { pos, .. }
            | Statement::For { pos, .. }
            | Statement::Foreach { pos, .. }
            | Statement::Forever { pos, .. }
            | Statement::Return { pos, .. }
            | Statement::Call { pos, .. }
            | Statement::Scope { pos, .. } => *pos,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub pos: Position,
    pub labels: Vec<Literal>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub pos: Position,
    pub name: String,
    pub data_type: DataType,
    pub value: Literal,
}

#[derive(Debug, Clone)]
pub struct VariableDecl {
    pub pos: Position,
    pub name: String,
    pub data_type: DataType,
    pub value: Literal,
}

#[derive(Debug, Clone)]
pub struct ListDecl {
    pub pos: Position,
    pub name: String,
    pub data_type: DataType,
    pub items: Vec<Literal>,
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub pos: Position,
    pub name: String,
    pub data_type: DataType,
    pub default: Option<Literal>,
}

#[derive(Debug, Clone)]
pub struct Method {
    pub pos: Position,
    pub name: String,
    pub return_type: DataType,
    pub has_return: bool,
    pub params: Vec<ParamDecl>,
    pub is_unsafe: bool,
    pub is_inline: bool,
    pub is_atomic: bool,
    pub body: Vec<Statement>,
}

impl Method {
    /// Number of arguments a call must supply at minimum.
    pub fn required_params(&self) -> usize {
        self.params.iter().take_while(|p| p.default.is_none()).count()
    }
}

#[derive(Debug, Clone)]
pub struct EventHandler {
    pub pos: Position,
    pub event: String,
    pub parameter: Option<Literal>,
    pub is_unsafe: bool,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct CostumeDecl {
    pub pos: Position,
    pub file: String,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub pos: Position,
    pub module: String,
}

/// The members sprites and modules have in common. Module import
/// copies a snapshot of one `Members` into another.
#[derive(Debug, Clone, Default)]
pub struct Members {
    pub constants: Vec<ConstantDecl>,
    pub variables: Vec<VariableDecl>,
    pub lists: Vec<ListDecl>,
    pub methods: Vec<Method>,
    pub events: Vec<EventHandler>,
}

#[derive(Debug, Clone)]
pub struct Sprite {
    pub pos: Position,
    pub name: String,
    pub members: Members,
    pub imports: Vec<ImportDecl>,
    pub costumes: Vec<CostumeDecl>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub pos: Position,
    pub name: String,
    pub members: Members,
}

/// Everything the builder collected from every injected file.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub constants: Vec<ConstantDecl>,
    pub variables: Vec<VariableDecl>,
    pub lists: Vec<ListDecl>,
    pub sprites: Vec<Sprite>,
    pub modules: Vec<Module>,
}
