//! Lowering from the built declaration tree to the block model.
//!
//! Every script rides an emulated call stack: each sprite owns one
//! runtime list holding every live frame plus one shared return
//! variable. Safe scoped values occupy list slots addressed as
//! `base + stack_start`; unsafe values spill to named variables and
//! lists instead. Methods become custom-block definitions with two
//! hidden trailing parameters carrying the stack list name and the
//! caller's stack length, and scope exits pop exactly the slots they
//! pushed.

use crate::ast::{
    AssignOp, BinaryOp, ConstantDecl, DataType, EventHandler, Expression, ListDecl, Literal,
    Method, ParamDecl, Position, Project, Sprite, Statement, UnaryOp, VariableDecl,
};
use crate::builtins::{self, ListOpKind};
use crate::errors::{Diagnostics, ErrorKind};
use crate::sb2::{self, Block, BlockValue, Sb2Project, Script, Target, Variable};
use crate::scope::{names, ScopeArena, ScopeId, StackSlot};
use std::collections::HashMap;

/// Runtime list holding every live stack frame of a sprite.
const STACK_LIST: &str = "@stack";
/// Shared variable carrying the last returned value.
const RETURN_VAR: &str = "@return";
/// Hidden parameter holding the callee's frame base offset.
const BASE_PARAM: &str = "@base";

const SCRIPT_X: f64 = 20.0;
const SCRIPT_Y_START: f64 = 20.0;
const SCRIPT_Y_STEP: f64 = 200.0;

#[derive(Debug, Clone, Copy)]
pub struct CompileOptions {
    /// Unroll bound for `inline repeat`; literal counts above it fall
    /// back to a runtime repeat block.
    pub inline_repeat_cap: usize,
    /// Normalize costume SVGs to a fixed square canvas.
    pub scale_svgs: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            inline_repeat_cap: 64,
            scale_svgs: true,
        }
    }
}

/// Counters shared across one compilation run. Scope labels feed the
/// off-stack storage names, temps feed compiler-generated slot names;
/// both restart per session so equal inputs give equal output.
#[derive(Default)]
struct Session {
    next_label: usize,
    next_temp: usize,
}

impl Session {
    fn label(&mut self) -> usize {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn temp(&mut self) -> usize {
        let temp = self.next_temp;
        self.next_temp += 1;
        temp
    }
}

/// Lowers every sprite of the project. The stage carries the
/// superglobal variables and lists; costumes and assets are attached
/// by a later pass.
pub fn lower_project(
    project: &Project,
    diags: &mut Diagnostics,
    options: &CompileOptions,
) -> Sb2Project {
    let mut stage = Target::new("Stage", true);
    for decl in &project.variables {
        stage.variables.push(Variable {
            name: decl.name.clone(),
            value: decl.value.clone(),
        });
    }
    for decl in &project.lists {
        stage.lists.push(sb2::List {
            name: decl.name.clone(),
            contents: decl.items.clone(),
        });
    }

    let mut session = Session::default();
    let mut sprites = Vec::new();
    for sprite in &project.sprites {
        let lowering = SpriteLowering::new(project, sprite, diags, options, &mut session);
        sprites.push(lowering.lower());
    }

    Sb2Project {
        stage,
        sprites,
        assets: HashMap::new(),
    }
}

/// Where a name resolved to, detached from the declaration site so
/// compound assignments can read back the exact same storage.
enum Resolved {
    Constant(Literal, DataType),
    Variable { name: String, data_type: DataType },
    RuntimeList { name: String, data_type: DataType },
    Param { name: String, data_type: DataType },
    Slot(StackSlot),
}

/// A lowered list operation. Commands stack as blocks; reporters are
/// values, and a count over a fixed-size array folds to its bound.
enum ListLowered {
    Command(Block),
    Report(BlockValue),
}

/// Per-script lowering state. Handlers address slots with literal
/// indices (their base is 0); methods add the hidden base parameter.
struct ScriptContext<'a> {
    params: &'a [ParamDecl],
    return_type: Option<DataType>,
    is_handler: bool,
    /// Names of inline methods currently being expanded.
    inline: Vec<String>,
}

/// Blocks under construction for one script body, with the two side
/// channels spliced around each finished statement.
#[derive(Default)]
struct BlockChannels {
    blocks: Vec<Block>,
    before: Vec<Block>,
    after: Vec<Block>,
}

impl BlockChannels {
    fn mark(&self) -> usize {
        self.blocks.len()
    }

    fn push(&mut self, block: Block) {
        self.blocks.push(block);
    }

    /// Splices the "before" blocks in front of everything emitted
    /// since `mark` and appends the "after" blocks.
    fn flush(&mut self, mark: usize) {
        let before = std::mem::take(&mut self.before);
        self.blocks.splice(mark..mark, before);
        let after = std::mem::take(&mut self.after);
        self.blocks.extend(after);
    }
}

struct SpriteLowering<'a> {
    project: &'a Project,
    sprite: &'a Sprite,
    diags: &'a mut Diagnostics,
    options: &'a CompileOptions,
    session: &'a mut Session,
    arena: ScopeArena,
    target: Target,
    script_y: f64,
}

impl<'a> SpriteLowering<'a> {
    fn new(
        project: &'a Project,
        sprite: &'a Sprite,
        diags: &'a mut Diagnostics,
        options: &'a CompileOptions,
        session: &'a mut Session,
    ) -> Self {
        let target = Target::new(&sprite.name, false);
        Self {
            project,
            sprite,
            diags,
            options,
            session,
            arena: ScopeArena::new(),
            target,
            script_y: SCRIPT_Y_START,
        }
    }

    fn lower(mut self) -> Target {
        self.target.lists.push(sb2::List {
            name: STACK_LIST.to_string(),
            contents: Vec::new(),
        });
        self.target.variables.push(Variable {
            name: RETURN_VAR.to_string(),
            value: Literal::Text(String::new()),
        });
        let sprite = self.sprite;
        for decl in &sprite.members.variables {
            self.target.variables.push(Variable {
                name: decl.name.clone(),
                value: decl.value.clone(),
            });
        }
        for decl in &sprite.members.lists {
            self.target.lists.push(sb2::List {
                name: decl.name.clone(),
                contents: decl.items.clone(),
            });
        }
        for handler in &sprite.members.events {
            self.lower_handler(handler);
        }
        for method in &sprite.members.methods {
            if !method.is_inline {
                self.lower_method(method);
            }
        }
        self.target
    }

    fn push_script(&mut self, blocks: Vec<Block>) {
        self.target.scripts.push(Script {
            x: SCRIPT_X,
            y: self.script_y,
            blocks,
        });
        self.script_y += SCRIPT_Y_STEP;
    }

    fn lower_handler(&mut self, handler: &'a EventHandler) {
        let hat = match builtins::find_event(&handler.event) {
            Some(hat) => hat,
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("Event '{}' is not defined.", handler.event),
                    handler.pos,
                );
                return;
            }
        };
        match (hat.parameter, &handler.parameter) {
            (Some(expected), Some(literal)) => {
                if !expected.accepts(literal.data_type()) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Event '{}' wants a '{}' parameter, found '{}'.",
                            hat.name,
                            expected,
                            literal.data_type()
                        ),
                        handler.pos,
                    );
                }
            }
            (Some(_), None) => {
                self.diags.report(
                    ErrorKind::InvalidArgument,
                    format!("Event '{}' needs a parameter between '<' and '>'.", hat.name),
                    handler.pos,
                );
            }
            (None, Some(_)) => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("Event '{}' takes no parameter.", hat.name),
                    handler.pos,
                );
            }
            (None, None) => {}
        }

        let mut args = Vec::new();
        if let Some(sensor) = hat.fixed_arg {
            args.push(text(sensor));
        }
        if hat.parameter.is_some() {
            if let Some(literal) = &handler.parameter {
                args.push(BlockValue::from(literal));
            }
        }
        let mut blocks = vec![Block::new(hat.opcode, args)];
        // A fresh run must not see frames left over from a stopped one.
        if hat.opcode == "whenGreenFlag" {
            blocks.push(Block::new(
                "deleteLine:ofList:",
                vec![text("all"), text(STACK_LIST)],
            ));
        }

        let root = self.arena.root(self.session.label(), handler.is_unsafe);
        let mut ctx = ScriptContext {
            params: &[],
            return_type: None,
            is_handler: true,
            inline: Vec::new(),
        };
        blocks.extend(self.lower_statements_in(&mut ctx, root, &handler.body));
        self.push_script(blocks);
    }

    fn lower_method(&mut self, method: &'a Method) {
        let mut param_names: Vec<BlockValue> =
            method.params.iter().map(|p| text(&p.name)).collect();
        param_names.push(text(STACK_LIST));
        param_names.push(text(BASE_PARAM));
        let mut defaults: Vec<BlockValue> = method
            .params
            .iter()
            .map(|p| match p.data_type {
                DataType::Number => BlockValue::Number(1.0),
                DataType::Boolean => BlockValue::Bool(false),
                _ => text(""),
            })
            .collect();
        defaults.push(text(""));
        defaults.push(BlockValue::Number(0.0));

        let mut blocks = vec![Block::new(
            "procDef",
            vec![
                text(&proccode(method)),
                BlockValue::List(param_names),
                BlockValue::List(defaults),
                BlockValue::Bool(method.is_atomic),
            ],
        )];

        let root = self.arena.root(self.session.label(), method.is_unsafe);
        let mut ctx = ScriptContext {
            params: &method.params,
            return_type: method.has_return.then_some(method.return_type),
            is_handler: false,
            inline: Vec::new(),
        };
        blocks.extend(self.lower_statements_in(&mut ctx, root, &method.body));
        self.push_script(blocks);
    }

    /// Lowers a statement list directly into `scope` and closes with
    /// the scope's own cleanup. Loop substacks reuse this so each
    /// iteration pops what it pushed.
    fn lower_statements_in(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        statements: &'a [Statement],
    ) -> Vec<Block> {
        let mut out = BlockChannels::default();
        for statement in statements {
            self.lower_statement(ctx, scope, statement, &mut out);
        }
        emit_pops(self.arena.scope_space(scope), &mut out.blocks);
        out.blocks
    }

    /// Lowers a block body in a fresh child scope.
    fn lower_body(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        parent: ScopeId,
        statements: &'a [Statement],
    ) -> Vec<Block> {
        let scope = self.arena.child(parent, self.session.label(), false);
        self.lower_statements_in(ctx, scope, statements)
    }

    fn lower_statement(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        statement: &'a Statement,
        out: &mut BlockChannels,
    ) {
        let mark = out.mark();
        match statement {
            Statement::VarDecl {
                pos,
                name,
                data_type,
                value,
            } => {
                if self.arena.find_local(scope, name).is_some() {
                    self.diags.report(
                        ErrorKind::DuplicateDeclaration,
                        format!("A value named '{}' is already declared here.", name),
                        *pos,
                    );
                    out.flush(mark);
                    return;
                }
                let init = match value {
                    Some(expr) => {
                        let actual = self.expr_type(ctx, scope, expr);
                        if !data_type.accepts(actual) {
                            self.diags.report(
                                ErrorKind::TypeMismatch,
                                format!(
                                    "Variable '{}' of type '{}' cannot take a '{}' value.",
                                    name, data_type, actual
                                ),
                                *pos,
                            );
                        }
                        self.translate(ctx, scope, expr, out)
                    }
                    None => BlockValue::from(data_type.default_literal()),
                };
                let slot = self.arena.register(scope, name, *data_type, false, 1, false);
                self.declare_storage(&slot);
                emit_value_init(&slot, init, &mut out.blocks);
            }
            Statement::ArrayDecl {
                pos,
                name,
                data_type,
                bound,
                values,
            } => {
                if self.arena.find_local(scope, name).is_some() {
                    self.diags.report(
                        ErrorKind::DuplicateDeclaration,
                        format!("A value named '{}' is already declared here.", name),
                        *pos,
                    );
                    out.flush(mark);
                    return;
                }
                let mut inits = Vec::with_capacity(values.len());
                for value in values {
                    let actual = self.expr_type(ctx, scope, value);
                    if !data_type.accepts(actual) {
                        self.diags.report(
                            ErrorKind::TypeMismatch,
                            format!(
                                "Array '{}' of type '{}' cannot take a '{}' value.",
                                name, data_type, actual
                            ),
                            value.pos(),
                        );
                    }
                    inits.push(self.translate(ctx, scope, value, out));
                }
                let space = (*bound).max(inits.len()).max(1);
                // A bound past the initializers fills with empty text,
                // so the array always owns its full slot run.
                while inits.len() < space {
                    inits.push(text(""));
                }
                let slot = self
                    .arena
                    .register(scope, name, *data_type, true, space, false);
                self.declare_storage(&slot);
                match &slot.storage {
                    Some(storage) => {
                        out.push(Block::new(
                            "deleteLine:ofList:",
                            vec![text("all"), text(storage)],
                        ));
                        for init in inits {
                            out.push(Block::new("append:toList:", vec![init, text(storage)]));
                        }
                    }
                    None => {
                        for init in inits {
                            out.push(Block::new("append:toList:", vec![init, text(STACK_LIST)]));
                        }
                    }
                }
            }
            Statement::Assign {
                pos,
                name,
                op,
                value,
            } => self.lower_assign(ctx, scope, *pos, name, *op, value, out),
            Statement::ArrayAssign {
                pos,
                name,
                index,
                op,
                value,
            } => self.lower_array_assign(ctx, scope, *pos, name, index, *op, value, out),
            Statement::ArrayReAssign { pos, name, values } => {
                self.lower_array_reassign(ctx, scope, *pos, name, values, out)
            }
            Statement::If {
                branches,
                else_body,
                ..
            } => {
                let conditions: Vec<BlockValue> = branches
                    .iter()
                    .map(|(condition, _)| self.translate_condition(ctx, scope, condition, out))
                    .collect();
                let stacks: Vec<Vec<Block>> = branches
                    .iter()
                    .map(|(_, body)| self.lower_body(ctx, scope, body))
                    .collect();
                let mut tail: Option<Vec<Block>> = else_body
                    .as_ref()
                    .map(|body| self.lower_body(ctx, scope, body));
                for (condition, stack) in conditions.into_iter().zip(stacks).rev() {
                    let block = match tail.take() {
                        Some(else_blocks) => Block::new(
                            "doIfElse",
                            vec![
                                condition,
                                BlockValue::Stack(stack),
                                BlockValue::Stack(else_blocks),
                            ],
                        ),
                        None => Block::new("doIf", vec![condition, BlockValue::Stack(stack)]),
                    };
                    tail = Some(vec![block]);
                }
                if let Some(chain) = tail {
                    out.blocks.extend(chain);
                }
            }
            Statement::Switch {
                subject,
                cases,
                default_body,
                ..
            } => {
                let subject_type = self.expr_type(ctx, scope, subject);
                let value = self.translate(ctx, scope, subject, out);
                let switch_scope = self.arena.child(scope, self.session.label(), false);
                let temp = format!("@switch{}", self.session.temp());
                let slot = self
                    .arena
                    .register(switch_scope, &temp, subject_type, false, 1, false);
                self.declare_storage(&slot);
                emit_value_init(&slot, value, &mut out.blocks);
                let read = self.slot_read(ctx, &slot);

                let conditions: Vec<BlockValue> = cases
                    .iter()
                    .map(|case| {
                        let labels = case
                            .labels
                            .iter()
                            .map(|label| {
                                BlockValue::reporter(Block::new(
                                    "=",
                                    vec![read.clone(), BlockValue::from(label)],
                                ))
                            })
                            .collect();
                        balanced("|", labels)
                    })
                    .collect();
                let stacks: Vec<Vec<Block>> = cases
                    .iter()
                    .map(|case| self.lower_body(ctx, switch_scope, &case.body))
                    .collect();
                let mut tail: Option<Vec<Block>> = default_body
                    .as_ref()
                    .map(|body| self.lower_body(ctx, switch_scope, body));
                for (condition, stack) in conditions.into_iter().zip(stacks).rev() {
                    let block = match tail.take() {
                        Some(else_blocks) => Block::new(
                            "doIfElse",
                            vec![
                                condition,
                                BlockValue::Stack(stack),
                                BlockValue::Stack(else_blocks),
                            ],
                        ),
                        None => Block::new("doIf", vec![condition, BlockValue::Stack(stack)]),
                    };
                    tail = Some(vec![block]);
                }
                if let Some(chain) = tail {
                    out.blocks.extend(chain);
                }
                emit_pops(self.arena.scope_space(switch_scope), &mut out.blocks);
            }
            Statement::Repeat {
                count,
                body,
                inline,
                ..
            } => {
                if *inline {
                    if let Some(times) = literal_count(count) {
                        if times <= self.options.inline_repeat_cap {
                            for _ in 0..times {
                                let unrolled = self.lower_body(ctx, scope, body);
                                out.blocks.extend(unrolled);
                            }
                            out.flush(mark);
                            return;
                        }
                    }
                }
                let times = self.translate_number(ctx, scope, count, out);
                let stack = self.lower_body(ctx, scope, body);
                out.push(Block::new(
                    "doRepeat",
                    vec![times, BlockValue::Stack(stack)],
                ));
            }
            Statement::While {
                pos,
                condition,
                body,
            } => {
                self.check_loop_condition(*pos, condition);
                let test = self.translate_condition(ctx, scope, condition, out);
                let stack = self.lower_body(ctx, scope, body);
                out.push(Block::new("doWhile", vec![test, BlockValue::Stack(stack)]));
            }
            Statement::Until {
                pos,
                condition,
                body,
            } => {
                self.check_loop_condition(*pos, condition);
                let test = self.translate_condition(ctx, scope, condition, out);
                let stack = self.lower_body(ctx, scope, body);
                out.push(Block::new("doUntil", vec![test, BlockValue::Stack(stack)]));
            }
            Statement::For {
                pos,
                variable,
                data_type,
                count,
                body,
            } => {
                if !data_type.accepts(DataType::Number) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Loop counter '{}' must be a 'num', not a '{}'.",
                            variable, data_type
                        ),
                        *pos,
                    );
                }
                let times = self.translate_number(ctx, scope, count, out);
                let loop_scope = self.arena.child(scope, self.session.label(), false);
                // The target's for block drives a named variable, so
                // the counter always spills off the stack.
                let slot = self
                    .arena
                    .register(loop_scope, variable, *data_type, false, 1, true);
                self.declare_storage(&slot);
                let storage = match &slot.storage {
                    Some(name) => name.clone(),
                    None => unreachable!("forced-unsafe values store off stack"),
                };
                let stack = self.lower_statements_in(ctx, loop_scope, body);
                out.push(Block::new(
                    "doForLoop",
                    vec![text(&storage), times, BlockValue::Stack(stack)],
                ));
            }
            Statement::Foreach {
                pos,
                variable,
                data_type,
                source,
                body,
            } => {
                self.lower_foreach(ctx, scope, *pos, variable, *data_type, source, body, out)
            }
            Statement::Forever { body, .. } => {
                let stack = self.lower_body(ctx, scope, body);
                out.push(Block::new("doForever", vec![BlockValue::Stack(stack)]));
            }
            Statement::Return { pos, value } => {
                if !ctx.inline.is_empty() {
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        "A return inside an inline method must be its last statement.",
                        *pos,
                    );
                    out.flush(mark);
                    return;
                }
                match (value, ctx.return_type) {
                    (Some(expr), Some(expected)) => {
                        let actual = self.expr_type(ctx, scope, expr);
                        if !expected.accepts(actual) {
                            self.diags.report(
                                ErrorKind::TypeMismatch,
                                format!(
                                    "This method returns a '{}', found a '{}'.",
                                    expected, actual
                                ),
                                *pos,
                            );
                        }
                        let result = self.translate(ctx, scope, expr, out);
                        out.push(Block::new("setVar:to:", vec![text(RETURN_VAR), result]));
                    }
                    (Some(_), None) => {
                        self.diags.report(
                            ErrorKind::ImproperUsage,
                            if ctx.is_handler {
                                "An event handler cannot return a value."
                            } else {
                                "A void method cannot return a value."
                            },
                            *pos,
                        );
                    }
                    (None, Some(_)) => {
                        self.diags.report(
                            ErrorKind::ImproperUsage,
                            "A value-returning method cannot return without a value.",
                            *pos,
                        );
                    }
                    (None, None) => {}
                }
                emit_pops(self.arena.chain_space(scope), &mut out.blocks);
                out.push(Block::new("stopScripts", vec![text("this script")]));
            }
            Statement::Call { pos, method, args } => {
                self.lower_call_statement(ctx, scope, *pos, method, args, out)
            }
            Statement::Scope { body, .. } => {
                let blocks = self.lower_body(ctx, scope, body);
                out.blocks.extend(blocks);
            }
        }
        out.flush(mark);
    }

    fn lower_assign(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        name: &str,
        op: AssignOp,
        value: &'a Option<Expression>,
        out: &mut BlockChannels,
    ) {
        let resolved = match self.resolve(ctx, scope, name) {
            Some(resolved) => resolved,
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("'{}' is not defined.", name),
                    pos,
                );
                return;
            }
        };
        match resolved {
            Resolved::Constant(..) => {
                self.diags.report(
                    ErrorKind::ValueIsReadonly,
                    format!("Constant '{}' cannot be assigned.", name),
                    pos,
                );
            }
            Resolved::Param { .. } => {
                self.diags.report(
                    ErrorKind::ValueIsReadonly,
                    format!("Parameter '{}' cannot be assigned.", name),
                    pos,
                );
            }
            Resolved::RuntimeList { .. } => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("List '{}' needs an index or a braced re-assignment.", name),
                    pos,
                );
            }
            Resolved::Variable {
                name: var_name,
                data_type,
            } => {
                self.check_assign_types(ctx, scope, pos, name, data_type, op, value);
                let operand = self.assign_operand(ctx, scope, op, value, out);
                out.push(variable_assign(&var_name, op, operand));
            }
            Resolved::Slot(slot) => {
                if slot.is_array {
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        format!("Array '{}' needs an index or a braced re-assignment.", name),
                        pos,
                    );
                    return;
                }
                self.check_assign_types(ctx, scope, pos, name, slot.data_type, op, value);
                if let Some(storage) = &slot.storage {
                    // Off-stack scalars are plain variables and take
                    // the same native shortcuts as globals.
                    let operand = self.assign_operand(ctx, scope, op, value, out);
                    out.push(variable_assign(storage, op, operand));
                    return;
                }
                let operand = self.assign_operand(ctx, scope, op, value, out);
                let read = self.slot_read(ctx, &slot);
                let replacement = match op {
                    AssignOp::Assign => operand,
                    AssignOp::Add => {
                        BlockValue::reporter(Block::new("+", vec![read, operand]))
                    }
                    AssignOp::Sub => {
                        BlockValue::reporter(Block::new("-", vec![read, operand]))
                    }
                    AssignOp::Inc => BlockValue::reporter(Block::new(
                        "+",
                        vec![read, BlockValue::Number(1.0)],
                    )),
                    AssignOp::Dec => BlockValue::reporter(Block::new(
                        "-",
                        vec![read, BlockValue::Number(1.0)],
                    )),
                    AssignOp::Concat => BlockValue::reporter(Block::new(
                        "concatenate:with:",
                        vec![read, operand],
                    )),
                };
                out.push(self.slot_write(ctx, &slot, replacement));
            }
        }
    }

    /// Reports when an augmented assignment does not fit the target's
    /// declared type. Plain assignment checks the value instead.
    fn check_assign_types(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        name: &str,
        declared: DataType,
        op: AssignOp,
        value: &'a Option<Expression>,
    ) {
        match op {
            AssignOp::Assign => {
                if let Some(expr) = value {
                    let actual = self.expr_type(ctx, scope, expr);
                    if !declared.accepts(actual) {
                        self.diags.report(
                            ErrorKind::TypeMismatch,
                            format!(
                                "Variable '{}' of type '{}' cannot take a '{}' value.",
                                name, declared, actual
                            ),
                            pos,
                        );
                    }
                }
            }
            AssignOp::Add | AssignOp::Sub | AssignOp::Inc | AssignOp::Dec => {
                if !declared.accepts(DataType::Number) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Variable '{}' of type '{}' cannot change by a number.",
                            name, declared
                        ),
                        pos,
                    );
                }
                if let Some(expr) = value {
                    let actual = self.expr_type(ctx, scope, expr);
                    if actual != DataType::Number && actual != DataType::Object {
                        self.diags.report(
                            ErrorKind::TypeMismatch,
                            format!("This operator needs a 'num' value, found '{}'.", actual),
                            pos,
                        );
                    }
                }
            }
            AssignOp::Concat => {
                if !declared.accepts(DataType::String) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "Variable '{}' of type '{}' cannot take joined text.",
                            name, declared
                        ),
                        pos,
                    );
                }
            }
        }
    }

    fn assign_operand(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        op: AssignOp,
        value: &'a Option<Expression>,
        out: &mut BlockChannels,
    ) -> BlockValue {
        match (op, value) {
            (AssignOp::Inc, _) | (AssignOp::Dec, _) => BlockValue::Number(1.0),
            (_, Some(expr)) => self.translate(ctx, scope, expr, out),
            (_, None) => BlockValue::Number(0.0),
        }
    }

    fn lower_array_assign(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        name: &str,
        index: &'a Expression,
        op: AssignOp,
        value: &'a Option<Expression>,
        out: &mut BlockChannels,
    ) {
        let resolved = match self.resolve(ctx, scope, name) {
            Some(resolved) => resolved,
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("'{}' is not defined.", name),
                    pos,
                );
                return;
            }
        };
        let index_value = self.translate_number(ctx, scope, index, out);
        let operand = self.assign_operand(ctx, scope, op, value, out);
        match resolved {
            Resolved::RuntimeList {
                name: list_name,
                data_type,
            } => {
                self.check_assign_types(ctx, scope, pos, name, data_type, op, value);
                let read = BlockValue::reporter(Block::new(
                    "getLine:ofList:",
                    vec![index_value.clone(), text(&list_name)],
                ));
                let replacement = element_replacement(op, read, operand);
                out.push(Block::new(
                    "setLine:ofList:to:",
                    vec![index_value, text(&list_name), replacement],
                ));
            }
            Resolved::Slot(slot) if slot.is_array => {
                self.check_assign_types(ctx, scope, pos, name, slot.data_type, op, value);
                match &slot.storage {
                    Some(storage) => {
                        let read = BlockValue::reporter(Block::new(
                            "getLine:ofList:",
                            vec![index_value.clone(), text(storage)],
                        ));
                        let replacement = element_replacement(op, read, operand);
                        out.push(Block::new(
                            "setLine:ofList:to:",
                            vec![index_value, text(storage), replacement],
                        ));
                    }
                    None => {
                        let position = self.element_index(ctx, slot.stack_start, index_value);
                        let read = BlockValue::reporter(Block::new(
                            "getLine:ofList:",
                            vec![position.clone(), text(STACK_LIST)],
                        ));
                        let replacement = element_replacement(op, read, operand);
                        out.push(Block::new(
                            "setLine:ofList:to:",
                            vec![position, text(STACK_LIST), replacement],
                        ));
                    }
                }
            }
            _ => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' is not an array.", name),
                    pos,
                );
            }
        }
    }

    fn lower_array_reassign(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        name: &str,
        values: &'a [Expression],
        out: &mut BlockChannels,
    ) {
        let resolved = match self.resolve(ctx, scope, name) {
            Some(resolved) => resolved,
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("'{}' is not defined.", name),
                    pos,
                );
                return;
            }
        };
        match resolved {
            Resolved::RuntimeList {
                name: list_name,
                data_type,
            } => {
                let items = self.translate_elements(ctx, scope, data_type, values, out);
                out.push(Block::new(
                    "deleteLine:ofList:",
                    vec![text("all"), text(&list_name)],
                ));
                for item in items {
                    out.push(Block::new("append:toList:", vec![item, text(&list_name)]));
                }
            }
            Resolved::Slot(slot) if slot.is_array => {
                if values.len() != slot.stack_space {
                    self.diags.report(
                        ErrorKind::InvalidArgument,
                        format!(
                            "Array '{}' holds {} values but gets {}.",
                            name,
                            slot.stack_space,
                            values.len()
                        ),
                        pos,
                    );
                    return;
                }
                let items = self.translate_elements(ctx, scope, slot.data_type, values, out);
                match &slot.storage {
                    Some(storage) => {
                        out.push(Block::new(
                            "deleteLine:ofList:",
                            vec![text("all"), text(storage)],
                        ));
                        for item in items {
                            out.push(Block::new("append:toList:", vec![item, text(storage)]));
                        }
                    }
                    None => {
                        // The frame already owns the slots, so replace
                        // in place instead of popping and pushing.
                        for (offset, item) in items.into_iter().enumerate() {
                            let position = self.element_index(
                                ctx,
                                slot.stack_start,
                                BlockValue::Number(offset as f64 + 1.0),
                            );
                            out.push(Block::new(
                                "setLine:ofList:to:",
                                vec![position, text(STACK_LIST), item],
                            ));
                        }
                    }
                }
            }
            _ => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' is not an array.", name),
                    pos,
                );
            }
        }
    }

    fn translate_elements(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        element_type: DataType,
        values: &'a [Expression],
        out: &mut BlockChannels,
    ) -> Vec<BlockValue> {
        values
            .iter()
            .map(|value| {
                let actual = self.expr_type(ctx, scope, value);
                if !element_type.accepts(actual) {
                    self.diags.report(
                        ErrorKind::TypeMismatch,
                        format!(
                            "A '{}' element cannot take a '{}' value.",
                            element_type, actual
                        ),
                        value.pos(),
                    );
                }
                self.translate(ctx, scope, value, out)
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn lower_foreach(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        variable: &str,
        data_type: DataType,
        source: &str,
        body: &'a [Statement],
        out: &mut BlockChannels,
    ) {
        let (list_name, element_type, literal_count) = match self.resolve(ctx, scope, source) {
            Some(Resolved::RuntimeList { name, data_type }) => (Some(name), data_type, None),
            Some(Resolved::Slot(slot)) if slot.is_array => match &slot.storage {
                Some(storage) => (Some(storage.clone()), slot.data_type, None),
                None => (None, slot.data_type, Some(slot)),
            },
            Some(_) => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' is not a list or array.", source),
                    pos,
                );
                return;
            }
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("'{}' is not defined.", source),
                    pos,
                );
                return;
            }
        };
        if !data_type.accepts(element_type) {
            self.diags.report(
                ErrorKind::TypeMismatch,
                format!(
                    "Loop variable '{}' of type '{}' cannot take '{}' elements.",
                    variable, data_type, element_type
                ),
                pos,
            );
        }

        let loop_scope = self.arena.child(scope, self.session.label(), false);
        let counter = self
            .arena
            .register(loop_scope, "@idx", DataType::Number, false, 1, true);
        self.declare_storage(&counter);
        let counter_storage = match &counter.storage {
            Some(name) => name.clone(),
            None => unreachable!("forced-unsafe values store off stack"),
        };
        let var_slot = self
            .arena
            .register(loop_scope, variable, data_type, false, 1, false);
        self.declare_storage(&var_slot);
        emit_value_init(
            &var_slot,
            BlockValue::from(data_type.default_literal()),
            &mut out.blocks,
        );

        let counter_read =
            BlockValue::reporter(Block::new("readVariable", vec![text(&counter_storage)]));
        let (count, fetch) = match (&list_name, &literal_count) {
            (Some(list), _) => (
                BlockValue::reporter(Block::new("lineCountOfList:", vec![text(list)])),
                BlockValue::reporter(Block::new(
                    "getLine:ofList:",
                    vec![counter_read, text(list)],
                )),
            ),
            (None, Some(array)) => {
                let position = self.element_index(ctx, array.stack_start, counter_read);
                (
                    BlockValue::Number(array.stack_space as f64),
                    BlockValue::reporter(Block::new(
                        "getLine:ofList:",
                        vec![position, text(STACK_LIST)],
                    )),
                )
            }
            (None, None) => unreachable!("foreach source is a list or an array"),
        };

        let mut stack = vec![self.slot_write(ctx, &var_slot, fetch)];
        stack.extend(self.lower_body(ctx, loop_scope, body));
        out.push(Block::new(
            "doForLoop",
            vec![text(&counter_storage), count, BlockValue::Stack(stack)],
        ));
        emit_pops(self.arena.scope_space(loop_scope), &mut out.blocks);
    }

    /// Value calls ride the before channel, which a loop evaluates
    /// only once, so conditions re-tested per iteration reject them.
    fn check_loop_condition(&mut self, pos: Position, condition: &Expression) {
        if self.expr_calls_user_method(condition) {
            self.diags.report(
                ErrorKind::ImproperUsage,
                "A method call in a loop condition only runs once; store its result in a variable instead.",
                pos,
            );
        }
    }

    fn expr_calls_user_method(&self, expr: &Expression) -> bool {
        match expr {
            Expression::Call { method, args, .. } => {
                self.find_user_method(method).is_some()
                    || args.iter().any(|arg| self.expr_calls_user_method(arg))
            }
            Expression::Unary { operand, .. } => self.expr_calls_user_method(operand),
            Expression::Compound { left, right, .. } => {
                self.expr_calls_user_method(left) || self.expr_calls_user_method(right)
            }
            Expression::ArrayLookup { index, .. } => self.expr_calls_user_method(index),
            _ => false,
        }
    }

    fn lower_call_statement(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        method: &str,
        args: &'a [Expression],
        out: &mut BlockChannels,
    ) {
        if let Some(user) = self.find_user_method(method) {
            if !self.check_user_arity(pos, user, args.len()) {
                return;
            }
            if user.is_inline {
                self.expand_inline(ctx, scope, pos, user, args, false, out);
            } else {
                let call = self.build_user_call(ctx, scope, user, args, out);
                out.push(call);
            }
            return;
        }
        if let Some(builtin) = builtins::find_standard(method) {
            if builtin.is_reporter {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' reports a value and cannot stand alone.", builtin.name),
                    pos,
                );
                return;
            }
            if let Some(call) = self.build_builtin_call(ctx, scope, pos, builtin, args, out) {
                out.push(call);
            }
            return;
        }
        if let Some(math) = builtins::find_math(method) {
            self.diags.report(
                ErrorKind::ImproperUsage,
                format!("'{}' computes a value and cannot stand alone.", math.name),
                pos,
            );
            return;
        }
        if let Some(menu) = builtins::stop_variant(method) {
            if !args.is_empty() {
                self.diags.report(
                    ErrorKind::InvalidArgument,
                    format!("'{}' takes no arguments.", method),
                    pos,
                );
            }
            if menu == "this script" {
                emit_pops(self.arena.chain_space(scope), &mut out.blocks);
            }
            out.push(Block::new("stopScripts", vec![text(menu)]));
            return;
        }
        if let Some(op) = builtins::find_list_op(method) {
            if op.is_reporter {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' reports a value and cannot stand alone.", op.name),
                    pos,
                );
                return;
            }
            if let Some(ListLowered::Command(block)) = self.build_list_op(ctx, scope, pos, op, args, out)
            {
                out.push(block);
            }
            return;
        }
        self.diags.report(
            ErrorKind::NotDefined,
            format!("Method '{}' is not defined.", method),
            pos,
        );
    }

    fn find_user_method(&self, name: &str) -> Option<&'a Method> {
        self.sprite
            .members
            .methods
            .iter()
            .find(|m| names::eq(&m.name, name))
    }

    fn check_user_arity(&mut self, pos: Position, method: &Method, supplied: usize) -> bool {
        let required = method.required_params();
        let total = method.params.len();
        if supplied >= required && supplied <= total {
            return true;
        }
        let expected = if required == total {
            format!("{}", total)
        } else {
            format!("{} to {}", required, total)
        };
        self.diags.report(
            ErrorKind::InvalidArgument,
            format!(
                "Method '{}' takes {} arguments, got {}.",
                method.name, expected, supplied
            ),
            pos,
        );
        false
    }

    /// Builds the call block for a non-inline user method: explicit
    /// arguments, defaults for trailing optionals, then the hidden
    /// stack name and live base offset.
    fn build_user_call(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        method: &'a Method,
        args: &'a [Expression],
        out: &mut BlockChannels,
    ) -> Block {
        let mut call_args = Vec::with_capacity(method.params.len() + 3);
        call_args.push(text(&proccode(method)));
        for (param, arg) in method.params.iter().zip(args) {
            let actual = self.expr_type(ctx, scope, arg);
            if !param.data_type.accepts(actual) {
                self.diags.report(
                    ErrorKind::TypeMismatch,
                    format!(
                        "Argument '{}' of '{}' wants a '{}' value, found '{}'.",
                        param.name, method.name, param.data_type, actual
                    ),
                    arg.pos(),
                );
            }
            call_args.push(self.translate(ctx, scope, arg, out));
        }
        for param in method.params.iter().skip(args.len()) {
            match &param.default {
                Some(default) => call_args.push(BlockValue::from(default)),
                None => call_args.push(text("")),
            }
        }
        call_args.push(text(STACK_LIST));
        call_args.push(BlockValue::reporter(Block::new(
            "lineCountOfList:",
            vec![text(STACK_LIST)],
        )));
        Block::new("call", call_args)
    }

    fn build_builtin_call(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        builtin: &'static builtins::BuiltinMethod,
        args: &'a [Expression],
        out: &mut BlockChannels,
    ) -> Option<Block> {
        if args.len() != builtin.inputs.len() {
            let inputs = builtin
                .inputs
                .iter()
                .map(|(name, _)| *name)
                .collect::<Vec<_>>()
                .join(", ");
            self.diags.report(
                ErrorKind::InvalidArgument,
                format!(
                    "'{}' expects {} inputs ({}), got {}.",
                    builtin.name,
                    builtin.inputs.len(),
                    inputs,
                    args.len()
                ),
                pos,
            );
            return None;
        }
        let mut values = Vec::with_capacity(args.len());
        for ((input, expected), arg) in builtin.inputs.iter().zip(args) {
            let actual = self.expr_type(ctx, scope, arg);
            if !expected.accepts(actual) {
                self.diags.report(
                    ErrorKind::TypeMismatch,
                    format!(
                        "Input '{}' of '{}' wants a '{}' value, found '{}'.",
                        input, builtin.name, expected, actual
                    ),
                    arg.pos(),
                );
            }
            values.push(self.translate(ctx, scope, arg, out));
        }
        Some(Block::new(builtin.opcode, values))
    }

    fn build_list_op(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        op: &'static builtins::ListOp,
        args: &'a [Expression],
        out: &mut BlockChannels,
    ) -> Option<ListLowered> {
        if args.len() != op.extra_args + 1 {
            self.diags.report(
                ErrorKind::InvalidArgument,
                format!(
                    "'{}' expects {} arguments, got {}.",
                    op.name,
                    op.extra_args + 1,
                    args.len()
                ),
                pos,
            );
            return None;
        }
        let source = match &args[0] {
            Expression::Lookup { name, .. } => name.clone(),
            other => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("The first argument of '{}' must name a list.", op.name),
                    other.pos(),
                );
                return None;
            }
        };
        let (list_name, element_type) = match self.resolve(ctx, scope, &source) {
            Some(Resolved::RuntimeList { name, data_type }) => (name, data_type),
            Some(Resolved::Slot(slot)) if slot.is_array => match slot.storage {
                Some(storage) => (storage, slot.data_type),
                None => {
                    if op.kind == ListOpKind::Count {
                        // The bound is static, so the count folds away.
                        return Some(ListLowered::Report(BlockValue::Number(
                            slot.stack_space as f64,
                        )));
                    }
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        format!(
                            "Array '{}' lives on the stack; only Count works there.",
                            source
                        ),
                        pos,
                    );
                    return None;
                }
            },
            Some(_) => {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' is not a list.", source),
                    pos,
                );
                return None;
            }
            None => {
                self.diags.report(
                    ErrorKind::NotDefined,
                    format!("'{}' is not defined.", source),
                    pos,
                );
                return None;
            }
        };

        let check_element = |lowering: &mut Self, ctx: &mut ScriptContext<'a>, arg: &'a Expression| {
            let actual = lowering.expr_type(ctx, scope, arg);
            if !element_type.accepts(actual) {
                lowering.diags.report(
                    ErrorKind::TypeMismatch,
                    format!(
                        "A '{}' element cannot take a '{}' value.",
                        element_type, actual
                    ),
                    arg.pos(),
                );
            }
        };
        match op.kind {
            ListOpKind::Push => {
                check_element(self, ctx, &args[1]);
                let value = self.translate(ctx, scope, &args[1], out);
                Some(ListLowered::Command(Block::new(
                    "append:toList:",
                    vec![value, text(&list_name)],
                )))
            }
            ListOpKind::Insert => {
                check_element(self, ctx, &args[1]);
                let value = self.translate(ctx, scope, &args[1], out);
                let index = self.translate_number(ctx, scope, &args[2], out);
                Some(ListLowered::Command(Block::new(
                    "insert:at:ofList:",
                    vec![value, index, text(&list_name)],
                )))
            }
            ListOpKind::DeleteAt => {
                let index = self.translate_number(ctx, scope, &args[1], out);
                Some(ListLowered::Command(Block::new(
                    "deleteLine:ofList:",
                    vec![index, text(&list_name)],
                )))
            }
            ListOpKind::DeleteAll => Some(ListLowered::Command(Block::new(
                "deleteLine:ofList:",
                vec![text("all"), text(&list_name)],
            ))),
            ListOpKind::Count => Some(ListLowered::Report(BlockValue::reporter(Block::new(
                "lineCountOfList:",
                vec![text(&list_name)],
            )))),
            ListOpKind::Contains => {
                check_element(self, ctx, &args[1]);
                let value = self.translate(ctx, scope, &args[1], out);
                Some(ListLowered::Report(BlockValue::reporter(Block::new(
                    "list:contains:",
                    vec![text(&list_name), value],
                ))))
            }
        }
    }

    /// Inline methods never become scripts; the body is spliced into
    /// the caller with the parameters as initialized slots.
    fn expand_inline(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        method: &'a Method,
        args: &'a [Expression],
        want_value: bool,
        out: &mut BlockChannels,
    ) -> Option<BlockValue> {
        if ctx.inline.iter().any(|name| names::eq(name, &method.name)) {
            self.diags.report(
                ErrorKind::InvalidArgument,
                format!("Inline method '{}' cannot call itself.", method.name),
                pos,
            );
            return want_value.then(|| text(""));
        }
        if want_value && !method.has_return {
            self.diags.report(
                ErrorKind::ImproperUsage,
                format!("Method '{}' does not return a value.", method.name),
                pos,
            );
            return Some(text(""));
        }

        let mut values = Vec::with_capacity(method.params.len());
        for (param, arg) in method.params.iter().zip(args) {
            let actual = self.expr_type(ctx, scope, arg);
            if !param.data_type.accepts(actual) {
                self.diags.report(
                    ErrorKind::TypeMismatch,
                    format!(
                        "Argument '{}' of '{}' wants a '{}' value, found '{}'.",
                        param.name, method.name, param.data_type, actual
                    ),
                    arg.pos(),
                );
            }
            values.push(self.translate(ctx, scope, arg, out));
        }
        for param in method.params.iter().skip(args.len()) {
            let default = param
                .default
                .clone()
                .unwrap_or_else(|| param.data_type.default_literal());
            values.push(BlockValue::from(default));
        }

        let inline_scope = self.arena.child(scope, self.session.label(), method.is_unsafe);
        let mut inner = BlockChannels::default();
        for (param, value) in method.params.iter().zip(values) {
            let slot = self
                .arena
                .register(inline_scope, &param.name, param.data_type, false, 1, false);
            self.declare_storage(&slot);
            emit_value_init(&slot, value, &mut inner.blocks);
        }

        ctx.inline.push(method.name.clone());
        let saved_params = std::mem::replace(&mut ctx.params, &[]);
        let (body, trailing) = match method.body.split_last() {
            Some((Statement::Return { pos, value }, rest)) => (rest, Some((*pos, value))),
            _ => (method.body.as_slice(), None),
        };
        for statement in body {
            self.lower_statement(ctx, inline_scope, statement, &mut inner);
        }
        if let Some((return_pos, return_value)) = trailing {
            match (return_value, method.has_return) {
                (Some(expr), true) => {
                    let mark = inner.mark();
                    let result = self.translate(ctx, inline_scope, expr, &mut inner);
                    inner.push(Block::new("setVar:to:", vec![text(RETURN_VAR), result]));
                    inner.flush(mark);
                }
                (Some(_), false) => {
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        "A void method cannot return a value.",
                        return_pos,
                    );
                }
                (None, true) => {
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        "A value-returning method cannot return without a value.",
                        return_pos,
                    );
                }
                (None, false) => {}
            }
        } else if want_value {
            self.diags.report(
                ErrorKind::ImproperUsage,
                format!(
                    "Inline method '{}' must end with a return to be used as a value.",
                    method.name
                ),
                pos,
            );
        }
        emit_pops(self.arena.scope_space(inline_scope), &mut inner.blocks);
        ctx.params = saved_params;
        ctx.inline.pop();

        let result = if want_value {
            let slot = self.capture_return(scope, method.return_type, &mut inner.blocks);
            Some(self.slot_read(ctx, &slot))
        } else {
            None
        };
        if want_value {
            out.before.extend(inner.blocks);
        } else {
            out.blocks.extend(inner.blocks);
        }
        result
    }

    /// Declares a fresh compiler slot in the caller's scope and fills
    /// it from the shared return variable.
    fn capture_return(
        &mut self,
        scope: ScopeId,
        return_type: DataType,
        blocks: &mut Vec<Block>,
    ) -> StackSlot {
        let temp = format!("@ret{}", self.session.temp());
        let slot = self.arena.register(scope, &temp, return_type, false, 1, false);
        self.declare_storage(&slot);
        let value = BlockValue::reporter(Block::new("readVariable", vec![text(RETURN_VAR)]));
        emit_value_init(&slot, value, blocks);
        slot
    }

    fn translate_condition(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        expr: &'a Expression,
        out: &mut BlockChannels,
    ) -> BlockValue {
        let actual = self.expr_type(ctx, scope, expr);
        if actual != DataType::Boolean && actual != DataType::Object {
            self.diags.report(
                ErrorKind::TypeMismatch,
                format!("A condition must be a 'bool', found '{}'.", actual),
                expr.pos(),
            );
        }
        self.translate(ctx, scope, expr, out)
    }

    fn translate_number(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        expr: &'a Expression,
        out: &mut BlockChannels,
    ) -> BlockValue {
        let actual = self.expr_type(ctx, scope, expr);
        if actual != DataType::Number && actual != DataType::Object {
            self.diags.report(
                ErrorKind::TypeMismatch,
                format!("This value must be a 'num', found '{}'.", actual),
                expr.pos(),
            );
        }
        self.translate(ctx, scope, expr, out)
    }

    fn translate(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        expr: &'a Expression,
        out: &mut BlockChannels,
    ) -> BlockValue {
        match expr {
            Expression::Terminal { value, .. } => BlockValue::from(value),
            Expression::Lookup { pos, name } => match self.resolve(ctx, scope, name) {
                Some(Resolved::Constant(literal, _)) => BlockValue::from(literal),
                Some(Resolved::Variable { name, .. }) => {
                    BlockValue::reporter(Block::new("readVariable", vec![text(&name)]))
                }
                Some(Resolved::RuntimeList { name, .. }) => {
                    BlockValue::reporter(Block::new("contentsOfList:", vec![text(&name)]))
                }
                Some(Resolved::Param { name, .. }) => {
                    BlockValue::reporter(Block::new("getParam", vec![text(&name), text("r")]))
                }
                Some(Resolved::Slot(slot)) => {
                    if slot.is_array {
                        match &slot.storage {
                            Some(storage) => BlockValue::reporter(Block::new(
                                "contentsOfList:",
                                vec![text(storage)],
                            )),
                            None => {
                                self.diags.report(
                                    ErrorKind::ImproperUsage,
                                    format!("Array '{}' cannot be read whole; index it.", name),
                                    *pos,
                                );
                                text("")
                            }
                        }
                    } else {
                        self.slot_read(ctx, &slot)
                    }
                }
                None => {
                    self.diags.report(
                        ErrorKind::NotDefined,
                        format!("'{}' is not defined.", name),
                        *pos,
                    );
                    text("")
                }
            },
            Expression::ArrayLookup { pos, name, index } => {
                let index_value = self.translate_number(ctx, scope, index, out);
                match self.resolve(ctx, scope, name) {
                    Some(Resolved::RuntimeList { name, .. }) => BlockValue::reporter(Block::new(
                        "getLine:ofList:",
                        vec![index_value, text(&name)],
                    )),
                    Some(Resolved::Slot(slot)) if slot.is_array => match &slot.storage {
                        Some(storage) => BlockValue::reporter(Block::new(
                            "getLine:ofList:",
                            vec![index_value, text(storage)],
                        )),
                        None => {
                            let position =
                                self.element_index(ctx, slot.stack_start, index_value);
                            BlockValue::reporter(Block::new(
                                "getLine:ofList:",
                                vec![position, text(STACK_LIST)],
                            ))
                        }
                    },
                    Some(_) => {
                        self.diags.report(
                            ErrorKind::ImproperUsage,
                            format!("'{}' is not an array.", name),
                            *pos,
                        );
                        text("")
                    }
                    None => {
                        self.diags.report(
                            ErrorKind::NotDefined,
                            format!("'{}' is not defined.", name),
                            *pos,
                        );
                        text("")
                    }
                }
            }
            Expression::Unary { pos, op, operand } => match op {
                UnaryOp::Neg => {
                    let actual = self.expr_type(ctx, scope, operand);
                    if actual != DataType::Number && actual != DataType::Object {
                        self.diags.report(
                            ErrorKind::TypeMismatch,
                            format!("'-' needs a 'num' value, found '{}'.", actual),
                            *pos,
                        );
                    }
                    negate(self.translate(ctx, scope, operand, out))
                }
                UnaryOp::Not => {
                    let actual = self.expr_type(ctx, scope, operand);
                    if actual != DataType::Boolean && actual != DataType::Object {
                        self.diags.report(
                            ErrorKind::TypeMismatch,
                            format!("'!' needs a 'bool' value, found '{}'.", actual),
                            *pos,
                        );
                    }
                    let value = self.translate(ctx, scope, operand, out);
                    BlockValue::reporter(Block::new("not", vec![value]))
                }
            },
            Expression::Compound {
                op, left, right, ..
            } => self.translate_binary(ctx, scope, *op, left, right, out),
            Expression::Call { pos, method, args } => {
                self.lower_value_call(ctx, scope, *pos, method, args, out)
            }
            Expression::NameOf { pos, name } => match self.resolve(ctx, scope, name) {
                Some(Resolved::Variable { name, .. })
                | Some(Resolved::RuntimeList { name, .. }) => text(&name),
                Some(Resolved::Slot(slot)) => match &slot.storage {
                    Some(storage) => text(storage),
                    None => {
                        self.diags.report(
                            ErrorKind::ImproperUsage,
                            format!("'{}' lives on the stack and has no runtime name.", name),
                            *pos,
                        );
                        text("")
                    }
                },
                Some(Resolved::Constant(..)) | Some(Resolved::Param { .. }) => {
                    self.diags.report(
                        ErrorKind::ImproperUsage,
                        format!("'{}' has no runtime name.", name),
                        *pos,
                    );
                    text("")
                }
                None => {
                    self.diags.report(
                        ErrorKind::NotDefined,
                        format!("'{}' is not defined.", name),
                        *pos,
                    );
                    text("")
                }
            },
        }
    }

    fn translate_binary(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        op: BinaryOp,
        left: &'a Expression,
        right: &'a Expression,
        out: &mut BlockChannels,
    ) -> BlockValue {
        match op {
            BinaryOp::Neq => {
                let l = self.translate(ctx, scope, left, out);
                let r = self.translate(ctx, scope, right, out);
                BlockValue::reporter(Block::new(
                    "not",
                    vec![BlockValue::reporter(Block::new("=", vec![l, r]))],
                ))
            }
            BinaryOp::LtEq => {
                let l = self.translate(ctx, scope, left, out);
                let r = self.translate(ctx, scope, right, out);
                BlockValue::reporter(Block::new(
                    "|",
                    vec![
                        BlockValue::reporter(Block::new("<", vec![l.clone(), r.clone()])),
                        BlockValue::reporter(Block::new("=", vec![l, r])),
                    ],
                ))
            }
            BinaryOp::GtEq => {
                let l = self.translate(ctx, scope, left, out);
                let r = self.translate(ctx, scope, right, out);
                BlockValue::reporter(Block::new(
                    "|",
                    vec![
                        BlockValue::reporter(Block::new(">", vec![l.clone(), r.clone()])),
                        BlockValue::reporter(Block::new("=", vec![l, r])),
                    ],
                ))
            }
            op if op.is_associative() => {
                let mut leaves = Vec::new();
                flatten(op, left, &mut leaves);
                flatten(op, right, &mut leaves);
                let operand_type = binary_operand_type(op);
                let values = leaves
                    .into_iter()
                    .map(|leaf| {
                        if let Some(expected) = operand_type {
                            let actual = self.expr_type(ctx, scope, leaf);
                            if actual != expected && actual != DataType::Object {
                                self.diags.report(
                                    ErrorKind::TypeMismatch,
                                    format!(
                                        "Operator '{}' needs '{}' operands, found '{}'.",
                                        op_symbol(op),
                                        expected,
                                        actual
                                    ),
                                    leaf.pos(),
                                );
                            }
                        }
                        self.translate(ctx, scope, leaf, out)
                    })
                    .collect();
                balanced(op_symbol(op), values)
            }
            op => {
                if let Some(expected) = binary_operand_type(op) {
                    for side in [left, right] {
                        let actual = self.expr_type(ctx, scope, side);
                        if actual != expected && actual != DataType::Object {
                            self.diags.report(
                                ErrorKind::TypeMismatch,
                                format!(
                                    "Operator '{}' needs '{}' operands, found '{}'.",
                                    op_symbol(op),
                                    expected,
                                    actual
                                ),
                                side.pos(),
                            );
                        }
                    }
                }
                let l = self.translate(ctx, scope, left, out);
                let r = self.translate(ctx, scope, right, out);
                BlockValue::reporter(Block::new(op_symbol(op), vec![l, r]))
            }
        }
    }

    fn lower_value_call(
        &mut self,
        ctx: &mut ScriptContext<'a>,
        scope: ScopeId,
        pos: Position,
        method: &str,
        args: &'a [Expression],
        out: &mut BlockChannels,
    ) -> BlockValue {
        if let Some(user) = self.find_user_method(method) {
            if !self.check_user_arity(pos, user, args.len()) {
                return text("");
            }
            if user.is_inline {
                return self
                    .expand_inline(ctx, scope, pos, user, args, true, out)
                    .unwrap_or_else(|| text(""));
            }
            if !user.has_return {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("Method '{}' does not return a value.", user.name),
                    pos,
                );
                return text("");
            }
            let call = self.build_user_call(ctx, scope, user, args, out);
            out.before.push(call);
            let mut capture = Vec::new();
            let slot = self.capture_return(scope, user.return_type, &mut capture);
            out.before.extend(capture);
            return self.slot_read(ctx, &slot);
        }
        if let Some(builtin) = builtins::find_standard(method) {
            if !builtin.is_reporter {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' does not report a value.", builtin.name),
                    pos,
                );
                return text("");
            }
            return match self.build_builtin_call(ctx, scope, pos, builtin, args, out) {
                Some(block) => BlockValue::reporter(block),
                None => text(""),
            };
        }
        if let Some(math) = builtins::find_math(method) {
            if args.len() != 1 {
                self.diags.report(
                    ErrorKind::InvalidArgument,
                    format!("'{}' expects 1 input, got {}.", math.name, args.len()),
                    pos,
                );
                return text("");
            }
            if let Expression::Terminal {
                value: Literal::Number(n),
                ..
            } = &args[0]
            {
                let folded = (math.fold)(*n);
                if folded.is_finite() {
                    return BlockValue::Number(folded);
                }
            }
            let value = self.translate_number(ctx, scope, &args[0], out);
            return BlockValue::reporter(Block::new(
                "computeFunction:of:",
                vec![text(math.display), value],
            ));
        }
        if builtins::stop_variant(method).is_some() {
            self.diags.report(
                ErrorKind::ImproperUsage,
                format!("'{}' cannot be used as a value.", method),
                pos,
            );
            return text("");
        }
        if let Some(op) = builtins::find_list_op(method) {
            if !op.is_reporter {
                self.diags.report(
                    ErrorKind::ImproperUsage,
                    format!("'{}' does not report a value.", op.name),
                    pos,
                );
                return text("");
            }
            return match self.build_list_op(ctx, scope, pos, op, args, out) {
                Some(ListLowered::Report(value)) => value,
                _ => text(""),
            };
        }
        self.diags.report(
            ErrorKind::NotDefined,
            format!("Method '{}' is not defined.", method),
            pos,
        );
        text("")
    }

    /// Static type of an expression for checks; never reports.
    fn expr_type(&self, ctx: &ScriptContext<'a>, scope: ScopeId, expr: &Expression) -> DataType {
        match expr {
            Expression::Terminal { value, .. } => value.data_type(),
            Expression::Lookup { name, .. } => match self.resolve(ctx, scope, name) {
                Some(Resolved::Constant(_, data_type)) => data_type,
                Some(Resolved::Variable { data_type, .. }) => data_type,
                Some(Resolved::RuntimeList { .. }) => DataType::String,
                Some(Resolved::Param { data_type, .. }) => data_type,
                Some(Resolved::Slot(slot)) => slot.data_type,
                None => DataType::Object,
            },
            Expression::ArrayLookup { name, .. } => match self.resolve(ctx, scope, name) {
                Some(Resolved::RuntimeList { data_type, .. }) => data_type,
                Some(Resolved::Slot(slot)) if slot.is_array => slot.data_type,
                _ => DataType::Object,
            },
            Expression::Unary { op, .. } => match op {
                UnaryOp::Neg => DataType::Number,
                UnaryOp::Not => DataType::Boolean,
            },
            Expression::Compound { op, .. } => match op {
                BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Mod => DataType::Number,
                BinaryOp::Concat => DataType::String,
                _ => DataType::Boolean,
            },
            Expression::Call { method, .. } => {
                if let Some(user) = self.find_user_method(method) {
                    return if user.has_return {
                        user.return_type
                    } else {
                        DataType::Object
                    };
                }
                if let Some(builtin) = builtins::find_standard(method) {
                    return builtin.return_type;
                }
                if builtins::find_math(method).is_some() {
                    return DataType::Number;
                }
                if let Some(op) = builtins::find_list_op(method) {
                    return op.return_type;
                }
                DataType::Object
            }
            Expression::NameOf { .. } => DataType::String,
        }
    }

    /// Fixed search order: the whole project level first, then the
    /// whole sprite level, then the current method's parameters, then
    /// the scope chain.
    fn resolve(&self, ctx: &ScriptContext<'a>, scope: ScopeId, name: &str) -> Option<Resolved> {
        let found = level_find(
            &self.project.constants,
            &self.project.variables,
            &self.project.lists,
            name,
        );
        if found.is_some() {
            return found;
        }
        let members = &self.sprite.members;
        let found = level_find(&members.constants, &members.variables, &members.lists, name);
        if found.is_some() {
            return found;
        }
        if let Some(param) = ctx.params.iter().find(|p| names::eq(&p.name, name)) {
            return Some(Resolved::Param {
                name: param.name.clone(),
                data_type: param.data_type,
            });
        }
        self.arena.find(scope, name).map(Resolved::Slot)
    }

    /// Absolute list position of a scalar slot: handlers run at base
    /// 0, methods offset by the hidden base parameter.
    fn slot_index(&self, ctx: &ScriptContext<'a>, start: usize) -> BlockValue {
        if ctx.is_handler {
            BlockValue::Number(start as f64)
        } else {
            BlockValue::reporter(Block::new(
                "+",
                vec![
                    BlockValue::reporter(Block::new(
                        "getParam",
                        vec![text(BASE_PARAM), text("r")],
                    )),
                    BlockValue::Number(start as f64),
                ],
            ))
        }
    }

    /// Position of a 1-based element inside an array's slot run.
    fn element_index(
        &self,
        ctx: &ScriptContext<'a>,
        start: usize,
        index: BlockValue,
    ) -> BlockValue {
        let relative = match index {
            BlockValue::Number(n) => BlockValue::Number((start - 1) as f64 + n),
            other => BlockValue::reporter(Block::new(
                "+",
                vec![BlockValue::Number((start - 1) as f64), other],
            )),
        };
        if ctx.is_handler {
            relative
        } else {
            BlockValue::reporter(Block::new(
                "+",
                vec![
                    BlockValue::reporter(Block::new(
                        "getParam",
                        vec![text(BASE_PARAM), text("r")],
                    )),
                    relative,
                ],
            ))
        }
    }

    fn slot_read(&self, ctx: &ScriptContext<'a>, slot: &StackSlot) -> BlockValue {
        match &slot.storage {
            Some(storage) => {
                BlockValue::reporter(Block::new("readVariable", vec![text(storage)]))
            }
            None => BlockValue::reporter(Block::new(
                "getLine:ofList:",
                vec![self.slot_index(ctx, slot.stack_start), text(STACK_LIST)],
            )),
        }
    }

    fn slot_write(&self, ctx: &ScriptContext<'a>, slot: &StackSlot, value: BlockValue) -> Block {
        match &slot.storage {
            Some(storage) => Block::new("setVar:to:", vec![text(storage), value]),
            None => Block::new(
                "setLine:ofList:to:",
                vec![
                    self.slot_index(ctx, slot.stack_start),
                    text(STACK_LIST),
                    value,
                ],
            ),
        }
    }

    /// Registers the runtime object backing an off-stack value on the
    /// sprite. Safe values need none.
    fn declare_storage(&mut self, slot: &StackSlot) {
        if let Some(storage) = &slot.storage {
            if slot.is_array {
                self.target.lists.push(sb2::List {
                    name: storage.clone(),
                    contents: Vec::new(),
                });
            } else {
                self.target.variables.push(Variable {
                    name: storage.clone(),
                    value: slot.data_type.default_literal(),
                });
            }
        }
    }
}

/// One declaration level, searched whole before the next level gets a
/// look: constants, then variables, then lists.
fn level_find(
    constants: &[ConstantDecl],
    variables: &[VariableDecl],
    lists: &[ListDecl],
    name: &str,
) -> Option<Resolved> {
    if let Some(decl) = constants.iter().find(|c| names::eq(&c.name, name)) {
        return Some(Resolved::Constant(decl.value.clone(), decl.data_type));
    }
    if let Some(decl) = variables.iter().find(|v| names::eq(&v.name, name)) {
        return Some(Resolved::Variable {
            name: decl.name.clone(),
            data_type: decl.data_type,
        });
    }
    lists
        .iter()
        .find(|l| names::eq(&l.name, name))
        .map(|decl| Resolved::RuntimeList {
            name: decl.name.clone(),
            data_type: decl.data_type,
        })
}

fn emit_pops(count: usize, blocks: &mut Vec<Block>) {
    for _ in 0..count {
        blocks.push(Block::new(
            "deleteLine:ofList:",
            vec![text("last"), text(STACK_LIST)],
        ));
    }
}

/// Brings a freshly declared scalar to life: safe values append a
/// frame slot, unsafe values set their backing variable.
fn emit_value_init(slot: &StackSlot, value: BlockValue, blocks: &mut Vec<Block>) {
    match &slot.storage {
        Some(storage) => blocks.push(Block::new("setVar:to:", vec![text(storage), value])),
        None => blocks.push(Block::new("append:toList:", vec![value, text(STACK_LIST)])),
    }
}

fn text(value: &str) -> BlockValue {
    BlockValue::Text(value.to_string())
}

fn negate(value: BlockValue) -> BlockValue {
    match value {
        BlockValue::Number(n) => BlockValue::Number(-n),
        other => BlockValue::reporter(Block::new("-", vec![BlockValue::Number(0.0), other])),
    }
}

/// Assignment to a named runtime variable. Augmented forms ride the
/// native change block instead of a read-modify-write.
fn variable_assign(name: &str, op: AssignOp, operand: BlockValue) -> Block {
    match op {
        AssignOp::Assign => Block::new("setVar:to:", vec![text(name), operand]),
        AssignOp::Add => Block::new("changeVar:by:", vec![text(name), operand]),
        AssignOp::Sub => Block::new("changeVar:by:", vec![text(name), negate(operand)]),
        AssignOp::Inc => Block::new("changeVar:by:", vec![text(name), BlockValue::Number(1.0)]),
        AssignOp::Dec => Block::new("changeVar:by:", vec![text(name), BlockValue::Number(-1.0)]),
        AssignOp::Concat => {
            let read = BlockValue::reporter(Block::new("readVariable", vec![text(name)]));
            Block::new(
                "setVar:to:",
                vec![
                    text(name),
                    BlockValue::reporter(Block::new("concatenate:with:", vec![read, operand])),
                ],
            )
        }
    }
}

fn element_replacement(op: AssignOp, read: BlockValue, operand: BlockValue) -> BlockValue {
    match op {
        AssignOp::Assign => operand,
        AssignOp::Add => BlockValue::reporter(Block::new("+", vec![read, operand])),
        AssignOp::Sub => BlockValue::reporter(Block::new("-", vec![read, operand])),
        AssignOp::Inc => {
            BlockValue::reporter(Block::new("+", vec![read, BlockValue::Number(1.0)]))
        }
        AssignOp::Dec => {
            BlockValue::reporter(Block::new("-", vec![read, BlockValue::Number(1.0)]))
        }
        AssignOp::Concat => {
            BlockValue::reporter(Block::new("concatenate:with:", vec![read, operand]))
        }
    }
}

fn literal_count(expr: &Expression) -> Option<usize> {
    match expr {
        Expression::Terminal {
            value: Literal::Number(n),
            ..
        } if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Collects the ordered leaves of a same-operator chain. Mixed
/// operators stay nested and count as leaves.
fn flatten<'e>(op: BinaryOp, expr: &'e Expression, leaves: &mut Vec<&'e Expression>) {
    match expr {
        Expression::Compound {
            op: child_op,
            left,
            right,
            ..
        } if *child_op == op => {
            flatten(op, left, leaves);
            flatten(op, right, leaves);
        }
        other => leaves.push(other),
    }
}

/// Rebuilds a leaf list as a balanced tree by midpoint split, keeping
/// leaf order. Depth stays logarithmic in the chain length.
fn balanced(symbol: &str, mut values: Vec<BlockValue>) -> BlockValue {
    match values.len() {
        0 => text(""),
        1 => match values.pop() {
            Some(value) => value,
            None => unreachable!("length checked above"),
        },
        n => {
            let right = values.split_off(n / 2);
            let left = balanced(symbol, values);
            let right = balanced(symbol, right);
            BlockValue::reporter(Block::new(symbol, vec![left, right]))
        }
    }
}

fn binary_operand_type(op: BinaryOp) -> Option<DataType> {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            Some(DataType::Number)
        }
        BinaryOp::And | BinaryOp::Or => Some(DataType::Boolean),
        _ => None,
    }
}

fn op_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
        BinaryOp::Concat => "concatenate:with:",
        BinaryOp::Eq | BinaryOp::Neq => "=",
        BinaryOp::Lt | BinaryOp::LtEq => "<",
        BinaryOp::Gt | BinaryOp::GtEq => ">",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
    }
}

/// Custom-block signature: one type marker per parameter plus the two
/// hidden stack parameters.
fn proccode(method: &Method) -> String {
    let mut code = method.name.clone();
    for param in &method.params {
        code.push(' ');
        code.push_str(match param.data_type {
            DataType::Number => "%n",
            DataType::Boolean => "%b",
            _ => "%s",
        });
    }
    code.push_str(" %s %n");
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder;
    use crate::lexer;
    use crate::parser;

    fn lower_source(source: &str) -> (Sb2Project, Diagnostics) {
        let mut diags = Diagnostics::new();
        let file = diags.add_file("test.ch", source);
        let tokens = lexer::tokenize(source, file).unwrap();
        let tree = parser::parse(tokens).unwrap();
        let mut project = Project::default();
        builder::build_file(&tree, &mut project, &mut diags);
        builder::link_imports(&mut project, &mut diags);
        let lowered = lower_project(&project, &mut diags, &CompileOptions::default());
        (lowered, diags)
    }

    fn method_blocks(project: &Sb2Project) -> &[Block] {
        &project.sprites[0].scripts[0].blocks
    }

    fn tree_depth(value: &BlockValue) -> usize {
        match value {
            BlockValue::Reporter(block) => {
                1 + block.args.iter().map(tree_depth).max().unwrap_or(0)
            }
            _ => 0,
        }
    }

    fn tree_leaves(value: &BlockValue, leaves: &mut Vec<f64>) {
        match value {
            BlockValue::Reporter(block) => {
                for arg in &block.args {
                    tree_leaves(arg, leaves);
                }
            }
            BlockValue::Number(n) => leaves.push(*n),
            _ => {}
        }
    }

    #[test]
    fn balanced_addition_keeps_order_and_log_depth() {
        let source = "sprite S { void M() { \
            num x = 1+2+3+4+5+6+7+8+9+10+11+12+13+14+15+16; } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let append = &method_blocks(&project)[1];
        assert_eq!(append.opcode, "append:toList:");
        let sum = &append.args[0];
        assert_eq!(tree_depth(sum), 4);
        let mut leaves = Vec::new();
        tree_leaves(sum, &mut leaves);
        assert_eq!(leaves, (1..=16).map(f64::from).collect::<Vec<_>>());
    }

    #[test]
    fn math_calls_fold_with_their_own_functions() {
        let (project, diags) = lower_source(
            "sprite S { void M() { num a = Sqrt(16); num b = Sin(30); } }",
        );
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        assert_eq!(blocks[1].args[0], BlockValue::Number(4.0));
        let BlockValue::Number(sine) = &blocks[2].args[0] else {
            panic!("sine of a literal should fold");
        };
        assert!((sine - 0.5).abs() < 1e-9);
    }

    #[test]
    fn math_call_on_a_variable_stays_a_runtime_block() {
        let (project, diags) =
            lower_source("num g; sprite S { void M() { num x = Sqrt(g); } }");
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let append = &method_blocks(&project)[1];
        let BlockValue::Reporter(compute) = &append.args[0] else {
            panic!("expected a compute block");
        };
        assert_eq!(compute.opcode, "computeFunction:of:");
        assert_eq!(compute.args[0], BlockValue::Text("sqrt".to_string()));
    }

    #[test]
    fn global_compound_assignment_takes_the_change_shortcut() {
        let (project, diags) = lower_source("num g; sprite S { void M() { g += 5; } }");
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let change = &method_blocks(&project)[1];
        assert_eq!(change.opcode, "changeVar:by:");
        assert_eq!(change.args[0], BlockValue::Text("g".to_string()));
        assert_eq!(change.args[1], BlockValue::Number(5.0));
    }

    #[test]
    fn slot_compound_assignment_rewrites_the_same_slot() {
        let (project, diags) =
            lower_source("sprite S { void M() { num x = 1; x += 2; } }");
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let write = &method_blocks(&project)[2];
        assert_eq!(write.opcode, "setLine:ofList:to:");
        let BlockValue::Reporter(sum) = &write.args[2] else {
            panic!("expected a read-modify-write value");
        };
        assert_eq!(sum.opcode, "+");
        let BlockValue::Reporter(read) = &sum.args[0] else {
            panic!("expected a slot read");
        };
        assert_eq!(read.opcode, "getLine:ofList:");
        // Both sides address the identical slot.
        assert_eq!(read.args[0], write.args[0]);
    }

    #[test]
    fn frames_pop_every_slot_on_both_exits() {
        let source =
            "sprite S { void M() { num a; num b; num[3] c; if (a > 0) { return; } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        let doif = blocks
            .iter()
            .find(|b| b.opcode == "doIf")
            .expect("an if block");
        let BlockValue::Stack(branch) = &doif.args[1] else {
            panic!("expected a substack");
        };
        let branch_pops = branch
            .iter()
            .filter(|b| b.opcode == "deleteLine:ofList:")
            .count();
        assert_eq!(branch_pops, 5);
        assert_eq!(branch.last().map(|b| b.opcode.as_str()), Some("stopScripts"));
        let trailing_pops = blocks
            .iter()
            .rev()
            .take_while(|b| b.opcode == "deleteLine:ofList:")
            .count();
        assert_eq!(trailing_pops, 5);
    }

    #[test]
    fn switch_labels_on_one_case_or_together() {
        let source = "num g; sprite S { void M(num x) { \
            switch (x) { case 1, 2: g = 9; } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let doif = method_blocks(&project)
            .iter()
            .find(|b| b.opcode == "doIf")
            .expect("an if block");
        let BlockValue::Reporter(test) = &doif.args[0] else {
            panic!("expected a condition");
        };
        assert_eq!(test.opcode, "|");
        for arg in &test.args {
            let BlockValue::Reporter(equal) = arg else {
                panic!("expected an equality test");
            };
            assert_eq!(equal.opcode, "=");
        }
    }

    #[test]
    fn sibling_unsafe_scopes_store_under_distinct_keys() {
        let source = "sprite S { unsafe void M() { { num v = 1; } { num v = 2; } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let sets: Vec<&Block> = method_blocks(&project)
            .iter()
            .filter(|b| b.opcode == "setVar:to:")
            .collect();
        assert_eq!(sets.len(), 2);
        assert_ne!(sets[0].args[0], sets[1].args[0]);
        let keys: Vec<&String> = project.sprites[0]
            .variables
            .iter()
            .map(|v| &v.name)
            .filter(|n| n.ends_with(": v"))
            .collect();
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn undefined_names_each_report_once_and_lowering_continues() {
        let (project, diags) =
            lower_source("num g; sprite S { void M() { g = missing + also; g = 2; } }");
        let undefined = diags
            .errors()
            .iter()
            .filter(|e| e.kind == ErrorKind::NotDefined)
            .count();
        assert_eq!(undefined, 2);
        let sets = method_blocks(&project)
            .iter()
            .filter(|b| b.opcode == "setVar:to:")
            .count();
        assert_eq!(sets, 2);
    }

    #[test]
    fn value_calls_capture_the_return_variable() {
        let source = "sprite S { function num F() { return 7; } \
            void M() { num x = F(); } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        // F lowers first, so M is the second script.
        let blocks = &project.sprites[0].scripts[1].blocks;
        assert_eq!(blocks[1].opcode, "call");
        assert_eq!(blocks[1].args[0], BlockValue::Text("F %s %n".to_string()));
        let BlockValue::Reporter(base) = blocks[1].args.last().unwrap() else {
            panic!("expected a live base offset");
        };
        assert_eq!(base.opcode, "lineCountOfList:");
        assert_eq!(blocks[2].opcode, "append:toList:");
        let BlockValue::Reporter(capture) = &blocks[2].args[0] else {
            panic!("expected a return read");
        };
        assert_eq!(capture.opcode, "readVariable");
        assert_eq!(capture.args[0], BlockValue::Text("@return".to_string()));
    }

    #[test]
    fn function_scripts_set_and_stop() {
        let source = "sprite S { function num F() { return 7; } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        assert_eq!(blocks[0].opcode, "procDef");
        assert_eq!(blocks[1].opcode, "setVar:to:");
        assert_eq!(blocks[1].args[0], BlockValue::Text("@return".to_string()));
        assert_eq!(blocks[2].opcode, "stopScripts");
    }

    #[test]
    fn loop_conditions_reject_value_calls() {
        let source = "sprite S { function num F() { return 1; } \
            void M() { while (F() > 0) { } } }";
        let (_, diags) = lower_source(source);
        assert!(diags
            .errors()
            .iter()
            .any(|e| e.kind == ErrorKind::ImproperUsage));
    }

    #[test]
    fn inline_methods_expand_without_call_blocks() {
        let source = "num g; sprite S { inline void Bump(num n) { g += n; } \
            void M() { Bump(3); } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        assert!(blocks.iter().all(|b| b.opcode != "call"));
        assert_eq!(blocks[1].opcode, "append:toList:");
        assert_eq!(blocks[1].args[0], BlockValue::Number(3.0));
        assert!(blocks.iter().any(|b| b.opcode == "changeVar:by:"));
    }

    #[test]
    fn inline_recursion_is_rejected() {
        let source = "sprite S { inline void A() { A(); } void M() { A(); } }";
        let (_, diags) = lower_source(source);
        assert!(diags
            .errors()
            .iter()
            .any(|e| e.kind == ErrorKind::InvalidArgument));
    }

    #[test]
    fn for_loops_drive_a_named_counter() {
        let source = "sprite S { void M() { for (num i in 10) { } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let form = method_blocks(&project)
            .iter()
            .find(|b| b.opcode == "doForLoop")
            .expect("a for block");
        let BlockValue::Text(counter) = &form.args[0] else {
            panic!("expected a counter name");
        };
        assert!(counter.ends_with(": i"));
        assert_eq!(form.args[1], BlockValue::Number(10.0));
        assert!(project.sprites[0].variables.iter().any(|v| &v.name == counter));
    }

    #[test]
    fn foreach_fetches_each_element() {
        let source = "list num items[2] = {4, 5}; num g; \
            sprite S { void M() { foreach (num v in items) { g = v; } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        let form = blocks
            .iter()
            .find(|b| b.opcode == "doForLoop")
            .expect("a for block");
        let BlockValue::Reporter(count) = &form.args[1] else {
            panic!("expected a live count");
        };
        assert_eq!(count.opcode, "lineCountOfList:");
        let BlockValue::Stack(body) = &form.args[2] else {
            panic!("expected a substack");
        };
        assert_eq!(body[0].opcode, "setLine:ofList:to:");
        // The loop variable pushes before the loop and pops after.
        assert_eq!(blocks[1].opcode, "append:toList:");
        assert_eq!(
            blocks.last().map(|b| b.opcode.as_str()),
            Some("deleteLine:ofList:")
        );
    }

    #[test]
    fn handlers_use_literal_slot_indices_and_reset_the_stack() {
        let source = "num g; sprite S { event GreenFlag() { num x = 5; g = x; } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = &project.sprites[0].scripts[0].blocks;
        assert_eq!(blocks[0].opcode, "whenGreenFlag");
        assert_eq!(
            blocks[1],
            Block::new(
                "deleteLine:ofList:",
                vec![
                    BlockValue::Text("all".to_string()),
                    BlockValue::Text("@stack".to_string())
                ]
            )
        );
        let set = blocks.iter().find(|b| b.opcode == "setVar:to:").unwrap();
        let BlockValue::Reporter(read) = &set.args[1] else {
            panic!("expected a slot read");
        };
        assert_eq!(read.opcode, "getLine:ofList:");
        assert_eq!(read.args[0], BlockValue::Number(1.0));
    }

    #[test]
    fn inline_repeat_unrolls_literal_counts() {
        let source = "num g; sprite S { void M() { inline repeat (3) { g++; } } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        assert!(blocks.iter().all(|b| b.opcode != "doRepeat"));
        let bumps = blocks
            .iter()
            .filter(|b| b.opcode == "changeVar:by:")
            .count();
        assert_eq!(bumps, 3);
    }

    #[test]
    fn stop_this_script_cleans_the_chain_first() {
        let source = "sprite S { void M() { num a; num b; StopThisScript(); } }";
        let (project, diags) = lower_source(source);
        assert!(!diags.has_errors(), "{:?}", diags.errors());
        let blocks = method_blocks(&project);
        let stop = blocks
            .iter()
            .position(|b| b.opcode == "stopScripts")
            .expect("a stop block");
        let pops = blocks[..stop]
            .iter()
            .filter(|b| b.opcode == "deleteLine:ofList:")
            .count();
        assert_eq!(pops, 2);
    }
}
