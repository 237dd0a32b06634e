//! Static catalogs of the target runtime's built-in surface: standard
//! commands and reporters, the foldable math functions, event hats,
//! stop variants and list operations. Codegen resolves names against
//! these tables after user methods, using the shared case-insensitive
//! comparison.

use crate::ast::DataType;
use crate::scope::names;

/// One standard built-in: a fixed opcode plus its typed inputs.
/// Reporters produce a value; commands stand alone.
pub struct BuiltinMethod {
    pub name: &'static str,
    pub opcode: &'static str,
    pub is_reporter: bool,
    pub return_type: DataType,
    pub inputs: &'static [(&'static str, DataType)],
}

macro_rules! command {
    ($name:literal, $opcode:literal, [$(($input:literal, $typ:ident)),*]) => {
        BuiltinMethod {
            name: $name,
            opcode: $opcode,
            is_reporter: false,
            return_type: DataType::Object,
            inputs: &[$(($input, DataType::$typ)),*],
        }
    };
}

macro_rules! reporter {
    ($name:literal, $opcode:literal, $ret:ident, [$(($input:literal, $typ:ident)),*]) => {
        BuiltinMethod {
            name: $name,
            opcode: $opcode,
            is_reporter: true,
            return_type: DataType::$ret,
            inputs: &[$(($input, DataType::$typ)),*],
        }
    };
}

pub const STANDARD_METHODS: &[BuiltinMethod] = &[
    // Motion
    command!("MoveSteps", "forward:", [("steps", Number)]),
    command!("TurnRight", "turnRight:", [("degrees", Number)]),
    command!("TurnLeft", "turnLeft:", [("degrees", Number)]),
    command!("PointInDirection", "heading:", [("direction", Number)]),
    command!("PointTowards", "pointTowards:", [("target", String)]),
    command!("GoToXY", "gotoX:y:", [("x", Number), ("y", Number)]),
    command!("GoTo", "gotoSpriteOrMouse:", [("target", String)]),
    command!(
        "GlideToXY",
        "glideSecs:toX:y:elapsed:from:",
        [("seconds", Number), ("x", Number), ("y", Number)]
    ),
    command!("ChangeXBy", "changeXposBy:", [("amount", Number)]),
    command!("SetX", "xpos:", [("x", Number)]),
    command!("ChangeYBy", "changeYposBy:", [("amount", Number)]),
    command!("SetY", "ypos:", [("y", Number)]),
    command!("IfOnEdgeBounce", "bounceOffEdge", []),
    command!("SetRotationStyle", "setRotationStyle", [("style", String)]),
    reporter!("XPosition", "xpos", Number, []),
    reporter!("YPosition", "ypos", Number, []),
    reporter!("Direction", "heading", Number, []),
    // Looks
    command!(
        "SayFor",
        "say:duration:elapsed:from:",
        [("message", String), ("seconds", Number)]
    ),
    command!("Say", "say:", [("message", String)]),
    command!(
        "ThinkFor",
        "think:duration:elapsed:from:",
        [("message", String), ("seconds", Number)]
    ),
    command!("Think", "think:", [("message", String)]),
    command!("Show", "show", []),
    command!("Hide", "hide", []),
    command!("SwitchCostume", "lookLike:", [("costume", String)]),
    command!("NextCostume", "nextCostume", []),
    command!("SwitchBackdrop", "startScene", [("backdrop", String)]),
    command!("SwitchBackdropAndWait", "startSceneAndWait", [("backdrop", String)]),
    command!("NextBackdrop", "nextScene", []),
    command!("ChangeSizeBy", "changeSizeBy:", [("amount", Number)]),
    command!("SetSize", "setSizeTo:", [("size", Number)]),
    command!(
        "ChangeEffectBy",
        "changeGraphicEffect:by:",
        [("effect", String), ("amount", Number)]
    ),
    command!(
        "SetEffect",
        "setGraphicEffect:to:",
        [("effect", String), ("value", Number)]
    ),
    command!("ClearEffects", "filterReset", []),
    command!("GoToFront", "comeToFront", []),
    command!("GoBackLayers", "goBackByLayers:", [("layers", Number)]),
    reporter!("CostumeNumber", "costumeIndex", Number, []),
    reporter!("BackdropName", "sceneName", String, []),
    reporter!("Size", "scale", Number, []),
    // Sound
    command!("PlaySound", "playSound:", [("sound", String)]),
    command!("PlaySoundUntilDone", "doPlaySoundAndWait", [("sound", String)]),
    command!("StopAllSounds", "stopAllSounds", []),
    command!("PlayDrumFor", "playDrum", [("drum", Number), ("beats", Number)]),
    command!("Rest", "rest:elapsed:from:", [("beats", Number)]),
    command!(
        "PlayNoteFor",
        "noteOn:duration:elapsed:from:",
        [("note", Number), ("beats", Number)]
    ),
    command!("SetInstrument", "instrument:", [("instrument", Number)]),
    command!("ChangeVolumeBy", "changeVolumeBy:", [("amount", Number)]),
    command!("SetVolume", "setVolumeTo:", [("volume", Number)]),
    reporter!("Volume", "volume", Number, []),
    command!("ChangeTempoBy", "changeTempoBy:", [("amount", Number)]),
    command!("SetTempo", "setTempoTo:", [("bpm", Number)]),
    reporter!("Tempo", "tempo", Number, []),
    // Pen
    command!("ClearPen", "clearPenTrails", []),
    command!("Stamp", "stampCostume", []),
    command!("PenDown", "putPenDown", []),
    command!("PenUp", "putPenUp", []),
    command!("SetPenColor", "penColor:", [("color", Number)]),
    command!("ChangePenHueBy", "changePenHueBy:", [("amount", Number)]),
    command!("SetPenHue", "setPenHueTo:", [("hue", Number)]),
    command!("ChangePenShadeBy", "changePenShadeBy:", [("amount", Number)]),
    command!("SetPenShade", "setPenShadeTo:", [("shade", Number)]),
    command!("ChangePenSizeBy", "changePenSizeBy:", [("amount", Number)]),
    command!("SetPenSize", "penSize:", [("size", Number)]),
    // Events
    command!("Broadcast", "broadcast:", [("message", String)]),
    command!("BroadcastAndWait", "doBroadcastAndWait", [("message", String)]),
    // Control
    command!("Wait", "wait:elapsed:from:", [("seconds", Number)]),
    command!("WaitUntil", "doWaitUntil", [("condition", Boolean)]),
    command!("CreateCloneOf", "createCloneOf", [("target", String)]),
    command!("DeleteThisClone", "deleteClone", []),
    // Sensing
    command!("Ask", "doAsk", [("question", String)]),
    reporter!("Answer", "answer", String, []),
    reporter!("Touching", "touching:", Boolean, [("target", String)]),
    reporter!("TouchingColor", "touchingColor:", Boolean, [("color", Number)]),
    reporter!("DistanceTo", "distanceTo:", Number, [("target", String)]),
    reporter!("KeyPressed", "keyPressed:", Boolean, [("key", String)]),
    reporter!("MouseDown", "mousePressed", Boolean, []),
    reporter!("MouseX", "mouseX", Number, []),
    reporter!("MouseY", "mouseY", Number, []),
    reporter!("Loudness", "soundLevel", Number, []),
    reporter!("Timer", "timer", Number, []),
    command!("ResetTimer", "timerReset", []),
    reporter!("Username", "getUserName", String, []),
    reporter!("DaysSince2000", "timestamp", Number, []),
    reporter!("CurrentTime", "timeAndDate", Number, [("unit", String)]),
    reporter!(
        "AttributeOf",
        "getAttribute:of:",
        Object,
        [("attribute", String), ("target", String)]
    ),
    // Operators
    reporter!("Round", "rounded", Number, [("value", Number)]),
    reporter!("Random", "randomFrom:to:", Number, [("from", Number), ("to", Number)]),
    reporter!("LetterOf", "letter:of:", String, [("index", Number), ("text", String)]),
    reporter!("StringLength", "stringLength:", Number, [("text", String)]),
    reporter!("Join", "concatenate:with:", String, [("a", Object), ("b", Object)]),
];

pub fn find_standard(name: &str) -> Option<&'static BuiltinMethod> {
    STANDARD_METHODS.iter().find(|m| names::eq(m.name, name))
}

/// A unary math built-in. When the argument is a literal number the
/// compiler folds the call with `fold`; otherwise it emits the generic
/// compute-function block with `display` as the function name.
/// Trigonometry works in degrees on both paths.
pub struct MathFunc {
    pub name: &'static str,
    pub display: &'static str,
    pub fold: fn(f64) -> f64,
}

fn sin_degrees(x: f64) -> f64 {
    x.to_radians().sin()
}

fn cos_degrees(x: f64) -> f64 {
    x.to_radians().cos()
}

fn tan_degrees(x: f64) -> f64 {
    x.to_radians().tan()
}

fn asin_degrees(x: f64) -> f64 {
    x.asin().to_degrees()
}

fn acos_degrees(x: f64) -> f64 {
    x.acos().to_degrees()
}

fn atan_degrees(x: f64) -> f64 {
    x.atan().to_degrees()
}

fn pow10(x: f64) -> f64 {
    10f64.powf(x)
}

pub const MATH_FUNCTIONS: &[MathFunc] = &[
    MathFunc { name: "Abs", display: "abs", fold: f64::abs },
    MathFunc { name: "Floor", display: "floor", fold: f64::floor },
    MathFunc { name: "Ceiling", display: "ceiling", fold: f64::ceil },
    MathFunc { name: "Sqrt", display: "sqrt", fold: f64::sqrt },
    MathFunc { name: "Sin", display: "sin", fold: sin_degrees },
    MathFunc { name: "Cos", display: "cos", fold: cos_degrees },
    MathFunc { name: "Tan", display: "tan", fold: tan_degrees },
    MathFunc { name: "Asin", display: "asin", fold: asin_degrees },
    MathFunc { name: "Acos", display: "acos", fold: acos_degrees },
    MathFunc { name: "Atan", display: "atan", fold: atan_degrees },
    MathFunc { name: "Ln", display: "ln", fold: f64::ln },
    MathFunc { name: "Log", display: "log", fold: f64::log10 },
    MathFunc { name: "PowE", display: "e ^", fold: f64::exp },
    MathFunc { name: "Pow10", display: "10 ^", fold: pow10 },
];

pub fn find_math(name: &str) -> Option<&'static MathFunc> {
    MATH_FUNCTIONS.iter().find(|m| names::eq(m.name, name))
}

/// An event hat. `fixed_arg` is the sensor name slot of
/// `whenSensorGreaterThan`; `parameter` is the required literal between
/// the angle brackets, when the event takes one.
pub struct EventHat {
    pub name: &'static str,
    pub opcode: &'static str,
    pub fixed_arg: Option<&'static str>,
    pub parameter: Option<DataType>,
}

pub const EVENT_HATS: &[EventHat] = &[
    EventHat {
        name: "GreenFlag",
        opcode: "whenGreenFlag",
        fixed_arg: None,
        parameter: None,
    },
    EventHat {
        name: "KeyPressed",
        opcode: "whenKeyPressed",
        fixed_arg: None,
        parameter: Some(DataType::String),
    },
    EventHat {
        name: "Clicked",
        opcode: "whenClicked",
        fixed_arg: None,
        parameter: None,
    },
    EventHat {
        name: "BackdropChanged",
        opcode: "whenSceneStarts",
        fixed_arg: None,
        parameter: Some(DataType::String),
    },
    EventHat {
        name: "Received",
        opcode: "whenIReceive",
        fixed_arg: None,
        parameter: Some(DataType::String),
    },
    EventHat {
        name: "Cloned",
        opcode: "whenCloned",
        fixed_arg: None,
        parameter: None,
    },
    EventHat {
        name: "LoudnessGreaterThan",
        opcode: "whenSensorGreaterThan",
        fixed_arg: Some("loudness"),
        parameter: Some(DataType::Number),
    },
    EventHat {
        name: "TimerGreaterThan",
        opcode: "whenSensorGreaterThan",
        fixed_arg: Some("timer"),
        parameter: Some(DataType::Number),
    },
];

pub fn find_event(name: &str) -> Option<&'static EventHat> {
    EVENT_HATS.iter().find(|e| names::eq(e.name, name))
}

/// Stop built-ins map to one opcode with a menu argument. The
/// this-script variant needs the caller's stack cleanup first, so
/// codegen handles these outside the standard table.
pub fn stop_variant(name: &str) -> Option<&'static str> {
    for (builtin, menu) in [
        ("StopAll", "all"),
        ("StopThisScript", "this script"),
        ("StopOtherScripts", "other scripts in sprite"),
    ] {
        if names::eq(builtin, name) {
            return Some(menu);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListOpKind {
    Push,
    Insert,
    DeleteAt,
    DeleteAll,
    Count,
    Contains,
}

/// List operations take the list itself as their first argument, which
/// must be a bare name, so they cannot ride the standard table either.
/// `extra_args` counts the arguments after the list name.
pub struct ListOp {
    pub name: &'static str,
    pub kind: ListOpKind,
    pub is_reporter: bool,
    pub return_type: DataType,
    pub extra_args: usize,
}

pub const LIST_OPS: &[ListOp] = &[
    ListOp {
        name: "Push",
        kind: ListOpKind::Push,
        is_reporter: false,
        return_type: DataType::Object,
        extra_args: 1,
    },
    ListOp {
        name: "Insert",
        kind: ListOpKind::Insert,
        is_reporter: false,
        return_type: DataType::Object,
        extra_args: 2,
    },
    ListOp {
        name: "DeleteAt",
        kind: ListOpKind::DeleteAt,
        is_reporter: false,
        return_type: DataType::Object,
        extra_args: 1,
    },
    ListOp {
        name: "DeleteAll",
        kind: ListOpKind::DeleteAll,
        is_reporter: false,
        return_type: DataType::Object,
        extra_args: 0,
    },
    ListOp {
        name: "Count",
        kind: ListOpKind::Count,
        is_reporter: true,
        return_type: DataType::Number,
        extra_args: 0,
    },
    ListOp {
        name: "Contains",
        kind: ListOpKind::Contains,
        is_reporter: true,
        return_type: DataType::Boolean,
        extra_args: 1,
    },
];

pub fn find_list_op(name: &str) -> Option<&'static ListOp> {
    LIST_OPS.iter().find(|op| names::eq(op.name, name))
}
