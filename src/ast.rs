use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A slot is addressed by its host block and its position in the host's slot list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId {
    pub host: BlockId,
    pub index: usize,
}

impl SlotId {
    pub fn new(host: BlockId, index: usize) -> Self {
        Self { host, index }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKind {
    Variable,
    Operator,
    Print,
    If,
    Elif,
    Else,
    While,
    DoWhile,
    For,
}

impl BlockKind {
    pub const ALL: [BlockKind; 9] = [
        BlockKind::Variable,
        BlockKind::Operator,
        BlockKind::Print,
        BlockKind::If,
        BlockKind::Elif,
        BlockKind::Else,
        BlockKind::While,
        BlockKind::DoWhile,
        BlockKind::For,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlockKind::Variable => "variable",
            BlockKind::Operator => "operator",
            BlockKind::Print => "print",
            BlockKind::If => "if",
            BlockKind::Elif => "elif",
            BlockKind::Else => "else",
            BlockKind::While => "while",
            BlockKind::DoWhile => "do_while",
            BlockKind::For => "for",
        }
    }

    /// Kinds that read as a full statement and may therefore sit directly on the canvas.
    pub fn is_statement_shaped(&self) -> bool {
        !matches!(self, BlockKind::Operator)
    }

    pub fn is_connector(&self) -> bool {
        matches!(self, BlockKind::Elif | BlockKind::Else)
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            BlockKind::If
                | BlockKind::Elif
                | BlockKind::Else
                | BlockKind::While
                | BlockKind::DoWhile
                | BlockKind::For
        )
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for BlockKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let kind = match lowered.as_str() {
            "variable" | "var" => BlockKind::Variable,
            "operator" => BlockKind::Operator,
            "print" => BlockKind::Print,
            "if" => BlockKind::If,
            "elif" => BlockKind::Elif,
            "else" => BlockKind::Else,
            "while" => BlockKind::While,
            "do_while" | "dowhile" | "do-while" => BlockKind::DoWhile,
            "for" => BlockKind::For,
            _ => return Err(format!("Unknown block kind '{}'.", s)),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatorKind {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

impl OperatorKind {
    pub fn symbol(&self) -> &'static str {
        match self {
            OperatorKind::Add => "+",
            OperatorKind::Subtract => "-",
            OperatorKind::Multiply => "*",
            OperatorKind::Divide => "/",
            OperatorKind::Equal => "==",
            OperatorKind::NotEqual => "!=",
            OperatorKind::Less => "<",
            OperatorKind::LessEqual => "<=",
            OperatorKind::Greater => ">",
            OperatorKind::GreaterEqual => ">=",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorKind::Add => "add",
            OperatorKind::Subtract => "subtract",
            OperatorKind::Multiply => "multiply",
            OperatorKind::Divide => "divide",
            OperatorKind::Equal => "equal",
            OperatorKind::NotEqual => "notequal",
            OperatorKind::Less => "less",
            OperatorKind::LessEqual => "lessequal",
            OperatorKind::Greater => "greater",
            OperatorKind::GreaterEqual => "greaterequal",
        }
    }
}

impl FromStr for OperatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let op = match lowered.as_str() {
            "add" | "+" => OperatorKind::Add,
            "subtract" | "-" => OperatorKind::Subtract,
            "multiply" | "*" => OperatorKind::Multiply,
            "divide" | "/" => OperatorKind::Divide,
            "equal" | "==" => OperatorKind::Equal,
            "notequal" | "!=" => OperatorKind::NotEqual,
            "less" | "<" => OperatorKind::Less,
            "lessequal" | "<=" => OperatorKind::LessEqual,
            "greater" | ">" => OperatorKind::Greater,
            "greaterequal" | ">=" => OperatorKind::GreaterEqual,
            _ => return Err(format!("Unknown operator '{}'.", s)),
        };
        Ok(op)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotShape {
    Value,
    Statement,
}

/// One line of a statement slot: a nested block, or a raw value typed straight into the body.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Block(BlockId),
    Raw(String),
}

impl Statement {
    pub fn block(&self) -> Option<BlockId> {
        match self {
            Statement::Block(id) => Some(*id),
            Statement::Raw(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotContent {
    /// At most one structural child; `literal` is the editable input shown while empty.
    Value {
        child: Option<BlockId>,
        literal: String,
    },
    Statements(Vec<Statement>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub name: &'static str,
    pub content: SlotContent,
}

impl Slot {
    pub fn value(name: &'static str) -> Self {
        Self {
            name,
            content: SlotContent::Value {
                child: None,
                literal: String::new(),
            },
        }
    }

    pub fn statements(name: &'static str) -> Self {
        Self {
            name,
            content: SlotContent::Statements(Vec::new()),
        }
    }

    pub fn shape(&self) -> SlotShape {
        match self.content {
            SlotContent::Value { .. } => SlotShape::Value,
            SlotContent::Statements(_) => SlotShape::Statement,
        }
    }

    /// Structural children in slot order; raw statement entries are skipped.
    pub fn children(&self) -> Vec<BlockId> {
        match &self.content {
            SlotContent::Value { child, .. } => child.iter().copied().collect(),
            SlotContent::Statements(entries) => entries.iter().filter_map(Statement::block).collect(),
        }
    }

    pub fn entries(&self) -> &[Statement] {
        match &self.content {
            SlotContent::Value { .. } => &[],
            SlotContent::Statements(entries) => entries,
        }
    }

    pub fn literal(&self) -> Option<&str> {
        match &self.content {
            SlotContent::Value { literal, .. } => Some(literal.as_str()),
            SlotContent::Statements(_) => None,
        }
    }

    /// A value slot counts as populated when it holds a child or a non-blank literal.
    pub fn is_populated(&self) -> bool {
        match &self.content {
            SlotContent::Value { child, literal } => child.is_some() || !literal.trim().is_empty(),
            SlotContent::Statements(entries) => !entries.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Parent {
    Free,
    Slot(SlotId),
    Chain(BlockId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    pub name: String,
    pub operator: Option<OperatorKind>,
    pub literal: Option<String>,
    pub slots: Vec<Slot>,
    /// Elif/Else connectors; only populated on `If` blocks.
    pub chain: Vec<BlockId>,
    pub parent: Parent,
    /// Absolute canvas position, meaningful while the block is free.
    pub position: Point,
}

impl Block {
    pub fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    pub fn slot_named(&self, name: &str) -> Option<&Slot> {
        self.slots.iter().find(|s| s.name == name)
    }

    pub fn is_free(&self) -> bool {
        matches!(self.parent, Parent::Free)
    }
}
