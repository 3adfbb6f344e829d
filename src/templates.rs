use crate::ast::{BlockKind, OperatorKind, Slot};

/// Everything needed to build a fresh block of one kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub kind: BlockKind,
    pub label: &'static str,
    pub default_name: &'static str,
    pub default_operator: Option<OperatorKind>,
    pub slots: Vec<Slot>,
}

pub fn template_for(kind: BlockKind) -> Template {
    let (label, default_name, default_operator, slots) = match kind {
        BlockKind::Variable => ("set variable", "x", None, vec![Slot::value("value")]),
        BlockKind::Operator => (
            "operator",
            "",
            Some(OperatorKind::Add),
            vec![Slot::value("left"), Slot::value("right")],
        ),
        BlockKind::Print => ("print", "", None, vec![Slot::value("value")]),
        BlockKind::If => (
            "if",
            "",
            None,
            vec![Slot::value("condition"), Slot::statements("body")],
        ),
        BlockKind::Elif => (
            "else if",
            "",
            None,
            vec![Slot::value("condition"), Slot::statements("body")],
        ),
        BlockKind::Else => ("else", "", None, vec![Slot::statements("body")]),
        BlockKind::While => (
            "while",
            "",
            None,
            vec![Slot::value("condition"), Slot::statements("body")],
        ),
        BlockKind::DoWhile => (
            "do ... while",
            "",
            None,
            vec![Slot::statements("body"), Slot::value("condition")],
        ),
        BlockKind::For => (
            "for",
            "i",
            None,
            vec![
                Slot::value("start"),
                Slot::value("end"),
                Slot::value("step"),
                Slot::statements("body"),
            ],
        ),
    };
    Template {
        kind,
        label,
        default_name,
        default_operator,
        slots,
    }
}

/// The palette, in display order.
pub fn catalogue() -> Vec<Template> {
    BlockKind::ALL.iter().copied().map(template_for).collect()
}
