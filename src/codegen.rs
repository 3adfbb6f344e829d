use crate::ast::{Block, BlockId, BlockKind, OperatorKind, SlotContent, Statement};
use crate::canvas::Canvas;
use crate::literal::infer_literal;
use std::collections::HashSet;

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield", "print", "range",
];

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    pub indent_width: usize,
    pub default_loop_var: String,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            indent_width: 4,
            default_loop_var: "i".to_string(),
        }
    }
}

/// Variable names seen so far in one generation pass, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct VariableRegistry {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl VariableRegistry {
    pub fn register(&mut self, name: &str) -> bool {
        if self.seen.insert(name.to_string()) {
            self.order.push(name.to_string());
            true
        } else {
            false
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    pub fn first(&self) -> Option<&str> {
        self.order.first().map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedProgram {
    pub source: String,
    pub variables: Vec<String>,
}

impl GeneratedProgram {
    pub fn digest(&self) -> String {
        source_digest(&self.source)
    }
}

pub fn source_digest(source: &str) -> String {
    format!("{:x}", md5::compute(source.as_bytes()))
}

pub fn generate(canvas: &Canvas) -> String {
    generate_with_options(canvas, &CodegenOptions::default()).source
}

pub fn generate_with_options(canvas: &Canvas, options: &CodegenOptions) -> GeneratedProgram {
    let mut generator = Generator {
        canvas,
        options,
        registry: VariableRegistry::default(),
        lines: Vec::new(),
    };
    for root in canvas.free_blocks() {
        generator.statement(*root, 0);
    }
    let mut source = generator.lines.join("\n");
    if !source.is_empty() {
        source.push('\n');
    }
    GeneratedProgram {
        source,
        variables: generator.registry.order,
    }
}

struct Generator<'a> {
    canvas: &'a Canvas,
    options: &'a CodegenOptions,
    registry: VariableRegistry,
    lines: Vec<String>,
}

impl<'a> Generator<'a> {
    fn pad(&self, indent: usize) -> String {
        " ".repeat(indent * self.options.indent_width)
    }

    fn push(&mut self, indent: usize, text: String) {
        let line = format!("{}{}", self.pad(indent), text);
        self.lines.push(line);
    }

    fn statement(&mut self, id: BlockId, indent: usize) {
        let canvas = self.canvas;
        let Some(block) = canvas.block(id) else {
            return;
        };
        match block.kind {
            BlockKind::Variable => {
                let name = identifier(&block.name, "var");
                self.registry.register(&name);
                let rhs = self
                    .value_slot(block, "value")
                    .or_else(|| block.literal.as_deref().map(|raw| self.token(raw)))
                    .unwrap_or_else(|| "None".to_string());
                self.push(indent, format!("{} = {}", name, rhs));
            }
            BlockKind::Operator => {
                let expr = self.expr(id);
                self.push(indent, expr);
            }
            BlockKind::Print => {
                let args = self.print_args(block);
                self.push(indent, format!("print({})", args));
            }
            BlockKind::If => {
                let cond = self.condition(block);
                self.push(indent, format!("if {}:", cond));
                self.body(block, indent + 1);
                for connector in &block.chain {
                    let Some(branch) = canvas.block(*connector) else {
                        continue;
                    };
                    match branch.kind {
                        BlockKind::Elif => {
                            let cond = self.condition(branch);
                            self.push(indent, format!("elif {}:", cond));
                        }
                        _ => self.push(indent, "else:".to_string()),
                    }
                    self.body(branch, indent + 1);
                }
            }
            BlockKind::Elif | BlockKind::Else => {
                self.push(
                    indent,
                    format!("pass  # '{}' block is not attached to an if", block.kind),
                );
            }
            BlockKind::While => {
                let cond = self.condition(block);
                self.push(indent, format!("while {}:", cond));
                self.body(block, indent + 1);
            }
            BlockKind::DoWhile => {
                self.push(indent, "while True:".to_string());
                self.statements(block, indent + 1);
                let cond = self.condition(block);
                self.push(indent + 1, format!("if not ({}): break", cond));
            }
            BlockKind::For => {
                let var = if block.name.trim().is_empty() {
                    self.registry
                        .first()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| self.options.default_loop_var.clone())
                } else {
                    identifier(&block.name, &self.options.default_loop_var)
                };
                self.registry.register(&var);
                let args = self.range_args(block);
                self.push(indent, format!("for {} in range({}):", var, args));
                self.body(block, indent + 1);
            }
        }
    }

    fn body(&mut self, block: &Block, indent: usize) {
        if !self.statements(block, indent) {
            self.push(indent, "pass".to_string());
        }
    }

    /// Emits the entries of the body slot in order; returns whether any line was written.
    fn statements(&mut self, block: &Block, indent: usize) -> bool {
        let entries = block
            .slot_named("body")
            .map(|s| s.entries().to_vec())
            .unwrap_or_default();
        let mut emitted = false;
        for entry in entries {
            match entry {
                Statement::Block(child) => {
                    self.statement(child, indent);
                    emitted = true;
                }
                Statement::Raw(text) if !text.trim().is_empty() => {
                    let line = self.token(&text);
                    self.push(indent, line);
                    emitted = true;
                }
                Statement::Raw(_) => {}
            }
        }
        emitted
    }

    fn condition(&mut self, block: &Block) -> String {
        self.value_slot(block, "condition")
            .unwrap_or_else(|| "False".to_string())
    }

    /// Start only gives `range(start)`; an end adds the second argument, a step the third.
    fn range_args(&mut self, block: &Block) -> String {
        let populated = |name: &str| block.slot_named(name).is_some_and(|s| s.is_populated());
        let arity = if populated("step") {
            3
        } else if populated("end") {
            2
        } else {
            1
        };
        [("start", "0"), ("end", "0"), ("step", "1")]
            .iter()
            .take(arity)
            .map(|(name, fallback)| {
                self.value_slot(block, name)
                    .unwrap_or_else(|| fallback.to_string())
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn print_args(&mut self, block: &Block) -> String {
        if let Some(SlotContent::Value {
            child: Some(child), ..
        }) = block.slot_named("value").map(|s| &s.content)
        {
            return self.expr(*child);
        }
        let raw = block
            .slot_named("value")
            .and_then(|s| s.literal())
            .filter(|l| !l.trim().is_empty())
            .or(block.literal.as_deref())
            .unwrap_or("");
        if raw.trim().is_empty() {
            return String::new();
        }
        let parts = split_top_level_commas(raw);
        let references_variable = parts.iter().any(|p| self.known_name(p).is_some());
        if parts.len() > 1 && references_variable {
            return parts
                .iter()
                .map(|p| self.token(p))
                .collect::<Vec<_>>()
                .join(", ");
        }
        self.token(raw)
    }

    /// Renders a value slot: its child expression, else its typed literal.
    fn value_slot(&mut self, block: &Block, name: &str) -> Option<String> {
        match &block.slot_named(name)?.content {
            SlotContent::Value {
                child: Some(child), ..
            } => Some(self.expr(*child)),
            SlotContent::Value { literal, .. } if !literal.trim().is_empty() => {
                Some(self.token(literal))
            }
            _ => None,
        }
    }

    fn operand(&mut self, block: &Block, name: &str) -> String {
        let nested_operator = match block.slot_named(name).map(|s| &s.content) {
            Some(SlotContent::Value {
                child: Some(child), ..
            }) => self
                .canvas
                .block(*child)
                .is_some_and(|c| c.kind == BlockKind::Operator),
            _ => false,
        };
        match self.value_slot(block, name) {
            Some(expr) if nested_operator => format!("({})", expr),
            Some(expr) => expr,
            None => "0".to_string(),
        }
    }

    fn expr(&mut self, id: BlockId) -> String {
        let canvas = self.canvas;
        let Some(block) = canvas.block(id) else {
            return "0".to_string();
        };
        match block.kind {
            BlockKind::Operator => {
                let symbol = block.operator.unwrap_or(OperatorKind::Add).symbol();
                let left = self.operand(block, "left");
                let right = self.operand(block, "right");
                format!("{} {} {}", left, symbol, right)
            }
            BlockKind::Variable => {
                let name = identifier(&block.name, "var");
                self.registry.register(&name);
                name
            }
            _ => "None".to_string(),
        }
    }

    /// A raw token: a known variable stays bare, anything else goes through literal inference.
    fn token(&self, raw: &str) -> String {
        match self.known_name(raw) {
            Some(name) => name,
            None => infer_literal(raw.trim()).to_string(),
        }
    }

    /// Registered identifier a name-shaped token refers to, after the same sanitizing as `set`.
    fn known_name(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        let name_shaped = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == ' ');
        if !name_shaped {
            return None;
        }
        let name = identifier(trimmed, "");
        self.registry.contains(&name).then_some(name)
    }
}

fn split_top_level_commas(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in raw.chars() {
        match (quote, c) {
            (Some(q), _) if c == q => {
                quote = None;
                current.push(c);
            }
            (None, '"' | '\'') => {
                quote = Some(c);
                current.push(c);
            }
            (None, ',') => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

/// Turns a learner-typed name into a usable identifier.
pub fn identifier(raw: &str, fallback: &str) -> String {
    let mut out = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if out.is_empty() {
        return fallback.to_string();
    }
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    if PYTHON_KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Point, SlotId};
    use pretty_assertions::assert_eq;

    fn slot(canvas: &Canvas, host: BlockId, name: &str) -> SlotId {
        canvas.slot_named(host, name).unwrap()
    }

    fn at() -> Point {
        Point::default()
    }

    #[test]
    fn simple_print() {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, at());
        canvas.set_literal(slot(&canvas, print, "value"), "Hello!").unwrap();
        assert_eq!(generate(&canvas), "print(\"Hello!\")\n");
    }

    #[test]
    fn variable_then_reference() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "x").unwrap();
        canvas.set_literal(slot(&canvas, var, "value"), "5").unwrap();
        let print = canvas.instantiate(BlockKind::Print, at());
        canvas.set_literal(slot(&canvas, print, "value"), "x").unwrap();
        assert_eq!(generate(&canvas), "x = 5\nprint(x)\n");
    }

    #[test]
    fn reference_before_declaration_is_a_string() {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, at());
        canvas.set_literal(slot(&canvas, print, "value"), "total").unwrap();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "total").unwrap();
        assert_eq!(generate(&canvas), "print(\"total\")\ntotal = None\n");
    }

    #[test]
    fn self_reference_in_assignment() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "x").unwrap();
        let (op, _) = canvas
            .instantiate_into(BlockKind::Operator, slot(&canvas, var, "value"))
            .unwrap();
        canvas.set_literal(slot(&canvas, op, "left"), "x").unwrap();
        canvas.set_literal(slot(&canvas, op, "right"), "1").unwrap();
        assert_eq!(generate(&canvas), "x = x + 1\n");
    }

    #[test]
    fn nested_operators_keep_tree_precedence() {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, at());
        let (mul, _) = canvas
            .instantiate_into(BlockKind::Operator, slot(&canvas, print, "value"))
            .unwrap();
        canvas.set_operator(mul, OperatorKind::Multiply).unwrap();
        let (add, _) = canvas
            .instantiate_into(BlockKind::Operator, slot(&canvas, mul, "left"))
            .unwrap();
        canvas.set_literal(slot(&canvas, add, "left"), "2").unwrap();
        canvas.set_literal(slot(&canvas, add, "right"), "3").unwrap();
        assert_eq!(generate(&canvas), "print((2 + 3) * 0)\n");
    }

    #[test]
    fn every_operator_symbol() {
        let table = [
            (OperatorKind::Add, "+"),
            (OperatorKind::Subtract, "-"),
            (OperatorKind::Multiply, "*"),
            (OperatorKind::Divide, "/"),
            (OperatorKind::Equal, "=="),
            (OperatorKind::NotEqual, "!="),
            (OperatorKind::Less, "<"),
            (OperatorKind::LessEqual, "<="),
            (OperatorKind::Greater, ">"),
            (OperatorKind::GreaterEqual, ">="),
        ];
        for (op, symbol) in table {
            let mut canvas = Canvas::new();
            let print = canvas.instantiate(BlockKind::Print, at());
            let (node, _) = canvas
                .instantiate_into(BlockKind::Operator, slot(&canvas, print, "value"))
                .unwrap();
            canvas.set_operator(node, op).unwrap();
            assert_eq!(generate(&canvas), format!("print(0 {} 0)\n", symbol));
        }
    }

    #[test]
    fn if_elif_else_in_fixed_order() {
        let mut canvas = Canvas::new();
        let if_block = canvas.instantiate(BlockKind::If, at());
        let else_block = canvas.instantiate(BlockKind::Else, at());
        let elif = canvas.instantiate(BlockKind::Elif, at());
        canvas.attach_connector(else_block, if_block).unwrap();
        canvas.attach_connector(elif, if_block).unwrap();
        canvas.set_literal(slot(&canvas, if_block, "condition"), "True").unwrap();
        for (branch, text) in [(if_block, "a"), (elif, "b"), (else_block, "c")] {
            let (print, _) = canvas
                .instantiate_into(BlockKind::Print, slot(&canvas, branch, "body"))
                .unwrap();
            canvas.set_literal(slot(&canvas, print, "value"), text).unwrap();
        }
        assert_eq!(
            generate(&canvas),
            "if True:\n    print('a')\nelif False:\n    print('b')\nelse:\n    print('c')\n"
        );
    }

    #[test]
    fn empty_bodies_emit_pass() {
        let mut canvas = Canvas::new();
        canvas.instantiate(BlockKind::While, at());
        assert_eq!(generate(&canvas), "while False:\n    pass\n");
    }

    #[test]
    fn range_arity_follows_populated_slots() {
        let cases: [(&[(&str, &str)], &str); 4] = [
            (&[], "range(0)"),
            (&[("start", "5")], "range(5)"),
            (&[("start", "1"), ("end", "4")], "range(1, 4)"),
            (&[("start", "0"), ("end", "10"), ("step", "2")], "range(0, 10, 2)"),
        ];
        for (fills, expected) in cases {
            let mut canvas = Canvas::new();
            let for_block = canvas.instantiate(BlockKind::For, at());
            for (name, value) in fills {
                canvas
                    .set_literal(slot(&canvas, for_block, name), value)
                    .unwrap();
            }
            assert_eq!(generate(&canvas), format!("for i in {}:\n    pass\n", expected));
        }
    }

    #[test]
    fn unnamed_loop_reuses_first_variable() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "n").unwrap();
        canvas.set_literal(slot(&canvas, var, "value"), "0").unwrap();
        let for_block = canvas.instantiate(BlockKind::For, at());
        canvas.set_name(for_block, "").unwrap();
        canvas.set_literal(slot(&canvas, for_block, "start"), "3").unwrap();
        let (print, _) = canvas
            .instantiate_into(BlockKind::Print, slot(&canvas, for_block, "body"))
            .unwrap();
        canvas.set_literal(slot(&canvas, print, "value"), "n").unwrap();
        assert_eq!(
            generate(&canvas),
            "n = 0\nfor n in range(3):\n    print(n)\n"
        );
    }

    #[test]
    fn print_splits_arguments_around_variables() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "score").unwrap();
        canvas.set_literal(slot(&canvas, var, "value"), "10").unwrap();
        let print = canvas.instantiate(BlockKind::Print, at());
        canvas
            .set_literal(slot(&canvas, print, "value"), "Score:, score")
            .unwrap();
        let plain = canvas.instantiate(BlockKind::Print, at());
        canvas
            .set_literal(slot(&canvas, plain, "value"), "Hello, world")
            .unwrap();
        assert_eq!(
            generate(&canvas),
            "score = 10\nprint(\"Score:\", score)\nprint(\"Hello, world\")\n"
        );
    }

    #[test]
    fn sanitized_names_are_still_references() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "my var").unwrap();
        canvas.set_literal(slot(&canvas, var, "value"), "3").unwrap();
        let print = canvas.instantiate(BlockKind::Print, at());
        canvas.set_literal(slot(&canvas, print, "value"), "my var").unwrap();
        let other = canvas.instantiate(BlockKind::Print, at());
        canvas.set_literal(slot(&canvas, other, "value"), "my var!").unwrap();
        assert_eq!(
            generate(&canvas),
            "my_var = 3\nprint(my_var)\nprint(\"my var!\")\n"
        );
    }

    #[test]
    fn typed_lines_in_bodies_become_expression_statements() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_name(var, "n").unwrap();
        canvas.set_literal(slot(&canvas, var, "value"), "0").unwrap();
        let loop_block = canvas.instantiate(BlockKind::While, at());
        let body = slot(&canvas, loop_block, "body");
        canvas.push_raw_statement(body, "n").unwrap();
        canvas.push_raw_statement(body, "   ").unwrap();
        canvas.push_raw_statement(body, "42").unwrap();
        let repeat = canvas.instantiate(BlockKind::DoWhile, at());
        canvas
            .push_raw_statement(slot(&canvas, repeat, "body"), "done")
            .unwrap();
        let idle = canvas.instantiate(BlockKind::For, at());
        canvas.push_raw_statement(slot(&canvas, idle, "body"), "").unwrap();
        assert_eq!(
            generate(&canvas),
            "n = 0\n\
             while False:\n    n\n    42\n\
             while True:\n    \"done\"\n    if not (False): break\n\
             for i in range(0):\n    pass\n"
        );
    }

    #[test]
    fn orphan_connector_is_still_valid_source() {
        let mut canvas = Canvas::new();
        canvas.instantiate(BlockKind::Elif, at());
        assert_eq!(
            generate(&canvas),
            "pass  # 'elif' block is not attached to an if\n"
        );
    }

    #[test]
    fn names_become_identifiers() {
        assert_eq!(identifier("my var", "v"), "my_var");
        assert_eq!(identifier("1st", "v"), "_1st");
        assert_eq!(identifier("while", "v"), "while_");
        assert_eq!(identifier("  ", "v"), "v");
    }

    #[test]
    fn generation_is_deterministic() {
        let mut canvas = Canvas::new();
        let var = canvas.instantiate(BlockKind::Variable, at());
        canvas.set_literal(slot(&canvas, var, "value"), "2.5").unwrap();
        let loop_block = canvas.instantiate(BlockKind::DoWhile, at());
        canvas
            .instantiate_into(BlockKind::Print, slot(&canvas, loop_block, "body"))
            .unwrap();
        let first = generate_with_options(&canvas, &CodegenOptions::default());
        let second = generate_with_options(&canvas, &CodegenOptions::default());
        assert_eq!(first, second);
        assert_eq!(first.digest(), second.digest());
        assert_eq!(first.variables, vec!["x".to_string()]);
    }
}
