use crate::ast::{BlockId, Point, Rect, SlotContent, SlotId, SlotShape, Statement};
use crate::canvas::Canvas;
use std::collections::BTreeMap;

pub const ROW_HEIGHT: f64 = 32.0;
pub const LABEL_WIDTH: f64 = 64.0;
pub const VALUE_WIDTH: f64 = 72.0;
pub const INSET: f64 = 4.0;
pub const GAP: f64 = 6.0;
pub const INDENT: f64 = 24.0;
pub const EMPTY_BODY_HEIGHT: f64 = 24.0;
pub const MIN_BLOCK_WIDTH: f64 = 160.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlotGeometry {
    pub slot: SlotId,
    pub shape: SlotShape,
    pub rect: Rect,
    pub depth: usize,
}

/// Absolute rectangles for every live block and slot, in paint order.
#[derive(Debug, Clone, Default)]
pub struct Geometry {
    pub blocks: BTreeMap<BlockId, Rect>,
    pub slots: Vec<SlotGeometry>,
}

impl Geometry {
    pub fn compute(canvas: &Canvas) -> Self {
        let mut geometry = Geometry::default();
        for root in canvas.free_blocks() {
            if let Some(block) = canvas.block(*root) {
                geometry.place(canvas, *root, block.position, 0);
            }
        }
        geometry
    }

    pub fn block_rect(&self, id: BlockId) -> Option<Rect> {
        self.blocks.get(&id).copied()
    }

    pub fn slot_rect(&self, slot: SlotId) -> Option<Rect> {
        self.slots.iter().find(|g| g.slot == slot).map(|g| g.rect)
    }

    /// The topmost slot under `point`: deepest nesting wins, later paint order breaks ties.
    pub fn slot_at<F>(&self, point: Point, skip: F) -> Option<SlotId>
    where
        F: Fn(SlotId) -> bool,
    {
        let mut best: Option<&SlotGeometry> = None;
        for candidate in &self.slots {
            if !candidate.rect.contains(point) || skip(candidate.slot) {
                continue;
            }
            if best.map_or(true, |b| candidate.depth >= b.depth) {
                best = Some(candidate);
            }
        }
        best.map(|g| g.slot)
    }

    /// Lays out one block (and its connectors) at `origin`; returns the rectangle of the group.
    fn place(&mut self, canvas: &Canvas, id: BlockId, origin: Point, depth: usize) -> Rect {
        let Some(block) = canvas.block(id) else {
            return Rect::new(origin.x, origin.y, 0.0, 0.0);
        };
        let mut y = origin.y;
        let mut width = MIN_BLOCK_WIDTH;
        // (cursor x, row top, row height) of the open inline row
        let mut row: Option<(f64, f64, f64)> = None;

        for (index, slot) in block.slots.iter().enumerate() {
            let slot_id = SlotId::new(id, index);
            match &slot.content {
                SlotContent::Value { child, .. } => {
                    let (cursor, top, height) =
                        row.unwrap_or((origin.x + LABEL_WIDTH, y, ROW_HEIGHT));
                    let at = Point::new(cursor, top + INSET);
                    let rect = match child {
                        Some(child) => self.place(canvas, *child, at, depth + 1),
                        None => Rect::new(at.x, at.y, VALUE_WIDTH, ROW_HEIGHT - 2.0 * INSET),
                    };
                    self.slots.push(SlotGeometry {
                        slot: slot_id,
                        shape: SlotShape::Value,
                        rect,
                        depth,
                    });
                    let next = cursor + rect.width + GAP;
                    width = width.max(next - origin.x);
                    row = Some((next, top, height.max(rect.height + 2.0 * INSET)));
                }
                SlotContent::Statements(entries) => {
                    match row.take() {
                        Some((_, _, height)) => y += height,
                        None if index == 0 => y += ROW_HEIGHT,
                        None => {}
                    }
                    let x = origin.x + INDENT;
                    let top = y;
                    let mut body_width = MIN_BLOCK_WIDTH - INDENT;
                    for entry in entries {
                        let rect = match entry {
                            Statement::Block(child) => {
                                self.place(canvas, *child, Point::new(x, y), depth + 1)
                            }
                            // typed lines render as a single input row
                            Statement::Raw(_) => Rect::new(x, y, VALUE_WIDTH, ROW_HEIGHT),
                        };
                        y += rect.height;
                        body_width = body_width.max(rect.width);
                    }
                    let height = (y - top).max(EMPTY_BODY_HEIGHT);
                    y = top + height;
                    width = width.max(INDENT + body_width);
                    self.slots.push(SlotGeometry {
                        slot: slot_id,
                        shape: SlotShape::Statement,
                        rect: Rect::new(x, top, body_width, height),
                        depth,
                    });
                }
            }
        }
        match row {
            Some((_, _, height)) => y += height,
            None if block.slots.is_empty() => y += ROW_HEIGHT,
            None => {}
        }

        let own = Rect::new(origin.x, origin.y, width, y - origin.y);
        self.blocks.insert(id, own);

        let mut group = own;
        for connector in &block.chain {
            let rect = self.place(
                canvas,
                *connector,
                Point::new(origin.x, group.y + group.height),
                depth,
            );
            group.width = group.width.max(rect.width);
            group.height += rect.height;
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BlockKind;

    #[test]
    fn empty_print_has_one_inline_slot() {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, Point::new(10.0, 20.0));
        let geometry = Geometry::compute(&canvas);
        assert_eq!(
            geometry.block_rect(print),
            Some(Rect::new(10.0, 20.0, MIN_BLOCK_WIDTH, ROW_HEIGHT))
        );
        let slot = canvas.slot_named(print, "value").unwrap();
        assert_eq!(
            geometry.slot_rect(slot),
            Some(Rect::new(74.0, 24.0, VALUE_WIDTH, ROW_HEIGHT - 2.0 * INSET))
        );
    }

    #[test]
    fn body_children_stack_vertically() {
        let mut canvas = Canvas::new();
        let loop_block = canvas.instantiate(BlockKind::While, Point::new(0.0, 0.0));
        let body = canvas.slot_named(loop_block, "body").unwrap();
        let (first, _) = canvas.instantiate_into(BlockKind::Print, body).unwrap();
        let (second, _) = canvas.instantiate_into(BlockKind::Print, body).unwrap();
        let geometry = Geometry::compute(&canvas);
        let a = geometry.block_rect(first).unwrap();
        let b = geometry.block_rect(second).unwrap();
        assert_eq!(a.origin(), Point::new(INDENT, ROW_HEIGHT));
        assert_eq!(b.origin(), Point::new(INDENT, ROW_HEIGHT * 2.0));
        let whole = geometry.block_rect(loop_block).unwrap();
        assert_eq!(whole.height, ROW_HEIGHT * 3.0);
    }

    #[test]
    fn typed_lines_take_a_row_in_the_body() {
        let mut canvas = Canvas::new();
        let loop_block = canvas.instantiate(BlockKind::While, Point::new(0.0, 0.0));
        let body = canvas.slot_named(loop_block, "body").unwrap();
        canvas.push_raw_statement(body, "x").unwrap();
        let (print, _) = canvas.instantiate_into(BlockKind::Print, body).unwrap();
        let geometry = Geometry::compute(&canvas);
        assert_eq!(
            geometry.block_rect(print).unwrap().origin(),
            Point::new(INDENT, ROW_HEIGHT * 2.0)
        );
        assert_eq!(geometry.block_rect(loop_block).unwrap().height, ROW_HEIGHT * 3.0);
    }

    #[test]
    fn deepest_slot_is_topmost() {
        let mut canvas = Canvas::new();
        let print = canvas.instantiate(BlockKind::Print, Point::new(0.0, 0.0));
        let value = canvas.slot_named(print, "value").unwrap();
        let (op, _) = canvas.instantiate_into(BlockKind::Operator, value).unwrap();
        let geometry = Geometry::compute(&canvas);
        let left = canvas.slot_named(op, "left").unwrap();
        let left_rect = geometry.slot_rect(left).unwrap();
        assert_eq!(geometry.slot_at(left_rect.center(), |_| false), Some(left));
        // with the operator excluded only the print's own slot remains
        assert_eq!(
            geometry.slot_at(left_rect.center(), |s| s.host == op),
            Some(value)
        );
    }

    #[test]
    fn chain_hangs_below_the_if() {
        let mut canvas = Canvas::new();
        let if_block = canvas.instantiate(BlockKind::If, Point::new(0.0, 0.0));
        let else_block = canvas.instantiate(BlockKind::Else, Point::new(500.0, 500.0));
        canvas.attach_connector(else_block, if_block).unwrap();
        let geometry = Geometry::compute(&canvas);
        let own = geometry.block_rect(if_block).unwrap();
        let tail = geometry.block_rect(else_block).unwrap();
        assert_eq!(tail.origin(), Point::new(0.0, own.height));
    }
}
