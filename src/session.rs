use crate::ast::{BlockId, OperatorKind, Point, SlotId};
use crate::canvas::{Canvas, PlacementError, TreeEvent};
use crate::checker::{check_with_options, CheckError, GradeReport, Interpreter, Requirements};
use crate::codegen::{generate_with_options, CodegenOptions, GeneratedProgram};
use crate::placement::{DropOutcome, PlacementEngine, TransferSource};
use tracing::{debug, warn};

type PreviewListener = dyn FnMut(u64, &GeneratedProgram);

/// One editing session: the canvas, the drag state, and the live source preview.
///
/// Every mutation goes through the session. After it commits, the queued tree events are
/// drained and the preview is regenerated exactly once; listeners hear about it only when
/// the generated text actually changed.
pub struct EditorSession {
    canvas: Canvas,
    engine: PlacementEngine,
    options: CodegenOptions,
    preview: GeneratedProgram,
    listeners: Vec<Box<PreviewListener>>,
    notices: Vec<String>,
}

impl Default for EditorSession {
    fn default() -> Self {
        Self::new()
    }
}

impl EditorSession {
    pub fn new() -> Self {
        Self::with_canvas(Canvas::new())
    }

    pub fn with_canvas(canvas: Canvas) -> Self {
        Self::with_options(canvas, CodegenOptions::default())
    }

    pub fn with_options(mut canvas: Canvas, options: CodegenOptions) -> Self {
        canvas.drain_events();
        let preview = generate_with_options(&canvas, &options);
        Self {
            canvas,
            engine: PlacementEngine::new(),
            options,
            preview,
            listeners: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn into_canvas(self) -> Canvas {
        self.canvas
    }

    pub fn preview(&self) -> &str {
        &self.preview.source
    }

    pub fn program(&self) -> &GeneratedProgram {
        &self.preview
    }

    pub fn subscribe<F>(&mut self, listener: F)
    where
        F: FnMut(u64, &GeneratedProgram) + 'static,
    {
        self.listeners.push(Box::new(listener));
    }

    /// User-facing rejection notices collected since the last call.
    pub fn take_notices(&mut self) -> Vec<String> {
        std::mem::take(&mut self.notices)
    }

    pub fn active_transfer(&self) -> Option<TransferSource> {
        self.engine.active()
    }

    pub fn begin_transfer(&mut self, source: TransferSource) {
        self.engine.begin_transfer(source);
    }

    pub fn cancel_transfer(&mut self) {
        self.engine.cancel();
    }

    pub fn drop_at(&mut self, pointer: Point) -> DropOutcome {
        let outcome = self.engine.resolve_drop(&mut self.canvas, pointer);
        self.settle(outcome)
    }

    pub fn activate(&mut self, id: BlockId) -> DropOutcome {
        let outcome = self.engine.activate(&mut self.canvas, id);
        self.settle(outcome)
    }

    pub fn discard(&mut self, id: BlockId) -> DropOutcome {
        let outcome = self.engine.discard(&mut self.canvas, id);
        self.settle(outcome)
    }

    pub fn attach_connector(&mut self, id: BlockId) -> DropOutcome {
        let outcome = self.engine.attach_connector(&mut self.canvas, id);
        self.settle(outcome)
    }

    pub fn set_literal(&mut self, slot: SlotId, text: &str) -> Result<(), PlacementError> {
        let result = self.canvas.set_literal(slot, text);
        self.refresh();
        result
    }

    pub fn type_line(&mut self, slot: SlotId, text: &str) -> Result<usize, PlacementError> {
        let result = self.canvas.push_raw_statement(slot, text);
        self.refresh();
        result
    }

    pub fn remove_line(&mut self, slot: SlotId, index: usize) -> Result<String, PlacementError> {
        let result = self.canvas.remove_raw_statement(slot, index);
        self.refresh();
        result
    }

    pub fn set_name(&mut self, id: BlockId, name: &str) -> Result<(), PlacementError> {
        let result = self.canvas.set_name(id, name);
        self.refresh();
        result
    }

    pub fn set_operator(&mut self, id: BlockId, operator: OperatorKind) -> Result<(), PlacementError> {
        let result = self.canvas.set_operator(id, operator);
        self.refresh();
        result
    }

    /// Runs the checker against the tree as of the last committed mutation.
    pub fn check(
        &self,
        requirements: &Requirements,
        interpreter: &dyn Interpreter,
    ) -> Result<GradeReport, CheckError> {
        check_with_options(&self.canvas, requirements, interpreter, &self.options)
    }

    fn settle(&mut self, outcome: DropOutcome) -> DropOutcome {
        if let Some(notice) = outcome.notice() {
            warn!(%notice, "drop rejected");
            self.notices.push(notice);
        }
        self.refresh();
        outcome
    }

    fn refresh(&mut self) {
        let events = self.canvas.drain_events();
        if events.is_empty() {
            return;
        }
        debug!(
            revision = self.canvas.revision(),
            events = events.len(),
            structural = events.iter().filter(|e| is_structural(e)).count(),
            "regenerating preview"
        );
        let next = generate_with_options(&self.canvas, &self.options);
        if next.source == self.preview.source {
            self.preview = next;
            return;
        }
        self.preview = next;
        let revision = self.canvas.revision();
        for listener in self.listeners.iter_mut() {
            listener(revision, &self.preview);
        }
    }
}

fn is_structural(event: &TreeEvent) -> bool {
    !matches!(
        event,
        TreeEvent::LiteralEdited(_) | TreeEvent::AttributeEdited(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::BlockKind;
    use crate::layout::Geometry;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn preview_follows_committed_drops() {
        let mut session = EditorSession::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        session.subscribe(move |_, program| sink.borrow_mut().push(program.source.clone()));

        session.begin_transfer(TransferSource::Template(BlockKind::Print));
        let outcome = session.drop_at(Point::new(100.0, 100.0));
        let DropOutcome::Freed { block, .. } = outcome else {
            panic!("expected free placement, got {:?}", outcome);
        };
        let slot = session.canvas().slot_named(block, "value").unwrap();
        session.set_literal(slot, "Hello!").unwrap();

        assert_eq!(session.preview(), "print(\"Hello!\")\n");
        assert_eq!(
            *seen.borrow(),
            vec!["print()\n".to_string(), "print(\"Hello!\")\n".to_string()]
        );
    }

    #[test]
    fn rejected_drop_leaves_preview_and_listeners_alone() {
        let mut session = EditorSession::new();
        let calls = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&calls);
        session.subscribe(move |_, _| *counter.borrow_mut() += 1);

        session.begin_transfer(TransferSource::Template(BlockKind::Operator));
        let outcome = session.drop_at(Point::new(50.0, 50.0));
        assert!(!outcome.is_committed());
        assert_eq!(session.preview(), "");
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(session.take_notices().len(), 1);
        assert!(session.take_notices().is_empty());
    }

    #[test]
    fn drag_print_into_loop_body() {
        let mut session = EditorSession::new();
        session.begin_transfer(TransferSource::Template(BlockKind::While));
        session.drop_at(Point::new(0.0, 0.0));
        let loop_block = session.canvas().free_blocks()[0];
        let body = session.canvas().slot_named(loop_block, "body").unwrap();
        let target = Geometry::compute(session.canvas())
            .slot_rect(body)
            .unwrap()
            .center();
        session.begin_transfer(TransferSource::Template(BlockKind::Print));
        assert!(session.drop_at(target).is_committed());
        assert_eq!(session.preview(), "while False:\n    print()\n");
    }

    #[test]
    fn typed_lines_regenerate_the_preview() {
        let mut canvas = Canvas::new();
        let loop_block = canvas.instantiate(BlockKind::While, Point::new(0.0, 0.0));
        let mut session = EditorSession::with_canvas(canvas);
        let body = session.canvas().slot_named(loop_block, "body").unwrap();
        let condition = session.canvas().slot_named(loop_block, "condition").unwrap();

        assert_eq!(session.type_line(body, "7"), Ok(0));
        assert_eq!(session.preview(), "while False:\n    7\n");
        assert_eq!(
            session.type_line(condition, "7"),
            Err(PlacementError::NotAStatementSlot(condition))
        );
        assert_eq!(session.remove_line(body, 0), Ok("7".to_string()));
        assert_eq!(session.preview(), "while False:\n    pass\n");
    }
}
