use crate::ast::{BlockId, BlockKind, Parent, Point, SlotId};
use crate::canvas::{Canvas, PlacementError};
use crate::layout::Geometry;
use crate::nesting::{can_nest, Candidate, NestTarget};
use tracing::debug;

/// What the in-flight drag carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSource {
    Existing(BlockId),
    Template(BlockKind),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DropOutcome {
    Nested {
        block: BlockId,
        slot: SlotId,
        evicted: Option<BlockId>,
    },
    Connected {
        block: BlockId,
        chain: BlockId,
    },
    Freed {
        block: BlockId,
        position: Point,
    },
    Discarded(Vec<BlockId>),
    /// Nothing happened; the tree is exactly as before the transfer began.
    Abandoned,
    Rejected(PlacementError),
}

impl DropOutcome {
    pub fn is_committed(&self) -> bool {
        !matches!(self, DropOutcome::Abandoned | DropOutcome::Rejected(_))
    }

    /// User-facing notice for drops that did not go through.
    pub fn notice(&self) -> Option<String> {
        match self {
            DropOutcome::Rejected(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

impl From<PlacementError> for DropOutcome {
    fn from(err: PlacementError) -> Self {
        DropOutcome::Rejected(err)
    }
}

/// Direct-manipulation state. At most one transfer is in flight.
#[derive(Debug, Clone, Default)]
pub struct PlacementEngine {
    active: Option<TransferSource>,
}

impl PlacementEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<TransferSource> {
        self.active
    }

    pub fn begin_transfer(&mut self, source: TransferSource) {
        if let Some(previous) = self.active.replace(source) {
            debug!(?previous, ?source, "replacing unfinished transfer");
        }
    }

    pub fn cancel(&mut self) -> Option<TransferSource> {
        self.active.take()
    }

    pub fn resolve_drop(&mut self, canvas: &mut Canvas, pointer: Point) -> DropOutcome {
        let Some(source) = self.active.take() else {
            return PlacementError::NoActiveTransfer.into();
        };
        let (kind, moving) = match source {
            TransferSource::Template(kind) => (kind, None),
            TransferSource::Existing(id) => match canvas.block(id) {
                Some(block) => (block.kind, Some(id)),
                None => return PlacementError::UnknownBlock(id).into(),
            },
        };

        if !canvas.bounds.contains(pointer) {
            debug!(?source, x = pointer.x, y = pointer.y, "drop outside canvas, transfer abandoned");
            return DropOutcome::Abandoned;
        }
        if canvas.discard_zone.is_some_and(|zone| zone.contains(pointer)) {
            return match moving {
                Some(id) => self.discard(canvas, id),
                None => DropOutcome::Abandoned,
            };
        }

        let geometry = Geometry::compute(canvas);
        if kind.is_connector() {
            if let Some(chain) = nearest_chain(canvas, &geometry, pointer, moving) {
                return connect(canvas, kind, moving, chain);
            }
        } else {
            let hit = geometry.slot_at(pointer, |slot| {
                moving.is_some_and(|m| canvas.is_within(slot.host, m))
            });
            if let Some(slot) = hit {
                let accepted = canvas
                    .nest_target(slot)
                    .map(|target| can_nest(target, Candidate::Block(kind)))
                    .unwrap_or(false);
                if accepted {
                    return nest(canvas, kind, moving, slot);
                }
                debug!(%kind, host = %slot.host, "slot refused block, trying free placement");
            }
        }
        place_free(canvas, kind, moving, pointer)
    }

    /// Double-activation: a nested block jumps back to free placement where it is drawn.
    pub fn activate(&mut self, canvas: &mut Canvas, id: BlockId) -> DropOutcome {
        self.active = None;
        let Some(block) = canvas.block(id) else {
            return PlacementError::UnknownBlock(id).into();
        };
        if block.is_free() {
            return DropOutcome::Abandoned;
        }
        let position = Geometry::compute(canvas)
            .block_rect(id)
            .map(|r| r.origin())
            .unwrap_or_else(|| canvas.anchor_position(id));
        match canvas.detach_to_free(id, position) {
            Ok(()) => {
                debug!(block = %id, "detached by double activation");
                DropOutcome::Freed { block: id, position }
            }
            Err(err) => err.into(),
        }
    }

    pub fn discard(&mut self, canvas: &mut Canvas, id: BlockId) -> DropOutcome {
        self.active = None;
        match canvas.discard(id) {
            Ok(removed) => {
                debug!(block = %id, removed = removed.len(), "discarded subtree");
                DropOutcome::Discarded(removed)
            }
            Err(err) => err.into(),
        }
    }

    /// Attaches an existing elif/else to the if chain closest to where it is drawn.
    pub fn attach_connector(&mut self, canvas: &mut Canvas, id: BlockId) -> DropOutcome {
        self.active = None;
        let Some(block) = canvas.block(id) else {
            return PlacementError::UnknownBlock(id).into();
        };
        if !block.kind.is_connector() {
            return PlacementError::NotAConnector(id).into();
        }
        let kind = block.kind;
        let geometry = Geometry::compute(canvas);
        let center = geometry
            .block_rect(id)
            .map(|r| r.center())
            .unwrap_or(block.position);
        match nearest_chain(canvas, &geometry, center, Some(id)) {
            Some(chain) => connect(canvas, kind, Some(id), chain),
            None => DropOutcome::Abandoned,
        }
    }
}

/// The `If` whose center is closest to `point`. Equal distances keep the earlier block.
pub fn nearest_chain(
    canvas: &Canvas,
    geometry: &Geometry,
    point: Point,
    moving: Option<BlockId>,
) -> Option<BlockId> {
    let mut best: Option<(BlockId, f64)> = None;
    for id in canvas.traverse() {
        let is_if = canvas.block(id).is_some_and(|b| b.kind == BlockKind::If);
        if !is_if || moving.is_some_and(|m| canvas.is_within(id, m)) {
            continue;
        }
        let Some(rect) = geometry.block_rect(id) else {
            continue;
        };
        let distance = rect.center().distance(point);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((id, distance));
        }
    }
    best.map(|(id, _)| id)
}

fn nest(canvas: &mut Canvas, kind: BlockKind, moving: Option<BlockId>, slot: SlotId) -> DropOutcome {
    let result = match moving {
        Some(id) => canvas.attach(id, slot).map(|evicted| (id, evicted)),
        None => canvas.instantiate_into(kind, slot),
    };
    match result {
        Ok((block, evicted)) => {
            debug!(block = %block, host = %slot.host, slot = slot.index, ?evicted, "nested block");
            DropOutcome::Nested {
                block,
                slot,
                evicted,
            }
        }
        Err(err) => err.into(),
    }
}

fn connect(
    canvas: &mut Canvas,
    kind: BlockKind,
    moving: Option<BlockId>,
    chain: BlockId,
) -> DropOutcome {
    if let Err(err) = canvas.check_connector(kind, moving, chain) {
        return err.into();
    }
    let id = match moving {
        Some(id) => id,
        None => {
            let position = canvas.block(chain).map(|b| b.position).unwrap_or_default();
            canvas.instantiate(kind, position)
        }
    };
    match canvas.attach_connector(id, chain) {
        Ok(()) => {
            debug!(block = %id, chain = %chain, "connected to if chain");
            DropOutcome::Connected { block: id, chain }
        }
        Err(err) => err.into(),
    }
}

fn place_free(
    canvas: &mut Canvas,
    kind: BlockKind,
    moving: Option<BlockId>,
    pointer: Point,
) -> DropOutcome {
    if !can_nest(NestTarget::Canvas, Candidate::Block(kind)) {
        return PlacementError::Rejected {
            kind,
            target: "on the canvas".to_string(),
        }
        .into();
    }
    let block = match moving {
        Some(id) => {
            if let Err(err) = canvas.detach_to_free(id, pointer) {
                return err.into();
            }
            id
        }
        None => canvas.instantiate(kind, pointer),
    };
    debug!(block = %block, x = pointer.x, y = pointer.y, "placed free");
    DropOutcome::Freed {
        block,
        position: pointer,
    }
}

/// True when the block currently hangs off an if chain.
pub fn is_connected(canvas: &Canvas, id: BlockId) -> bool {
    matches!(canvas.block(id).map(|b| b.parent), Some(Parent::Chain(_)))
}
