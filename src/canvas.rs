use crate::ast::{
    Block, BlockId, BlockKind, OperatorKind, Parent, Point, Rect, Slot, SlotContent, SlotId,
    Statement,
};
use crate::nesting::{can_nest, Candidate, NestTarget};
use crate::templates::template_for;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

const DEFAULT_BOUNDS: Rect = Rect {
    x: 0.0,
    y: 0.0,
    width: 1600.0,
    height: 1200.0,
};
const EVICTION_OFFSET: f64 = 24.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementError {
    UnknownBlock(BlockId),
    UnknownSlot(SlotId),
    Rejected { kind: BlockKind, target: String },
    Cycle(BlockId),
    NotAConnector(BlockId),
    NotAChain(BlockId),
    DuplicateElse(BlockId),
    NotAValueSlot(SlotId),
    NotAStatementSlot(SlotId),
    UnknownEntry { slot: SlotId, index: usize },
    NoActiveTransfer,
}

impl Display for PlacementError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PlacementError::UnknownBlock(id) => write!(f, "Block {} does not exist.", id),
            PlacementError::UnknownSlot(slot) => {
                write!(f, "Slot {} of block {} does not exist.", slot.index, slot.host)
            }
            PlacementError::Rejected { kind, target } => {
                write!(f, "Can't drop a '{}' block {}.", kind, target)
            }
            PlacementError::Cycle(id) => {
                write!(f, "Can't drop block {} inside itself.", id)
            }
            PlacementError::NotAConnector(id) => {
                write!(f, "Block {} is not an elif/else connector.", id)
            }
            PlacementError::NotAChain(id) => write!(f, "Block {} is not an if block.", id),
            PlacementError::DuplicateElse(id) => {
                write!(f, "If block {} already has an else branch.", id)
            }
            PlacementError::NotAValueSlot(slot) => write!(
                f,
                "Slot {} of block {} does not take a typed value.",
                slot.index, slot.host
            ),
            PlacementError::NotAStatementSlot(slot) => write!(
                f,
                "Slot {} of block {} is not a statement body.",
                slot.index, slot.host
            ),
            PlacementError::UnknownEntry { slot, index } => write!(
                f,
                "Slot {} of block {} has no typed line at position {}.",
                slot.index, slot.host, index
            ),
            PlacementError::NoActiveTransfer => write!(f, "Nothing is being dragged."),
        }
    }
}

impl Error for PlacementError {}

/// A committed structural change. Queued on the canvas and drained by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    Created(BlockId),
    Nested {
        block: BlockId,
        slot: SlotId,
        evicted: Option<BlockId>,
    },
    Connected {
        block: BlockId,
        chain: BlockId,
    },
    Freed(BlockId),
    Discarded(Vec<BlockId>),
    LiteralEdited(SlotId),
    AttributeEdited(BlockId),
}

/// The canvas root: an arena of blocks plus the ordered list of free blocks.
#[derive(Debug, Clone)]
pub struct Canvas {
    blocks: BTreeMap<BlockId, Block>,
    roots: Vec<BlockId>,
    next_id: usize,
    revision: u64,
    events: Vec<TreeEvent>,
    pub bounds: Rect,
    pub discard_zone: Option<Rect>,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_BOUNDS)
    }

    pub fn with_bounds(bounds: Rect) -> Self {
        Self {
            blocks: BTreeMap::new(),
            roots: Vec::new(),
            next_id: 1,
            revision: 0,
            events: Vec::new(),
            bounds,
            discard_zone: None,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Free blocks in canvas insertion order.
    pub fn free_blocks(&self) -> &[BlockId] {
        &self.roots
    }

    pub fn slot(&self, slot: SlotId) -> Option<&Slot> {
        self.blocks.get(&slot.host)?.slots.get(slot.index)
    }

    pub fn slot_named(&self, host: BlockId, name: &str) -> Option<SlotId> {
        let index = self.blocks.get(&host)?.slot_index(name)?;
        Some(SlotId::new(host, index))
    }

    pub fn nest_target(&self, slot: SlotId) -> Result<NestTarget, PlacementError> {
        let host = self
            .blocks
            .get(&slot.host)
            .ok_or(PlacementError::UnknownSlot(slot))?;
        let shape = host
            .slots
            .get(slot.index)
            .ok_or(PlacementError::UnknownSlot(slot))?
            .shape();
        Ok(NestTarget::Slot {
            host: host.kind,
            shape,
        })
    }

    pub fn drain_events(&mut self) -> Vec<TreeEvent> {
        std::mem::take(&mut self.events)
    }

    fn commit(&mut self, event: TreeEvent) {
        self.revision += 1;
        self.events.push(event);
    }

    /// Preorder walk: each free block, then its slot children, then its chain.
    pub fn traverse(&self) -> Vec<BlockId> {
        let mut out = Vec::with_capacity(self.blocks.len());
        for root in &self.roots {
            self.walk(*root, &mut out);
        }
        out
    }

    pub fn subtree(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        if self.blocks.contains_key(&id) {
            self.walk(id, &mut out);
        }
        out
    }

    fn walk(&self, id: BlockId, out: &mut Vec<BlockId>) {
        let Some(block) = self.blocks.get(&id) else {
            return;
        };
        out.push(id);
        for slot in &block.slots {
            for child in slot.children() {
                self.walk(child, out);
            }
        }
        for connector in &block.chain {
            self.walk(*connector, out);
        }
    }

    pub fn kinds_present(&self) -> BTreeSet<BlockKind> {
        self.blocks.values().map(|b| b.kind).collect()
    }

    /// True when `ancestor` owns `id` directly or transitively (or they are the same block).
    pub fn is_within(&self, id: BlockId, ancestor: BlockId) -> bool {
        let mut current = Some(id);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            current = match self.blocks.get(&cur).map(|b| b.parent) {
                Some(Parent::Slot(slot)) => Some(slot.host),
                Some(Parent::Chain(host)) => Some(host),
                _ => None,
            };
        }
        false
    }

    /// Creates a free block from the template catalogue.
    pub fn instantiate(&mut self, kind: BlockKind, position: Point) -> BlockId {
        let id = self.spawn(kind, position);
        self.commit(TreeEvent::Created(id));
        id
    }

    fn spawn(&mut self, kind: BlockKind, position: Point) -> BlockId {
        let id = BlockId(self.next_id);
        self.next_id += 1;
        let template = template_for(kind);
        self.blocks.insert(
            id,
            Block {
                id,
                kind,
                name: template.default_name.to_string(),
                operator: template.default_operator,
                literal: None,
                slots: template.slots,
                chain: Vec::new(),
                parent: Parent::Free,
                position,
            },
        );
        self.roots.push(id);
        id
    }

    /// Instantiates a template straight into a slot, or not at all.
    pub fn instantiate_into(
        &mut self,
        kind: BlockKind,
        slot: SlotId,
    ) -> Result<(BlockId, Option<BlockId>), PlacementError> {
        let target = self.nest_target(slot)?;
        if !can_nest(target, Candidate::Block(kind)) {
            return Err(rejected(kind, target));
        }
        let position = self
            .blocks
            .get(&slot.host)
            .map(|b| b.position)
            .unwrap_or_default();
        let id = self.spawn(kind, position);
        self.events.push(TreeEvent::Created(id));
        let evicted = self.attach(id, slot)?;
        Ok((id, evicted))
    }

    /// Nests `id` into `slot`. A value slot's previous occupant is evicted to free placement.
    pub fn attach(&mut self, id: BlockId, slot: SlotId) -> Result<Option<BlockId>, PlacementError> {
        let kind = self
            .blocks
            .get(&id)
            .ok_or(PlacementError::UnknownBlock(id))?
            .kind;
        let target = self.nest_target(slot)?;
        if !can_nest(target, Candidate::Block(kind)) {
            return Err(rejected(kind, target));
        }
        if self.is_within(slot.host, id) {
            return Err(PlacementError::Cycle(id));
        }

        let occupant = match self.slot(slot).map(|s| &s.content) {
            Some(SlotContent::Value {
                child: Some(child), ..
            }) if *child != id => Some(*child),
            _ => None,
        };
        if let Some(evicted) = occupant {
            let host_position = self.anchor_position(slot.host);
            self.detach(evicted);
            self.make_free(
                evicted,
                Point::new(
                    host_position.x + EVICTION_OFFSET,
                    host_position.y + EVICTION_OFFSET,
                ),
            );
        }

        self.detach(id);
        let host = self
            .blocks
            .get_mut(&slot.host)
            .ok_or(PlacementError::UnknownSlot(slot))?;
        match &mut host.slots[slot.index].content {
            SlotContent::Value { child, .. } => *child = Some(id),
            SlotContent::Statements(entries) => entries.push(Statement::Block(id)),
        }
        if let Some(block) = self.blocks.get_mut(&id) {
            block.parent = Parent::Slot(slot);
        }
        self.commit(TreeEvent::Nested {
            block: id,
            slot,
            evicted: occupant,
        });
        Ok(occupant)
    }

    /// Moves a block to free placement. Only statement-shaped kinds may sit on the canvas.
    pub fn detach_to_free(&mut self, id: BlockId, position: Point) -> Result<(), PlacementError> {
        let kind = self
            .blocks
            .get(&id)
            .ok_or(PlacementError::UnknownBlock(id))?
            .kind;
        if !can_nest(NestTarget::Canvas, Candidate::Block(kind)) {
            return Err(rejected(kind, NestTarget::Canvas));
        }
        let already_free = self.blocks.get(&id).is_some_and(|b| b.is_free());
        if !already_free {
            self.detach(id);
            self.make_free(id, position);
        } else if let Some(block) = self.blocks.get_mut(&id) {
            block.position = position;
        }
        self.commit(TreeEvent::Freed(id));
        Ok(())
    }

    /// Appends an elif/else connector to an if chain, keeping any else last.
    pub fn attach_connector(&mut self, id: BlockId, chain: BlockId) -> Result<(), PlacementError> {
        let kind = self
            .blocks
            .get(&id)
            .ok_or(PlacementError::UnknownBlock(id))?
            .kind;
        if !kind.is_connector() {
            return Err(PlacementError::NotAConnector(id));
        }
        self.check_connector(kind, Some(id), chain)?;

        self.detach(id);
        let mut connectors = self
            .blocks
            .get(&chain)
            .map(|b| b.chain.clone())
            .unwrap_or_default();
        connectors.push(id);
        // stable: elifs keep their insertion order
        connectors.sort_by_key(|c| {
            self.blocks
                .get(c)
                .is_some_and(|b| b.kind == BlockKind::Else)
        });
        if let Some(host) = self.blocks.get_mut(&chain) {
            host.chain = connectors;
        }
        if let Some(block) = self.blocks.get_mut(&id) {
            block.parent = Parent::Chain(chain);
        }
        self.commit(TreeEvent::Connected { block: id, chain });
        Ok(())
    }

    /// Whether a connector of `kind` (optionally the existing block `id`) may join `chain`.
    pub fn check_connector(
        &self,
        kind: BlockKind,
        id: Option<BlockId>,
        chain: BlockId,
    ) -> Result<(), PlacementError> {
        let host = self
            .blocks
            .get(&chain)
            .ok_or(PlacementError::UnknownBlock(chain))?;
        if host.kind != BlockKind::If {
            return Err(PlacementError::NotAChain(chain));
        }
        if let Some(id) = id {
            if self.is_within(chain, id) {
                return Err(PlacementError::Cycle(id));
            }
        }
        if kind == BlockKind::Else {
            let has_other_else = host.chain.iter().any(|c| {
                Some(*c) != id
                    && self
                        .blocks
                        .get(c)
                        .is_some_and(|b| b.kind == BlockKind::Else)
            });
            if has_other_else {
                return Err(PlacementError::DuplicateElse(chain));
            }
        }
        Ok(())
    }

    /// Removes a block together with its whole subtree.
    pub fn discard(&mut self, id: BlockId) -> Result<Vec<BlockId>, PlacementError> {
        if !self.blocks.contains_key(&id) {
            return Err(PlacementError::UnknownBlock(id));
        }
        let removed = self.subtree(id);
        self.detach(id);
        self.roots.retain(|r| *r != id);
        for gone in &removed {
            self.blocks.remove(gone);
        }
        self.commit(TreeEvent::Discarded(removed.clone()));
        Ok(removed)
    }

    pub fn set_literal(&mut self, slot: SlotId, text: &str) -> Result<(), PlacementError> {
        let host = self
            .blocks
            .get_mut(&slot.host)
            .ok_or(PlacementError::UnknownSlot(slot))?;
        let target = host
            .slots
            .get_mut(slot.index)
            .ok_or(PlacementError::UnknownSlot(slot))?;
        match &mut target.content {
            SlotContent::Value { literal, .. } => *literal = text.to_string(),
            SlotContent::Statements(_) => return Err(PlacementError::NotAValueSlot(slot)),
        }
        self.commit(TreeEvent::LiteralEdited(slot));
        Ok(())
    }

    /// Types a raw value into a statement body as a line of its own; returns its entry index.
    pub fn push_raw_statement(&mut self, slot: SlotId, text: &str) -> Result<usize, PlacementError> {
        let target = self.nest_target(slot)?;
        if !can_nest(target, Candidate::RawValue) {
            return Err(PlacementError::NotAValueSlot(slot));
        }
        let entries = match self.slot_content_mut(slot)? {
            SlotContent::Statements(entries) => entries,
            SlotContent::Value { .. } => return Err(PlacementError::NotAStatementSlot(slot)),
        };
        entries.push(Statement::Raw(text.to_string()));
        let index = entries.len() - 1;
        self.commit(TreeEvent::LiteralEdited(slot));
        Ok(index)
    }

    /// Removes a typed line from a statement body. Nested blocks are removed through `discard`.
    pub fn remove_raw_statement(&mut self, slot: SlotId, index: usize) -> Result<String, PlacementError> {
        let entries = match self.slot_content_mut(slot)? {
            SlotContent::Statements(entries) => entries,
            SlotContent::Value { .. } => return Err(PlacementError::NotAStatementSlot(slot)),
        };
        let text = match entries.get(index) {
            Some(Statement::Raw(text)) => text.clone(),
            _ => return Err(PlacementError::UnknownEntry { slot, index }),
        };
        entries.remove(index);
        self.commit(TreeEvent::LiteralEdited(slot));
        Ok(text)
    }

    fn slot_content_mut(&mut self, slot: SlotId) -> Result<&mut SlotContent, PlacementError> {
        self.blocks
            .get_mut(&slot.host)
            .and_then(|host| host.slots.get_mut(slot.index))
            .map(|target| &mut target.content)
            .ok_or(PlacementError::UnknownSlot(slot))
    }

    pub fn set_name(&mut self, id: BlockId, name: &str) -> Result<(), PlacementError> {
        self.edit(id, |block| block.name = name.to_string())
    }

    pub fn set_operator(&mut self, id: BlockId, operator: OperatorKind) -> Result<(), PlacementError> {
        self.edit(id, |block| block.operator = Some(operator))
    }

    pub fn set_literal_override(
        &mut self,
        id: BlockId,
        literal: Option<&str>,
    ) -> Result<(), PlacementError> {
        self.edit(id, |block| block.literal = literal.map(ToString::to_string))
    }

    fn edit<F>(&mut self, id: BlockId, apply: F) -> Result<(), PlacementError>
    where
        F: FnOnce(&mut Block),
    {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(PlacementError::UnknownBlock(id))?;
        apply(block);
        self.commit(TreeEvent::AttributeEdited(id));
        Ok(())
    }

    /// Unlinks a block from whatever owns it. The vacated value slot keeps its literal input.
    fn detach(&mut self, id: BlockId) {
        let Some(parent) = self.blocks.get(&id).map(|b| b.parent) else {
            return;
        };
        match parent {
            Parent::Free => self.roots.retain(|r| *r != id),
            Parent::Slot(slot) => {
                if let Some(host) = self.blocks.get_mut(&slot.host) {
                    if let Some(target) = host.slots.get_mut(slot.index) {
                        match &mut target.content {
                            SlotContent::Value { child, .. } => {
                                if *child == Some(id) {
                                    *child = None;
                                }
                            }
                            SlotContent::Statements(entries) => {
                                entries.retain(|e| e.block() != Some(id))
                            }
                        }
                    }
                }
            }
            Parent::Chain(host) => {
                if let Some(host) = self.blocks.get_mut(&host) {
                    host.chain.retain(|c| *c != id);
                }
            }
        }
        if let Some(block) = self.blocks.get_mut(&id) {
            block.parent = Parent::Free;
        }
    }

    fn make_free(&mut self, id: BlockId, position: Point) {
        if let Some(block) = self.blocks.get_mut(&id) {
            block.parent = Parent::Free;
            block.position = position;
        }
        if !self.roots.contains(&id) {
            self.roots.push(id);
        }
    }

    /// Position of the free block that ultimately owns `id`.
    pub fn anchor_position(&self, id: BlockId) -> Point {
        let mut current = id;
        loop {
            match self.blocks.get(&current).map(|b| (b.parent, b.position)) {
                Some((Parent::Slot(slot), _)) => current = slot.host,
                Some((Parent::Chain(host), _)) => current = host,
                Some((Parent::Free, position)) => return position,
                None => return Point::default(),
            }
        }
    }

    /// Checks the ownership invariants; returns a description of the first violation.
    pub fn verify(&self) -> Result<(), String> {
        let mut owners: BTreeMap<BlockId, usize> = BTreeMap::new();
        for root in &self.roots {
            *owners.entry(*root).or_default() += 1;
        }
        for block in self.blocks.values() {
            for (index, slot) in block.slots.iter().enumerate() {
                if let SlotContent::Value { child: Some(_), .. } = slot.content {
                    if slot.children().len() > 1 {
                        return Err(format!("value slot {} of {} is overfull", index, block.id));
                    }
                }
                for child in slot.children() {
                    *owners.entry(child).or_default() += 1;
                    let expected = Parent::Slot(SlotId::new(block.id, index));
                    if self.blocks.get(&child).map(|c| c.parent) != Some(expected) {
                        return Err(format!("{} has a stale parent link", child));
                    }
                }
            }
            for connector in &block.chain {
                *owners.entry(*connector).or_default() += 1;
                if self.blocks.get(connector).map(|c| c.parent) != Some(Parent::Chain(block.id)) {
                    return Err(format!("{} has a stale chain link", connector));
                }
            }
            let else_at = block
                .chain
                .iter()
                .position(|c| self.blocks.get(c).is_some_and(|b| b.kind == BlockKind::Else));
            if let Some(pos) = else_at {
                if pos + 1 != block.chain.len() {
                    return Err(format!("else of {} is not last", block.id));
                }
            }
        }
        for id in self.blocks.keys() {
            match owners.get(id).copied().unwrap_or(0) {
                1 => {}
                n => return Err(format!("{} has {} owners", id, n)),
            }
        }
        if owners.len() != self.blocks.len() {
            return Err("an owner references a missing block".to_string());
        }
        Ok(())
    }
}

fn rejected(kind: BlockKind, target: NestTarget) -> PlacementError {
    let target = match target {
        NestTarget::Canvas => "on the canvas".to_string(),
        NestTarget::Slot { host, .. } => format!("into a '{}' block", host),
    };
    PlacementError::Rejected { kind, target }
}
