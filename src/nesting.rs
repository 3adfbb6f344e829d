use crate::ast::{BlockKind, SlotShape};

/// Where a candidate is being dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestTarget {
    Canvas,
    Slot { host: BlockKind, shape: SlotShape },
}

/// What is being dropped: a structural block, or a raw value typed into an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    Block(BlockKind),
    RawValue,
}

pub fn can_nest(target: NestTarget, candidate: Candidate) -> bool {
    match target {
        NestTarget::Canvas => match candidate {
            Candidate::Block(kind) => kind.is_statement_shaped(),
            Candidate::RawValue => false,
        },
        NestTarget::Slot {
            shape: SlotShape::Statement,
            host,
        } => {
            host.is_control_flow()
                && match candidate {
                    Candidate::Block(kind) => kind.is_statement_shaped(),
                    Candidate::RawValue => true,
                }
        }
        NestTarget::Slot {
            shape: SlotShape::Value,
            host,
        } => match host {
            BlockKind::Variable | BlockKind::Print => matches!(
                candidate,
                Candidate::RawValue | Candidate::Block(BlockKind::Operator | BlockKind::Variable)
            ),
            BlockKind::Operator => matches!(
                candidate,
                Candidate::RawValue | Candidate::Block(BlockKind::Operator)
            ),
            _ => matches!(
                candidate,
                Candidate::RawValue | Candidate::Block(BlockKind::Operator | BlockKind::Variable)
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_slot(host: BlockKind) -> NestTarget {
        NestTarget::Slot {
            host,
            shape: SlotShape::Value,
        }
    }

    fn body_slot(host: BlockKind) -> NestTarget {
        NestTarget::Slot {
            host,
            shape: SlotShape::Statement,
        }
    }

    #[test]
    fn canvas_only_takes_statements() {
        for kind in BlockKind::ALL {
            assert_eq!(
                can_nest(NestTarget::Canvas, Candidate::Block(kind)),
                kind != BlockKind::Operator
            );
        }
        assert!(!can_nest(NestTarget::Canvas, Candidate::RawValue));
    }

    #[test]
    fn print_and_variable_take_expressions() {
        for host in [BlockKind::Print, BlockKind::Variable] {
            assert!(can_nest(value_slot(host), Candidate::Block(BlockKind::Operator)));
            assert!(can_nest(value_slot(host), Candidate::Block(BlockKind::Variable)));
            assert!(can_nest(value_slot(host), Candidate::RawValue));
            assert!(!can_nest(value_slot(host), Candidate::Block(BlockKind::Print)));
            assert!(!can_nest(value_slot(host), Candidate::Block(BlockKind::While)));
        }
    }

    #[test]
    fn operators_never_hold_statements() {
        let target = value_slot(BlockKind::Operator);
        assert!(can_nest(target, Candidate::Block(BlockKind::Operator)));
        assert!(can_nest(target, Candidate::RawValue));
        for kind in BlockKind::ALL.iter().filter(|k| k.is_statement_shaped()) {
            assert!(!can_nest(target, Candidate::Block(*kind)), "{}", kind);
        }
    }

    #[test]
    fn bodies_take_any_statement() {
        for host in BlockKind::ALL.iter().filter(|k| k.is_control_flow()) {
            for kind in BlockKind::ALL {
                assert_eq!(
                    can_nest(body_slot(*host), Candidate::Block(kind)),
                    kind.is_statement_shaped()
                );
            }
            assert!(can_nest(body_slot(*host), Candidate::RawValue), "{}", host);
        }
    }

    #[test]
    fn only_control_flow_has_bodies() {
        for host in [BlockKind::Print, BlockKind::Variable, BlockKind::Operator] {
            assert!(!can_nest(body_slot(host), Candidate::RawValue));
            assert!(!can_nest(body_slot(host), Candidate::Block(BlockKind::Print)));
        }
    }

    #[test]
    fn conditions_take_comparisons() {
        assert!(can_nest(
            value_slot(BlockKind::If),
            Candidate::Block(BlockKind::Operator)
        ));
        assert!(!can_nest(
            value_slot(BlockKind::While),
            Candidate::Block(BlockKind::Print)
        ));
    }
}
