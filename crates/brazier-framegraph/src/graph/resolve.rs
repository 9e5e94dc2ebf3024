//! Validation and backward dependency resolution.
//!
//! The graph is anchored at the backbuffer source: starting from the pass(es)
//! that write it, the resolver walks every input backwards and collects the
//! transitively required passes. Everything not reached here is dead and
//! never compiled.

use ahash::{AHashMap, AHashSet};
use smallvec::SmallVec;

use crate::GraphError;

use super::PassSlot;

///All pass indices whose declared outputs (color or depth/stencil) match
/// `name`.
pub(crate) fn writers_of(passes: &[PassSlot], name: &str) -> SmallVec<[usize; 4]> {
    passes
        .iter()
        .enumerate()
        .filter_map(|(idx, slot)| slot.desc.writes(name).then_some(idx))
        .collect()
}

///Fails fast on configuration errors. Anything that passes here is safe for
/// the later stages: in particular the reachability walk relies on the cycle
/// check.
pub(crate) fn validate(passes: &[PassSlot], backbuffer: Option<&str>) -> Result<(), GraphError> {
    let backbuffer = backbuffer.ok_or(GraphError::NoBackbufferSource)?;

    if passes.is_empty() {
        return Err(GraphError::NoPasses);
    }

    if writers_of(passes, backbuffer).is_empty() {
        return Err(GraphError::UnknownBackbufferSource(backbuffer.to_string()));
    }

    //Every input must match an output somewhere in the graph, and a pass must
    // not read its own output.
    for slot in passes {
        for input in slot.desc.iter_inputs() {
            if writers_of(passes, input).is_empty() {
                return Err(GraphError::DanglingInput {
                    pass: slot.name.clone(),
                    input: input.to_string(),
                });
            }
            if slot.desc.writes(input) {
                return Err(GraphError::OutputFeedsOwnInput {
                    pass: slot.name.clone(),
                    name: input.to_string(),
                });
            }
        }
    }

    //Same-name outputs must agree on the descriptor. The name is the primary
    // key; two descriptors under one name would race for the physical texture.
    let mut seen: AHashMap<&str, (usize, &crate::AttachmentDesc)> = AHashMap::new();
    for (idx, slot) in passes.iter().enumerate() {
        for (name, desc) in slot.desc.iter_outputs() {
            if let Some((first, first_desc)) = seen.get(name) {
                if *first_desc != desc {
                    return Err(GraphError::AttachmentRedeclared {
                        name: name.to_string(),
                        first: passes[*first].name.clone(),
                        second: slot.name.clone(),
                    });
                }
                #[cfg(feature = "logging")]
                log::debug!(
                    "attachment \"{}\" is written by both \"{}\" and \"{}\"",
                    name,
                    passes[*first].name,
                    slot.name
                );
            } else {
                seen.insert(name, (idx, desc));
            }
        }
    }

    detect_cycles(passes)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    OnStack,
    Done,
}

///Tri-color depth first search over the producer/consumer graph. The
/// reachability walk below dedups by membership but does not terminate on
/// genuine cycles, so those are rejected here.
fn detect_cycles(passes: &[PassSlot]) -> Result<(), GraphError> {
    let mut state = vec![VisitState::Unvisited; passes.len()];

    fn visit(
        passes: &[PassSlot],
        state: &mut [VisitState],
        pass: usize,
    ) -> Result<(), GraphError> {
        state[pass] = VisitState::OnStack;
        for input in passes[pass].desc.iter_inputs() {
            for writer in writers_of(passes, input) {
                match state[writer] {
                    VisitState::OnStack => {
                        return Err(GraphError::DependencyCycle {
                            pass: passes[writer].name.clone(),
                            attachment: input.to_string(),
                        });
                    }
                    VisitState::Unvisited => visit(passes, state, writer)?,
                    VisitState::Done => {}
                }
            }
        }
        state[pass] = VisitState::Done;
        Ok(())
    }

    for pass in 0..passes.len() {
        if state[pass] == VisitState::Unvisited {
            visit(passes, &mut state, pass)?;
        }
    }
    Ok(())
}

///The initial (unoptimized) execution order: every pass transitively required
/// to produce `backbuffer`, producers strictly before their first-found
/// consumer.
pub(crate) fn initial_pass_stack(passes: &[PassSlot], backbuffer: &str) -> Vec<usize> {
    let mut stack = Vec::new();
    recursive_find_write_passes(passes, backbuffer, &mut stack);
    stack.reverse();
    stack
}

fn recursive_find_write_passes(passes: &[PassSlot], name: &str, stack: &mut Vec<usize>) {
    for writer in writers_of(passes, name) {
        //dedup by membership; a pass is scheduled once no matter how many
        // consumers it has
        if stack.contains(&writer) {
            continue;
        }
        stack.push(writer);

        let inputs: SmallVec<[&str; 8]> = passes[writer].desc.iter_inputs().collect();
        for input in inputs {
            recursive_find_write_passes(passes, input, stack);
        }
    }
}

///Transitive write-dependency chain of `pass`: every pass whose output feeds
/// into `pass`, through any number of intermediate passes.
pub(crate) fn dependency_chain(passes: &[PassSlot], pass: usize) -> AHashSet<usize> {
    let mut chain = AHashSet::new();
    let mut work: Vec<&str> = passes[pass].desc.iter_inputs().collect();

    while let Some(name) = work.pop() {
        for writer in writers_of(passes, name) {
            if chain.insert(writer) {
                work.extend(passes[writer].desc.iter_inputs());
            }
        }
    }
    chain
}

///Transitive chain of passes feeding the attachment `name` (its writers plus
/// everything those depend on).
pub(crate) fn attachment_chain(passes: &[PassSlot], name: &str) -> AHashSet<usize> {
    let mut chain = AHashSet::new();
    let mut work: Vec<&str> = vec![name];

    while let Some(name) = work.pop() {
        for writer in writers_of(passes, name) {
            if chain.insert(writer) {
                work.extend(passes[writer].desc.iter_inputs());
            }
        }
    }
    chain
}

#[cfg(test)]
mod tests {
    use brazier_hal::ash::vk;

    use super::*;
    use crate::graph::test_util::{NullPass, deferred_graph};
    use crate::{AttachmentDesc, FrameGraph, PipelineKind};

    fn color() -> AttachmentDesc {
        AttachmentDesc::color_2d(vk::Format::R8G8B8A8_UNORM)
    }

    #[test]
    fn missing_backbuffer_source() {
        let graph = {
            let mut g = deferred_graph();
            g.backbuffer_source = None;
            g
        };
        assert!(matches!(
            graph.validate(),
            Err(GraphError::NoBackbufferSource)
        ));
    }

    #[test]
    fn empty_graph() {
        let mut graph = FrameGraph::new();
        graph.set_backbuffer_source("backbuffer");
        assert!(matches!(graph.validate(), Err(GraphError::NoPasses)));
    }

    #[test]
    fn backbuffer_without_producer() {
        let mut graph = deferred_graph();
        graph.set_backbuffer_source("does_not_exist");
        assert!(matches!(
            graph.validate(),
            Err(GraphError::UnknownBackbufferSource(name)) if name == "does_not_exist"
        ));
    }

    #[test]
    fn dangling_input() {
        let mut graph = deferred_graph();
        graph.passes[2].desc.color_inputs.push("missing".into());
        assert!(matches!(
            graph.validate(),
            Err(GraphError::DanglingInput { input, .. }) if input == "missing"
        ));
    }

    #[test]
    fn output_read_as_own_input() {
        let mut graph = FrameGraph::new();
        graph
            .add_pass("feedback", PipelineKind::Graphics, Box::new(NullPass))
            .color_input("backbuffer")
            .color_output("backbuffer", color(), None);
        graph.set_backbuffer_source("backbuffer");
        assert!(matches!(
            graph.validate(),
            Err(GraphError::OutputFeedsOwnInput { name, .. }) if name == "backbuffer"
        ));
    }

    #[test]
    fn conflicting_descriptors_rejected() {
        let mut graph = deferred_graph();
        graph
            .add_pass("rogue", PipelineKind::Graphics, Box::new(NullPass))
            .color_output(
                "albedo",
                AttachmentDesc::color_2d(vk::Format::R32G32B32A32_SFLOAT),
                None,
            );
        assert!(matches!(
            graph.validate(),
            Err(GraphError::AttachmentRedeclared { name, .. }) if name == "albedo"
        ));
    }

    #[test]
    fn cycle_detected() {
        let mut graph = FrameGraph::new();
        graph
            .add_pass("a", PipelineKind::Graphics, Box::new(NullPass))
            .color_input("b_out")
            .color_output("a_out", color(), None);
        graph
            .add_pass("b", PipelineKind::Graphics, Box::new(NullPass))
            .color_input("a_out")
            .color_output("b_out", color(), None);
        graph
            .add_pass("present", PipelineKind::Graphics, Box::new(NullPass))
            .color_input("a_out")
            .color_output("backbuffer", color(), None);
        graph.set_backbuffer_source("backbuffer");
        assert!(matches!(
            graph.validate(),
            Err(GraphError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn deferred_scenario_is_valid() {
        assert!(deferred_graph().validate().is_ok());
    }

    #[test]
    fn writers_exact_set() {
        let graph = deferred_graph();
        assert_eq!(writers_of(&graph.passes, "albedo").as_slice(), [0]);
        assert_eq!(writers_of(&graph.passes, "depth").as_slice(), [0]);
        assert_eq!(writers_of(&graph.passes, "lit_color").as_slice(), [1]);
        assert_eq!(writers_of(&graph.passes, "backbuffer").as_slice(), [2]);
        assert!(writers_of(&graph.passes, "nothing").is_empty());
    }

    #[test]
    fn initial_stack_producers_first() {
        let graph = deferred_graph();
        let stack = initial_pass_stack(&graph.passes, "backbuffer");
        assert_eq!(stack, [0, 1, 2]);
    }

    #[test]
    fn unreachable_passes_are_dropped() {
        let mut graph = deferred_graph();
        graph
            .add_pass("debug_overlay", PipelineKind::Graphics, Box::new(NullPass))
            .color_output("overlay", color(), None);
        let stack = initial_pass_stack(&graph.passes, "backbuffer");
        assert!(!stack.contains(&3));
    }

    #[test]
    fn dependency_chain_is_transitive() {
        let graph = deferred_graph();
        let chain = dependency_chain(&graph.passes, 2);
        assert!(chain.contains(&0));
        assert!(chain.contains(&1));
        assert!(!chain.contains(&2));
    }
}
