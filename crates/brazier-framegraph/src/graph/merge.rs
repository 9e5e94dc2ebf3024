//! Pass-merge legality and the pass-order heuristic.
//!
//! Merging places two logical passes as successive subpasses of one native
//! render pass. The order heuristic is greedy list scheduling, not an exact
//! solver: it chains merges backwards, re-linearizes for adjacency, then
//! chains again to capture merges unlocked by the new order.

use super::PassSlot;
use super::resolve::{attachment_chain, dependency_chain};

///Whether `pass` may be appended to the native render pass that currently
/// ends with `earlier`.
pub(crate) fn check_is_merge_valid(passes: &[PassSlot], pass: usize, earlier: usize) -> bool {
    let later = &passes[pass].desc;
    let candidate = &passes[earlier].desc;

    //1: same pipeline kind, and compute never merges.
    if later.kind != candidate.kind || later.kind == crate::PipelineKind::Compute {
        return false;
    }

    //2: post-blit mip generation needs the render pass closed for the
    // layout transitions and blits.
    if later.uses_post_blit() || candidate.uses_post_blit() {
        return false;
    }

    //3: a full-image read cannot be satisfied from inside an open render
    // pass, so nothing `pass` samples may depend on `earlier`.
    for input in later.iter_full_image_inputs() {
        if attachment_chain(passes, input).contains(&earlier) {
            #[cfg(feature = "logging")]
            log::trace!(
                "no merge {} <- {}: sampled input \"{}\" depends on the candidate",
                passes[pass].name,
                passes[earlier].name,
                input
            );
            return false;
        }
    }

    //4: an input attachment is only legal if it reaches `earlier` as a
    // direct prior subpass. A chain through an intermediate pass is a side
    // channel the subpass dependency cannot express.
    for input in later.iter_input_attachments() {
        if candidate.writes(input) {
            continue;
        }
        if attachment_chain(passes, input).contains(&earlier) {
            #[cfg(feature = "logging")]
            log::trace!(
                "no merge {} <- {}: input attachment \"{}\" reaches the candidate indirectly",
                passes[pass].name,
                passes[earlier].name,
                input
            );
            return false;
        }
    }

    //5: all outputs of both passes must share one size class; a native
    // render pass has a single render area.
    for (_, later_out) in later.iter_outputs() {
        for (_, cand_out) in candidate.iter_outputs() {
            if !later_out.size.same_size_class(&cand_out.size) {
                return false;
            }
        }
    }

    true
}

///Three-phase greedy reorder of the reachability order. The result is a
/// permutation of `order` in which every pass still follows its transitive
/// write-dependencies.
pub(crate) fn optimize_pass_order(passes: &[PassSlot], order: Vec<usize>) -> Vec<usize> {
    let chained = merge_chain(passes, order);
    let reordered = maximize_adjacency(passes, chained);
    merge_chain(passes, reordered)
}

///Backward merge-chaining: take the last unscheduled pass as an anchor, then
/// keep pulling passes that legally merge in front of the chain. A pass is
/// never pulled past one that depends on it, which keeps the order
/// topological.
fn merge_chain(passes: &[PassSlot], order: Vec<usize>) -> Vec<usize> {
    let mut remaining = order;
    //built back-to-front: first element is the last pass to execute
    let mut reversed = Vec::with_capacity(remaining.len());

    while let Some(anchor) = remaining.pop() {
        reversed.push(anchor);

        loop {
            let tail = *reversed.last().unwrap();
            let found = remaining.iter().rposition(|&cand| {
                check_is_merge_valid(passes, tail, cand)
                    && !remaining
                        .iter()
                        .any(|&other| other != cand && dependency_chain(passes, other).contains(&cand))
            });

            match found {
                Some(pos) => {
                    let cand = remaining.remove(pos);
                    #[cfg(feature = "logging")]
                    log::trace!(
                        "chaining {} in front of {}",
                        passes[cand].name,
                        passes[tail].name
                    );
                    reversed.push(cand);
                }
                None => break,
            }
        }
    }

    reversed.reverse();
    reversed
}

///Re-linearizes by repeatedly placing, among the passes whose dependency
/// chains are fully placed, the one scoring highest against the scheduled
/// tail. A mergeable adjacency wins outright; otherwise the score counts
/// scheduled passes the candidate does not depend on.
fn maximize_adjacency(passes: &[PassSlot], order: Vec<usize>) -> Vec<usize> {
    let mut remaining = order;
    let mut placed = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut best: Option<(usize, usize)> = None;

        for (pos, &cand) in remaining.iter().enumerate() {
            let chain = dependency_chain(passes, cand);
            if chain.iter().any(|dep| remaining.contains(dep)) {
                continue;
            }

            let score = match placed.last() {
                Some(&tail) if check_is_merge_valid(passes, cand, tail) => usize::MAX,
                _ => placed.iter().filter(|p| !chain.contains(p)).count(),
            };

            if best.map(|(_, prev)| score > prev).unwrap_or(true) {
                best = Some((pos, score));
            }
        }

        let (pos, _score) = best.expect("acyclic graph always has a placeable pass");
        placed.push(remaining.remove(pos));
    }

    placed
}
