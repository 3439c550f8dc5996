//! Recursive status aggregation and progress counting for plan trees.

use serde::Serialize;

use crate::tree::{PlanNode, PlanNodeStatus};

/// Status tallies for a subtree, the subtree root included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeCounts {
    pub total: u32,
    pub completed: u32,
    pub running: u32,
    pub failed: u32,
}

/// Post-order summation over the whole subtree. An absent tree counts as all zero.
pub fn count_nodes(node: Option<&PlanNode>) -> NodeCounts {
    let Some(node) = node else {
        return NodeCounts::default();
    };

    let mut counts = NodeCounts {
        total: 1,
        completed: u32::from(node.status == PlanNodeStatus::Completed),
        running: u32::from(node.status == PlanNodeStatus::Running),
        failed: u32::from(node.status == PlanNodeStatus::Failed),
    };

    for child in &node.children {
        let child_counts = count_nodes(Some(child));
        counts.total += child_counts.total;
        counts.completed += child_counts.completed;
        counts.running += child_counts.running;
        counts.failed += child_counts.failed;
    }

    counts
}

/// Percentage of completed nodes, rounded. Empty tree is 0.
pub fn calculate_progress(node: Option<&PlanNode>) -> u32 {
    let counts = count_nodes(node);
    if counts.total == 0 {
        return 0;
    }
    (f64::from(counts.completed) / f64::from(counts.total) * 100.0).round() as u32
}

/// `(completed, total)` over leaves only; composites are not tasks.
pub fn count_leaves(node: Option<&PlanNode>) -> (u32, u32) {
    let Some(node) = node else {
        return (0, 0);
    };
    if node.is_leaf() {
        return (u32::from(node.status == PlanNodeStatus::Completed), 1);
    }
    node.children
        .iter()
        .map(|child| count_leaves(Some(child)))
        .fold((0, 0), |(done, total), (d, t)| (done + d, total + t))
}

/// Derive a composite node's status from its children.
///
/// Precedence: failed > blocked > running > completed (all children, at least
/// one) > pending.
pub fn aggregate_status(children: &[PlanNode]) -> PlanNodeStatus {
    let any = |status: PlanNodeStatus| children.iter().any(|c| c.status == status);

    if any(PlanNodeStatus::Failed) {
        PlanNodeStatus::Failed
    } else if any(PlanNodeStatus::Blocked) {
        PlanNodeStatus::Blocked
    } else if any(PlanNodeStatus::Running) {
        PlanNodeStatus::Running
    } else if !children.is_empty()
        && children
            .iter()
            .all(|c| c.status == PlanNodeStatus::Completed)
    {
        PlanNodeStatus::Completed
    } else {
        PlanNodeStatus::Pending
    }
}

/// Re-apply [`aggregate_status`] bottom-up to every composite node.
///
/// Leaves keep their own status. Returns the ids whose status changed, in
/// post-order.
pub fn refresh_statuses(node: &mut PlanNode) -> Vec<String> {
    let mut changed = Vec::new();
    refresh_inner(node, &mut changed);
    changed
}

fn refresh_inner(node: &mut PlanNode, changed: &mut Vec<String>) {
    if node.children.is_empty() {
        return;
    }
    for child in &mut node.children {
        refresh_inner(child, changed);
    }
    let derived = aggregate_status(&node.children);
    if node.status != derived {
        node.status = derived;
        changed.push(node.id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{leaf, node_with_children};

    #[test]
    fn count_leaves_skips_composites() {
        let tree = node_with_children(
            "root",
            vec![
                node_with_children(
                    "a",
                    vec![
                        leaf("a1", PlanNodeStatus::Completed),
                        leaf("a2", PlanNodeStatus::Failed),
                    ],
                ),
                leaf("b", PlanNodeStatus::Completed),
            ],
        );
        assert_eq!(count_leaves(Some(&tree)), (2, 3));
        assert_eq!(count_leaves(None), (0, 0));
    }

    #[test]
    fn count_nodes_absent_tree_is_zero() {
        assert_eq!(count_nodes(None), NodeCounts::default());
        assert_eq!(calculate_progress(None), 0);
    }

    /// total(node) == 1 + sum(total(child)) at every level.
    #[test]
    fn count_nodes_sums_subtrees() {
        let root = node_with_children(
            "root",
            vec![
                node_with_children(
                    "a",
                    vec![
                        leaf("a1", PlanNodeStatus::Completed),
                        leaf("a2", PlanNodeStatus::Running),
                    ],
                ),
                leaf("b", PlanNodeStatus::Failed),
            ],
        );

        let counts = count_nodes(Some(&root));
        let child_total: u32 = root
            .children
            .iter()
            .map(|child| count_nodes(Some(child)).total)
            .sum();
        assert_eq!(counts.total, 1 + child_total);
        assert_eq!(counts.total, 5);
        assert_eq!(counts.completed, 1);
        // a (running, aggregated) + a2; root is failed.
        assert_eq!(counts.running, 2);
        assert_eq!(counts.failed, 2);
    }

    #[test]
    fn progress_rounds_percentage() {
        let root = node_with_children(
            "root",
            vec![
                leaf("a", PlanNodeStatus::Completed),
                leaf("b", PlanNodeStatus::Pending),
            ],
        );
        // 1 of 3 nodes completed.
        assert_eq!(calculate_progress(Some(&root)), 33);
    }

    #[test]
    fn failed_child_dominates_running_child() {
        let children = vec![
            leaf("a", PlanNodeStatus::Failed),
            leaf("b", PlanNodeStatus::Running),
        ];
        assert_eq!(aggregate_status(&children), PlanNodeStatus::Failed);
    }

    #[test]
    fn blocked_dominates_running() {
        let children = vec![
            leaf("a", PlanNodeStatus::Running),
            leaf("b", PlanNodeStatus::Blocked),
        ];
        assert_eq!(aggregate_status(&children), PlanNodeStatus::Blocked);
    }

    #[test]
    fn completed_requires_all_children() {
        let all_done = vec![
            leaf("a", PlanNodeStatus::Completed),
            leaf("b", PlanNodeStatus::Completed),
        ];
        let partial = vec![
            leaf("a", PlanNodeStatus::Completed),
            leaf("b", PlanNodeStatus::Pending),
        ];
        assert_eq!(aggregate_status(&all_done), PlanNodeStatus::Completed);
        assert_eq!(aggregate_status(&partial), PlanNodeStatus::Pending);
        assert_eq!(aggregate_status(&[]), PlanNodeStatus::Pending);
    }

    #[test]
    fn refresh_propagates_to_ancestors() {
        let mut root = node_with_children(
            "root",
            vec![node_with_children(
                "a",
                vec![leaf("a1", PlanNodeStatus::Running)],
            )],
        );
        root.children[0].children[0].status = PlanNodeStatus::Completed;

        let changed = refresh_statuses(&mut root);
        assert_eq!(changed, vec!["a".to_string(), "root".to_string()]);
        assert_eq!(root.status, PlanNodeStatus::Completed);
        assert_eq!(root.children[0].status, PlanNodeStatus::Completed);
    }
}
