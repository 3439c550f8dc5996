//! Deterministic search over the plan tree.

use crate::tree::{PlanNode, PlanNodeStatus};

/// Find the current limiting step via pre-order traversal.
///
/// A node that is itself `running` or `blocked` is returned without looking at
/// its children. Otherwise children are searched in declaration order.
pub fn find_bottleneck(node: Option<&PlanNode>) -> Option<&PlanNode> {
    let node = node?;
    if is_bottleneck(node) {
        return Some(node);
    }

    for child in &node.children {
        if let Some(found) = find_bottleneck(Some(child)) {
            return Some(found);
        }
    }

    None
}

/// Collect up to `limit` bottlenecks using the same rule as [`find_bottleneck`].
pub fn find_bottlenecks(node: Option<&PlanNode>, limit: usize) -> Vec<&PlanNode> {
    let mut found = Vec::new();
    if let Some(node) = node {
        collect_bottlenecks(node, limit, &mut found);
    }
    found
}

fn collect_bottlenecks<'a>(node: &'a PlanNode, limit: usize, found: &mut Vec<&'a PlanNode>) {
    if found.len() >= limit {
        return;
    }
    if is_bottleneck(node) {
        found.push(node);
        return;
    }
    for child in &node.children {
        collect_bottlenecks(child, limit, found);
    }
}

fn is_bottleneck(node: &PlanNode) -> bool {
    matches!(
        node.status,
        PlanNodeStatus::Running | PlanNodeStatus::Blocked
    )
}

/// Depth-first search for `id`; ids are unique so the first match is the only one.
pub fn find_node_by_id<'a>(node: Option<&'a PlanNode>, id: &str) -> Option<&'a PlanNode> {
    let node = node?;
    if node.id == id {
        return Some(node);
    }

    for child in &node.children {
        if let Some(found) = find_node_by_id(Some(child), id) {
            return Some(found);
        }
    }

    None
}

/// `/`-joined ids from `root` down to `target_id`.
pub fn node_path(root: &PlanNode, target_id: &str) -> Option<String> {
    let mut ids = ancestry(root, target_id)?;
    ids.reverse();
    Some(ids.join("/"))
}

/// Ids from the match up to `node`, innermost first.
fn ancestry<'a>(node: &'a PlanNode, target_id: &str) -> Option<Vec<&'a str>> {
    if node.id == target_id {
        return Some(vec![node.id.as_str()]);
    }
    node.children.iter().find_map(|child| {
        let mut ids = ancestry(child, target_id)?;
        ids.push(node.id.as_str());
        Some(ids)
    })
}

pub fn find_node_mut<'a>(node: &'a mut PlanNode, id: &str) -> Option<&'a mut PlanNode> {
    if node.id == id {
        return Some(node);
    }
    for child in &mut node.children {
        if let Some(found) = find_node_mut(child, id) {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{leaf, node_with_children, pending_group};

    #[test]
    fn bottleneck_is_none_for_absent_tree() {
        assert!(find_bottleneck(None).is_none());
    }

    /// A running parent is the bottleneck even when a child is also running.
    #[test]
    fn running_parent_stops_the_search() {
        let mut parent = node_with_children(
            "a",
            vec![leaf("a1", PlanNodeStatus::Running)],
        );
        parent.status = PlanNodeStatus::Running;
        let root = pending_group("root", vec![parent]);

        let found = find_bottleneck(Some(&root)).expect("bottleneck");
        assert_eq!(found.id, "a");
    }

    #[test]
    fn bottleneck_follows_declaration_order() {
        let root = pending_group(
            "root",
            vec![
                leaf("done", PlanNodeStatus::Completed),
                pending_group("b", vec![leaf("b1", PlanNodeStatus::Blocked)]),
                leaf("c", PlanNodeStatus::Running),
            ],
        );

        let found = find_bottleneck(Some(&root)).expect("bottleneck");
        assert_eq!(found.id, "b1");
    }

    #[test]
    fn aggregated_root_is_its_own_bottleneck() {
        let root = node_with_children("root", vec![leaf("a", PlanNodeStatus::Running)]);
        let found = find_bottleneck(Some(&root)).expect("bottleneck");
        assert_eq!(found.id, "root");
    }

    #[test]
    fn bottleneck_none_when_nothing_active() {
        let root = node_with_children(
            "root",
            vec![
                leaf("a", PlanNodeStatus::Completed),
                leaf("b", PlanNodeStatus::Pending),
            ],
        );
        assert!(find_bottleneck(Some(&root)).is_none());
    }

    #[test]
    fn find_bottlenecks_respects_limit() {
        let root = pending_group(
            "root",
            vec![
                leaf("a", PlanNodeStatus::Running),
                leaf("b", PlanNodeStatus::Blocked),
                leaf("c", PlanNodeStatus::Running),
            ],
        );
        let ids: Vec<&str> = find_bottlenecks(Some(&root), 2)
            .iter()
            .map(|node| node.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn find_node_by_id_searches_depth_first() {
        let root = node_with_children(
            "root",
            vec![
                node_with_children("a", vec![leaf("a1", PlanNodeStatus::Pending)]),
                leaf("b", PlanNodeStatus::Pending),
            ],
        );
        assert_eq!(
            find_node_by_id(Some(&root), "a1").map(|n| n.id.as_str()),
            Some("a1")
        );
        assert!(find_node_by_id(Some(&root), "missing").is_none());
        assert!(find_node_by_id(None, "root").is_none());
    }

    #[test]
    fn node_path_walks_from_root() {
        let root = node_with_children(
            "root",
            vec![
                leaf("b", PlanNodeStatus::Pending),
                node_with_children("a", vec![leaf("a1", PlanNodeStatus::Pending)]),
            ],
        );
        assert_eq!(node_path(&root, "root").as_deref(), Some("root"));
        assert_eq!(node_path(&root, "a1").as_deref(), Some("root/a/a1"));
        assert!(node_path(&root, "zzz").is_none());
    }
}
