//! Semantic invariants not expressible via JSON Schema.

use crate::core::aggregate::aggregate_status;
use crate::tree::PlanNode;
use std::collections::HashSet;

/// Check semantic plan-tree invariants:
/// - No duplicate ids
/// - Composite node status equals the aggregation of its children
/// - `blockedBy`/`blocks` only reference ids present in the tree
pub fn validate_invariants(root: &PlanNode) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    validate_node(root, &mut seen, &mut errors, root.id.as_str());

    validate_dependencies(root, &seen, &mut errors, root.id.as_str());
    errors
}

fn validate_node(
    node: &PlanNode,
    seen: &mut HashSet<String>,
    errors: &mut Vec<String>,
    path: &str,
) {
    if !seen.insert(node.id.clone()) {
        errors.push(format!("duplicate id '{}' at {}", node.id, path));
    }

    if !node.children.is_empty() {
        let derived = aggregate_status(&node.children);
        if node.status != derived {
            errors.push(format!(
                "{}: status {} does not match children (expected {})",
                path,
                node.status.as_str(),
                derived.as_str()
            ));
        }
    }

    for child in &node.children {
        let child_path = format!("{}/{}", path, child.id);
        validate_node(child, seen, errors, &child_path);
    }
}

fn validate_dependencies(
    node: &PlanNode,
    ids: &HashSet<String>,
    errors: &mut Vec<String>,
    path: &str,
) {
    for dep in node.blocked_by.iter().chain(&node.blocks) {
        if !ids.contains(dep) {
            errors.push(format!("{}: unknown dependency id '{}'", path, dep));
        }
    }
    for child in &node.children {
        let child_path = format!("{}/{}", path, child.id);
        validate_dependencies(child, ids, errors, &child_path);
    }
}
