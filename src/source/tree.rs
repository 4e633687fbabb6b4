//! Rebuilds a reply tree from a flat list with parent pointers.

use std::collections::{HashMap, HashSet};

use super::Comment;

#[derive(Debug, Clone)]
pub struct FlatComment {
    pub id: String,
    pub parent: Option<String>,
    pub comment: Comment,
}

/// Nests `flat` under `root_id`, keeping upstream order among siblings.
/// Replies whose parent cannot be resolved are dropped.
pub fn build(root_id: &str, flat: Vec<FlatComment>) -> Vec<Comment> {
    let mut children: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, entry) in flat.iter().enumerate() {
        if let Some(parent) = &entry.parent {
            children.entry(parent.clone()).or_default().push(index);
        }
    }

    let mut slots: Vec<Option<FlatComment>> = flat.into_iter().map(Some).collect();
    let mut visited = HashSet::new();
    attach(root_id, &children, &mut slots, &mut visited)
}

fn attach(
    parent: &str,
    children: &HashMap<String, Vec<usize>>,
    slots: &mut [Option<FlatComment>],
    visited: &mut HashSet<usize>,
) -> Vec<Comment> {
    let Some(indices) = children.get(parent) else {
        return Vec::new();
    };
    let mut out = Vec::with_capacity(indices.len());
    for &index in indices {
        if !visited.insert(index) {
            continue;
        }
        let Some(entry) = slots[index].take() else {
            continue;
        };
        let mut comment = entry.comment;
        comment.replies = attach(&entry.id, children, slots, visited);
        out.push(comment);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(id: &str, parent: Option<&str>) -> FlatComment {
        FlatComment {
            id: id.into(),
            parent: parent.map(str::to_string),
            comment: Comment {
                url: format!("https://example.social/{id}"),
                author: id.into(),
                author_url: String::new(),
                created_at: 0,
                score: None,
                body: id.into(),
                replies: Vec::new(),
            },
        }
    }

    #[test]
    fn nests_replies_and_keeps_order() {
        let tree = build(
            "root",
            vec![
                flat("a", Some("root")),
                flat("b", Some("root")),
                flat("a1", Some("a")),
                flat("a2", Some("a")),
                flat("a1x", Some("a1")),
            ],
        );
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].author, "a");
        assert_eq!(tree[0].replies[0].author, "a1");
        assert_eq!(tree[0].replies[1].author, "a2");
        assert_eq!(tree[0].replies[0].replies[0].author, "a1x");
        assert_eq!(tree[1].count(), 1);
    }

    #[test]
    fn child_listed_before_parent_still_attaches() {
        let tree = build("root", vec![flat("c", Some("p")), flat("p", Some("root"))]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].replies[0].author, "c");
    }

    #[test]
    fn orphans_are_dropped() {
        let tree = build(
            "root",
            vec![
                flat("a", Some("root")),
                flat("lost", Some("deleted")),
                flat("none", None),
            ],
        );
        assert_eq!(tree.iter().map(Comment::count).sum::<usize>(), 1);
    }

    #[test]
    fn duplicate_ids_do_not_loop() {
        let tree = build(
            "root",
            vec![flat("a", Some("root")), flat("root", Some("a"))],
        );
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].count(), 2);
    }
}
