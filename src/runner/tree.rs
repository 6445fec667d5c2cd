//! Arena of queue items

use crate::error::TaskResult;
use crate::runner::queue::{ItemId, NewItem, QueueItem};
use std::ops::{Index, IndexMut};

/// Owns every queue item created by runs of one orchestrator.
///
/// Items refer to their parent by [`ItemId`], so the tree never holds
/// references into itself.
#[derive(Debug, Default)]
pub struct TaskTree {
    items: Vec<QueueItem>,
}

impl TaskTree {
    pub fn new() -> Self {
        TaskTree::default()
    }

    /// Create an item under `parent`, or a new root when `parent` is `None`
    pub fn create(&mut self, spec: NewItem, parent: Option<ItemId>) -> TaskResult<ItemId> {
        let id = ItemId(self.items.len());
        let parent = parent.and_then(|p| self.items.get(p.0));
        let item = QueueItem::new(id, spec, parent)?;
        self.items.push(item);
        Ok(id)
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.get(id.0)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut QueueItem> {
        self.items.get_mut(id.0)
    }

    pub fn parent(&self, id: ItemId) -> Option<&QueueItem> {
        self.get(id)?.parent().and_then(|p| self.get(p))
    }

    pub fn children(&self, id: ItemId) -> impl Iterator<Item = &QueueItem> + '_ {
        self.items
            .iter()
            .filter(move |item| item.parent() == Some(id))
    }

    pub fn roots(&self) -> impl Iterator<Item = &QueueItem> + '_ {
        self.items.iter().filter(|item| item.parent().is_none())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Drop every item; ids handed out before are invalid afterwards
    pub(crate) fn clear(&mut self) {
        self.items.clear();
    }
}

impl Index<ItemId> for TaskTree {
    type Output = QueueItem;

    fn index(&self, id: ItemId) -> &QueueItem {
        &self.items[id.0]
    }
}

impl IndexMut<ItemId> for TaskTree {
    fn index_mut(&mut self, id: ItemId) -> &mut QueueItem {
        &mut self.items[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::queue::ItemKind;

    #[test]
    fn test_parent_child_links() {
        let mut tree = TaskTree::new();
        let root = tree.create(NewItem::named("build", ItemKind::Root), None).unwrap();
        let a = tree
            .create(NewItem::named("a", ItemKind::SerialChild), Some(root))
            .unwrap();
        let b = tree
            .create(NewItem::named("b", ItemKind::SerialChild), Some(root))
            .unwrap();

        assert_eq!(tree.len(), 3);
        assert_eq!(tree.parent(a).map(QueueItem::name), Some("build"));
        assert_eq!(tree[b].level(), 1);
        let children: Vec<&str> = tree.children(root).map(QueueItem::name).collect();
        assert_eq!(children, vec!["a", "b"]);
        assert_eq!(tree.roots().count(), 1);
    }

    #[test]
    fn test_invalid_name_creates_nothing() {
        let mut tree = TaskTree::new();
        assert!(tree.create(NewItem::named("", ItemKind::Root), None).is_err());
        assert!(tree.is_empty());
    }
}
