//! Task availability rules for projects.

use crate::model::item::{ItemId, ItemType};
use crate::tree::events::TreeEvent;
use crate::tree::TreeModel;

impl TreeModel {
    /// Returns the first open task among the project's live children.
    ///
    /// Paused projects and non-project items have no available task.
    pub fn next_available_task(&self, project_id: ItemId) -> Option<ItemId> {
        let project = self.item(project_id)?;
        if !matches!(
            project.kind,
            ItemType::SequentialProject | ItemType::ParallelProject
        ) {
            return None;
        }
        project.children.iter().copied().find(|child| {
            self.item(*child)
                .is_some_and(|item| item.is_active() && item.kind == ItemType::Task)
        })
    }

    /// Returns whether the item is a task the user can work on now.
    ///
    /// Tasks outside projects are always actionable; inside a sequential
    /// project only the next available task is.
    pub fn is_actionable(&self, item_id: ItemId) -> bool {
        let Some(item) = self.item(item_id) else {
            return false;
        };
        if !item.is_active() || item.kind != ItemType::Task || !self.is_visible(item_id) {
            return false;
        }
        let Some(parent) = self.parent_of(item_id).and_then(|parent| self.item(parent)) else {
            return true;
        };
        match parent.kind {
            ItemType::SequentialProject => self.next_available_task(parent.id) == Some(item_id),
            ItemType::ParallelProject => true,
            ItemType::PausedProject => false,
            _ => true,
        }
    }

    /// Availability notifications for projects affected by a change of `item_id`.
    pub(crate) fn availability_events(&self, item_id: ItemId) -> Vec<TreeEvent> {
        let mut projects = Vec::with_capacity(2);
        if self.item(item_id).is_some_and(|item| item.kind.is_project()) {
            projects.push(item_id);
        }
        if let Some(parent) = self.parent_of(item_id) {
            if self.item(parent).is_some_and(|item| item.kind.is_project()) {
                projects.push(parent);
            }
        }
        projects
            .into_iter()
            .map(|project| TreeEvent::AvailabilityChanged {
                project,
                next: self.next_available_task(project),
            })
            .collect()
    }
}
