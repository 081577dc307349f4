//! Invalidation rules for the task-tracking domain
//!
//! Cached read views are keyed by view name (`list_incomplete_tasks`,
//! `task_statistics`, ...); per-entity views append `:<id>` and are matched by
//! prefix.

use crate::cache::invalidation::{InvalidationRule, OperationContext};
use crate::error::Result;

/// Operation types emitted by the task-tracking write paths
pub mod operations {
    pub const TASK_CREATE: &str = "task_create";
    pub const TASK_UPDATE: &str = "task_update";
    pub const TASK_DELETE: &str = "task_delete";
    pub const TASK_STATUS_CHANGE: &str = "task_status_change";
    pub const TASK_ASSIGN: &str = "task_assign";
    pub const CLIENT_CREATE: &str = "client_create";
    pub const CLIENT_UPDATE: &str = "client_update";
    pub const CLIENT_DELETE: &str = "client_delete";
    pub const BULK_OPERATION: &str = "bulk_operation";
}

fn flag_set(ctx: &OperationContext, name: &str) -> bool {
    ctx.get(name).map(String::as_str) == Some("true")
}

/// The full rule table for task and client writes
pub fn task_tracker_rules() -> Result<Vec<InvalidationRule>> {
    use operations::*;

    Ok(vec![
        InvalidationRule::new(
            TASK_CREATE,
            ["list_incomplete_tasks", "list_tasks*", "task_statistics"],
            "New task appears in task lists and counters",
        )?
        .when(|ctx| ctx.contains_key("client_id"), ["client_tasks*"])?,
        InvalidationRule::new(
            TASK_UPDATE,
            ["task_detail*", "list_incomplete_tasks", "list_tasks*"],
            "Edited task fields show in detail and list views",
        )?
        .when(
            |ctx| flag_set(ctx, "client_changed"),
            ["client_tasks*", "client_statistics*"],
        )?,
        InvalidationRule::new(
            TASK_DELETE,
            [
                "task_detail*",
                "list_incomplete_tasks",
                "list_completed_tasks",
                "list_tasks*",
                "task_statistics",
                "client_tasks*",
            ],
            "Removed task disappears everywhere",
        )?,
        InvalidationRule::new(
            TASK_STATUS_CHANGE,
            [
                "task_detail*",
                "list_incomplete_tasks",
                "list_completed_tasks",
                "task_statistics",
            ],
            "Status moves tasks between lists and changes counters",
        )?
        .when(|ctx| ctx.contains_key("client_id"), ["client_statistics*"])?,
        InvalidationRule::new(
            TASK_ASSIGN,
            ["task_detail*", "client_tasks*", "client_statistics*"],
            "Assignment changes per-client task views",
        )?,
        InvalidationRule::new(CLIENT_CREATE, ["client_list"], "New client in client list")?,
        InvalidationRule::new(
            CLIENT_UPDATE,
            ["client_list", "client_detail*"],
            "Edited client fields",
        )?,
        InvalidationRule::new(
            CLIENT_DELETE,
            [
                "client_list",
                "client_detail*",
                "client_tasks*",
                "client_statistics*",
                "list_tasks*",
            ],
            "Removed client and the task views that referenced it",
        )?,
        InvalidationRule::new(
            BULK_OPERATION,
            ["list_*", "task_*", "client_*"],
            "Bulk writes touch too much to track precisely",
        )?,
    ])
}

#[cfg(test)]
mod tests {
    use super::operations::*;
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_operation_has_one_rule() {
        let rules = task_tracker_rules().unwrap();
        let ops: HashSet<_> = rules.iter().map(|r| r.operation_type.as_str()).collect();
        assert_eq!(ops.len(), rules.len());
        for op in [
            TASK_CREATE,
            TASK_UPDATE,
            TASK_DELETE,
            TASK_STATUS_CHANGE,
            TASK_ASSIGN,
            CLIENT_CREATE,
            CLIENT_UPDATE,
            CLIENT_DELETE,
            BULK_OPERATION,
        ] {
            assert!(ops.contains(op), "missing rule for {}", op);
        }
    }

    #[test]
    fn test_client_change_widens_task_update() {
        let rules = task_tracker_rules().unwrap();
        let update = rules
            .iter()
            .find(|r| r.operation_type.as_str() == TASK_UPDATE)
            .unwrap();

        let mut ctx = OperationContext::new();
        let base = update.patterns_for(Some(&ctx)).len();
        ctx.insert("client_changed".into(), "true".into());
        assert_eq!(update.patterns_for(Some(&ctx)).len(), base + 2);
    }
}
