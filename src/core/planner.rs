//! Plan generation: diff the composed template against the stack lock.

use super::error::Result;
use super::resolver;
use super::template::Template;
use super::types::*;
use crate::tripwire::hasher;

/// Compare a composed template to the last deployed lock.
///
/// Resources are listed in dependency order, followed by resources the
/// lock knows but the template no longer declares (destroyed, typically
/// because a feature was switched off). The whole-template hash is compared
/// as well, so output and description edits still count as changes.
pub fn plan(
    stack_name: &str,
    template: &Template,
    lock: Option<&StackLock>,
) -> Result<ExecutionPlan> {
    let order = resolver::build_resource_order(template)?;
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for logical_id in &order {
        let Some(descriptor) = template.resources.get(logical_id) else {
            continue;
        };
        let desired_hash = hasher::hash_descriptor(descriptor)?;
        let action = match lock.and_then(|l| l.resources.get(logical_id)) {
            None => PlanAction::Create,
            Some(rl) if rl.resource_type == descriptor.resource_type && rl.hash == desired_hash => {
                PlanAction::NoOp
            }
            Some(_) => PlanAction::Update,
        };
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            logical_id: logical_id.clone(),
            resource_type: descriptor.resource_type.clone(),
            action,
        });
    }

    if let Some(lock) = lock {
        for (logical_id, rl) in &lock.resources {
            if template.contains(logical_id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: logical_id.clone(),
                resource_type: rl.resource_type.clone(),
                action: PlanAction::Destroy,
            });
        }
    }

    let template_hash = hasher::hash_template(template)?;
    let template_changed = lock.is_none_or(|l| l.template_hash != template_hash);

    Ok(ExecutionPlan {
        stack_name: stack_name.to_string(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
        template_changed,
    })
}

/// One-line description of a planned change.
pub fn describe(change: &PlannedChange) -> String {
    let verb = match change.action {
        PlanAction::Create => "create",
        PlanAction::Update => "update",
        PlanAction::Destroy => "destroy",
        PlanAction::NoOp => "no changes",
    };
    format!("{} ({}): {}", change.logical_id, change.resource_type, verb)
}
