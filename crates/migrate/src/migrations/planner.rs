//! Planner - computes the ordered steps that move the database to a target
//!
//! Planning is pure: it reads the registry and the set of applied names and
//! never touches the database. Applied units must always form a prefix of
//! the registry order; any gap or unknown applied name is reported before a
//! plan is produced.

use std::collections::HashSet;

use super::definitions::{Migration, Plan, PlanStep, Target};
use crate::error::{MigrateResult, MigrationError};

/// Compute the plan for `target`.
///
/// `registry` must be sorted by sort key, as produced by the registry.
pub fn plan<'a>(
    registry: &'a [Migration],
    applied: &HashSet<String>,
    target: &Target,
) -> MigrateResult<Plan<'a>> {
    check_history(registry, applied)?;

    // Applied units are exactly registry[..applied_count] once history checks out
    let applied_count = applied.len();

    let steps = match target {
        Target::Latest => registry[applied_count..]
            .iter()
            .map(PlanStep::forward)
            .collect(),
        Target::RevertLast => {
            let last = applied_count
                .checked_sub(1)
                .ok_or(MigrationError::NothingToRevert)?;
            vec![PlanStep::backward(&registry[last])]
        }
        Target::RevertAll => {
            if applied_count == 0 {
                return Err(MigrationError::NothingToRevert);
            }
            registry[..applied_count]
                .iter()
                .rev()
                .map(PlanStep::backward)
                .collect()
        }
        Target::To(name) => {
            let position = position_of(registry, name)?;
            if position >= applied_count {
                forward_through(registry, applied_count, position)
            } else {
                backward_through(registry, applied_count, position)
            }
        }
        Target::ApplyTo(name) => {
            let position = position_of(registry, name)?;
            if position < applied_count {
                return Err(MigrationError::AlreadyAtTarget {
                    name: name.clone(),
                    state: "already applied",
                });
            }
            forward_through(registry, applied_count, position)
        }
        Target::RevertTo(name) => {
            let position = position_of(registry, name)?;
            if position >= applied_count {
                return Err(MigrationError::AlreadyAtTarget {
                    name: name.clone(),
                    state: "not applied",
                });
            }
            backward_through(registry, applied_count, position)
        }
    };

    let plan = Plan {
        target: target.clone(),
        steps,
    };
    tracing::debug!(goal = %plan.target, steps = ?plan.summary(), "Computed migration plan");
    Ok(plan)
}

fn position_of(registry: &[Migration], name: &str) -> MigrateResult<usize> {
    registry
        .iter()
        .position(|m| m.name == name)
        .ok_or_else(|| MigrationError::UnknownUnit(name.to_string()))
}

fn forward_through<'a>(registry: &'a [Migration], applied_count: usize, position: usize) -> Vec<PlanStep<'a>> {
    registry[applied_count..=position]
        .iter()
        .map(PlanStep::forward)
        .collect()
}

fn backward_through<'a>(registry: &'a [Migration], applied_count: usize, position: usize) -> Vec<PlanStep<'a>> {
    registry[position..applied_count]
        .iter()
        .rev()
        .map(PlanStep::backward)
        .collect()
}

/// Reject applied names the registry does not know, and gaps in the applied prefix
fn check_history(registry: &[Migration], applied: &HashSet<String>) -> MigrateResult<()> {
    let known: HashSet<&str> = registry.iter().map(|m| m.name.as_str()).collect();

    let mut unknown: Vec<&String> = applied
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .collect();
    unknown.sort();
    if let Some(name) = unknown.first() {
        return Err(MigrationError::inconsistent(
            name.as_str(),
            "recorded as applied but no migration with this name is defined",
        ));
    }

    let applied_count = applied.len();
    if let Some(missing) = registry[..applied_count]
        .iter()
        .find(|m| !applied.contains(&m.name))
    {
        let later = registry[applied_count..]
            .iter()
            .find(|m| applied.contains(&m.name))
            .map(|m| m.name.as_str())
            .unwrap_or("a later migration");
        return Err(MigrationError::inconsistent(
            missing.name.as_str(),
            format!("not applied, but {} which sorts after it is applied", later),
        ));
    }

    Ok(())
}
