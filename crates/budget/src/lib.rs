//! Run-level budget tracking: turns, per-task retries, replans, and the
//! step (task-count) ceiling the Gate consults for `add_task` requests.
//!
//! The limits themselves live on [`loom_core::Budgets`] (part of the run's
//! [`loom_core::Policy`]); this crate turns raw usage counters into the
//! pass/fail and warning-level decisions the Turn Loop/Runtime and Gate act
//! on.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use loom_core::Budgets;

/// Run-level limits that live outside [`Budgets`]: the runtime drives a
/// fixed number of turns and caps how many tool calls a single turn may
/// submit, independent of the per-task action budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    /// Maximum number of turns the Turn Loop will drive.
    pub max_turns: u64,
    /// Maximum tool calls a single turn may submit, before also being
    /// capped by `policy.budgets.max_actions_per_task`.
    pub max_tool_calls_per_turn: u64,
}

/// How close a usage count is to its limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    /// Comfortably under the limit.
    Within,
    /// At or above 80% of the limit.
    Warning80,
    /// At or above 90% of the limit.
    Warning90,
    /// At or above the limit.
    Exceeded,
}

fn state_for_ratio(used: u64, limit: u64) -> BudgetState {
    if limit == 0 {
        return if used == 0 { BudgetState::Within } else { BudgetState::Exceeded };
    }
    let ratio = used as f64 / limit as f64;
    if ratio >= 1.0 {
        BudgetState::Exceeded
    } else if ratio >= 0.90 {
        BudgetState::Warning90
    } else if ratio >= 0.80 {
        BudgetState::Warning80
    } else {
        BudgetState::Within
    }
}

/// True iff `turns_used` has reached `limits.max_turns`.
#[must_use]
pub fn turns_exhausted(turns_used: u64, limits: RunLimits) -> bool {
    turns_used >= limits.max_turns
}

/// True iff `retries_used` for one task has reached
/// `policy.budgets.max_retries_per_task`.
#[must_use]
pub fn retries_exhausted(retries_used: u64, policy: &Budgets) -> bool {
    retries_used >= policy.max_retries_per_task
}

/// True iff `replans_used` has reached `policy.budgets.max_replans`.
#[must_use]
pub fn replans_exhausted(replans_used: u64, policy: &Budgets) -> bool {
    replans_used >= policy.max_replans
}

/// The effective cap on tool calls for one turn: the tighter of the
/// runtime's per-turn cap and the policy's per-task action budget.
#[must_use]
pub fn max_actions_for_turn(limits: RunLimits, policy: &Budgets) -> u64 {
    limits.max_tool_calls_per_turn.min(policy.max_actions_per_task)
}

/// Warning level for the plan's current task count against
/// `policy.budgets.max_steps`, consulted before approving an `add_task`
/// change that would grow the plan.
#[must_use]
pub fn step_budget_state(current_task_count: u64, policy: &Budgets) -> BudgetState {
    state_for_ratio(current_task_count, policy.max_steps)
}

/// True iff adding `steps_delta` more tasks (clamped to non-negative) would
/// stay within `policy.budgets.max_steps`.
#[must_use]
pub fn add_task_within_step_budget(current_task_count: u64, steps_delta: i64, policy: &Budgets) -> bool {
    let delta = steps_delta.max(0) as u64;
    current_task_count.saturating_add(delta) <= policy.max_steps
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> Budgets {
        Budgets { max_steps: 10, max_actions_per_task: 5, max_retries_per_task: 3, max_replans: 2 }
    }

    #[test]
    fn retries_exhausted_at_limit() {
        let p = policy();
        assert!(!retries_exhausted(2, &p));
        assert!(retries_exhausted(3, &p));
    }

    #[test]
    fn replans_exhausted_at_limit() {
        let p = policy();
        assert!(!replans_exhausted(1, &p));
        assert!(replans_exhausted(2, &p));
    }

    #[test]
    fn turns_exhausted_at_limit() {
        let limits = RunLimits { max_turns: 20, max_tool_calls_per_turn: 8 };
        assert!(!turns_exhausted(19, limits));
        assert!(turns_exhausted(20, limits));
    }

    #[test]
    fn max_actions_for_turn_takes_tighter_cap() {
        let limits = RunLimits { max_turns: 20, max_tool_calls_per_turn: 8 };
        assert_eq!(max_actions_for_turn(limits, &policy()), 5);
    }

    #[test]
    fn step_budget_state_transitions() {
        let p = policy();
        assert_eq!(step_budget_state(7, &p), BudgetState::Within);
        assert_eq!(step_budget_state(8, &p), BudgetState::Warning80);
        assert_eq!(step_budget_state(9, &p), BudgetState::Warning90);
        assert_eq!(step_budget_state(10, &p), BudgetState::Exceeded);
    }

    #[test]
    fn add_task_boundary_is_inclusive() {
        let p = policy();
        assert!(add_task_within_step_budget(9, 1, &p));
        assert!(!add_task_within_step_budget(10, 1, &p));
    }
}
