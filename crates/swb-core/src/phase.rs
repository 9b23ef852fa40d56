//! Phase state machine
//!
//! `specification -> plan -> tasks -> completed`, forward only. Re-viewing an
//! earlier phase is navigation and never changes the phase.

use crate::error::WorkbenchError;
use crate::model::{Phase, Spec};
use std::fmt;

/// Validates a single-step phase transition.
pub fn validate_transition(from: Phase, to: Phase) -> Result<(), WorkbenchError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(WorkbenchError::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from` in one step.
pub fn allowed_transitions(from: Phase) -> Vec<Phase> {
    use Phase::*;
    match from {
        Specification => vec![Plan],
        Plan => vec![Tasks],
        Tasks => vec![Completed],
        Completed => vec![],
    }
}

/// Path of single steps from `from` up to `target`.
///
/// Empty when `target` is not ahead of `from`; re-running an earlier phase
/// operation leaves the phase where it is.
#[must_use]
pub fn forward_path(from: Phase, target: Phase) -> Vec<Phase> {
    Phase::ALL
        .into_iter()
        .filter(|p| *p > from && *p <= target)
        .collect()
}

/// Advance `phase` to `target`, validating every step
pub fn advance(phase: &mut Phase, target: Phase) -> Result<Vec<Phase>, WorkbenchError> {
    let path = forward_path(*phase, target);
    let mut current = *phase;
    for step in &path {
        validate_transition(current, *step)?;
        current = *step;
    }
    *phase = current;
    Ok(path)
}

/// User action gated by phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Persist the spec
    Save,
    /// Stream an enhancement into the content
    Enhance,
    /// Generate the formal specification
    Specify,
    /// Generate the implementation plan
    GeneratePlan,
    /// Generate tasks from the plan
    GenerateTasks,
    /// Select tasks for delegation
    SelectTasks,
    /// Delegate selected tasks to coding agents
    Delegate,
}

impl Action {
    /// Display name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Save => "save",
            Action::Enhance => "enhance",
            Action::Specify => "specify",
            Action::GeneratePlan => "plan generation",
            Action::GenerateTasks => "task generation",
            Action::SelectTasks => "task selection",
            Action::Delegate => "delegation",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions enabled for a spec in its current phase
#[must_use]
pub fn enabled_actions(spec: &Spec) -> Vec<Action> {
    let mut actions = vec![Action::Save, Action::Enhance];
    match spec.phase {
        Phase::Specification => actions.push(Action::Specify),
        Phase::Plan => {
            actions.extend([Action::Specify, Action::GeneratePlan]);
            if spec.has_plan_artifacts() {
                actions.push(Action::GenerateTasks);
            }
        }
        Phase::Tasks => {
            actions.extend([Action::GeneratePlan, Action::GenerateTasks]);
        }
        Phase::Completed => {
            actions.extend([
                Action::GenerateTasks,
                Action::SelectTasks,
                Action::Delegate,
            ]);
        }
    }
    actions
}

/// Fail with `ActionNotEnabled` unless `action` is enabled
pub fn ensure_enabled(spec: &Spec, action: Action) -> Result<(), WorkbenchError> {
    if enabled_actions(spec).contains(&action) {
        Ok(())
    } else {
        Err(WorkbenchError::ActionNotEnabled {
            action,
            phase: spec.phase,
        })
    }
}

/// Workbench view; navigation only
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum View {
    /// Title, description, tags
    #[default]
    Details,
    /// Requirements editing
    Specify,
    /// Planning configuration and artifacts
    Plan,
    /// Task list and delegation
    Tasks,
}

impl View {
    /// Natural view for a phase
    #[inline]
    #[must_use]
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Specification => View::Specify,
            Phase::Plan => View::Plan,
            Phase::Tasks | Phase::Completed => View::Tasks,
        }
    }
}

/// Check if `view` may be opened for `spec`
///
/// The tasks view opens once plan artifacts exist, before the phase itself
/// reaches `tasks`.
#[must_use]
pub fn view_enabled(spec: &Spec, view: View) -> bool {
    match view {
        View::Details | View::Specify => true,
        View::Plan => spec.phase >= Phase::Plan,
        View::Tasks => spec.phase >= Phase::Tasks || spec.has_plan_artifacts(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_transitions() {
        assert!(validate_transition(Phase::Specification, Phase::Plan).is_ok());
        assert!(validate_transition(Phase::Plan, Phase::Tasks).is_ok());
        assert!(validate_transition(Phase::Tasks, Phase::Completed).is_ok());

        assert!(validate_transition(Phase::Specification, Phase::Tasks).is_err());
        assert!(validate_transition(Phase::Plan, Phase::Specification).is_err());
        assert!(validate_transition(Phase::Completed, Phase::Completed).is_err());
    }

    #[test]
    fn advance_is_stepwise_and_forward_only() {
        let mut phase = Phase::Plan;
        assert_eq!(
            advance(&mut phase, Phase::Completed).unwrap(),
            vec![Phase::Tasks, Phase::Completed]
        );
        assert_eq!(phase, Phase::Completed);

        assert!(advance(&mut phase, Phase::Plan).unwrap().is_empty());
        assert_eq!(phase, Phase::Completed);
    }

    #[test]
    fn actions_per_phase() {
        let mut spec = Spec::new("t");
        assert!(enabled_actions(&spec).contains(&Action::Specify));
        assert!(ensure_enabled(&spec, Action::GeneratePlan).is_err());

        spec.phase = Phase::Plan;
        assert!(ensure_enabled(&spec, Action::GeneratePlan).is_ok());
        assert!(ensure_enabled(&spec, Action::GenerateTasks).is_err());
        spec.plan = Some("# Plan".to_string());
        assert!(ensure_enabled(&spec, Action::GenerateTasks).is_ok());
        assert!(ensure_enabled(&spec, Action::Delegate).is_err());

        spec.phase = Phase::Completed;
        assert!(ensure_enabled(&spec, Action::Delegate).is_ok());
        assert!(ensure_enabled(&spec, Action::Specify).is_err());
    }

    #[test]
    fn tasks_view_opens_with_plan_artifacts() {
        let mut spec = Spec::new("t");
        spec.phase = Phase::Plan;
        assert!(!view_enabled(&spec, View::Tasks));
        spec.research = Some("notes".to_string());
        assert!(view_enabled(&spec, View::Tasks));
        assert_eq!(spec.phase, Phase::Plan);
    }

    #[test]
    fn view_for_phase() {
        assert_eq!(View::for_phase(Phase::Specification), View::Specify);
        assert_eq!(View::for_phase(Phase::Completed), View::Tasks);
    }
}
