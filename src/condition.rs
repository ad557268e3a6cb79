// src/condition.rs
//! Pure pass/fail evaluation for task condition lists.

/// A zero-argument predicate gating whether a task's per-tick action runs.
pub type Condition = Box<dyn Fn() -> bool>;

/// Stable handle for removing a condition; boxed closures are not
/// comparable, so additions hand one of these back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConditionKey(pub(crate) u64);

/// How a condition list is combined into a single pass/fail outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    /// Every condition must pass; an empty list passes.
    #[default]
    All,
    /// At least one condition must pass; an empty list fails.
    One,
}

/// What happens to a task when its conditions fail for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// Cancel the task outright (no completion callback).
    #[default]
    End,
    /// Hold the task, re-evaluating each tick until conditions pass again.
    Pause,
}

/// Evaluates an ordered condition sequence under `mode`, short-circuiting
/// on the first decisive predicate.
pub fn evaluate<'a, I>(mode: EvalMode, conditions: I) -> bool
where
    I: IntoIterator<Item = &'a Condition>,
{
    let mut conditions = conditions.into_iter();
    match mode {
        EvalMode::All => conditions.all(|c| c()),
        EvalMode::One => conditions.any(|c| c()),
    }
}
