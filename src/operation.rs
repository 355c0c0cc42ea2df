use std::{
    any::Any,
    fmt,
    hint::black_box,
    panic::{self, AssertUnwindSafe},
};

type Action<'a> = Box<dyn FnMut() -> Result<(), String> + 'a>;

/// A labelled, zero-argument unit of work to be measured.
///
/// Bind the inputs in the closure; the harness only ever calls it. Return values
/// go through [`black_box`] so the work is not optimised away.
///
/// An operation "raises" by returning `Err` (see [`Operation::fallible`]) or by
/// panicking. Either way the failure is caught and reported for this operation
/// only.
///
/// # Example
/// ```rust
/// use comparo::Operation;
///
/// let values: Vec<i64> = (0..1_000).collect();
/// let op = Operation::new("sum", || values.iter().sum::<i64>());
/// assert_eq!(op.label(), "sum");
/// ```
pub struct Operation<'a> {
    label: String,
    action: Action<'a>,
}

impl<'a> Operation<'a> {
    pub fn new<F, T>(label: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut() -> T + 'a,
    {
        Self {
            label: label.into(),
            action: Box::new(move || {
                black_box(f());
                Ok(())
            }),
        }
    }

    /// An operation whose `Err` results count as failures.
    pub fn fallible<F, T, E>(label: impl Into<String>, mut f: F) -> Self
    where
        F: FnMut() -> Result<T, E> + 'a,
        E: fmt::Display,
    {
        Self {
            label: label.into(),
            action: Box::new(move || match f() {
                Ok(value) => {
                    black_box(value);
                    Ok(())
                }
                Err(e) => Err(e.to_string()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Call the operation once, turning errors and panics into a reason string.
    pub(crate) fn invoke(&mut self) -> Result<(), String> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.action)())) {
            Ok(outcome) => outcome,
            Err(payload) => Err(panic_message(payload.as_ref())),
        }
    }
}

impl fmt::Debug for Operation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {msg}")
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {msg}")
    } else {
        "panicked".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn invoke_runs_the_closure() {
        let calls = Cell::new(0);
        let mut op = Operation::new("count", || calls.set(calls.get() + 1));
        op.invoke().unwrap();
        op.invoke().unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn fallible_errors_become_reasons() {
        let mut op = Operation::fallible("parse", || "x".parse::<i32>());
        let reason = op.invoke().unwrap_err();
        assert_eq!(reason, "invalid digit found in string");
    }

    #[test]
    fn panics_are_caught() {
        let mut op = Operation::new("boom", || -> u32 { panic!("exploded") });
        assert_eq!(op.invoke().unwrap_err(), "panicked: exploded");

        let mut op = Operation::new("boom", || -> u32 { panic!("code {}", 7) });
        assert_eq!(op.invoke().unwrap_err(), "panicked: code 7");
    }

    #[test]
    fn debug_shows_the_label() {
        let op = Operation::new("double", || 2 * 2);
        assert_eq!(format!("{op:?}"), "Operation { label: \"double\", .. }");
    }
}
