//! Error types produced by runners and by the supervisor.
//!
//! - [`Canceled`] is the sentinel a runner returns when it stopped because its context was cancelled.
//! - [`RunnerError`] is the classified outcome of one supervised runner.
//! - [`RunError`] aggregates every failed runner of a supervised batch.
//!
//! Matching works like `errors.Is` in other ecosystems: [`find_source`] walks the `source()` chain,
//! so a caller can look for a specific error anywhere inside an aggregate.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// Boxed error returned by runners and servers.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Returned by a runner that stopped because its context was cancelled.
///
/// The supervisor treats it as a clean stop once the shared context is cancelled.
#[derive(Error, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[error("context canceled")]
pub struct Canceled;

/// Walks the `source()` chain of `err` (including `err` itself) and returns the first `E` found.
pub fn find_source<'a, E>(err: &'a (dyn StdError + 'static)) -> Option<&'a E>
where
    E: StdError + 'static,
{
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Returns `true` if [`Canceled`] appears anywhere in the chain of `err`.
pub fn is_canceled(err: &(dyn StdError + 'static)) -> bool {
    find_source::<Canceled>(err).is_some()
}

/// # Classified failure of one supervised runner.
///
/// `index` is the 1-based position of the runner in the batch handed to [`run`](crate::run).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The runner returned while the shared context was still live.
    #[error("(runner {index}) unexpected return{}", describe_cause(.source))]
    UnexpectedReturn {
        /// Position of the runner.
        index: usize,
        /// Error returned by the runner, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The runner failed while shutting down with an error other than [`Canceled`].
    #[error("(runner {index}) {source}")]
    Failed {
        /// Position of the runner.
        index: usize,
        /// Error returned by the runner.
        #[source]
        source: BoxError,
    },

    /// The runner panicked.
    #[error("(runner {index}) panicked: {message}")]
    Panicked {
        /// Position of the runner.
        index: usize,
        /// Panic payload, when it was a string.
        message: String,
    },
}

fn describe_cause(source: &Option<BoxError>) -> String {
    match source {
        Some(err) => format!(": {err}"),
        None => String::new(),
    }
}

impl RunnerError {
    /// 1-based position of the runner this error belongs to.
    pub fn index(&self) -> usize {
        match self {
            RunnerError::UnexpectedReturn { index, .. }
            | RunnerError::Failed { index, .. }
            | RunnerError::Panicked { index, .. } => *index,
        }
    }

    /// Returns `true` for [`RunnerError::UnexpectedReturn`].
    pub fn is_unexpected_return(&self) -> bool {
        matches!(self, RunnerError::UnexpectedReturn { .. })
    }

    /// Returns a short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunnerError::UnexpectedReturn { .. } => "runner_unexpected_return",
            RunnerError::Failed { .. } => "runner_failed",
            RunnerError::Panicked { .. } => "runner_panicked",
        }
    }
}

/// # Aggregate error of a supervised batch.
///
/// Holds one [`RunnerError`] per failed runner, ordered by runner position
/// (not by completion order), so diagnostics stay deterministic.
#[derive(Debug)]
pub struct RunError {
    errors: Vec<RunnerError>,
}

impl RunError {
    pub(crate) fn new(errors: Vec<RunnerError>) -> Self {
        debug_assert!(!errors.is_empty());
        Self { errors }
    }

    /// Every constituent error, in runner order.
    pub fn errors(&self) -> &[RunnerError] {
        &self.errors
    }

    /// Number of failed runners.
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always `false`: an aggregate is only built when at least one runner failed.
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns `true` if any runner returned before being told to stop.
    pub fn is_unexpected_return(&self) -> bool {
        self.errors.iter().any(RunnerError::is_unexpected_return)
    }

    /// Error of the runner at the given 1-based position, if it failed.
    pub fn runner(&self, index: usize) -> Option<&RunnerError> {
        self.errors.iter().find(|e| e.index() == index)
    }

    /// Searches every constituent (and its whole source chain) for an `E`.
    pub fn find<E>(&self) -> Option<&E>
    where
        E: StdError + 'static,
    {
        self.errors.iter().find_map(|e| find_source::<E>(e))
    }

    /// Returns `true` if an `E` appears anywhere in the aggregate.
    pub fn contains<E>(&self) -> bool
    where
        E: StdError + 'static,
    {
        self.find::<E>().is_some()
    }

    /// Returns `true` if any constituent chain holds this exact error instance.
    pub fn contains_instance(&self, target: &(dyn StdError + 'static)) -> bool {
        let target = target as *const dyn StdError as *const ();
        self.errors.iter().any(|e| {
            let mut current: Option<&(dyn StdError + 'static)> = Some(e);
            while let Some(err) = current {
                if std::ptr::eq(err as *const dyn StdError as *const (), target) {
                    return true;
                }
                current = err.source();
            }
            false
        })
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl StdError for RunError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.errors.first().map(|e| e as &(dyn StdError + 'static))
    }
}

impl IntoIterator for RunError {
    type Item = RunnerError;
    type IntoIter = std::vec::IntoIter<RunnerError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}
