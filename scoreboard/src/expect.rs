// Licensed under the Apache-2.0 license

use core::fmt;

/// Expected value of a single scoreboard field.
///
/// Replaces the string sentinels ("dc"/"error"/"noerror") the flow
/// historically used: one typed comparison instead of ad hoc string checks.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Expect<T> {
    Exact(T),
    DontCare,
    /// Field must hold the error sentinel (any non-zero value).
    ErrorSentinel,
    /// Field must hold the no-error sentinel (zero).
    NoErrorSentinel,
}

impl<T> Default for Expect<T> {
    fn default() -> Self {
        Expect::DontCare
    }
}

impl Expect<u32> {
    pub fn matches(&self, measured: u32) -> bool {
        match *self {
            Expect::Exact(v) => measured == v,
            Expect::DontCare => true,
            Expect::ErrorSentinel => measured != 0,
            Expect::NoErrorSentinel => measured == 0,
        }
    }
}

impl<T: fmt::Display> fmt::Display for Expect<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Exact(v) => write!(f, "{v}"),
            Expect::DontCare => write!(f, "dont-care"),
            Expect::ErrorSentinel => write!(f, "error"),
            Expect::NoErrorSentinel => write!(f, "no-error"),
        }
    }
}
