//! Thin logging shim.
//!
//! A hosted build has no reason to gate logging behind a feature flag the
//! way an embedded target would to avoid pulling in a backend unconditionally,
//! so these macros always forward straight to the `log` crate.

macro_rules! error {
    ($($t:tt)*) => {{ log::error!($($t)*); }};
}

macro_rules! warn {
    ($($t:tt)*) => {{ log::warn!($($t)*); }};
}

macro_rules! info {
    ($($t:tt)*) => {{ log::info!($($t)*); }};
}

macro_rules! debug {
    ($($t:tt)*) => {{ log::debug!($($t)*); }};
}

macro_rules! trace {
    ($($t:tt)*) => {{ log::trace!($($t)*); }};
}

pub(crate) use {debug, error, info, trace, warn};
