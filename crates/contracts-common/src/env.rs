//! Typed environment variable lookups
//!
//! An unset (or empty) variable is `None`. A variable that is set but does not
//! parse is a [`CommonError::Config`] naming the variable, so a typo in a
//! deployment surfaces at startup instead of silently falling back to a
//! default.

use std::fmt::Display;
use std::str::FromStr;

use crate::error::{CommonError, Result};

/// Read and parse `name`, returning `None` when it is unset or empty.
pub fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            CommonError::config(format!("{} has invalid value {:?}: {}", name, raw, e))
        }),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => {
            Err(CommonError::config(format!("{} is not valid unicode", name)))
        },
    }
}

/// Read and parse `name`, falling back to `default` when unset.
pub fn parse_var_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    Ok(parse_var(name)?.unwrap_or(default))
}
