//! Parameter maps used to construct backends.
//!
//! Backends are configured from a flat string-to-string map (credentials,
//! endpoints, mount points). The helpers here turn entries into typed values
//! and report missing or malformed keys as [`ErrorCode::InvalidArgument`].

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use crate::{ErrorCode, FsError, Identity};

/// String parameters for constructing a backend or opening a file.
pub type Params = HashMap<String, String>;

/// Default timeout for asynchronous operations (120 s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(120_000);

/// Default number of attempts for a retried native call.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 6;

/// Returns a required parameter parsed as `T`.
///
/// # Errors
///
/// [`ErrorCode::InvalidArgument`] if the key is missing or cannot be parsed.
pub fn get_param<T: FromStr>(params: &Params, key: &str) -> Result<T, FsError> {
    let raw = params.get(key).ok_or_else(|| {
        FsError::with_message(
            ErrorCode::InvalidArgument,
            "config",
            format!("missing parameter '{key}'"),
        )
    })?;
    parse(key, raw)
}

/// Returns an optional parameter parsed as `T`, or `default` if absent.
///
/// # Errors
///
/// [`ErrorCode::InvalidArgument`] if the key is present but cannot be parsed.
pub fn get_param_or<T: FromStr>(params: &Params, key: &str, default: T) -> Result<T, FsError> {
    match params.get(key) {
        Some(raw) => parse(key, raw),
        None => Ok(default),
    }
}

/// Reads the `timeout` parameter in milliseconds.
pub fn timeout_param(params: &Params) -> Result<Duration, FsError> {
    let millis = get_param_or(params, "timeout", DEFAULT_TIMEOUT.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

/// Reads the `uid`/`gid` pair; absent or negative values are unspecified.
pub fn identity_param(params: &Params) -> Result<Identity, FsError> {
    let uid = get_param_or(params, "uid", -1i64)?;
    let gid = get_param_or(params, "gid", -1i64)?;
    Ok(Identity::from_raw(uid, gid))
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T, FsError> {
    raw.trim().parse().map_err(|_| {
        FsError::with_message(
            ErrorCode::InvalidArgument,
            "config",
            format!("invalid value '{raw}' for parameter '{key}'"),
        )
    })
}
