//! Offset/count pagination over directory listings.

/// Skips `offset` entries, then collects up to `count`.
///
/// `.` and `..` are dropped before counting, so they never consume part of
/// the window.
pub fn paginate<I, S>(names: I, offset: u64, count: usize) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let skip = usize::try_from(offset).unwrap_or(usize::MAX);
    names
        .into_iter()
        .map(Into::into)
        .filter(|name| name != "." && name != "..")
        .skip(skip)
        .take(count)
        .collect()
}
