/// Turns a fallible result into an `Option`, logging the error instead of propagating it.
///
/// Used where one failing input must not abort a larger operation, e.g. a single unreadable
/// stat file during a stats collection cycle.
pub trait ResultOkLogExt<T, E> {
    /// Logs the error at `warn` level, prefixed with `context`, and returns `None`.
    fn ok_log(self, context: &str) -> Option<T>;
}

impl<T, E> ResultOkLogExt<T, E> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn ok_log(self, context: &str) -> Option<T> {
        match self {
            Ok(ok) => Some(ok),
            Err(err) => {
                log::warn!("{context}: {err}");
                None
            }
        }
    }
}
