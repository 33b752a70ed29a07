//! Common errors across the cygnss-podaac crate

/// Errors raised while deriving metadata from file names and attribute strings
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The file name did not end with a `YYYY_DDD` day-of-year stamp before its extension.
    #[error("File name '{0}' does not end with a YYYY_DDD day-of-year stamp before its extension")]
    FilenameTimestamp(String),
    /// The history attribute did not carry a creation date in either accepted format.
    #[error("History string '{0}' does not contain a creation date in dd-Mon-YYYY or YYYY-mm-dd form at offset 8")]
    HistoryDate(String),
    /// The version attribute was not of the form `version <float>`.
    #[error("Version attribute '{0}' is not of the form 'version <float>'")]
    VersionAttr(String),
}
