//! Tabrix xl error
//!
//! Every fallible operation of the crate returns `XlResult<T>`.

use thiserror::Error;

pub type XlResult<T> = Result<T, XlError>;

#[derive(Debug)]
pub enum CommonError {
    Str(&'static str),
    String(String),
}

impl AsRef<str> for CommonError {
    fn as_ref(&self) -> &str {
        match self {
            CommonError::Str(s) => s,
            CommonError::String(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for CommonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommonError::Str(v) => write!(f, "{:?}", v),
            CommonError::String(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<&'static str> for CommonError {
    fn from(v: &'static str) -> Self {
        CommonError::Str(v)
    }
}

impl From<String> for CommonError {
    fn from(v: String) -> Self {
        CommonError::String(v)
    }
}

#[derive(Error, Debug)]
pub enum XlError {
    #[error("common error {0}")]
    Common(CommonError),

    /// The sheet markup cannot be interpreted: bad shared string index, unparsable
    /// structural attribute, or a cell/row marker outside of its parent.
    #[error("corrupt document: {0}")]
    CorruptDocument(String),

    /// Non-numeric text stored in a numeric cell. Only raised by the numeric accessors.
    #[error("malformed number {0:?}")]
    MalformedNumber(String),

    #[error("unsupported cell type '{0}'")]
    UnsupportedCellType(String),

    #[error("cannot get a {expected} value from a {actual} cell")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{0} not found")]
    SourceNotFound(String),

    #[error("reader already closed")]
    Closed,

    // IO errors, including backing files
    #[error(transparent)]
    Io(#[from] std::io::Error),

    // window (de)serialization
    #[error(transparent)]
    Spill(#[from] bincode::Error),

    // Xml errors
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    // Zip errors
    #[cfg(feature = "workbook")]
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

impl XlError {
    pub fn new_common_error<T>(msg: T) -> XlError
    where
        T: Into<CommonError>,
    {
        XlError::Common(msg.into())
    }

    pub fn new_corrupt_error<T>(msg: T) -> XlError
    where
        T: Into<String>,
    {
        XlError::CorruptDocument(msg.into())
    }

    /// A copy of this error, for a reader that keeps answering with its first failure.
    /// Wrapped foreign errors are carried by message.
    pub fn replay(&self) -> XlError {
        match self {
            XlError::CorruptDocument(m) => XlError::CorruptDocument(m.clone()),
            XlError::MalformedNumber(m) => XlError::MalformedNumber(m.clone()),
            XlError::UnsupportedCellType(m) => XlError::UnsupportedCellType(m.clone()),
            XlError::TypeMismatch { expected, actual } => XlError::TypeMismatch {
                expected: *expected,
                actual: *actual,
            },
            XlError::SourceNotFound(m) => XlError::SourceNotFound(m.clone()),
            XlError::Closed => XlError::Closed,
            e => XlError::new_common_error(e.to_string()),
        }
    }
}
