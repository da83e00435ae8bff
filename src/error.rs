use std::{error::Error, result::Result as StdResult};

/// Boxed error used by user-supplied handler callbacks.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

pub type Result<T> = StdResult<T, BoxError>;
