use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};
use tracing::{error, warn};

/// Everything that can go wrong while selecting, annotating or cropping tiles ends up here.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct TmError {
    msg: String,
}
impl TmError {
    pub fn new(msg: &str) -> TmError {
        TmError {
            msg: msg.to_string(),
        }
    }
    pub fn msg(&self) -> &str {
        &self.msg
    }
}
impl Display for TmError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}
impl Error for TmError {}
impl From<&str> for TmError {
    fn from(value: &str) -> Self {
        TmError::new(value)
    }
}
/// tilemark's result type with [`TmError`](TmError) as error type.
pub type TmResult<U> = Result<U, TmError>;

pub fn trace_ok_err<T, E>(x: Result<T, E>) -> Option<T>
where
    E: Debug,
{
    match x {
        Ok(x) => Some(x),
        Err(e) => {
            error!("{e:?}");
            None
        }
    }
}
pub fn trace_ok_warn<T, E>(x: Result<T, E>) -> Option<T>
where
    E: Debug,
{
    match x {
        Ok(x) => Some(x),
        Err(e) => {
            warn!("{e:?}");
            None
        }
    }
}
/// Creates a [`TmError`](TmError) with a formatted message.
/// ```rust
/// # use std::error::Error;
/// use tmlib::{tmerr, result::TmError};
/// # fn main() -> Result<(), Box<dyn Error>> {
/// assert_eq!(tmerr!("some error {}", 1), TmError::new(format!("some error {}", 1).as_str()));
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! tmerr {
    ($s:literal) => {
        $crate::result::TmError::new(format!($s).as_str())
    };
    ($s:literal, $( $exps:expr ),*) => {
        $crate::result::TmError::new(format!($s, $($exps,)*).as_str())
    }
}

pub fn to_tm<E: Debug>(e: E) -> TmError {
    tmerr!(
        "original error type is '{:?}', error message is '{:?}'",
        std::any::type_name::<E>(),
        e
    )
}

#[test]
fn test_to_tm() {
    let e = to_tm(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
    assert!(e.msg().contains("std::io::error::Error"));
    assert!(e.msg().contains("gone"));
    assert_eq!(trace_ok_warn::<u8, _>(Err(e)), None);
    assert_eq!(trace_ok_err::<u8, TmError>(Ok(3)), Some(3));
}
