use crate::set::SetError;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the sample set")]
    Set(#[from] SetError),
}
