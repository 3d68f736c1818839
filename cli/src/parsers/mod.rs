use clap::error::ErrorKind;
use std::fmt::Display;

mod component;
pub use component::{FlatComponent, FlatComponentValueParser};

pub fn simple_error(err: impl Display) -> clap::Error {
    clap::Error::raw(ErrorKind::InvalidValue, format!("{}\n", err))
}
