pub mod auth;
pub mod config;
pub mod err;
pub mod exam;
pub mod models;
pub mod routes;
pub mod store;
pub mod validate;

use serde::Serialize;

pub use crate::err::{Error, Maybe};
use crate::err::{Fine, Nothing};

pub type Payload<T> = Result<Maybe<T>, Error>;

pub fn proceeds<V>(value: V) -> Payload<V>
where
    V: Serialize,
{
    Ok(Fine(value))
}

pub fn breaks<V>(err: Error) -> Payload<V>
where
    V: Serialize,
{
    Ok(Nothing(err))
}
