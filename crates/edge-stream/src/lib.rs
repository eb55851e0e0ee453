//! Character streaming and incremental JSON parsing for values produced by
//! an LLM/model executor on another thread (spec §4.5).

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod char_stream;
mod json;

pub use char_stream::{CharStream, CharStreamSubscriber, StreamError};
pub use json::{
    get_value_stream, JsonArrayStream, JsonNumberStream, JsonObjectStream, JsonStreamError,
    JsonStringStream, JsonValueStream,
};
