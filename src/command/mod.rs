//! Guard rails for the container-runtime exec path.

mod validator;

pub use validator::{CommandError, CommandValidator, DEFAULT_MAX_ARGS, DEFAULT_MAX_ARG_LEN};
