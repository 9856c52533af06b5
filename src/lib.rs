mod action;
mod bucket;
mod container;
mod error;
mod eval;
mod experiment;
mod flow;
mod hash;
mod in_app_message;
mod matcher;
mod metrics;
mod overrides;
mod remote_config;
mod target;
mod test_common;
mod user;
mod value;
mod workspace;

pub use action::*;
pub use bucket::*;
pub use container::*;
pub use error::*;
pub use eval::*;
pub use experiment::*;
pub use flow::*;
pub use hash::*;
pub use in_app_message::*;
pub use matcher::*;
pub use metrics::*;
pub use overrides::*;
pub use remote_config::*;
pub use target::*;
pub use user::*;
pub use value::*;
pub use workspace::*;
