mod call;
mod introspect;
mod properties;
mod wait;

pub use call::{CallCommand, parse_arg};
pub use introspect::IntrospectCommand;
pub use properties::PropertiesCommand;
pub use wait::WaitCommand;
