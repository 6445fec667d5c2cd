//! Task values and their authoring helpers

pub mod args;
pub mod function;
pub mod parse;
pub mod spec;
pub mod value;

pub use args::{parse_arg_opts, ArgOption, ArgValue, ArgValues, OptionType};
pub use function::{Done, FollowOn, IntoFollowOn, TaskFn, TaskFuture};
pub use parse::{parse_array, ArrayElement};
pub use spec::{split_shell, CommandLine, EnvSpec, ExecSpec, ShellFlags, TaskSpec};
pub use value::{
    concurrent, env, exec, serial, Composition, TaskArray, TaskObject, TaskValue, SERIAL_SIG,
    STR_ARRAY_SIG,
};
