mod inspect;
mod instance;

pub(crate) use inspect::{cmd_queue, cmd_resolve, cmd_status};
pub(crate) use instance::{cmd_discard, cmd_edit, cmd_new, NewArgs};

use serde::Serialize;

use crate::OutputFormat;

/// Print `value` as pretty JSON, or `text` otherwise.
pub(crate) fn emit<T: Serialize>(output: OutputFormat, value: &T, text: impl FnOnce() -> String) {
    match output {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("serialization error: {}", e),
        },
        OutputFormat::Text => println!("{}", text()),
    }
}
