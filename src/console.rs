//! Operator-facing console lines.
//!
//! Confirmations go to stdout, errors to stderr. Colour is used only when
//! the stream is a terminal and `NO_COLOR` is unset.

use std::fmt::Display;
use std::io::IsTerminal;

use crossterm::style::Stylize;
use serde_json::Value;

use crate::store::TableBinding;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Console {
    color: bool,
}

impl Console {
    pub fn detect() -> Self {
        let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
        Self {
            color: !no_color && std::io::stdout().is_terminal() && std::io::stderr().is_terminal(),
        }
    }

    pub const fn plain() -> Self {
        Self { color: false }
    }

    /// Confirm one successful write-back.
    pub fn updated(&self, id: &Value, binding: &TableBinding) {
        let line = update_message(id, binding);
        if self.color {
            println!("{}", line.yellow());
        } else {
            println!("{line}");
        }
    }

    pub fn error(&self, err: &dyn Display) {
        if self.color {
            eprintln!("{}", err.to_string().red());
        } else {
            eprintln!("{err}");
        }
    }

    pub fn success(&self) {
        if self.color {
            println!("{}", "Success!".green());
        } else {
            println!("Success!");
        }
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::detect()
    }
}

/// The confirmation printed after a record is saved.
pub fn update_message(id: &Value, binding: &TableBinding) -> String {
    let id = match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    format!(
        "Updated record with id \"{id}\" in table \"{}\", database \"{}\".",
        binding.table, binding.database
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_message_names_id_table_and_database() {
        let binding = TableBinding::new("mydb", "users");
        assert_eq!(
            update_message(&json!("1"), &binding),
            "Updated record with id \"1\" in table \"users\", database \"mydb\"."
        );
        assert_eq!(
            update_message(&json!(42), &binding),
            "Updated record with id \"42\" in table \"users\", database \"mydb\"."
        );
    }
}
