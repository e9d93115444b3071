//! Server/client property naming conventions.

use serde::{Deserialize, Serialize};

/// Translates property names between the server's and the client's casing.
///
/// An explicit `name_on_server` on a property always wins over the convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NamingConvention {
    /// Names are identical on both sides.
    #[default]
    None,
    /// Server uses PascalCase, client uses camelCase.
    CamelCase,
}

impl NamingConvention {
    /// Converts a server property name to its client name.
    pub fn server_to_client(&self, name: &str) -> String {
        match self {
            NamingConvention::None => name.to_string(),
            NamingConvention::CamelCase => recase_first(name, char::to_ascii_lowercase),
        }
    }

    /// Converts a client property name to its server name.
    pub fn client_to_server(&self, name: &str) -> String {
        match self {
            NamingConvention::None => name.to_string(),
            NamingConvention::CamelCase => recase_first(name, char::to_ascii_uppercase),
        }
    }
}

fn recase_first(name: &str, f: fn(&char) -> char) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(name.len());
            out.push(f(&first));
            out.extend(chars);
            out
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_round_trip() {
        let c = NamingConvention::CamelCase;
        assert_eq!(c.server_to_client("CustomerID"), "customerID");
        assert_eq!(c.client_to_server("customerID"), "CustomerID");
        assert_eq!(c.server_to_client(""), "");
    }

    #[test]
    fn none_is_identity() {
        assert_eq!(NamingConvention::None.client_to_server("name"), "name");
    }
}
