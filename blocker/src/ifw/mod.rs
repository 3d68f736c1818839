//! Intent firewall rule files, one `<package>.xml` per package.

use std::io;

use thiserror::Error;

mod rule;
mod store;

pub use rule::{section_name, FirewallRule};
pub use store::{lock_package, DeviceRuleStore, FirewallRuleStore, LocalRuleStore, PackageLocks};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("rule location {0} is not writable")]
    Unwritable(String),

    #[error("no rule location configured")]
    NotConfigured,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed rule file: {0}")]
    Malformed(String),

    #[error("{0}")]
    Base(crate::Error),
}

impl From<crate::Error> for StorageError {
    fn from(value: crate::Error) -> Self {
        match value {
            crate::Error::IO(e) => Self::Io(e),
            e => Self::Base(e),
        }
    }
}

/// Rule file name of a package
pub fn rule_file_name(package: &str) -> String {
    format!("{package}.xml")
}

/// The package a rule file belongs to, `None` for anything that isn't a rule
/// file
pub fn package_of_rule_file(name: &str) -> Option<&str> {
    name.strip_suffix(".xml")
        .filter(|it| !it.is_empty() && !it.starts_with('.'))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_package_of_rule_file() {
        assert_eq!(package_of_rule_file("com.a.xml"), Some("com.a"));
        assert_eq!(package_of_rule_file(".com.a.xml.tmp"), None);
        assert_eq!(package_of_rule_file(".com.a.xml"), None);
        assert_eq!(package_of_rule_file("notes.txt"), None);
    }
}
