use clap::builder::{NonEmptyStringValueParser, TypedValueParser};

use blocker::model::{ComponentName, ComponentType};

use crate::parsers::simple_error;

/// A `package/class` argument, the type comes from a separate flag
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlatComponent {
    pub package: String,
    pub class: String,
}

impl FlatComponent {
    pub fn with_kind(&self, kind: ComponentType) -> ComponentName {
        ComponentName::new(self.package.as_str(), &self.class, kind)
    }
}

#[derive(Clone)]
pub struct FlatComponentValueParser;

impl TypedValueParser for FlatComponentValueParser {
    type Value = FlatComponent;

    fn parse_ref(
        &self,
        cmd: &clap::Command,
        arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let parser = NonEmptyStringValueParser::new();
        let val = parser.parse_ref(cmd, arg, value)?;
        match val.split_once('/') {
            Some((package, class)) if !package.is_empty() && !class.is_empty() => {
                Ok(FlatComponent {
                    package: package.into(),
                    class: class.into(),
                })
            }
            _ => Err(simple_error(format!(
                "expected package/class, got {}",
                val
            ))),
        }
    }
}
