use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::Writer;
use serde::Deserialize;

use crate::model::{ComponentName, ComponentType};

use super::StorageError;

/// The intent firewall section a component type is listed under. Providers
/// can't be firewalled.
pub fn section_name(kind: ComponentType) -> Option<&'static str> {
    match kind {
        ComponentType::Activity => Some("activity"),
        ComponentType::Receiver => Some("broadcast"),
        ComponentType::Service => Some("service"),
        ComponentType::Provider => None,
    }
}

/// The firewall rule file of a single package. Each section holds
/// `package/class` filters in insertion order without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirewallRule {
    package: String,
    activity: Vec<String>,
    broadcast: Vec<String>,
    service: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RulesXml {
    #[serde(default)]
    activity: Vec<SectionXml>,
    #[serde(default)]
    broadcast: Vec<SectionXml>,
    #[serde(default)]
    service: Vec<SectionXml>,
}

#[derive(Deserialize)]
struct SectionXml {
    #[serde(rename = "component-filter", default)]
    filters: Vec<FilterXml>,
}

#[derive(Deserialize)]
struct FilterXml {
    #[serde(rename = "@name")]
    name: Option<String>,
}

fn malformed<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::Malformed(e.to_string())
}

impl FirewallRule {
    pub fn new<S: Into<String>>(package: S) -> Self {
        Self {
            package: package.into(),
            ..Default::default()
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn is_empty(&self) -> bool {
        self.activity.is_empty() && self.broadcast.is_empty() && self.service.is_empty()
    }

    /// Number of filters across all sections
    pub fn len(&self) -> usize {
        self.activity.len() + self.broadcast.len() + self.service.len()
    }

    /// The filters of the section `kind` maps to, empty for providers
    pub fn filters(&self, kind: ComponentType) -> &[String] {
        match kind {
            ComponentType::Activity => self.activity.as_slice(),
            ComponentType::Receiver => self.broadcast.as_slice(),
            ComponentType::Service => self.service.as_slice(),
            ComponentType::Provider => &[],
        }
    }

    fn section_mut(&mut self, kind: ComponentType) -> Option<&mut Vec<String>> {
        match kind {
            ComponentType::Activity => Some(&mut self.activity),
            ComponentType::Receiver => Some(&mut self.broadcast),
            ComponentType::Service => Some(&mut self.service),
            ComponentType::Provider => None,
        }
    }

    pub fn is_blocked(&self, component: &ComponentName) -> bool {
        let flat = component.flatten();
        self.filters(component.kind).iter().any(|it| *it == flat)
    }

    /// Add the component, returning whether the rule changed. `None` means
    /// the component type can't be firewalled.
    pub fn block(&mut self, component: &ComponentName) -> Option<bool> {
        let flat = component.flatten();
        let section = self.section_mut(component.kind)?;
        if section.contains(&flat) {
            return Some(false);
        }
        section.push(flat);
        Some(true)
    }

    /// Remove the component, returning whether the rule changed
    pub fn unblock(&mut self, component: &ComponentName) -> bool {
        let flat = component.flatten();
        match self.section_mut(component.kind) {
            Some(section) => {
                let before = section.len();
                section.retain(|it| *it != flat);
                section.len() != before
            }
            None => false,
        }
    }

    /// Every blocked component, in section order
    pub fn components(&self) -> impl Iterator<Item = ComponentName> + '_ {
        [
            ComponentType::Activity,
            ComponentType::Receiver,
            ComponentType::Service,
        ]
        .into_iter()
        .flat_map(move |kind| {
            self.filters(kind)
                .iter()
                .filter_map(move |it| ComponentName::parse(it, kind))
        })
    }

    /// Parse a rule file. Unknown sections and attributes are ignored, a
    /// filter that isn't `package/class` is dropped.
    pub fn from_xml(package: &str, raw: &[u8]) -> Result<Self, StorageError> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| StorageError::Malformed(format!("{package}: {e}")))?;
        if text.trim().is_empty() {
            return Ok(Self::new(package));
        }
        let parsed: RulesXml = quick_xml::de::from_str(text)
            .map_err(|e| StorageError::Malformed(format!("{package}: {e}")))?;

        let mut rule = Self::new(package);
        for (kind, sections) in [
            (ComponentType::Activity, parsed.activity),
            (ComponentType::Receiver, parsed.broadcast),
            (ComponentType::Service, parsed.service),
        ] {
            for filter in sections.into_iter().flat_map(|s| s.filters) {
                let name = match filter.name {
                    Some(v) => v,
                    None => continue,
                };
                match ComponentName::parse(&name, kind) {
                    Some(cn) => {
                        rule.block(&cn);
                    }
                    None => log::warn!("skipping invalid component filter {} in {}", name, package),
                }
            }
        }
        Ok(rule)
    }

    pub fn to_xml(&self) -> Result<Vec<u8>, StorageError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(malformed)?;
        writer
            .write_event(Event::Start(BytesStart::new("rules")))
            .map_err(malformed)?;

        for kind in [
            ComponentType::Activity,
            ComponentType::Receiver,
            ComponentType::Service,
        ] {
            let filters = self.filters(kind);
            let name = match section_name(kind) {
                Some(v) if !filters.is_empty() => v,
                _ => continue,
            };
            writer
                .write_event(Event::Start(
                    BytesStart::new(name).with_attributes([("block", "true"), ("log", "false")]),
                ))
                .map_err(malformed)?;
            for filter in filters {
                writer
                    .write_event(Event::Empty(
                        BytesStart::new("component-filter")
                            .with_attributes([("name", filter.as_str())]),
                    ))
                    .map_err(malformed)?;
            }
            writer
                .write_event(Event::End(BytesEnd::new(name)))
                .map_err(malformed)?;
        }

        writer
            .write_event(Event::End(BytesEnd::new("rules")))
            .map_err(malformed)?;
        let mut out = writer.into_inner().into_inner();
        out.push(b'\n');
        Ok(out)
    }
}
