use super::events::{XmlAttribute, XmlEvent, XmlEventSource};
use super::{
    ApplicationInfo, DeclaredPermission, IntentData, IntentFilter, ManifestComponent,
    ManifestDocument, ManifestParseError, ManifestProvider, MetaData, ANDROID_NS,
};

type Result<T> = std::result::Result<T, ManifestParseError>;

struct Element {
    name: String,
    attributes: Vec<XmlAttribute>,
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

fn parse_int(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => i64::from_str_radix(hex, 16).ok(),
        None => raw.parse::<i64>().ok(),
    }
}

impl Element {
    fn find(&self, namespace: Option<&str>, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|it| it.name == name && it.namespace.as_deref() == namespace)
            .map(|it| it.value.as_str())
    }

    fn android(&self, name: &str) -> Option<String> {
        self.find(Some(ANDROID_NS), name).map(String::from)
    }

    /// Booleans that can't be read fall back to the platform default
    fn android_bool(&self, name: &str, default: bool) -> bool {
        self.find(Some(ANDROID_NS), name)
            .and_then(parse_bool)
            .unwrap_or(default)
    }

    fn android_int(&self, name: &str) -> Option<i64> {
        self.find(Some(ANDROID_NS), name).and_then(parse_int)
    }

    fn plain(&self, name: &str) -> Option<String> {
        self.find(None, name).map(String::from)
    }
}

/// Builds a [ManifestDocument] in a single forward pass over an event
/// source. Every `read_*` method is entered right after its element's start
/// event and returns right after the matching end event.
pub(crate) struct ManifestBuilder<S> {
    src: S,
    depth: usize,
}

impl<S: XmlEventSource> ManifestBuilder<S> {
    pub fn new(src: S) -> Self {
        Self { src, depth: 0 }
    }

    fn next_event(&mut self) -> Result<Option<XmlEvent>> {
        let ev = self.src.next_event()?;
        match &ev {
            Some(XmlEvent::Start { .. }) => self.depth += 1,
            Some(XmlEvent::End) => {
                self.depth = self
                    .depth
                    .checked_sub(1)
                    .ok_or_else(|| ManifestParseError::Malformed("unbalanced end tag".into()))?;
            }
            None => {}
        }
        Ok(ev)
    }

    /// Returns the next direct child of the element open at `depth`, or
    /// `None` once that element's end tag was consumed
    fn next_child(&mut self, depth: usize) -> Result<Option<Element>> {
        match self.next_event()? {
            Some(XmlEvent::Start { name, attributes }) => {
                debug_assert_eq!(self.depth, depth + 1);
                Ok(Some(Element { name, attributes }))
            }
            Some(XmlEvent::End) => Ok(None),
            None => Err(ManifestParseError::Malformed(
                "document ended inside an element".into(),
            )),
        }
    }

    /// Consume the rest of the element whose start was just read
    fn skip(&mut self) -> Result<()> {
        let target = self.depth - 1;
        while self.depth > target {
            if self.next_event()?.is_none() {
                return Err(ManifestParseError::Malformed(
                    "document ended inside an element".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn build(mut self) -> Result<ManifestDocument> {
        let root = loop {
            match self.next_event()? {
                Some(XmlEvent::Start { name, attributes }) => break Element { name, attributes },
                Some(XmlEvent::End) => continue,
                None => {
                    return Err(ManifestParseError::Malformed(
                        "no root element in manifest".into(),
                    ))
                }
            }
        };

        if root.name != "manifest" {
            return Err(ManifestParseError::Malformed(format!(
                "root element is <{}>, expected <manifest>",
                root.name
            )));
        }

        let mut doc = ManifestDocument {
            package: root.plain("package").unwrap_or_default(),
            version_code: root
                .android_int("versionCode")
                .or_else(|| root.find(None, "versionCode").and_then(parse_int)),
            version_name: root.android("versionName").or_else(|| root.plain("versionName")),
            ..Default::default()
        };

        let depth = self.depth;
        while let Some(el) = self.next_child(depth)? {
            match el.name.as_str() {
                "uses-sdk" => {
                    doc.min_sdk = el
                        .android_int("minSdkVersion")
                        .and_then(|it| i32::try_from(it).ok());
                    doc.target_sdk = el
                        .android_int("targetSdkVersion")
                        .and_then(|it| i32::try_from(it).ok());
                    self.skip()?;
                }
                "uses-permission" | "uses-permission-sdk-23" => {
                    if let Some(name) = el.android("name") {
                        doc.uses_permissions.push(name);
                    }
                    self.skip()?;
                }
                "permission" => {
                    if let Some(name) = el.android("name") {
                        doc.permissions.push(DeclaredPermission {
                            name,
                            protection_level: el.android("protectionLevel"),
                            description: el.android("description"),
                        });
                    }
                    self.skip()?;
                }
                "application" => doc.application = self.read_application(&el)?,
                _ => self.skip()?,
            }
        }

        Ok(doc)
    }

    fn read_application(&mut self, el: &Element) -> Result<ApplicationInfo> {
        let mut app = ApplicationInfo {
            label: el.android("label"),
            icon: el.android("icon"),
            theme: el.android("theme"),
            debuggable: el.android_bool("debuggable", false),
            allow_backup: el.android_bool("allowBackup", true),
            ..Default::default()
        };

        let depth = self.depth;
        while let Some(child) = self.next_child(depth)? {
            match child.name.as_str() {
                "activity" => app.activities.push(self.read_component(&child)?),
                "activity-alias" => {
                    let mut alias = self.read_component(&child)?;
                    alias.target_activity = child.android("targetActivity");
                    app.activities.push(alias);
                }
                "service" => app.services.push(self.read_component(&child)?),
                "receiver" => app.receivers.push(self.read_component(&child)?),
                "provider" => {
                    let component = self.read_component(&child)?;
                    app.providers.push(ManifestProvider {
                        component,
                        authorities: child.android("authorities"),
                        grant_uri_permissions: child.android_bool("grantUriPermissions", false),
                        read_permission: child.android("readPermission"),
                        write_permission: child.android("writePermission"),
                    });
                }
                "meta-data" => {
                    app.meta_data.push(read_meta_data(&child));
                    self.skip()?;
                }
                _ => self.skip()?,
            }
        }

        Ok(app)
    }

    fn read_component(&mut self, el: &Element) -> Result<ManifestComponent> {
        let mut component = ManifestComponent {
            name: el.android("name").unwrap_or_default(),
            enabled: el.android_bool("enabled", true),
            exported: el.android_bool("exported", false),
            permission: el.android("permission"),
            process: el.android("process"),
            ..Default::default()
        };

        let depth = self.depth;
        while let Some(child) = self.next_child(depth)? {
            match child.name.as_str() {
                "intent-filter" => component
                    .intent_filters
                    .push(self.read_intent_filter(&child)?),
                "meta-data" => {
                    component.meta_data.push(read_meta_data(&child));
                    self.skip()?;
                }
                _ => self.skip()?,
            }
        }

        Ok(component)
    }

    fn read_intent_filter(&mut self, el: &Element) -> Result<IntentFilter> {
        let mut filter = IntentFilter {
            priority: el.android_int("priority").and_then(|it| i32::try_from(it).ok()),
            auto_verify: el.android_bool("autoVerify", false),
            ..Default::default()
        };

        let depth = self.depth;
        while let Some(child) = self.next_child(depth)? {
            match child.name.as_str() {
                "action" => {
                    if let Some(name) = child.android("name") {
                        filter.actions.push(name);
                    }
                }
                "category" => {
                    if let Some(name) = child.android("name") {
                        filter.categories.push(name);
                    }
                }
                "data" => filter.data.push(IntentData {
                    scheme: child.android("scheme"),
                    host: child.android("host"),
                    port: child.android("port"),
                    path: child.android("path"),
                    path_prefix: child.android("pathPrefix"),
                    path_pattern: child.android("pathPattern"),
                    mime_type: child.android("mimeType"),
                }),
                _ => {}
            }
            self.skip()?;
        }

        Ok(filter)
    }
}

fn read_meta_data(el: &Element) -> MetaData {
    MetaData {
        name: el.android("name").unwrap_or_default(),
        value: el.android("value"),
        resource: el.android("resource"),
    }
}
