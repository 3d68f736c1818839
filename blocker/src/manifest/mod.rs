//! Reads component declarations straight out of a package's manifest, for
//! when the platform's package database can't be asked.
//!
//! Both the plain text form and the compiled binary form found inside APKs
//! are accepted. Either way the document is turned into the same stream of
//! element events and consumed by a single builder that tracks nesting depth,
//! so intent filters and meta-data are always attributed to the component
//! that encloses them.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use thiserror::Error;

use crate::model::{resolve_class_name, ComponentName, ComponentType};

mod binary;
mod builder;
mod events;
mod source;

pub use source::{DeviceManifestSource, ManifestSource};

#[cfg(test)]
pub(crate) use binary::writer as binary_writer;

pub const ANDROID_NS: &str = "http://schemas.android.com/apk/res/android";
pub const MANIFEST_ENTRY: &str = "AndroidManifest.xml";

#[derive(Error, Debug)]
pub enum ManifestParseError {
    #[error("malformed manifest: {0}")]
    Malformed(String),

    #[error("failed to read manifest: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Base(crate::Error),
}

impl From<crate::Error> for ManifestParseError {
    fn from(value: crate::Error) -> Self {
        match value {
            crate::Error::IO(e) => Self::Io(e),
            e => Self::Base(e),
        }
    }
}

impl From<zip::result::ZipError> for ManifestParseError {
    fn from(value: zip::result::ZipError) -> Self {
        match value {
            zip::result::ZipError::Io(e) => Self::Io(e),
            e => Self::Malformed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetaData {
    pub name: String,
    pub value: Option<String>,
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntentData {
    pub scheme: Option<String>,
    pub host: Option<String>,
    pub port: Option<String>,
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    pub path_pattern: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntentFilter {
    pub priority: Option<i32>,
    pub auto_verify: bool,
    pub actions: Vec<String>,
    pub categories: Vec<String>,
    pub data: Vec<IntentData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestComponent {
    /// The class name as written, possibly relative to the package
    pub name: String,
    pub enabled: bool,
    pub exported: bool,
    pub permission: Option<String>,
    pub process: Option<String>,
    /// Only set for `<activity-alias>`
    pub target_activity: Option<String>,
    pub intent_filters: Vec<IntentFilter>,
    pub meta_data: Vec<MetaData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestProvider {
    pub component: ManifestComponent,
    pub authorities: Option<String>,
    pub grant_uri_permissions: bool,
    pub read_permission: Option<String>,
    pub write_permission: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclaredPermission {
    pub name: String,
    pub protection_level: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationInfo {
    pub label: Option<String>,
    pub icon: Option<String>,
    pub theme: Option<String>,
    pub debuggable: bool,
    pub allow_backup: bool,
    pub meta_data: Vec<MetaData>,
    pub activities: Vec<ManifestComponent>,
    pub services: Vec<ManifestComponent>,
    pub receivers: Vec<ManifestComponent>,
    pub providers: Vec<ManifestProvider>,
}

impl Default for ApplicationInfo {
    fn default() -> Self {
        Self {
            label: None,
            icon: None,
            theme: None,
            debuggable: false,
            allow_backup: true,
            meta_data: Vec::new(),
            activities: Vec::new(),
            services: Vec::new(),
            receivers: Vec::new(),
            providers: Vec::new(),
        }
    }
}

/// The fully materialized manifest
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ManifestDocument {
    pub package: String,
    pub version_code: Option<i64>,
    pub version_name: Option<String>,
    pub min_sdk: Option<i32>,
    pub target_sdk: Option<i32>,
    pub uses_permissions: Vec<String>,
    pub permissions: Vec<DeclaredPermission>,
    pub application: ApplicationInfo,
}

impl ManifestDocument {
    /// All declarations of the given kind, activity aliases included with
    /// the activities
    pub fn components(&self, kind: ComponentType) -> Vec<&ManifestComponent> {
        let app = &self.application;
        match kind {
            ComponentType::Activity => app.activities.iter().collect(),
            ComponentType::Service => app.services.iter().collect(),
            ComponentType::Receiver => app.receivers.iter().collect(),
            ComponentType::Provider => app.providers.iter().map(|it| &it.component).collect(),
        }
    }

    /// Fully qualified names of the given kind, skipping nameless entries
    pub fn component_names(&self, kind: ComponentType) -> Vec<ComponentName> {
        self.components(kind)
            .into_iter()
            .filter(|it| !it.name.is_empty())
            .map(|it| ComponentName::new(self.package.as_str(), &it.name, kind))
            .collect()
    }

    /// Look up a single declaration by its fully qualified class name
    pub fn find_component(&self, kind: ComponentType, class: &str) -> Option<&ManifestComponent> {
        self.components(kind)
            .into_iter()
            .find(|it| resolve_class_name(&self.package, &it.name) == class)
    }
}

pub struct ManifestReader;

impl ManifestReader {
    /// Parse manifest bytes in either the text or the compiled encoding
    pub fn parse(data: &[u8]) -> Result<ManifestDocument, ManifestParseError> {
        if binary::is_binary_xml(data) {
            let src = binary::BinaryEventSource::new(data)?;
            builder::ManifestBuilder::new(src).build()
        } else {
            builder::ManifestBuilder::new(events::TextEventSource::new(data)).build()
        }
    }

    /// Read `AndroidManifest.xml` out of an APK
    pub fn from_archive(path: &Path) -> Result<ManifestDocument, ManifestParseError> {
        let bytes = Self::archive_manifest_bytes(path)?;
        Self::parse(&bytes)
    }

    pub fn archive_manifest_bytes(path: &Path) -> Result<Vec<u8>, ManifestParseError> {
        let file = File::open(path)?;
        let mut archive = zip::ZipArchive::new(file)?;
        let mut entry = match archive.by_name(MANIFEST_ENTRY) {
            Ok(v) => v,
            Err(zip::result::ZipError::FileNotFound) => {
                return Err(ManifestParseError::Malformed(format!(
                    "{} has no {}",
                    path.to_string_lossy(),
                    MANIFEST_ENTRY
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod test {
    use super::binary_writer::{build, Attr, AttrValue, Node};
    use super::*;
    use crate::testing::{tmp_dir, TmpDir};
    use rstest::*;
    use std::io::Write;

    const SAMPLE_MANIFEST: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android"
    xmlns:tools="http://schemas.android.com/tools"
    package="com.example.app"
    android:versionCode="42"
    android:versionName="4.2">

    <uses-sdk android:minSdkVersion="24" android:targetSdkVersion="34" />
    <uses-permission android:name="android.permission.INTERNET" />
    <permission android:name="com.example.app.PRIVATE" android:protectionLevel="signature" />

    <application android:label="Example" android:allowBackup="false">
        <meta-data android:name="app.level" android:value="1" />

        <activity android:name=".MainActivity" android:exported="true">
            <intent-filter android:priority="10">
                <action android:name="android.intent.action.MAIN" />
                <category android:name="android.intent.category.LAUNCHER" />
                <data android:scheme="https" android:host="example.com" android:pathPrefix="/app" />
            </intent-filter>
        </activity>

        <activity-alias android:name=".Alias" android:targetActivity=".MainActivity" />

        <service android:name="com.example.app.SyncService" android:enabled="@bool/sync_enabled" tools:name="ignored">
            <meta-data android:name="service.only" android:value="yes" />
            <unknown-child><nested /></unknown-child>
        </service>

        <receiver android:name=".BootReceiver" android:exported="maybe">
            <intent-filter>
                <action android:name="android.intent.action.BOOT_COMPLETED" />
            </intent-filter>
        </receiver>

        <provider android:name=".Files" android:authorities="com.example.app.files" android:grantUriPermissions="true" />
    </application>
</manifest>
"#;

    #[test]
    fn test_parse_text_manifest() {
        let doc = ManifestReader::parse(SAMPLE_MANIFEST.as_bytes()).expect("valid manifest");
        assert_eq!(doc.package, "com.example.app");
        assert_eq!(doc.version_code, Some(42));
        assert_eq!(doc.version_name.as_deref(), Some("4.2"));
        assert_eq!(doc.min_sdk, Some(24));
        assert_eq!(doc.target_sdk, Some(34));
        assert_eq!(doc.uses_permissions, vec!["android.permission.INTERNET"]);
        assert_eq!(
            doc.permissions[0].protection_level.as_deref(),
            Some("signature")
        );

        let app = &doc.application;
        assert_eq!(app.label.as_deref(), Some("Example"));
        assert!(!app.allow_backup);
        assert!(!app.debuggable);
        assert_eq!(app.meta_data.len(), 1);

        assert_eq!(app.activities.len(), 2);
        let main = &app.activities[0];
        assert!(main.exported);
        assert_eq!(main.intent_filters.len(), 1);
        let filter = &main.intent_filters[0];
        assert_eq!(filter.priority, Some(10));
        assert_eq!(filter.actions, vec!["android.intent.action.MAIN"]);
        assert_eq!(filter.data[0].path_prefix.as_deref(), Some("/app"));
        assert_eq!(
            app.activities[1].target_activity.as_deref(),
            Some(".MainActivity")
        );

        assert_eq!(app.providers[0].authorities.as_deref(), Some("com.example.app.files"));
        assert!(app.providers[0].grant_uri_permissions);
    }

    #[test]
    fn test_depth_scoping() {
        let doc = ManifestReader::parse(SAMPLE_MANIFEST.as_bytes()).expect("valid manifest");
        let app = &doc.application;

        let service = &app.services[0];
        assert_eq!(service.meta_data.len(), 1);
        assert_eq!(service.meta_data[0].name, "service.only");

        let receiver = &app.receivers[0];
        assert!(receiver.meta_data.is_empty());
        assert_eq!(receiver.intent_filters.len(), 1);
        assert_eq!(
            receiver.intent_filters[0].actions,
            vec!["android.intent.action.BOOT_COMPLETED"]
        );
    }

    #[test]
    fn test_bad_values_use_defaults() {
        let doc = ManifestReader::parse(SAMPLE_MANIFEST.as_bytes()).expect("valid manifest");
        // `@bool/...` can't be resolved, `maybe` isn't a boolean
        assert!(doc.application.services[0].enabled);
        assert!(!doc.application.receivers[0].exported);
    }

    #[test]
    fn test_out_of_range_ints_dropped() {
        let xml = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="p">
            <uses-sdk android:minSdkVersion="4294967297" android:targetSdkVersion="34" />
            <application>
                <receiver android:name=".R">
                    <intent-filter android:priority="0x100000000" />
                </receiver>
            </application>
        </manifest>"#;
        let doc = ManifestReader::parse(xml.as_bytes()).expect("valid manifest");
        assert_eq!(doc.min_sdk, None);
        assert_eq!(doc.target_sdk, Some(34));
        assert_eq!(doc.application.receivers[0].intent_filters[0].priority, None);
    }

    #[test]
    fn test_foreign_namespace_ignored() {
        let xml = r#"<manifest xmlns:android="http://schemas.android.com/apk/res/android"
            xmlns:x="urn:other" package="p">
            <application><service x:name=".Wrong" android:name=".Right" /></application>
        </manifest>"#;
        let doc = ManifestReader::parse(xml.as_bytes()).expect("valid manifest");
        assert_eq!(doc.application.services[0].name, ".Right");
        assert_eq!(
            doc.component_names(ComponentType::Service)[0].class,
            "p.Right"
        );
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            ManifestReader::parse(b"<manifest><application></manifest>"),
            Err(ManifestParseError::Malformed(_))
        ));
        assert!(matches!(
            ManifestReader::parse(b"<resources />"),
            Err(ManifestParseError::Malformed(_))
        ));
        assert!(matches!(
            ManifestReader::parse(b"<manifest><application>"),
            Err(ManifestParseError::Malformed(_))
        ));
    }

    fn binary_manifest() -> Vec<u8> {
        let a = |name, value| Attr {
            android: true,
            name,
            value,
        };
        build(&[
            Node::Start(
                "manifest",
                vec![
                    Attr {
                        android: false,
                        name: "package",
                        value: AttrValue::Str("com.example.bin"),
                    },
                    a("versionCode", AttrValue::Int(7)),
                ],
            ),
            Node::Start("application", vec![]),
            Node::Start(
                "service",
                vec![
                    a("name", AttrValue::Str(".Worker")),
                    a("exported", AttrValue::Bool(true)),
                    a("enabled", AttrValue::Bool(false)),
                ],
            ),
            Node::Start("meta-data", vec![a("name", AttrValue::Str("svc"))]),
            Node::End("meta-data"),
            Node::End("service"),
            Node::Start("receiver", vec![a("name", AttrValue::Str(".Rx"))]),
            Node::End("receiver"),
            Node::End("application"),
            Node::End("manifest"),
        ])
    }

    #[test]
    fn test_parse_binary_manifest() {
        let doc = ManifestReader::parse(&binary_manifest()).expect("valid binary manifest");
        assert_eq!(doc.package, "com.example.bin");
        assert_eq!(doc.version_code, Some(7));
        let service = &doc.application.services[0];
        assert!(service.exported);
        assert!(!service.enabled);
        assert_eq!(service.meta_data.len(), 1);
        assert!(doc.application.receivers[0].meta_data.is_empty());
    }

    #[rstest]
    fn test_from_archive(tmp_dir: TmpDir) {
        let apk = tmp_dir.get_path().join("app.apk");
        let file = File::create(&apk).expect("create apk");
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("classes.dex", options).expect("start");
        zip.write_all(b"dex\n035").expect("write");
        zip.start_file(MANIFEST_ENTRY, options).expect("start");
        zip.write_all(&binary_manifest()).expect("write");
        zip.finish().expect("finish");

        let doc = ManifestReader::from_archive(&apk).expect("archive manifest");
        assert_eq!(doc.package, "com.example.bin");

        let empty = tmp_dir.get_path().join("empty.apk");
        let file = File::create(&empty).expect("create apk");
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("classes.dex", options).expect("start");
        zip.finish().expect("finish");
        assert!(matches!(
            ManifestReader::from_archive(&empty),
            Err(ManifestParseError::Malformed(_))
        ));

        assert!(matches!(
            ManifestReader::from_archive(&tmp_dir.get_path().join("missing.apk")),
            Err(ManifestParseError::Io(_))
        ));
    }
}
