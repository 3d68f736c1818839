use std::path::PathBuf;
use std::sync::Arc;

use crate::adb::{check_adb_stderr, Adb};
use crate::command::quote;
use crate::utils::remove_file_if_exists;

use super::{ManifestDocument, ManifestParseError, ManifestReader};

/// Where manifest bytes for an installed package come from
pub trait ManifestSource: Send + Sync {
    /// Raw `AndroidManifest.xml` bytes of an installed package
    fn manifest_bytes(&self, package: &str) -> Result<Vec<u8>, ManifestParseError>;

    fn load(&self, package: &str) -> Result<ManifestDocument, ManifestParseError> {
        let bytes = self.manifest_bytes(package)?;
        ManifestReader::parse(&bytes)
    }
}

/// Pulls the installed APK off the device into the cache directory and reads
/// the manifest out of it
pub struct DeviceManifestSource {
    adb: Arc<dyn Adb>,
    cache_dir: PathBuf,
}

impl DeviceManifestSource {
    pub fn new(adb: Arc<dyn Adb>, cache_dir: PathBuf) -> Self {
        Self { adb, cache_dir }
    }

    /// Device path of the package's base APK from `pm path`
    fn apk_path(&self, package: &str) -> crate::Result<String> {
        let out = self.adb.checked_shell(&format!("pm path {}", quote(package)))?;
        let out = out.err_on_status()?;
        let stdout = out.stdout_utf8_lossy();
        parse_pm_path(&stdout).ok_or_else(|| crate::Error::PackageNotFound(package.into()))
    }
}

fn parse_pm_path(out: &str) -> Option<String> {
    let paths: Vec<&str> = out
        .lines()
        .filter_map(|l| l.trim().strip_prefix("package:"))
        .filter(|l| !l.is_empty())
        .collect();
    paths
        .iter()
        .find(|it| it.ends_with("/base.apk"))
        .or_else(|| paths.first())
        .map(|it| String::from(*it))
}

impl ManifestSource for DeviceManifestSource {
    fn manifest_bytes(&self, package: &str) -> Result<Vec<u8>, ManifestParseError> {
        let device_path = self.apk_path(package)?;
        let local = self.cache_dir.join(format!("{package}.apk"));
        let local_str = local.to_string_lossy();

        log::debug!("pulling {} to {}", device_path, local_str);
        let out = self.adb.pull(&device_path, &local_str)?;
        check_adb_stderr(&out)?;
        out.err_on_status()?;

        let res = ManifestReader::archive_manifest_bytes(&local);
        if let Err(e) = remove_file_if_exists(&local) {
            log::warn!("failed to remove pulled apk {}: {}", local_str, e);
        }
        res
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testing::{mock_adb, ok_output, output, tmp_dir, MockAdb, TmpDir};
    use mockall::predicate::eq;
    use rstest::*;

    #[test]
    fn test_parse_pm_path() {
        let out = "package:/data/app/~~x==/com.example-1/split_config.en.apk\n\
                   package:/data/app/~~x==/com.example-1/base.apk\n";
        assert_eq!(
            parse_pm_path(out).as_deref(),
            Some("/data/app/~~x==/com.example-1/base.apk")
        );
        assert_eq!(
            parse_pm_path("package:/system/app/Foo/Foo.apk\n").as_deref(),
            Some("/system/app/Foo/Foo.apk")
        );
        assert_eq!(parse_pm_path(""), None);
    }

    #[rstest]
    fn test_missing_package(mut mock_adb: MockAdb, tmp_dir: TmpDir) {
        mock_adb
            .expect_shell()
            .with(eq("pm path 'com.gone'"))
            .returning(|_| Ok(output(1, "", "")));
        let src = DeviceManifestSource::new(Arc::new(mock_adb), tmp_dir.get_path().clone());
        assert!(src.manifest_bytes("com.gone").is_err());
    }

    #[rstest]
    fn test_pull_failure_is_reported(mut mock_adb: MockAdb, tmp_dir: TmpDir) {
        mock_adb
            .expect_shell()
            .returning(|_| Ok(ok_output("package:/data/app/com.x/base.apk\n")));
        mock_adb
            .expect_pull()
            .withf(|device, _| device == "/data/app/com.x/base.apk")
            .returning(|_, _| Ok(output(1, "", "adb: error: failed to stat remote object")));
        let src = DeviceManifestSource::new(Arc::new(mock_adb), tmp_dir.get_path().clone());
        assert!(matches!(
            src.manifest_bytes("com.x"),
            Err(ManifestParseError::Base(crate::Error::CommandError(1, _)))
        ));
    }
}
