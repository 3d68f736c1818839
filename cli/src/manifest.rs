use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as AnyhowContext;
use clap::{self, Args};

use blocker::manifest::{DeviceManifestSource, ManifestDocument, ManifestReader, ManifestSource};
use blocker::Context;
use blocker::model::ComponentType;
use blocker::utils::{path_has_ext, read_file_bytes};

use crate::device::Device;

#[derive(Args)]
pub struct Manifest {
    /// A local APK, a local manifest file or the name of an installed package
    #[arg()]
    target: String,

    /// Also print intent filter actions
    #[arg(short, long)]
    verbose: bool,
}

impl Manifest {
    fn load(&self) -> anyhow::Result<ManifestDocument> {
        let path = PathBuf::from(&self.target);
        if path.is_file() {
            let doc = if path_has_ext(&path, "xml") {
                ManifestReader::parse(&read_file_bytes(&path)?)
            } else {
                ManifestReader::from_archive(&path)
            };
            return doc.with_context(|| format!("reading {}", self.target));
        }

        let device = Device::open()?;
        let apks = device.ctx.get_cache_dir_child("apks")?;
        DeviceManifestSource::new(Arc::clone(&device.adb), apks)
            .load(&self.target)
            .with_context(|| format!("loading the manifest of {}", self.target))
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let doc = self.load()?;
        println!(
            "{} {} ({})",
            doc.package,
            doc.version_name.as_deref().unwrap_or("-"),
            doc.version_code.map_or_else(|| "-".to_string(), |it| it.to_string())
        );
        for kind in ComponentType::ALL {
            let components = doc.components(kind);
            if components.is_empty() {
                continue;
            }
            println!("{}:", kind.as_str().to_lowercase());
            for it in components {
                let mut flags = Vec::new();
                if it.exported {
                    flags.push("exported");
                }
                if !it.enabled {
                    flags.push("disabled");
                }
                println!("  {} {}", it.name, flags.join(" "));
                if self.verbose {
                    for action in it.intent_filters.iter().flat_map(|f| f.actions.iter()) {
                        println!("    action {}", action);
                    }
                }
            }
        }
        Ok(())
    }
}
