use std::path::Path;
use std::sync::Arc;

use anyhow::Context as AnyhowContext;

use blocker::adb::{Adb, ExecAdb};
use blocker::companion::Companion;
use blocker::config::Settings;
use blocker::controller::{ComponentController, ControllerDeps, ControllerKind};
use blocker::ifw::{DeviceRuleStore, FirewallRuleStore, LocalRuleStore};
use blocker::inspector::{ComponentInspector, ShellPackageDatabase};
use blocker::manifest::DeviceManifestSource;
use blocker::tasks::runner::TaskEnv;
use blocker::{Context, DefaultContext, RootCapability};

/// Everything needed to talk to the connected device, built once per command
pub struct Device {
    pub ctx: DefaultContext,
    pub settings: Settings,
    pub adb: Arc<dyn Adb>,
    pub root: Arc<RootCapability>,
    pub companion: Arc<Companion>,
}

impl Device {
    pub fn open() -> anyhow::Result<Self> {
        let ctx = DefaultContext::new();
        let settings = ctx.get_settings().context("loading settings")?;
        let adb: Arc<dyn Adb> = Arc::new(ExecAdb::new(&ctx).context("finding adb")?);
        let root = Arc::new(RootCapability::from_adb(Arc::clone(&adb)));
        let companion = Arc::new(Companion::from_adb(Arc::clone(&adb), &settings.companion));
        Ok(Self {
            ctx,
            settings,
            adb,
            root,
            companion,
        })
    }

    /// Override the configured controller
    pub fn with_controller(mut self, kind: Option<ControllerKind>) -> Self {
        if let Some(kind) = kind {
            self.settings.controller_kind = kind;
        }
        self
    }

    /// The firewall rule store, a local directory if one is given. The flag
    /// tells whether the store is the device's rule directory.
    pub fn rule_store(&self, local: Option<&Path>) -> anyhow::Result<(Arc<dyn FirewallRuleStore>, bool)> {
        if let Some(dir) = local {
            return Ok((Arc::new(LocalRuleStore::new(dir.to_path_buf())), false));
        }
        let staging = self.ctx.get_cache_dir_child("ifw")?;
        let store = DeviceRuleStore::new(
            Arc::clone(&self.adb),
            Arc::clone(&self.root),
            &self.settings.rules.ifw_dir,
            staging,
        );
        Ok((Arc::new(store), true))
    }

    pub fn inspector(&self) -> anyhow::Result<ComponentInspector> {
        let db = ShellPackageDatabase::new(Arc::clone(&self.adb), self.settings.device.user)
            .with_companion(Arc::clone(&self.companion));
        let apks = self.ctx.get_cache_dir_child("apks")?;
        let manifests = DeviceManifestSource::new(Arc::clone(&self.adb), apks);
        Ok(ComponentInspector::new(
            Arc::new(db),
            Arc::new(manifests),
            &self.settings.device.host_package,
        ))
    }

    pub fn deps(&self, store: Arc<dyn FirewallRuleStore>) -> ControllerDeps {
        ControllerDeps {
            adb: Arc::clone(&self.adb),
            root: Arc::clone(&self.root),
            store,
            companion: Arc::clone(&self.companion),
        }
    }

    /// The configured controller
    pub fn controller(&self, local_store: Option<&Path>) -> anyhow::Result<Box<dyn ComponentController>> {
        let (store, _) = self.rule_store(local_store)?;
        let kind = self.settings.controller_kind;
        log::debug!("using the {} controller", kind);
        Ok(kind.build(&self.deps(store), &self.settings))
    }

    pub fn task_env(&self, local_store: Option<&Path>) -> anyhow::Result<TaskEnv> {
        let (store, on_device) = self.rule_store(local_store)?;
        Ok(TaskEnv::new(
            Arc::new(self.inspector()?),
            &self.deps(store),
            self.settings.clone(),
            on_device,
        ))
    }
}
