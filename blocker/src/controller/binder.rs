use std::sync::Arc;

use crate::companion::{self, Companion};
use crate::model::ComponentName;

use super::{ComponentController, ControlError, ControlResult};

impl From<companion::Error> for ControlError {
    fn from(value: companion::Error) -> Self {
        match value {
            companion::Error::ServerError(msg) => Self::Refused(msg),
            companion::Error::InvalidInput(msg) => Self::Unexpected(msg),
            e => Self::BackendUnreachable(e.to_string()),
        }
    }
}

/// Asks the companion process, which holds the permission to change
/// component state, to do it on our behalf
pub struct BinderProxyController {
    companion: Arc<Companion>,
}

impl BinderProxyController {
    pub fn new(companion: Arc<Companion>) -> Self {
        Self { companion }
    }
}

impl ComponentController for BinderProxyController {
    fn set_enabled(&self, component: &ComponentName, enabled: bool) -> ControlResult<()> {
        self.companion
            .with_client(|c| c.set_component_enabled(component, enabled))?;
        Ok(())
    }

    fn check_enabled(&self, component: &ComponentName) -> ControlResult<bool> {
        Ok(self
            .companion
            .with_client(|c| c.component_enabled(component))?)
    }

    fn name(&self) -> &'static str {
        "binder"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::companion::{CompanionConnect, ConnectError};
    use crate::model::ComponentType;

    struct Unreachable;

    impl CompanionConnect for Unreachable {
        fn connect(&self) -> Result<companion::CompanionClient, ConnectError> {
            Err(ConnectError::NotRunning("com.merxury.blocker".into()))
        }
    }

    #[test]
    fn test_unreachable() {
        let ctrl = BinderProxyController::new(Arc::new(Companion::new(Box::new(Unreachable))));
        let cn = ComponentName::new("com.a", ".Main", ComponentType::Activity);
        assert!(matches!(
            ctrl.set_enabled(&cn, false),
            Err(ControlError::BackendUnreachable(_))
        ));
        assert!(matches!(
            ctrl.check_enabled(&cn),
            Err(ControlError::BackendUnreachable(_))
        ));
    }

    #[test]
    fn test_refusal_mapping() {
        assert!(matches!(
            ControlError::from(companion::Error::ServerError("denied".into())),
            ControlError::Refused(_)
        ));
        assert!(matches!(
            ControlError::from(companion::Error::InvalidResponse),
            ControlError::BackendUnreachable(_)
        ));
    }
}
