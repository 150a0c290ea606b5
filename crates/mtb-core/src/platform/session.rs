//! Session handle enforcing the single-active-context protocol.
//!
//! The platform's object tree has one shared "active study case" cursor. All
//! activation goes through [`Session`], which refuses a second active context
//! and, once the batch has started, refuses any activation other than export.

use serde::Serialize;

use super::{ObjectHandle, Platform};
use crate::error::{CampaignError, CampaignResult};

/// Why a context is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// The context the user left active, before provisioning starts
    Setup,
    /// Provisioning: bindings and result capture are applied
    Binding,
    /// Post-run export
    Export,
}

/// Owns the platform and tracks the one active context.
#[derive(Debug)]
pub struct Session<P> {
    platform: P,
    active: Option<(ObjectHandle, Activation)>,
    sealed: bool,
}

impl<P: Platform> Session<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            active: None,
            sealed: false,
        }
    }

    /// Direct platform access for operations that do not switch contexts.
    pub fn platform(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn platform_ref(&self) -> &P {
        &self.platform
    }

    /// Record a context that was already active when the session started.
    pub fn adopt(&mut self, context: ObjectHandle) -> CampaignResult<()> {
        if let Some((current, _)) = self.active {
            return Err(CampaignError::ContextProtocol(format!(
                "cannot adopt {} while {} is active",
                context, current
            )));
        }
        self.active = Some((context, Activation::Setup));
        Ok(())
    }

    /// Currently active context and its purpose.
    pub fn active(&self) -> Option<(ObjectHandle, Activation)> {
        self.active
    }

    pub fn activate(&mut self, context: ObjectHandle, purpose: Activation) -> CampaignResult<()> {
        if let Some((current, _)) = self.active {
            return Err(CampaignError::ContextProtocol(format!(
                "cannot activate {} while {} is active",
                context, current
            )));
        }
        if self.sealed && purpose != Activation::Export {
            return Err(CampaignError::ContextProtocol(format!(
                "cannot activate {} for {:?} after the batch started",
                context, purpose
            )));
        }
        self.platform.activate(context)?;
        self.active = Some((context, purpose));
        tracing::debug!(context = %context, purpose = ?purpose, "Context activated");
        Ok(())
    }

    pub fn deactivate(&mut self, context: ObjectHandle) -> CampaignResult<()> {
        match self.active {
            Some((current, _)) if current == context => {
                self.platform.deactivate(context)?;
                self.active = None;
                tracing::debug!(context = %context, "Context deactivated");
                Ok(())
            }
            Some((current, _)) => Err(CampaignError::ContextProtocol(format!(
                "cannot deactivate {} while {} is active",
                context, current
            ))),
            None => Err(CampaignError::ContextProtocol(format!(
                "cannot deactivate {}: no active context",
                context
            ))),
        }
    }

    /// Activate `context`, run `f`, then deactivate.
    ///
    /// The context is deactivated even when `f` fails; the first error wins.
    pub fn with_context<T>(
        &mut self,
        context: ObjectHandle,
        purpose: Activation,
        f: impl FnOnce(&mut P) -> CampaignResult<T>,
    ) -> CampaignResult<T> {
        self.activate(context, purpose)?;
        let result = f(&mut self.platform);
        let released = self.deactivate(context);
        let value = result?;
        released?;
        Ok(value)
    }

    /// Mark the start of the batch; binding activations are refused afterwards.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn into_platform(self) -> P {
        self.platform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{MemoryPlatform, ProjectFolder};

    fn session_with_cases() -> (Session<MemoryPlatform>, ObjectHandle, ObjectHandle) {
        let mut platform = MemoryPlatform::test_bench();
        let study = platform
            .project_folder(ProjectFolder::StudyCases)
            .unwrap()
            .unwrap();
        let a = platform.create(study, "IntCase", "1_a").unwrap();
        let b = platform.create(study, "IntCase", "2_b").unwrap();
        (Session::new(platform), a, b)
    }

    #[test]
    fn test_second_active_context_is_rejected() {
        let (mut session, a, b) = session_with_cases();
        session.activate(a, Activation::Binding).unwrap();
        let err = session.activate(b, Activation::Binding).unwrap_err();
        assert!(matches!(err, CampaignError::ContextProtocol(_)));

        session.deactivate(a).unwrap();
        session.activate(b, Activation::Binding).unwrap();
        assert_eq!(session.active(), Some((b, Activation::Binding)));
    }

    #[test]
    fn test_deactivate_requires_active_context() {
        let (mut session, a, b) = session_with_cases();
        assert!(session.deactivate(a).is_err());
        session.activate(a, Activation::Binding).unwrap();
        assert!(session.deactivate(b).is_err());
    }

    #[test]
    fn test_sealed_session_allows_export_only() {
        let (mut session, a, _) = session_with_cases();
        session.seal();
        assert!(session.activate(a, Activation::Binding).is_err());
        assert!(session.activate(a, Activation::Setup).is_err());
        session.with_context(a, Activation::Export, |_| Ok(())).unwrap();
        assert!(session.active().is_none());
    }

    #[test]
    fn test_with_context_deactivates_on_error() {
        let (mut session, a, _) = session_with_cases();
        let result: CampaignResult<()> = session.with_context(a, Activation::Binding, |_| {
            Err(CampaignError::ObjectNotFound("x".to_string()))
        });
        assert!(matches!(result, Err(CampaignError::ObjectNotFound(_))));
        assert!(session.active().is_none());
        assert!(!session.platform_ref().is_active(a));
    }

    #[test]
    fn test_adopt_then_release() {
        let (mut session, a, _) = session_with_cases();
        let base = session.platform().active_study_case().unwrap().unwrap();
        session.adopt(base).unwrap();
        assert!(session.activate(a, Activation::Binding).is_err());
        session.deactivate(base).unwrap();
        session.activate(a, Activation::Binding).unwrap();
    }
}
