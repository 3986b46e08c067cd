//! Administrators run duties around tasks against the extension interfaces
//! of the managed objects they administer.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Failure;
use crate::job::context::DutyContext;
use crate::meta::AdministratorMetaData;

/// Index of a duty within its administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DutyKey(pub usize);

impl fmt::Display for DutyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "duty#{}", self.0)
    }
}

pub trait Administrator: Send + Sync {
    fn do_duty(&self, key: DutyKey, context: &mut DutyContext<'_>) -> anyhow::Result<()>;
}

pub trait AdministratorSource: Send + Sync {
    fn create_administrator(&self) -> anyhow::Result<Arc<dyn Administrator>>;
}

/// Lazily created administrator of one scope.
pub struct AdministratorContainer {
    meta: Arc<AdministratorMetaData>,
    administrator: Mutex<Option<Arc<dyn Administrator>>>,
}

impl AdministratorContainer {
    pub fn new(meta: Arc<AdministratorMetaData>) -> Arc<Self> {
        Arc::new(Self {
            meta,
            administrator: Mutex::new(None),
        })
    }

    pub fn meta(&self) -> &Arc<AdministratorMetaData> {
        &self.meta
    }

    pub fn administrator(&self) -> Result<Arc<dyn Administrator>, Failure> {
        let mut administrator = self.administrator.lock();
        if let Some(existing) = administrator.as_ref() {
            return Ok(existing.clone());
        }
        debug!(administrator = %self.meta.name, "creating administrator");
        let created = self.meta.source.create_administrator()?;
        *administrator = Some(created.clone());
        Ok(created)
    }

    pub fn is_created(&self) -> bool {
        self.administrator.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Noop;

    impl Administrator for Noop {
        fn do_duty(&self, _key: DutyKey, _context: &mut DutyContext<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingSource(AtomicUsize);

    impl AdministratorSource for CountingSource {
        fn create_administrator(&self) -> anyhow::Result<Arc<dyn Administrator>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Noop))
        }
    }

    struct FailingSource;

    impl AdministratorSource for FailingSource {
        fn create_administrator(&self) -> anyhow::Result<Arc<dyn Administrator>> {
            anyhow::bail!("no transaction manager")
        }
    }

    fn meta(source: Arc<dyn AdministratorSource>) -> Arc<AdministratorMetaData> {
        Arc::new(AdministratorMetaData {
            name: "tx".into(),
            source,
            administered: Vec::new(),
            duties: Vec::new(),
        })
    }

    #[test]
    fn administrator_created_once() {
        let source = Arc::new(CountingSource::default());
        let container = AdministratorContainer::new(meta(source.clone()));

        assert!(!container.is_created());
        let first = container.administrator().unwrap();
        let second = container.administrator().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn creation_failure_is_reported() {
        let container = AdministratorContainer::new(meta(Arc::new(FailingSource)));
        let failure = container.administrator().err().unwrap();
        assert_eq!(failure.to_string(), "no transaction manager");
        assert!(!container.is_created());
    }

    #[test]
    fn duty_key_display() {
        assert_eq!(DutyKey(3).to_string(), "duty#3");
    }
}
